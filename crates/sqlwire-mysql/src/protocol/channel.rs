//! Framed packet I/O over a byte stream.
//!
//! The channel owns the transport, the packet sequence counter, optional
//! compression, and the scratch-buffer pool. It is the only component that
//! touches the socket.

#![allow(clippy::cast_possible_truncation)]

use std::io::Write;
use std::time::{Duration, Instant};

use sqlwire_core::error::ConnectionErrorKind;
use sqlwire_core::{Error, Result};

use crate::error::{communications_error, connection_error_kind, protocol_error};
use crate::protocol::compress::{Compressor, FrameError};
use crate::protocol::{BufferPool, MAX_PACKET_SIZE, PacketHeader, PacketReader, PacketType};
use crate::stream::Stream;

/// One logical packet read from the server.
///
/// The packet owns its payload until it is handed back to the channel with
/// [`PacketChannel::recycle`] (or dropped).
#[derive(Debug)]
pub struct Packet {
    payload: Vec<u8>,
    sequence_id: u8,
}

impl Packet {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A cursor positioned at the start of the payload.
    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(&self.payload)
    }

    pub fn first_byte(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Sequence number of the last physical packet of this logical packet.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn packet_type(&self) -> PacketType {
        match self.first_byte() {
            Some(b) => PacketType::from_first_byte(b, self.payload.len()),
            None => PacketType::Data,
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Framed, sequence-checked packet transport.
#[derive(Debug)]
pub struct PacketChannel {
    stream: Option<Box<dyn Stream>>,
    sequence: u8,
    max_packet_size: usize,
    compressor: Option<Compressor>,
    pool: BufferPool,
    last_sent: Option<Instant>,
    last_received: Option<Instant>,
}

impl PacketChannel {
    pub fn new(stream: Box<dyn Stream>, max_packet_size: usize) -> Self {
        Self {
            stream: Some(stream),
            sequence: 0,
            max_packet_size,
            compressor: None,
            pool: BufferPool::default(),
            last_sent: None,
            last_received: None,
        }
    }

    /// Restart sequence numbering; every command begins at zero.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
        if let Some(c) = self.compressor.as_mut() {
            c.reset_sequence();
        }
    }

    /// Sequence number the next physical packet (in either direction) must carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Adopt the server's `max_allowed_packet` once it is known.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size;
    }

    /// Wrap all further traffic in compressed frames.
    ///
    /// The compressed sequence starts at 0 and is reset together with the
    /// packet sequence at each command.
    pub fn enable_compression(&mut self) {
        if self.compressor.is_none() {
            tracing::debug!("enabling protocol compression");
            self.compressor = Some(Compressor::new());
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compressor.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn is_secure(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_secure())
    }

    /// Time since a packet was last written successfully.
    pub fn since_last_sent(&self) -> Option<Duration> {
        self.last_sent.map(|t| t.elapsed())
    }

    /// Time since a packet was last read successfully.
    pub fn since_last_received(&self) -> Option<Duration> {
        self.last_received.map(|t| t.elapsed())
    }

    /// Apply a socket timeout to the transport.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let stream = self.open_stream()?;
        if let Err(e) = stream.set_timeout(timeout) {
            return Err(self.fail_io("Failed to set socket timeout", e));
        }
        Ok(())
    }

    /// Run the transport's after-handshake hook.
    pub fn after_handshake(&mut self, socket_timeout: Option<Duration>) -> Result<()> {
        let stream = self.open_stream()?;
        if let Err(e) = stream.after_handshake(socket_timeout) {
            return Err(self.fail_io("Transport after-handshake hook failed", e));
        }
        Ok(())
    }

    /// Replace the transport, e.g. with a TLS session layered over it.
    ///
    /// If `upgrade` fails the original stream is gone and the channel stays
    /// closed.
    pub fn upgrade_stream<F>(&mut self, upgrade: F) -> Result<()>
    where
        F: FnOnce(Box<dyn Stream>) -> Result<Box<dyn Stream>>,
    {
        let stream = self.stream.take().ok_or_else(closed_error)?;
        self.stream = Some(upgrade(stream)?);
        Ok(())
    }

    /// Hand a packet's buffer back for reuse.
    pub fn recycle(&mut self, packet: Packet) {
        self.pool.give(packet.payload);
    }

    /// Read one logical packet, reassembling split payloads.
    pub fn read_packet(&mut self) -> Result<Packet> {
        let mut payload = self.pool.take(0);
        let sequence_id = loop {
            let mut header_bytes = [0u8; PacketHeader::SIZE];
            self.read_exact(&mut header_bytes)?;
            let header = PacketHeader::from_bytes(&header_bytes);

            if header.sequence_id != self.sequence {
                let msg = format!(
                    "Packets out of order: expected sequence {}, got {}",
                    self.sequence, header.sequence_id
                );
                return Err(self.fail(protocol_error(msg)));
            }
            self.sequence = self.sequence.wrapping_add(1);

            let len = header.payload_length as usize;
            if payload.len() + len > self.max_packet_size {
                let msg = format!(
                    "Packet of {} bytes exceeds the maximum packet size of {} bytes",
                    payload.len() + len,
                    self.max_packet_size
                );
                return Err(self.fail(protocol_error(msg)));
            }

            let start = payload.len();
            payload.resize(start + len, 0);
            self.read_exact(&mut payload[start..])?;

            tracing::trace!(
                sequence = header.sequence_id,
                length = len,
                "read physical packet"
            );
            if len < MAX_PACKET_SIZE {
                break header.sequence_id;
            }
        };
        self.last_received = Some(Instant::now());
        Ok(Packet {
            payload,
            sequence_id,
        })
    }

    /// Write one logical packet, splitting it at the physical size limit.
    ///
    /// A payload that fills its last physical packet exactly is followed by
    /// an empty packet so the reader knows it ended.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_packet_size {
            return Err(protocol_error(format!(
                "Packet of {} bytes exceeds the maximum packet size of {} bytes",
                payload.len(),
                self.max_packet_size
            )));
        }

        let physical = payload.len() / MAX_PACKET_SIZE + 1;
        let mut wire = self
            .pool
            .take(payload.len() + physical * PacketHeader::SIZE);
        let mut offset = 0;
        loop {
            let chunk_len = (payload.len() - offset).min(MAX_PACKET_SIZE);
            let header = PacketHeader {
                payload_length: chunk_len as u32,
                sequence_id: self.sequence,
            };
            wire.extend_from_slice(&header.to_bytes());
            wire.extend_from_slice(&payload[offset..offset + chunk_len]);
            self.sequence = self.sequence.wrapping_add(1);
            offset += chunk_len;
            if chunk_len < MAX_PACKET_SIZE {
                break;
            }
        }

        let result = self.write_wire(&wire);
        self.pool.give(wire);
        result?;
        self.last_sent = Some(Instant::now());
        tracing::trace!(length = payload.len(), packets = physical, "wrote packet");
        Ok(())
    }

    /// Shut the transport down and drop it.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                tracing::debug!(error = %e, "error shutting down transport");
            }
        }
        self.compressor = None;
        self.pool.clear();
    }

    fn write_wire(&mut self, wire: &[u8]) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(closed_error());
        };
        let result = match self.compressor.as_mut() {
            Some(c) => c.write_frames(stream, wire),
            None => stream
                .write_all(wire)
                .and_then(|()| stream.flush())
                .map_err(FrameError::Io),
        };
        result.map_err(|e| self.frame_failure("Failed to write packet", e))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(closed_error());
        };
        let result = match self.compressor.as_mut() {
            Some(c) => c.read_exact(stream, buf),
            None => std::io::Read::read_exact(stream, buf).map_err(FrameError::Io),
        };
        result.map_err(|e| self.frame_failure("Failed to read packet", e))
    }

    fn open_stream(&mut self) -> Result<&mut Box<dyn Stream>> {
        self.stream.as_mut().ok_or_else(closed_error)
    }

    fn frame_failure(&mut self, context: &str, err: FrameError) -> Error {
        match err {
            FrameError::Io(e) => self.fail_io(context, e),
            FrameError::Corrupt(msg) => self.fail(protocol_error(msg)),
        }
    }

    fn fail_io(&mut self, context: &str, err: std::io::Error) -> Error {
        let error = communications_error(
            context,
            err,
            self.since_last_sent(),
            self.since_last_received(),
        );
        self.fail(error)
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::warn!(error = %error, "closing channel after fatal error");
        self.close();
        error
    }
}

fn closed_error() -> Error {
    connection_error_kind(
        ConnectionErrorKind::Disconnected,
        "Connection is closed; no further packets can be exchanged",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::{ScriptedStream, frame};
    use proptest::prelude::*;

    const DEFAULT_MAX: usize = 64 * 1024 * 1024;

    fn channel_over(bytes: Vec<u8>) -> (PacketChannel, ScriptedStream) {
        let stream = ScriptedStream::new(bytes);
        (
            PacketChannel::new(Box::new(stream.clone()), DEFAULT_MAX),
            stream,
        )
    }

    /// Sequence ids of each physical packet in an uncompressed byte stream.
    fn physical_sequences(mut wire: &[u8]) -> Vec<u8> {
        let mut seqs = Vec::new();
        while wire.len() >= 4 {
            let header = PacketHeader::from_bytes(&[wire[0], wire[1], wire[2], wire[3]]);
            seqs.push(header.sequence_id);
            wire = &wire[4 + header.payload_length as usize..];
        }
        seqs
    }

    fn round_trip(payload: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let (mut writer, sink) = channel_over(Vec::new());
        writer.write_packet(payload).unwrap();
        let wire = sink.written();
        let (mut reader, _) = channel_over(wire.clone());
        let packet = reader.read_packet().unwrap();
        (packet.into_payload(), wire)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_small_payload_is_one_physical_packet(
            payload in proptest::collection::vec(any::<u8>(), 0..4096)
        ) {
            let (read_back, wire) = round_trip(&payload);
            prop_assert_eq!(&read_back, &payload);
            prop_assert_eq!(physical_sequences(&wire), vec![0u8]);
        }
    }

    #[test]
    fn test_exact_threshold_needs_trailing_empty_packet() {
        let payload = vec![0xABu8; MAX_PACKET_SIZE];
        let (read_back, wire) = round_trip(&payload);
        assert_eq!(read_back.len(), payload.len());
        assert!(read_back == payload);
        assert_eq!(physical_sequences(&wire), vec![0, 1]);
        assert_eq!(&wire[wire.len() - 4..], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_payload_above_threshold_splits() {
        let payload: Vec<u8> = (0..MAX_PACKET_SIZE + 5).map(|i| (i % 251) as u8).collect();
        let (read_back, wire) = round_trip(&payload);
        assert!(read_back == payload);
        assert_eq!(physical_sequences(&wire), vec![0, 1]);
    }

    #[test]
    fn test_sequence_wraps_modulo_256() {
        let payloads: Vec<Vec<u8>> = (0..300).map(|i| vec![(i % 256) as u8; 3]).collect();
        let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        let (mut reader, _) = channel_over(frame(&refs, 0));
        for expected in &payloads {
            let packet = reader.read_packet().unwrap();
            assert_eq!(packet.payload(), expected.as_slice());
        }
        assert_eq!(reader.sequence(), (300 % 256) as u8);
    }

    #[test]
    fn test_out_of_order_sequence_is_protocol_error() {
        let (mut reader, _) = channel_over(frame(&[b"hello"], 3));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, Error::Protocol(ref p) if p.message.contains("out of order")));
        assert!(reader.is_closed());
    }

    #[test]
    fn test_declared_length_above_maximum_is_rejected() {
        let stream = ScriptedStream::new(frame(&[&[0u8; 128]], 0));
        let mut reader = PacketChannel::new(Box::new(stream), 64);
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, Error::Protocol(ref p) if p.message.contains("maximum packet size")));
    }

    #[test]
    fn test_oversized_write_is_refused_before_sending() {
        let stream = ScriptedStream::new(Vec::new());
        let mut writer = PacketChannel::new(Box::new(stream.clone()), 16);
        assert!(writer.write_packet(&[0u8; 17]).is_err());
        assert!(stream.written().is_empty());
        assert!(!writer.is_closed());
    }

    #[test]
    fn test_short_read_is_communications_failure_and_closes() {
        let mut truncated = frame(&[b"hello world"], 0);
        truncated.truncate(8);
        let (mut reader, _) = channel_over(truncated);
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, Error::Communications(_)));
        assert!(reader.is_closed());

        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_compressed_round_trip() {
        let (mut writer, sink) = channel_over(Vec::new());
        writer.enable_compression();
        let big = vec![b'z'; 4096];
        writer.write_packet(b"ping").unwrap();
        writer.write_packet(&big).unwrap();

        let (mut reader, _) = channel_over(sink.written());
        reader.enable_compression();
        assert_eq!(reader.read_packet().unwrap().payload(), b"ping");
        assert_eq!(reader.read_packet().unwrap().payload(), &big[..]);
    }

    #[test]
    fn test_recycled_buffers_are_reused() {
        let (mut reader, _) = channel_over(frame(&[b"one", b"two"], 0));
        let first = reader.read_packet().unwrap();
        reader.recycle(first);
        assert_eq!(reader.pool.pooled(), 1);
        let second = reader.read_packet().unwrap();
        assert_eq!(second.payload(), b"two");
        assert_eq!(reader.pool.pooled(), 0);
    }
}
