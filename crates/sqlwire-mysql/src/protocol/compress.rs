//! Compressed packet framing (CLIENT_COMPRESS).
//!
//! Once compression is negotiated the ordinary packet stream is cut into
//! frames, each with a 7-byte header:
//!
//! - 3 bytes: length of the frame body as sent
//! - 1 byte: compressed sequence number (independent of packet sequence)
//! - 3 bytes: length after inflating, or 0 if the body is stored as-is
//!
//! Bodies shorter than [`MIN_COMPRESS_LENGTH`] are stored uncompressed.

use std::io::{self, Read, Write};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::protocol::{CompressedHeader, MAX_PACKET_SIZE};

/// Smallest frame body worth deflating.
pub const MIN_COMPRESS_LENGTH: usize = 50;

/// Failure while reading or writing compressed frames.
#[derive(Debug)]
pub(crate) enum FrameError {
    /// The socket failed.
    Io(io::Error),
    /// The peer sent a frame that cannot be decoded.
    Corrupt(String),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        FrameError::Io(err)
    }
}

/// Connection-scoped deflate/inflate state plus the compressed sequence.
pub struct Compressor {
    deflater: Compress,
    inflater: Decompress,
    sequence: u8,
    inbound: Vec<u8>,
    inbound_pos: usize,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("sequence", &self.sequence)
            .field("buffered", &(self.inbound.len() - self.inbound_pos))
            .finish_non_exhaustive()
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor {
    pub fn new() -> Self {
        Self {
            deflater: Compress::new(Compression::default(), true),
            inflater: Decompress::new(true),
            sequence: 0,
            inbound: Vec::new(),
            inbound_pos: 0,
        }
    }

    /// Restart compressed sequence numbering for a new command.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Decompressed bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.inbound.len() - self.inbound_pos
    }

    /// Build one frame around `body`, advancing the compressed sequence.
    pub(crate) fn encode_frame(&mut self, body: &[u8]) -> Result<Vec<u8>, FrameError> {
        let (stored, uncompressed_length) = if body.len() < MIN_COMPRESS_LENGTH {
            (body.to_vec(), 0)
        } else {
            (self.deflate(body)?, body.len())
        };
        let header = CompressedHeader {
            compressed_length: frame_len(stored.len())?,
            sequence_id: self.sequence,
            uncompressed_length: frame_len(uncompressed_length)?,
        };
        self.sequence = self.sequence.wrapping_add(1);

        let mut frame = Vec::with_capacity(CompressedHeader::SIZE + stored.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&stored);
        Ok(frame)
    }

    /// Write already-framed packet bytes as one or more compressed frames.
    pub(crate) fn write_frames(
        &mut self,
        stream: &mut dyn Write,
        packets: &[u8],
    ) -> Result<(), FrameError> {
        for chunk in packets.chunks(MAX_PACKET_SIZE) {
            let frame = self.encode_frame(chunk)?;
            stream.write_all(&frame)?;
        }
        stream.flush()?;
        Ok(())
    }

    /// Fill `buf` from the decompressed stream, reading frames as needed.
    pub(crate) fn read_exact(
        &mut self,
        stream: &mut dyn Read,
        buf: &mut [u8],
    ) -> Result<(), FrameError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.buffered() == 0 {
                self.read_frame(stream)?;
                continue;
            }
            let n = (buf.len() - filled).min(self.buffered());
            buf[filled..filled + n]
                .copy_from_slice(&self.inbound[self.inbound_pos..self.inbound_pos + n]);
            self.inbound_pos += n;
            filled += n;
        }
        Ok(())
    }

    fn read_frame(&mut self, stream: &mut dyn Read) -> Result<(), FrameError> {
        let mut header_bytes = [0u8; CompressedHeader::SIZE];
        stream.read_exact(&mut header_bytes)?;
        let header = CompressedHeader::from_bytes(&header_bytes);

        if header.sequence_id != self.sequence {
            return Err(FrameError::Corrupt(format!(
                "Compressed packets out of order: expected sequence {}, got {}",
                self.sequence, header.sequence_id
            )));
        }
        self.sequence = self.sequence.wrapping_add(1);

        let mut body = vec![0u8; header.compressed_length as usize];
        stream.read_exact(&mut body)?;

        self.inbound.clear();
        self.inbound_pos = 0;
        if header.uncompressed_length == 0 {
            self.inbound = body;
        } else {
            self.inbound = self.inflate(&body, header.uncompressed_length as usize)?;
        }
        tracing::trace!(
            sequence = header.sequence_id,
            compressed = header.compressed_length,
            uncompressed = header.uncompressed_length,
            "read compressed frame"
        );
        Ok(())
    }

    fn deflate(&mut self, input: &[u8]) -> Result<Vec<u8>, FrameError> {
        self.deflater.reset();
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        loop {
            let consumed = usize::try_from(self.deflater.total_in())
                .map_err(|_| FrameError::Corrupt("deflate input overflow".to_string()))?;
            let status = self
                .deflater
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Finish)
                .map_err(|e| FrameError::Corrupt(format!("deflate failed: {e}")))?;
            match status {
                Status::StreamEnd => return Ok(out),
                Status::Ok | Status::BufError => out.reserve(out.capacity().max(64)),
            }
        }
    }

    fn inflate(&mut self, input: &[u8], expected: usize) -> Result<Vec<u8>, FrameError> {
        self.inflater.reset(true);
        let mut out = Vec::with_capacity(expected);
        let status = self
            .inflater
            .decompress_vec(input, &mut out, FlushDecompress::Finish)
            .map_err(|e| FrameError::Corrupt(format!("inflate failed: {e}")))?;
        // output is capped at `expected`; an unfinished stream means more was there
        if status != Status::StreamEnd {
            return Err(FrameError::Corrupt(format!(
                "Compressed frame inflates past the declared {expected} bytes"
            )));
        }
        if out.len() != expected {
            return Err(FrameError::Corrupt(format!(
                "Compressed frame inflated to {} bytes, header declared {}",
                out.len(),
                expected
            )));
        }
        Ok(out)
    }
}

fn frame_len(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len)
        .ok()
        .filter(|&l| l as usize <= MAX_PACKET_SIZE)
        .ok_or_else(|| FrameError::Corrupt(format!("frame body of {len} bytes is too large")))
}
