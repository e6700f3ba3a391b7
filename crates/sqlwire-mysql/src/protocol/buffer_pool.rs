//! Bounded pool of scratch buffers for packet payloads.
//!
//! Large result sets would otherwise allocate one `Vec` per row packet. The
//! channel takes buffers from the pool for every read and consumers hand them
//! back with [`crate::protocol::PacketChannel::recycle`].

/// Explicit bounded buffer pool.
///
/// At most `max_buffers` buffers are retained. A returned buffer whose
/// capacity grew beyond `max_retained_capacity` (e.g. after a multi-megabyte
/// BLOB row) is shrunk back before it is pooled.
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<Vec<u8>>,
    max_buffers: usize,
    max_retained_capacity: usize,
}

impl BufferPool {
    /// Default number of pooled buffers.
    pub const DEFAULT_MAX_BUFFERS: usize = 8;
    /// Default capacity a pooled buffer may keep (64 KiB).
    pub const DEFAULT_MAX_RETAINED_CAPACITY: usize = 64 * 1024;

    pub fn new(max_buffers: usize, max_retained_capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_buffers),
            max_buffers,
            max_retained_capacity,
        }
    }

    /// Take an empty buffer with at least `min_capacity` bytes of capacity.
    pub fn take(&mut self, min_capacity: usize) -> Vec<u8> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.reserve(min_capacity);
                buf
            }
            None => Vec::with_capacity(min_capacity),
        }
    }

    /// Return a buffer to the pool.
    pub fn give(&mut self, mut buf: Vec<u8>) {
        if self.free.len() >= self.max_buffers {
            return;
        }
        buf.clear();
        if buf.capacity() > self.max_retained_capacity {
            tracing::trace!(
                capacity = buf.capacity(),
                retained = self.max_retained_capacity,
                "shrinking oversized packet buffer"
            );
            buf.shrink_to(self.max_retained_capacity);
        }
        self.free.push(buf);
    }

    /// Number of buffers currently pooled.
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Drop every pooled buffer.
    pub fn clear(&mut self) {
        self.free.clear();
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BUFFERS, Self::DEFAULT_MAX_RETAINED_CAPACITY)
    }
}
