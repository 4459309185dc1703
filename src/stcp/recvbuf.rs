//! The server-side receive buffer.

/// A contiguous byte buffer of fixed capacity. Appends that would overflow
/// are dropped whole; consumes copy out the front and shift the remainder.
pub(crate) struct RecvBuffer {
    bytes: Vec<u8>,
    cap: usize,
}

impl RecvBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Appends `data` if it fits; returns `false` (and appends nothing)
    /// otherwise.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if self.bytes.len() + data.len() > self.cap {
            return false;
        }
        self.bytes.extend_from_slice(data);
        true
    }

    /// Copies `out.len()` bytes from the front into `out`. The caller must
    /// have checked that enough bytes are buffered.
    pub fn consume_into(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&self.bytes[..out.len()]);
        self.bytes.drain(..out.len());
    }
}
