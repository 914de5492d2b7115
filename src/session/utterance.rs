//! Utterance accumulation for the current caller turn.

/// Ordered chunks of companded audio for the in-progress utterance,
/// with a byte counter kept in sync for the hard cap check.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    chunks: Vec<Vec<u8>>,
    bytes: usize,
    max_bytes: usize,
}

impl UtteranceBuffer {
    /// Create an empty buffer with the given hard cap in bytes.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: Vec::new(),
            bytes: 0,
            max_bytes,
        }
    }

    /// Append a chunk. Returns `true` when the accumulated bytes have
    /// crossed the cap and the turn must be forced to end.
    pub fn push(&mut self, chunk: Vec<u8>) -> bool {
        self.bytes += chunk.len();
        self.chunks.push(chunk);
        self.bytes > self.max_bytes
    }

    /// Accumulated bytes.
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Whether nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Whether a chunk of `extra` bytes still fits under the cap. Used
    /// for the pending buffer while the pipeline is running, where a
    /// forced turn-end is not possible and the cap must hold strictly.
    pub fn fits(&self, extra: usize) -> bool {
        self.bytes + extra <= self.max_bytes
    }

    /// Concatenate and reset, yielding the assembled utterance.
    pub fn take(&mut self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.bytes);
        for chunk in self.chunks.drain(..) {
            raw.extend_from_slice(&chunk);
        }
        self.bytes = 0;
        raw
    }

    /// Reset and seed with a first chunk (barge-in re-entry, where the
    /// interrupting chunk is the start of the new utterance).
    pub fn reset_with(&mut self, chunk: Vec<u8>) {
        self.chunks.clear();
        self.bytes = chunk.len();
        self.chunks.push(chunk);
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }
}
