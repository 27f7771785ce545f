//! Append-only output buffer with a flushed-region mark.
//!
//! Encoded commands are appended at the write cursor. The region before the
//! mark has been accepted by the transport; [`GrowableBuffer::flush_slice`]
//! is exactly what still has to go out. A socket that takes only part of the
//! slice advances the mark by what it took, so the rest is retried
//! byte-for-byte.

/// Default initial capacity (16 KB).
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Arguments shorter than this are copied byte by byte.
pub const SMALL_COPY_THRESHOLD: usize = 16;

#[derive(Debug)]
pub struct GrowableBuffer {
    data: Vec<u8>,
    /// Write cursor.
    pos: usize,
    /// End of the flushed region.
    mark: usize,
}

impl Default for GrowableBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl GrowableBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.max(1)],
            pos: 0,
            mark: 0,
        }
    }

    /// Guarantee `n` writable bytes and return the offset they start at.
    ///
    /// Doubles the allocation until it fits, keeping written bytes.
    pub fn reserve(&mut self, n: usize) -> usize {
        let needed = self.pos + n;
        if needed > self.data.len() {
            let mut cap = self.data.len();
            while cap < needed {
                cap *= 2;
            }
            self.data.resize(cap, 0);
        }
        self.pos
    }

    /// Append bytes at the cursor.
    #[inline]
    pub fn put(&mut self, src: &[u8]) {
        let off = self.reserve(src.len());
        let dst = &mut self.data[off..off + src.len()];
        if src.len() < SMALL_COPY_THRESHOLD {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = *s;
            }
        } else {
            dst.copy_from_slice(src);
        }
        self.pos += src.len();
    }

    #[inline]
    pub fn put_u8(&mut self, b: u8) {
        let off = self.reserve(1);
        self.data[off] = b;
        self.pos += 1;
    }

    /// Drop everything written after `pos`. Used to roll back a partial encode.
    pub fn truncate(&mut self, pos: usize) {
        if pos >= self.mark && pos < self.pos {
            self.pos = pos;
        }
    }

    /// Current write cursor.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Mark everything written so far as flushed.
    pub fn mark(&mut self) {
        self.mark = self.pos;
        self.reset_if_drained();
    }

    /// Advance the mark by `n` bytes the transport accepted.
    pub fn acknowledge(&mut self, n: usize) {
        self.mark = (self.mark + n).min(self.pos);
        self.reset_if_drained();
    }

    /// Bytes written but not yet flushed.
    pub fn flush_slice(&self) -> &[u8] {
        &self.data[self.mark..self.pos]
    }

    pub fn has_unflushed(&self) -> bool {
        self.pos > self.mark
    }

    /// Zero both positions; the allocation is kept.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.mark = 0;
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn reset_if_drained(&mut self) {
        if self.mark == self.pos {
            self.reset();
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
