//! Receive-side byte accumulation.
//!
//! A session reads arbitrarily chunked bytes off the socket into the spare
//! region of a [`ReceiveBuffer`], then lets its codec scan the buffered
//! region for complete frames and consumes whatever the scan used. The
//! buffered bytes always occupy `[0, buffered)` of the backing storage.

use crate::{AppError, AppResult};

#[derive(Debug)]
pub struct ReceiveBuffer {
    storage: Vec<u8>,
    buffered: usize,
}

impl ReceiveBuffer {
    pub fn new(initial_capacity: usize) -> ReceiveBuffer {
        ReceiveBuffer {
            storage: vec![0; initial_capacity.max(1)],
            buffered: 0,
        }
    }

    /// Number of bytes accumulated and not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffered
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Unused trailing space available for the next read.
    pub fn remaining(&self) -> usize {
        self.storage.len() - self.buffered
    }

    /// Doubles the backing storage when no spare room remains for the next
    /// read. Amortized O(1); a no-op while spare space exists.
    pub fn ensure_capacity(&mut self) {
        if self.remaining() == 0 {
            self.storage.resize(self.storage.len() * 2, 0);
        }
    }

    /// The spare trailing region. The caller writes freshly read bytes here
    /// and then records them with [`accumulate`](Self::accumulate).
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let buffered = self.buffered;
        &mut self.storage[buffered..]
    }

    /// Records `n` bytes already written into the spare region as buffered.
    pub fn accumulate(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.buffered += n;
    }

    /// The buffered region `[0, buffered)`.
    pub fn buffered(&self) -> &[u8] {
        &self.storage[..self.buffered]
    }

    /// Removes `n` bytes from the front of the buffered region by shifting
    /// the remainder left. `n == 0` is a no-op; `n` beyond the buffered
    /// length is a contract violation.
    pub fn consume(&mut self, n: usize) -> AppResult<()> {
        if n == 0 {
            return Ok(());
        }
        if n > self.buffered {
            return Err(AppError::InvalidConsume {
                requested: n,
                buffered: self.buffered,
            });
        }
        self.storage.copy_within(n..self.buffered, 0);
        self.buffered -= n;
        Ok(())
    }
}
