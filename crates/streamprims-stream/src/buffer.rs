//! FIFO list of byte chunks with cheap append, prefix peek and consume.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// An ordered list of byte chunks whose logical length is the sum of the
/// chunk lengths.
///
/// Appending and consuming are O(1) amortized per chunk. Peeking a prefix is
/// zero-copy when the prefix lies inside the first chunk.
#[derive(Debug, Default, Clone)]
pub struct ByteList {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ByteList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Append a chunk at the tail. Empty chunks are ignored.
    pub fn push_back(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Insert a chunk at the head. Empty chunks are ignored.
    pub fn push_front(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_front(chunk);
    }

    /// Copy out the first `n` bytes (or everything, if fewer are buffered)
    /// without consuming them.
    pub fn peek(&self, n: usize) -> Bytes {
        let n = n.min(self.len);
        match self.chunks.front() {
            None => Bytes::new(),
            Some(first) if first.len() >= n => first.slice(..n),
            Some(_) => {
                let mut out = BytesMut::with_capacity(n);
                for chunk in &self.chunks {
                    let remaining = n - out.len();
                    if remaining == 0 {
                        break;
                    }
                    out.extend_from_slice(&chunk[..remaining.min(chunk.len())]);
                }
                out.freeze()
            }
        }
    }

    /// Drop the first `n` bytes (or everything, if fewer are buffered).
    pub fn consume(&mut self, n: usize) {
        let mut n = n.min(self.len);
        self.len -= n;
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= n {
                n -= front.len();
                self.chunks.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
    }

    /// Remove and return the first `n` bytes.
    pub fn split_to(&mut self, n: usize) -> Bytes {
        let out = self.peek(n);
        self.consume(out.len());
        out
    }

    /// Remove and return every buffered byte as one contiguous buffer.
    pub fn take_all(&mut self) -> Bytes {
        self.split_to(self.len)
    }

    /// Drop every buffered byte.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}
