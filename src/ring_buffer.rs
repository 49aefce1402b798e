//! Chunked byte queue backing the raw-socket receive and send paths.
//!
//! [`RingBuffer`] stores bytes in a chain of fixed-size chunks. Writes append
//! to the tail chunk, reads drain the head chunk, and a fully drained head
//! chunk is moved to a recycle pool rather than freed, so sustained traffic
//! reuses the same allocations.
//!
//! The buffer has no knowledge of sockets. Transport code transfers bytes
//! through the head and tail accessors ([`Buf::chunk`],
//! [`RingBuffer::tail_space_mut`]) and moves the cursors afterwards.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Chunk size used by [`RingBuffer::new`].
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Error returned when a read asks for more bytes than are buffered.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("requested {requested} bytes but only {available} are buffered")]
pub struct OutOfRange {
    /// Number of bytes the caller asked for.
    pub requested: usize,
    /// Number of bytes currently buffered.
    pub available: usize,
}

/// FIFO byte queue built from recycled fixed-size chunks.
///
/// `first_index` is the read position inside the head chunk and `last_index`
/// the write position inside the tail chunk. The chain always holds at least
/// one chunk, so the buffered length is
/// `(chunks - 1) * chunk_size + last_index - first_index`.
///
/// # Examples
///
/// ```
/// use wirelink::ring_buffer::RingBuffer;
///
/// let mut buffer = RingBuffer::with_chunk_size(4);
/// buffer.write(b"hello world");
/// assert_eq!(buffer.len(), 11);
/// assert_eq!(buffer.read(5).expect("buffered"), b"hello");
/// assert_eq!(buffer.len(), 6);
/// ```
#[derive(Debug)]
pub struct RingBuffer {
    chunk_size: usize,
    chunks: VecDeque<Box<[u8]>>,
    pool: Vec<Box<[u8]>>,
    first_index: usize,
    last_index: usize,
}

impl Default for RingBuffer {
    fn default() -> Self { Self::new() }
}

impl RingBuffer {
    /// Create a buffer using [`DEFAULT_CHUNK_SIZE`].
    #[must_use]
    pub fn new() -> Self { Self::with_chunk_size(DEFAULT_CHUNK_SIZE) }

    /// Create a buffer whose chunks hold `chunk_size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "ring buffer chunk size must be non-zero");
        let mut buffer = Self {
            chunk_size,
            chunks: VecDeque::with_capacity(2),
            pool: Vec::new(),
            first_index: 0,
            last_index: 0,
        };
        buffer.add_last();
        buffer
    }

    /// Size of each chunk in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> usize { self.chunk_size }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.chunks.len() - 1) * self.chunk_size + self.last_index - self.first_index
    }

    /// Returns `true` when no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Number of chunks currently linked into the chain.
    #[must_use]
    pub fn chunk_count(&self) -> usize { self.chunks.len() }

    /// Number of retired chunks waiting for reuse.
    #[must_use]
    pub fn pooled_chunks(&self) -> usize { self.pool.len() }

    /// Append `data`, growing the chunk chain as needed.
    pub fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let space = self.tail_space_mut();
            let n = space.len().min(data.len());
            space[..n].copy_from_slice(&data[..n]);
            self.commit(n);
            data = &data[n..];
        }
    }

    /// Remove and return exactly `count` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] without consuming anything if fewer than
    /// `count` bytes are buffered.
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>, OutOfRange> {
        self.check(count)?;
        let mut out = Vec::with_capacity(count);
        self.drain_with(count, |segment| out.extend_from_slice(segment));
        Ok(out)
    }

    /// Fill `dst` completely from the front of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] without consuming anything if fewer than
    /// `dst.len()` bytes are buffered.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<(), OutOfRange> {
        self.check(dst.len())?;
        let mut offset = 0;
        self.drain_with(dst.len(), |segment| {
            dst[offset..offset + segment.len()].copy_from_slice(segment);
            offset += segment.len();
        });
        Ok(())
    }

    /// Move `count` bytes from the front of the buffer onto the end of `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] without consuming anything if fewer than
    /// `count` bytes are buffered.
    pub fn read_to(&mut self, count: usize, dst: &mut BytesMut) -> Result<(), OutOfRange> {
        self.check(count)?;
        dst.reserve(count);
        self.drain_with(count, |segment| dst.extend_from_slice(segment));
        Ok(())
    }

    /// Writable remainder of the tail chunk.
    ///
    /// A full tail chunk is followed by a fresh (or recycled) one first, so
    /// the returned slice is never empty. Bytes written into it become
    /// visible after [`commit`](Self::commit).
    pub fn tail_space_mut(&mut self) -> &mut [u8] {
        if self.last_index == self.chunk_size {
            self.add_last();
            self.last_index = 0;
        }
        let tail = self.chunks.len() - 1;
        &mut self.chunks[tail][self.last_index..]
    }

    /// Number of bytes the next [`tail_space_mut`](Self::tail_space_mut)
    /// call will expose.
    #[must_use]
    pub fn tail_remaining(&self) -> usize {
        if self.last_index == self.chunk_size {
            self.chunk_size
        } else {
            self.chunk_size - self.last_index
        }
    }

    /// Mark `count` bytes of the tail space as written.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the space exposed by
    /// [`tail_space_mut`](Self::tail_space_mut).
    pub fn commit(&mut self, count: usize) {
        assert!(
            self.last_index + count <= self.chunk_size,
            "commit past the end of the tail chunk"
        );
        self.last_index += count;
    }

    fn check(&self, count: usize) -> Result<(), OutOfRange> {
        let available = self.len();
        if count > available {
            return Err(OutOfRange {
                requested: count,
                available,
            });
        }
        Ok(())
    }

    /// Hand `count` bytes to `sink` one contiguous segment at a time.
    ///
    /// Callers must have checked that `count <= self.len()`.
    fn drain_with(&mut self, count: usize, mut sink: impl FnMut(&[u8])) {
        let mut remaining = count;
        while remaining > 0 {
            let n = self.head_len().min(remaining);
            let start = self.first_index;
            sink(&self.chunks[0][start..start + n]);
            self.first_index += n;
            remaining -= n;
            if self.first_index == self.chunk_size {
                self.retire_first();
            }
        }
        // Rewind an empty single-chunk chain so the next receive gets the
        // whole chunk.
        if self.chunks.len() == 1 && self.first_index == self.last_index {
            self.first_index = 0;
            self.last_index = 0;
        }
    }

    fn head_len(&self) -> usize {
        let end = if self.chunks.len() == 1 {
            self.last_index
        } else {
            self.chunk_size
        };
        end - self.first_index
    }

    fn add_last(&mut self) {
        let chunk = self
            .pool
            .pop()
            .unwrap_or_else(|| vec![0u8; self.chunk_size].into_boxed_slice());
        self.chunks.push_back(chunk);
    }

    fn retire_first(&mut self) {
        self.first_index = 0;
        if self.chunks.len() == 1 {
            self.last_index = 0;
            return;
        }
        if let Some(chunk) = self.chunks.pop_front() {
            self.pool.push(chunk);
        }
    }
}

impl Buf for RingBuffer {
    fn remaining(&self) -> usize { self.len() }

    fn chunk(&self) -> &[u8] {
        let start = self.first_index;
        &self.chunks[0][start..start + self.head_len()]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.len(),
            "cannot advance past the end of the ring buffer"
        );
        self.drain_with(cnt, |_| {});
    }
}
