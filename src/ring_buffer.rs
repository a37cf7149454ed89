//! Per-connection circular receive buffer and frame extraction.
//!
//! Each connection slot owns one [`RingFramer`]. Incoming bytes are written
//! into the contiguous free region returned by [`RingFramer::free_region`]
//! (wrap-aware, so a single OS read never has to be split across two
//! `write` calls into the buffer), and [`RingFramer::take_frame`] repeatedly
//! extracts whole frames once enough bytes have accumulated. The buffer
//! tracks fullness and emptiness via an explicit length counter rather than
//! comparing head and tail positions, so the two states are never
//! conflated.

#![expect(clippy::big_endian_bytes, reason = "wire protocol is big-endian")]

use crate::error::FramerError;
use crate::frame::MAX_FRAME_LEN;

/// Default per-slot receive buffer size.
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Minimum number of buffered bytes before a length prefix can be read.
const LEN_PREFIX_WIDTH: usize = 4;

/// Fixed-capacity circular byte buffer that yields whole frames.
#[derive(Debug)]
pub struct RingFramer {
    buf: Vec<u8>,
    capacity: usize,
    start: usize,
    len: usize,
}

impl RingFramer {
    /// Create a framer with the default 16 KiB capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a framer with an explicit capacity, primarily for tests.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            start: 0,
            len: 0,
        }
    }

    /// Number of bytes currently buffered and not yet extracted as a frame.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer currently holds no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn tail(&self) -> usize {
        (self.start + self.len) % self.capacity
    }

    /// The contiguous free region immediately after the tail, sized to
    /// either the wrap point or `start`, whichever comes first. Returns an
    /// empty slice when the buffer is full; callers must treat a zero-length
    /// read into this slice as a no-op, not an error.
    pub fn free_region(&mut self) -> &mut [u8] {
        let free_total = self.capacity - self.len;
        if free_total == 0 {
            return &mut [];
        }
        let tail = self.tail();
        let contiguous = if tail >= self.start {
            self.capacity - tail
        } else {
            self.start - tail
        };
        let take = contiguous.min(free_total);
        #[expect(
            clippy::indexing_slicing,
            reason = "tail and take are derived from capacity and len above"
        )]
        &mut self.buf[tail..tail + take]
    }

    /// Record that `n` bytes were written into the slice most recently
    /// returned by [`Self::free_region`].
    ///
    /// # Panics
    /// Panics if `n` exceeds the remaining free capacity; callers must only
    /// commit what they actually wrote into the returned region.
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.capacity - self.len, "commit exceeds free capacity");
        self.len += n;
    }

    fn byte_at(&self, offset: usize) -> u8 {
        let idx = (self.start + offset) % self.capacity;
        #[expect(clippy::indexing_slicing, reason = "idx is reduced modulo capacity")]
        self.buf[idx]
    }

    fn read_u32_at(&self, offset: usize) -> u32 {
        u32::from_be_bytes([
            self.byte_at(offset),
            self.byte_at(offset + 1),
            self.byte_at(offset + 2),
            self.byte_at(offset + 3),
        ])
    }

    fn copy_out(&self, count: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.byte_at(i));
        }
        out
    }

    fn advance(&mut self, count: usize) {
        self.start = (self.start + count) % self.capacity;
        self.len -= count;
    }

    /// Attempt to extract one complete frame.
    ///
    /// Returns `Ok(None)` when fewer than four bytes, or fewer than
    /// `frame_len` bytes, are currently buffered: the caller should read more
    /// from the socket and try again. Returns
    /// [`FramerError::PacketInvalid`] if the declared frame length is zero
    /// or exceeds [`MAX_FRAME_LEN`]; the caller must close the connection in
    /// that case.
    ///
    /// # Errors
    /// See above.
    pub fn take_frame(&mut self) -> Result<Option<Vec<u8>>, FramerError> {
        if self.len < LEN_PREFIX_WIDTH {
            return Ok(None);
        }
        let frame_len = self.read_u32_at(0);
        if frame_len == 0 {
            return Err(FramerError::PacketInvalid);
        }
        let frame_len = match usize::try_from(frame_len) {
            Ok(n) if n <= MAX_FRAME_LEN => n,
            _ => return Err(FramerError::PacketInvalid),
        };
        if self.len < frame_len {
            return Ok(None);
        }
        let frame = self.copy_out(frame_len);
        self.advance(frame_len);
        Ok(Some(frame))
    }
}

impl Default for RingFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(framer: &mut RingFramer, data: &[u8]) {
        let mut remaining = data;
        while !remaining.is_empty() {
            let region = framer.free_region();
            assert!(!region.is_empty(), "test data must fit in the buffer");
            let n = remaining.len().min(region.len());
            let (head, tail) = remaining.split_at(n);
            let (dest, _) = region.split_at_mut(n);
            dest.copy_from_slice(head);
            framer.commit(n);
            remaining = tail;
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        #[expect(
            clippy::cast_possible_truncation,
            reason = "test payloads are small"
        )]
        let total_len = (4 + payload.len()) as u32;
        buf.extend_from_slice(&total_len.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn buffers_a_short_prefix_instead_of_emitting() {
        let mut framer = RingFramer::with_capacity(64);
        let full = frame(b"hello");
        #[expect(clippy::indexing_slicing, reason = "test slice within bounds")]
        push(&mut framer, &full[..full.len() - 1]);
        assert_eq!(framer.take_frame().expect("not invalid"), None);
    }

    #[test]
    fn emits_two_concatenated_frames_in_order_under_arbitrary_chunking() {
        let a = frame(b"one");
        let b = frame(b"two");
        let mut combined = a.clone();
        combined.extend_from_slice(&b);
        for split in 0..combined.len() {
            let mut framer = RingFramer::with_capacity(128);
            #[expect(clippy::indexing_slicing, reason = "split is within combined.len()")]
            push(&mut framer, &combined[..split]);
            #[expect(clippy::indexing_slicing, reason = "split is within combined.len()")]
            push(&mut framer, &combined[split..]);
            let first = framer.take_frame().expect("not invalid");
            let second = framer.take_frame().expect("not invalid");
            let third = framer.take_frame().expect("not invalid");
            assert_eq!(first, Some(a.clone()));
            assert_eq!(second, Some(b.clone()));
            assert_eq!(third, None);
        }
    }

    #[test]
    fn rejects_a_packet_length_over_the_maximum() {
        let mut framer = RingFramer::with_capacity(64);
        let mut bogus = Vec::new();
        #[expect(
            clippy::cast_possible_truncation,
            reason = "MAX_FRAME_LEN fits comfortably in u32"
        )]
        let over_max = MAX_FRAME_LEN as u32 + 1;
        bogus.extend_from_slice(&over_max.to_be_bytes());
        push(&mut framer, &bogus);
        assert!(matches!(framer.take_frame(), Err(FramerError::PacketInvalid)));
    }

    #[test]
    fn wraps_around_the_buffer_correctly() {
        let mut framer = RingFramer::with_capacity(16);
        push(&mut framer, &frame(b"ab"));
        assert!(framer.take_frame().expect("not invalid").is_some());
        push(&mut framer, &frame(b"cd"));
        let second = framer.take_frame().expect("not invalid");
        assert_eq!(second, Some(frame(b"cd")));
    }
}
