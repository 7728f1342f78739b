//! Per-session receive buffer with newline framing.
//!
//! Bytes read from a connection are appended here until one or more complete
//! lines are available. Capacity starts at the configured base size and only
//! ever doubles, so it is always `base * 2^k`.
//!
//! ## Growth
//!
//! Growth goes through `try_reserve_exact`, so an allocation failure surfaces
//! as `BufferError` instead of aborting the process. The event loop treats
//! that as fatal for the owning session only.

use std::collections::TryReserveError;
use std::ops::ControlFlow;
use thiserror::Error;

/// Longest line handed to the protocol processor, terminator included.
/// The rest of an over-long line is dropped.
pub const MAX_LINE_LENGTH: usize = 2048;

/// Error returned when the buffer cannot grow.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer allocation failed: {0}")]
    Alloc(#[from] TryReserveError),
    #[error("buffer capacity overflow")]
    CapacityOverflow,
}

/// Growable byte buffer holding the unprocessed tail of a TCP stream.
#[derive(Debug)]
pub struct LineBuffer {
    /// Valid bytes; `data.len()` is the buffered byte count.
    data: Vec<u8>,
    /// Logical capacity, independent of what the allocator handed back.
    capacity: usize,
}

impl LineBuffer {
    /// Allocate a buffer of `base_size` bytes.
    pub fn with_capacity(base_size: usize) -> Result<Self, BufferError> {
        let mut data = Vec::new();
        data.try_reserve_exact(base_size)?;
        Ok(Self {
            data,
            capacity: base_size,
        })
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append `bytes`, doubling capacity until they fit.
    ///
    /// On error the buffer is left unchanged.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let needed = self
            .data
            .len()
            .checked_add(bytes.len())
            .ok_or(BufferError::CapacityOverflow)?;

        if needed > self.capacity {
            let mut new_capacity = self.capacity.max(1);
            while new_capacity < needed {
                new_capacity = new_capacity
                    .checked_mul(2)
                    .ok_or(BufferError::CapacityOverflow)?;
            }
            self.data
                .try_reserve_exact(new_capacity - self.data.len())?;
            self.capacity = new_capacity;
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Hand every complete line to `f` in arrival order, then shift the
    /// remaining partial line to the front.
    ///
    /// Each line includes its `\n` and is cut to [`MAX_LINE_LENGTH`] bytes.
    /// If `f` breaks, the lines after it stay buffered. Returns the number of
    /// bytes consumed.
    pub fn drain_lines<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let mut pos = 0;

        while let Some(offset) = self.data[pos..].iter().position(|&b| b == b'\n') {
            let end = pos + offset + 1;
            let line = &self.data[pos..end];
            let line = &line[..line.len().min(MAX_LINE_LENGTH)];
            pos = end;

            if f(line).is_break() {
                break;
            }
        }

        if pos > 0 {
            let remaining = self.data.len() - pos;
            self.data.copy_within(pos.., 0);
            self.data.truncate(remaining);
        }
        pos
    }

    /// Free the storage. Only used when the owning session is destroyed.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_lines(buf: &mut LineBuffer) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        buf.drain_lines(|line| {
            lines.push(line.to_vec());
            ControlFlow::Continue(())
        });
        lines
    }

    #[test]
    fn test_line_buffer_basic() {
        let mut buf = LineBuffer::with_capacity(16).unwrap();
        assert_eq!(buf.capacity(), 16);
        assert!(buf.is_empty());

        buf.append(b"hello\n").unwrap();
        assert_eq!(buf.len(), 6);

        let lines = collect_lines(&mut buf);
        assert_eq!(lines, vec![b"hello\n".to_vec()]);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn test_two_lines_one_append() {
        let mut buf = LineBuffer::with_capacity(64).unwrap();
        buf.append(b"first\nsecond\n").unwrap();

        let lines = collect_lines(&mut buf);
        assert_eq!(lines, vec![b"first\n".to_vec(), b"second\n".to_vec()]);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_partial_line_kept() {
        let mut buf = LineBuffer::with_capacity(64).unwrap();
        buf.append(b"one\ntw").unwrap();

        let consumed = buf.drain_lines(|_| ControlFlow::Continue(()));
        assert_eq!(consumed, 4);
        assert_eq!(buf.as_slice(), b"tw");

        buf.append(b"o\n").unwrap();
        assert_eq!(collect_lines(&mut buf), vec![b"two\n".to_vec()]);
    }

    #[test]
    fn test_growth_doubles() {
        let mut buf = LineBuffer::with_capacity(10).unwrap();
        buf.append(&[b'a'; 8]).unwrap();
        assert_eq!(buf.capacity(), 10);

        // 8 + 5 = 13 -> 20
        buf.append(&[b'b'; 5]).unwrap();
        assert_eq!(buf.capacity(), 20);

        // 13 + 60 = 73 -> 40 -> 80
        buf.append(&[b'c'; 60]).unwrap();
        assert_eq!(buf.capacity(), 80);
        assert_eq!(buf.len(), 73);
        assert_eq!(buf.capacity() % 10, 0);
        assert!((buf.capacity() / 10).is_power_of_two());
    }

    #[test]
    fn test_large_line_across_appends() {
        let mut buf = LineBuffer::with_capacity(8).unwrap();
        let payload = vec![b'x'; 100];

        for chunk in payload.chunks(30) {
            buf.append(chunk).unwrap();
            assert!(collect_lines(&mut buf).is_empty());
        }
        buf.append(b"\n").unwrap();

        let lines = collect_lines(&mut buf);
        assert_eq!(lines.len(), 1);
        assert_eq!(&lines[0][..100], &payload[..]);
        assert_eq!(buf.capacity(), 128);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overlong_line_truncated() {
        let mut buf = LineBuffer::with_capacity(64).unwrap();
        let mut line = vec![b'z'; MAX_LINE_LENGTH + 500];
        line.push(b'\n');
        buf.append(&line).unwrap();
        buf.append(b"next\n").unwrap();

        let lines = collect_lines(&mut buf);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH);
        assert!(lines[0].iter().all(|&b| b == b'z'));
        assert_eq!(lines[1], b"next\n".to_vec());
    }

    #[test]
    fn test_break_keeps_remaining_lines() {
        let mut buf = LineBuffer::with_capacity(64).unwrap();
        buf.append(b"a\nb\nc\n").unwrap();

        let consumed = buf.drain_lines(|line| {
            if line == b"b\n" {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(consumed, 4);
        assert_eq!(buf.as_slice(), b"c\n");
    }

    #[test]
    fn test_allocation_failure_reported() {
        // More than isize::MAX bytes can never be reserved
        let result = LineBuffer::with_capacity(usize::MAX);
        assert!(matches!(result, Err(BufferError::Alloc(_))));
    }
}
