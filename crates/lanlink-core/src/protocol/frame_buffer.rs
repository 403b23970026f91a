//! Bounded receive buffer that reassembles frames from a byte stream.
//!
//! # Why a frame buffer? (for beginners)
//!
//! TCP delivers a stream of bytes, not a sequence of messages.  A single
//! `recv` may return half a frame, exactly one frame, or several frames glued
//! together.  The frame buffer accumulates bytes at a *write cursor* and hands
//! out whole frames from a *read cursor* once the header-declared size is
//! fully present:
//!
//! ```text
//!  0          read              write            capacity
//!  |  consumed  |  unread bytes   |   spare space   |
//! ```
//!
//! After a batch of frames has been drained, [`FrameBuffer::compact`] moves
//! the unread tail to the front so the spare space is contiguous again.

use crate::protocol::codec::{PacketHeader, ProtocolError};
use crate::protocol::messages::{BUFFER_CAPACITY, HEADER_SIZE};

/// Fixed-capacity receive buffer with explicit read and write cursors.
///
/// Every access is bounds-checked against the cursors; the buffer never
/// grows beyond [`BUFFER_CAPACITY`].
pub struct FrameBuffer {
    bytes: Box<[u8]>,
    read: usize,
    write: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer of [`BUFFER_CAPACITY`] bytes.
    pub fn new() -> Self {
        Self {
            bytes: vec![0u8; BUFFER_CAPACITY].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Number of unread bytes between the read and write cursors.
    pub fn available(&self) -> usize {
        self.write - self.read
    }

    /// Number of bytes that can still be written without compacting.
    pub fn spare(&self) -> usize {
        self.bytes.len() - self.write
    }

    /// Returns the writable region after the write cursor.
    ///
    /// Fill it (for example with a socket read) and then call
    /// [`commit`](Self::commit) with the number of bytes written.
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.write..]
    }

    /// Advances the write cursor by `n` bytes, clamped to the spare space.
    pub fn commit(&mut self, n: usize) {
        self.write += n.min(self.spare());
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.spare());
        self.bytes[self.write..self.write + n].copy_from_slice(&data[..n]);
        self.write += n;
        n
    }

    /// Extracts the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when fewer bytes than the header declares are
    /// present; the caller should read more and try again.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidSize`] when the declared size is below
    /// the header size or above [`BUFFER_CAPACITY`].  The stream cannot be
    /// re-synchronised after that, so the connection must be dropped.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.available() < HEADER_SIZE {
            return Ok(None);
        }
        let header = PacketHeader::parse(&self.bytes[self.read..self.write])?;
        let size = header.validate_size()?;
        if self.available() < size {
            return Ok(None);
        }
        let frame = self.bytes[self.read..self.read + size].to_vec();
        self.read += size;
        Ok(Some(frame))
    }

    /// Moves unread bytes to the front of the buffer.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.bytes.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Discards everything buffered.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}
