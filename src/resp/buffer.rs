//! Growable receive buffer with a read cursor.
//!
//! Bytes before the read cursor have been fully decoded and may be discarded;
//! bytes between the read cursor and the end of the buffer (the write cursor)
//! are pending decode. Consumed space is reclaimed only once the consumed
//! fraction of the capacity reaches `reclaim_ratio`, so the memmove cost is
//! amortised over many replies instead of paid on every read.

use bytes::BytesMut;
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RedpipeError, Result};

/// Minimum free space to have available before each socket read.
pub(crate) const MIN_READ_SPACE: usize = 4096;

pub struct ReceiveBuffer {
    buf: BytesMut,
    /// Start of the undecoded window.
    read: usize,
    /// Cap on pending (undecoded) bytes.
    max_size: usize,
    reclaim_ratio: f32,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize, max_size: usize, reclaim_ratio: f32) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            read: 0,
            max_size,
            reclaim_ratio,
        }
    }

    pub fn read_cursor(&self) -> usize {
        self.read
    }

    pub fn write_cursor(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Bytes received but not yet decoded.
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.read..]
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.read < self.buf.len()
    }

    /// Mark `n` bytes of the unread window as consumed.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.read + n <= self.buf.len());
        self.read += n;
    }

    /// The next unread byte, without consuming it.
    #[inline]
    pub fn peek_byte(&self) -> Option<u8> {
        self.buf.get(self.read).copied()
    }

    /// Length of the next `\r\n`-terminated line (excluding the terminator),
    /// or `None` if the terminator has not arrived yet.
    pub fn line_len(&self) -> Result<Option<usize>> {
        let window = self.unread();
        match memchr(b'\r', window) {
            Some(pos) if pos + 1 < window.len() => {
                if window[pos + 1] == b'\n' {
                    Ok(Some(pos))
                } else {
                    Err(RedpipeError::Protocol("expected \\n after \\r".into()))
                }
            }
            _ => Ok(None),
        }
    }

    /// Append bytes that arrived from the transport.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> Result<()> {
        self.check_pending(data.len())?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Read once from `reader` into the free space, growing it if needed.
    ///
    /// Returns the number of bytes read; `0` means end of stream.
    pub async fn read_from<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<usize> {
        if self.buf.capacity() - self.buf.len() < MIN_READ_SPACE {
            self.check_pending(MIN_READ_SPACE)?;
            let grow = self.buf.capacity().max(MIN_READ_SPACE);
            self.buf.reserve(grow);
        }
        Ok(reader.read_buf(&mut self.buf).await?)
    }

    /// Compact when the consumed fraction reaches the reclaim ratio.
    ///
    /// Returns whether a compaction happened.
    pub fn reclaim_if_needed(&mut self) -> bool {
        let capacity = self.buf.capacity();
        if self.read == 0 || capacity == 0 {
            return false;
        }
        let used_ratio = self.read as f32 / capacity as f32;
        if used_ratio < self.reclaim_ratio {
            return false;
        }
        self.discard_read_bytes();
        true
    }

    /// Move the unread window to the front of the storage.
    pub fn discard_read_bytes(&mut self) {
        if self.read == 0 {
            return;
        }
        let len = self.buf.len();
        self.buf.copy_within(self.read..len, 0);
        self.buf.truncate(len - self.read);
        self.read = 0;
    }

    /// Drop everything, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.read = 0;
    }

    fn check_pending(&self, incoming: usize) -> Result<()> {
        let pending = self.buf.len() - self.read;
        if pending + incoming > self.max_size {
            return Err(RedpipeError::Protocol(format!(
                "RESP message too large: buffer would exceed {} bytes",
                self.max_size
            )));
        }
        Ok(())
    }
}
