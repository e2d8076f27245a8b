//! Buffers between the native stack and socket callers.
//!
//! [`RecvBuf`] is the receive-side bridge: the stack hands over whole chunks
//! (as [`Bytes`]) while a pump is running, and the caller later consumes them
//! as one sequential byte stream. Ownership of a chunk moves into the bridge on
//! [`push`](RecvBuf::push) and the chunk is released as soon as its last byte
//! is consumed.
//!
//! [`PacketBuf`] is the send-side accumulator used by datagram sockets: bytes
//! are appended across several writes and handed to the stack as a single
//! payload.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

/// FIFO of received chunks exposed as sequential bytes.
///
/// `len()` always equals the sum of unconsumed bytes across chunks.
#[derive(Debug, Default)]
pub struct RecvBuf {
  chunks: VecDeque<Bytes>,
  len: usize,
}

impl RecvBuf {
  pub fn new() -> Self {
    Self::default()
  }

  /// Takes ownership of a chunk delivered by the stack.
  pub fn push(&mut self, chunk: Bytes) {
    if chunk.is_empty() {
      return;
    }
    self.len += chunk.len();
    self.chunks.push_back(chunk);
  }

  /// Number of unconsumed bytes.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Copies up to `dst.len()` bytes out of the bridge, releasing every chunk
  /// that becomes fully consumed. Returns the number of bytes copied.
  pub fn consume(&mut self, dst: &mut [u8]) -> usize {
    let mut copied = 0;

    while copied < dst.len() {
      let Some(front) = self.chunks.front_mut() else {
        break;
      };

      let n = front.len().min(dst.len() - copied);
      dst[copied..copied + n].copy_from_slice(&front[..n]);
      front.advance(n);
      copied += n;

      if front.is_empty() {
        self.chunks.pop_front();
      }
    }

    self.len -= copied;
    copied
  }

  pub fn consume_byte(&mut self) -> Option<u8> {
    let mut byte = [0u8; 1];
    (self.consume(&mut byte) == 1).then_some(byte[0])
  }

  /// Returns the byte at `offset` from the read position without consuming it.
  pub fn peek(&self, mut offset: usize) -> Option<u8> {
    for chunk in &self.chunks {
      if offset < chunk.len() {
        return Some(chunk[offset]);
      }
      offset -= chunk.len();
    }
    None
  }

  pub fn clear(&mut self) {
    self.chunks.clear();
    self.len = 0;
  }
}

/// Outgoing datagram accumulator.
#[derive(Debug)]
pub struct PacketBuf {
  data: Vec<u8>,
  limit: usize,
}

impl PacketBuf {
  /// Creates an empty accumulator that refuses to grow past `limit` bytes.
  pub fn with_limit(limit: usize) -> Self {
    Self { data: Vec::new(), limit }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Appends `bytes`. Returns `false`, leaving the accumulator untouched, if
  /// the limit would be exceeded or the allocation fails.
  pub fn append(&mut self, bytes: &[u8]) -> bool {
    let Some(new_len) = self.data.len().checked_add(bytes.len()) else {
      return false;
    };
    if new_len > self.limit || self.data.try_reserve(bytes.len()).is_err() {
      return false;
    }
    self.data.extend_from_slice(bytes);
    true
  }

  /// Hands the accumulated payload out, leaving the accumulator empty.
  pub fn take(&mut self) -> Option<Bytes> {
    if self.data.is_empty() {
      return None;
    }
    Some(Bytes::from(std::mem::take(&mut self.data)))
  }

  /// Releases the accumulated payload without sending it.
  pub fn clear(&mut self) {
    #[cfg(feature = "zeroize")]
    zeroize::Zeroize::zeroize(&mut self.data);
    self.data.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bridge(chunks: &[&'static [u8]]) -> RecvBuf {
    let mut buf = RecvBuf::new();
    for chunk in chunks {
      buf.push(Bytes::from_static(chunk));
    }
    buf
  }

  #[test]
  fn test_consume_spans_chunks() {
    let mut buf = bridge(&[b"hel", b"lo ", b"world"]);
    assert_eq!(buf.len(), 11);

    let mut out = [0u8; 7];
    assert_eq!(buf.consume(&mut out), 7);
    assert_eq!(&out, b"hello w");
    assert_eq!(buf.len(), 4);
    assert_eq!(buf.chunks.len(), 1, "fully consumed chunks are released");

    let mut rest = [0u8; 16];
    assert_eq!(buf.consume(&mut rest), 4);
    assert_eq!(&rest[..4], b"orld");
    assert!(buf.is_empty());
    assert!(buf.chunks.is_empty());
  }

  #[test]
  fn test_consume_from_empty() {
    let mut buf = RecvBuf::new();
    let mut out = [0u8; 4];
    assert_eq!(buf.consume(&mut out), 0);
    assert_eq!(buf.consume_byte(), None);
  }

  #[test]
  fn test_empty_chunks_are_ignored() {
    let mut buf = bridge(&[b"", b"a", b""]);
    assert_eq!(buf.len(), 1);
    assert_eq!(buf.chunks.len(), 1);
    assert_eq!(buf.consume_byte(), Some(b'a'));
  }

  #[test]
  fn test_peek_at_offset_does_not_consume() {
    let buf = bridge(&[b"ab", b"cd"]);
    assert_eq!(buf.peek(0), Some(b'a'));
    assert_eq!(buf.peek(2), Some(b'c'));
    assert_eq!(buf.peek(3), Some(b'd'));
    assert_eq!(buf.peek(4), None);
    assert_eq!(buf.len(), 4);
  }

  #[test]
  fn test_peek_matches_next_read() {
    let mut buf = bridge(&[b"x", b"yz"]);
    while let Some(peeked) = buf.peek(0) {
      assert_eq!(buf.consume_byte(), Some(peeked));
    }
    assert!(buf.is_empty());
  }

  #[test]
  fn test_packet_buf_limit() {
    let mut out = PacketBuf::with_limit(4);
    assert!(out.append(b"abc"));
    assert!(!out.append(b"de"), "would exceed limit");
    assert_eq!(out.len(), 3);
    assert!(out.append(b"d"));
    assert_eq!(out.take().as_deref(), Some(&b"abcd"[..]));
    assert!(out.is_empty());
    assert!(out.take().is_none());
  }

  #[test]
  fn test_packet_buf_clear() {
    let mut out = PacketBuf::with_limit(16);
    out.append(b"secret");
    out.clear();
    assert!(out.is_empty());
  }
}
