//! Errors reported by the socket facades.

use std::{io, time::Duration};

use crate::stack::StackError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  /// No socket slot or native control block could be allocated.
  #[error("out of socket resources")]
  Exhausted,

  #[error("socket is already bound")]
  AlreadyBound,

  #[error("socket is not open")]
  NotOpen,

  #[error("no datagram payload to send")]
  NothingToSend,

  #[error("connect timed out after {0:?}")]
  TimedOut(Duration),

  /// The connection went to closing before the handshake completed.
  #[error("connection refused")]
  Refused(#[source] Option<StackError>),

  /// Hard transport error in the middle of a write. `written` bytes were
  /// accepted by the stack before it.
  #[error("write aborted after {written} bytes")]
  Write {
    written: usize,
    #[source]
    source: StackError,
  },

  #[error("could not resolve {0:?}")]
  Resolve(String),

  #[error(transparent)]
  Stack(#[from] StackError),
}

impl Error {
  pub fn kind(&self) -> io::ErrorKind {
    match self {
      Self::Exhausted => io::ErrorKind::OutOfMemory,
      Self::AlreadyBound => io::ErrorKind::AddrInUse,
      Self::NotOpen => io::ErrorKind::NotConnected,
      Self::NothingToSend => io::ErrorKind::InvalidInput,
      Self::TimedOut(_) => io::ErrorKind::TimedOut,
      Self::Refused(_) => io::ErrorKind::ConnectionRefused,
      Self::Write { source, .. } => source.kind(),
      Self::Resolve(_) => io::ErrorKind::NotFound,
      Self::Stack(err) => err.kind(),
    }
  }
}

impl From<Error> for io::Error {
  fn from(value: Error) -> Self {
    io::Error::new(value.kind(), value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_io_error_kinds() {
    let err: io::Error = Error::TimedOut(Duration::from_millis(5)).into();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);

    let err: io::Error =
      Error::Write { written: 3, source: StackError::Reset }.into();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

    let err: io::Error = Error::from(StackError::InUse).into();
    assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
  }

  #[test]
  fn test_write_error_reports_progress() {
    let err = Error::Write { written: 1024, source: StackError::Aborted };
    assert_eq!(err.to_string(), "write aborted after 1024 bytes");
    let source = std::error::Error::source(&err).map(|s| s.to_string());
    assert_eq!(source.as_deref(), Some("connection aborted"));
  }
}
