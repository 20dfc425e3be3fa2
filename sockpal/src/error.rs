//! Portable completion results and the errno translator.
//!
//! Raw OS error codes never cross the crate boundary: every attempt
//! function funnels its errno through [`SockError::from_errno`] before
//! returning.

use std::{error, fmt, io};

/// Portable socket error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockError {
  /// The operation would have blocked. Retryable, not a failure.
  WouldBlock,
  /// The handle was disposed by its owner while the call was in flight.
  OperationAborted,
  /// A blocking-mode deadline elapsed before the operation completed.
  TimedOut,
  Interrupted,
  AccessDenied,
  AddressAlreadyInUse,
  AddressNotAvailable,
  AddressFamilyNotSupported,
  AlreadyInProgress,
  ConnectionAborted,
  ConnectionRefused,
  ConnectionReset,
  DestinationAddressRequired,
  Fault,
  HostDown,
  HostNotFound,
  HostUnreachable,
  InProgress,
  InvalidArgument,
  IsConnected,
  MessageSize,
  NetworkDown,
  NetworkReset,
  NetworkUnreachable,
  NoBufferSpaceAvailable,
  NoData,
  NotConnected,
  NotSocket,
  OperationNotSupported,
  ProtocolFamilyNotSupported,
  ProtocolNotSupported,
  ProtocolOption,
  ProtocolType,
  Shutdown,
  SocketNotSupported,
  TooManyOpenSockets,
  /// Generic fallback for error values no specific kind exists for.
  Uncategorized,
}

impl SockError {
  /// Maps a raw errno value onto a portable kind.
  ///
  /// Total over every errno the wrapped syscalls can produce. Values
  /// outside that set trip a `debug_assert` in development builds and
  /// degrade to [`SockError::Uncategorized`] otherwise.
  pub fn from_errno(errno: i32) -> Self {
    match errno {
      // EWOULDBLOCK aliases EAGAIN on every supported platform.
      libc::EAGAIN => Self::WouldBlock,
      libc::EBADF | libc::ECANCELED => Self::OperationAborted,
      libc::ETIMEDOUT => Self::TimedOut,
      libc::EINTR => Self::Interrupted,
      libc::EACCES | libc::EPERM => Self::AccessDenied,
      libc::EADDRINUSE => Self::AddressAlreadyInUse,
      libc::EADDRNOTAVAIL | libc::ENOENT => Self::AddressNotAvailable,
      libc::EAFNOSUPPORT => Self::AddressFamilyNotSupported,
      libc::EALREADY => Self::AlreadyInProgress,
      libc::ECONNABORTED => Self::ConnectionAborted,
      libc::ECONNREFUSED => Self::ConnectionRefused,
      libc::ECONNRESET => Self::ConnectionReset,
      libc::EDESTADDRREQ => Self::DestinationAddressRequired,
      libc::EFAULT => Self::Fault,
      libc::EHOSTDOWN => Self::HostDown,
      libc::ENXIO => Self::HostNotFound,
      libc::EHOSTUNREACH => Self::HostUnreachable,
      libc::EINPROGRESS => Self::InProgress,
      libc::EINVAL => Self::InvalidArgument,
      libc::EISCONN => Self::IsConnected,
      libc::EMSGSIZE => Self::MessageSize,
      libc::ENETDOWN => Self::NetworkDown,
      libc::ENETRESET => Self::NetworkReset,
      libc::ENETUNREACH => Self::NetworkUnreachable,
      libc::ENOBUFS => Self::NoBufferSpaceAvailable,
      #[cfg(not(any(target_os = "freebsd", target_os = "openbsd")))]
      libc::ENODATA => Self::NoData,
      libc::ENOPROTOOPT => Self::ProtocolOption,
      libc::ENOTCONN => Self::NotConnected,
      libc::ENOTSOCK => Self::NotSocket,
      libc::EOPNOTSUPP => Self::OperationNotSupported,
      // Distinct from EOPNOTSUPP on the BSD family.
      #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "tvos",
        target_os = "watchos",
        target_os = "freebsd",
        target_os = "netbsd"
      ))]
      libc::ENOTSUP => Self::OperationNotSupported,
      libc::EPIPE => Self::Shutdown,
      libc::EPFNOSUPPORT => Self::ProtocolFamilyNotSupported,
      libc::EPROTONOSUPPORT => Self::ProtocolNotSupported,
      libc::EPROTOTYPE => Self::ProtocolType,
      libc::ESOCKTNOSUPPORT => Self::SocketNotSupported,
      libc::EMFILE | libc::ENFILE => Self::TooManyOpenSockets,
      other => {
        debug_assert!(false, "unmapped errno: {other}");
        Self::Uncategorized
      }
    }
  }

  /// Translates an `io::Error` produced at the `syscall!` seam.
  pub fn from_io(err: &io::Error) -> Self {
    match err.raw_os_error() {
      Some(errno) => Self::from_errno(errno),
      None => Self::Uncategorized,
    }
  }
}

impl fmt::Display for SockError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

impl error::Error for SockError {}

/// Result of a one-shot non-blocking attempt.
///
/// `WouldBlock` is distinguishable from every terminal failure: it means
/// the attempt made no observable progress and may be retried once the
/// descriptor signals readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
  Completed(T),
  WouldBlock,
  Failed(SockError),
}

impl<T> Outcome<T> {
  pub fn is_would_block(&self) -> bool {
    matches!(self, Self::WouldBlock)
  }

  pub fn is_completed(&self) -> bool {
    matches!(self, Self::Completed(_))
  }
}

/// Result of a send attempt with caller-owned resumable progress.
///
/// EAGAIN after at least one successful partial send reports `Pending`
/// (success-so-far) while EAGAIN on the very first attempt reports
/// `WouldBlock`. The asymmetry is deliberate: a caller that has already
/// handed bytes to the kernel must not be told nothing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
  /// Everything was sent, or the kernel reported a terminal zero-byte
  /// transfer (socket-closed equivalent).
  Complete,
  /// Partial progress was made before the kernel pushed back; resume
  /// from the updated position once the descriptor is writable.
  Pending,
  /// The very first attempt would have blocked; no state was mutated.
  WouldBlock,
  Failed(SockError),
}

impl SendStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Complete | Self::Failed(_))
  }
}

pub(crate) fn is_again(err: &io::Error) -> bool {
  matches!(
    err.raw_os_error(),
    Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn maps_retry_and_abort_kinds() {
    assert_eq!(SockError::from_errno(libc::EAGAIN), SockError::WouldBlock);
    assert_eq!(
      SockError::from_errno(libc::EWOULDBLOCK),
      SockError::WouldBlock
    );
    assert_eq!(
      SockError::from_errno(libc::EBADF),
      SockError::OperationAborted
    );
    assert_eq!(
      SockError::from_errno(libc::ECANCELED),
      SockError::OperationAborted
    );
  }

  #[test]
  fn maps_connection_kinds() {
    assert_eq!(
      SockError::from_errno(libc::ECONNREFUSED),
      SockError::ConnectionRefused
    );
    assert_eq!(
      SockError::from_errno(libc::ECONNRESET),
      SockError::ConnectionReset
    );
    assert_eq!(
      SockError::from_errno(libc::ECONNABORTED),
      SockError::ConnectionAborted
    );
    assert_eq!(
      SockError::from_errno(libc::EINPROGRESS),
      SockError::InProgress
    );
    assert_eq!(SockError::from_errno(libc::EPIPE), SockError::Shutdown);
  }

  #[test]
  fn maps_shared_value_pairs() {
    assert_eq!(SockError::from_errno(libc::EPERM), SockError::AccessDenied);
    assert_eq!(
      SockError::from_errno(libc::ENFILE),
      SockError::TooManyOpenSockets
    );
    assert_eq!(
      SockError::from_errno(libc::ENOENT),
      SockError::AddressNotAvailable
    );
  }

  #[test]
  fn from_io_round_trips_raw_errno() {
    let err = io::Error::from_raw_os_error(libc::ENOTCONN);
    assert_eq!(SockError::from_io(&err), SockError::NotConnected);
  }

  #[test]
  fn would_block_is_not_terminal() {
    assert!(Outcome::<()>::WouldBlock.is_would_block());
    assert!(!Outcome::Failed::<()>(SockError::TimedOut).is_would_block());
    assert!(!SendStatus::WouldBlock.is_terminal());
    assert!(!SendStatus::Pending.is_terminal());
    assert!(SendStatus::Failed(SockError::TimedOut).is_terminal());
  }
}
