//! Process-wide platform capabilities, resolved once and passed in by
//! value rather than consulted as mutable global state.

use crate::error::SockError;
use crate::handle::SocketHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
  /// Emulating select() over poll() mis-reports readiness on some
  /// platforms; route those through the real select() syscall.
  pub select_over_poll_is_broken: bool,
  /// Whether an IPv6 dual-mode socket can deliver IPv4 packet-arrival
  /// metadata through ancillary data.
  pub supports_dual_mode_ipv4_packet_info: bool,
}

impl Capabilities {
  pub fn detect() -> Self {
    Self {
      select_over_poll_is_broken: cfg!(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "tvos",
        target_os = "watchos"
      )),
      supports_dual_mode_ipv4_packet_info: cfg!(any(
        target_os = "linux",
        target_os = "android"
      )),
    }
  }

  /// Receive-message preflight: a dual-mode socket on a platform that
  /// cannot report IPv4 packet info would silently lose metadata, so
  /// the operation is rejected up front.
  pub(crate) fn check_dual_mode_packet_info(
    &self,
    handle: &SocketHandle,
  ) -> Result<(), SockError> {
    if !self.supports_dual_mode_ipv4_packet_info && handle.dual_mode() {
      return Err(SockError::OperationNotSupported);
    }
    Ok(())
  }
}

impl Default for Capabilities {
  fn default() -> Self {
    Self::detect()
  }
}
