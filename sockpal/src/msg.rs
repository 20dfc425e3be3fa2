//! Ancillary control-message decoding for `recvmsg`-based receives.
//!
//! Only IPv4/IPv6 packet-arrival metadata is understood; any other
//! family yields zeroed metadata.

use std::mem;
use std::net::IpAddr;

/// Packet-arrival metadata decoded from ancillary data: the destination
/// address the packet was delivered to and the interface it arrived on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
  pub address: Option<IpAddr>,
  pub interface_index: i32,
}

/// Fits the control space for both families at once; sized generously
/// against `CMSG_SPACE(in_pktinfo) + CMSG_SPACE(in6_pktinfo)`.
pub(crate) const MAX_CONTROL_LEN: usize = 128;

/// Control buffer aligned for `cmsghdr` access.
#[repr(align(8))]
pub(crate) struct ControlBuffer(pub [u8; MAX_CONTROL_LEN]);

impl ControlBuffer {
  pub(crate) fn new() -> Self {
    Self([0; MAX_CONTROL_LEN])
  }

  pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::c_void {
    self.0.as_mut_ptr().cast()
  }
}

/// Control-buffer size for the requested address families.
#[cfg(any(
  target_os = "linux",
  target_os = "android",
  target_os = "macos",
  target_os = "ios",
  target_os = "tvos",
  target_os = "watchos"
))]
pub(crate) fn control_buffer_len(ipv4: bool, ipv6: bool) -> usize {
  let mut len = 0usize;
  if ipv4 {
    len += unsafe {
      libc::CMSG_SPACE(mem::size_of::<libc::in_pktinfo>() as _) as usize
    };
  }
  if ipv6 {
    len += unsafe {
      libc::CMSG_SPACE(mem::size_of::<libc::in6_pktinfo>() as _) as usize
    };
  }
  debug_assert!(len <= MAX_CONTROL_LEN);
  len
}

#[cfg(not(any(
  target_os = "linux",
  target_os = "android",
  target_os = "macos",
  target_os = "ios",
  target_os = "tvos",
  target_os = "watchos"
)))]
pub(crate) fn control_buffer_len(_ipv4: bool, _ipv6: bool) -> usize {
  0
}

/// Walks the control messages of a completed `recvmsg` and extracts
/// packet-arrival metadata.
///
/// # Safety
///
/// `msg` must describe a message header whose `msg_control` region is
/// still alive and was filled by the kernel.
#[cfg(any(
  target_os = "linux",
  target_os = "android",
  target_os = "macos",
  target_os = "ios",
  target_os = "tvos",
  target_os = "watchos"
))]
pub(crate) unsafe fn decode_packet_info(
  msg: &libc::msghdr,
  ipv4: bool,
  ipv6: bool,
) -> PacketInfo {
  use std::net::{Ipv4Addr, Ipv6Addr};
  use std::ptr;

  if !ipv4 && !ipv6 {
    return PacketInfo::default();
  }

  let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
  while !cmsg.is_null() {
    let hdr = unsafe { &*cmsg };
    let data = unsafe { libc::CMSG_DATA(cmsg) };

    if ipv4
      && hdr.cmsg_level == libc::IPPROTO_IP
      && hdr.cmsg_type == libc::IP_PKTINFO
    {
      // SAFETY: the kernel wrote an in_pktinfo payload for this type.
      let info = unsafe {
        ptr::read_unaligned(data as *const libc::in_pktinfo)
      };
      return PacketInfo {
        address: Some(IpAddr::V4(Ipv4Addr::from(info.ipi_addr.s_addr.to_be()))),
        interface_index: info.ipi_ifindex as i32,
      };
    }

    if ipv6
      && hdr.cmsg_level == libc::IPPROTO_IPV6
      && hdr.cmsg_type == libc::IPV6_PKTINFO
    {
      // SAFETY: the kernel wrote an in6_pktinfo payload for this type.
      let info = unsafe {
        ptr::read_unaligned(data as *const libc::in6_pktinfo)
      };
      return PacketInfo {
        address: Some(IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr))),
        interface_index: info.ipi6_ifindex as i32,
      };
    }

    cmsg = unsafe { libc::CMSG_NXTHDR(msg, cmsg) };
  }

  PacketInfo::default()
}

#[cfg(not(any(
  target_os = "linux",
  target_os = "android",
  target_os = "macos",
  target_os = "ios",
  target_os = "tvos",
  target_os = "watchos"
)))]
pub(crate) unsafe fn decode_packet_info(
  _msg: &libc::msghdr,
  _ipv4: bool,
  _ipv6: bool,
) -> PacketInfo {
  PacketInfo::default()
}
