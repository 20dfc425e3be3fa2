//! Test utilities for unit and integration tests.
//!
//! Raw descriptor plumbing shared by the test suites. Only available
//! when building tests.

use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::ptr;

/// A raw descriptor closed on drop.
#[doc(hidden)]
pub struct TestFd {
  pub fd: RawFd,
}

impl Drop for TestFd {
  fn drop(&mut self) {
    unsafe { libc::close(self.fd) };
  }
}

/// A connected pair of blocking Unix stream sockets.
#[doc(hidden)]
pub fn unix_stream_pair() -> (TestFd, TestFd) {
  let mut fds = [0 as RawFd; 2];
  let res = unsafe {
    libc::socketpair(
      libc::AF_UNIX,
      libc::SOCK_STREAM,
      0,
      fds.as_mut_ptr(),
    )
  };
  assert_eq!(res, 0, "socketpair failed: {}", std::io::Error::last_os_error());
  (TestFd { fd: fds[0] }, TestFd { fd: fds[1] })
}

/// A connected pair of non-blocking Unix stream sockets.
#[doc(hidden)]
pub fn nonblocking_stream_pair() -> (TestFd, TestFd) {
  let (a, b) = unix_stream_pair();
  set_nonblocking(a.fd);
  set_nonblocking(b.fd);
  (a, b)
}

#[doc(hidden)]
pub fn set_nonblocking(fd: RawFd) {
  let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
  assert!(flags >= 0);
  let res =
    unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
  assert_eq!(res, 0);
}

#[doc(hidden)]
pub fn set_blocking(fd: RawFd) {
  let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
  assert!(flags >= 0);
  let res =
    unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
  assert_eq!(res, 0);
}

#[doc(hidden)]
pub fn set_send_buffer(fd: RawFd, bytes: libc::c_int) {
  let res = unsafe {
    libc::setsockopt(
      fd,
      libc::SOL_SOCKET,
      libc::SO_SNDBUF,
      (&bytes as *const libc::c_int).cast(),
      mem::size_of::<libc::c_int>() as libc::socklen_t,
    )
  };
  assert_eq!(res, 0);
}

/// Applies an OS-enforced per-syscall send timeout.
#[doc(hidden)]
pub fn set_send_timeout(fd: RawFd, ms: i64) {
  let tv = libc::timeval {
    tv_sec: (ms / 1000) as _,
    tv_usec: ((ms % 1000) * 1000) as _,
  };
  let res = unsafe {
    libc::setsockopt(
      fd,
      libc::SOL_SOCKET,
      libc::SO_SNDTIMEO,
      (&tv as *const libc::timeval).cast(),
      mem::size_of::<libc::timeval>() as libc::socklen_t,
    )
  };
  assert_eq!(res, 0);
}

/// A UDP socket bound to an ephemeral loopback port.
#[doc(hidden)]
pub fn udp_socket_bound() -> (TestFd, SocketAddr) {
  let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
  assert!(fd >= 0);
  let sock = TestFd { fd };

  let addr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0));
  let bytes = sockaddr_bytes(addr);
  let res = unsafe {
    libc::bind(
      sock.fd,
      bytes.as_ptr() as *const libc::sockaddr,
      bytes.len() as libc::socklen_t,
    )
  };
  assert_eq!(res, 0);

  let local = local_addr(sock.fd);
  (sock, local)
}

/// Two non-blocking UDP sockets connected to each other.
#[doc(hidden)]
pub fn udp_pair() -> (TestFd, TestFd) {
  let (a, a_addr) = udp_socket_bound();
  let (b, b_addr) = udp_socket_bound();

  let b_bytes = sockaddr_bytes(b_addr);
  let res = unsafe {
    libc::connect(
      a.fd,
      b_bytes.as_ptr() as *const libc::sockaddr,
      b_bytes.len() as libc::socklen_t,
    )
  };
  assert_eq!(res, 0);

  let a_bytes = sockaddr_bytes(a_addr);
  let res = unsafe {
    libc::connect(
      b.fd,
      a_bytes.as_ptr() as *const libc::sockaddr,
      a_bytes.len() as libc::socklen_t,
    )
  };
  assert_eq!(res, 0);

  set_nonblocking(a.fd);
  set_nonblocking(b.fd);
  (a, b)
}

/// A non-blocking TCP listener on an ephemeral loopback port.
#[doc(hidden)]
pub fn tcp_listener() -> (TestFd, SocketAddr) {
  let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
  assert!(fd >= 0);
  let sock = TestFd { fd };

  let addr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0));
  let bytes = sockaddr_bytes(addr);
  let res = unsafe {
    libc::bind(
      sock.fd,
      bytes.as_ptr() as *const libc::sockaddr,
      bytes.len() as libc::socklen_t,
    )
  };
  assert_eq!(res, 0);
  let res = unsafe { libc::listen(sock.fd, 8) };
  assert_eq!(res, 0);

  let local = local_addr(sock.fd);
  set_nonblocking(sock.fd);
  (sock, local)
}

/// A non-blocking TCP socket with no connection.
#[doc(hidden)]
pub fn tcp_socket_nonblocking() -> TestFd {
  let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
  assert!(fd >= 0);
  set_nonblocking(fd);
  TestFd { fd }
}

#[doc(hidden)]
pub fn local_addr(fd: RawFd) -> SocketAddr {
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
  let res = unsafe {
    libc::getsockname(
      fd,
      (&mut storage as *mut libc::sockaddr_storage).cast(),
      &mut len,
    )
  };
  assert_eq!(res, 0);
  socketaddr_from_storage(&storage).unwrap()
}

/// Serializes a `SocketAddr` into the raw bytes `connect`/`sendto`
/// expect.
#[doc(hidden)]
pub fn sockaddr_bytes(addr: SocketAddr) -> Vec<u8> {
  match addr {
    SocketAddr::V4(v4) => {
      let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
      raw.sin_family = libc::AF_INET as libc::sa_family_t;
      raw.sin_port = v4.port().to_be();
      raw.sin_addr = libc::in_addr { s_addr: u32::from(*v4.ip()).to_be() };
      raw_bytes(&raw)
    }
    SocketAddr::V6(v6) => {
      let mut raw: libc::sockaddr_in6 = unsafe { mem::zeroed() };
      raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
      raw.sin6_port = v6.port().to_be();
      raw.sin6_addr = libc::in6_addr { s6_addr: v6.ip().octets() };
      raw.sin6_flowinfo = v6.flowinfo();
      raw.sin6_scope_id = v6.scope_id();
      raw_bytes(&raw)
    }
  }
}

fn raw_bytes<T>(value: &T) -> Vec<u8> {
  let mut out = vec![0u8; mem::size_of::<T>()];
  unsafe {
    ptr::copy_nonoverlapping(
      (value as *const T).cast::<u8>(),
      out.as_mut_ptr(),
      mem::size_of::<T>(),
    );
  }
  out
}

/// Decodes the bytes an address-returning syscall wrote back.
#[doc(hidden)]
pub fn socketaddr_from_bytes(bytes: &[u8]) -> Option<SocketAddr> {
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let len = bytes.len().min(mem::size_of::<libc::sockaddr_storage>());
  unsafe {
    ptr::copy_nonoverlapping(
      bytes.as_ptr(),
      (&mut storage as *mut libc::sockaddr_storage).cast::<u8>(),
      len,
    );
  }
  socketaddr_from_storage(&storage)
}

fn socketaddr_from_storage(
  storage: &libc::sockaddr_storage,
) -> Option<SocketAddr> {
  if storage.ss_family == libc::AF_INET as libc::sa_family_t {
    // SAFETY: family checked, storage is large enough for sockaddr_in.
    let v4 = unsafe {
      *(storage as *const libc::sockaddr_storage)
        .cast::<libc::sockaddr_in>()
    };
    Some(SocketAddr::V4(SocketAddrV4::new(
      Ipv4Addr::from(v4.sin_addr.s_addr.to_be()),
      u16::from_be(v4.sin_port),
    )))
  } else if storage.ss_family == libc::AF_INET6 as libc::sa_family_t {
    // SAFETY: family checked, storage is large enough for sockaddr_in6.
    let v6 = unsafe {
      *(storage as *const libc::sockaddr_storage)
        .cast::<libc::sockaddr_in6>()
    };
    Some(SocketAddr::V6(SocketAddrV6::new(
      v6.sin6_addr.s6_addr.into(),
      u16::from_be(v6.sin6_port),
      v6.sin6_flowinfo,
      v6.sin6_scope_id,
    )))
  } else {
    None
  }
}
