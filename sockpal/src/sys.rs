//! Thin wrappers over the raw socket syscalls.
//!
//! Every wrapper retries transparently on `EINTR` and otherwise
//! returns `io::Result` straight from the kernel; the attempt layer
//! above decides what an `errno` means for the operation in flight.

use std::io;
use std::os::fd::RawFd;

/// `MSG_NOSIGNAL` keeps a send on a closed peer from raising SIGPIPE.
/// Apple platforms use the `SO_NOSIGPIPE` socket option instead, so
/// the flag is zero there.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) const SEND_FLAGS: libc::c_int = 0;

pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
  let n = syscall_intr!(read(fd, buf.as_mut_ptr().cast(), buf.len()))?;
  Ok(n as usize)
}

pub(crate) fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
  let n = syscall_intr!(write(fd, buf.as_ptr().cast(), buf.len()))?;
  Ok(n as usize)
}

pub(crate) fn recv(
  fd: RawFd,
  buf: &mut [u8],
  flags: libc::c_int,
) -> io::Result<usize> {
  let n = syscall_intr!(recv(fd, buf.as_mut_ptr().cast(), buf.len(), flags))?;
  Ok(n as usize)
}

pub(crate) fn send(
  fd: RawFd,
  buf: &[u8],
  flags: libc::c_int,
) -> io::Result<usize> {
  let n = syscall_intr!(send(
    fd,
    buf.as_ptr().cast(),
    buf.len(),
    flags | SEND_FLAGS
  ))?;
  Ok(n as usize)
}

pub(crate) fn recvmsg(
  fd: RawFd,
  msg: &mut libc::msghdr,
  flags: libc::c_int,
) -> io::Result<usize> {
  let n = syscall_intr!(recvmsg(fd, msg, flags))?;
  Ok(n as usize)
}

pub(crate) fn sendmsg(
  fd: RawFd,
  msg: &libc::msghdr,
  flags: libc::c_int,
) -> io::Result<usize> {
  let n = syscall_intr!(sendmsg(fd, msg, flags | SEND_FLAGS))?;
  Ok(n as usize)
}

/// Accepts a pending connection; the new descriptor is close-on-exec
/// where the platform can do that atomically.
pub(crate) fn accept(
  fd: RawFd,
  addr: *mut libc::sockaddr,
  addr_len: *mut libc::socklen_t,
) -> io::Result<RawFd> {
  #[cfg(any(target_os = "linux", target_os = "android"))]
  {
    syscall_intr!(accept4(fd, addr, addr_len, libc::SOCK_CLOEXEC))
  }
  #[cfg(not(any(target_os = "linux", target_os = "android")))]
  {
    let new_fd = syscall_intr!(accept(fd, addr, addr_len))?;
    syscall_intr!(fcntl(new_fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
    Ok(new_fd)
  }
}

pub(crate) fn connect(fd: RawFd, addr: &[u8]) -> io::Result<()> {
  syscall_intr!(connect(
    fd,
    addr.as_ptr() as *const libc::sockaddr,
    addr.len() as libc::socklen_t
  ))?;
  Ok(())
}

/// Reads and clears the pending error on the socket.
pub(crate) fn take_socket_error(fd: RawFd) -> io::Result<libc::c_int> {
  let mut err: libc::c_int = 0;
  let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
  syscall!(getsockopt(
    fd,
    libc::SOL_SOCKET,
    libc::SO_ERROR,
    (&mut err as *mut libc::c_int).cast(),
    &mut len
  ))?;
  Ok(err)
}

/// Bytes available to read without blocking.
pub(crate) fn available(fd: RawFd) -> io::Result<usize> {
  let mut value: libc::c_int = 0;
  syscall!(ioctl(fd, libc::FIONREAD, &mut value))?;
  Ok(value.max(0) as usize)
}

/// Polls a single descriptor, retrying on EINTR.
pub(crate) fn poll_one(
  fd: RawFd,
  events: libc::c_short,
  timeout_ms: libc::c_int,
) -> io::Result<libc::c_short> {
  let mut pfd = libc::pollfd { fd, events, revents: 0 };
  syscall_intr!(poll(&mut pfd, 1, timeout_ms))?;
  Ok(pfd.revents)
}

/// Kernel-side file-to-socket copy. Returns the number of bytes moved,
/// which may be short of `count`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn send_file(
  socket: RawFd,
  file: RawFd,
  offset: i64,
  count: usize,
) -> io::Result<usize> {
  let mut off: libc::off_t = offset as libc::off_t;
  let n = syscall_intr!(sendfile(socket, file, &mut off, count))?;
  Ok(n as usize)
}

/// Apple `sendfile` reports bytes moved through an in/out length even
/// when the call itself fails; a short transfer before EAGAIN or EINTR
/// is surfaced as success.
#[cfg(any(
  target_os = "macos",
  target_os = "ios",
  target_os = "tvos",
  target_os = "watchos"
))]
pub(crate) fn send_file(
  socket: RawFd,
  file: RawFd,
  offset: i64,
  count: usize,
) -> io::Result<usize> {
  let mut len: libc::off_t = count as libc::off_t;
  let res = unsafe {
    libc::sendfile(file, socket, offset as libc::off_t, &mut len, std::ptr::null_mut(), 0)
  };
  if res == 0 {
    return Ok(len as usize);
  }
  let err = io::Error::last_os_error();
  match err.raw_os_error() {
    Some(libc::EAGAIN) | Some(libc::EINTR) if len > 0 => Ok(len as usize),
    _ => Err(err),
  }
}

#[cfg(not(any(
  target_os = "linux",
  target_os = "android",
  target_os = "macos",
  target_os = "ios",
  target_os = "tvos",
  target_os = "watchos"
)))]
pub(crate) fn send_file(
  _socket: RawFd,
  _file: RawFd,
  _offset: i64,
  _count: usize,
) -> io::Result<usize> {
  Err(io::Error::from_raw_os_error(libc::EOPNOTSUPP))
}
