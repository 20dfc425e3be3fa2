//! Single-shot operation attempts over non-blocking descriptors.
//!
//! Every function here issues one syscall attempt (the send family adds
//! a bounded forward-progress loop on top) and reports the result
//! through [`Outcome`] or [`SendStatus`]. Raw OS error codes never
//! escape; they are translated through [`SockError`] at the boundary,
//! and a handle disposed by another thread mid-call surfaces as a
//! terminal [`SockError::OperationAborted`].

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::addr::AddrBuffer;
use crate::caps::Capabilities;
use crate::error::{is_again, Outcome, SendStatus, SockError};
use crate::handle::{FdGuard, HandleKind, SocketHandle};
use crate::iovec::{
  advance_position, recv_iovecs, send_iovecs, IovecArena, IOV_STACK_THRESHOLD,
};
use crate::msg::{
  control_buffer_len, decode_packet_info, ControlBuffer, PacketInfo,
};
use crate::sys;

/// Result of a completed receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
  pub bytes: usize,
  /// `msg_flags` reported by the kernel, zero for plain `recv`/`read`
  /// paths.
  pub flags: libc::c_int,
}

/// Result of a completed receive-message attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
  pub bytes: usize,
  pub flags: libc::c_int,
  pub packet_info: PacketInfo,
}

fn recv_outcome(res: io::Result<usize>) -> Outcome<Received> {
  match res {
    Ok(n) => Outcome::Completed(Received { bytes: n, flags: 0 }),
    Err(ref e) if is_again(e) => Outcome::WouldBlock,
    Err(ref e) => Outcome::Failed(SockError::from_io(e)),
  }
}

/// Receives into a single buffer.
///
/// A zero-length buffer is special-cased as a 1-byte `MSG_PEEK` probe:
/// some platforms complete a true zero-byte receive successfully even
/// when no data is queued, so the probe is what makes "receive 0 bytes
/// to learn about readability" both meaningful and idempotent.
pub fn try_complete_receive(
  handle: &SocketHandle,
  buf: &mut [u8],
  flags: libc::c_int,
) -> Outcome<Received> {
  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => return Outcome::Failed(e),
  };

  if handle.kind() == HandleKind::File {
    debug_assert_eq!(flags, 0);
    return recv_outcome(sys::read(guard.fd(), buf));
  }

  if buf.is_empty() {
    let mut probe = [0u8; 1];
    return match sys::recv(guard.fd(), &mut probe, flags | libc::MSG_PEEK) {
      // Peeked for one byte, but the caller asked for zero.
      Ok(_) => Outcome::Completed(Received { bytes: 0, flags: 0 }),
      Err(ref e) if is_again(e) => Outcome::WouldBlock,
      Err(ref e) => Outcome::Failed(SockError::from_io(e)),
    };
  }

  recv_outcome(sys::recv(guard.fd(), buf, flags))
}

struct RecvMeta {
  bytes: usize,
  flags: libc::c_int,
  addr_len: libc::socklen_t,
}

/// One `recvmsg` over an already-built iovec array, optionally filling
/// a peer address and an ancillary-data region.
fn recv_msg_raw(
  guard: &FdGuard,
  iov: *mut libc::iovec,
  iov_len: usize,
  mut addr: Option<&mut AddrBuffer>,
  control: Option<(&mut ControlBuffer, usize)>,
  flags: libc::c_int,
) -> io::Result<RecvMeta> {
  let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
  msg.msg_iov = iov;
  msg.msg_iovlen = iov_len as _;

  let addr_capacity = addr.as_ref().map_or(0, |a| a.capacity());
  if let Some(a) = addr.as_mut() {
    if addr_capacity > 0 {
      msg.msg_name = a.as_mut_ptr().cast();
      msg.msg_namelen = addr_capacity as libc::socklen_t;
    }
  }
  if let Some((buf, len)) = control {
    msg.msg_control = buf.as_mut_ptr();
    msg.msg_controllen = len as _;
  }

  let bytes = sys::recvmsg(guard.fd(), &mut msg, flags)?;
  if let Some(a) = addr {
    a.set_len((msg.msg_namelen as usize).min(addr_capacity));
  }
  Ok(RecvMeta { bytes, flags: msg.msg_flags, addr_len: msg.msg_namelen })
}

/// Receives into a single buffer, capturing the peer address.
pub fn try_complete_receive_from(
  handle: &SocketHandle,
  buf: &mut [u8],
  flags: libc::c_int,
  addr: &mut AddrBuffer,
) -> Outcome<Received> {
  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => return Outcome::Failed(e),
  };

  if handle.kind() == HandleKind::File {
    debug_assert_eq!(flags, 0);
    addr.set_len(0);
    return recv_outcome(sys::read(guard.fd(), buf));
  }

  // Same 1-byte peek special case as try_complete_receive.
  let zero_requested = buf.is_empty();
  let mut probe = [0u8; 1];
  let (slice, flags) = if zero_requested {
    (&mut probe[..], flags | libc::MSG_PEEK)
  } else {
    (&mut *buf, flags)
  };

  let mut iov = libc::iovec {
    iov_base: slice.as_mut_ptr().cast(),
    iov_len: slice.len(),
  };
  match recv_msg_raw(&guard, &mut iov, 1, Some(&mut *addr), None, flags) {
    Ok(meta) => Outcome::Completed(Received {
      bytes: if zero_requested { 0 } else { meta.bytes },
      flags: meta.flags,
    }),
    Err(ref e) if is_again(e) => {
      addr.set_len(0);
      Outcome::WouldBlock
    }
    Err(ref e) => {
      addr.set_len(0);
      Outcome::Failed(SockError::from_io(e))
    }
  }
}

/// Queries how many bytes could be received right now, used to bound
/// the number of pinned segments in large vectored receives.
fn available_bound(guard: &FdGuard, segments: usize) -> io::Result<usize> {
  if segments <= IOV_STACK_THRESHOLD {
    return Ok(usize::MAX);
  }
  match sys::available(guard.fd())? {
    // Zero available must not truncate the iovec list.
    0 => Ok(usize::MAX),
    n => Ok(n),
  }
}

/// Receives into an ordered buffer list, capturing the peer address.
pub fn try_complete_receive_from_vectored(
  handle: &SocketHandle,
  bufs: &mut [&mut [u8]],
  flags: libc::c_int,
  addr: &mut AddrBuffer,
) -> Outcome<Received> {
  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => return Outcome::Failed(e),
  };

  let available = match available_bound(&guard, bufs.len()) {
    Ok(n) => n,
    Err(ref e) if is_again(e) => {
      addr.set_len(0);
      return Outcome::WouldBlock;
    }
    Err(ref e) => {
      addr.set_len(0);
      return Outcome::Failed(SockError::from_io(e));
    }
  };

  let mut arena = recv_iovecs(bufs, available);
  let len = arena.len();
  match recv_msg_raw(&guard, arena.as_mut_ptr(), len, Some(addr), None, flags)
  {
    Ok(meta) => {
      Outcome::Completed(Received { bytes: meta.bytes, flags: meta.flags })
    }
    Err(ref e) if is_again(e) => {
      addr.set_len(0);
      Outcome::WouldBlock
    }
    Err(ref e) => {
      addr.set_len(0);
      Outcome::Failed(SockError::from_io(e))
    }
  }
}

fn finish_receive_message(
  res: io::Result<(RecvMeta, PacketInfo)>,
  addr: &mut AddrBuffer,
) -> Outcome<Message> {
  match res {
    Ok((meta, packet_info)) => {
      // A connected stream socket legitimately reports no peer address;
      // hand back a zeroed full-capacity buffer instead of an empty one.
      if addr.capacity() > 0 && meta.addr_len == 0 {
        addr.reset_to_capacity();
      }
      Outcome::Completed(Message {
        bytes: meta.bytes,
        flags: meta.flags,
        packet_info,
      })
    }
    Err(ref e) if is_again(e) => {
      addr.set_len(0);
      Outcome::WouldBlock
    }
    Err(ref e) => {
      addr.set_len(0);
      Outcome::Failed(SockError::from_io(e))
    }
  }
}

fn recv_message_raw(
  guard: &FdGuard,
  arena: &mut IovecArena,
  addr: &mut AddrBuffer,
  ipv4: bool,
  ipv6: bool,
  flags: libc::c_int,
) -> io::Result<(RecvMeta, PacketInfo)> {
  let mut control = ControlBuffer::new();
  let control_len = control_buffer_len(ipv4, ipv6);

  let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
  msg.msg_iov = arena.as_mut_ptr();
  msg.msg_iovlen = arena.len() as _;
  if addr.capacity() > 0 {
    msg.msg_name = addr.as_mut_ptr().cast();
    msg.msg_namelen = addr.capacity() as libc::socklen_t;
  }
  if control_len > 0 {
    msg.msg_control = control.as_mut_ptr();
    msg.msg_controllen = control_len as _;
  }

  let bytes = sys::recvmsg(guard.fd(), &mut msg, flags)?;
  addr.set_len((msg.msg_namelen as usize).min(addr.capacity()));
  // SAFETY: control is still in scope and was filled by this recvmsg.
  let packet_info = unsafe { decode_packet_info(&msg, ipv4, ipv6) };
  Ok((
    RecvMeta { bytes, flags: msg.msg_flags, addr_len: msg.msg_namelen },
    packet_info,
  ))
}

/// Receives a single datagram with its peer address and packet-arrival
/// metadata (destination address and interface index).
///
/// `ipv4`/`ipv6` select which ancillary families are requested; a
/// dual-mode socket needs both, which not every platform can deliver.
pub fn try_complete_receive_message_from(
  handle: &SocketHandle,
  buf: &mut [u8],
  flags: libc::c_int,
  addr: &mut AddrBuffer,
  ipv4: bool,
  ipv6: bool,
  caps: &Capabilities,
) -> Outcome<Message> {
  if let Err(e) = caps.check_dual_mode_packet_info(handle) {
    addr.set_len(0);
    return Outcome::Failed(e);
  }
  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => {
      addr.set_len(0);
      return Outcome::Failed(e);
    }
  };

  let mut one = [buf];
  let mut arena = recv_iovecs(&mut one, usize::MAX);
  let res = recv_message_raw(&guard, &mut arena, addr, ipv4, ipv6, flags);
  finish_receive_message(res, addr)
}

/// Vectored form of [`try_complete_receive_message_from`].
pub fn try_complete_receive_message_from_vectored(
  handle: &SocketHandle,
  bufs: &mut [&mut [u8]],
  flags: libc::c_int,
  addr: &mut AddrBuffer,
  ipv4: bool,
  ipv6: bool,
  caps: &Capabilities,
) -> Outcome<Message> {
  if let Err(e) = caps.check_dual_mode_packet_info(handle) {
    addr.set_len(0);
    return Outcome::Failed(e);
  }
  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => {
      addr.set_len(0);
      return Outcome::Failed(e);
    }
  };

  let available = match available_bound(&guard, bufs.len()) {
    Ok(n) => n,
    Err(ref e) if is_again(e) => {
      addr.set_len(0);
      return Outcome::WouldBlock;
    }
    Err(ref e) => {
      addr.set_len(0);
      return Outcome::Failed(SockError::from_io(e));
    }
  };

  let mut arena = recv_iovecs(bufs, available);
  let res = recv_message_raw(&guard, &mut arena, addr, ipv4, ipv6, flags);
  finish_receive_message(res, addr)
}

fn send_deadline(handle: &SocketHandle) -> Option<Instant> {
  let timeout = handle.send_timeout_ms();
  if handle.is_blocking() && timeout > 0 {
    Some(Instant::now() + Duration::from_millis(timeout as u64))
  } else {
    None
  }
}

fn sendmsg_to(
  guard: &FdGuard,
  iov: *mut libc::iovec,
  iov_len: usize,
  addr: &[u8],
  flags: libc::c_int,
) -> io::Result<usize> {
  let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
  msg.msg_iov = iov;
  msg.msg_iovlen = iov_len as _;
  if !addr.is_empty() {
    msg.msg_name = addr.as_ptr() as *mut libc::c_void;
    msg.msg_namelen = addr.len() as libc::socklen_t;
  }
  sys::sendmsg(guard.fd(), &msg, flags)
}

/// Sends from a single buffer, retrying while each attempt makes
/// forward progress and work remains.
///
/// `offset`/`count` are advanced in place so the caller can resume a
/// partial send later; `offset + count` is invariant across any
/// outcome. EAGAIN after at least one successful partial send reports
/// [`SendStatus::Pending`] rather than `WouldBlock`: the bytes already
/// accepted are real progress the caller must account for. Only the
/// very first attempt maps EAGAIN to `WouldBlock`.
///
/// For a blocking handle with a positive configured send timeout, a
/// wall-clock deadline is computed once at entry and checked after
/// each partial send; crossing it is a terminal
/// [`SockError::TimedOut`].
pub fn try_complete_send(
  handle: &SocketHandle,
  buf: &[u8],
  offset: &mut usize,
  count: &mut usize,
  flags: libc::c_int,
  bytes_sent: &mut usize,
) -> SendStatus {
  try_complete_send_to(handle, buf, offset, count, flags, &[], bytes_sent)
}

/// [`try_complete_send`] with an explicit destination address.
pub fn try_complete_send_to(
  handle: &SocketHandle,
  buf: &[u8],
  offset: &mut usize,
  count: &mut usize,
  flags: libc::c_int,
  addr: &[u8],
  bytes_sent: &mut usize,
) -> SendStatus {
  assert!(
    offset.checked_add(*count).is_some_and(|end| end <= buf.len()),
    "send range {}..+{} exceeds buffer of {} bytes",
    offset,
    count,
    buf.len()
  );

  let mut any_sent = false;
  let deadline = send_deadline(handle);

  loop {
    // Re-acquired each attempt so a disposal between iterations is
    // still caught at the syscall boundary.
    let guard = match handle.guard() {
      Ok(g) => g,
      Err(e) => return SendStatus::Failed(e),
    };

    let chunk = &buf[*offset..*offset + *count];
    let res = if handle.kind() == HandleKind::File {
      debug_assert_eq!(flags, 0);
      debug_assert!(addr.is_empty());
      sys::write(guard.fd(), chunk)
    } else if addr.is_empty() {
      sys::send(guard.fd(), chunk, flags)
    } else {
      let mut iov = libc::iovec {
        iov_base: chunk.as_ptr() as *mut libc::c_void,
        iov_len: chunk.len(),
      };
      sendmsg_to(&guard, &mut iov, 1, addr, flags)
    };
    drop(guard);

    match res {
      Err(ref e) => {
        if !any_sent && !is_again(e) {
          return SendStatus::Failed(SockError::from_io(e));
        }
        return if any_sent {
          SendStatus::Pending
        } else {
          SendStatus::WouldBlock
        };
      }
      Ok(sent) => {
        any_sent = true;
        *bytes_sent += sent;
        *offset += sent;
        *count -= sent;

        if sent == 0 || *count == 0 {
          return SendStatus::Complete;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
          // A truly blocking socket spends up to the full configured
          // timeout inside each syscall; this caps the total across
          // iterations of this loop.
          return SendStatus::Failed(SockError::TimedOut);
        }
      }
    }
  }
}

/// Sends from an ordered buffer list, resuming at `(index, offset)` and
/// advancing that position in place as bytes are accepted.
pub fn try_complete_send_to_vectored(
  handle: &SocketHandle,
  bufs: &[&[u8]],
  index: &mut usize,
  offset: &mut usize,
  flags: libc::c_int,
  addr: &[u8],
  bytes_sent: &mut usize,
) -> SendStatus {
  let mut any_sent = false;
  let deadline = send_deadline(handle);

  loop {
    let guard = match handle.guard() {
      Ok(g) => g,
      Err(e) => return SendStatus::Failed(e),
    };

    let mut arena = send_iovecs(bufs, *index, *offset);
    let len = arena.len();
    let res = sendmsg_to(&guard, arena.as_mut_ptr(), len, addr, flags);
    drop(arena);
    drop(guard);

    match res {
      Err(ref e) => {
        if !any_sent && !is_again(e) {
          return SendStatus::Failed(SockError::from_io(e));
        }
        return if any_sent {
          SendStatus::Pending
        } else {
          SendStatus::WouldBlock
        };
      }
      Ok(sent) => {
        any_sent = true;
        *bytes_sent += sent;
        let (i, o) = advance_position(bufs, *index, *offset, sent);
        *index = i;
        *offset = o;

        if sent == 0 || *index == bufs.len() {
          return SendStatus::Complete;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
          return SendStatus::Failed(SockError::TimedOut);
        }
      }
    }
  }
}

/// Kernel file-to-socket transfer with the send-loop retry discipline.
///
/// `offset`/`count` are advanced in place for external resumption.
/// Unlike the buffer send paths, EAGAIN is always reported as
/// [`SendStatus::Pending`] and no deadline applies; the caller decides
/// when to give up.
pub fn try_complete_send_file(
  handle: &SocketHandle,
  file: RawFd,
  offset: &mut i64,
  count: &mut i64,
  bytes_sent: &mut i64,
) -> SendStatus {
  loop {
    let guard = match handle.guard() {
      Ok(g) => g,
      Err(e) => return SendStatus::Failed(e),
    };

    let want = (*count).min(isize::MAX as i64) as usize;
    let res = sys::send_file(guard.fd(), file, *offset, want);
    drop(guard);

    match res {
      Err(ref e) if is_again(e) => return SendStatus::Pending,
      Err(ref e) => return SendStatus::Failed(SockError::from_io(e)),
      Ok(sent) => {
        *bytes_sent += sent as i64;
        *offset += sent as i64;
        *count -= sent as i64;

        if sent == 0 || *count == 0 {
          return SendStatus::Complete;
        }
      }
    }
  }
}

/// Accepts one pending connection, filling `addr` with the peer
/// address. The returned descriptor is owned by the caller.
pub fn try_complete_accept(
  handle: &SocketHandle,
  addr: &mut AddrBuffer,
) -> Outcome<RawFd> {
  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => return Outcome::Failed(e),
  };

  let capacity = addr.capacity();
  let mut len = capacity as libc::socklen_t;
  let res =
    sys::accept(guard.fd(), addr.as_mut_ptr().cast(), &mut len);
  match res {
    Ok(fd) => {
      debug_assert!(fd >= 0);
      addr.set_len((len as usize).min(addr.capacity()));
      Outcome::Completed(fd)
    }
    Err(ref e) if is_again(e) => {
      addr.set_len(0);
      Outcome::WouldBlock
    }
    Err(ref e) => {
      addr.set_len(0);
      Outcome::Failed(SockError::from_io(e))
    }
  }
}

/// Issues a connect. `Completed` means the connection is already
/// established; `WouldBlock` means the connect was started and must be
/// finished later with [`try_complete_connect`] once the socket polls
/// writable.
pub fn try_start_connect(
  handle: &SocketHandle,
  addr: &[u8],
) -> Outcome<()> {
  debug_assert!(!addr.is_empty());

  // A datagram socket disconnected via AF_UNSPEC cannot be connected
  // again through this path.
  if handle.is_disconnected() {
    return Outcome::Failed(SockError::IsConnected);
  }

  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => return Outcome::Failed(e),
  };

  match sys::connect(guard.fd(), addr) {
    Ok(()) => Outcome::Completed(()),
    Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
      Outcome::WouldBlock
    }
    Err(ref e) => Outcome::Failed(SockError::from_io(e)),
  }
}

/// Finishes a previously started connect.
///
/// Writability is polled with a zero timeout before SO_ERROR is read:
/// with descriptor slots reused across sockets, a stale write event
/// for the previous owner of this slot would otherwise read as a
/// successful connect.
pub fn try_complete_connect(handle: &SocketHandle) -> Outcome<()> {
  let guard = match handle.guard() {
    Ok(g) => g,
    Err(e) => return Outcome::Failed(e),
  };

  let revents = match sys::poll_one(guard.fd(), libc::POLLOUT, 0) {
    Ok(r) => r,
    Err(e) => {
      debug_assert_eq!(e.raw_os_error(), Some(libc::EBADF));
      return Outcome::Failed(SockError::Uncategorized);
    }
  };

  let pending = if revents == 0 {
    // Not writable yet; the connect is still in flight.
    libc::EINPROGRESS
  } else {
    match sys::take_socket_error(guard.fd()) {
      Ok(v) => v,
      Err(e) => {
        debug_assert_eq!(e.raw_os_error(), Some(libc::EBADF));
        return Outcome::Failed(SockError::Uncategorized);
      }
    }
  };

  if pending == 0 {
    Outcome::Completed(())
  } else if pending == libc::EINPROGRESS {
    Outcome::WouldBlock
  } else {
    Outcome::Failed(SockError::from_errno(pending))
  }
}

/// Bytes queued for reading on the socket.
pub fn get_available(handle: &SocketHandle) -> Result<usize, SockError> {
  let guard = handle.guard()?;
  sys::available(guard.fd()).map_err(|ref e| SockError::from_io(e))
}
