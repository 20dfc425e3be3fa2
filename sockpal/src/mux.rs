//! select()-semantics readiness multiplexing built on poll().
//!
//! poll() avoids select()'s hard FD_SETSIZE ceiling, so it is the
//! primary path; the three interest lists are flattened into one poll
//! array and then destructively filtered in place so each list keeps
//! only the sockets that are ready. Platforms whose poll-based select
//! emulation is known unreliable fall back to the OS select() under
//! the identical reference-counting and filtering contract.

use std::io;
use std::os::fd::RawFd;

use crate::caps::Capabilities;
use crate::error::SockError;
use crate::handle::SocketHandle;
use crate::sys;

/// Readiness direction for [`poll_handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
  Read,
  Write,
  Error,
}

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP;
const WRITE_EVENTS: libc::c_short = libc::POLLOUT;
/// Interest registered for the error list; the filter additionally
/// accepts POLLERR, which needs no registration.
const ERROR_EVENTS: libc::c_short = libc::POLLPRI;
const ERROR_FILTER: libc::c_short = libc::POLLERR | libc::POLLPRI;

/// Blocks until the handle is ready in the given direction or the
/// timeout expires. `timeout_micros == -1` waits indefinitely.
pub fn poll_handle(
  handle: &SocketHandle,
  timeout_micros: i32,
  mode: SelectMode,
) -> Result<bool, SockError> {
  let guard = handle.guard()?;
  let events = match mode {
    SelectMode::Read => libc::POLLIN,
    SelectMode::Write => libc::POLLOUT,
    SelectMode::Error => libc::POLLPRI,
  };

  let milliseconds =
    if timeout_micros == -1 { -1 } else { timeout_micros / 1000 };
  let revents = sys::poll_one(guard.fd(), events, milliseconds)
    .map_err(|ref e| SockError::from_io(e))?;

  Ok(match mode {
    SelectMode::Read => revents & READ_EVENTS != 0,
    SelectMode::Write => revents & WRITE_EVENTS != 0,
    SelectMode::Error => revents & ERROR_FILTER != 0,
  })
}

/// Waits on three interest lists at once and filters each in place to
/// the sockets that are ready, matching legacy select() semantics.
/// An empty list is simply not watched. `timeout_micros == -1` waits
/// indefinitely.
///
/// Each watched handle is reference-bracketed around the raw
/// descriptor extraction so a concurrent close cannot hand the wait a
/// reclaimed descriptor slot; the count of references taken is
/// released exactly on every exit path.
pub fn select(
  check_read: &mut Vec<&SocketHandle>,
  check_write: &mut Vec<&SocketHandle>,
  check_error: &mut Vec<&SocketHandle>,
  timeout_micros: i32,
  caps: &Capabilities,
) -> Result<(), SockError> {
  let count = check_read.len() + check_write.len() + check_error.len();
  debug_assert!(count > 0, "expected at least one watched socket");

  if caps.select_over_poll_is_broken {
    return select_via_select(
      check_read,
      check_write,
      check_error,
      timeout_micros,
    );
  }

  select_via_poll(check_read, check_write, check_error, timeout_micros)
}

/// Arbitrary bound on the poll array kept on the stack.
const POLL_STACK_THRESHOLD: usize = 80;

/// Stack-resident poll array below [`POLL_STACK_THRESHOLD`] slots,
/// heap-backed above it.
struct PollArena {
  stack: [libc::pollfd; POLL_STACK_THRESHOLD],
  heap: Vec<libc::pollfd>,
  on_stack: bool,
  len: usize,
}

impl PollArena {
  fn with_capacity(capacity: usize) -> Self {
    let on_stack = capacity <= POLL_STACK_THRESHOLD;
    Self {
      stack: [libc::pollfd { fd: -1, events: 0, revents: 0 };
        POLL_STACK_THRESHOLD],
      heap: if on_stack { Vec::new() } else { Vec::with_capacity(capacity) },
      on_stack,
      len: 0,
    }
  }

  fn push(&mut self, fd: RawFd, events: libc::c_short) {
    let entry = libc::pollfd { fd, events, revents: 0 };
    if self.on_stack {
      self.stack[self.len] = entry;
    } else {
      self.heap.push(entry);
    }
    self.len += 1;
  }

  fn slots(&mut self) -> &mut [libc::pollfd] {
    if self.on_stack {
      &mut self.stack[..self.len]
    } else {
      &mut self.heap[..]
    }
  }
}

/// Releases up to `refs_added` references, walking the lists in the
/// same order they were reference-acquired.
fn release_list_refs(
  lists: [&[&SocketHandle]; 3],
  refs_added: &mut usize,
) {
  for list in lists {
    for handle in list {
      if *refs_added == 0 {
        return;
      }
      handle.release();
      *refs_added -= 1;
    }
  }
}

fn add_to_poll_array(
  arena: &mut PollArena,
  list: &[&SocketHandle],
  events: libc::c_short,
  refs_added: &mut usize,
) -> Result<(), SockError> {
  for handle in list {
    handle.add_ref()?;
    *refs_added += 1;
    arena.push(handle.raw(), events);
  }
  Ok(())
}

/// Removes from `list` every entry whose poll result slot did not
/// trigger an event in `desired`, releasing its reference.
///
/// Iterating from the end keeps removal cheap in the common cases:
/// with few ready sockets each removal shifts almost nothing, and with
/// most sockets ready there are few removals at all. The balanced
/// middle is quadratic, which is accepted here.
fn filter_poll_list(
  list: &mut Vec<&SocketHandle>,
  results: &[libc::pollfd],
  desired: libc::c_short,
  refs_added: &mut usize,
) {
  debug_assert_eq!(list.len(), results.len());
  for i in (0..list.len()).rev() {
    if results[i].revents & desired == 0 {
      list[i].release();
      *refs_added -= 1;
      list.remove(i);
    }
  }
}

fn select_via_poll(
  check_read: &mut Vec<&SocketHandle>,
  check_write: &mut Vec<&SocketHandle>,
  check_error: &mut Vec<&SocketHandle>,
  timeout_micros: i32,
) -> Result<(), SockError> {
  let read_count = check_read.len();
  let write_count = check_write.len();
  let error_count = check_error.len();
  let count = read_count + write_count + error_count;

  let mut arena = PollArena::with_capacity(count);
  let mut refs_added = 0usize;

  // Fill order is load-bearing: cleanup walks [read, write, error] and
  // releases exactly refs_added, so a failure partway through still
  // releases precisely the handles that were acquired.
  let filled = add_to_poll_array(
    &mut arena,
    check_read,
    READ_EVENTS,
    &mut refs_added,
  )
  .and_then(|()| {
    add_to_poll_array(&mut arena, check_write, WRITE_EVENTS, &mut refs_added)
  })
  .and_then(|()| {
    add_to_poll_array(&mut arena, check_error, ERROR_EVENTS, &mut refs_added)
  });
  if let Err(e) = filled {
    release_list_refs(
      [check_read, check_write, check_error],
      &mut refs_added,
    );
    debug_assert_eq!(refs_added, 0);
    return Err(e);
  }
  debug_assert_eq!(refs_added, count);

  let milliseconds =
    if timeout_micros == -1 { -1 } else { timeout_micros / 1000 };
  let slots = arena.slots();
  let triggered = match poll_slots(slots, milliseconds) {
    Ok(n) => n,
    Err(ref e) => {
      release_list_refs(
        [check_read, check_write, check_error],
        &mut refs_added,
      );
      debug_assert_eq!(refs_added, 0);
      return Err(SockError::from_io(e));
    }
  };

  if triggered == 0 {
    release_list_refs(
      [check_read, check_write, check_error],
      &mut refs_added,
    );
    check_read.clear();
    check_write.clear();
    check_error.clear();
  } else {
    filter_poll_list(
      check_read,
      &slots[..read_count],
      READ_EVENTS,
      &mut refs_added,
    );
    filter_poll_list(
      check_write,
      &slots[read_count..read_count + write_count],
      WRITE_EVENTS,
      &mut refs_added,
    );
    filter_poll_list(
      check_error,
      &slots[read_count + write_count..],
      ERROR_FILTER,
      &mut refs_added,
    );
    release_list_refs(
      [check_read, check_write, check_error],
      &mut refs_added,
    );
  }

  debug_assert_eq!(refs_added, 0);
  Ok(())
}

fn poll_slots(
  slots: &mut [libc::pollfd],
  milliseconds: libc::c_int,
) -> io::Result<usize> {
  let n = syscall_intr!(poll(
    slots.as_mut_ptr(),
    slots.len() as libc::nfds_t,
    milliseconds
  ))?;
  Ok(n as usize)
}

/// Arbitrary per-list bound on descriptor arrays kept on the stack in
/// the select() fallback.
const SELECT_STACK_THRESHOLD: usize = 20;

struct FdArray {
  stack: [RawFd; SELECT_STACK_THRESHOLD],
  heap: Vec<RawFd>,
  on_stack: bool,
  len: usize,
}

impl FdArray {
  fn with_capacity(capacity: usize) -> Self {
    let on_stack = capacity <= SELECT_STACK_THRESHOLD;
    Self {
      stack: [-1; SELECT_STACK_THRESHOLD],
      heap: if on_stack { Vec::new() } else { Vec::with_capacity(capacity) },
      on_stack,
      len: 0,
    }
  }

  fn push(&mut self, fd: RawFd) {
    if self.on_stack {
      self.stack[self.len] = fd;
    } else {
      self.heap.push(fd);
    }
    self.len += 1;
  }

  fn fds(&self) -> &[RawFd] {
    if self.on_stack { &self.stack[..self.len] } else { &self.heap[..] }
  }
}

fn add_descriptors(
  array: &mut FdArray,
  list: &[&SocketHandle],
  refs_added: &mut usize,
  max_fd: &mut RawFd,
) -> Result<(), SockError> {
  for handle in list {
    handle.add_ref()?;
    *refs_added += 1;
    let fd = handle.raw();
    if fd >= libc::FD_SETSIZE as RawFd {
      // select() cannot represent this descriptor at all.
      return Err(SockError::InvalidArgument);
    }
    if fd > *max_fd {
      *max_fd = fd;
    }
    array.push(fd);
  }
  Ok(())
}

fn fd_set_of(fds: &[RawFd]) -> libc::fd_set {
  let mut set: libc::fd_set = unsafe { std::mem::zeroed() };
  unsafe { libc::FD_ZERO(&mut set) };
  for &fd in fds {
    unsafe { libc::FD_SET(fd, &mut set) };
  }
  set
}

fn filter_select_list(
  list: &mut Vec<&SocketHandle>,
  fds: &[RawFd],
  set: &mut libc::fd_set,
) {
  debug_assert_eq!(list.len(), fds.len());
  for i in (0..list.len()).rev() {
    if !unsafe { libc::FD_ISSET(fds[i], set) } {
      list.remove(i);
    }
  }
}

/// Direct select() path for platforms where poll-emulated select is
/// unreliable. Same reference and filtering contract as the poll path,
/// plus the max-descriptor tracking select()'s API requires.
fn select_via_select(
  check_read: &mut Vec<&SocketHandle>,
  check_write: &mut Vec<&SocketHandle>,
  check_error: &mut Vec<&SocketHandle>,
  timeout_micros: i32,
) -> Result<(), SockError> {
  let mut read_fds = FdArray::with_capacity(check_read.len());
  let mut write_fds = FdArray::with_capacity(check_write.len());
  let mut error_fds = FdArray::with_capacity(check_error.len());

  let mut refs_added = 0usize;
  let mut max_fd: RawFd = 0;

  let filled =
    add_descriptors(&mut read_fds, check_read, &mut refs_added, &mut max_fd)
      .and_then(|()| {
        add_descriptors(
          &mut write_fds,
          check_write,
          &mut refs_added,
          &mut max_fd,
        )
      })
      .and_then(|()| {
        add_descriptors(
          &mut error_fds,
          check_error,
          &mut refs_added,
          &mut max_fd,
        )
      });
  if let Err(e) = filled {
    release_list_refs(
      [check_read, check_write, check_error],
      &mut refs_added,
    );
    debug_assert_eq!(refs_added, 0);
    return Err(e);
  }

  let mut read_set = fd_set_of(read_fds.fds());
  let mut write_set = fd_set_of(write_fds.fds());
  let mut error_set = fd_set_of(error_fds.fds());

  let mut timeout = libc::timeval {
    tv_sec: (timeout_micros / 1_000_000) as _,
    tv_usec: (timeout_micros % 1_000_000) as _,
  };
  let timeout_ptr = if timeout_micros == -1 {
    std::ptr::null_mut()
  } else {
    &mut timeout as *mut libc::timeval
  };

  let res = syscall_intr!(select(
    max_fd + 1,
    &mut read_set,
    &mut write_set,
    &mut error_set,
    timeout_ptr
  ));
  let triggered = match res {
    Ok(n) => n as usize,
    Err(ref e) => {
      release_list_refs(
        [check_read, check_write, check_error],
        &mut refs_added,
      );
      debug_assert_eq!(refs_added, 0);
      return Err(SockError::from_io(e));
    }
  };

  release_list_refs([check_read, check_write, check_error], &mut refs_added);
  debug_assert_eq!(refs_added, 0);

  if triggered == 0 {
    check_read.clear();
    check_write.clear();
    check_error.clear();
  } else {
    filter_select_list(check_read, read_fds.fds(), &mut read_set);
    filter_select_list(check_write, write_fds.fds(), &mut write_set);
    filter_select_list(check_error, error_fds.fds(), &mut error_set);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::SendStatus;
  use crate::ops::try_complete_send;
  use crate::test_utils::nonblocking_stream_pair;

  fn send_all(handle: &SocketHandle, payload: &[u8]) {
    let mut off = 0;
    let mut cnt = payload.len();
    let mut sent = 0;
    assert_eq!(
      try_complete_send(handle, payload, &mut off, &mut cnt, 0, &mut sent),
      SendStatus::Complete
    );
  }

  #[test]
  fn poll_handle_reports_readability() {
    let (a, b) = nonblocking_stream_pair();
    let writer = SocketHandle::socket(a.fd);
    let reader = SocketHandle::socket(b.fd);

    assert!(!poll_handle(&reader, 0, SelectMode::Read).unwrap());
    send_all(&writer, b"ready");
    assert!(poll_handle(&reader, 1_000_000, SelectMode::Read).unwrap());
    assert!(poll_handle(&reader, 0, SelectMode::Write).unwrap());
  }

  #[test]
  fn select_filters_lists_to_ready_sockets() {
    let (a, b) = nonblocking_stream_pair();
    let (c, d) = nonblocking_stream_pair();
    let writer = SocketHandle::socket(a.fd);
    let ready = SocketHandle::socket(b.fd);
    let idle = SocketHandle::socket(d.fd);
    let _peer = SocketHandle::socket(c.fd);

    send_all(&writer, b"x");

    let mut read_list = vec![&ready, &idle];
    let mut write_list = vec![&writer];
    let mut error_list: Vec<&SocketHandle> = Vec::new();
    select(
      &mut read_list,
      &mut write_list,
      &mut error_list,
      100_000,
      &Capabilities::detect(),
    )
    .unwrap();

    assert_eq!(read_list.len(), 1);
    assert!(std::ptr::eq(read_list[0], &ready));
    assert_eq!(write_list.len(), 1);
    assert!(error_list.is_empty());

    assert_eq!(ready.outstanding_refs(), 0);
    assert_eq!(idle.outstanding_refs(), 0);
    assert_eq!(writer.outstanding_refs(), 0);
  }

  #[test]
  fn select_timeout_clears_all_lists() {
    let (a, b) = nonblocking_stream_pair();
    let reader = SocketHandle::socket(b.fd);
    let other = SocketHandle::socket(a.fd);

    let mut read_list = vec![&reader, &other];
    let mut write_list: Vec<&SocketHandle> = Vec::new();
    let mut error_list: Vec<&SocketHandle> = Vec::new();
    select(
      &mut read_list,
      &mut write_list,
      &mut error_list,
      10_000,
      &Capabilities::detect(),
    )
    .unwrap();

    assert!(read_list.is_empty());
    assert_eq!(reader.outstanding_refs(), 0);
    assert_eq!(other.outstanding_refs(), 0);
  }

  #[test]
  fn select_on_disposed_handle_releases_acquired_refs() {
    let (a, b) = nonblocking_stream_pair();
    let alive = SocketHandle::socket(a.fd);
    let dead = SocketHandle::socket(b.fd);
    dead.mark_disposed();

    let mut read_list = vec![&alive, &dead];
    let mut write_list: Vec<&SocketHandle> = Vec::new();
    let mut error_list: Vec<&SocketHandle> = Vec::new();
    let err = select(
      &mut read_list,
      &mut write_list,
      &mut error_list,
      0,
      &Capabilities::detect(),
    )
    .unwrap_err();

    assert_eq!(err, SockError::OperationAborted);
    assert_eq!(alive.outstanding_refs(), 0);
    assert_eq!(dead.outstanding_refs(), 0);
  }

  #[test]
  fn select_fallback_matches_poll_semantics() {
    let (a, b) = nonblocking_stream_pair();
    let writer = SocketHandle::socket(a.fd);
    let reader = SocketHandle::socket(b.fd);
    send_all(&writer, b"x");

    let mut read_list = vec![&reader];
    let mut write_list: Vec<&SocketHandle> = Vec::new();
    let mut error_list: Vec<&SocketHandle> = Vec::new();
    select_via_select(&mut read_list, &mut write_list, &mut error_list, 100_000)
      .unwrap();

    assert_eq!(read_list.len(), 1);
    assert_eq!(reader.outstanding_refs(), 0);
  }
}
