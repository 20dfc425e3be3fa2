//! Shared, non-owning descriptor handle with disposal-race tracking.
//!
//! A [`SocketHandle`] wraps a descriptor it never closes. The owner that
//! *does* close it announces the fact with [`SocketHandle::mark_disposed`]
//! before calling `close(2)`; from that point every attempt to use the
//! handle fails with `OperationAborted` instead of touching a descriptor
//! slot the OS may already have recycled.
//!
//! The reference-counting discipline is load-bearing: any extraction of
//! the raw descriptor is bracketed by an add/release pair that nets to
//! zero on every exit path. [`FdGuard`] makes the release structural.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::error::SockError;

/// What kind of descriptor the handle wraps, resolved once at
/// construction instead of re-checked inside every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
  /// A real socket; send/recv/sendmsg/recvmsg apply.
  Socket,
  /// A plain file descriptor adopted into the socket surface; only
  /// read/write apply and message flags must be zero.
  File,
}

// Bit 0 of `state` is the disposed flag, the remaining bits count
// outstanding references.
const DISPOSED: u32 = 1;
const REF_ONE: u32 = 2;

pub struct SocketHandle {
  fd: RawFd,
  kind: HandleKind,
  state: AtomicU32,
  blocking: AtomicBool,
  send_timeout_ms: AtomicI32,
  recv_timeout_ms: AtomicI32,
  dual_mode: AtomicBool,
  tfo_enabled: AtomicBool,
  shutdown_send: AtomicBool,
  shutdown_recv: AtomicBool,
  disconnected: AtomicBool,
}

impl SocketHandle {
  pub fn new(fd: RawFd, kind: HandleKind) -> Self {
    assert!(fd >= 0, "SocketHandle::new: fd must be >= 0, got {fd}");
    Self {
      fd,
      kind,
      state: AtomicU32::new(0),
      blocking: AtomicBool::new(true),
      send_timeout_ms: AtomicI32::new(-1),
      recv_timeout_ms: AtomicI32::new(-1),
      dual_mode: AtomicBool::new(false),
      tfo_enabled: AtomicBool::new(false),
      shutdown_send: AtomicBool::new(false),
      shutdown_recv: AtomicBool::new(false),
      disconnected: AtomicBool::new(false),
    }
  }

  /// Wraps a socket descriptor.
  pub fn socket(fd: RawFd) -> Self {
    Self::new(fd, HandleKind::Socket)
  }

  /// Wraps a non-socket descriptor (pipe, regular file, ...).
  pub fn file(fd: RawFd) -> Self {
    Self::new(fd, HandleKind::File)
  }

  pub fn kind(&self) -> HandleKind {
    self.kind
  }

  pub fn is_socket(&self) -> bool {
    self.kind == HandleKind::Socket
  }

  /// Acquires an RAII reference to the descriptor.
  ///
  /// Fails with [`SockError::OperationAborted`] once the owner has
  /// disposed the handle. Every syscall boundary in this crate goes
  /// through here.
  pub fn guard(&self) -> Result<FdGuard<'_>, SockError> {
    self.add_ref()?;
    Ok(FdGuard { handle: self })
  }

  /// Raw descriptor, valid only while the caller holds a reference
  /// obtained from [`SocketHandle::add_ref`] or [`SocketHandle::guard`].
  pub(crate) fn raw(&self) -> RawFd {
    debug_assert!(
      self.state.load(Ordering::Acquire) >> 1 != 0,
      "raw() without an outstanding reference"
    );
    self.fd
  }

  pub(crate) fn add_ref(&self) -> Result<(), SockError> {
    let mut cur = self.state.load(Ordering::Acquire);
    loop {
      if cur & DISPOSED != 0 {
        return Err(SockError::OperationAborted);
      }
      match self.state.compare_exchange_weak(
        cur,
        cur + REF_ONE,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => return Ok(()),
        Err(actual) => cur = actual,
      }
    }
  }

  pub(crate) fn release(&self) {
    let prev = self.state.fetch_sub(REF_ONE, Ordering::AcqRel);
    debug_assert!(prev >> 1 != 0, "release without a matching add_ref");
  }

  /// The owner's disposal signal, issued before it closes the fd.
  ///
  /// Already-started syscalls run to completion on their reference; new
  /// acquisitions fail with `OperationAborted`. The owner must wait for
  /// [`SocketHandle::outstanding_refs`] to drain before the actual
  /// `close(2)`.
  pub fn mark_disposed(&self) {
    self.state.fetch_or(DISPOSED, Ordering::AcqRel);
  }

  pub fn is_disposed(&self) -> bool {
    self.state.load(Ordering::Acquire) & DISPOSED != 0
  }

  #[doc(hidden)]
  pub fn outstanding_refs(&self) -> u32 {
    self.state.load(Ordering::Acquire) >> 1
  }

  /// Whether the *handle* is considered blocking. The underlying fd is
  /// kept non-blocking by the owning layer; blocking semantics are
  /// emulated above this flag, so flipping it never issues a syscall.
  pub fn is_blocking(&self) -> bool {
    self.blocking.load(Ordering::Relaxed)
  }

  pub fn set_blocking(&self, blocking: bool) {
    self.blocking.store(blocking, Ordering::Relaxed);
  }

  /// Cached send timeout in milliseconds; `<= 0` means unbounded.
  pub fn send_timeout_ms(&self) -> i32 {
    self.send_timeout_ms.load(Ordering::Relaxed)
  }

  pub fn set_send_timeout_ms(&self, ms: i32) {
    self.send_timeout_ms.store(ms, Ordering::Relaxed);
  }

  /// Cached receive timeout in milliseconds; `<= 0` means unbounded.
  pub fn recv_timeout_ms(&self) -> i32 {
    self.recv_timeout_ms.load(Ordering::Relaxed)
  }

  pub fn set_recv_timeout_ms(&self, ms: i32) {
    self.recv_timeout_ms.store(ms, Ordering::Relaxed);
  }

  pub fn dual_mode(&self) -> bool {
    self.dual_mode.load(Ordering::Relaxed)
  }

  pub fn set_dual_mode(&self, on: bool) {
    self.dual_mode.store(on, Ordering::Relaxed);
  }

  /// TCP Fast Open tracking; some platforms cannot query the option
  /// back, so the socket surface caches the last value set here.
  pub fn tfo_enabled(&self) -> bool {
    self.tfo_enabled.load(Ordering::Relaxed)
  }

  pub fn set_tfo_enabled(&self, on: bool) {
    self.tfo_enabled.store(on, Ordering::Relaxed);
  }

  pub fn mark_shutdown_send(&self) {
    self.shutdown_send.store(true, Ordering::Relaxed);
  }

  pub fn is_shutdown_send(&self) -> bool {
    self.shutdown_send.load(Ordering::Relaxed)
  }

  pub fn mark_shutdown_recv(&self) {
    self.shutdown_recv.store(true, Ordering::Relaxed);
  }

  pub fn is_shutdown_recv(&self) -> bool {
    self.shutdown_recv.load(Ordering::Relaxed)
  }

  pub fn mark_disconnected(&self) {
    self.disconnected.store(true, Ordering::Relaxed);
  }

  pub fn is_disconnected(&self) -> bool {
    self.disconnected.load(Ordering::Relaxed)
  }
}

impl std::fmt::Debug for SocketHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SocketHandle")
      .field("fd", &self.fd)
      .field("kind", &self.kind)
      .field("disposed", &self.is_disposed())
      .field("refs", &self.outstanding_refs())
      .finish()
  }
}

/// Scoped descriptor reference; `Drop` releases it, so add/release pairs
/// balance on every exit path including panics.
pub struct FdGuard<'a> {
  handle: &'a SocketHandle,
}

impl FdGuard<'_> {
  pub fn fd(&self) -> RawFd {
    self.handle.fd
  }
}

impl Drop for FdGuard<'_> {
  fn drop(&mut self) {
    self.handle.release();
  }
}
