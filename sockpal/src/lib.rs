//! # Sockpal - Non-Blocking Socket Operation Completion
//!
//! Sockpal is the completion layer that sits between a socket API and
//! raw POSIX descriptors: every operation is a single-shot attempt
//! that either completes, reports `WouldBlock` for the caller's event
//! loop to retry, or fails with a portable error kind. No raw OS error
//! codes cross the boundary.
//!
//! ## What it provides
//! - **Attempt operations**: receive (plain, from-address, message
//!   with packet metadata), send (single buffer, buffer list, file to
//!   socket), accept, and two-phase connect.
//! - **Vectored I/O** with stack-resident scatter/gather descriptors
//!   below a small threshold and resumable `(index, offset)` position
//!   tracking.
//! - **A readiness multiplexer** with legacy select() semantics built
//!   on poll(), including a direct select() fallback for platforms
//!   where the emulation is unreliable.
//!
//! *Note:* This is a quite low-level library. Descriptors are owned by
//! the caller; sockpal never closes them, it only reacts to a handle
//! being disposed mid-operation by reporting
//! [`SockError::OperationAborted`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use sockpal::{try_complete_receive, Outcome, SocketHandle};
//!
//! # fn example(fd: std::os::fd::RawFd) {
//! let handle = SocketHandle::socket(fd);
//! let mut buf = [0u8; 4096];
//! match try_complete_receive(&handle, &mut buf, 0) {
//!   Outcome::Completed(r) => println!("got {} bytes", r.bytes),
//!   Outcome::WouldBlock => { /* park the socket in the multiplexer */ }
//!   Outcome::Failed(e) => eprintln!("receive failed: {e}"),
//! }
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Fully synchronous: nothing here spawns threads, and the only
//! suspension points are inside `poll`/`select` and the individual
//! syscalls. Partial-progress state (`offset`/`count`) is caller
//! owned, so overlapping same-direction operations on one handle are
//! not supported.

#[macro_use]
mod macros;

mod addr;
mod caps;
mod error;
mod handle;
mod iovec;
mod msg;
mod mux;
mod ops;
mod sys;

#[doc(hidden)]
pub mod test_utils;

pub use addr::{AddrBuffer, MAX_ADDR_LEN};
pub use caps::Capabilities;
pub use error::{Outcome, SendStatus, SockError};
pub use handle::{FdGuard, HandleKind, SocketHandle};
pub use iovec::advance_position;
pub use msg::PacketInfo;
pub use mux::{poll_handle, select, SelectMode};
pub use ops::{
  get_available, try_complete_accept, try_complete_connect,
  try_complete_receive, try_complete_receive_from,
  try_complete_receive_from_vectored, try_complete_receive_message_from,
  try_complete_receive_message_from_vectored, try_complete_send,
  try_complete_send_file, try_complete_send_to,
  try_complete_send_to_vectored, try_start_connect, Message, Received,
};
