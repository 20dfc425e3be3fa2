//! Vectored I/O adapter: turns an ordered buffer list into native
//! scatter/gather descriptors for the duration of one syscall, and maps
//! a transferred byte count back onto a resumable position.

use std::ptr;

/// Matches Linux's UIO_FASTIOV, the number of `struct iovec` the kernel
/// keeps on its own stack for the fast path.
pub(crate) const IOV_STACK_THRESHOLD: usize = 8;

/// Operation-scoped iovec storage.
///
/// Holds at most [`IOV_STACK_THRESHOLD`] descriptors inline and falls
/// back to the heap above that. The arena borrows the caller's buffers
/// only for the single syscall it is built around; dropping it releases
/// the storage on every exit path.
pub(crate) struct IovecArena {
  stack: [libc::iovec; IOV_STACK_THRESHOLD],
  heap: Vec<libc::iovec>,
  on_stack: bool,
  len: usize,
}

const EMPTY_IOVEC: libc::iovec =
  libc::iovec { iov_base: ptr::null_mut(), iov_len: 0 };

impl IovecArena {
  pub(crate) fn with_capacity(capacity: usize) -> Self {
    let on_stack = capacity <= IOV_STACK_THRESHOLD;
    Self {
      stack: [EMPTY_IOVEC; IOV_STACK_THRESHOLD],
      heap: if on_stack { Vec::new() } else { Vec::with_capacity(capacity) },
      on_stack,
      len: 0,
    }
  }

  pub(crate) fn push(&mut self, base: *mut u8, len: usize) {
    let entry = libc::iovec { iov_base: base.cast(), iov_len: len };
    if self.on_stack {
      assert!(self.len < IOV_STACK_THRESHOLD, "stack arena overflow");
      self.stack[self.len] = entry;
    } else {
      self.heap.push(entry);
    }
    self.len += 1;
  }

  pub(crate) fn len(&self) -> usize {
    self.len
  }

  pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::iovec {
    if self.on_stack { self.stack.as_mut_ptr() } else { self.heap.as_mut_ptr() }
  }
}

/// Builds send iovecs starting at (segment `index`, intra-segment
/// `offset`). The first pinned segment is shortened by the offset;
/// later segments start at 0.
///
/// The returned arena aliases `bufs`; it must not outlive the syscall
/// it is built for.
pub(crate) fn send_iovecs(
  bufs: &[&[u8]],
  index: usize,
  offset: usize,
) -> IovecArena {
  assert!(index <= bufs.len(), "segment index {index} out of range");
  if index < bufs.len() {
    assert!(
      offset <= bufs[index].len(),
      "offset {offset} exceeds segment length {}",
      bufs[index].len()
    );
  }

  let mut arena = IovecArena::with_capacity(bufs.len() - index);
  let mut start = offset;
  for seg in &bufs[index..] {
    arena.push(seg[start..].as_ptr() as *mut u8, seg.len() - start);
    start = 0;
  }
  arena
}

/// Builds receive iovecs, pinning no segments beyond `available` bytes.
///
/// The bound is a resource optimization, not a correctness requirement:
/// with fewer segments than the stack threshold, or with `available` at
/// its `usize::MAX` sentinel, every segment is pinned.
pub(crate) fn recv_iovecs(
  bufs: &mut [&mut [u8]],
  available: usize,
) -> IovecArena {
  let mut arena = IovecArena::with_capacity(bufs.len());
  let mut to_receive = 0usize;
  for seg in bufs.iter_mut() {
    arena.push(seg.as_mut_ptr(), seg.len());
    to_receive = to_receive.saturating_add(seg.len());
    if to_receive >= available {
      break;
    }
  }
  arena
}

/// Maps a transferred byte count onto the resumable (segment index,
/// intra-segment offset) position it leaves behind.
///
/// Consuming exactly one segment's remainder advances to the next
/// segment at offset 0; consuming the sum of all segment lengths yields
/// `(N, 0)`; transferring 0 is the identity.
pub fn advance_position<B: AsRef<[u8]>>(
  bufs: &[B],
  index: usize,
  offset: usize,
  transferred: usize,
) -> (usize, usize) {
  let mut end_index = index;
  let mut end_offset = offset;
  let mut unconsumed = transferred;
  while end_index < bufs.len() && unconsumed > 0 {
    let space = bufs[end_index].as_ref().len() - end_offset;
    if space > unconsumed {
      end_offset += unconsumed;
      return (end_index, end_offset);
    }
    unconsumed -= space;
    end_index += 1;
    end_offset = 0;
  }
  debug_assert_eq!(unconsumed, 0, "transferred more than the list holds");
  (end_index, end_offset)
}
