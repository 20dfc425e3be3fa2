//! Raw socket-address buffer with a requested capacity and an
//! OS-written actual length.

use std::mem;

/// Largest address any supported family produces.
pub const MAX_ADDR_LEN: usize = mem::size_of::<libc::sockaddr_storage>();

/// Byte buffer the OS writes a socket address into.
///
/// The capacity is fixed at construction (the *requested* size handed to
/// the kernel); `len` is what the kernel actually wrote and never
/// exceeds it.
#[derive(Debug, Clone)]
pub struct AddrBuffer {
  bytes: Box<[u8]>,
  len: usize,
}

impl AddrBuffer {
  pub fn with_capacity(capacity: usize) -> Self {
    Self { bytes: vec![0; capacity].into_boxed_slice(), len: 0 }
  }

  /// Buffer large enough for any address family.
  pub fn for_any_family() -> Self {
    Self::with_capacity(MAX_ADDR_LEN)
  }

  pub fn capacity(&self) -> usize {
    self.bytes.len()
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// The address bytes the OS wrote.
  pub fn as_slice(&self) -> &[u8] {
    &self.bytes[..self.len]
  }

  pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
    self.bytes.as_mut_ptr()
  }

  pub(crate) fn set_len(&mut self, len: usize) {
    assert!(
      len <= self.bytes.len(),
      "OS wrote {len} address bytes into a {}-byte buffer",
      self.bytes.len()
    );
    self.len = len;
  }

  /// Normalizes an unknown peer address to "full capacity, zero-filled".
  ///
  /// A connected-protocol receive can legitimately report a zero-length
  /// peer address; callers expecting an address of the requested size
  /// get deterministic zeroed bytes instead.
  pub fn reset_to_capacity(&mut self) {
    self.bytes.fill(0);
    self.len = self.bytes.len();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn len_tracks_what_the_os_wrote() {
    let mut addr = AddrBuffer::with_capacity(16);
    assert_eq!(addr.capacity(), 16);
    assert!(addr.is_empty());

    addr.set_len(8);
    assert_eq!(addr.len(), 8);
    assert_eq!(addr.as_slice().len(), 8);
  }

  #[test]
  #[should_panic(expected = "address bytes")]
  fn len_never_exceeds_capacity() {
    let mut addr = AddrBuffer::with_capacity(4);
    addr.set_len(5);
  }

  #[test]
  fn reset_to_capacity_zero_fills() {
    let mut addr = AddrBuffer::with_capacity(8);
    unsafe { *addr.as_mut_ptr() = 0xFF };
    addr.set_len(1);

    addr.reset_to_capacity();
    assert_eq!(addr.len(), 8);
    assert!(addr.as_slice().iter().all(|&b| b == 0));
  }
}
