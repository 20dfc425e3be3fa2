use sockpal::test_utils::{nonblocking_stream_pair, TestFd};
use sockpal::{select, Capabilities, SendStatus, SocketHandle};

fn send_byte(handle: &SocketHandle) {
  let mut off = 0;
  let mut cnt = 1;
  let mut sent = 0;
  assert_eq!(
    sockpal::try_complete_send(handle, b"x", &mut off, &mut cnt, 0, &mut sent),
    SendStatus::Complete
  );
}

#[test]
fn ready_sockets_survive_filtering_and_refs_balance() {
  let (a, b) = nonblocking_stream_pair();
  let (c, d) = nonblocking_stream_pair();
  let writer = SocketHandle::socket(a.fd);
  let ready = SocketHandle::socket(b.fd);
  let idle = SocketHandle::socket(d.fd);
  let _idle_peer = SocketHandle::socket(c.fd);

  send_byte(&writer);

  let mut read_list = vec![&ready, &idle];
  let mut write_list = vec![&writer, &idle];
  let mut error_list = vec![&idle];
  select(
    &mut read_list,
    &mut write_list,
    &mut error_list,
    250_000,
    &Capabilities::detect(),
  )
  .unwrap();

  assert_eq!(read_list.len(), 1);
  assert!(std::ptr::eq(read_list[0], &ready));
  // A healthy connected stream is writable, so both entries stay.
  assert_eq!(write_list.len(), 2);
  // Nothing has an error or urgent data pending.
  assert!(error_list.is_empty());

  for handle in [&writer, &ready, &idle] {
    assert_eq!(handle.outstanding_refs(), 0);
  }
}

#[test]
fn watching_many_sockets_takes_the_heap_path() {
  // Enough entries to exceed the stack-resident poll array.
  let mut pairs: Vec<(TestFd, TestFd)> = Vec::new();
  for _ in 0..50 {
    pairs.push(nonblocking_stream_pair());
  }

  let readers: Vec<SocketHandle> =
    pairs.iter().map(|(_, b)| SocketHandle::socket(b.fd)).collect();
  let writers: Vec<SocketHandle> =
    pairs.iter().map(|(a, _)| SocketHandle::socket(a.fd)).collect();

  // Make exactly every seventh reader ready.
  let mut expect_ready = 0;
  for (i, writer) in writers.iter().enumerate() {
    if i % 7 == 0 {
      send_byte(writer);
      expect_ready += 1;
    }
  }

  let mut read_list: Vec<&SocketHandle> = readers.iter().collect();
  let mut write_list: Vec<&SocketHandle> = Vec::new();
  let mut error_list: Vec<&SocketHandle> = Vec::new();
  select(
    &mut read_list,
    &mut write_list,
    &mut error_list,
    250_000,
    &Capabilities::detect(),
  )
  .unwrap();

  assert_eq!(read_list.len(), expect_ready);
  for handle in &readers {
    assert_eq!(handle.outstanding_refs(), 0);
  }
}

#[test]
fn zero_timeout_with_nothing_ready_clears_every_list() {
  let (a, b) = nonblocking_stream_pair();
  let reader_a = SocketHandle::socket(a.fd);
  let reader_b = SocketHandle::socket(b.fd);

  let mut read_list = vec![&reader_a, &reader_b];
  let mut write_list: Vec<&SocketHandle> = Vec::new();
  let mut error_list = vec![&reader_a];
  select(
    &mut read_list,
    &mut write_list,
    &mut error_list,
    0,
    &Capabilities::detect(),
  )
  .unwrap();

  assert!(read_list.is_empty());
  assert!(error_list.is_empty());
  assert_eq!(reader_a.outstanding_refs(), 0);
  assert_eq!(reader_b.outstanding_refs(), 0);
}
