use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use sockpal::test_utils::{
  nonblocking_stream_pair, set_nonblocking, sockaddr_bytes,
  socketaddr_from_bytes, udp_pair, udp_socket_bound,
};
use sockpal::{
  try_complete_receive, try_complete_receive_from,
  try_complete_receive_message_from, AddrBuffer, Capabilities, Outcome,
  SocketHandle, MAX_ADDR_LEN,
};

fn send_datagram(fd: std::os::fd::RawFd, payload: &[u8], dest: SocketAddr) {
  let addr = sockaddr_bytes(dest);
  let n = unsafe {
    libc::sendto(
      fd,
      payload.as_ptr().cast(),
      payload.len(),
      0,
      addr.as_ptr().cast(),
      addr.len() as libc::socklen_t,
    )
  };
  assert_eq!(n as usize, payload.len());
}

#[test]
fn would_block_receive_leaves_address_empty() {
  let (a, _b) = udp_pair();
  let handle = SocketHandle::socket(a.fd);

  let mut addr = AddrBuffer::for_any_family();
  let mut buf = [0u8; 64];
  let outcome = try_complete_receive_from(&handle, &mut buf, 0, &mut addr);
  assert!(outcome.is_would_block());
  assert_eq!(addr.len(), 0);
}

#[test]
fn zero_byte_receive_probes_without_consuming() {
  let (a, b) = udp_pair();
  let sender = SocketHandle::socket(a.fd);
  let receiver = SocketHandle::socket(b.fd);

  let payload = b"still queued";
  let mut off = 0;
  let mut cnt = payload.len();
  let mut sent = 0;
  assert!(sockpal::try_complete_send(
    &sender, payload, &mut off, &mut cnt, 0, &mut sent
  )
  .is_terminal());

  for _ in 0..2 {
    match try_complete_receive(&receiver, &mut [], 0) {
      Outcome::Completed(r) => assert_eq!(r.bytes, 0),
      other => panic!("unexpected outcome: {other:?}"),
    }
  }

  let mut buf = [0u8; 64];
  match try_complete_receive(&receiver, &mut buf, 0) {
    Outcome::Completed(r) => {
      assert_eq!(&buf[..r.bytes], payload);
    }
    other => panic!("unexpected outcome: {other:?}"),
  }
}

#[test]
fn receive_from_decodes_the_sender_address() {
  let (a, a_addr) = udp_socket_bound();
  let (b, b_addr) = udp_socket_bound();
  set_nonblocking(b.fd);
  let receiver = SocketHandle::socket(b.fd);

  send_datagram(a.fd, b"who sent this", b_addr);

  let mut addr = AddrBuffer::for_any_family();
  let mut buf = [0u8; 64];
  match try_complete_receive_from(&receiver, &mut buf, 0, &mut addr) {
    Outcome::Completed(r) => {
      assert_eq!(&buf[..r.bytes], b"who sent this");
      let peer = socketaddr_from_bytes(addr.as_slice()).unwrap();
      assert_eq!(peer, a_addr);
    }
    other => panic!("unexpected outcome: {other:?}"),
  }
}

#[test]
fn truncated_datagram_surfaces_in_returned_flags() {
  let (a, _a_addr) = udp_socket_bound();
  let (b, b_addr) = udp_socket_bound();
  set_nonblocking(b.fd);
  let receiver = SocketHandle::socket(b.fd);

  send_datagram(a.fd, &[1u8; 128], b_addr);

  let mut addr = AddrBuffer::for_any_family();
  let mut buf = [0u8; 16];
  match try_complete_receive_from(&receiver, &mut buf, 0, &mut addr) {
    Outcome::Completed(r) => {
      assert_eq!(r.bytes, 16);
      assert_ne!(r.flags & libc::MSG_TRUNC, 0);
    }
    other => panic!("unexpected outcome: {other:?}"),
  }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn receive_message_reports_packet_arrival_metadata() {
  let (a, _a_addr) = udp_socket_bound();
  let (b, b_addr) = udp_socket_bound();
  set_nonblocking(b.fd);

  let on: libc::c_int = 1;
  let res = unsafe {
    libc::setsockopt(
      b.fd,
      libc::IPPROTO_IP,
      libc::IP_PKTINFO,
      (&on as *const libc::c_int).cast(),
      std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    )
  };
  assert_eq!(res, 0);

  let receiver = SocketHandle::socket(b.fd);
  send_datagram(a.fd, b"where did I land", b_addr);

  let mut addr = AddrBuffer::for_any_family();
  let mut buf = [0u8; 64];
  let caps = Capabilities::detect();
  match try_complete_receive_message_from(
    &receiver, &mut buf, 0, &mut addr, true, false, &caps,
  ) {
    Outcome::Completed(msg) => {
      assert_eq!(&buf[..msg.bytes], b"where did I land");
      assert_eq!(
        msg.packet_info.address,
        Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
      );
      assert!(msg.packet_info.interface_index > 0);
    }
    other => panic!("unexpected outcome: {other:?}"),
  }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn interrupted_blocking_receive_retries_until_data_arrives() {
  use sockpal::test_utils::unix_stream_pair;
  use std::time::Duration;

  extern "C" fn wake(_signal: libc::c_int) {}

  unsafe {
    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = wake as extern "C" fn(libc::c_int) as usize;
    libc::sigemptyset(&mut action.sa_mask);
    // No SA_RESTART: the kernel fails the blocked recv with EINTR.
    action.sa_flags = 0;
    assert_eq!(
      libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut()),
      0
    );
  }

  let (a, b) = unix_stream_pair();
  let receiver = SocketHandle::socket(b.fd);

  let (tid_tx, tid_rx) = crossbeam_channel::bounded(1);
  let worker = std::thread::spawn(move || {
    tid_tx.send(unsafe { libc::pthread_self() }).ok();
    let mut buf = [0u8; 16];
    match try_complete_receive(&receiver, &mut buf, 0) {
      Outcome::Completed(r) => r.bytes,
      other => panic!("unexpected outcome: {other:?}"),
    }
  });

  let tid = tid_rx.recv().unwrap();
  std::thread::sleep(Duration::from_millis(50));
  unsafe {
    assert_eq!(libc::pthread_kill(tid, libc::SIGUSR1), 0);
  }
  std::thread::sleep(Duration::from_millis(100));

  let n = unsafe { libc::write(a.fd, b"wake".as_ptr().cast(), 4) };
  assert_eq!(n, 4);
  assert_eq!(worker.join().unwrap(), 4);
}

#[test]
fn stream_receive_message_normalizes_missing_peer_address() {
  let (a, b) = nonblocking_stream_pair();
  let sender = SocketHandle::socket(a.fd);
  let receiver = SocketHandle::socket(b.fd);

  let mut off = 0;
  let mut cnt = 4;
  let mut sent = 0;
  assert!(sockpal::try_complete_send(
    &sender, b"peek", &mut off, &mut cnt, 0, &mut sent
  )
  .is_terminal());

  let mut addr = AddrBuffer::for_any_family();
  let mut buf = [0u8; 16];
  let caps = Capabilities::detect();
  match try_complete_receive_message_from(
    &receiver, &mut buf, 0, &mut addr, false, false, &caps,
  ) {
    Outcome::Completed(msg) => {
      assert_eq!(msg.bytes, 4);
      // A connected stream reports no peer address; the buffer comes
      // back at full capacity, zero filled.
      assert_eq!(addr.len(), MAX_ADDR_LEN);
      assert!(addr.as_slice().iter().all(|&byte| byte == 0));
    }
    other => panic!("unexpected outcome: {other:?}"),
  }
}
