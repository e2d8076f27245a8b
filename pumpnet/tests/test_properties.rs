mod common;

use std::net::{Ipv4Addr, SocketAddrV4};

use common::{connected_pair, loopback_net, loopback_net_with, read_exactly};
use proptest::prelude::*;
use pumpnet::{
  Config, ConnState, Error, TcpClient, UdpSocket,
  stack::loopback::{Loopback, LoopbackOptions},
};

proptest! {
  #![proptest_config(ProptestConfig::with_cases(48))]

  #[test]
  fn prop_write_delivers_everything(
    len in 1usize..=4096,
    snd_buf in 1usize..=256,
    ack in 1usize..=64,
    mailbox in 1usize..=8,
    seed in any::<u64>(),
  ) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let data: Vec<u8> = std::iter::repeat_with(|| rng.u8(..)).take(len).collect();

    let lo = Loopback::with_options(LoopbackOptions {
      snd_buf,
      ack_per_poll: Some(ack),
      ..Default::default()
    });
    let config = Config::default().with_mailbox_capacity(mailbox);
    let (net, lo) = loopback_net_with(lo, config);
    let (_server, mut client, mut conn) = connected_pair(&net, 80);

    lo.fail_writes_with_mem(rng.usize(..4));
    prop_assert_eq!(client.write(&data).unwrap(), len);
    prop_assert_eq!(read_exactly(&mut conn, len), data);
  }

  #[test]
  fn prop_write_error_leaves_hard_error(
    len in 1usize..=512,
    seed in any::<u64>(),
  ) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let (net, lo) = loopback_net_with(
      Loopback::with_options(LoopbackOptions { snd_buf: 16, ..Default::default() }),
      Config::default(),
    );
    let (_server, mut client, conn) = connected_pair(&net, 81);
    if rng.bool() {
      drop(conn);
    } else {
      lo.fail_next_write(pumpnet::stack::StackError::Reset);
    }

    match client.write(&vec![0u8; len]) {
      Ok(n) => prop_assert_eq!(n, len),
      Err(Error::Write { written, .. }) => {
        prop_assert!(written < len);
        prop_assert!(client.last_error().is_some() || client.status() == ConnState::Closing);
      }
      Err(other) => return Err(TestCaseError::fail(format!("unexpected {other}"))),
    }
  }

  #[test]
  fn prop_peek_never_consumes(chunks in prop::collection::vec(1usize..=64, 1..8)) {
    let (net, _lo) = loopback_net();
    let (_server, mut client, mut conn) = connected_pair(&net, 82);

    let mut expected = Vec::new();
    for (i, size) in chunks.iter().enumerate() {
      let chunk = vec![i as u8; *size];
      client.write(&chunk).unwrap();
      expected.extend_from_slice(&chunk);
    }

    let mut seen = Vec::new();
    while conn.available() > 0 {
      let before = conn.available();
      let peeked = conn.peek();
      prop_assert_eq!(conn.available(), before);
      let read = conn.read_byte();
      prop_assert_eq!(read, peeked);
      seen.extend(read);
    }
    prop_assert_eq!(seen, expected);
    prop_assert_eq!(conn.read_byte(), None);
  }

  #[test]
  fn prop_datagram_remaining_is_monotonic(
    payload_len in 1usize..=1024,
    reads in prop::collection::vec(0usize..=128, 1..32),
  ) {
    let (net, lo) = loopback_net();
    let mut socket = UdpSocket::new(&net);
    socket.begin_port(9000).unwrap();

    let payload: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
    let from = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 9);
    lo.inject_datagram(from, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9000), &payload);
    prop_assert_eq!(socket.parse_packet(), payload_len);

    let mut received = Vec::new();
    for want in reads {
      let before = socket.available();
      let mut buf = vec![0u8; want];
      match socket.read(&mut buf) {
        Some(n) => {
          prop_assert!(n <= want && n <= before);
          prop_assert_eq!(socket.available(), before - n);
          received.extend_from_slice(&buf[..n]);
        }
        None => prop_assert!(before == 0 || want == 0),
      }
      prop_assert!(socket.available() <= before);
    }
    prop_assert_eq!(&payload[..received.len()], &received[..]);
  }
}

#[test]
fn test_stop_twice_keeps_state() {
  let (net, _lo) = loopback_net();
  let (_server, mut client, _conn) = connected_pair(&net, 83);
  let mut socket = UdpSocket::new(&net);
  socket.begin_port(9100).unwrap();

  for _ in 0..2 {
    client.stop();
    socket.stop();
    assert_eq!(client.status(), ConnState::Closing);
    assert!(!socket.is_bound());
  }
}

#[test]
fn test_validity_tracks_status() {
  let (net, _lo) = loopback_net();
  let mut client = TcpClient::new(&net);
  assert!(!client.is_valid());

  let (_server, mut open, _conn) = connected_pair(&net, 84);
  assert!(open.is_valid());
  open.stop();
  assert!(!open.is_valid());

  assert!(client.connect(Ipv4Addr::LOCALHOST, 1).is_err());
  assert!(!client.is_valid());
}
