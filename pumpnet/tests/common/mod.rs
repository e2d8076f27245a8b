#![allow(dead_code)]

use std::net::Ipv4Addr;

use pumpnet::{Config, Net, TcpClient, TcpServer, stack::loopback::Loopback};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub fn loopback_net() -> (Net, Loopback) {
  loopback_net_with(Loopback::new(), Config::default())
}

pub fn loopback_net_with(lo: Loopback, config: Config) -> (Net, Loopback) {
  init_tracing();
  (Net::with_config(lo.clone(), config), lo)
}

/// Listens on `port`, connects a client to it and accepts the connection.
pub fn connected_pair(net: &Net, port: u16) -> (TcpServer, TcpClient, TcpClient) {
  let mut server = TcpServer::new(net, port);
  server.begin().expect("listen");
  let mut client = TcpClient::new(net);
  client.connect(Ipv4Addr::LOCALHOST, port).expect("connect");
  let conn = server.accept().expect("accepted connection");
  (server, client, conn)
}

/// Reads until `want` bytes have arrived or the pump stops producing data.
pub fn read_exactly(conn: &mut TcpClient, want: usize) -> Vec<u8> {
  let mut out = Vec::with_capacity(want);
  let mut idle = 0;
  while out.len() < want && idle < 64 {
    if conn.available() == 0 {
      idle += 1;
      continue;
    }
    idle = 0;
    let mut buf = [0u8; 512];
    let cap = (want - out.len()).min(buf.len());
    if let Some(n) = conn.read(&mut buf[..cap]) {
      out.extend_from_slice(&buf[..n]);
    }
  }
  out
}
