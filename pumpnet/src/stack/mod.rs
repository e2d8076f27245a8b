//! The seam between sockets and the native network stack.
//!
//! A [`NetStack`] is a non-blocking, single-threaded transport that only makes
//! progress inside [`NetStack::poll`]. Everything the stack wants to tell a
//! socket (handshake finished, data arrived, peer closed, error) is posted to
//! the [`Mailbox`] as an [`Event`] tagged with the [`Token`] the socket
//! registered. The stack never calls back into socket code directly.
//!
//! # Contract
//!
//! Implementations must:
//! - Only post events from within `poll`.
//! - Post events in the order they are produced.
//! - Tag every event raised by a TCP pcb with that pcb.
//! - Keep an event queued when [`Mailbox::post`] refuses it, and retry it on a
//!   later poll before posting anything newer.
//! - Treat a pcb as freed once it has posted [`EventKind::Errored`] for it.

use std::{
  io,
  net::{Ipv4Addr, SocketAddrV4},
  time::Instant,
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};

pub use crate::store::Token;

pub mod loopback;

/// Native TCP control block reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpPcb(pub u32);

/// Native UDP control block reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpPcb(pub u32);

/// Error codes reported by the native stack.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
  #[error("out of memory")]
  Mem,
  #[error("buffer error")]
  Buf,
  #[error("no route to host")]
  Routing,
  #[error("illegal value")]
  Value,
  #[error("address in use")]
  InUse,
  #[error("not connected")]
  NotConnected,
  #[error("connection aborted")]
  Aborted,
  #[error("connection reset")]
  Reset,
  #[error("connection closed")]
  Closed,
  #[error("illegal argument")]
  Argument,
  #[error("low-level netif error")]
  Interface,
}

impl StackError {
  /// Whether retrying the same call after a pump can succeed.
  pub fn is_transient(self) -> bool {
    matches!(self, Self::Mem)
  }

  pub fn kind(self) -> io::ErrorKind {
    match self {
      Self::Mem | Self::Buf => io::ErrorKind::OutOfMemory,
      Self::Routing => io::ErrorKind::HostUnreachable,
      Self::Value | Self::Argument => io::ErrorKind::InvalidInput,
      Self::InUse => io::ErrorKind::AddrInUse,
      Self::NotConnected => io::ErrorKind::NotConnected,
      Self::Aborted => io::ErrorKind::ConnectionAborted,
      Self::Reset => io::ErrorKind::ConnectionReset,
      Self::Closed => io::ErrorKind::BrokenPipe,
      Self::Interface => io::ErrorKind::NetworkDown,
    }
  }
}

impl From<StackError> for io::Error {
  fn from(value: StackError) -> Self {
    io::Error::new(value.kind(), value)
  }
}

/// Address configuration of the stack's network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Netif {
  pub address: Ipv4Addr,
  pub netmask: Ipv4Addr,
  pub gateway: Ipv4Addr,
}

/// A callback invocation, addressed to the token a socket registered.
#[derive(Debug)]
pub struct Event {
  pub token: Token,
  /// TCP pcb that raised the event; `None` for datagrams.
  pub pcb: Option<TcpPcb>,
  pub kind: EventKind,
}

#[derive(Debug)]
pub enum EventKind {
  /// Outgoing handshake completed.
  Connected,
  /// A listening pcb produced a new connection.
  Accepted(TcpPcb),
  /// Stream data. Ownership of the chunk moves to the receiver.
  Received(Bytes),
  /// The peer finished sending; the pcb is still allocated.
  PeerClosed,
  /// Fatal error; the stack has already freed the pcb.
  Errored(StackError),
  Datagram { from: SocketAddrV4, payload: Bytes },
}

/// Bounded queue the stack posts events into while polling.
pub struct Mailbox {
  tx: Sender<Event>,
  rx: Receiver<Event>,
}

impl Mailbox {
  pub fn bounded(cap: usize) -> Self {
    let (tx, rx) = crossbeam_channel::bounded(cap.max(1));
    Self { tx, rx }
  }

  /// Posts an event, handing it back if the mailbox is full.
  pub fn post(&self, event: Event) -> Result<(), Event> {
    match self.tx.try_send(event) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(event) | TrySendError::Disconnected(event)) => {
        Err(event)
      }
    }
  }

  pub(crate) fn try_take(&self) -> Option<Event> {
    self.rx.try_recv().ok()
  }
}

/// Operations a native transport must offer.
///
/// Methods taking a pcb that is unknown to the stack (never allocated or
/// already freed) must fail with [`StackError::Closed`] or do nothing; they
/// must never panic.
pub trait NetStack {
  /// Runs one iteration of timers and delivers queued callbacks.
  fn poll(&mut self, now: Instant, mailbox: &Mailbox);

  fn netif(&self) -> Option<Netif>;
  fn set_netif(&mut self, netif: Netif);
  fn link_up(&self) -> bool;

  /// Allocates a TCP control block, `None` when resources are exhausted.
  fn tcp_new(&mut self) -> Option<TcpPcb>;
  /// Associates the token posted with every event for `pcb`.
  fn tcp_arg(&mut self, pcb: TcpPcb, token: Token);
  fn tcp_bind(&mut self, pcb: TcpPcb, local: SocketAddrV4) -> Result<(), StackError>;
  fn tcp_listen(&mut self, pcb: TcpPcb) -> Result<(), StackError>;
  /// Starts a handshake; completion arrives as [`EventKind::Connected`].
  fn tcp_connect(&mut self, pcb: TcpPcb, remote: SocketAddrV4) -> Result<(), StackError>;
  /// Bytes `tcp_write` will currently accept.
  fn tcp_sndbuf(&self, pcb: TcpPcb) -> usize;
  /// Queues a copy of `data`. [`StackError::Mem`] means "full, retry later".
  fn tcp_write(&mut self, pcb: TcpPcb, data: &[u8]) -> Result<(), StackError>;
  /// Forces queued data onto the wire.
  fn tcp_output(&mut self, pcb: TcpPcb) -> Result<(), StackError>;
  /// Graceful close. The pcb must not be used afterwards.
  fn tcp_close(&mut self, pcb: TcpPcb) -> Result<(), StackError>;
  fn tcp_abort(&mut self, pcb: TcpPcb);

  fn udp_new(&mut self) -> Option<UdpPcb>;
  fn udp_bind(&mut self, pcb: UdpPcb, local: SocketAddrV4) -> Result<(), StackError>;
  /// Registers datagram delivery to `token`. Registering again replaces it.
  fn udp_recv(&mut self, pcb: UdpPcb, token: Token);
  fn udp_sendto(
    &mut self,
    pcb: UdpPcb,
    payload: Bytes,
    dst: SocketAddrV4,
  ) -> Result<(), StackError>;
  /// Disconnects and frees the pcb.
  fn udp_remove(&mut self, pcb: UdpPcb);
  fn igmp_join(&mut self, iface: Ipv4Addr, group: Ipv4Addr) -> Result<(), StackError>;
}
