use std::{
  collections::VecDeque,
  fmt,
  net::{Ipv4Addr, SocketAddrV4},
  rc::Rc,
};

use tracing::{debug, trace, warn};

use crate::{
  Error, Net, Result,
  buf::{PacketBuf, RecvBuf},
  driver::{Hook, SocketSlot},
  stack::{EventKind, UdpPcb, Token},
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct PacketMeta {
  from: SocketAddrV4,
  len: usize,
}

/// Datagram endpoint state updated by stack events.
///
/// Payloads of every delivered datagram share one receive bridge; `packets`
/// remembers where each one came from and how long it was.
#[derive(Default)]
pub(crate) struct UdpSlot {
  pub(crate) pcb: Option<UdpPcb>,
  pub(crate) rx: RecvBuf,
  pub(crate) packets: VecDeque<PacketMeta>,
  pub(crate) hook: Option<Hook>,
}

impl UdpSlot {
  /// Applies an event, returning the data-arrival hook to run afterwards.
  pub(crate) fn on_event(&mut self, kind: EventKind) -> Option<Hook> {
    match kind {
      EventKind::Datagram { from, payload } => {
        if payload.is_empty() {
          trace!(%from, "dropping empty datagram");
          return None;
        }
        self.packets.push_back(PacketMeta { from, len: payload.len() });
        self.rx.push(payload);
        self.hook.clone()
      }
      other => {
        trace!(event = ?other, "ignoring datagram event");
        None
      }
    }
  }
}

/// Blocking datagram socket.
///
/// Outgoing packets are assembled with [`begin_packet`](Self::begin_packet),
/// [`write`](Self::write) and [`end_packet`](Self::end_packet). Incoming
/// packets are taken one at a time with [`parse_packet`](Self::parse_packet)
/// and read until [`available`](Self::available) drops to zero.
pub struct UdpSocket {
  net: Net,
  token: Option<Token>,
  port: u16,
  /// Unread bytes of the packet returned by the last `parse_packet`.
  remaining: usize,
  remote: Option<SocketAddrV4>,
  dest: Option<SocketAddrV4>,
  out: PacketBuf,
  hook: Option<Hook>,
}

impl fmt::Debug for UdpSocket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UdpSocket")
      .field("token", &self.token)
      .field("port", &self.port)
      .field("remaining", &self.remaining)
      .field("remote", &self.remote)
      .field("pending", &self.out.len())
      .finish()
  }
}

impl UdpSocket {
  pub fn new(net: &Net) -> Self {
    Self {
      net: net.clone(),
      token: None,
      port: 0,
      remaining: 0,
      remote: None,
      dest: None,
      out: PacketBuf::with_limit(net.config().max_datagram),
      hook: None,
    }
  }

  fn slot<R>(&self, f: impl FnOnce(&mut UdpSlot) -> R) -> Option<R> {
    let token = self.token?;
    self.net.with(|d| match d.sockets.get_mut(token) {
      Some(SocketSlot::Udp(slot)) => Some(f(slot)),
      _ => None,
    })
  }

  /// Binds to `ip:port`. With `multicast`, binds to the wildcard address and
  /// joins the group `ip` instead.
  ///
  /// Fails with [`Error::AlreadyBound`], leaving the current binding alone,
  /// if the socket is already bound.
  pub fn begin(&mut self, ip: Ipv4Addr, port: u16, multicast: bool) -> Result<()> {
    if self.token.is_some() {
      return Err(Error::AlreadyBound);
    }
    let slot = UdpSlot { hook: self.hook.clone(), ..Default::default() };
    let token = self
      .net
      .with(|d| d.sockets.try_insert(SocketSlot::Udp(slot)))
      .ok_or(Error::Exhausted)?;
    self.token = Some(token);

    let local = SocketAddrV4::new(if multicast { Ipv4Addr::UNSPECIFIED } else { ip }, port);
    let bound = self.net.with(|d| -> Result<()> {
      let pcb = d.stack.udp_new().ok_or(Error::Exhausted)?;
      if let Some(SocketSlot::Udp(slot)) = d.sockets.get_mut(token) {
        slot.pcb = Some(pcb);
      }
      d.stack.udp_bind(pcb, local)?;
      if multicast {
        d.stack.igmp_join(Ipv4Addr::UNSPECIFIED, ip)?;
      }
      d.stack.udp_recv(pcb, token);
      Ok(())
    });
    if let Err(err) = bound {
      warn!(%local, multicast, %err, "bind failed");
      self.release();
      return Err(err);
    }

    debug!(?token, %local, multicast, "datagram socket bound");
    self.port = port;
    self.remaining = 0;
    self.net.pump();
    Ok(())
  }

  /// Binds `port` on the interface's address.
  pub fn begin_port(&mut self, port: u16) -> Result<()> {
    let ip = self.net.local_addr();
    self.begin(ip, port, false)
  }

  pub fn begin_multicast(&mut self, group: Ipv4Addr, port: u16) -> Result<()> {
    self.begin(group, port, true)
  }

  /// Starts a send cycle towards `ip:port`.
  pub fn begin_packet(&mut self, ip: Ipv4Addr, port: u16) -> Result<()> {
    let token = self.token.ok_or(Error::NotOpen)?;
    self.dest = Some(SocketAddrV4::new(ip, port));
    self.net.with(|d| {
      if let Some(SocketSlot::Udp(slot)) = d.sockets.get(token)
        && let Some(pcb) = slot.pcb
      {
        d.stack.udp_recv(pcb, token);
      }
    });
    self.net.pump();
    Ok(())
  }

  pub fn begin_packet_host(&mut self, host: &str, port: u16) -> Result<()> {
    let ip = self.net.resolve(host)?;
    self.begin_packet(ip, port)
  }

  /// Appends to the outgoing packet. Returns 0 if the packet cannot grow.
  pub fn write(&mut self, bytes: &[u8]) -> usize {
    if self.out.append(bytes) { bytes.len() } else { 0 }
  }

  /// Appends one byte to the outgoing packet.
  pub fn write_byte(&mut self, byte: u8) -> usize {
    self.write(&[byte])
  }

  /// Sends the assembled packet as one datagram.
  ///
  /// The payload is consumed whether or not the stack accepts it.
  pub fn end_packet(&mut self) -> Result<()> {
    let token = self.token.ok_or(Error::NotOpen)?;
    let payload = self.out.take().ok_or(Error::NothingToSend)?;
    let dest = self.dest.unwrap_or(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

    let len = payload.len();
    let sent = self.net.with(|d| -> Result<()> {
      let pcb = match d.sockets.get(token) {
        Some(SocketSlot::Udp(slot)) => slot.pcb.ok_or(Error::NotOpen)?,
        _ => return Err(Error::NotOpen),
      };
      d.stack.udp_sendto(pcb, payload, dest)?;
      Ok(())
    });
    match sent {
      Ok(()) => {
        trace!(%dest, len, "datagram sent");
        self.net.pump();
        Ok(())
      }
      Err(err) => {
        debug!(%dest, len, %err, "datagram send failed");
        Err(err)
      }
    }
  }

  /// Pumps once and moves to the next received packet, returning its size,
  /// or 0 if none has arrived.
  ///
  /// Unread bytes of the previous packet are not skipped; read them out
  /// before parsing the next one.
  pub fn parse_packet(&mut self) -> usize {
    self.net.pump();
    match self.slot(|slot| slot.packets.pop_front()).flatten() {
      Some(PacketMeta { from, len }) => {
        self.remote = Some(from);
        self.remaining = len;
        len
      }
      None => 0,
    }
  }

  /// Unread bytes of the current packet.
  pub fn available(&self) -> usize {
    self.remaining
  }

  /// Reads up to `buf.len()` bytes of the current packet; `None` once it is
  /// exhausted.
  pub fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
    if self.remaining == 0 {
      return None;
    }
    let want = self.remaining.min(buf.len());
    let got = self.slot(|slot| slot.rx.consume(&mut buf[..want]))?;
    if got == 0 {
      return None;
    }
    self.remaining -= got;
    Some(got)
  }

  /// Reads one byte of the current packet.
  pub fn read_byte(&mut self) -> Option<u8> {
    let mut byte = [0u8; 1];
    self.read(&mut byte).map(|_| byte[0])
  }

  /// Next byte of the current packet without consuming it.
  pub fn peek(&self) -> Option<u8> {
    if self.remaining == 0 {
      return None;
    }
    self.slot(|slot| slot.rx.peek(0)).flatten()
  }

  /// Unbinds and pumps once. Stopping an unbound socket only pumps.
  pub fn stop(&mut self) {
    self.release();
    self.net.pump();
  }

  fn release(&mut self) {
    if let Some(token) = self.token.take() {
      trace!(?token, "datagram socket released");
      self.net.release(token);
    }
  }

  /// Runs `hook` from inside [`Net::pump`] whenever a datagram lands.
  pub fn on_data_arrival(&mut self, hook: impl Fn() + 'static) {
    let hook: Hook = Rc::new(hook);
    self.hook = Some(hook.clone());
    self.slot(|slot| slot.hook = Some(hook));
  }

  pub fn is_bound(&self) -> bool {
    self.slot(|slot| slot.pcb.is_some()).unwrap_or(false)
  }

  /// Source of the packet returned by the last `parse_packet`.
  pub fn remote_addr(&self) -> Option<SocketAddrV4> {
    self.remote
  }

  pub fn local_port(&self) -> u16 {
    self.port
  }
}

impl Drop for UdpSocket {
  fn drop(&mut self) {
    self.release();
    self.out.clear();
  }
}
