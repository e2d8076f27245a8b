//! In-memory [`NetStack`] for tests and host-side simulation.
//!
//! Every pcb lives on one simulated host. TCP connects to listeners bound on
//! the same stack, UDP datagrams are delivered to pcbs bound on the destination
//! port. Nothing happens outside [`poll`](NetStack::poll): handshakes complete,
//! output data reaches the peer and acknowledgements release send capacity one
//! poll at a time.
//!
//! [`Loopback`] is a cheap handle around shared state, so a test can keep a
//! clone for fault injection while the driver owns another.

use std::{
  cell::RefCell,
  collections::{BTreeMap, HashSet, VecDeque},
  net::{Ipv4Addr, SocketAddrV4},
  rc::Rc,
  time::Instant,
};

use bytes::Bytes;
use tracing::{debug, trace};

use super::{
  Event, EventKind, Mailbox, NetStack, Netif, StackError, TcpPcb, Token, UdpPcb,
};

const EPHEMERAL_START: u16 = 49152;

#[derive(Debug, Clone, Copy)]
pub struct LoopbackOptions {
  /// Combined TCP and UDP pcbs that may be open at once.
  pub max_pcbs: usize,
  /// Per-connection send buffer.
  pub snd_buf: usize,
  /// Bytes acknowledged per poll; `None` acknowledges everything in flight.
  pub ack_per_poll: Option<usize>,
}

impl Default for LoopbackOptions {
  fn default() -> Self {
    Self { max_pcbs: 16, snd_buf: 2920, ack_per_poll: None }
  }
}

#[derive(Clone, Default)]
pub struct Loopback {
  state: Rc<RefCell<State>>,
}

#[derive(Default)]
struct Faults {
  mem_writes: usize,
  write: Option<StackError>,
  output: Option<StackError>,
  close: Option<StackError>,
  sendto: Option<StackError>,
  igmp: Option<StackError>,
}

enum Phase {
  Idle,
  Listening,
  Connecting(SocketAddrV4),
  Established { peer: u32 },
}

struct TcpEntry {
  token: Option<Token>,
  local: Option<SocketAddrV4>,
  phase: Phase,
  /// Written but not yet output.
  unsent: Vec<u8>,
  /// Output, reaches the peer on the next poll.
  wire: Vec<u8>,
  unacked: usize,
}

struct UdpEntry {
  token: Option<Token>,
  local: Option<SocketAddrV4>,
}

enum Target {
  Tcp(u32),
  Udp(u32),
  /// The pcb is already gone; deliver straight to the token.
  Token(Token, Option<TcpPcb>),
}

struct Pending {
  target: Target,
  kind: EventKind,
}

struct State {
  options: LoopbackOptions,
  netif: Option<Netif>,
  link_up: bool,
  next_pcb: u32,
  next_ephemeral: u16,
  tcp: BTreeMap<u32, TcpEntry>,
  udp: BTreeMap<u32, UdpEntry>,
  groups: HashSet<Ipv4Addr>,
  blackholes: HashSet<Ipv4Addr>,
  queue: VecDeque<Pending>,
  faults: Faults,
}

impl Default for State {
  fn default() -> Self {
    Self::new(LoopbackOptions::default())
  }
}

impl Loopback {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_options(options: LoopbackOptions) -> Self {
    Self { state: Rc::new(RefCell::new(State::new(options))) }
  }

  pub fn set_ack_per_poll(&self, ack: Option<usize>) {
    self.state.borrow_mut().options.ack_per_poll = ack;
  }

  /// The next `n` calls to `tcp_write` fail with [`StackError::Mem`].
  pub fn fail_writes_with_mem(&self, n: usize) {
    self.state.borrow_mut().faults.mem_writes = n;
  }

  /// The next `tcp_write` fails with `err`.
  pub fn fail_next_write(&self, err: StackError) {
    self.state.borrow_mut().faults.write = Some(err);
  }

  /// The next `tcp_output` fails with `err`.
  pub fn fail_next_output(&self, err: StackError) {
    self.state.borrow_mut().faults.output = Some(err);
  }

  /// The next `tcp_close` fails with `err` and leaves the pcb open.
  pub fn fail_next_close(&self, err: StackError) {
    self.state.borrow_mut().faults.close = Some(err);
  }

  pub fn fail_next_sendto(&self, err: StackError) {
    self.state.borrow_mut().faults.sendto = Some(err);
  }

  pub fn fail_next_igmp_join(&self, err: StackError) {
    self.state.borrow_mut().faults.igmp = Some(err);
  }

  /// Handshakes towards `ip` never complete.
  pub fn blackhole(&self, ip: Ipv4Addr) {
    self.state.borrow_mut().blackholes.insert(ip);
  }

  pub fn set_link_up(&self, up: bool) {
    self.state.borrow_mut().link_up = up;
  }

  pub fn open_pcbs(&self) -> usize {
    self.state.borrow().open_pcbs()
  }

  /// Events produced but not yet accepted by a mailbox.
  pub fn pending_events(&self) -> usize {
    self.state.borrow().queue.len()
  }

  /// Injects a datagram as if a remote host at `from` had sent it to `dst`.
  pub fn inject_datagram(&self, from: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) {
    let mut st = self.state.borrow_mut();
    st.route_datagram(from, dst, Bytes::copy_from_slice(payload));
  }
}

impl State {
  fn new(options: LoopbackOptions) -> Self {
    Self {
      options,
      netif: None,
      link_up: true,
      next_pcb: 1,
      next_ephemeral: EPHEMERAL_START,
      tcp: BTreeMap::new(),
      udp: BTreeMap::new(),
      groups: HashSet::new(),
      blackholes: HashSet::new(),
      queue: VecDeque::new(),
      faults: Faults::default(),
    }
  }

  fn open_pcbs(&self) -> usize {
    self.tcp.len() + self.udp.len()
  }

  fn alloc_id(&mut self) -> Option<u32> {
    if self.open_pcbs() >= self.options.max_pcbs {
      return None;
    }
    let id = self.next_pcb;
    self.next_pcb = self.next_pcb.wrapping_add(1).max(1);
    Some(id)
  }

  fn ephemeral_port(&mut self) -> u16 {
    let port = self.next_ephemeral;
    self.next_ephemeral = match self.next_ephemeral.checked_add(1) {
      Some(next) => next,
      None => EPHEMERAL_START,
    };
    port
  }

  fn local_ip(&self) -> Ipv4Addr {
    self.netif.map(|n| n.address).unwrap_or(Ipv4Addr::LOCALHOST)
  }

  fn is_local(&self, ip: Ipv4Addr) -> bool {
    ip.is_loopback() || self.netif.is_some_and(|n| n.address == ip)
  }

  fn push(&mut self, target: Target, kind: EventKind) {
    self.queue.push_back(Pending { target, kind });
  }

  fn find_listener(&self, remote: SocketAddrV4) -> Option<u32> {
    if !self.is_local(*remote.ip()) {
      return None;
    }
    self.tcp.iter().find_map(|(id, entry)| {
      let local = entry.local?;
      let listening = matches!(entry.phase, Phase::Listening);
      let matches = local.port() == remote.port()
        && (local.ip().is_unspecified() || local.ip() == remote.ip());
      (listening && matches).then_some(*id)
    })
  }

  fn complete_handshakes(&mut self) {
    let connecting: Vec<(u32, SocketAddrV4)> = self
      .tcp
      .iter()
      .filter_map(|(id, e)| match e.phase {
        Phase::Connecting(remote) => Some((*id, remote)),
        _ => None,
      })
      .collect();

    for (id, remote) in connecting {
      if self.blackholes.contains(remote.ip()) {
        continue;
      }

      let accepted = self
        .find_listener(remote)
        .and_then(|listener| Some((listener, self.alloc_id()?)));

      let Some((listener, server)) = accepted else {
        let err =
          if self.is_local(*remote.ip()) { StackError::Reset } else { StackError::Routing };
        debug!(pcb = id, %remote, ?err, "loopback: refusing handshake");
        if let Some(entry) = self.tcp.remove(&id)
          && let Some(token) = entry.token
        {
          self.push(Target::Token(token, Some(TcpPcb(id))), EventKind::Errored(err));
        }
        continue;
      };

      let local = SocketAddrV4::new(self.local_ip(), self.ephemeral_port());
      if let Some(client) = self.tcp.get_mut(&id) {
        client.phase = Phase::Established { peer: server };
        client.local.get_or_insert(local);
      }
      self.tcp.insert(
        server,
        TcpEntry {
          token: None,
          local: Some(remote),
          phase: Phase::Established { peer: id },
          unsent: Vec::new(),
          wire: Vec::new(),
          unacked: 0,
        },
      );

      trace!(client = id, server, %remote, "loopback: handshake complete");
      self.push(Target::Tcp(id), EventKind::Connected);
      self.push(Target::Tcp(listener), EventKind::Accepted(TcpPcb(server)));
    }
  }

  fn transmit(&mut self) {
    let mut segments = Vec::new();
    for entry in self.tcp.values_mut() {
      if let Phase::Established { peer } = entry.phase
        && !entry.wire.is_empty()
      {
        let data = std::mem::take(&mut entry.wire);
        entry.unacked += data.len();
        segments.push((peer, Bytes::from(data)));
      }
    }
    for (peer, data) in segments {
      self.push(Target::Tcp(peer), EventKind::Received(data));
    }
  }

  fn acknowledge(&mut self) {
    let quantum = self.options.ack_per_poll;
    for entry in self.tcp.values_mut() {
      let acked = quantum.map_or(entry.unacked, |q| q.min(entry.unacked));
      entry.unacked -= acked;
    }
  }

  fn deliver(&mut self, mailbox: &Mailbox) {
    while let Some(pending) = self.queue.pop_front() {
      let (token, pcb) = match pending.target {
        Target::Token(token, pcb) => (Some(token), pcb),
        Target::Tcp(id) => match self.tcp.get(&id) {
          Some(entry) => match entry.token {
            Some(token) => (Some(token), Some(TcpPcb(id))),
            None => {
              // The owner has not claimed this pcb yet; keep ordering intact.
              self.queue.push_front(pending);
              return;
            }
          },
          None => (None, None),
        },
        Target::Udp(id) => (self.udp.get(&id).and_then(|e| e.token), None),
      };

      let Some(token) = token else {
        trace!(event = ?pending.kind, "loopback: dropping event for closed pcb");
        continue;
      };

      if let Err(event) = mailbox.post(Event { token, pcb, kind: pending.kind }) {
        trace!(queued = self.queue.len() + 1, "loopback: mailbox full");
        let target = Target::Token(event.token, event.pcb);
        self.queue.push_front(Pending { target, kind: event.kind });
        return;
      }
    }
  }

  fn snd_capacity(&self, entry: &TcpEntry) -> usize {
    match entry.phase {
      Phase::Established { .. } => self
        .options
        .snd_buf
        .saturating_sub(entry.unsent.len() + entry.wire.len() + entry.unacked),
      _ => 0,
    }
  }

  fn accepts(&self, bound: Ipv4Addr, dst: Ipv4Addr) -> bool {
    if dst.is_multicast() {
      return self.groups.contains(&dst) && (bound.is_unspecified() || bound == dst);
    }
    if dst.is_broadcast() {
      return true;
    }
    bound.is_unspecified() || bound == dst
  }

  fn route_datagram(&mut self, from: SocketAddrV4, dst: SocketAddrV4, payload: Bytes) {
    let recipients: Vec<u32> = self
      .udp
      .iter()
      .filter(|(_, e)| {
        e.local.is_some_and(|l| l.port() == dst.port() && self.accepts(*l.ip(), *dst.ip()))
      })
      .map(|(id, _)| *id)
      .collect();

    if recipients.is_empty() {
      trace!(%dst, "loopback: datagram has no receiver");
    }
    for id in recipients {
      self.push(Target::Udp(id), EventKind::Datagram { from, payload: payload.clone() });
    }
  }
}

impl NetStack for Loopback {
  fn poll(&mut self, _now: Instant, mailbox: &Mailbox) {
    let mut st = self.state.borrow_mut();
    st.complete_handshakes();
    st.transmit();
    st.acknowledge();
    st.deliver(mailbox);
  }

  fn netif(&self) -> Option<Netif> {
    self.state.borrow().netif
  }

  fn set_netif(&mut self, netif: Netif) {
    self.state.borrow_mut().netif = Some(netif);
  }

  fn link_up(&self) -> bool {
    self.state.borrow().link_up
  }

  fn tcp_new(&mut self) -> Option<TcpPcb> {
    let mut st = self.state.borrow_mut();
    let id = st.alloc_id()?;
    st.tcp.insert(
      id,
      TcpEntry {
        token: None,
        local: None,
        phase: Phase::Idle,
        unsent: Vec::new(),
        wire: Vec::new(),
        unacked: 0,
      },
    );
    Some(TcpPcb(id))
  }

  fn tcp_arg(&mut self, pcb: TcpPcb, token: Token) {
    if let Some(entry) = self.state.borrow_mut().tcp.get_mut(&pcb.0) {
      entry.token = Some(token);
    }
  }

  fn tcp_bind(&mut self, pcb: TcpPcb, local: SocketAddrV4) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    let in_use = st.tcp.iter().any(|(id, e)| {
      *id != pcb.0
        && matches!(e.phase, Phase::Listening)
        && e.local.is_some_and(|l| l.port() == local.port())
    });
    if in_use {
      return Err(StackError::InUse);
    }
    let entry = st.tcp.get_mut(&pcb.0).ok_or(StackError::Closed)?;
    entry.local = Some(local);
    Ok(())
  }

  fn tcp_listen(&mut self, pcb: TcpPcb) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    let entry = st.tcp.get_mut(&pcb.0).ok_or(StackError::Closed)?;
    match (&entry.phase, entry.local) {
      (Phase::Idle, Some(_)) => {
        entry.phase = Phase::Listening;
        Ok(())
      }
      _ => Err(StackError::Value),
    }
  }

  fn tcp_connect(&mut self, pcb: TcpPcb, remote: SocketAddrV4) -> Result<(), StackError> {
    if remote.ip().is_unspecified() || remote.port() == 0 {
      return Err(StackError::Value);
    }
    let mut st = self.state.borrow_mut();
    if !st.link_up {
      return Err(StackError::Interface);
    }
    let entry = st.tcp.get_mut(&pcb.0).ok_or(StackError::Closed)?;
    match entry.phase {
      Phase::Idle => {
        entry.phase = Phase::Connecting(remote);
        Ok(())
      }
      _ => Err(StackError::Value),
    }
  }

  fn tcp_sndbuf(&self, pcb: TcpPcb) -> usize {
    let st = self.state.borrow();
    st.tcp.get(&pcb.0).map_or(0, |entry| st.snd_capacity(entry))
  }

  fn tcp_write(&mut self, pcb: TcpPcb, data: &[u8]) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    if st.faults.mem_writes > 0 {
      st.faults.mem_writes -= 1;
      return Err(StackError::Mem);
    }
    if let Some(err) = st.faults.write.take() {
      return Err(err);
    }

    let entry = st.tcp.get(&pcb.0).ok_or(StackError::Closed)?;
    if !matches!(entry.phase, Phase::Established { .. }) {
      return Err(StackError::NotConnected);
    }
    if data.len() > st.snd_capacity(entry) {
      return Err(StackError::Mem);
    }
    if let Some(entry) = st.tcp.get_mut(&pcb.0) {
      entry.unsent.extend_from_slice(data);
    }
    Ok(())
  }

  fn tcp_output(&mut self, pcb: TcpPcb) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    if let Some(err) = st.faults.output.take() {
      return Err(err);
    }
    let entry = st.tcp.get_mut(&pcb.0).ok_or(StackError::Closed)?;
    if matches!(entry.phase, Phase::Established { .. }) && !entry.unsent.is_empty() {
      let unsent = std::mem::take(&mut entry.unsent);
      entry.wire.extend_from_slice(&unsent);
    }
    Ok(())
  }

  fn tcp_close(&mut self, pcb: TcpPcb) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    if let Some(err) = st.faults.close.take() {
      return Err(err);
    }
    let mut entry = st.tcp.remove(&pcb.0).ok_or(StackError::Closed)?;
    if let Phase::Established { peer } = entry.phase {
      entry.wire.append(&mut entry.unsent);
      if !entry.wire.is_empty() {
        st.push(Target::Tcp(peer), EventKind::Received(Bytes::from(entry.wire)));
      }
      st.push(Target::Tcp(peer), EventKind::PeerClosed);
    }
    Ok(())
  }

  fn tcp_abort(&mut self, pcb: TcpPcb) {
    let mut st = self.state.borrow_mut();
    let Some(entry) = st.tcp.remove(&pcb.0) else {
      return;
    };
    if let Phase::Established { peer } = entry.phase
      && let Some(peer_entry) = st.tcp.remove(&peer)
      && let Some(token) = peer_entry.token
    {
      st.push(Target::Token(token, Some(TcpPcb(peer))), EventKind::Errored(StackError::Reset));
    }
  }

  fn udp_new(&mut self) -> Option<UdpPcb> {
    let mut st = self.state.borrow_mut();
    let id = st.alloc_id()?;
    st.udp.insert(id, UdpEntry { token: None, local: None });
    Some(UdpPcb(id))
  }

  fn udp_bind(&mut self, pcb: UdpPcb, local: SocketAddrV4) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    let local = if local.port() == 0 {
      SocketAddrV4::new(*local.ip(), st.ephemeral_port())
    } else {
      local
    };
    let in_use = st.udp.iter().any(|(id, e)| {
      *id != pcb.0
        && e.local.is_some_and(|l| {
          l.port() == local.port()
            && (l.ip().is_unspecified() || local.ip().is_unspecified() || l.ip() == local.ip())
        })
    });
    if in_use {
      return Err(StackError::InUse);
    }
    let entry = st.udp.get_mut(&pcb.0).ok_or(StackError::Closed)?;
    entry.local = Some(local);
    Ok(())
  }

  fn udp_recv(&mut self, pcb: UdpPcb, token: Token) {
    if let Some(entry) = self.state.borrow_mut().udp.get_mut(&pcb.0) {
      entry.token = Some(token);
    }
  }

  fn udp_sendto(
    &mut self,
    pcb: UdpPcb,
    payload: Bytes,
    dst: SocketAddrV4,
  ) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    if let Some(err) = st.faults.sendto.take() {
      return Err(err);
    }
    if !st.link_up {
      return Err(StackError::Interface);
    }
    if dst.ip().is_unspecified() || dst.port() == 0 {
      return Err(StackError::Routing);
    }

    let bound = st.udp.get(&pcb.0).ok_or(StackError::Closed)?.local;
    let local = match bound {
      Some(local) => local,
      None => {
        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, st.ephemeral_port());
        if let Some(entry) = st.udp.get_mut(&pcb.0) {
          entry.local = Some(local);
        }
        local
      }
    };
    let source_ip =
      if local.ip().is_unspecified() { st.local_ip() } else { *local.ip() };

    st.route_datagram(SocketAddrV4::new(source_ip, local.port()), dst, payload);
    Ok(())
  }

  fn udp_remove(&mut self, pcb: UdpPcb) {
    self.state.borrow_mut().udp.remove(&pcb.0);
  }

  fn igmp_join(&mut self, _iface: Ipv4Addr, group: Ipv4Addr) -> Result<(), StackError> {
    let mut st = self.state.borrow_mut();
    if let Some(err) = st.faults.igmp.take() {
      return Err(err);
    }
    if !group.is_multicast() {
      return Err(StackError::Value);
    }
    st.groups.insert(group);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SlotStore;

  fn drain(mailbox: &Mailbox) -> Vec<Event> {
    std::iter::from_fn(|| mailbox.try_take()).collect()
  }

  fn tokens(n: usize) -> Vec<Token> {
    let mut store = SlotStore::with_capacity(n);
    (0..n).map(|_| store.try_insert(()).unwrap()).collect()
  }

  fn established(lo: &mut Loopback, mailbox: &Mailbox) -> (TcpPcb, TcpPcb, Vec<Token>) {
    let t = tokens(3);
    let listener = lo.tcp_new().unwrap();
    lo.tcp_arg(listener, t[0]);
    lo.tcp_bind(listener, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 80)).unwrap();
    lo.tcp_listen(listener).unwrap();

    let client = lo.tcp_new().unwrap();
    lo.tcp_arg(client, t[1]);
    lo.tcp_connect(client, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 80)).unwrap();
    lo.poll(Instant::now(), mailbox);

    let events = drain(mailbox);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0].kind, EventKind::Connected));
    let EventKind::Accepted(server) = events[1].kind else {
      panic!("expected accept, got {:?}", events[1]);
    };
    lo.tcp_arg(server, t[2]);
    (client, server, t)
  }

  #[test]
  fn test_handshake_and_transfer() {
    let mut lo = Loopback::new();
    let mailbox = Mailbox::bounded(16);
    let (client, _server, t) = established(&mut lo, &mailbox);

    lo.tcp_write(client, b"ping").unwrap();
    lo.tcp_output(client).unwrap();
    lo.poll(Instant::now(), &mailbox);

    let events = drain(&mailbox);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].token, t[2]);
    match &events[0].kind {
      EventKind::Received(data) => assert_eq!(&data[..], b"ping"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn test_refused_without_listener() {
    let mut lo = Loopback::new();
    let mailbox = Mailbox::bounded(4);
    let t = tokens(1);

    let client = lo.tcp_new().unwrap();
    lo.tcp_arg(client, t[0]);
    lo.tcp_connect(client, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9)).unwrap();
    lo.poll(Instant::now(), &mailbox);

    let events = drain(&mailbox);
    assert!(matches!(events[0].kind, EventKind::Errored(StackError::Reset)));
    assert_eq!(lo.open_pcbs(), 0, "errored pcb is freed by the stack");
  }

  #[test]
  fn test_capacity_released_by_acks() {
    let mut lo = Loopback::with_options(LoopbackOptions {
      snd_buf: 10,
      ack_per_poll: Some(3),
      ..Default::default()
    });
    let mailbox = Mailbox::bounded(16);
    let (client, _, _) = established(&mut lo, &mailbox);

    assert_eq!(lo.tcp_sndbuf(client), 10);
    assert_eq!(lo.tcp_write(client, &[0; 11]), Err(StackError::Mem));
    lo.tcp_write(client, &[0; 10]).unwrap();
    assert_eq!(lo.tcp_sndbuf(client), 0);

    lo.tcp_output(client).unwrap();
    lo.poll(Instant::now(), &mailbox);
    assert_eq!(lo.tcp_sndbuf(client), 3);
    lo.poll(Instant::now(), &mailbox);
    assert_eq!(lo.tcp_sndbuf(client), 6);
  }

  #[test]
  fn test_backpressure_keeps_order() {
    let mut lo = Loopback::new();
    let mailbox = Mailbox::bounded(1);
    let t = tokens(1);
    let pcb = lo.udp_new().unwrap();
    lo.udp_bind(pcb, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5000)).unwrap();
    lo.udp_recv(pcb, t[0]);

    for payload in [b"a", b"b", b"c"] {
      let from = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 7);
      lo.inject_datagram(from, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5000), payload);
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
      lo.poll(Instant::now(), &mailbox);
      for event in drain(&mailbox) {
        if let EventKind::Datagram { payload, .. } = event.kind {
          seen.push(payload[0]);
        }
      }
    }
    assert_eq!(seen, b"abc");
    assert_eq!(lo.pending_events(), 0);
  }

  #[test]
  fn test_multicast_requires_join() {
    let mut lo = Loopback::new();
    let mailbox = Mailbox::bounded(4);
    let t = tokens(1);
    let group = Ipv4Addr::new(239, 1, 2, 3);
    let pcb = lo.udp_new().unwrap();
    lo.udp_bind(pcb, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 6000)).unwrap();
    lo.udp_recv(pcb, t[0]);

    let from = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 6000);
    lo.inject_datagram(from, SocketAddrV4::new(group, 6000), b"x");
    lo.poll(Instant::now(), &mailbox);
    assert!(drain(&mailbox).is_empty());

    lo.igmp_join(Ipv4Addr::UNSPECIFIED, group).unwrap();
    lo.inject_datagram(from, SocketAddrV4::new(group, 6000), b"x");
    lo.poll(Instant::now(), &mailbox);
    assert_eq!(drain(&mailbox).len(), 1);
  }

  #[test]
  fn test_pcb_exhaustion() {
    let mut lo = Loopback::with_options(LoopbackOptions { max_pcbs: 2, ..Default::default() });
    assert!(lo.tcp_new().is_some());
    assert!(lo.udp_new().is_some());
    assert!(lo.tcp_new().is_none());
    assert!(lo.udp_new().is_none());
  }
}
