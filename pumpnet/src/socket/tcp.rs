use std::{
  fmt, io,
  net::{Ipv4Addr, SocketAddrV4},
  time::{Duration, Instant},
};

use tracing::{debug, trace, warn};

use crate::{
  Error, Net, Result,
  buf::RecvBuf,
  driver::SocketSlot,
  stack::{EventKind, NetStack, StackError, TcpPcb, Token},
};

/// Lifecycle of a stream connection.
///
/// `Connected` and `Accepted` are only entered from `None`. `Closing` is a
/// sink: only a fresh [`TcpClient::connect`] replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
  #[default]
  None,
  Connected,
  Accepted,
  Closing,
}

impl ConnState {
  /// `Connected` or `Accepted`: the pcb is live and carries data.
  pub fn is_established(self) -> bool {
    matches!(self, Self::Connected | Self::Accepted)
  }
}

/// Per-connection state owned by the driver and updated by stack events.
///
/// Whenever `state` is `Closing` the pcb has already been released.
#[derive(Debug, Default)]
pub(crate) struct TcpSlot {
  pub(crate) pcb: Option<TcpPcb>,
  pub(crate) state: ConnState,
  pub(crate) rx: RecvBuf,
  pub(crate) last_error: Option<StackError>,
}

impl TcpSlot {
  pub(crate) fn accepted(pcb: TcpPcb) -> Self {
    Self { pcb: Some(pcb), state: ConnState::Accepted, ..Default::default() }
  }

  /// Applies an event raised by `from`. Events from any pcb other than the
  /// current one belong to an earlier connection on this handle and are
  /// dropped.
  pub(crate) fn on_event(
    &mut self,
    from: Option<TcpPcb>,
    kind: EventKind,
    stack: &mut dyn NetStack,
  ) {
    if from.is_none() || from != self.pcb {
      trace!(?from, pcb = ?self.pcb, event = ?kind, "dropping event for previous pcb");
      return;
    }
    match kind {
      EventKind::Connected if self.state == ConnState::None => {
        self.state = ConnState::Connected;
      }
      EventKind::Received(chunk) => self.rx.push(chunk),
      EventKind::PeerClosed => {
        trace!(pcb = ?self.pcb, buffered = self.rx.len(), "peer closed");
        if let Some(pcb) = self.pcb.take()
          && stack.tcp_close(pcb).is_err()
        {
          stack.tcp_abort(pcb);
        }
        self.state = ConnState::Closing;
      }
      EventKind::Errored(err) => {
        debug!(pcb = ?self.pcb, ?err, "connection errored");
        self.pcb = None;
        self.state = ConnState::Closing;
        self.last_error = Some(err);
      }
      other => trace!(state = ?self.state, event = ?other, "ignoring stream event"),
    }
  }

  /// Requests a graceful close unless the connection is already closing.
  pub(crate) fn close(&mut self, stack: &mut dyn NetStack) {
    if self.state == ConnState::Closing {
      return;
    }
    if let Some(pcb) = self.pcb.take()
      && stack.tcp_close(pcb).is_err()
    {
      stack.tcp_abort(pcb);
    }
    self.state = ConnState::Closing;
  }
}

/// Blocking stream client.
///
/// The handle is allocated lazily on the first [`connect`](Self::connect) and
/// released when the client is dropped. Every blocking call pumps the owning
/// [`Net`] until its condition holds.
pub struct TcpClient {
  net: Net,
  token: Option<Token>,
  timeout: Duration,
}

impl fmt::Debug for TcpClient {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TcpClient")
      .field("token", &self.token)
      .field("status", &self.status())
      .finish()
  }
}

impl TcpClient {
  pub fn new(net: &Net) -> Self {
    Self { net: net.clone(), token: None, timeout: net.config().connect_timeout }
  }

  pub(crate) fn from_accepted(net: Net, token: Token) -> Self {
    let timeout = net.config().connect_timeout;
    Self { net, token: Some(token), timeout }
  }

  fn slot<R>(&self, f: impl FnOnce(&mut TcpSlot, &mut dyn NetStack) -> R) -> Option<R> {
    let token = self.token?;
    self.net.with(|d| match d.sockets.get_mut(token) {
      Some(SocketSlot::Tcp(slot)) => Some(f(slot, &mut *d.stack)),
      _ => None,
    })
  }

  fn handle(&mut self) -> Result<Token> {
    if let Some(token) = self.token
      && self.net.with(|d| d.sockets.contains(token))
    {
      return Ok(token);
    }
    let token = self
      .net
      .with(|d| d.sockets.try_insert(SocketSlot::Tcp(TcpSlot::default())))
      .ok_or(Error::Exhausted)?;
    trace!(?token, "stream handle allocated");
    self.token = Some(token);
    Ok(token)
  }

  /// Connects to `ip:port`, pumping until the handshake completes, the
  /// connection closes, or the connection timeout elapses.
  ///
  /// Any failure leaves the client stopped. Reconnecting reuses the handle
  /// with a fresh control block.
  pub fn connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<()> {
    let remote = SocketAddrV4::new(ip, port);
    let token = self.handle()?;

    let started = self.net.with(|d| -> Result<()> {
      let Some(SocketSlot::Tcp(slot)) = d.sockets.get_mut(token) else {
        return Err(Error::NotOpen);
      };
      if let Some(old) = slot.pcb.take()
        && d.stack.tcp_close(old).is_err()
      {
        d.stack.tcp_abort(old);
      }
      slot.state = ConnState::None;
      slot.rx.clear();
      slot.last_error = None;

      let pcb = d.stack.tcp_new().ok_or(Error::Exhausted)?;
      slot.pcb = Some(pcb);
      d.stack.tcp_arg(pcb, token);
      d.stack.tcp_connect(pcb, remote).map_err(Error::from)
    });
    if let Err(err) = started {
      warn!(%remote, %err, "connect could not start");
      self.stop();
      return Err(err);
    }

    debug!(?token, %remote, timeout = ?self.timeout, "connecting");
    let begun = Instant::now();
    loop {
      self.net.pump();
      match self.status() {
        ConnState::None => {
          if begun.elapsed() >= self.timeout {
            warn!(%remote, timeout = ?self.timeout, "connect timed out");
            self.stop();
            return Err(Error::TimedOut(self.timeout));
          }
        }
        ConnState::Closing => {
          let cause = self.last_error();
          debug!(%remote, ?cause, "connect refused");
          self.stop();
          return Err(Error::Refused(cause));
        }
        state => {
          debug!(%remote, ?state, "connected");
          return Ok(());
        }
      }
    }
  }

  /// [`connect`](Self::connect) to a host name, resolved through the
  /// [`Net`]'s resolver.
  pub fn connect_host(&mut self, host: &str, port: u16) -> Result<()> {
    let ip = self.net.resolve(host)?;
    self.connect(ip, port)
  }

  /// Writes all of `buf`, pumping while the send buffer is full.
  ///
  /// Returns `Ok(0)` without doing anything if `buf` is empty or the
  /// connection is not established. A hard stack error ends the call with
  /// [`Error::Write`], which records how much was accepted before it.
  pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    let writable = self.slot(|slot, _| slot.state.is_established() && slot.pcb.is_some());
    if writable != Some(true) {
      return Ok(0);
    }

    let mut written = 0;
    while written < buf.len() {
      // Errors carry the bytes the stack took before failing.
      let step = self.slot(|slot, stack| -> std::result::Result<usize, (usize, StackError)> {
        let pcb = slot.pcb.ok_or((0, StackError::Closed))?;
        let chunk = (buf.len() - written).min(stack.tcp_sndbuf(pcb));
        let mut accepted = 0;
        if chunk > 0 {
          match stack.tcp_write(pcb, &buf[written..written + chunk]) {
            Ok(()) => accepted = chunk,
            Err(err) if err.is_transient() => {}
            Err(err) => {
              slot.last_error = Some(err);
              return Err((0, err));
            }
          }
        }
        if let Err(err) = stack.tcp_output(pcb) {
          slot.last_error = Some(err);
          return Err((accepted, err));
        }
        Ok(accepted)
      });

      match step.unwrap_or(Err((0, StackError::Closed))) {
        Ok(n) => written += n,
        Err((n, source)) => {
          written += n;
          warn!(written, total = buf.len(), %source, "write aborted");
          return Err(Error::Write { written, source });
        }
      }
      self.net.pump();
    }
    Ok(written)
  }

  /// Writes a single byte; see [`write`](Self::write).
  pub fn write_byte(&mut self, byte: u8) -> Result<usize> {
    self.write(&[byte])
  }

  /// Pumps once and returns the number of buffered bytes.
  pub fn available(&self) -> usize {
    self.net.pump();
    self.slot(|slot, _| slot.rx.len()).unwrap_or(0)
  }

  /// Reads up to `buf.len()` buffered bytes; `None` when nothing is buffered.
  pub fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
    self
      .slot(|slot, _| (!slot.rx.is_empty()).then(|| slot.rx.consume(buf)))
      .flatten()
  }

  /// Consumes one buffered byte; `None` when nothing is buffered.
  pub fn read_byte(&mut self) -> Option<u8> {
    self.slot(|slot, _| slot.rx.consume_byte()).flatten()
  }

  /// Next buffered byte without consuming it.
  pub fn peek(&self) -> Option<u8> {
    if self.available() == 0 {
      return None;
    }
    self.slot(|slot, _| slot.rx.peek(0)).flatten()
  }

  /// Pushes pending output onto the wire and pumps once.
  pub fn flush(&mut self) {
    let flushed = self.slot(|slot, stack| slot.pcb.map(|pcb| stack.tcp_output(pcb)));
    if let Some(Some(result)) = flushed {
      if let Err(err) = result {
        debug!(%err, "flush failed");
      }
      self.net.pump();
    }
  }

  /// Requests a graceful close. Stopping a closed client does nothing.
  pub fn stop(&mut self) {
    self.slot(|slot, stack| slot.close(stack));
  }

  /// True while established, and after a close while buffered data remains.
  pub fn connected(&self) -> bool {
    let state = self.status();
    state.is_established() || (state == ConnState::Closing && self.available() > 0)
  }

  pub fn status(&self) -> ConnState {
    self.slot(|slot, _| slot.state).unwrap_or_default()
  }

  /// Whether a handle exists and is not closing.
  pub fn is_valid(&self) -> bool {
    self.slot(|slot, _| slot.state != ConnState::Closing).unwrap_or(false)
  }

  /// Hard error that drove the connection to closing, if any.
  pub fn last_error(&self) -> Option<StackError> {
    self.slot(|slot, _| slot.last_error).flatten()
  }

  pub fn connection_timeout(&self) -> Duration {
    self.timeout
  }

  pub fn set_connection_timeout(&mut self, timeout: Duration) {
    self.timeout = timeout;
  }

  fn pcb(&self) -> Option<TcpPcb> {
    self.slot(|slot, _| slot.pcb).flatten()
  }
}

impl PartialEq for TcpClient {
  fn eq(&self, other: &Self) -> bool {
    self.net.same(&other.net) && self.token == other.token && self.pcb() == other.pcb()
  }
}

impl Drop for TcpClient {
  fn drop(&mut self) {
    if let Some(token) = self.token.take() {
      self.net.release(token);
    }
  }
}

impl io::Read for TcpClient {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    if self.token.is_none() {
      return Err(io::ErrorKind::NotConnected.into());
    }
    if self.available() == 0 {
      return match self.status() {
        ConnState::Closing => Ok(0),
        _ => Err(io::ErrorKind::WouldBlock.into()),
      };
    }
    Ok(TcpClient::read(self, buf).unwrap_or(0))
  }
}

impl io::Write for TcpClient {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    match TcpClient::write(self, buf)? {
      0 if !buf.is_empty() => Err(io::ErrorKind::NotConnected.into()),
      n => Ok(n),
    }
  }

  fn flush(&mut self) -> io::Result<()> {
    TcpClient::flush(self);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use super::*;
  use crate::stack::loopback::Loopback;

  fn connecting(pcb: TcpPcb) -> TcpSlot {
    TcpSlot { pcb: Some(pcb), ..Default::default() }
  }

  #[test]
  fn test_state_leaves_none_only_once() {
    let mut lo = Loopback::new();
    let pcb = TcpPcb(1);
    let mut slot = TcpSlot::accepted(pcb);
    slot.on_event(Some(pcb), EventKind::Connected, &mut lo);
    assert_eq!(slot.state, ConnState::Accepted);

    let mut slot = connecting(pcb);
    slot.on_event(Some(pcb), EventKind::Connected, &mut lo);
    assert_eq!(slot.state, ConnState::Connected);
  }

  #[test]
  fn test_closing_is_terminal() {
    let mut lo = Loopback::new();
    let pcb = TcpPcb(2);
    let mut slot = connecting(pcb);
    slot.on_event(Some(pcb), EventKind::Errored(StackError::Reset), &mut lo);
    assert_eq!(slot.state, ConnState::Closing);
    assert_eq!(slot.last_error, Some(StackError::Reset));

    slot.on_event(Some(pcb), EventKind::Connected, &mut lo);
    assert_eq!(slot.state, ConnState::Closing);
    slot.close(&mut lo);
    assert_eq!(slot.state, ConnState::Closing);
  }

  #[test]
  fn test_events_from_previous_pcb_are_dropped() {
    let mut lo = Loopback::new();
    let (old, current) = (TcpPcb(3), TcpPcb(4));
    let mut slot = connecting(current);

    slot.on_event(Some(old), EventKind::Received(Bytes::from_static(b"stale")), &mut lo);
    slot.on_event(Some(old), EventKind::PeerClosed, &mut lo);
    slot.on_event(None, EventKind::Errored(StackError::Reset), &mut lo);
    assert_eq!(slot.state, ConnState::None);
    assert_eq!(slot.pcb, Some(current));
    assert!(slot.rx.is_empty());
    assert_eq!(slot.last_error, None);

    slot.on_event(Some(current), EventKind::Connected, &mut lo);
    assert_eq!(slot.state, ConnState::Connected);
  }

  #[test]
  fn test_data_survives_peer_close() {
    let mut lo = Loopback::new();
    let pcb = TcpPcb(5);
    let mut slot = connecting(pcb);
    slot.on_event(Some(pcb), EventKind::Connected, &mut lo);
    slot.on_event(Some(pcb), EventKind::Received(Bytes::from_static(b"tail")), &mut lo);
    slot.on_event(Some(pcb), EventKind::PeerClosed, &mut lo);

    assert_eq!(slot.state, ConnState::Closing);
    assert!(slot.pcb.is_none());
    assert_eq!(slot.rx.len(), 4);
  }

  #[test]
  fn test_unopened_client() {
    let net = Net::new(Loopback::new());
    let mut client = TcpClient::new(&net);

    assert_eq!(client.status(), ConnState::None);
    assert!(!client.is_valid());
    assert!(!client.connected());
    assert_eq!(client.available(), 0);
    assert_eq!(client.read_byte(), None);
    assert_eq!(client.peek(), None);
    assert_eq!(client.write(b"x").ok(), Some(0));
    client.flush();
    client.stop();
    assert_eq!(net.open_sockets(), 0);
  }
}
