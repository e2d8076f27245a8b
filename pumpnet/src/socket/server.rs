use std::{
  collections::VecDeque,
  net::{Ipv4Addr, SocketAddrV4},
};

use tracing::{debug, trace, warn};

use super::TcpClient;
use crate::{
  Error, Net, Result,
  driver::SocketSlot,
  stack::{EventKind, TcpPcb, Token},
};

#[derive(Debug, Default)]
pub(crate) struct ListenerSlot {
  pub(crate) pcb: Option<TcpPcb>,
  /// Accepted connections not yet handed out, oldest first.
  pub(crate) backlog: VecDeque<Token>,
}

impl ListenerSlot {
  pub(crate) fn on_event(&mut self, kind: EventKind) {
    match kind {
      EventKind::Errored(err) => {
        warn!(pcb = ?self.pcb, %err, "listener errored");
        self.pcb = None;
      }
      other => trace!(event = ?other, "ignoring listener event"),
    }
  }
}

/// Listening stream socket. Connections it accepts start in
/// [`ConnState::Accepted`](super::ConnState::Accepted).
#[derive(Debug)]
pub struct TcpServer {
  net: Net,
  port: u16,
  token: Option<Token>,
}

impl TcpServer {
  pub fn new(net: &Net, port: u16) -> Self {
    Self { net: net.clone(), port, token: None }
  }

  /// Starts listening on every local address at the configured port.
  pub fn begin(&mut self) -> Result<()> {
    if self.token.is_some() {
      return Err(Error::AlreadyBound);
    }
    let token = self
      .net
      .with(|d| d.sockets.try_insert(SocketSlot::Listener(ListenerSlot::default())))
      .ok_or(Error::Exhausted)?;
    self.token = Some(token);

    let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port);
    let listening = self.net.with(|d| -> Result<()> {
      let pcb = d.stack.tcp_new().ok_or(Error::Exhausted)?;
      if let Some(SocketSlot::Listener(slot)) = d.sockets.get_mut(token) {
        slot.pcb = Some(pcb);
      }
      d.stack.tcp_bind(pcb, local)?;
      d.stack.tcp_listen(pcb)?;
      d.stack.tcp_arg(pcb, token);
      Ok(())
    });
    if let Err(err) = listening {
      warn!(%local, %err, "listen failed");
      self.stop();
      return Err(err);
    }

    debug!(?token, %local, "listening");
    self.net.pump();
    Ok(())
  }

  /// Pumps once and hands out the oldest accepted connection, if any.
  pub fn accept(&mut self) -> Option<TcpClient> {
    self.net.pump();
    let token = self.token?;
    let conn = self.net.with(|d| match d.sockets.get_mut(token) {
      Some(SocketSlot::Listener(slot)) => slot.backlog.pop_front(),
      _ => None,
    })?;
    Some(TcpClient::from_accepted(self.net.clone(), conn))
  }

  pub fn is_listening(&self) -> bool {
    let Some(token) = self.token else {
      return false;
    };
    self.net.with(|d| {
      matches!(d.sockets.get(token), Some(SocketSlot::Listener(slot)) if slot.pcb.is_some())
    })
  }

  pub fn local_port(&self) -> u16 {
    self.port
  }

  /// Closes the listener and every connection it accepted but never handed
  /// out.
  pub fn stop(&mut self) {
    if let Some(token) = self.token.take() {
      self.net.release(token);
    }
  }
}

impl Drop for TcpServer {
  fn drop(&mut self) {
    self.stop();
  }
}
