//! The scheduler pump.
//!
//! [`Net`] owns the native stack and the arena of socket state. One call to
//! [`Net::pump`] lets the stack run its timers and post callbacks, then applies
//! every posted [`Event`] to the socket its token names, in posting order.
//! Events for tokens that no longer exist are dropped, and any resource they
//! carry (received chunks, accepted connections) is released.

use std::{
  cell::RefCell,
  fmt,
  net::Ipv4Addr,
  rc::Rc,
  time::Instant,
};

use tracing::{trace, warn};

use crate::{
  Config, Error, Result,
  resolve::Resolve,
  socket::{ListenerSlot, TcpSlot, UdpSlot},
  stack::{Event, EventKind, Mailbox, NetStack, TcpPcb, Token},
  store::SlotStore,
};

/// Callback run after a pump when datagram data has landed.
pub(crate) type Hook = Rc<dyn Fn()>;

pub(crate) enum SocketSlot {
  Tcp(TcpSlot),
  Listener(ListenerSlot),
  Udp(UdpSlot),
}

pub(crate) struct Driver {
  pub(crate) stack: Box<dyn NetStack>,
  pub(crate) sockets: SlotStore<SocketSlot>,
  mailbox: Mailbox,
  config: Config,
  dns_server: Option<Ipv4Addr>,
}

impl Driver {
  fn pump(&mut self, hooks: &mut Vec<Hook>) {
    self.stack.poll(Instant::now(), &self.mailbox);

    while let Some(event) = self.mailbox.try_take() {
      self.dispatch(event, hooks);
    }
  }

  fn dispatch(&mut self, event: Event, hooks: &mut Vec<Hook>) {
    let Event { token, pcb, kind } = event;

    if let EventKind::Accepted(pcb) = kind {
      self.accept(token, pcb);
      return;
    }

    match self.sockets.get_mut(token) {
      Some(SocketSlot::Tcp(conn)) => conn.on_event(pcb, kind, &mut *self.stack),
      Some(SocketSlot::Udp(endpoint)) => {
        if let Some(hook) = endpoint.on_event(kind) {
          hooks.push(hook);
        }
      }
      Some(SocketSlot::Listener(listener)) => listener.on_event(kind),
      None => trace!(?token, event = ?kind, "dropping event for released socket"),
    }
  }

  fn accept(&mut self, listener: Token, pcb: TcpPcb) {
    if !matches!(self.sockets.get(listener), Some(SocketSlot::Listener(_))) {
      trace!(?listener, ?pcb, "listener gone, aborting accepted connection");
      self.stack.tcp_abort(pcb);
      return;
    }

    let Some(conn) = self.sockets.try_insert(SocketSlot::Tcp(TcpSlot::accepted(pcb))) else {
      warn!(?pcb, "no free socket slot for accepted connection");
      self.stack.tcp_abort(pcb);
      return;
    };

    self.stack.tcp_arg(pcb, conn);
    if let Some(SocketSlot::Listener(slot)) = self.sockets.get_mut(listener) {
      slot.backlog.push_back(conn);
    }
    trace!(?listener, ?conn, "connection accepted");
  }

  /// Frees the slot behind `token` and the native resources it still holds.
  pub(crate) fn release(&mut self, token: Token) {
    match self.sockets.remove(token) {
      Some(SocketSlot::Tcp(slot)) => {
        if let Some(pcb) = slot.pcb
          && self.stack.tcp_close(pcb).is_err()
        {
          self.stack.tcp_abort(pcb);
        }
      }
      Some(SocketSlot::Listener(slot)) => {
        if let Some(pcb) = slot.pcb
          && self.stack.tcp_close(pcb).is_err()
        {
          self.stack.tcp_abort(pcb);
        }
        for conn in slot.backlog {
          self.release(conn);
        }
      }
      Some(SocketSlot::Udp(slot)) => {
        if let Some(pcb) = slot.pcb {
          self.stack.udp_remove(pcb);
        }
      }
      None => return,
    }
    trace!(?token, open = self.sockets.len(), "socket released");
  }
}

struct Shared {
  driver: RefCell<Driver>,
  resolver: RefCell<Option<Box<dyn Resolve>>>,
}

/// Handle to a network stack and the sockets opened on it.
///
/// Cloning is cheap; every clone drives the same stack. A `Net` is strictly
/// single-threaded: the stack only makes progress inside [`pump`](Net::pump),
/// which every blocking socket call invokes in a loop.
#[derive(Clone)]
pub struct Net {
  shared: Rc<Shared>,
}

impl fmt::Debug for Net {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.shared.driver.try_borrow() {
      Ok(driver) => f
        .debug_struct("Net")
        .field("open_sockets", &driver.sockets.len())
        .field("max_sockets", &driver.sockets.capacity())
        .field("config", &driver.config)
        .finish(),
      Err(_) => f.write_str("Net { <pumping> }"),
    }
  }
}

impl Net {
  pub fn new<S>(stack: S) -> Self
  where
    S: NetStack + 'static,
  {
    Self::with_config(stack, Config::default())
  }

  pub fn with_config<S>(stack: S, config: Config) -> Self
  where
    S: NetStack + 'static,
  {
    let driver = Driver {
      stack: Box::new(stack),
      sockets: SlotStore::with_capacity(config.max_sockets),
      mailbox: Mailbox::bounded(config.mailbox_capacity),
      config,
      dns_server: None,
    };
    Self {
      shared: Rc::new(Shared {
        driver: RefCell::new(driver),
        resolver: RefCell::new(None),
      }),
    }
  }

  /// Runs one scheduler iteration: stack timers, callback delivery, then any
  /// data-arrival hooks that fired.
  ///
  /// Never blocks.
  pub fn pump(&self) {
    let mut hooks = Vec::new();
    self.shared.driver.borrow_mut().pump(&mut hooks);
    for hook in hooks {
      hook();
    }
  }

  pub fn config(&self) -> Config {
    self.shared.driver.borrow().config
  }

  /// Sockets currently holding a slot.
  pub fn open_sockets(&self) -> usize {
    self.shared.driver.borrow().sockets.len()
  }

  /// Address of the stack's interface, unspecified before it is configured.
  pub fn local_addr(&self) -> Ipv4Addr {
    self.with(|d| d.stack.netif().map_or(Ipv4Addr::UNSPECIFIED, |n| n.address))
  }

  pub fn dns_server(&self) -> Option<Ipv4Addr> {
    self.shared.driver.borrow().dns_server
  }

  pub fn set_dns_server(&self, addr: Ipv4Addr) {
    self.shared.driver.borrow_mut().dns_server = Some(addr);
  }

  pub fn set_resolver<R>(&self, resolver: R)
  where
    R: Resolve + 'static,
  {
    *self.shared.resolver.borrow_mut() = Some(Box::new(resolver));
  }

  /// Resolves `host`. Dotted-quad literals never reach the resolver.
  pub fn resolve(&self, host: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
      return Ok(addr);
    }

    // Taken out for the call so a resolver can open sockets on this Net.
    let Some(mut resolver) = self.shared.resolver.borrow_mut().take() else {
      return Err(Error::Resolve(host.to_owned()));
    };
    let result = resolver.resolve(self, host);

    let mut slot = self.shared.resolver.borrow_mut();
    if slot.is_none() {
      *slot = Some(resolver);
    }
    result
  }

  /// Direct access to the native stack, e.g. for interface configuration.
  pub fn with_stack<R>(&self, f: impl FnOnce(&mut dyn NetStack) -> R) -> R {
    self.with(|d| f(&mut *d.stack))
  }

  pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Driver) -> R) -> R {
    f(&mut self.shared.driver.borrow_mut())
  }

  /// Releases a socket slot from a destructor without risking a panic.
  pub(crate) fn release(&self, token: Token) {
    match self.shared.driver.try_borrow_mut() {
      Ok(mut driver) => driver.release(token),
      Err(_) => warn!(?token, "driver busy, leaking socket slot"),
    }
  }

  pub(crate) fn same(&self, other: &Net) -> bool {
    Rc::ptr_eq(&self.shared, &other.shared)
  }
}
