use std::time::Duration;

/// Largest UDP payload that fits an IPv4 datagram.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Tunables for a [`Net`](crate::Net).
///
/// ```
/// use std::time::Duration;
/// use pumpnet::Config;
///
/// let config = Config::default()
///   .with_max_sockets(8)
///   .with_connect_timeout(Duration::from_millis(250));
/// assert_eq!(config.max_sockets, 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Sockets (clients, servers, datagram endpoints) that may be open at once.
  pub max_sockets: usize,
  /// Events the stack may queue for sockets between two drains.
  pub mailbox_capacity: usize,
  /// Default for [`TcpClient::set_connection_timeout`](crate::TcpClient::set_connection_timeout).
  pub connect_timeout: Duration,
  /// Upper bound on a datagram assembled with `UdpSocket::write`.
  pub max_datagram: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      max_sockets: 16,
      mailbox_capacity: 64,
      connect_timeout: Duration::from_millis(1000),
      max_datagram: MAX_UDP_PAYLOAD,
    }
  }
}

impl Config {
  pub fn with_max_sockets(mut self, n: usize) -> Self {
    self.max_sockets = n;
    self
  }

  pub fn with_mailbox_capacity(mut self, n: usize) -> Self {
    self.mailbox_capacity = n;
    self
  }

  pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
    self.connect_timeout = timeout;
    self
  }

  pub fn with_max_datagram(mut self, n: usize) -> Self {
    self.max_datagram = n;
    self
  }
}
