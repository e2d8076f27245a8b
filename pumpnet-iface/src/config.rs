use std::net::Ipv4Addr;

use pumpnet::stack::Netif;

use crate::MacAddr;

/// Static interface configuration.
///
/// Only `address` is required. Missing fields are derived by
/// [`resolve`](Self::resolve):
/// - `subnet`: `255.255.255.0`
/// - `gateway`: host `.1` of the address' network
/// - `dns`: the gateway
///
/// ```
/// use std::net::Ipv4Addr;
/// use pumpnet_iface::NetConfig;
///
/// let resolved = NetConfig::new(Ipv4Addr::new(192, 168, 7, 40)).resolve();
/// assert_eq!(resolved.gateway, Ipv4Addr::new(192, 168, 7, 1));
/// assert_eq!(resolved.dns, resolved.gateway);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetConfig {
  #[cfg_attr(feature = "serde", serde(default))]
  pub mac: Option<MacAddr>,
  pub address: Ipv4Addr,
  #[cfg_attr(feature = "serde", serde(default))]
  pub subnet: Option<Ipv4Addr>,
  #[cfg_attr(feature = "serde", serde(default))]
  pub gateway: Option<Ipv4Addr>,
  #[cfg_attr(feature = "serde", serde(default))]
  pub dns: Option<Ipv4Addr>,
}

/// A [`NetConfig`] with every field filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedConfig {
  pub address: Ipv4Addr,
  pub subnet: Ipv4Addr,
  pub gateway: Ipv4Addr,
  pub dns: Ipv4Addr,
}

impl NetConfig {
  pub const DEFAULT_SUBNET: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

  pub fn new(address: Ipv4Addr) -> Self {
    Self { mac: None, address, subnet: None, gateway: None, dns: None }
  }

  pub fn with_mac(mut self, mac: MacAddr) -> Self {
    self.mac = Some(mac);
    self
  }

  pub fn with_subnet(mut self, subnet: Ipv4Addr) -> Self {
    self.subnet = Some(subnet);
    self
  }

  pub fn with_gateway(mut self, gateway: Ipv4Addr) -> Self {
    self.gateway = Some(gateway);
    self
  }

  pub fn with_dns(mut self, dns: Ipv4Addr) -> Self {
    self.dns = Some(dns);
    self
  }

  pub fn resolve(&self) -> ResolvedConfig {
    let subnet = self.subnet.unwrap_or(Self::DEFAULT_SUBNET);
    let gateway = self.gateway.unwrap_or_else(|| {
      let network = self.address.to_bits() & subnet.to_bits();
      Ipv4Addr::from_bits(network | 1)
    });
    let dns = self.dns.unwrap_or(gateway);
    ResolvedConfig { address: self.address, subnet, gateway, dns }
  }
}

impl ResolvedConfig {
  pub fn netif(&self) -> Netif {
    Netif { address: self.address, netmask: self.subnet, gateway: self.gateway }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_explicit_fields_win() {
    let resolved = NetConfig::new(Ipv4Addr::new(10, 1, 2, 3))
      .with_subnet(Ipv4Addr::new(255, 0, 0, 0))
      .with_gateway(Ipv4Addr::new(10, 0, 0, 254))
      .with_dns(Ipv4Addr::new(8, 8, 8, 8))
      .resolve();
    assert_eq!(resolved.subnet, Ipv4Addr::new(255, 0, 0, 0));
    assert_eq!(resolved.gateway, Ipv4Addr::new(10, 0, 0, 254));
    assert_eq!(resolved.dns, Ipv4Addr::new(8, 8, 8, 8));
  }

  #[test]
  fn test_gateway_follows_subnet() {
    let resolved = NetConfig::new(Ipv4Addr::new(172, 16, 9, 77))
      .with_subnet(Ipv4Addr::new(255, 255, 0, 0))
      .resolve();
    assert_eq!(resolved.gateway, Ipv4Addr::new(172, 16, 0, 1));
    assert_eq!(resolved.dns, Ipv4Addr::new(172, 16, 0, 1));
  }

  #[test]
  fn test_default_subnet() {
    let resolved = NetConfig::new(Ipv4Addr::new(192, 168, 0, 20)).resolve();
    assert_eq!(resolved.subnet, NetConfig::DEFAULT_SUBNET);
    assert_eq!(resolved.netif().gateway, Ipv4Addr::new(192, 168, 0, 1));
  }
}
