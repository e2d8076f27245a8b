use std::{fmt, net::Ipv4Addr, time::Duration};

use pumpnet::{Net, stack::Netif};
use tracing::{debug, info, warn};

use crate::{
  IfaceError, MacAddr, NetConfig,
  lease::{Lease, LeaseCheck, LeaseManager},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
  /// The interface has not been brought up.
  Unknown,
  On,
  Off,
}

/// A network interface: one [`Net`], its hardware address and, when
/// addresses come from a lease, the manager that holds it.
pub struct Interface {
  net: Net,
  mac: MacAddr,
  leases: Option<Box<dyn LeaseManager>>,
  up: bool,
}

impl fmt::Debug for Interface {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Interface")
      .field("mac", &self.mac)
      .field("up", &self.up)
      .field("netif", &self.netif())
      .field("dns", &self.net.dns_server())
      .field("leases", &self.leases.is_some())
      .finish()
  }
}

impl Interface {
  /// Creates an interface whose hardware address derives from `device_uid`.
  pub fn new(net: Net, device_uid: u32) -> Self {
    Self { net, mac: MacAddr::from_device_uid(device_uid), leases: None, up: false }
  }

  pub fn with_lease_manager<L>(mut self, manager: L) -> Self
  where
    L: LeaseManager + 'static,
  {
    self.leases = Some(Box::new(manager));
    self
  }

  pub fn net(&self) -> &Net {
    &self.net
  }

  pub fn mac(&self) -> MacAddr {
    self.mac
  }

  /// Overrides the hardware address. An all-zero address is ignored.
  pub fn set_mac(&mut self, mac: MacAddr) {
    if !mac.is_unset() {
      self.mac = mac;
    }
  }

  /// Brings the interface up with a leased address.
  pub fn begin_dhcp(
    &mut self,
    timeout: Duration,
    response_timeout: Duration,
  ) -> Result<Lease, IfaceError> {
    let manager = self.leases.as_mut().ok_or(IfaceError::NoLeaseManager)?;
    self.up = true;

    debug!(mac = %self.mac, ?timeout, "requesting lease");
    let lease = manager.acquire(&self.net, self.mac, timeout, response_timeout)?;
    apply_lease(&self.net, &lease);
    info!(address = %lease.address, lease = ?lease.duration, "lease acquired");
    Ok(lease)
  }

  /// Brings the interface up with a fixed address.
  pub fn begin_static(&mut self, config: NetConfig) {
    if let Some(mac) = config.mac {
      self.set_mac(mac);
    }
    let resolved = config.resolve();
    self.net.with_stack(|stack| stack.set_netif(resolved.netif()));
    self.net.set_dns_server(resolved.dns);
    self.up = true;

    if let Some(manager) = self.leases.as_mut() {
      manager.inform_manual(&self.net, resolved.address);
    }
    info!(address = %resolved.address, gateway = %resolved.gateway, "static address configured");
  }

  /// Lets the lease manager renew or rebind; call it periodically.
  pub fn maintain(&mut self) -> LeaseCheck {
    let Some(manager) = self.leases.as_mut() else {
      return LeaseCheck::Unchanged;
    };
    let check = manager.check(&self.net);
    if check.refreshed() {
      if let Some(lease) = manager.lease() {
        apply_lease(&self.net, &lease);
        debug!(?check, address = %lease.address, "lease refreshed");
      }
    } else if check.failed() {
      warn!(?check, "lease refresh failed, will retry");
    }
    check
  }

  /// Runs the stack once. Useful inside long-running loops that do no
  /// socket calls of their own.
  pub fn schedule(&self) {
    self.net.pump();
  }

  pub fn link_status(&self) -> LinkStatus {
    if !self.up {
      return LinkStatus::Unknown;
    }
    if self.net.with_stack(|stack| stack.link_up()) { LinkStatus::On } else { LinkStatus::Off }
  }

  fn netif(&self) -> Option<Netif> {
    self.net.with_stack(|stack| stack.netif())
  }

  pub fn local_ip(&self) -> Ipv4Addr {
    self.netif().map_or(Ipv4Addr::UNSPECIFIED, |n| n.address)
  }

  pub fn subnet_mask(&self) -> Ipv4Addr {
    self.netif().map_or(Ipv4Addr::UNSPECIFIED, |n| n.netmask)
  }

  pub fn gateway_ip(&self) -> Ipv4Addr {
    self.netif().map_or(Ipv4Addr::UNSPECIFIED, |n| n.gateway)
  }

  pub fn dns_server_ip(&self) -> Ipv4Addr {
    self.net.dns_server().unwrap_or(Ipv4Addr::UNSPECIFIED)
  }
}

fn apply_lease(net: &Net, lease: &Lease) {
  let netif = Netif { address: lease.address, netmask: lease.subnet, gateway: lease.gateway };
  net.with_stack(|stack| stack.set_netif(netif));
  if let Some(dns) = lease.dns {
    net.set_dns_server(dns);
  }
}
