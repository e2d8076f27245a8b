//! Dynamic address configuration.
//!
//! The lease protocol itself (DHCP or otherwise) is supplied by the
//! application as a [`LeaseManager`]. The [`Interface`](crate::Interface)
//! owns it and drives it from `begin_dhcp` and `maintain`.

use std::{net::Ipv4Addr, time::Duration};

use pumpnet::Net;

use crate::MacAddr;

#[derive(thiserror::Error, Debug)]
pub enum LeaseError {
  #[error("no lease offered within {0:?}")]
  TimedOut(Duration),
  #[error("lease request declined")]
  Declined,
  #[error(transparent)]
  Net(#[from] pumpnet::Error),
}

/// An address assignment and how long it is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
  pub address: Ipv4Addr,
  pub subnet: Ipv4Addr,
  pub gateway: Ipv4Addr,
  pub dns: Option<Ipv4Addr>,
  pub duration: Duration,
}

/// Outcome of a periodic lease check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseCheck {
  /// Nothing was due.
  Unchanged,
  RenewOk,
  RenewFailed,
  RebindOk,
  RebindFailed,
}

impl LeaseCheck {
  /// The lease was refreshed and may carry new addresses.
  pub fn refreshed(self) -> bool {
    matches!(self, Self::RenewOk | Self::RebindOk)
  }

  pub fn failed(self) -> bool {
    matches!(self, Self::RenewFailed | Self::RebindFailed)
  }
}

pub trait LeaseManager {
  /// Obtains a lease, pumping `net` for at most `timeout`. Each exchange waits
  /// at most `response_timeout` for an answer.
  fn acquire(
    &mut self,
    net: &Net,
    mac: MacAddr,
    timeout: Duration,
    response_timeout: Duration,
  ) -> Result<Lease, LeaseError>;

  /// Renews or rebinds when the current lease is due.
  fn check(&mut self, net: &Net) -> LeaseCheck;

  fn lease(&self) -> Option<Lease>;

  /// Announces a manually configured address so servers avoid handing it
  /// out.
  fn inform_manual(&mut self, net: &Net, address: Ipv4Addr);
}
