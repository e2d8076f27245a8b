//! Host name resolution used by the `*_host` variants of the socket calls.
//!
//! The actual lookup protocol lives outside this crate. A [`Resolve`]
//! implementation is installed on the [`Net`] with
//! [`Net::set_resolver`](crate::Net::set_resolver); it receives the `Net` so a
//! DNS client can open its own datagram socket on the same stack.

use std::{collections::HashMap, net::Ipv4Addr};

use crate::{Error, Net, Result};

pub trait Resolve {
  fn resolve(&mut self, net: &Net, host: &str) -> Result<Ipv4Addr>;
}

impl<F> Resolve for F
where
  F: FnMut(&str) -> Option<Ipv4Addr>,
{
  fn resolve(&mut self, _net: &Net, host: &str) -> Result<Ipv4Addr> {
    self(host).ok_or_else(|| Error::Resolve(host.to_owned()))
  }
}

/// Fixed name table, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct HostTable {
  entries: HashMap<String, Ipv4Addr>,
}

impl HostTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, host: &str, addr: Ipv4Addr) -> &mut Self {
    self.entries.insert(host.to_ascii_lowercase(), addr);
    self
  }
}

impl Resolve for HostTable {
  fn resolve(&mut self, _net: &Net, host: &str) -> Result<Ipv4Addr> {
    self
      .entries
      .get(&host.to_ascii_lowercase())
      .copied()
      .ok_or_else(|| Error::Resolve(host.to_owned()))
  }
}
