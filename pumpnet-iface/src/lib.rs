#![cfg_attr(docsrs, feature(doc_cfg))]

//! # pumpnet-iface - Interface bring-up for pumpnet
//!
//! Everything a [`pumpnet::Net`] needs before sockets are useful: a hardware
//! address, an interface address (fixed or leased), a DNS server and a link to
//! report on.
//!
//! ```
//! use std::net::Ipv4Addr;
//! use pumpnet::{Net, stack::loopback::Loopback};
//! use pumpnet_iface::{Interface, LinkStatus, NetConfig};
//!
//! let mut iface = Interface::new(Net::new(Loopback::new()), 0x0012_3456);
//! assert_eq!(iface.link_status(), LinkStatus::Unknown);
//!
//! iface.begin_static(NetConfig::new(Ipv4Addr::new(192, 168, 1, 50)));
//! assert_eq!(iface.gateway_ip(), Ipv4Addr::new(192, 168, 1, 1));
//! assert_eq!(iface.dns_server_ip(), Ipv4Addr::new(192, 168, 1, 1));
//! assert_eq!(iface.link_status(), LinkStatus::On);
//! ```

mod config;
mod error;
mod interface;
pub mod lease;
mod mac;

pub use config::{NetConfig, ResolvedConfig};
pub use error::IfaceError;
pub use interface::{Interface, LinkStatus};
pub use lease::{Lease, LeaseCheck, LeaseError, LeaseManager};
pub use mac::MacAddr;
