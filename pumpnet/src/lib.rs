#![cfg_attr(docsrs, feature(doc_cfg))]

//! # pumpnet - Blocking sockets over a pumped network stack
//!
//! pumpnet gives application code a plain blocking socket API (connect, write,
//! read, available, stop) on top of a network stack that is entirely
//! callback-driven and only makes progress when explicitly pumped, such as
//! lwIP in `NO_SYS` mode on a microcontroller.
//!
//! ## Model
//!
//! - **Single-threaded.** A [`Net`] is `!Send`. The stack, the callbacks it
//!   produces and the caller all run on one thread.
//! - **Cooperative.** "Blocking" calls are loops around [`Net::pump`]. The
//!   stack advances only inside a pump, and every callback is applied before
//!   the pump returns.
//! - **Mailbox, not pointers.** The stack never touches socket memory. It posts
//!   tagged [`Event`](stack::Event)s addressed by a [`Token`](stack::Token)
//!   into a bounded mailbox which the pump drains in order. Events for sockets
//!   that have been released are dropped.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use pumpnet::{Net, TcpClient, TcpServer, stack::loopback::Loopback};
//!
//! # fn main() -> pumpnet::Result<()> {
//! let net = Net::new(Loopback::new());
//!
//! let mut server = TcpServer::new(&net, 7);
//! server.begin()?;
//!
//! let mut client = TcpClient::new(&net);
//! client.connect(Ipv4Addr::LOCALHOST, 7)?;
//! client.write(b"hello")?;
//!
//! let mut conn = server.accept().expect("accepted");
//! while conn.available() < 5 {}
//! let mut buf = [0u8; 5];
//! assert_eq!(conn.read(&mut buf), Some(5));
//! assert_eq!(&buf, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result`]. "Nothing to read" is not an error and
//! is reported as `None`. [`Error`] converts into [`std::io::Error`], and
//! [`TcpClient`] implements [`std::io::Read`] and [`std::io::Write`].

pub mod buf;
mod config;
mod driver;
mod error;
mod resolve;
mod socket;
pub mod stack;
mod store;

pub use config::{Config, MAX_UDP_PAYLOAD};
pub use driver::Net;
pub use error::{Error, Result};
pub use resolve::{HostTable, Resolve};
pub use socket::{ConnState, TcpClient, TcpServer, UdpSocket};
