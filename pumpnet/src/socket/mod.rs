//! Blocking socket facades.
//!
//! Each facade holds a [`Token`](crate::stack::Token) into the driver's slot
//! arena. The slot carries everything a stack event may update; the facade
//! only touches it between pumps.

mod server;
mod tcp;
mod udp;

pub use server::TcpServer;
pub use tcp::{ConnState, TcpClient};
pub use udp::UdpSocket;

pub(crate) use server::ListenerSlot;
pub(crate) use tcp::TcpSlot;
pub(crate) use udp::UdpSlot;
