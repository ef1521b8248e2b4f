//! Transport module - bus address handling and socket connection.
//!
//! Provides:
//! - parsing of `key=value` bus address strings ([`BusAddress`])
//! - bit-exact `sockaddr_un` construction for abstract-namespace sockets
//! - async connection over both filesystem and abstract UNIX sockets

mod address;
mod socket;

pub use address::{abstract_sockaddr, BusAddress, ByteOrder};
pub use socket::connect;
