//! # buswire
//!
//! A from-scratch D-Bus client/server engine: UNIX-socket transport,
//! EXTERNAL handshake, incremental wire framing, serial-correlated calls
//! and a path-addressed tree of exported objects.
//!
//! ## Architecture
//!
//! - **Transport** (UNIX socket): filesystem or abstract-namespace,
//!   plus the line-oriented auth exchange that precedes binary traffic
//! - **Protocol** (binary frames): incremental receive buffer over the
//!   wire codec, tolerant of frames split across reads
//! - **Connection**: serial allocation, pending-call correlation and a
//!   single dispatch point routing calls to exported objects
//!
//! Everything is driven from the caller's task; a connection has no
//! background reader and no internal locking.
//!
//! ## Example
//!
//! ```ignore
//! use buswire::{Connection, FnHandler, Message};
//!
//! #[tokio::main]
//! async fn main() -> buswire::Result<()> {
//!     let mut bus = Connection::session().await?;
//!     bus.export_object(
//!         "/org/example/Echo",
//!         FnHandler::new(|call: &Message| {
//!             Some(Message::method_return(call).with_args(call.body.clone()))
//!         }),
//!     )?;
//!
//!     loop {
//!         bus.pump().await?;
//!     }
//! }
//! ```

pub mod bus;
pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod auth;
mod calls;
mod connection;
mod message;
mod proxy;

pub use calls::PendingReply;
pub use codec::{signature_of, Value};
pub use connection::{Connection, ERR_UNKNOWN_OBJECT};
pub use error::{BusError, Result};
pub use handler::{FnHandler, Handler, Node};
pub use message::{Message, MessageKind};
pub use protocol::RecvBuffer;
pub use proxy::Proxy;
pub use transport::{BusAddress, ByteOrder};
