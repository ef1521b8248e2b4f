//! Bus facade: well-known constants, address discovery and the
//! bus-management calls every connection needs.
//!
//! The message bus itself is addressed like any other peer, at the
//! well-known name/path/interface triple below. The calls here are thin
//! wrappers over [`Connection::call_sync`]; nothing in this module
//! touches the wire directly.
//!
//! # Example
//!
//! ```ignore
//! use buswire::{bus, Connection};
//!
//! let mut conn = Connection::session().await?;
//! let code = conn
//!     .request_name("org.example.Daemon", bus::NAME_FLAG_DO_NOT_QUEUE)
//!     .await?;
//! assert_eq!(code, bus::REQUEST_NAME_REPLY_PRIMARY_OWNER);
//! ```

use std::env;

use tokio::sync::{Mutex, OnceCell};

use crate::codec::Value;
use crate::connection::Connection;
use crate::error::{BusError, Result};
use crate::message::Message;

/// Well-known name of the message bus itself.
pub const BUS_NAME: &str = "org.freedesktop.DBus";
/// Object path of the message bus.
pub const BUS_PATH: &str = "/org/freedesktop/DBus";
/// Interface of the bus-management methods.
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Conventional system bus socket, spelled with the key the address
/// parser recognizes.
pub const SYSTEM_BUS_ADDRESS: &str = "unix=/var/run/dbus/system_bus_socket";

// RequestName input flags.
pub const NAME_FLAG_ALLOW_REPLACEMENT: u32 = 0x1;
pub const NAME_FLAG_REPLACE_EXISTING: u32 = 0x2;
pub const NAME_FLAG_DO_NOT_QUEUE: u32 = 0x4;

// RequestName reply codes.
pub const REQUEST_NAME_REPLY_PRIMARY_OWNER: u32 = 0x1;
pub const REQUEST_NAME_REPLY_IN_QUEUE: u32 = 0x2;
pub const REQUEST_NAME_REPLY_EXISTS: u32 = 0x3;
pub const REQUEST_NAME_REPLY_ALREADY_OWNER: u32 = 0x4;

static SESSION_BUS: OnceCell<Mutex<Connection>> = OnceCell::const_new();
static SYSTEM_BUS: OnceCell<Mutex<Connection>> = OnceCell::const_new();

/// Process-wide session bus connection, opened on first access.
///
/// A failed first access leaves the cell empty so a later call can retry.
pub async fn session_bus() -> Result<&'static Mutex<Connection>> {
    SESSION_BUS
        .get_or_try_init(|| async {
            let conn = Connection::session().await?;
            Ok::<_, BusError>(Mutex::new(conn))
        })
        .await
}

/// Process-wide system bus connection, opened on first access.
pub async fn system_bus() -> Result<&'static Mutex<Connection>> {
    SYSTEM_BUS
        .get_or_try_init(|| async {
            let conn = Connection::system().await?;
            Ok::<_, BusError>(Mutex::new(conn))
        })
        .await
}

/// Session bus address from the environment.
pub(crate) fn session_address() -> Result<String> {
    env::var("DBUS_SESSION_BUS_ADDRESS")
        .map_err(|_| BusError::Address("DBUS_SESSION_BUS_ADDRESS is not set".into()))
}

/// System bus address, with the conventional fallback.
pub(crate) fn system_address() -> String {
    env::var("DBUS_SYSTEM_BUS_ADDRESS").unwrap_or_else(|_| SYSTEM_BUS_ADDRESS.into())
}

fn bus_call(member: &str) -> Message {
    Message::method_call(BUS_NAME, BUS_PATH, BUS_INTERFACE, member)
}

impl Connection {
    /// Asks the bus for ownership of `name`. Returns the reply code, one
    /// of the `REQUEST_NAME_REPLY_*` constants.
    pub async fn request_name(&mut self, name: &str, flags: u32) -> Result<u32> {
        let call =
            bus_call("RequestName").with_args(vec![Value::Str(name.into()), Value::Uint32(flags)]);
        let reply = self.call_sync(call).await?.into_reply_result()?;
        reply_code(&reply, "RequestName")
    }

    /// Gives up ownership of `name`. Returns the bus reply code.
    pub async fn release_name(&mut self, name: &str) -> Result<u32> {
        let call = bus_call("ReleaseName").with_args(vec![Value::Str(name.into())]);
        let reply = self.call_sync(call).await?.into_reply_result()?;
        reply_code(&reply, "ReleaseName")
    }

    /// Names currently registered on the bus, unique and well-known.
    pub async fn list_names(&mut self) -> Result<Vec<String>> {
        let reply = self.call_sync(bus_call("ListNames")).await?.into_reply_result()?;
        match reply.body.first() {
            Some(Value::Array { items, .. }) => Ok(items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_owned)
                .collect()),
            _ => Err(BusError::InvalidFrame(
                "ListNames reply carried no string array".into(),
            )),
        }
    }

    /// Whether `name` currently has an owner.
    pub async fn name_has_owner(&mut self, name: &str) -> Result<bool> {
        let call = bus_call("NameHasOwner").with_args(vec![Value::Str(name.into())]);
        let reply = self.call_sync(call).await?.into_reply_result()?;
        match reply.body.first().and_then(|v| v.as_bool()) {
            Some(owned) => Ok(owned),
            None => Err(BusError::InvalidFrame(
                "NameHasOwner reply carried no bool".into(),
            )),
        }
    }

    /// Unique name of the connection currently owning `name`.
    pub async fn get_name_owner(&mut self, name: &str) -> Result<String> {
        let call = bus_call("GetNameOwner").with_args(vec![Value::Str(name.into())]);
        let reply = self.call_sync(call).await?.into_reply_result()?;
        match reply.first_string() {
            Some(owner) => Ok(owner.to_owned()),
            None => Err(BusError::InvalidFrame(
                "GetNameOwner reply carried no name".into(),
            )),
        }
    }

    /// Subscribes this connection to messages matching `rule`.
    pub async fn add_match(&mut self, rule: &str) -> Result<()> {
        let call = bus_call("AddMatch").with_args(vec![Value::Str(rule.into())]);
        self.call_sync(call).await?.into_reply_result()?;
        Ok(())
    }

    /// Removes a match rule previously added with [`Connection::add_match`].
    pub async fn remove_match(&mut self, rule: &str) -> Result<()> {
        let call = bus_call("RemoveMatch").with_args(vec![Value::Str(rule.into())]);
        self.call_sync(call).await?.into_reply_result()?;
        Ok(())
    }
}

fn reply_code(reply: &Message, member: &str) -> Result<u32> {
    match reply.body.first().and_then(|v| v.as_u32()) {
        Some(code) => Ok(code),
        None => Err(BusError::InvalidFrame(format!(
            "{member} reply carried no code"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_message;
    use crate::message::MessageKind;
    use crate::protocol::RecvBuffer;
    use crate::transport::BusAddress;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    async fn read_one(stream: &mut UnixStream, buffer: &mut RecvBuffer) -> Message {
        loop {
            if let Some(message) = buffer.pop_message().unwrap() {
                return message;
            }
            stream.readable().await.unwrap();
            let mut chunk = [0u8; 4096];
            match stream.try_read(&mut chunk) {
                Ok(0) => panic!("peer closed"),
                Ok(n) => buffer.extend(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }

    async fn answer(stream: &mut UnixStream, reply: &Message) {
        let bytes = encode_message(reply).unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_name_sends_flags_and_returns_code() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client);

        let peer = tokio::spawn(async move {
            let mut rb = RecvBuffer::new();
            let call = read_one(&mut server, &mut rb).await;
            assert_eq!(call.member.as_deref(), Some("RequestName"));
            assert_eq!(call.destination.as_deref(), Some(BUS_NAME));
            assert_eq!(call.body[0].as_str(), Some("org.example.Daemon"));
            assert_eq!(call.body[1].as_u32(), Some(NAME_FLAG_DO_NOT_QUEUE));

            let mut reply = Message::method_return(&call)
                .with_args(vec![Value::Uint32(REQUEST_NAME_REPLY_PRIMARY_OWNER)]);
            reply.serial = 90;
            answer(&mut server, &reply).await;
        });

        let code = conn
            .request_name("org.example.Daemon", NAME_FLAG_DO_NOT_QUEUE)
            .await
            .unwrap();
        assert_eq!(code, REQUEST_NAME_REPLY_PRIMARY_OWNER);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_list_names_decodes_string_array() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client);

        let peer = tokio::spawn(async move {
            let mut rb = RecvBuffer::new();
            let call = read_one(&mut server, &mut rb).await;
            assert_eq!(call.member.as_deref(), Some("ListNames"));

            let mut reply = Message::method_return(&call).with_args(vec![Value::string_array([
                "org.freedesktop.DBus",
                ":1.7",
                "org.example.Daemon",
            ])]);
            reply.serial = 91;
            answer(&mut server, &reply).await;
        });

        let names = conn.list_names().await.unwrap();
        assert_eq!(
            names,
            vec!["org.freedesktop.DBus", ":1.7", "org.example.Daemon"]
        );
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_name_has_owner_and_get_name_owner() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client);

        let peer = tokio::spawn(async move {
            let mut rb = RecvBuffer::new();

            let call = read_one(&mut server, &mut rb).await;
            assert_eq!(call.member.as_deref(), Some("NameHasOwner"));
            let mut reply = Message::method_return(&call).with_args(vec![Value::Bool(true)]);
            reply.serial = 92;
            answer(&mut server, &reply).await;

            let call = read_one(&mut server, &mut rb).await;
            assert_eq!(call.member.as_deref(), Some("GetNameOwner"));
            let mut reply =
                Message::method_return(&call).with_args(vec![Value::Str(":1.5".into())]);
            reply.serial = 93;
            answer(&mut server, &reply).await;
        });

        assert!(conn.name_has_owner("org.example.Daemon").await.unwrap());
        assert_eq!(conn.get_name_owner("org.example.Daemon").await.unwrap(), ":1.5");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_add_match_surfaces_bus_error() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client);

        let peer = tokio::spawn(async move {
            let mut rb = RecvBuffer::new();
            let call = read_one(&mut server, &mut rb).await;
            assert_eq!(call.member.as_deref(), Some("AddMatch"));
            assert_eq!(call.body[0].as_str(), Some("type='signal'"));

            let mut reply = Message::error_reply(
                &call,
                "org.freedesktop.DBus.Error.MatchRuleInvalid",
                "bad rule",
            );
            reply.serial = 94;
            answer(&mut server, &reply).await;
        });

        let err = conn.add_match("type='signal'").await.unwrap_err();
        match err {
            BusError::Remote { name, .. } => {
                assert_eq!(name, "org.freedesktop.DBus.Error.MatchRuleInvalid");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_name_reply_kind_checked() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let mut conn = Connection::from_stream(client);

        let peer = tokio::spawn(async move {
            let mut rb = RecvBuffer::new();
            let call = read_one(&mut server, &mut rb).await;
            assert_eq!(call.kind, MessageKind::MethodCall);
            assert_eq!(call.member.as_deref(), Some("ReleaseName"));

            // A reply with the wrong body shape is a frame-level problem.
            let mut reply = Message::method_return(&call);
            reply.serial = 95;
            answer(&mut server, &reply).await;
        });

        let err = conn.release_name("org.example.Daemon").await.unwrap_err();
        assert!(matches!(err, BusError::InvalidFrame(_)));
        peer.await.unwrap();
    }

    #[test]
    fn test_default_system_address_parses() {
        let addr = BusAddress::parse(SYSTEM_BUS_ADDRESS).unwrap();
        assert_eq!(
            addr,
            BusAddress::Unix {
                path: "/var/run/dbus/system_bus_socket".into(),
                guid: None,
            }
        );
    }
}
