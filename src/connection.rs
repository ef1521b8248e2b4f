//! Bus connection and message dispatch.
//!
//! [`Connection`] owns the socket, the receive buffer, the pending-call
//! registry and the exported-object tree, and drives all of them from the
//! caller's task. Lifecycle:
//! 1. Parse the bus address
//! 2. Connect the UNIX socket (filesystem or abstract namespace)
//! 3. Run the EXTERNAL handshake
//! 4. Call `Hello` and store the unique name the bus assigns
//!
//! There is no background reader task and no internal locking; every
//! message is pulled off the wire and dispatched by whichever method the
//! caller is currently awaiting. Messages are processed strictly in
//! arrival order.
//!
//! # Example
//!
//! ```ignore
//! use buswire::{Connection, Message};
//!
//! #[tokio::main]
//! async fn main() -> buswire::Result<()> {
//!     let mut bus = Connection::session().await?;
//!     println!("connected as {:?}", bus.unique_name());
//!
//!     let call = Message::method_call(
//!         "org.freedesktop.DBus",
//!         "/org/freedesktop/DBus",
//!         "org.freedesktop.DBus",
//!         "ListNames",
//!     );
//!     let reply = bus.call_sync(call).await?.into_reply_result()?;
//!     println!("{:?}", reply.body);
//!     Ok(())
//! }
//! ```

use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::{debug, error, info, trace, warn};

use crate::auth;
use crate::bus;
use crate::calls::{CallRegistry, PendingReply};
use crate::codec::{encode_message, Value};
use crate::error::{BusError, Result};
use crate::handler::{Handler, Node};
use crate::message::{Message, MessageKind};
use crate::protocol::RecvBuffer;
use crate::proxy::Proxy;
use crate::transport::{self, BusAddress};

/// Error name sent back when a call targets a path with no node.
pub const ERR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// One nonblocking read pulls at most this many bytes.
const READ_BUF_SIZE: usize = 4096;

/// An authenticated connection to a message bus.
///
/// All mutable state hangs off this struct and is only touched through
/// `&mut self`, which is what makes the single-task model safe. Dropping
/// the connection closes the socket; a broken connection is rebuilt with
/// [`Connection::connect`], never resumed.
pub struct Connection {
    stream: UnixStream,
    /// Raw bytes read but not yet framed.
    buffer: RecvBuffer,
    /// Calls awaiting a reply, keyed by serial.
    calls: CallRegistry,
    /// Locally exported objects.
    root: Node,
    /// Name assigned by the bus at Hello time.
    unique_name: Option<String>,
    next_serial: u32,
}

impl Connection {
    /// Connects to the bus at `address`, authenticates and says Hello.
    ///
    /// Returns only once the bus has assigned this connection its unique
    /// name. Address and handshake failures abort the whole attempt.
    pub async fn connect(address: &str) -> Result<Self> {
        let parsed = BusAddress::parse(address)?;
        let mut stream = transport::connect(&parsed).await?;
        auth::authenticate(&mut stream).await?;

        let mut conn = Connection {
            stream,
            buffer: RecvBuffer::new(),
            calls: CallRegistry::new(),
            root: Node::new(),
            unique_name: None,
            next_serial: 1,
        };
        conn.hello().await?;
        Ok(conn)
    }

    /// Connects to the session bus named by `DBUS_SESSION_BUS_ADDRESS`.
    pub async fn session() -> Result<Self> {
        Self::connect(&bus::session_address()?).await
    }

    /// Connects to the system bus.
    pub async fn system() -> Result<Self> {
        Self::connect(&bus::system_address()).await
    }

    #[cfg(test)]
    pub(crate) fn from_stream(stream: UnixStream) -> Self {
        Connection {
            stream,
            buffer: RecvBuffer::new(),
            calls: CallRegistry::new(),
            root: Node::new(),
            unique_name: Some(":0.test".into()),
            next_serial: 1,
        }
    }

    /// Unique connection name assigned by the bus, e.g. `:1.42`.
    #[inline]
    pub fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    /// Number of calls still waiting for a reply.
    #[inline]
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Exports `object` at `path`, creating intermediate nodes as needed.
    ///
    /// Re-exporting over an occupied path replaces the previous object.
    pub fn export_object<H>(&mut self, path: &str, object: H) -> Result<()>
    where
        H: Handler + 'static,
    {
        self.root.export(path, Box::new(object))
    }

    /// Assigns a serial and writes `message` to the socket.
    ///
    /// For signals, replies and other fire-and-forget traffic. Returns
    /// the serial the message went out with.
    pub async fn send(&mut self, mut message: Message) -> Result<u32> {
        message.serial = self.take_serial();
        self.write_message(&message).await?;
        Ok(message.serial)
    }

    /// Sends a method call and returns a handle its reply will resolve.
    ///
    /// The registry slot is taken before the bytes hit the socket, so a
    /// fast peer can never reply to an unregistered serial.
    pub async fn call_async(&mut self, mut call: Message) -> Result<PendingReply> {
        call.serial = self.take_serial();
        let bytes = encode_message(&call)?;
        trace!(serial = call.serial, member = ?call.member, "method call");
        let pending = self.calls.register(call);
        self.stream.write_all(&bytes).await?;
        Ok(pending)
    }

    /// Sends a method call and waits on this task until its reply arrives.
    ///
    /// Unrelated traffic received in the meantime is dispatched through
    /// [`Connection::process`] as it arrives; only the matching reply (a
    /// METHOD_RETURN or an ERROR carrying the call's serial) ends the
    /// wait. Blocks indefinitely if the peer never answers.
    pub async fn call_sync(&mut self, call: Message) -> Result<Message> {
        let mut pending = self.call_async(call).await?;
        loop {
            if let Some(reply) = pending.try_take()? {
                return Ok(reply);
            }
            let incoming = self.wait_for_message().await?;
            if let Some(stray) = self.process(incoming).await? {
                debug!(
                    kind = ?stray.kind,
                    serial = stray.serial,
                    "dropping message received during synchronous wait"
                );
            }
        }
    }

    /// Non-blocking poll: reads whatever the socket has ready, then
    /// decodes and dispatches every complete frame.
    ///
    /// Returns the messages dispatch had no consumer for, signals mostly,
    /// in arrival order. An empty vec means nothing actionable arrived.
    pub async fn poll_messages(&mut self) -> Result<Vec<Message>> {
        self.read_available()?;
        let mut strays = Vec::new();
        for message in self.buffer.drain()? {
            if let Some(stray) = self.process(message).await? {
                strays.push(stray);
            }
        }
        Ok(strays)
    }

    /// Waits for the next complete frame and returns it undispatched.
    pub async fn wait_for_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.buffer.pop_message()? {
                return Ok(message);
            }
            self.stream.readable().await?;
            self.read_available()?;
        }
    }

    /// Waits for the next message and dispatches it.
    ///
    /// Returns the message when dispatch had no consumer for it. Useful
    /// as the body of a serve loop.
    pub async fn pump(&mut self) -> Result<Option<Message>> {
        let message = self.wait_for_message().await?;
        self.process(message).await
    }

    /// Single dispatch point for every message taken off the wire.
    ///
    /// Replies are matched against pending calls, method calls are routed
    /// through the object tree, signals are handed back to the caller.
    /// Returns `Some` when the engine itself had no consumer for the
    /// message. Structural problems in one message are logged and never
    /// poison the connection.
    pub async fn process(&mut self, message: Message) -> Result<Option<Message>> {
        trace!(kind = ?message.kind, serial = message.serial, "process");
        match message.kind {
            MessageKind::MethodReturn | MessageKind::Error => {
                let reply_serial = match message.reply_serial {
                    Some(serial) => serial,
                    None => {
                        error!(
                            serial = message.serial,
                            kind = ?message.kind,
                            "reply without reply_serial, dropping"
                        );
                        return Ok(None);
                    }
                };
                if !self.calls.complete(reply_serial, message) {
                    warn!(reply_serial, "reply with no pending call, dropping");
                }
                Ok(None)
            }
            MessageKind::MethodCall => self.dispatch_call(message).await,
            MessageKind::Signal => Ok(Some(message)),
        }
    }

    /// Routes an incoming method call through the object tree.
    async fn dispatch_call(&mut self, call: Message) -> Result<Option<Message>> {
        let path = match call.path.as_deref() {
            Some(path) => path,
            None => {
                error!(serial = call.serial, "method call without a path, dropping");
                return Ok(None);
            }
        };
        let is_introspect = call.interface.as_deref() == Some(INTROSPECTABLE_INTERFACE)
            && call.member.as_deref() == Some("Introspect");

        let reply = match self.root.lookup_mut(path) {
            None => {
                debug!(path, member = ?call.member, "call for unknown object");
                Some(Message::error_reply(
                    &call,
                    ERR_UNKNOWN_OBJECT,
                    format!("no object at {path}"),
                ))
            }
            Some(node) if is_introspect => {
                let xml = node.introspect();
                Some(Message::method_return(&call).with_args(vec![Value::Str(xml)]))
            }
            Some(node) => match node.object_mut() {
                Some(object) => object.handle(&call),
                None => {
                    debug!(path, member = ?call.member, "call for node without object, discarding");
                    None
                }
            },
        };

        if let Some(mut reply) = reply {
            reply.sender = self.unique_name.clone();
            self.send(reply).await?;
        }
        Ok(None)
    }

    /// Calls `Introspect` on a remote object and returns the XML document.
    pub async fn introspect(&mut self, destination: &str, path: &str) -> Result<String> {
        let call = Message::method_call(destination, path, INTROSPECTABLE_INTERFACE, "Introspect");
        let reply = self.call_sync(call).await?.into_reply_result()?;
        match reply.first_string() {
            Some(xml) => Ok(xml.to_owned()),
            None => Err(BusError::InvalidFrame(
                "Introspect reply carried no XML".into(),
            )),
        }
    }

    /// Introspects a remote object and builds a [`Proxy`] for it.
    pub async fn proxy(&mut self, destination: &str, path: &str) -> Result<Proxy> {
        let xml = self.introspect(destination, path).await?;
        Ok(Proxy::from_introspection(&xml, destination, path))
    }

    /// Announces this connection to the bus and records the unique name.
    async fn hello(&mut self) -> Result<()> {
        let call = Message::method_call(bus::BUS_NAME, bus::BUS_PATH, bus::BUS_INTERFACE, "Hello");
        let reply = self.call_sync(call).await?.into_reply_result()?;
        let name = match reply.first_string() {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => {
                return Err(BusError::InvalidFrame(
                    "Hello reply carried no unique name".into(),
                ))
            }
        };
        info!(unique_name = %name, "connected to bus");
        self.unique_name = Some(name);
        Ok(())
    }

    /// Next outgoing serial. Zero is reserved on the wire and skipped.
    fn take_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        if self.next_serial == 0 {
            self.next_serial = 1;
        }
        serial
    }

    async fn write_message(&mut self, message: &Message) -> Result<()> {
        let bytes = encode_message(message)?;
        trace!(
            serial = message.serial,
            kind = ?message.kind,
            len = bytes.len(),
            "send"
        );
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// One nonblocking read into the receive buffer.
    ///
    /// Returns `false` when the socket had nothing ready. A zero-length
    /// read means the peer closed the connection.
    fn read_available(&mut self) -> Result<bool> {
        let mut chunk = [0u8; READ_BUF_SIZE];
        match self.stream.try_read(&mut chunk) {
            Ok(0) => Err(BusError::Disconnected),
            Ok(n) => {
                trace!(bytes = n, "read");
                self.buffer.extend(&chunk[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("unique_name", &self.unique_name)
            .field("pending_calls", &self.calls.len())
            .field("buffered_bytes", &self.buffer.len())
            .finish()
    }
}
