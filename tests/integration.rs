//! Integration tests against an in-process fake bus.
//!
//! A `UnixListener` stands in for the message bus: it accepts one client,
//! performs the server side of the EXTERNAL handshake and answers Hello.
//! After that each test scripts the peer end by hand.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use buswire::codec::encode_message;
use buswire::{
    bus, Connection, FnHandler, Message, MessageKind, RecvBuffer, Value, ERR_UNKNOWN_OBJECT,
};

const ASSIGNED_NAME: &str = ":1.42";

fn setup_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("buswire=debug")
        .try_init();
}

/// A fake bus listening on a filesystem socket.
struct FakeBus {
    listener: UnixListener,
    path: PathBuf,
}

impl FakeBus {
    fn start(tag: &str) -> FakeBus {
        let path = PathBuf::from(format!(
            "/tmp/buswire-it-{}-{}.sock",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        FakeBus { listener, path }
    }

    fn address(&self) -> String {
        format!("unix={}", self.path.display())
    }

    /// Accepts one client and walks it through handshake plus Hello.
    async fn accept_and_greet(&self) -> BusPeer {
        let (stream, _) = self.listener.accept().await.unwrap();
        let mut peer = BusPeer {
            stream,
            buffer: RecvBuffer::new(),
            next_serial: 1000,
        };
        peer.handshake().await;
        peer.answer_hello().await;
        peer
    }
}

impl Drop for FakeBus {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Server end of one accepted connection.
struct BusPeer {
    stream: UnixStream,
    buffer: RecvBuffer,
    next_serial: u32,
}

impl BusPeer {
    async fn handshake(&mut self) {
        let mut nul = [0u8; 1];
        self.stream.read_exact(&mut nul).await.unwrap();
        assert_eq!(nul[0], 0, "auth must start with a NUL byte");

        let auth = self.read_line().await;
        assert!(auth.starts_with("AUTH EXTERNAL "), "got {auth:?}");
        self.stream
            .write_all(b"OK 1234deadbeefcafe\r\n")
            .await
            .unwrap();
        assert_eq!(self.read_line().await, "BEGIN");
    }

    async fn read_line(&mut self) -> String {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let byte = self.stream.read_u8().await.unwrap();
            if byte == b'\n' && line.last() == Some(&b'\r') {
                line.pop();
                return String::from_utf8(line).unwrap();
            }
            line.push(byte);
        }
    }

    async fn recv(&mut self) -> Message {
        loop {
            if let Some(message) = self.buffer.pop_message().unwrap() {
                return message;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed while a message was expected");
            self.buffer.extend(&chunk[..n]);
        }
    }

    /// Assigns a bus-side serial and writes `message`. Returns the serial.
    async fn send(&mut self, mut message: Message) -> u32 {
        message.serial = self.next_serial;
        self.next_serial += 1;
        let bytes = encode_message(&message).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
        message.serial
    }

    async fn answer_hello(&mut self) {
        let hello = self.recv().await;
        assert_eq!(hello.kind, MessageKind::MethodCall);
        assert_eq!(hello.member.as_deref(), Some("Hello"));
        assert_eq!(hello.destination.as_deref(), Some("org.freedesktop.DBus"));

        let mut reply =
            Message::method_return(&hello).with_args(vec![Value::Str(ASSIGNED_NAME.into())]);
        reply.sender = Some("org.freedesktop.DBus".into());
        self.send(reply).await;
    }
}

/// Connects a client to a fresh fake bus and returns both ends.
async fn connected_pair(tag: &str) -> (Connection, BusPeer) {
    setup_logging();
    let fake = FakeBus::start(tag);
    let address = fake.address();
    let peer_task = tokio::spawn(async move { fake.accept_and_greet().await });

    let conn = Connection::connect(&address).await.unwrap();
    let peer = peer_task.await.unwrap();
    (conn, peer)
}

/// Connect runs the handshake and Hello, then reports the assigned name.
#[tokio::test]
async fn test_connect_assigns_unique_name() {
    let (conn, _peer) = connected_pair("hello").await;
    assert_eq!(conn.unique_name(), Some(ASSIGNED_NAME));
    assert_eq!(conn.pending_calls(), 0);
}

/// A peer's Introspect call on an exported path gets a METHOD_RETURN with
/// matching reply_serial and one well-formed XML string.
#[tokio::test]
async fn test_peer_introspects_exported_object() {
    let (mut conn, mut peer) = connected_pair("introspect").await;

    conn.export_object("/test", FnHandler::new(|_: &Message| None))
        .unwrap();

    let mut call = Message::method_call(
        ASSIGNED_NAME,
        "/test",
        "org.freedesktop.DBus.Introspectable",
        "Introspect",
    );
    call.sender = Some(":1.99".into());
    let call_serial = peer.send(call).await;

    conn.pump().await.unwrap();

    let reply = peer.recv().await;
    assert_eq!(reply.kind, MessageKind::MethodReturn);
    assert_eq!(reply.reply_serial, Some(call_serial));
    assert_eq!(reply.sender.as_deref(), Some(ASSIGNED_NAME));

    let xml = reply.first_string().expect("one string parameter");
    assert!(xml.starts_with("<!DOCTYPE node"), "xml was: {xml}");
    assert!(xml.contains("<node>") && xml.contains("</node>"));
    assert!(xml.contains("org.freedesktop.DBus.Introspectable"));
}

/// Calls reach exported objects through intermediate nodes; calls to paths
/// that were never created come back as UnknownObject errors.
#[tokio::test]
async fn test_exported_object_round_trip_and_unknown_path() {
    let (mut conn, mut peer) = connected_pair("dispatch").await;

    conn.export_object(
        "/org/example/Echo",
        FnHandler::new(|call: &Message| {
            Some(Message::method_return(call).with_args(call.body.clone()))
        }),
    )
    .unwrap();

    let mut call = Message::method_call(
        ASSIGNED_NAME,
        "/org/example/Echo",
        "org.example.Echo",
        "Echo",
    )
    .with_args(vec![Value::Str("hello".into()), Value::Uint32(7)]);
    call.sender = Some(":1.99".into());
    let echo_serial = peer.send(call).await;

    conn.pump().await.unwrap();

    let reply = peer.recv().await;
    assert_eq!(reply.kind, MessageKind::MethodReturn);
    assert_eq!(reply.reply_serial, Some(echo_serial));
    assert_eq!(
        reply.body,
        vec![Value::Str("hello".into()), Value::Uint32(7)]
    );

    let mut missing = Message::method_call(ASSIGNED_NAME, "/x/y", "org.example.Echo", "Echo");
    missing.sender = Some(":1.99".into());
    let missing_serial = peer.send(missing).await;

    conn.pump().await.unwrap();

    let error = peer.recv().await;
    assert_eq!(error.kind, MessageKind::Error);
    assert_eq!(error.reply_serial, Some(missing_serial));
    assert_eq!(error.error_name.as_deref(), Some(ERR_UNKNOWN_OBJECT));
}

/// A synchronous call keeps dispatching interleaved traffic: a signal and
/// a stray call delivered before the reply are both handled first.
#[tokio::test]
async fn test_call_sync_survives_interleaved_traffic() {
    let (mut conn, mut peer) = connected_pair("interleave").await;

    let script = tokio::spawn(async move {
        let call = peer.recv().await;
        assert_eq!(call.member.as_deref(), Some("GetStatus"));

        let mut signal = Message::signal("/org/example", "org.example.Iface", "Changed");
        signal.sender = Some(":1.50".into());
        peer.send(signal).await;

        let mut stray = Message::method_call(ASSIGNED_NAME, "/absent", "org.x.I", "Poke");
        stray.sender = Some(":1.50".into());
        let stray_serial = peer.send(stray).await;

        // The stray call is answered before the awaited reply is sent.
        let unknown = peer.recv().await;
        assert_eq!(unknown.kind, MessageKind::Error);
        assert_eq!(unknown.reply_serial, Some(stray_serial));
        assert_eq!(unknown.error_name.as_deref(), Some(ERR_UNKNOWN_OBJECT));

        let reply = Message::method_return(&call).with_args(vec![Value::Str("ready".into())]);
        peer.send(reply).await;
    });

    let call = Message::method_call(
        "org.example.Svc",
        "/org/example",
        "org.example.Iface",
        "GetStatus",
    );
    let reply = conn.call_sync(call).await.unwrap().into_reply_result().unwrap();
    assert_eq!(reply.first_string(), Some("ready"));
    assert_eq!(conn.pending_calls(), 0);
    script.await.unwrap();
}

/// The bus-management wrappers ride the same correlation machinery.
#[tokio::test]
async fn test_request_name_over_fake_bus() {
    let (mut conn, mut peer) = connected_pair("reqname").await;

    let script = tokio::spawn(async move {
        let call = peer.recv().await;
        assert_eq!(call.member.as_deref(), Some("RequestName"));
        assert_eq!(call.body[0].as_str(), Some("org.example.Daemon"));
        assert_eq!(call.body[1].as_u32(), Some(bus::NAME_FLAG_DO_NOT_QUEUE));

        let reply = Message::method_return(&call)
            .with_args(vec![Value::Uint32(bus::REQUEST_NAME_REPLY_PRIMARY_OWNER)]);
        peer.send(reply).await;
    });

    let code = conn
        .request_name("org.example.Daemon", bus::NAME_FLAG_DO_NOT_QUEUE)
        .await
        .unwrap();
    assert_eq!(code, bus::REQUEST_NAME_REPLY_PRIMARY_OWNER);
    script.await.unwrap();
}

/// Introspecting a remote object yields a proxy that knows its interfaces.
#[tokio::test]
async fn test_remote_introspection_builds_proxy() {
    let (mut conn, mut peer) = connected_pair("proxy").await;

    let script = tokio::spawn(async move {
        let call = peer.recv().await;
        assert_eq!(call.member.as_deref(), Some("Introspect"));
        assert_eq!(call.path.as_deref(), Some("/org/example/Clock"));

        let xml = r#"<node>
  <interface name="org.freedesktop.DBus.Introspectable"/>
  <interface name="org.example.Clock"/>
</node>"#;
        let reply = Message::method_return(&call).with_args(vec![Value::Str(xml.into())]);
        peer.send(reply).await;
    });

    let proxy = conn.proxy("org.example.Svc", "/org/example/Clock").await.unwrap();
    assert!(proxy.has_interface("org.example.Clock"));

    let call = proxy.method_call("org.example.Clock", "Now");
    assert_eq!(call.destination.as_deref(), Some("org.example.Svc"));
    assert_eq!(call.path.as_deref(), Some("/org/example/Clock"));
    script.await.unwrap();
}

/// Signals arriving while idle surface through the non-blocking poll.
#[tokio::test]
async fn test_poll_messages_surfaces_signals() {
    let (mut conn, mut peer) = connected_pair("poll").await;

    let mut signal = Message::signal("/org/example", "org.example.Iface", "Tick");
    signal.sender = Some(":1.50".into());
    peer.send(signal).await;

    let mut strays = Vec::new();
    for _ in 0..500 {
        strays = conn.poll_messages().await.unwrap();
        if !strays.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    assert_eq!(strays.len(), 1);
    assert_eq!(strays[0].kind, MessageKind::Signal);
    assert_eq!(strays[0].member.as_deref(), Some("Tick"));
}
