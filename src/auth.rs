//! SASL EXTERNAL handshake.
//!
//! Runs once, immediately after the socket connects and before any binary
//! frame. The exchange is line oriented:
//!
//! ```text
//! C: \0
//! C: AUTH EXTERNAL 31303030\r\n      (hex of the ASCII decimal uid)
//! S: OK 17a9789deadbeef...\r\n
//! C: BEGIN\r\n
//! ```
//!
//! Responses are read one byte at a time so no bytes past the final CRLF
//! are consumed; everything after `BEGIN` belongs to the frame layer.
//! Only EXTERNAL is offered, no mechanism negotiation.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::error::{BusError, Result};

const MAX_LINE: usize = 4096;

/// Performs the handshake on a freshly connected socket.
pub async fn authenticate(stream: &mut UnixStream) -> Result<()> {
    let uid = nix::unistd::getuid().as_raw();

    stream.write_all(b"\0").await?;
    write_line(stream, &format!("AUTH EXTERNAL {}", hex_uid(uid))).await?;

    let reply = read_line(stream).await?;
    if !reply.starts_with("OK") {
        return Err(BusError::Auth(format!(
            "server rejected EXTERNAL: {reply:?}"
        )));
    }

    write_line(stream, "BEGIN").await?;
    debug!(uid, "authenticated");
    Ok(())
}

/// Hex encoding of the ASCII decimal form of `uid`, as EXTERNAL wants it.
fn hex_uid(uid: u32) -> String {
    uid.to_string()
        .bytes()
        .map(|b| format!("{b:02x}"))
        .collect()
}

async fn write_line(stream: &mut UnixStream, line: &str) -> Result<()> {
    trace!(line, "auth send");
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    Ok(())
}

/// Reads one CRLF-terminated line and returns it without the terminator.
async fn read_line(stream: &mut UnixStream) -> Result<String> {
    let mut line: Vec<u8> = Vec::new();
    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(BusError::Auth("connection closed during handshake".into()));
            }
            Err(e) => return Err(e.into()),
        };
        if byte == b'\n' && line.last() == Some(&b'\r') {
            line.pop();
            let text = String::from_utf8_lossy(&line).into_owned();
            trace!(line = %text, "auth recv");
            return Ok(text);
        }
        line.push(byte);
        if line.len() > MAX_LINE {
            return Err(BusError::Auth("over-long handshake line".into()));
        }
    }
}
