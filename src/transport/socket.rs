//! Socket connection for both UNIX address flavors.
//!
//! Filesystem paths go through tokio's own connector. The abstract
//! namespace has no portable `std`/tokio spelling, so those sockets are
//! opened with raw `libc` calls using the exact address bytes from
//! [`abstract_sockaddr`], then handed to tokio as a nonblocking stream.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream as StdUnixStream;

use tokio::net::UnixStream;
use tracing::debug;

use crate::error::Result;
use crate::transport::address::{abstract_sockaddr, BusAddress, ByteOrder};

/// Connects to the socket named by `address`.
pub async fn connect(address: &BusAddress) -> Result<UnixStream> {
    match address {
        BusAddress::Unix { path, .. } => {
            debug!(path = %path.display(), "connecting to filesystem socket");
            Ok(UnixStream::connect(path).await?)
        }
        BusAddress::Abstract { name, .. } => {
            debug!(name = %name, "connecting to abstract socket");
            let stream = connect_abstract(name)?;
            stream.set_nonblocking(true)?;
            Ok(UnixStream::from_std(stream)?)
        }
    }
}

/// Blocking connect to an abstract-namespace socket.
fn connect_abstract(name: &str) -> io::Result<StdUnixStream> {
    let sockaddr = abstract_sockaddr(name, ByteOrder::host());

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            sockaddr.as_ptr() as *const libc::sockaddr,
            sockaddr.len() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(StdUnixStream::from(fd))
}
