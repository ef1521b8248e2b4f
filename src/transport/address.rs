//! Bus address parsing and abstract-socket address construction.
//!
//! A bus publishes its location as a comma-separated `key=value` string,
//! for example `unix:abstract=/tmp/dbus-Bg2kHdNPWw,guid=17a9...`. The
//! string is split on commas and each entry on its first `=`, so the
//! transport prefix folds into the first key and the recognized socket
//! keys are literally `unix` and `unix:abstract`.
//!
//! # Example
//!
//! ```
//! use buswire::BusAddress;
//!
//! let addr = BusAddress::parse("unix:abstract=/tmp/dbus-test,guid=beef").unwrap();
//! assert!(matches!(addr, BusAddress::Abstract { .. }));
//! ```

use std::path::PathBuf;

use crate::error::{BusError, Result};

/// Byte order selector for [`abstract_sockaddr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the running host.
    pub fn host() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// A parsed bus address.
///
/// Only UNIX domain sockets are supported, in their filesystem and
/// abstract-namespace flavors. The optional server GUID is kept for
/// diagnostics but plays no role in connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusAddress {
    /// Socket bound to a filesystem path (`unix=` key).
    Unix {
        path: PathBuf,
        guid: Option<String>,
    },
    /// Socket in the Linux abstract namespace (`unix:abstract=` key).
    Abstract {
        name: String,
        guid: Option<String>,
    },
}

impl BusAddress {
    /// Parses a bus address string.
    ///
    /// Unknown keys and entries without `=` are skipped. Fails with
    /// [`BusError::Address`] when neither socket key is present. If both
    /// appear the abstract form wins.
    pub fn parse(addr: &str) -> Result<Self> {
        let mut unix_path: Option<PathBuf> = None;
        let mut abstract_name: Option<String> = None;
        let mut guid: Option<String> = None;

        for entry in addr.split(',') {
            if let Some((key, value)) = entry.split_once('=') {
                match key {
                    "unix" => unix_path = Some(PathBuf::from(value)),
                    "unix:abstract" => abstract_name = Some(value.to_owned()),
                    "guid" => guid = Some(value.to_owned()),
                    _ => {}
                }
            }
        }

        if let Some(name) = abstract_name {
            Ok(BusAddress::Abstract { name, guid })
        } else if let Some(path) = unix_path {
            Ok(BusAddress::Unix { path, guid })
        } else {
            Err(BusError::Address(format!(
                "no unix or unix:abstract key in {addr:?}"
            )))
        }
    }

    /// Server GUID carried by the address, if any.
    pub fn guid(&self) -> Option<&str> {
        match self {
            BusAddress::Unix { guid, .. } | BusAddress::Abstract { guid, .. } => guid.as_deref(),
        }
    }
}

/// Raw `sockaddr_un` bytes for an abstract-namespace socket.
///
/// The kernel expects the `AF_UNIX` family value as a 16-bit integer in
/// host byte order, then the NUL that marks the abstract namespace, then
/// the name with no terminator. Little-endian hosts therefore produce the
/// prefix `[1, 0, 0]` and big-endian hosts `[0, 1, 0]`.
pub fn abstract_sockaddr(name: &str, order: ByteOrder) -> Vec<u8> {
    let family = libc::AF_UNIX as u16;
    let mut addr = Vec::with_capacity(3 + name.len());
    match order {
        ByteOrder::Little => addr.extend_from_slice(&family.to_le_bytes()),
        ByteOrder::Big => addr.extend_from_slice(&family.to_be_bytes()),
    }
    addr.push(0);
    addr.extend_from_slice(name.as_bytes());
    addr
}
