//! Remote-object proxies built from introspection XML.
//!
//! A [`Proxy`] is a factory for method calls addressed at one remote
//! object. It is built from the XML document the object returns for
//! `Introspect`, usually via [`Connection::proxy`]. Only interface names
//! are extracted from the document; calls built here are issued through
//! [`Connection::call_sync`] or [`Connection::call_async`].
//!
//! [`Connection::proxy`]: crate::Connection::proxy
//! [`Connection::call_sync`]: crate::Connection::call_sync
//! [`Connection::call_async`]: crate::Connection::call_async

use crate::message::Message;

const INTERFACE_ATTR: &str = "<interface name=\"";

/// Call factory for one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    destination: String,
    path: String,
    interfaces: Vec<String>,
}

impl Proxy {
    /// Builds a proxy from an introspection document.
    ///
    /// Interface names are collected in document order. A malformed
    /// document yields a proxy with whatever names were readable; it
    /// never fails.
    pub fn from_introspection(xml: &str, destination: &str, path: &str) -> Self {
        let mut interfaces = Vec::new();
        let mut rest = xml;
        while let Some(idx) = rest.find(INTERFACE_ATTR) {
            let after = &rest[idx + INTERFACE_ATTR.len()..];
            match after.find('"') {
                Some(end) => {
                    interfaces.push(after[..end].to_owned());
                    rest = &after[end..];
                }
                None => break,
            }
        }
        Proxy {
            destination: destination.to_owned(),
            path: path.to_owned(),
            interfaces,
        }
    }

    /// Bus name this proxy addresses.
    #[inline]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Object path this proxy addresses.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Interfaces the remote object advertised, in document order.
    #[inline]
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Whether the remote object advertised `interface`.
    pub fn has_interface(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// Builds a method call addressed at this proxy's object.
    ///
    /// The serial stays unassigned until the connection sends it.
    pub fn method_call(&self, interface: &str, member: &str) -> Message {
        Message::method_call(
            self.destination.as_str(),
            self.path.as_str(),
            interface,
            member,
        )
    }
}
