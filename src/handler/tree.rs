//! Exported object tree.
//!
//! Objects are exported at absolute slash-separated paths; the tree mirrors
//! the path hierarchy, with intermediate nodes created on demand. A node can
//! exist without an object (as the parent of something deeper), and every
//! node can describe itself as an introspection XML document listing its
//! children.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{BusError, Result};

use super::object::Handler;

/// DOCTYPE line every introspection document starts with.
const INTROSPECT_DOCTYPE: &str = "<!DOCTYPE node PUBLIC \
\"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\" \
\"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

/// One node of the object tree.
///
/// The connection owns a root `Node` for the path `/`; everything else
/// hangs off it by path segment.
#[derive(Default)]
pub struct Node {
    children: HashMap<String, Node>,
    object: Option<Box<dyn Handler>>,
}

impl Node {
    /// Create an empty node.
    pub fn new() -> Self {
        Self {
            children: HashMap::new(),
            object: None,
        }
    }

    /// Walk to the node at `path` without creating anything.
    ///
    /// Malformed paths simply find nothing.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let segments = split_path(path).ok()?;
        let mut node = self;
        for seg in segments {
            node = node.children.get(seg)?;
        }
        Some(node)
    }

    /// Mutable variant of [`Node::lookup`], used by dispatch to reach the
    /// exported object.
    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut Node> {
        let segments = split_path(path).ok()?;
        let mut node = self;
        for seg in segments {
            node = node.children.get_mut(seg)?;
        }
        Some(node)
    }

    /// Attach an object at `path`, creating intermediate nodes as needed.
    ///
    /// Exporting twice at the same path replaces the previous object (last
    /// writer wins). The path must be absolute with non-empty segments of
    /// `[A-Za-z0-9_]`.
    pub fn export(&mut self, path: &str, object: Box<dyn Handler>) -> Result<()> {
        let segments = split_path(path)?;
        let mut node = self;
        for seg in segments {
            node = node.children.entry(seg.to_owned()).or_default();
        }
        if node.object.replace(object).is_some() {
            debug!(path, "replacing previously exported object");
        }
        Ok(())
    }

    /// The exported object at this node, if any.
    pub fn object_mut(&mut self) -> Option<&mut (dyn Handler + 'static)> {
        self.object.as_deref_mut()
    }

    /// Whether an object is exported here.
    pub fn has_object(&self) -> bool {
        self.object.is_some()
    }

    /// Child node names, sorted.
    pub fn child_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.children.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Introspection document for this node: its children and the
    /// `Introspectable` interface every node answers.
    pub fn introspect(&self) -> String {
        let mut xml = String::from(INTROSPECT_DOCTYPE);
        xml.push_str("<node>\n");
        for name in self.child_names() {
            xml.push_str("  <node name=\"");
            xml.push_str(name);
            xml.push_str("\"/>\n");
        }
        xml.push_str(concat!(
            "  <interface name=\"org.freedesktop.DBus.Introspectable\">\n",
            "    <method name=\"Introspect\">\n",
            "      <arg name=\"data\" type=\"s\" direction=\"out\"/>\n",
            "    </method>\n",
            "  </interface>\n",
        ));
        xml.push_str("</node>\n");
        xml
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("children", &self.child_names())
            .field("has_object", &self.has_object())
            .finish()
    }
}

/// Validate an absolute object path and split it into segments.
///
/// `/` is the root and yields no segments.
fn split_path(path: &str) -> Result<Vec<&str>> {
    let invalid = || BusError::InvalidFrame(format!("invalid object path {path:?}"));
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for seg in rest.split('/') {
        if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(invalid());
        }
        segments.push(seg);
    }
    Ok(segments)
}
