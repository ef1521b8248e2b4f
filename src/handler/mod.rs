//! Handler module - targets for incoming calls.
//!
//! Provides:
//! - [`Handler`] - capability interface an exported object implements
//! - [`FnHandler`] - closure adapter for simple objects
//! - [`Node`] - the exported object tree, addressed by object path
//!
//! # Example
//!
//! ```
//! use buswire::{FnHandler, Message, Node};
//!
//! let mut root = Node::new();
//! root.export(
//!     "/org/example/Echo",
//!     Box::new(FnHandler::new(|call: &Message| {
//!         let mut reply = Message::method_return(call);
//!         reply.body = call.body.clone();
//!         Some(reply)
//!     })),
//! )
//! .unwrap();
//!
//! assert!(root.lookup("/org/example/Echo").unwrap().has_object());
//! ```

mod object;
mod tree;

pub use object::{FnHandler, Handler};
pub use tree::Node;
