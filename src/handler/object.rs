//! Exported-object capability interface.

use crate::message::Message;

/// Capability interface for exported objects.
///
/// The dispatch layer hands the object every METHOD_CALL addressed to its
/// path, except `Introspect`, which the engine answers itself. Returning
/// `Some(reply)` sends that reply (built with [`Message::method_return`] or
/// [`Message::error_reply`] so the correlation fields are right); `None`
/// sends nothing.
///
/// Handlers must not block or perform bus I/O; they turn a call into an
/// optional reply and return.
pub trait Handler: Send {
    /// Handle one incoming call, optionally producing the reply.
    fn handle(&mut self, call: &Message) -> Option<Message>;
}

/// Adapter exposing a plain closure as a [`Handler`].
///
/// # Example
///
/// ```
/// use buswire::{FnHandler, Message};
///
/// let mut echo = FnHandler::new(|call: &Message| {
///     let mut reply = Message::method_return(call);
///     reply.body = call.body.clone();
///     Some(reply)
/// });
/// ```
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: FnMut(&Message) -> Option<Message> + Send,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Handler for FnHandler<F>
where
    F: FnMut(&Message) -> Option<Message> + Send,
{
    fn handle(&mut self, call: &Message) -> Option<Message> {
        (self.0)(call)
    }
}
