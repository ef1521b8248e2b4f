//! Message model with typed reply constructors.
//!
//! A [`Message`] carries the fixed-header data (kind, serial, flags), the
//! optional routing header fields, and the decoded body values. Replies are
//! built from the call they answer so the correlation fields are captured in
//! one place.
//!
//! # Example
//!
//! ```
//! use buswire::{Message, MessageKind, Value};
//!
//! let call = Message::method_call(
//!     "org.freedesktop.DBus",
//!     "/org/freedesktop/DBus",
//!     "org.freedesktop.DBus",
//!     "NameHasOwner",
//! )
//! .with_args(vec![Value::Str("org.example.App".into())]);
//!
//! assert_eq!(call.kind, MessageKind::MethodCall);
//! assert_eq!(call.member.as_deref(), Some("NameHasOwner"));
//! ```

use crate::codec::Value;
use crate::error::{BusError, Result};

/// Message kind byte from the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// A method invocation expecting a reply.
    MethodCall = 1,
    /// A successful reply to a method call.
    MethodReturn = 2,
    /// An error reply to a method call.
    Error = 3,
    /// A broadcast notification; never replied to.
    Signal = 4,
}

impl MessageKind {
    /// Decode the wire kind byte. Unknown values yield `None`.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(MessageKind::MethodCall),
            2 => Some(MessageKind::MethodReturn),
            3 => Some(MessageKind::Error),
            4 => Some(MessageKind::Signal),
            _ => None,
        }
    }
}

/// A single protocol message.
///
/// Header fields are optional on the wire; which ones are required depends on
/// the kind (the codec enforces the mandatory set at encode time). `serial`
/// is 0 until the connection assigns one when the message is sent.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message kind (fixed header byte 2).
    pub kind: MessageKind,
    /// Wire serial; 0 means "not yet assigned".
    pub serial: u32,
    /// Raw flags byte; passed through unmodified.
    pub flags: u8,
    /// Object path this message is about.
    pub path: Option<String>,
    /// Interface name.
    pub interface: Option<String>,
    /// Method or signal name.
    pub member: Option<String>,
    /// Error name (ERROR messages only).
    pub error_name: Option<String>,
    /// Serial of the call this message answers.
    pub reply_serial: Option<u32>,
    /// Intended recipient bus name.
    pub destination: Option<String>,
    /// Unique name of the sender, filled in by the bus.
    pub sender: Option<String>,
    /// Decoded body values, in signature order.
    pub body: Vec<Value>,
}

impl Message {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: 0,
            flags: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            body: Vec::new(),
        }
    }

    /// Build a method call addressed to `destination`.
    pub fn method_call(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        let mut msg = Self::empty(MessageKind::MethodCall);
        msg.destination = Some(destination.into());
        msg.path = Some(path.into());
        msg.interface = Some(interface.into());
        msg.member = Some(member.into());
        msg
    }

    /// Build a signal originating at `path`.
    pub fn signal(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        let mut msg = Self::empty(MessageKind::Signal);
        msg.path = Some(path.into());
        msg.interface = Some(interface.into());
        msg.member = Some(member.into());
        msg
    }

    /// Build a successful reply to `call`.
    ///
    /// Captures `reply_serial` from the call's serial and addresses the reply
    /// back to the call's sender.
    pub fn method_return(call: &Message) -> Self {
        let mut msg = Self::empty(MessageKind::MethodReturn);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg
    }

    /// Build an error reply to `call` with a human-readable description as
    /// the single body argument.
    pub fn error_reply(
        call: &Message,
        error_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut msg = Self::empty(MessageKind::Error);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg.error_name = Some(error_name.into());
        msg.body.push(Value::Str(text.into()));
        msg
    }

    /// Replace the body values (builder style).
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.body = args;
        self
    }

    /// Set the flags byte (builder style).
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Append one body value.
    pub fn push_arg(&mut self, arg: Value) {
        self.body.push(arg);
    }

    /// Whether this is an ERROR message.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// Whether this message answers a call (METHOD_RETURN or ERROR).
    #[inline]
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, MessageKind::MethodReturn | MessageKind::Error)
    }

    /// First body value as a string slice, if it is one.
    pub fn first_string(&self) -> Option<&str> {
        match self.body.first() {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Convert a reply into a result: METHOD_RETURN passes through, ERROR
    /// becomes [`BusError::UnknownObject`] for the well-known missing-object
    /// error name and [`BusError::Remote`] for everything else.
    pub fn into_reply_result(self) -> Result<Message> {
        if self.kind != MessageKind::Error {
            return Ok(self);
        }
        let name = self
            .error_name
            .clone()
            .unwrap_or_else(|| "org.freedesktop.DBus.Error.Failed".into());
        let message = self.first_string().unwrap_or_default().to_owned();
        if name == crate::connection::ERR_UNKNOWN_OBJECT {
            return Err(BusError::UnknownObject(message));
        }
        Err(BusError::Remote { name, message })
    }
}
