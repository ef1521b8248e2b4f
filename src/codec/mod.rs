//! Wire codec: D-Bus 1.0 binary marshalling.
//!
//! Implements the message layout:
//! ```text
//! ┌────────┬──────┬───────┬─────────┬──────────┬──────────┬─────────────┬──────┐
//! │ Endian │ Kind │ Flags │ Version │ Body len │ Serial   │ Field array │ Body │
//! │ 1 byte │ 1 B  │ 1 B   │ 1 B     │ uint32   │ uint32   │ a(yv)       │ ...  │
//! └────────┴──────┴───────┴─────────┴──────────┴──────────┴─────────────┴──────┘
//! ```
//!
//! The endianness byte (`l` or `B`) governs every multi-byte integer in the
//! message. The field array carries the routing headers as `(code, variant)`
//! pairs; the body starts at the next 8-byte boundary after it and is typed
//! by the `Signature` header field.
//!
//! Encoding always emits little-endian; decoding accepts both. Decoding is
//! incremental-friendly: [`decode_message`] reports [`DecodeError::Incomplete`]
//! until a whole frame is buffered and otherwise returns the exact consumed
//! byte count, so callers can carve messages off the front of a growing
//! buffer.

mod marshal;
mod unmarshal;
mod value;

pub use marshal::encode_message;
pub use unmarshal::decode_message;
pub use value::{signature_of, Value};

use thiserror::Error;

/// Endianness marker for little-endian messages.
pub const ENDIAN_LITTLE: u8 = b'l';

/// Endianness marker for big-endian messages.
pub const ENDIAN_BIG: u8 = b'B';

/// The only supported major protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Bytes before the header field array: 12-byte preamble plus the array's
/// own uint32 length.
pub const FIXED_HEADER_SIZE: usize = 16;

/// Maximum total message size (2^27 bytes, the D-Bus 1.0 limit).
pub const MAX_MESSAGE_SIZE: u32 = 0x0800_0000;

/// Message flag bits (fixed header byte 3).
pub mod flags {
    /// The caller does not want a reply.
    pub const NO_REPLY_EXPECTED: u8 = 0x1;
    /// Do not launch an owner for the destination name.
    pub const NO_AUTO_START: u8 = 0x2;
}

/// Header field codes for the `a(yv)` field array.
pub(crate) mod field {
    pub const PATH: u8 = 1;
    pub const INTERFACE: u8 = 2;
    pub const MEMBER: u8 = 3;
    pub const ERROR_NAME: u8 = 4;
    pub const REPLY_SERIAL: u8 = 5;
    pub const DESTINATION: u8 = 6;
    pub const SENDER: u8 = 7;
    pub const SIGNATURE: u8 = 8;
}

/// Why a decode attempt did not produce a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than one whole frame; keep them and read more.
    #[error("incomplete frame")]
    Incomplete,

    /// The bytes cannot be a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Alignment in bytes of the type that `code` introduces.
///
/// Struct openers align to 8; variants and the string-like types whose
/// length prefix is a single byte align to 1.
pub(crate) fn alignment_of(code: u8) -> usize {
    match code {
        b'y' | b'g' | b'v' => 1,
        b'n' | b'q' => 2,
        b'b' | b'i' | b'u' | b's' | b'o' | b'a' => 4,
        b'x' | b't' | b'd' | b'(' => 8,
        _ => 1,
    }
}

/// Padding needed to bring `len` up to an `align` boundary.
#[inline]
pub(crate) fn padding_for(len: usize, align: usize) -> usize {
    (align - len % align) % align
}
