//! Receive buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Incoming socket reads are
//! appended as-is; complete messages are carved off the front. The codec
//! reports how many bytes a message occupied, so the buffer never needs to
//! understand the wire format itself, and an incomplete tail is simply left
//! in place until more bytes arrive.
//!
//! # Example
//!
//! ```ignore
//! use buswire::protocol::RecvBuffer;
//!
//! let mut buffer = RecvBuffer::new();
//! buffer.extend(&chunk_from_socket);
//! for msg in buffer.drain()? {
//!     println!("got {:?} serial {}", msg.kind, msg.serial);
//! }
//! ```

use bytes::BytesMut;

use crate::codec::{decode_message, DecodeError};
use crate::error::{BusError, Result};
use crate::message::Message;

/// Initial buffer capacity; one socket read's worth.
const INITIAL_CAPACITY: usize = 4096;

/// Buffer for accumulating incoming bytes and extracting complete messages.
///
/// Messages come out in FIFO order. Chunking of the input is irrelevant:
/// any split of the same byte stream, down to one byte per call, yields the
/// same message sequence.
pub struct RecvBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
}

impl RecvBuffer {
    /// Create an empty receive buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one message from the front of the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(message))`: the buffer advanced past exactly the bytes
    ///   that message occupied;
    /// - `Ok(None)`: no complete message yet; the buffer is untouched;
    /// - `Err(BusError::InvalidFrame)`: the front of the buffer is not a
    ///   valid frame. The bytes are left in place; a stream that has lost
    ///   framing cannot be resynchronized.
    pub fn pop_message(&mut self) -> Result<Option<Message>> {
        match decode_message(&self.buffer) {
            Ok((msg, used)) => {
                let _ = self.buffer.split_to(used);
                Ok(Some(msg))
            }
            Err(DecodeError::Incomplete) => Ok(None),
            Err(DecodeError::Malformed(reason)) => Err(BusError::InvalidFrame(reason)),
        }
    }

    /// Extract every complete message, in FIFO order.
    pub fn drain(&mut self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        while let Some(msg) = self.pop_message()? {
            messages.push(msg);
        }
        Ok(messages)
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}
