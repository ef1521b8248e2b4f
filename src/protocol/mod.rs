//! Protocol module - framing over a byte stream.
//!
//! The codec understands one message at a time; this layer turns an
//! arbitrarily chunked byte stream into whole messages:
//! - receive buffer accumulating partial reads
//! - FIFO extraction of complete messages

mod recv_buffer;

pub use recv_buffer::RecvBuffer;
