//! Message encoding.
//!
//! The writer tracks its absolute offset so alignment padding can be emitted
//! with plain byte pushes. The body is marshalled first into its own buffer;
//! since the body always starts on an 8-byte boundary, padding computed from
//! offset 0 is identical to padding computed from the real message offset.

use crate::error::{BusError, Result};
use crate::message::{Message, MessageKind};

use super::value::signature_of;
use super::{
    alignment_of, field, padding_for, Value, ENDIAN_LITTLE, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};

/// Growable little-endian write buffer with alignment tracking.
struct MarshalBuf {
    buf: Vec<u8>,
}

impl MarshalBuf {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    #[inline]
    fn len(&self) -> usize {
        self.buf.len()
    }

    fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Pad with NUL bytes up to an `align` boundary.
    fn align(&mut self, align: usize) {
        let pad = padding_for(self.buf.len(), align);
        self.buf.extend(std::iter::repeat(0).take(pad));
    }

    fn put_byte(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.align(2);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i16(&mut self, v: i16) {
        self.align(2);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.align(4);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.align(4);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.align(8);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.align(8);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f64(&mut self, v: f64) {
        self.align(8);
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// uint32 length + bytes + NUL.
    fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// u8 length + bytes + NUL (signature form).
    fn put_sig(&mut self, s: &str) -> Result<()> {
        if s.len() > 255 {
            return Err(BusError::InvalidFrame(format!(
                "signature of {} bytes exceeds the 255-byte limit",
                s.len()
            )));
        }
        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Reserve an aligned uint32 slot for later patching.
    fn reserve_u32(&mut self) -> usize {
        self.align(4);
        let at = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        at
    }

    fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Marshal one value, padding to its alignment first.
    fn put_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Byte(v) => self.put_byte(*v),
            Value::Bool(v) => self.put_u32(*v as u32),
            Value::Int16(v) => self.put_i16(*v),
            Value::Uint16(v) => self.put_u16(*v),
            Value::Int32(v) => self.put_i32(*v),
            Value::Uint32(v) => self.put_u32(*v),
            Value::Int64(v) => self.put_i64(*v),
            Value::Uint64(v) => self.put_u64(*v),
            Value::Double(v) => self.put_f64(*v),
            Value::Str(s) => self.put_str(s),
            Value::ObjectPath(s) => self.put_str(s),
            Value::Signature(s) => self.put_sig(s)?,
            Value::Array { elem, items } => {
                let elem_code = *elem.as_bytes().first().ok_or_else(|| {
                    BusError::InvalidFrame("array without element signature".into())
                })?;
                // Array length counts element bytes only, not the padding
                // between the length field and the first element.
                let len_at = self.reserve_u32();
                self.align(alignment_of(elem_code));
                let start = self.buf.len();
                for item in items {
                    if item.signature() != *elem {
                        return Err(BusError::InvalidFrame(format!(
                            "array element {} does not match element signature {}",
                            item.signature(),
                            elem
                        )));
                    }
                    self.put_value(item)?;
                }
                let n = self.buf.len() - start;
                self.patch_u32(len_at, n as u32);
            }
            Value::Struct(fields) => {
                self.align(8);
                for f in fields {
                    self.put_value(f)?;
                }
            }
            Value::Variant(inner) => {
                self.put_sig(&inner.signature())?;
                self.put_value(inner)?;
            }
        }
        Ok(())
    }
}

/// One `(code, variant)` entry of the header field array.
fn put_string_field(buf: &mut MarshalBuf, code: u8, sig: &str, s: &str) -> Result<()> {
    buf.align(8);
    buf.put_byte(code);
    buf.put_sig(sig)?;
    if sig == "g" {
        buf.put_sig(s)?;
    } else {
        buf.put_str(s);
    }
    Ok(())
}

fn put_u32_field(buf: &mut MarshalBuf, code: u8, v: u32) -> Result<()> {
    buf.align(8);
    buf.put_byte(code);
    buf.put_sig("u")?;
    buf.put_u32(v);
    Ok(())
}

/// The header fields a message must carry before it may hit the wire.
fn check_sendable(msg: &Message) -> Result<()> {
    if msg.serial == 0 {
        return Err(BusError::InvalidFrame("serial not assigned".into()));
    }
    let missing = match msg.kind {
        MessageKind::MethodCall => msg.path.is_none() || msg.member.is_none(),
        MessageKind::Signal => {
            msg.path.is_none() || msg.interface.is_none() || msg.member.is_none()
        }
        MessageKind::MethodReturn => msg.reply_serial.is_none(),
        MessageKind::Error => msg.error_name.is_none() || msg.reply_serial.is_none(),
    };
    if missing {
        return Err(BusError::InvalidFrame(format!(
            "{:?} is missing a mandatory header field",
            msg.kind
        )));
    }
    Ok(())
}

/// Encode a message into wire bytes (little-endian).
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    check_sendable(msg)?;

    let mut body = MarshalBuf::new();
    for v in &msg.body {
        body.put_value(v)?;
    }
    let body_bytes = body.into_vec();
    if body_bytes.len() > MAX_MESSAGE_SIZE as usize {
        return Err(BusError::InvalidFrame(format!(
            "body of {} bytes exceeds the message size cap",
            body_bytes.len()
        )));
    }

    let mut out = MarshalBuf::new();
    out.put_byte(ENDIAN_LITTLE);
    out.put_byte(msg.kind as u8);
    out.put_byte(msg.flags);
    out.put_byte(PROTOCOL_VERSION);
    out.put_u32(body_bytes.len() as u32);
    out.put_u32(msg.serial);

    // Field array: uint32 byte length, then 8-aligned (yv) entries. The
    // length slot ends at offset 16, so the first entry needs no padding.
    let len_at = out.reserve_u32();
    let fields_start = out.len();
    if let Some(s) = &msg.path {
        put_string_field(&mut out, field::PATH, "o", s)?;
    }
    if let Some(s) = &msg.interface {
        put_string_field(&mut out, field::INTERFACE, "s", s)?;
    }
    if let Some(s) = &msg.member {
        put_string_field(&mut out, field::MEMBER, "s", s)?;
    }
    if let Some(s) = &msg.error_name {
        put_string_field(&mut out, field::ERROR_NAME, "s", s)?;
    }
    if let Some(n) = msg.reply_serial {
        put_u32_field(&mut out, field::REPLY_SERIAL, n)?;
    }
    if let Some(s) = &msg.destination {
        put_string_field(&mut out, field::DESTINATION, "s", s)?;
    }
    if let Some(s) = &msg.sender {
        put_string_field(&mut out, field::SENDER, "s", s)?;
    }
    if !msg.body.is_empty() {
        put_string_field(&mut out, field::SIGNATURE, "g", &signature_of(&msg.body))?;
    }
    let fields_len = out.len() - fields_start;
    out.patch_u32(len_at, fields_len as u32);

    out.align(8);
    let mut bytes = out.into_vec();
    bytes.extend_from_slice(&body_bytes);

    if bytes.len() > MAX_MESSAGE_SIZE as usize {
        return Err(BusError::InvalidFrame(format!(
            "message of {} bytes exceeds the message size cap",
            bytes.len()
        )));
    }
    Ok(bytes)
}
