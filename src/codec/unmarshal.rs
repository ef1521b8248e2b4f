//! Message decoding.
//!
//! The reader walks a byte slice whose offset 0 is the start of the message,
//! so alignment arithmetic matches the writer's. [`decode_message`] checks
//! the declared lengths against the buffered byte count up front; after that
//! point any overrun means the frame lies about its own structure and is
//! malformed rather than incomplete.

use crate::message::{Message, MessageKind};

use super::value::split_first_type;
use super::{
    alignment_of, field, padding_for, DecodeError, Value, ENDIAN_BIG, ENDIAN_LITTLE,
    FIXED_HEADER_SIZE, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};

fn malformed(what: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(what.into())
}

/// Endianness-aware read cursor over one message.
struct UnmarshalBuf<'a> {
    data: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> UnmarshalBuf<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn align(&mut self, align: usize) -> Result<(), DecodeError> {
        let pad = padding_for(self.pos, align);
        if self.remaining() < pad {
            return Err(malformed("truncated padding"));
        }
        self.pos += pad;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(malformed("value overruns its frame"));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.align(2)?;
        let b = self.take(2)?;
        let raw = [b[0], b[1]];
        Ok(if self.little {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.align(4)?;
        let b = self.take(4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Ok(if self.little {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.align(8)?;
        let b = self.take(8)?;
        let raw = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        Ok(if self.little {
            u64::from_le_bytes(raw)
        } else {
            u64::from_be_bytes(raw)
        })
    }

    /// uint32 length + bytes + NUL.
    fn read_str(&mut self) -> Result<String, DecodeError> {
        let n = self.read_u32()? as usize;
        let bytes = self.take(n)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| malformed("string is not UTF-8"))?
            .to_owned();
        if s.contains('\0') {
            return Err(malformed("string contains interior NUL"));
        }
        if self.read_byte()? != 0 {
            return Err(malformed("string missing NUL terminator"));
        }
        Ok(s)
    }

    /// u8 length + bytes + NUL (signature form).
    fn read_sig(&mut self) -> Result<String, DecodeError> {
        let n = self.read_byte()? as usize;
        let bytes = self.take(n)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| malformed("signature is not UTF-8"))?
            .to_owned();
        if self.read_byte()? != 0 {
            return Err(malformed("signature missing NUL terminator"));
        }
        Ok(s)
    }

    /// Unmarshal one value of the given single complete type.
    fn read_value(&mut self, sig: &str) -> Result<Value, DecodeError> {
        let code = *sig
            .as_bytes()
            .first()
            .ok_or_else(|| malformed("empty signature"))?;
        let value = match code {
            b'y' => Value::Byte(self.read_byte()?),
            b'b' => match self.read_u32()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(malformed(format!("boolean out of range: {other}"))),
            },
            b'n' => Value::Int16(self.read_u16()? as i16),
            b'q' => Value::Uint16(self.read_u16()?),
            b'i' => Value::Int32(self.read_u32()? as i32),
            b'u' => Value::Uint32(self.read_u32()?),
            b'x' => Value::Int64(self.read_u64()? as i64),
            b't' => Value::Uint64(self.read_u64()?),
            b'd' => Value::Double(f64::from_bits(self.read_u64()?)),
            b's' => Value::Str(self.read_str()?),
            b'o' => Value::ObjectPath(self.read_str()?),
            b'g' => Value::Signature(self.read_sig()?),
            b'a' => {
                let elem = &sig[1..];
                let elem_code = *elem
                    .as_bytes()
                    .first()
                    .ok_or_else(|| malformed("array without element signature"))?;
                let n = self.read_u32()? as usize;
                if n > MAX_MESSAGE_SIZE as usize {
                    return Err(malformed("array length exceeds the message size cap"));
                }
                self.align(alignment_of(elem_code))?;
                let end = self.pos + n;
                if end > self.data.len() {
                    return Err(malformed("array length overruns its frame"));
                }
                let mut items = Vec::new();
                while self.pos < end {
                    let before = self.pos;
                    items.push(self.read_value(elem)?);
                    if self.pos == before {
                        return Err(malformed("array element occupies no bytes"));
                    }
                }
                if self.pos != end {
                    return Err(malformed("array length is not a whole number of elements"));
                }
                Value::Array {
                    elem: elem.to_owned(),
                    items,
                }
            }
            b'(' => {
                self.align(8)?;
                let mut rest = &sig[1..sig.len() - 1];
                let mut fields = Vec::new();
                while !rest.is_empty() {
                    let (head, tail) = split_first_type(rest)?;
                    fields.push(self.read_value(head)?);
                    rest = tail;
                }
                Value::Struct(fields)
            }
            b'v' => {
                let inner_sig = self.read_sig()?;
                let (head, rest) = split_first_type(&inner_sig)?;
                if !rest.is_empty() {
                    return Err(malformed("variant signature must be one complete type"));
                }
                Value::Variant(Box::new(self.read_value(head)?))
            }
            other => {
                return Err(malformed(format!(
                    "unknown type code {:?}",
                    other as char
                )))
            }
        };
        Ok(value)
    }
}

#[inline]
fn read_u32_at(bytes: &[u8], at: usize, little: bool) -> u32 {
    let raw = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
    if little {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    }
}

/// Decode one message from the front of `bytes`.
///
/// Returns the message and the exact number of bytes it occupied.
/// [`DecodeError::Incomplete`] means "keep the bytes and read more"; any
/// other error means the stream is carrying garbage.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, usize), DecodeError> {
    if bytes.len() < FIXED_HEADER_SIZE {
        return Err(DecodeError::Incomplete);
    }

    let little = match bytes[0] {
        ENDIAN_LITTLE => true,
        ENDIAN_BIG => false,
        other => return Err(malformed(format!("bad endianness byte 0x{other:02x}"))),
    };
    if bytes[3] != PROTOCOL_VERSION {
        return Err(malformed(format!("unsupported protocol version {}", bytes[3])));
    }

    let body_len = read_u32_at(bytes, 4, little) as usize;
    let serial = read_u32_at(bytes, 8, little);
    let fields_len = read_u32_at(bytes, 12, little) as usize;
    if body_len > MAX_MESSAGE_SIZE as usize || fields_len > MAX_MESSAGE_SIZE as usize {
        return Err(malformed("declared length exceeds the message size cap"));
    }

    let header_end = FIXED_HEADER_SIZE + fields_len;
    let body_start = header_end + padding_for(header_end, 8);
    let total = body_start + body_len;
    if total > MAX_MESSAGE_SIZE as usize {
        return Err(malformed("message exceeds the size cap"));
    }
    if bytes.len() < total {
        return Err(DecodeError::Incomplete);
    }

    let kind = MessageKind::from_raw(bytes[1])
        .ok_or_else(|| malformed(format!("unknown message kind {}", bytes[1])))?;
    if serial == 0 {
        return Err(malformed("message serial must not be zero"));
    }

    let mut msg = Message {
        kind,
        serial,
        flags: bytes[2],
        path: None,
        interface: None,
        member: None,
        error_name: None,
        reply_serial: None,
        destination: None,
        sender: None,
        body: Vec::new(),
    };

    let mut fields = UnmarshalBuf {
        data: &bytes[..header_end],
        pos: FIXED_HEADER_SIZE,
        little,
    };
    let mut body_sig: Option<String> = None;
    while fields.pos < header_end {
        fields.align(8)?;
        if fields.pos >= header_end {
            return Err(malformed("field array ends inside padding"));
        }
        let code = fields.read_byte()?;
        let sig = fields.read_sig()?;
        let (head, rest) = split_first_type(&sig)?;
        if !rest.is_empty() {
            return Err(malformed("field variant signature must be one complete type"));
        }
        let value = fields.read_value(head)?;
        match (code, value) {
            (field::PATH, Value::ObjectPath(s)) => msg.path = Some(s),
            (field::INTERFACE, Value::Str(s)) => msg.interface = Some(s),
            (field::MEMBER, Value::Str(s)) => msg.member = Some(s),
            (field::ERROR_NAME, Value::Str(s)) => msg.error_name = Some(s),
            (field::REPLY_SERIAL, Value::Uint32(n)) => msg.reply_serial = Some(n),
            (field::DESTINATION, Value::Str(s)) => msg.destination = Some(s),
            (field::SENDER, Value::Str(s)) => msg.sender = Some(s),
            (field::SIGNATURE, Value::Signature(s)) => body_sig = Some(s),
            (code @ field::PATH..=field::SIGNATURE, value) => {
                return Err(malformed(format!(
                    "header field {code} has unexpected type {}",
                    value.signature()
                )));
            }
            // Unknown field codes are skipped for forward compatibility.
            _ => {}
        }
    }

    if body_len > 0 {
        let sig = body_sig.ok_or_else(|| malformed("non-empty body without a signature field"))?;
        let mut body = UnmarshalBuf {
            data: &bytes[body_start..total],
            pos: 0,
            little,
        };
        let mut rest = sig.as_str();
        while !rest.is_empty() {
            let (head, tail) = split_first_type(rest)?;
            msg.body.push(body.read_value(head)?);
            rest = tail;
        }
        if body.pos != body_len {
            return Err(malformed("body shorter than its declared length"));
        }
    }

    Ok((msg, total))
}
