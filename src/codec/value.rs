//! Body values and type signatures.
//!
//! [`Value`] covers the basic protocol types plus arrays, structs, and
//! variants. Dict entries and file-descriptor passing are not supported.
//! Every value knows its own single-complete-type signature; arrays carry
//! their element signature explicitly so empty arrays still marshal.

use super::DecodeError;

/// One typed body value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `y`: unsigned byte.
    Byte(u8),
    /// `b`: boolean, marshalled as uint32 0/1.
    Bool(bool),
    /// `n`: signed 16-bit.
    Int16(i16),
    /// `q`: unsigned 16-bit.
    Uint16(u16),
    /// `i`: signed 32-bit.
    Int32(i32),
    /// `u`: unsigned 32-bit.
    Uint32(u32),
    /// `x`: signed 64-bit.
    Int64(i64),
    /// `t`: unsigned 64-bit.
    Uint64(u64),
    /// `d`: IEEE 754 double.
    Double(f64),
    /// `s`: UTF-8 string.
    Str(String),
    /// `o`: object path.
    ObjectPath(String),
    /// `g`: type signature.
    Signature(String),
    /// `a`: uniform array; `elem` is the signature of one element.
    Array { elem: String, items: Vec<Value> },
    /// `(...)`: struct with one value per field.
    Struct(Vec<Value>),
    /// `v`: a value tagged with its own signature.
    Variant(Box<Value>),
}

impl Value {
    /// Signature of this value as a single complete type.
    pub fn signature(&self) -> String {
        match self {
            Value::Byte(_) => "y".into(),
            Value::Bool(_) => "b".into(),
            Value::Int16(_) => "n".into(),
            Value::Uint16(_) => "q".into(),
            Value::Int32(_) => "i".into(),
            Value::Uint32(_) => "u".into(),
            Value::Int64(_) => "x".into(),
            Value::Uint64(_) => "t".into(),
            Value::Double(_) => "d".into(),
            Value::Str(_) => "s".into(),
            Value::ObjectPath(_) => "o".into(),
            Value::Signature(_) => "g".into(),
            Value::Array { elem, .. } => format!("a{elem}"),
            Value::Struct(fields) => {
                let mut sig = String::from("(");
                for f in fields {
                    sig.push_str(&f.signature());
                }
                sig.push(')');
                sig
            }
            Value::Variant(_) => "v".into(),
        }
    }

    /// Build a `Value::Array` of strings (`as`).
    pub fn string_array<I, S>(items: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Array {
            elem: "s".into(),
            items: items.into_iter().map(|s| Value::Str(s.into())).collect(),
        }
    }

    /// The contained string, for the three string-like types.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) | Value::Signature(s) => Some(s),
            _ => None,
        }
    }

    /// The contained uint32, if this is one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint32(n) => Some(*n),
            _ => None,
        }
    }

    /// The contained bool, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Concatenated signature of a value sequence (a message body).
pub fn signature_of(values: &[Value]) -> String {
    let mut sig = String::new();
    for v in values {
        sig.push_str(&v.signature());
    }
    sig
}

/// Split one complete type off the front of a signature.
///
/// Returns `(head, rest)` where `head` is a single complete type. Fails on
/// an empty signature, an unknown type code, a bare `a`, or an unbalanced
/// or empty struct (`()` has no wire size, so no decoder loop over it can
/// advance).
pub(crate) fn split_first_type(sig: &str) -> Result<(&str, &str), DecodeError> {
    let bytes = sig.as_bytes();
    let end = complete_type_end(bytes, 0)?;
    Ok((&sig[..end], &sig[end..]))
}

/// Index one past the complete type starting at `start`.
fn complete_type_end(bytes: &[u8], start: usize) -> Result<usize, DecodeError> {
    let code = *bytes
        .get(start)
        .ok_or_else(|| DecodeError::Malformed("empty signature".into()))?;
    match code {
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'v' => Ok(start + 1),
        b'a' => complete_type_end(bytes, start + 1),
        b'(' => {
            let mut pos = start + 1;
            while *bytes
                .get(pos)
                .ok_or_else(|| DecodeError::Malformed("unterminated struct signature".into()))?
                != b')'
            {
                pos = complete_type_end(bytes, pos)?;
            }
            if pos == start + 1 {
                return Err(DecodeError::Malformed("empty struct signature".into()));
            }
            Ok(pos + 1)
        }
        other => Err(DecodeError::Malformed(format!(
            "unknown type code {:?} in signature",
            other as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_signatures() {
        assert_eq!(Value::Byte(1).signature(), "y");
        assert_eq!(Value::Bool(true).signature(), "b");
        assert_eq!(Value::Uint32(0).signature(), "u");
        assert_eq!(Value::Int64(-1).signature(), "x");
        assert_eq!(Value::Double(0.5).signature(), "d");
        assert_eq!(Value::Str("x".into()).signature(), "s");
        assert_eq!(Value::ObjectPath("/".into()).signature(), "o");
        assert_eq!(Value::Signature("as".into()).signature(), "g");
    }

    #[test]
    fn test_container_signatures() {
        let arr = Value::string_array(["a", "b"]);
        assert_eq!(arr.signature(), "as");

        let empty = Value::Array {
            elem: "u".into(),
            items: vec![],
        };
        assert_eq!(empty.signature(), "au");

        let st = Value::Struct(vec![Value::Uint32(1), Value::Str("x".into())]);
        assert_eq!(st.signature(), "(us)");

        let var = Value::Variant(Box::new(Value::Byte(7)));
        assert_eq!(var.signature(), "v");

        let nested = Value::Array {
            elem: "(us)".into(),
            items: vec![],
        };
        assert_eq!(nested.signature(), "a(us)");
    }

    #[test]
    fn test_signature_of_sequence() {
        let body = vec![
            Value::Str("hi".into()),
            Value::Uint32(5),
            Value::string_array(["x"]),
        ];
        assert_eq!(signature_of(&body), "suas");
        assert_eq!(signature_of(&[]), "");
    }

    #[test]
    fn test_split_first_type() {
        assert_eq!(split_first_type("sus").unwrap(), ("s", "us"));
        assert_eq!(split_first_type("asu").unwrap(), ("as", "u"));
        assert_eq!(split_first_type("a(ii)s").unwrap(), ("a(ii)", "s"));
        assert_eq!(split_first_type("(i(ss))x").unwrap(), ("(i(ss))", "x"));
        assert_eq!(split_first_type("aay").unwrap(), ("aay", ""));
        assert_eq!(split_first_type("v").unwrap(), ("v", ""));
    }

    #[test]
    fn test_split_first_type_errors() {
        assert!(split_first_type("").is_err());
        assert!(split_first_type("a").is_err());
        assert!(split_first_type("(ii").is_err());
        assert!(split_first_type("z").is_err());
        assert!(split_first_type("m").is_err());
    }

    #[test]
    fn test_empty_struct_rejected_everywhere() {
        assert!(split_first_type("()").is_err());
        assert!(split_first_type("a()").is_err());
        assert!(split_first_type("(())").is_err());
        assert!(split_first_type("(i())").is_err());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Str("x".into()).as_str(), Some("x"));
        assert_eq!(Value::ObjectPath("/a".into()).as_str(), Some("/a"));
        assert_eq!(Value::Uint32(4).as_str(), None);
        assert_eq!(Value::Uint32(4).as_u32(), Some(4));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Byte(1).as_u32(), None);
    }
}
