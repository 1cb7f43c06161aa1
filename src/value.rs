//! The dynamic D-Bus value algebra.

use crate::object_path::ObjectPathBuf;
use crate::signature::{Signature, SignatureBuf, SignatureError};

/// Compute the concatenated signature of a sequence of values, such as a
/// message body.
pub(crate) fn signature_of(values: &[Value]) -> Result<SignatureBuf, SignatureError> {
    let mut buf = SignatureBuf::empty();

    for value in values {
        value.write_signature(&mut buf)?;
    }

    Ok(buf)
}

/// A dynamically typed D-Bus value.
///
/// Every value knows its own signature; [`Value::signature`] computes it.
/// Values are what message bodies and header-field variants are made of.
///
/// # Examples
///
/// ```
/// use steadybus::Value;
///
/// let value = Value::Struct(vec![Value::UInt32(42), Value::from("hello")]);
/// assert_eq!(value.signature()?.as_str(), "(us)");
/// # Ok::<_, steadybus::SignatureError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned 8-bit integer (`y`).
    Byte(u8),
    /// Boolean (`b`), encoded as 32-bit 0 or 1.
    Bool(bool),
    /// Signed 16-bit integer (`n`).
    Int16(i16),
    /// Unsigned 16-bit integer (`q`).
    UInt16(u16),
    /// Signed 32-bit integer (`i`).
    Int32(i32),
    /// Unsigned 32-bit integer (`u`).
    UInt32(u32),
    /// Signed 64-bit integer (`x`).
    Int64(i64),
    /// Unsigned 64-bit integer (`t`).
    UInt64(u64),
    /// IEEE 754 double (`d`).
    Double(f64),
    /// UTF-8 string (`s`).
    String(String),
    /// Object path (`o`).
    ObjectPath(ObjectPathBuf),
    /// Type signature (`g`).
    Signature(SignatureBuf),
    /// Index into the out-of-band file-descriptor array (`h`).
    UnixFd(u32),
    /// Array (`a`). Carries the element signature so that empty arrays stay
    /// typed.
    Array(SignatureBuf, Vec<Value>),
    /// Struct (`(...)`).
    Struct(Vec<Value>),
    /// Dict entry (`{..}`), only valid as an array element.
    DictEntry(Box<Value>, Box<Value>),
    /// Variant (`v`), a self-describing wrapper around one complete value.
    Variant(Box<Value>),
}

impl Value {
    /// Construct an empty array of the given element signature.
    ///
    /// # Examples
    ///
    /// ```
    /// use steadybus::{Signature, Value};
    ///
    /// let value = Value::empty_array(Signature::new_const(b"{sv}"));
    /// assert_eq!(value.signature()?.as_str(), "a{sv}");
    /// # Ok::<_, steadybus::SignatureError>(())
    /// ```
    pub fn empty_array(element: &Signature) -> Self {
        Value::Array(element.to_owned(), Vec::new())
    }

    /// Compute the signature of this value.
    pub fn signature(&self) -> Result<SignatureBuf, SignatureError> {
        let mut buf = SignatureBuf::empty();
        self.write_signature(&mut buf)?;
        Ok(buf)
    }

    fn write_signature(&self, buf: &mut SignatureBuf) -> Result<(), SignatureError> {
        let simple = match self {
            Value::Byte(..) => Some(Signature::BYTE),
            Value::Bool(..) => Some(Signature::BOOLEAN),
            Value::Int16(..) => Some(Signature::INT16),
            Value::UInt16(..) => Some(Signature::UINT16),
            Value::Int32(..) => Some(Signature::INT32),
            Value::UInt32(..) => Some(Signature::UINT32),
            Value::Int64(..) => Some(Signature::INT64),
            Value::UInt64(..) => Some(Signature::UINT64),
            Value::Double(..) => Some(Signature::DOUBLE),
            Value::String(..) => Some(Signature::STRING),
            Value::ObjectPath(..) => Some(Signature::OBJECT_PATH),
            Value::Signature(..) => Some(Signature::SIGNATURE),
            Value::UnixFd(..) => Some(Signature::UNIX_FD),
            Value::Variant(..) => Some(Signature::VARIANT),
            _ => None,
        };

        if let Some(signature) = simple {
            return buf.push_signature(signature);
        }

        match self {
            Value::Array(element, ..) => {
                let mut full = String::with_capacity(element.len() + 1);
                full.push('a');
                full.push_str(element.as_str());
                buf.push_signature(SignatureBuf::new(full.as_bytes())?.as_signature())
            }
            Value::Struct(fields) => {
                let mut inner = SignatureBuf::empty();

                for field in fields {
                    field.write_signature(&mut inner)?;
                }

                let mut full = String::with_capacity(inner.len() + 2);
                full.push('(');
                full.push_str(inner.as_str());
                full.push(')');
                buf.push_signature(SignatureBuf::new(full.as_bytes())?.as_signature())
            }
            Value::DictEntry(key, value) => {
                let mut inner = SignatureBuf::empty();
                key.write_signature(&mut inner)?;
                value.write_signature(&mut inner)?;

                let mut full = String::with_capacity(inner.len() + 2);
                full.push('{');
                full.push_str(inner.as_str());
                full.push('}');
                // Validate in array position, where dict entries are legal.
                let mut array = String::with_capacity(full.len() + 1);
                array.push('a');
                array.push_str(&full);
                SignatureBuf::new(array.as_bytes())?;

                buf.push_signature(unsafe {
                    // SAFETY: Validated as part of the array signature above.
                    Signature::new_unchecked(full.as_bytes())
                })
            }
            _ => unreachable!(),
        }
    }

    /// Access the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Access the value as a `u32`, if it is one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(n) => Some(*n),
            _ => None,
        }
    }

    /// Access the value as a `bool`, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Unwrap one level of variant nesting, if the value is a variant.
    pub fn as_variant(&self) -> Option<&Value> {
        match self {
            Value::Variant(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Value::Byte(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::Int16(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::UInt16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures() {
        assert_eq!(Value::Byte(1).signature().unwrap().as_str(), "y");
        assert_eq!(Value::from("x").signature().unwrap().as_str(), "s");
        assert_eq!(
            Value::Struct(vec![Value::Int32(1), Value::from("a")])
                .signature()
                .unwrap()
                .as_str(),
            "(is)"
        );
        assert_eq!(
            Value::empty_array(Signature::new_const(b"{sv}"))
                .signature()
                .unwrap()
                .as_str(),
            "a{sv}"
        );
        assert_eq!(
            Value::Variant(Box::new(Value::UInt32(7)))
                .signature()
                .unwrap()
                .as_str(),
            "v"
        );
    }

    #[test]
    fn nested_array_signature() {
        let value = Value::Array(
            SignatureBuf::new(b"ai").unwrap(),
            vec![Value::Array(
                SignatureBuf::new(b"i").unwrap(),
                vec![Value::Int32(1)],
            )],
        );
        assert_eq!(value.signature().unwrap().as_str(), "aai");
    }

    #[test]
    fn dict_entry_signature() {
        let entry = Value::DictEntry(
            Box::new(Value::from("key")),
            Box::new(Value::Variant(Box::new(Value::UInt32(1)))),
        );
        assert_eq!(entry.signature().unwrap().as_str(), "{sv}");
    }
}
