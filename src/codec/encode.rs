use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, ErrorKind, Result};
use crate::proto::{Endianness, MAX_ARRAY_LENGTH};
use crate::signature::Signature;
use crate::utils::padding_to;
use crate::value::{signature_of, Value};

/// A position-tracking writer for a single message, with the byte order
/// fixed up front.
pub(crate) struct Encoder<'a> {
    buf: &'a mut Vec<u8>,
    order: Endianness,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>, order: Endianness) -> Self {
        Self { buf, order }
    }

    /// The current offset from the start of the message.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Write zero bytes until the offset is a multiple of `align`.
    pub(crate) fn align(&mut self, align: usize) {
        let padding = padding_to(align, self.buf.len());
        self.buf.resize(self.buf.len() + padding, 0);
    }

    pub(crate) fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn write_u16(&mut self, value: u16) {
        self.align(2);
        let mut bytes = [0u8; 2];
        match self.order {
            Endianness::BIG => BigEndian::write_u16(&mut bytes, value),
            _ => LittleEndian::write_u16(&mut bytes, value),
        }
        self.buf.extend_from_slice(&bytes);
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        self.align(4);
        let mut bytes = [0u8; 4];
        match self.order {
            Endianness::BIG => BigEndian::write_u32(&mut bytes, value),
            _ => LittleEndian::write_u32(&mut bytes, value),
        }
        self.buf.extend_from_slice(&bytes);
    }

    pub(crate) fn write_u64(&mut self, value: u64) {
        self.align(8);
        let mut bytes = [0u8; 8];
        match self.order {
            Endianness::BIG => BigEndian::write_u64(&mut bytes, value),
            _ => LittleEndian::write_u64(&mut bytes, value),
        }
        self.buf.extend_from_slice(&bytes);
    }

    pub(crate) fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub(crate) fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub(crate) fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    pub(crate) fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    /// Write a length-prefixed, nul-terminated string.
    pub(crate) fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Write a signature with its 8-bit length prefix and trailing nul.
    pub(crate) fn write_signature(&mut self, value: &Signature) {
        self.buf.push(value.len() as u8);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Reserve a `u32` slot to be patched later, returning its offset.
    pub(crate) fn reserve_u32(&mut self) -> usize {
        self.align(4);
        let at = self.buf.len();
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        at
    }

    /// Patch a previously [reserved](Self::reserve_u32) `u32` slot.
    pub(crate) fn patch_u32(&mut self, at: usize, value: u32) {
        let slot = &mut self.buf[at..at + 4];
        match self.order {
            Endianness::BIG => BigEndian::write_u32(slot, value),
            _ => LittleEndian::write_u32(slot, value),
        }
    }
}

/// Encode a message body.
///
/// The in-memory shape of `values` is checked against `expected` before any
/// byte is produced; a mismatch is an encoding error, not a partial write.
pub(crate) fn encode_body(
    buf: &mut Vec<u8>,
    order: Endianness,
    values: &[Value],
    expected: &Signature,
) -> Result<()> {
    let computed = signature_of(values)?;

    if computed.as_signature() != expected {
        return Err(Error::new(ErrorKind::SignatureMismatch {
            expected: expected.as_str().into(),
            found: computed.as_str().into(),
        }));
    }

    for value in values {
        check_value(value)?;
    }

    let mut encoder = Encoder::new(buf, order);

    for value in values {
        encode_value(&mut encoder, value)?;
    }

    Ok(())
}

/// Verify the internal consistency of a value before any byte is written.
///
/// The top-level signature comparison trusts the element signature an array
/// carries; this pass checks that every item actually has that shape.
fn check_value(value: &Value) -> Result<()> {
    match value {
        Value::Array(element, items) => {
            for item in items {
                let found = item.signature()?;

                if found.as_signature() != element.as_signature() {
                    return Err(Error::new(ErrorKind::SignatureMismatch {
                        expected: element.as_str().into(),
                        found: found.as_str().into(),
                    }));
                }

                check_value(item)?;
            }
        }
        Value::Struct(fields) => {
            for field in fields {
                check_value(field)?;
            }
        }
        Value::DictEntry(key, entry) => {
            check_value(key)?;
            check_value(entry)?;
        }
        Value::Variant(inner) => check_value(inner)?,
        _ => {}
    }

    Ok(())
}

/// Encode a single value onto the encoder, for use inside an already
/// signature-checked container such as the header-field array.
pub(crate) fn encode_single(encoder: &mut Encoder<'_>, value: &Value) -> Result<()> {
    encode_value(encoder, value)
}

fn encode_value(encoder: &mut Encoder<'_>, value: &Value) -> Result<()> {
    match value {
        Value::Byte(v) => encoder.write_u8(*v),
        Value::Bool(v) => {
            encoder.write_u32(u32::from(*v));
        }
        Value::Int16(v) => encoder.write_i16(*v),
        Value::UInt16(v) => encoder.write_u16(*v),
        Value::Int32(v) => encoder.write_i32(*v),
        Value::UInt32(v) => encoder.write_u32(*v),
        Value::Int64(v) => encoder.write_i64(*v),
        Value::UInt64(v) => encoder.write_u64(*v),
        Value::Double(v) => encoder.write_f64(*v),
        Value::String(v) => encoder.write_string(v),
        Value::ObjectPath(v) => encoder.write_string(v.as_str()),
        Value::Signature(v) => encoder.write_signature(v),
        Value::UnixFd(v) => encoder.write_u32(*v),
        Value::Array(element, items) => {
            let length_at = encoder.reserve_u32();
            // An empty array still pays the alignment of its element type.
            encoder.align(element.alignment());
            let start = encoder.len();

            for item in items {
                encode_value(encoder, item)?;
            }

            let length = encoder.len() - start;

            if length > MAX_ARRAY_LENGTH as usize {
                return Err(Error::new(ErrorKind::ArrayTooLong(length as u32)));
            }

            encoder.patch_u32(length_at, length as u32);
        }
        Value::Struct(fields) => {
            encoder.align(8);

            for field in fields {
                encode_value(encoder, field)?;
            }
        }
        Value::DictEntry(key, entry) => {
            encoder.align(8);
            encode_value(encoder, key)?;
            encode_value(encoder, entry)?;
        }
        Value::Variant(inner) => {
            let signature = inner.signature()?;
            encoder.write_signature(&signature);
            encode_value(encoder, inner)?;
        }
    }

    Ok(())
}
