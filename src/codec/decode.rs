use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, ErrorKind, Result};
use crate::object_path::ObjectPath;
use crate::proto::{Endianness, Type, MAX_ARRAY_LENGTH};
use crate::signature::{Signature, SignatureType};
use crate::utils::padding_to;
use crate::value::Value;

/// A position-tracking reader over a received message, with the byte order
/// taken from the message's endianness marker.
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    order: Endianness,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8], order: Endianness) -> Self {
        Self { buf, pos: 0, order }
    }

    /// Construct a decoder whose position starts at `pos`, for buffers where
    /// the wire offset does not coincide with the slice start.
    pub(crate) fn with_position(buf: &'a [u8], pos: usize, order: Endianness) -> Self {
        Self { buf, pos, order }
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Skip to the next multiple of `align`, requiring the padding to be
    /// zero.
    pub(crate) fn align(&mut self, align: usize) -> Result<()> {
        let padding = padding_to(align, self.pos);

        let Some(next) = self.pos.checked_add(padding) else {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        };

        if next > self.buf.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        if self.buf[self.pos..next].iter().any(|&b| b != 0) {
            return Err(Error::new(ErrorKind::NonZeroPadding));
        }

        self.pos = next;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let Some(next) = self.pos.checked_add(n) else {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        };

        if next > self.buf.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        let bytes = &self.buf[self.pos..next];
        self.pos = next;
        Ok(bytes)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        let bytes = self.take(2)?;
        Ok(match self.order {
            Endianness::BIG => BigEndian::read_u16(bytes),
            _ => LittleEndian::read_u16(bytes),
        })
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let bytes = self.take(4)?;
        Ok(match self.order {
            Endianness::BIG => BigEndian::read_u32(bytes),
            _ => LittleEndian::read_u32(bytes),
        })
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        let bytes = self.take(8)?;
        Ok(match self.order {
            Endianness::BIG => BigEndian::read_u64(bytes),
            _ => LittleEndian::read_u64(bytes),
        })
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a length-prefixed, nul-terminated string and validate UTF-8.
    pub(crate) fn read_string(&mut self) -> Result<&'a str> {
        let length = self.read_u32()? as usize;
        let bytes = self.take(length)?;

        if self.read_u8()? != 0 {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }

        Ok(std::str::from_utf8(bytes)?)
    }

    /// Read a signature with its 8-bit length prefix, validating its shape.
    pub(crate) fn read_signature(&mut self) -> Result<&'a Signature> {
        let length = self.read_u8()? as usize;
        let bytes = self.take(length)?;

        if self.read_u8()? != 0 {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }

        Ok(Signature::new(bytes)?)
    }
}

/// Decode a full message body against its signature.
///
/// Bytes left over after the last complete type are a protocol error.
pub(crate) fn decode_body(
    buf: &[u8],
    order: Endianness,
    signature: &Signature,
) -> Result<Vec<Value>> {
    let mut decoder = Decoder::new(buf, order);
    let mut values = Vec::new();

    for ty in signature.iter() {
        values.push(decode_type(&mut decoder, ty)?);
    }

    if decoder.remaining() != 0 {
        return Err(Error::new(ErrorKind::TrailingBytes(decoder.remaining())));
    }

    Ok(values)
}

/// Decode one complete type from the decoder.
pub(crate) fn decode_single(decoder: &mut Decoder<'_>, signature: &Signature) -> Result<Value> {
    let mut iter = signature.iter();

    let Some(ty) = iter.next() else {
        return Err(Error::new(ErrorKind::InvalidHeaderField));
    };

    if iter.next().is_some() {
        return Err(Error::new(ErrorKind::InvalidHeaderField));
    }

    decode_type(decoder, ty)
}

fn decode_type(decoder: &mut Decoder<'_>, ty: SignatureType<'_>) -> Result<Value> {
    match ty {
        SignatureType::Basic(signature) => decode_basic(decoder, signature),
        SignatureType::Array(element) => decode_array(decoder, element),
        SignatureType::Struct(fields) => {
            decoder.align(8)?;

            let mut values = Vec::new();

            for field in fields.iter() {
                values.push(decode_type(decoder, field)?);
            }

            Ok(Value::Struct(values))
        }
        SignatureType::Dict(key, value) => {
            decoder.align(8)?;
            let key = decode_single(decoder, key)?;
            let value = decode_single(decoder, value)?;
            Ok(Value::DictEntry(Box::new(key), Box::new(value)))
        }
    }
}

fn decode_array(decoder: &mut Decoder<'_>, element: &Signature) -> Result<Value> {
    let length = decoder.read_u32()?;

    if length > MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::ArrayTooLong(length)));
    }

    // The padding between the length and the first element is not part of
    // the declared content length.
    decoder.align(element.alignment())?;

    let end = decoder
        .position()
        .checked_add(length as usize)
        .ok_or(Error::new(ErrorKind::BufferUnderflow))?;

    if end > decoder.position() + decoder.remaining() {
        return Err(Error::new(ErrorKind::BufferUnderflow));
    }

    let mut items = Vec::new();

    while decoder.position() < end {
        items.push(decode_single(decoder, element)?);
    }

    if decoder.position() != end {
        return Err(Error::new(ErrorKind::TrailingBytes(
            decoder.position() - end,
        )));
    }

    Ok(Value::Array(element.to_owned(), items))
}

fn decode_basic(decoder: &mut Decoder<'_>, signature: &Signature) -> Result<Value> {
    let ty = Type::new(signature.as_bytes()[0]);

    Ok(match ty {
        Type::BYTE => Value::Byte(decoder.read_u8()?),
        Type::BOOLEAN => {
            let raw = decoder.read_u32()?;

            match raw {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(Error::new(ErrorKind::InvalidBoolean(other))),
            }
        }
        Type::INT16 => Value::Int16(decoder.read_i16()?),
        Type::UINT16 => Value::UInt16(decoder.read_u16()?),
        Type::INT32 => Value::Int32(decoder.read_i32()?),
        Type::UINT32 => Value::UInt32(decoder.read_u32()?),
        Type::INT64 => Value::Int64(decoder.read_i64()?),
        Type::UINT64 => Value::UInt64(decoder.read_u64()?),
        Type::DOUBLE => Value::Double(decoder.read_f64()?),
        Type::STRING => Value::String(decoder.read_string()?.into()),
        Type::OBJECT_PATH => {
            let raw = decoder.read_string()?;
            Value::ObjectPath(ObjectPath::new(raw)?.to_owned())
        }
        Type::SIGNATURE => Value::Signature(decoder.read_signature()?.to_owned()),
        Type::UNIX_FD => Value::UnixFd(decoder.read_u32()?),
        Type::VARIANT => {
            let signature = decoder.read_signature()?.to_owned();
            let inner = decode_single(decoder, &signature)?;
            Value::Variant(Box::new(inner))
        }
        _ => return Err(Error::new(ErrorKind::InvalidHeaderField)),
    })
}
