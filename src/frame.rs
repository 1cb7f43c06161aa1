//! The outer message frame: fixed header, header-field array, padding and
//! body.

use std::fmt::Write as _;
use std::num::NonZeroU32;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::codec::{decode_single, encode_body, encode_single, Decoder, Encoder};
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Message, MessageKind};
use crate::names::{validate_bus_name, validate_error_name, validate_interface, validate_member};
use crate::object_path::ObjectPathBuf;
use crate::proto::{
    Endianness, FieldCode, Flags, MessageType, FIXED_HEADER_LENGTH, MAX_ARRAY_LENGTH,
    MAX_MESSAGE_LENGTH, MIN_MESSAGE_LENGTH, PROTOCOL_VERSION,
};
use crate::signature::{Signature, SignatureBuf};
use crate::utils::padding_to;
use crate::value::Value;

/// Encode a message into its wire frame, appending to `buf`.
///
/// The serial is supplied by the caller; the connection assigns it from its
/// per-session counter immediately before encoding.
pub(crate) fn encode_message(
    message: &Message,
    serial: NonZeroU32,
    buf: &mut Vec<u8>,
) -> Result<()> {
    validate_message(message)?;

    // The body is encoded first so its length is known up front. It starts
    // at an 8-byte boundary of the message, so encoding it standalone
    // preserves every alignment.
    let mut body = Vec::new();
    encode_body(&mut body, message.endianness, &message.body, &message.signature)?;

    let Ok(body_length) = u32::try_from(body.len()) else {
        return Err(Error::new(ErrorKind::BodyTooLong(u32::MAX)));
    };

    if body_length > MAX_MESSAGE_LENGTH {
        return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
    }

    let start = buf.len();
    let mut encoder = Encoder::new(buf, message.endianness);

    encoder.write_u8(message.endianness.0);
    encoder.write_u8(message_type(message).0);
    encoder.write_u8(message.flags.0);
    encoder.write_u8(PROTOCOL_VERSION);

    let body_length_at = encoder.reserve_u32();
    encoder.write_u32(serial.get());

    let fields_length_at = encoder.reserve_u32();
    let fields_start = encoder.len();

    match &message.kind {
        MessageKind::MethodCall { path, member } => {
            encode_field(&mut encoder, FieldCode::PATH, Signature::OBJECT_PATH, || {
                Value::ObjectPath(path.clone())
            })?;
            encode_field(&mut encoder, FieldCode::MEMBER, Signature::STRING, || {
                Value::String(member.clone())
            })?;
        }
        MessageKind::MethodReturn { reply_serial } => {
            encode_field(&mut encoder, FieldCode::REPLY_SERIAL, Signature::UINT32, || {
                Value::UInt32(reply_serial.get())
            })?;
        }
        MessageKind::Error {
            error_name,
            reply_serial,
        } => {
            encode_field(&mut encoder, FieldCode::ERROR_NAME, Signature::STRING, || {
                Value::String(error_name.clone())
            })?;
            encode_field(&mut encoder, FieldCode::REPLY_SERIAL, Signature::UINT32, || {
                Value::UInt32(reply_serial.get())
            })?;
        }
        MessageKind::Signal { path, member } => {
            encode_field(&mut encoder, FieldCode::PATH, Signature::OBJECT_PATH, || {
                Value::ObjectPath(path.clone())
            })?;
            encode_field(&mut encoder, FieldCode::MEMBER, Signature::STRING, || {
                Value::String(member.clone())
            })?;
        }
    }

    if let Some(interface) = &message.interface {
        encode_field(&mut encoder, FieldCode::INTERFACE, Signature::STRING, || {
            Value::String(interface.clone())
        })?;
    }

    if let Some(destination) = &message.destination {
        encode_field(&mut encoder, FieldCode::DESTINATION, Signature::STRING, || {
            Value::String(destination.clone())
        })?;
    }

    if let Some(sender) = &message.sender {
        encode_field(&mut encoder, FieldCode::SENDER, Signature::STRING, || {
            Value::String(sender.clone())
        })?;
    }

    if !message.signature.is_empty() {
        encode_field(&mut encoder, FieldCode::SIGNATURE, Signature::SIGNATURE, || {
            Value::Signature(message.signature.clone())
        })?;
    }

    let fields_length = encoder.len() - fields_start;

    let Ok(fields_length) = u32::try_from(fields_length) else {
        return Err(Error::new(ErrorKind::HeaderTooLong(u32::MAX)));
    };

    if fields_length > MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::HeaderTooLong(fields_length)));
    }

    encoder.patch_u32(fields_length_at, fields_length);
    encoder.patch_u32(body_length_at, body_length);
    encoder.align(8);

    let total = (buf.len() - start) as u64 + body.len() as u64;

    if total > MAX_MESSAGE_LENGTH as u64 {
        return Err(Error::new(ErrorKind::MessageTooLong(total)));
    }

    buf.extend_from_slice(&body);
    Ok(())
}

fn encode_field(
    encoder: &mut Encoder<'_>,
    code: FieldCode,
    signature: &Signature,
    value: impl FnOnce() -> Value,
) -> Result<()> {
    encoder.align(8);
    encoder.write_u8(code.0);
    encoder.write_signature(signature);
    encode_single(encoder, &value())
}

fn message_type(message: &Message) -> MessageType {
    match &message.kind {
        MessageKind::MethodCall { .. } => MessageType::METHOD_CALL,
        MessageKind::MethodReturn { .. } => MessageType::METHOD_RETURN,
        MessageKind::Error { .. } => MessageType::ERROR,
        MessageKind::Signal { .. } => MessageType::SIGNAL,
    }
}

fn validate_message(message: &Message) -> Result<()> {
    match &message.kind {
        MessageKind::MethodCall { member, .. } => {
            validate_member(member)?;
        }
        MessageKind::Error { error_name, .. } => {
            validate_error_name(error_name)?;
        }
        MessageKind::Signal { member, .. } => {
            validate_member(member)?;

            if message.interface.is_none() {
                return Err(Error::new(ErrorKind::MissingInterface));
            }
        }
        MessageKind::MethodReturn { .. } => {}
    }

    if let Some(interface) = &message.interface {
        validate_interface(interface)?;
    }

    if let Some(destination) = &message.destination {
        validate_bus_name(destination)?;
    }

    if let Some(sender) = &message.sender {
        validate_bus_name(sender)?;
    }

    Ok(())
}

/// The header fields collected while decoding a frame.
#[derive(Default)]
struct Fields {
    path: Option<ObjectPathBuf>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    reply_serial: Option<NonZeroU32>,
    destination: Option<String>,
    sender: Option<String>,
    signature: Option<SignatureBuf>,
    unix_fds: Option<u32>,
}

/// Attempt to decode one message frame from the front of `buf`.
///
/// Returns `Ok(None)` when more data is needed; the caller retries once more
/// bytes have been buffered. On success, the number of consumed bytes is
/// returned alongside the message.
pub(crate) fn decode_frame(buf: &[u8]) -> Result<Option<(Message, usize)>> {
    if buf.len() < MIN_MESSAGE_LENGTH {
        return Ok(None);
    }

    let endianness = Endianness::new(buf[0]);

    if !endianness.is_valid() {
        return Err(Error::new(ErrorKind::InvalidEndianness(buf[0])));
    }

    if buf[3] != PROTOCOL_VERSION {
        return Err(Error::new(ErrorKind::InvalidProtocolVersion(buf[3])));
    }

    let message_type = MessageType::new(buf[1]);

    if !message_type.is_valid() {
        return Err(Error::new(ErrorKind::InvalidMessageType(buf[1])));
    }

    let flags = Flags(buf[2]);

    let (body_length, serial, fields_length) = match endianness {
        Endianness::BIG => (
            BigEndian::read_u32(&buf[4..8]),
            BigEndian::read_u32(&buf[8..12]),
            BigEndian::read_u32(&buf[12..16]),
        ),
        _ => (
            LittleEndian::read_u32(&buf[4..8]),
            LittleEndian::read_u32(&buf[8..12]),
            LittleEndian::read_u32(&buf[12..16]),
        ),
    };

    if body_length > MAX_MESSAGE_LENGTH {
        return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
    }

    if fields_length > MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::HeaderTooLong(fields_length)));
    }

    let Some(serial) = NonZeroU32::new(serial) else {
        return Err(Error::new(ErrorKind::ZeroSerial));
    };

    // Widened arithmetic so that near-overflow length fields cannot wrap.
    let fields_end = MIN_MESSAGE_LENGTH as u64 + fields_length as u64;
    let body_start = fields_end + padding_to(8, fields_end as usize) as u64;
    let total = body_start + body_length as u64;

    if total > MAX_MESSAGE_LENGTH as u64 {
        return Err(Error::new(ErrorKind::MessageTooLong(total)));
    }

    let fields_end = fields_end as usize;
    let body_start = body_start as usize;
    let total = total as usize;

    if buf.len() < total {
        return Ok(None);
    }

    let fields = decode_fields(&buf[..fields_end], endianness)?;

    if buf[fields_end..body_start].iter().any(|&b| b != 0) {
        return Err(Error::new(ErrorKind::NonZeroPadding));
    }

    if let Some(count) = fields.unix_fds {
        if count > 0 {
            return Err(Error::new(ErrorKind::UnixFdsNotNegotiated(count)));
        }
    }

    let kind = match message_type {
        MessageType::METHOD_CALL => MessageKind::MethodCall {
            path: fields.path.ok_or(Error::new(ErrorKind::MissingPath))?,
            member: fields.member.ok_or(Error::new(ErrorKind::MissingMember))?,
        },
        MessageType::METHOD_RETURN => MessageKind::MethodReturn {
            reply_serial: fields
                .reply_serial
                .ok_or(Error::new(ErrorKind::MissingReplySerial))?,
        },
        MessageType::ERROR => MessageKind::Error {
            error_name: fields
                .error_name
                .ok_or(Error::new(ErrorKind::MissingErrorName))?,
            reply_serial: fields
                .reply_serial
                .ok_or(Error::new(ErrorKind::MissingReplySerial))?,
        },
        _ => {
            if fields.interface.is_none() {
                return Err(Error::new(ErrorKind::MissingInterface));
            }

            MessageKind::Signal {
                path: fields.path.ok_or(Error::new(ErrorKind::MissingPath))?,
                member: fields.member.ok_or(Error::new(ErrorKind::MissingMember))?,
            }
        }
    };

    let signature = fields.signature.unwrap_or_else(SignatureBuf::empty);
    let body = crate::codec::decode_body(&buf[body_start..total], endianness, &signature)?;

    let message = Message {
        kind,
        serial: Some(serial),
        flags,
        interface: fields.interface,
        destination: fields.destination,
        sender: fields.sender,
        endianness,
        signature,
        body,
    };

    validate_message(&message)?;
    Ok(Some((message, total)))
}

fn decode_fields(buf: &[u8], endianness: Endianness) -> Result<Fields> {
    let mut decoder = Decoder::with_position(buf, FIXED_HEADER_LENGTH + 4, endianness);
    let mut fields = Fields::default();

    while decoder.remaining() > 0 {
        decoder.align(8)?;

        if decoder.remaining() == 0 {
            break;
        }

        let code = FieldCode::new(decoder.read_u8()?);
        let signature = decoder.read_signature()?.to_owned();
        let value = decode_single(&mut decoder, &signature)?;

        match (code, signature.as_bytes()) {
            (FieldCode::PATH, b"o") => {
                let Value::ObjectPath(path) = value else {
                    return Err(Error::new(ErrorKind::InvalidHeaderField));
                };
                fields.path = Some(path);
            }
            (FieldCode::INTERFACE, b"s") => {
                fields.interface = value.as_str().map(str::to_owned);
            }
            (FieldCode::MEMBER, b"s") => {
                fields.member = value.as_str().map(str::to_owned);
            }
            (FieldCode::ERROR_NAME, b"s") => {
                fields.error_name = value.as_str().map(str::to_owned);
            }
            (FieldCode::REPLY_SERIAL, b"u") => {
                let number = value.as_u32().and_then(NonZeroU32::new);
                fields.reply_serial = Some(number.ok_or(Error::new(ErrorKind::ZeroSerial))?);
            }
            (FieldCode::DESTINATION, b"s") => {
                fields.destination = value.as_str().map(str::to_owned);
            }
            (FieldCode::SENDER, b"s") => {
                fields.sender = value.as_str().map(str::to_owned);
            }
            (FieldCode::SIGNATURE, b"g") => {
                let Value::Signature(signature) = value else {
                    return Err(Error::new(ErrorKind::InvalidHeaderField));
                };
                fields.signature = Some(signature);
            }
            (FieldCode::UNIX_FDS, b"u") => {
                fields.unix_fds = value.as_u32();
            }
            (
                FieldCode::PATH
                | FieldCode::INTERFACE
                | FieldCode::MEMBER
                | FieldCode::ERROR_NAME
                | FieldCode::REPLY_SERIAL
                | FieldCode::DESTINATION
                | FieldCode::SENDER
                | FieldCode::SIGNATURE
                | FieldCode::UNIX_FDS,
                _,
            ) => {
                // A known field with the wrong type is a peer bug.
                return Err(Error::new(ErrorKind::InvalidHeaderField));
            }
            (_, _) => {
                // Unknown field codes are skipped for forward compatibility;
                // the value has already been consumed.
            }
        }
    }

    Ok(fields)
}

/// Render a hex dump of a corrupted frame for diagnostics.
///
/// This is not in the happy path: the session is torn down after a framing
/// error, and the dump is logged to help figure out what the peer sent.
pub(crate) fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();

    for (n, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", n * 16);

        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{b:02x} ");
                }
                None => out.push_str("   "),
            }

            if i == 7 {
                out.push(' ');
            }
        }

        out.push(' ');

        for &b in chunk {
            out.push(if (0x20..0x7F).contains(&b) { b as char } else { '.' });
        }

        out.push('\n');
    }

    out
}
