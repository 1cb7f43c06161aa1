use crate::error::ErrorKind;
use crate::proto::Endianness;
use crate::signature::{Signature, SignatureBuf, SignatureType};
use crate::value::Value;

use super::{decode_body, encode_body};

fn round_trip(values: Vec<Value>, signature: &Signature, order: Endianness) {
    let mut buf = Vec::new();
    encode_body(&mut buf, order, &values, signature).unwrap();
    let decoded = decode_body(&buf, order, signature).unwrap();
    assert_eq!(decoded, values, "round trip through {signature} failed");
}

#[test]
fn round_trip_basics() {
    for order in [Endianness::LITTLE, Endianness::BIG] {
        round_trip(vec![Value::Byte(0xA5)], Signature::BYTE, order);
        round_trip(vec![Value::Bool(true)], Signature::BOOLEAN, order);
        round_trip(vec![Value::Int16(-2)], Signature::INT16, order);
        round_trip(vec![Value::UInt16(0xBEEF)], Signature::UINT16, order);
        round_trip(vec![Value::Int32(-70000)], Signature::INT32, order);
        round_trip(vec![Value::UInt32(0xDEAD_BEEF)], Signature::UINT32, order);
        round_trip(vec![Value::Int64(i64::MIN)], Signature::INT64, order);
        round_trip(vec![Value::UInt64(u64::MAX)], Signature::UINT64, order);
        round_trip(vec![Value::Double(2.3)], Signature::DOUBLE, order);
        round_trip(vec![Value::from("hello world")], Signature::STRING, order);
        round_trip(
            vec![Value::Signature(SignatureBuf::new(b"a{sv}").unwrap())],
            Signature::SIGNATURE,
            order,
        );
        round_trip(vec![Value::UnixFd(3)], Signature::UNIX_FD, order);
    }
}

#[test]
fn round_trip_containers() {
    let signature = Signature::new_const(b"a{sv}");
    let values = vec![Value::Array(
        SignatureBuf::new(b"{sv}").unwrap(),
        vec![
            Value::DictEntry(
                Box::new(Value::from("one")),
                Box::new(Value::Variant(Box::new(Value::UInt32(1)))),
            ),
            Value::DictEntry(
                Box::new(Value::from("two")),
                Box::new(Value::Variant(Box::new(Value::from("2")))),
            ),
        ],
    )];

    for order in [Endianness::LITTLE, Endianness::BIG] {
        round_trip(values.clone(), signature, order);
    }

    let signature = Signature::new_const(b"(yai)s");
    let values = vec![
        Value::Struct(vec![
            Value::Byte(1),
            Value::Array(
                SignatureBuf::new(b"i").unwrap(),
                vec![Value::Int32(-1), Value::Int32(2)],
            ),
        ]),
        Value::from("tail"),
    ];

    for order in [Endianness::LITTLE, Endianness::BIG] {
        round_trip(values.clone(), signature, order);
    }
}

#[test]
fn consumed_equals_produced() {
    let signature = Signature::new_const(b"ya(ss)d");
    let values = vec![
        Value::Byte(9),
        Value::Array(
            SignatureBuf::new(b"(ss)").unwrap(),
            vec![Value::Struct(vec![Value::from("a"), Value::from("b")])],
        ),
        Value::Double(1.5),
    ];

    let mut buf = Vec::new();
    encode_body(&mut buf, Endianness::LITTLE, &values, signature).unwrap();

    // decode_body errors on leftovers, so a success means every produced
    // byte was consumed.
    decode_body(&buf, Endianness::LITTLE, signature).unwrap();
}

#[test]
fn alignment_and_zero_padding() {
    // A byte followed by a u64 forces seven bytes of padding.
    let signature = Signature::new_const(b"yt");
    let values = vec![Value::Byte(0xFF), Value::UInt64(1)];

    let mut buf = Vec::new();
    encode_body(&mut buf, Endianness::LITTLE, &values, signature).unwrap();

    assert_eq!(buf.len(), 16);
    assert!(buf[1..8].iter().all(|&b| b == 0));

    // Tampering with the padding must be rejected.
    let mut tampered = buf.clone();
    tampered[3] = 1;
    let err = decode_body(&tampered, Endianness::LITTLE, signature).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NonZeroPadding));
}

#[test]
fn empty_array_pays_element_alignment() {
    // The element type is 8-aligned, so even an empty array pads from
    // offset 4 (after its length) to offset 8.
    let signature = Signature::new_const(b"at");
    let values = vec![Value::Array(SignatureBuf::new(b"t").unwrap(), Vec::new())];

    let mut buf = Vec::new();
    encode_body(&mut buf, Endianness::LITTLE, &values, signature).unwrap();

    assert_eq!(buf, [0, 0, 0, 0, 0, 0, 0, 0]);
    round_trip(values, signature, Endianness::BIG);
}

#[test]
fn double_big_endian_bytes() {
    let mut buf = Vec::new();
    encode_body(
        &mut buf,
        Endianness::BIG,
        &[Value::Double(2.3)],
        Signature::DOUBLE,
    )
    .unwrap();

    assert_eq!(buf, [0x40, 0x02, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66]);

    let decoded = decode_body(&buf, Endianness::BIG, Signature::DOUBLE).unwrap();
    assert_eq!(decoded, [Value::Double(2.3)]);
}

#[test]
fn decode_signature_value() {
    // Wire form of the signature value `a{sv}`.
    let buf = [0x05, 0x61, 0x7B, 0x73, 0x76, 0x7D, 0x00];
    let decoded = decode_body(&buf, Endianness::LITTLE, Signature::SIGNATURE).unwrap();

    let [Value::Signature(signature)] = &decoded[..] else {
        panic!("expected a single signature value");
    };

    let types = signature.iter().collect::<Vec<_>>();
    assert_eq!(types.len(), 1);

    let SignatureType::Array(element) = types[0] else {
        panic!("expected an array signature");
    };
    assert_eq!(element, "{sv}");
}

#[test]
fn signature_mismatch_fails_before_writing() {
    let mut buf = Vec::new();
    let err = encode_body(
        &mut buf,
        Endianness::LITTLE,
        &[Value::UInt32(1)],
        Signature::STRING,
    )
    .unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::SignatureMismatch { .. }));
    assert!(buf.is_empty(), "no bytes may be produced on mismatch");
}

#[test]
fn array_items_must_match_their_element_signature() {
    let values = vec![Value::Array(
        SignatureBuf::new(b"i").unwrap(),
        vec![Value::Int32(1), Value::from("oops")],
    )];

    let mut buf = Vec::new();
    let err = encode_body(
        &mut buf,
        Endianness::LITTLE,
        &values,
        Signature::new_const(b"ai"),
    )
    .unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::SignatureMismatch { .. }));
    assert!(buf.is_empty(), "no bytes may be produced on mismatch");
}

#[test]
fn boolean_out_of_range() {
    let buf = 2u32.to_le_bytes();
    let err = decode_body(&buf, Endianness::LITTLE, Signature::BOOLEAN).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidBoolean(2)));
}

#[test]
fn string_must_be_utf8() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&2u32.to_le_bytes());
    buf.extend_from_slice(&[0xFF, 0xFE, 0x00]);

    let err = decode_body(&buf, Endianness::LITTLE, Signature::STRING).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Utf8(..)));
}

#[test]
fn object_path_shape_checked_on_decode() {
    let mut buf = Vec::new();
    encode_body(
        &mut buf,
        Endianness::LITTLE,
        &[Value::from("not/a/path")],
        Signature::STRING,
    )
    .unwrap();

    let err = decode_body(&buf, Endianness::LITTLE, Signature::OBJECT_PATH).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ObjectPath(..)));
}

#[test]
fn truncated_buffer_underruns() {
    let mut buf = Vec::new();
    encode_body(
        &mut buf,
        Endianness::LITTLE,
        &[Value::from("hello")],
        Signature::STRING,
    )
    .unwrap();

    let err = decode_body(&buf[..6], Endianness::LITTLE, Signature::STRING).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::BufferUnderflow));
}

#[test]
fn array_length_exceeding_buffer() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&1024u32.to_le_bytes());
    buf.extend_from_slice(&[0; 8]);

    let err = decode_body(&buf, Endianness::LITTLE, Signature::new_const(b"ay")).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::BufferUnderflow));
}

#[test]
fn trailing_bytes_rejected() {
    let mut buf = Vec::new();
    encode_body(
        &mut buf,
        Endianness::LITTLE,
        &[Value::UInt32(1)],
        Signature::UINT32,
    )
    .unwrap();
    buf.push(0);

    let err = decode_body(&buf, Endianness::LITTLE, Signature::UINT32).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TrailingBytes(1)));
}
