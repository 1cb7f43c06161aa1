//! Encoders and decoders for the D-Bus wire format.
//!
//! Encoding is driven by the shape of the value being written; decoding is
//! driven by a signature. Both sides account for the alignment rule: before
//! a value of alignment `A`, the offset is advanced to the next multiple of
//! `A`, writing zero bytes when encoding and requiring zero bytes when
//! decoding.

#[cfg(test)]
mod tests;

pub(crate) use self::decode::{decode_body, decode_single, Decoder};
mod decode;

pub(crate) use self::encode::{encode_body, encode_single, Encoder};
mod encode;
