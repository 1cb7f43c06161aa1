//! D-Bus type signatures and their validation.

#[macro_use]
mod stack;


pub use self::iter::{Iter, SignatureType};
mod iter;

pub(crate) use self::validation::validate;
mod validation;

pub use self::signature::Signature;
mod signature;

pub use self::signature_buf::SignatureBuf;
mod signature_buf;

pub use self::signature_error::SignatureError;
pub(crate) use self::signature_error::SignatureErrorKind;
mod signature_error;

/// The maximum size of a signature, imposed by its 8-bit wire length prefix.
pub(crate) const MAX_SIGNATURE: usize = 255;

/// The maximum individual container depth.
pub(crate) const MAX_CONTAINER_DEPTH: usize = 32;

/// The maximum total depth of any containers.
pub(crate) const MAX_DEPTH: usize = MAX_CONTAINER_DEPTH * 2;
