use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use super::{validate, Signature, SignatureError, SignatureErrorKind, MAX_SIGNATURE};

/// An owned D-Bus signature.
///
/// This is the owned variant which dereferences to [`Signature`].
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct SignatureBuf(Vec<u8>);

impl SignatureBuf {
    /// Construct an empty signature.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Try to construct a new owned signature with validation.
    ///
    /// # Examples
    ///
    /// ```
    /// use steadybus::SignatureBuf;
    ///
    /// assert!(SignatureBuf::new(b"a{sv}").is_ok());
    /// assert!(SignatureBuf::new(b"a{vv}").is_err());
    /// ```
    pub fn new<S>(signature: &S) -> Result<Self, SignatureError>
    where
        S: ?Sized + AsRef<[u8]>,
    {
        let signature = signature.as_ref();
        validate(signature)?;
        Ok(Self(signature.to_vec()))
    }

    /// Construct an owned signature from a slice without validation.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the slice is a valid signature.
    pub(crate) unsafe fn from_slice_unchecked(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Append another complete signature to this one.
    ///
    /// Errors if the combined signature would exceed the maximum length.
    pub(crate) fn push_signature(&mut self, other: &Signature) -> Result<(), SignatureError> {
        if self.0.len() + other.len() > MAX_SIGNATURE {
            return Err(SignatureError::new(SignatureErrorKind::SignatureTooLong));
        }

        self.0.extend_from_slice(other.as_bytes());
        Ok(())
    }

    /// Coerce into a borrowed [`Signature`].
    pub fn as_signature(&self) -> &Signature {
        // SAFETY: Construction ensures the bytes are a valid signature.
        unsafe { Signature::new_unchecked(&self.0) }
    }

    /// Get the signature as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for SignatureBuf {
    type Target = Signature;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_signature()
    }
}

impl Borrow<Signature> for SignatureBuf {
    #[inline]
    fn borrow(&self) -> &Signature {
        self.as_signature()
    }
}

impl AsRef<Signature> for SignatureBuf {
    #[inline]
    fn as_ref(&self) -> &Signature {
        self.as_signature()
    }
}

impl From<&Signature> for SignatureBuf {
    #[inline]
    fn from(signature: &Signature) -> Self {
        signature.to_owned()
    }
}

impl PartialEq<Signature> for SignatureBuf {
    #[inline]
    fn eq(&self, other: &Signature) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&Signature> for SignatureBuf {
    #[inline]
    fn eq(&self, other: &&Signature) -> bool {
        self.0 == other.as_bytes()
    }
}

impl fmt::Debug for SignatureBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_signature().fmt(f)
    }
}

impl fmt::Display for SignatureBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}
