use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::object_path::ObjectPathError;
use crate::signature::SignatureError;

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

/// A coarse classification of an [`Error`], used by the reconnection policy
/// to decide whether an operation is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorClass {
    /// Socket-level failures which tend to go away on their own.
    Transient,
    /// Authentication failed; retrying with the same credentials is futile.
    Authentication,
    /// The client was misconfigured; fatal at startup.
    Configuration,
    /// The peer violated the wire protocol; the session must be torn down.
    Protocol,
    /// A value did not match its signature, or a similar local misuse.
    Codec,
    /// A per-call deadline elapsed.
    Timeout,
    /// The connection is closed or was lost while a request was pending.
    Closed,
    /// Local resources ran out; retry with extra delay.
    Resource,
    /// Anything else.
    Unknown,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    #[inline]
    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Classify this error for retry purposes.
    pub fn class(&self) -> ErrorClass {
        use ErrorKind::*;

        match &self.kind {
            Io(..) | Disconnected => ErrorClass::Transient,
            NoCommonMechanism
            | MechanismsExhausted
            | SaslError(..)
            | InvalidSaslLine
            | UnexpectedSaslCommand(..)
            | CookieUnavailable(..)
            | InvalidCookieContext(..)
            | IdentityUnavailable
            | HelloFailed(..) => ErrorClass::Authentication,
            MissingBus | InvalidAddress(..) | UnknownMechanism(..) | InvalidConfiguration(..) => {
                ErrorClass::Configuration
            }
            InvalidEndianness(..)
            | InvalidMessageType(..)
            | InvalidProtocolVersion(..)
            | MessageTooLong(..)
            | BodyTooLong(..)
            | HeaderTooLong(..)
            | ArrayTooLong(..)
            | BufferUnderflow
            | NonZeroPadding
            | NotNullTerminated
            | InvalidBoolean(..)
            | Utf8(..)
            | Signature(..)
            | ObjectPath(..)
            | InvalidName { .. }
            | MissingPath
            | MissingInterface
            | MissingMember
            | MissingReplySerial
            | MissingErrorName
            | ZeroSerial
            | UnixFdsNotNegotiated(..)
            | TrailingBytes(..)
            | InvalidHeaderField => ErrorClass::Protocol,
            SignatureMismatch { .. } | UnexpectedSignature { .. } => ErrorClass::Codec,
            Timeout => ErrorClass::Timeout,
            ClosedChannel => ErrorClass::Closed,
            SerialCollision(..) | PendingLimitExceeded(..) => ErrorClass::Resource,
        }
    }

    /// Test if the error is a per-call timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Test if the error indicates a closed or lost connection.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::ClosedChannel)
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<ObjectPathError> for Error {
    #[inline]
    fn from(error: ObjectPathError) -> Self {
        Self::new(ErrorKind::ObjectPath(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            return Self::new(ErrorKind::Disconnected);
        }

        Self::new(ErrorKind::Io(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(..) => write!(f, "I/O error"),
            ErrorKind::Disconnected => write!(f, "Connection reset by peer"),
            ErrorKind::Signature(..) => write!(f, "Signature error"),
            ErrorKind::ObjectPath(..) => write!(f, "Object path error"),
            ErrorKind::Utf8(..) => write!(f, "UTF-8 error"),
            ErrorKind::InvalidName { kind, name } => {
                write!(f, "Invalid {kind} `{name}`")
            }
            ErrorKind::InvalidEndianness(b) => {
                write!(f, "Invalid endianness marker 0x{b:02x}")
            }
            ErrorKind::InvalidMessageType(b) => write!(f, "Invalid message type {b}"),
            ErrorKind::InvalidProtocolVersion(b) => {
                write!(f, "Invalid protocol version {b} (expected 1)")
            }
            ErrorKind::MessageTooLong(length) => {
                write!(f, "Message of length {length} is too long (max is 134217728)")
            }
            ErrorKind::BodyTooLong(length) => {
                write!(f, "Body of length {length} is too long (max is 134217728)")
            }
            ErrorKind::HeaderTooLong(length) => {
                write!(f, "Header of length {length} is too long (max is 134217728)")
            }
            ErrorKind::ArrayTooLong(length) => {
                write!(f, "Array of length {length} is too long (max is 67108864)")
            }
            ErrorKind::BufferUnderflow => write!(f, "Buffer underflow"),
            ErrorKind::NonZeroPadding => write!(f, "Alignment padding contains non-zero bytes"),
            ErrorKind::NotNullTerminated => write!(f, "String is not null terminated"),
            ErrorKind::InvalidBoolean(value) => {
                write!(f, "Boolean value {value} is neither 0 nor 1")
            }
            ErrorKind::MissingPath => write!(f, "Missing required PATH header"),
            ErrorKind::MissingInterface => write!(f, "Missing required INTERFACE header"),
            ErrorKind::MissingMember => write!(f, "Missing required MEMBER header"),
            ErrorKind::MissingReplySerial => write!(f, "Missing required REPLY_SERIAL header"),
            ErrorKind::MissingErrorName => write!(f, "Missing required ERROR_NAME header"),
            ErrorKind::ZeroSerial => write!(f, "Zero in header serial"),
            ErrorKind::UnixFdsNotNegotiated(count) => {
                write!(f, "Message carries {count} file descriptors but FD passing was not negotiated")
            }
            ErrorKind::InvalidHeaderField => write!(f, "Malformed header-field entry"),
            ErrorKind::TrailingBytes(count) => {
                write!(f, "{count} bytes left over after decoding")
            }
            ErrorKind::SignatureMismatch { expected, found } => {
                write!(f, "Value does not match signature: expected `{expected}`, found `{found}`")
            }
            ErrorKind::UnexpectedSignature { expected, found } => {
                write!(f, "Unexpected body signature: expected `{expected}`, found `{found}`")
            }
            ErrorKind::NoCommonMechanism => {
                write!(f, "No mutually acceptable SASL mechanism")
            }
            ErrorKind::MechanismsExhausted => {
                write!(f, "Server rejected every configured SASL mechanism")
            }
            ErrorKind::SaslError(message) => write!(f, "SASL error: {message}"),
            ErrorKind::InvalidSaslLine => write!(f, "Invalid SASL line"),
            ErrorKind::UnexpectedSaslCommand(command) => {
                write!(f, "Unexpected SASL command `{command}`")
            }
            ErrorKind::CookieUnavailable(reason) => {
                write!(f, "DBUS_COOKIE_SHA1 cookie unavailable: {reason}")
            }
            ErrorKind::InvalidCookieContext(context) => {
                write!(f, "Invalid cookie context `{context}`")
            }
            ErrorKind::IdentityUnavailable => {
                write!(f, "No authorization identity available")
            }
            ErrorKind::HelloFailed(name) => {
                write!(f, "The bus rejected our Hello call: {name}")
            }
            ErrorKind::MissingBus => write!(f, "Missing bus to connect to"),
            ErrorKind::InvalidAddress(address) => {
                write!(f, "Invalid d-bus address `{address}`")
            }
            ErrorKind::UnknownMechanism(name) => {
                write!(f, "Unknown SASL mechanism `{name}`")
            }
            ErrorKind::InvalidConfiguration(reason) => {
                write!(f, "Invalid configuration: {reason}")
            }
            ErrorKind::Timeout => write!(f, "Method call timed out"),
            ErrorKind::ClosedChannel => write!(f, "Connection is closed"),
            ErrorKind::SerialCollision(serial) => {
                write!(f, "Serial {serial} already has a pending request")
            }
            ErrorKind::PendingLimitExceeded(limit) => {
                write!(f, "More than {limit} requests in flight")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::ObjectPath(error) => Some(error),
            ErrorKind::Utf8(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Disconnected,
    Signature(SignatureError),
    ObjectPath(ObjectPathError),
    Utf8(Utf8Error),
    InvalidName {
        kind: &'static str,
        name: Box<str>,
    },
    InvalidEndianness(u8),
    InvalidMessageType(u8),
    InvalidProtocolVersion(u8),
    MessageTooLong(u64),
    BodyTooLong(u32),
    HeaderTooLong(u32),
    ArrayTooLong(u32),
    BufferUnderflow,
    NonZeroPadding,
    NotNullTerminated,
    InvalidBoolean(u32),
    MissingPath,
    MissingInterface,
    MissingMember,
    MissingReplySerial,
    MissingErrorName,
    ZeroSerial,
    UnixFdsNotNegotiated(u32),
    TrailingBytes(usize),
    InvalidHeaderField,
    SignatureMismatch {
        expected: Box<str>,
        found: Box<str>,
    },
    UnexpectedSignature {
        expected: Box<str>,
        found: Box<str>,
    },
    NoCommonMechanism,
    MechanismsExhausted,
    SaslError(Box<str>),
    InvalidSaslLine,
    UnexpectedSaslCommand(Box<str>),
    CookieUnavailable(Box<str>),
    InvalidCookieContext(Box<str>),
    IdentityUnavailable,
    HelloFailed(Box<str>),
    MissingBus,
    InvalidAddress(Box<str>),
    UnknownMechanism(Box<str>),
    InvalidConfiguration(Box<str>),
    Timeout,
    ClosedChannel,
    SerialCollision(u32),
    PendingLimitExceeded(usize),
}
