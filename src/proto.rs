//! Low level details for the D-Bus protocol implementation.

use std::ops::{BitAnd, BitOr, BitXor};

/// The size of the fixed message header: endianness, type, flags, version,
/// body length and serial, followed by the header-field array length.
pub(crate) const FIXED_HEADER_LENGTH: usize = 12;

/// The fixed header plus the length prefix of the header-field array.
pub(crate) const MIN_MESSAGE_LENGTH: usize = FIXED_HEADER_LENGTH + 4;

/// The maximum length of a message, including header, header alignment
/// padding, and body.
pub(crate) const MAX_MESSAGE_LENGTH: u32 = 1u32 << 27;

/// The maximum length of a single array in bytes.
pub(crate) const MAX_ARRAY_LENGTH: u32 = 1u32 << 26;

/// The only protocol version this implementation speaks.
pub(crate) const PROTOCOL_VERSION: u8 = 1;

raw_enum! {
    /// The endianness of a message.
    #[repr(u8)]
    pub enum Endianness {
        /// Little endian.
        LITTLE = b'l',
        /// Big endian.
        BIG = b'B',
    }
}

impl Endianness {
    /// Native endian.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Self = Self::LITTLE;
    /// Native endian.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Self = Self::BIG;

    pub(crate) fn is_valid(self) -> bool {
        matches!(self, Self::LITTLE | Self::BIG)
    }
}

raw_enum! {
    /// The type of a message.
    #[repr(u8)]
    pub(crate) enum MessageType {
        /// Method call. This message type may prompt a reply.
        METHOD_CALL = 1,
        /// Method reply with returned data.
        METHOD_RETURN = 2,
        /// Error reply. If the first argument exists and is a string, it is
        /// an error message.
        ERROR = 3,
        /// Signal emission.
        SIGNAL = 4,
    }
}

impl MessageType {
    pub(crate) fn is_valid(self) -> bool {
        matches!(
            self,
            Self::METHOD_CALL | Self::METHOD_RETURN | Self::ERROR | Self::SIGNAL
        )
    }
}

raw_set! {
    /// Flags inside of a D-Bus message.
    ///
    /// # Examples
    ///
    /// ```
    /// use steadybus::Flags;
    ///
    /// let flags = Flags::EMPTY;
    /// assert!(!(flags & Flags::NO_REPLY_EXPECTED));
    ///
    /// let flags = Flags::EMPTY | Flags::NO_REPLY_EXPECTED;
    /// assert!(flags & Flags::NO_REPLY_EXPECTED);
    /// assert!(!(flags & Flags::NO_AUTO_START));
    /// ```
    #[repr(u8)]
    pub enum Flags {
        /// An empty set of flags.
        EMPTY = 0,
        /// This message does not expect method return replies or error
        /// replies, even if it is of a type that can have a reply; the reply
        /// should be omitted.
        NO_REPLY_EXPECTED = 1,
        /// The bus must not launch an owner for the destination name in
        /// response to this message.
        NO_AUTO_START = 2,
        /// The caller is prepared to wait for interactive authorization,
        /// which might take a considerable time to complete.
        ALLOW_INTERACTIVE_AUTHORIZATION = 4,
    }
}

impl BitOr<Flags> for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Flags) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd<Flags> for Flags {
    type Output = bool;

    #[inline]
    fn bitand(self, rhs: Flags) -> Self::Output {
        self.0 & rhs.0 != 0
    }
}

impl BitXor<Flags> for Flags {
    type Output = Self;

    #[inline]
    fn bitxor(self, rhs: Flags) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

raw_enum! {
    /// Codes in the header-field array of a message.
    #[repr(u8)]
    pub(crate) enum FieldCode {
        /// The object to send a call to, or the object a signal is emitted
        /// from.
        PATH = 1,
        /// The interface to invoke a method call on, or that a signal is
        /// emitted from. Optional for method calls, required for signals.
        INTERFACE = 2,
        /// The member, either the method name or signal name.
        MEMBER = 3,
        /// The name of the error that occurred, for errors.
        ERROR_NAME = 4,
        /// The serial number of the message this message is a reply to.
        REPLY_SERIAL = 5,
        /// The name of the connection this message is intended for.
        DESTINATION = 6,
        /// Unique name of the sending connection.
        SENDER = 7,
        /// The signature of the message body. If omitted, it is assumed to
        /// be the empty signature.
        SIGNATURE = 8,
        /// The number of Unix file descriptors that accompany the message.
        UNIX_FDS = 9,
    }
}

raw_enum! {
    /// The type inside of a signature.
    #[repr(u8)]
    pub(crate) enum Type {
        /// 8-bit unsigned integer.
        BYTE = b'y',
        /// Boolean value, 0 is FALSE and 1 is TRUE. Everything else is
        /// invalid.
        BOOLEAN = b'b',
        /// 16-bit signed integer.
        INT16 = b'n',
        /// 16-bit unsigned integer.
        UINT16 = b'q',
        /// 32-bit signed integer.
        INT32 = b'i',
        /// 32-bit unsigned integer.
        UINT32 = b'u',
        /// 64-bit signed integer.
        INT64 = b'x',
        /// 64-bit unsigned integer.
        UINT64 = b't',
        /// IEEE 754 double.
        DOUBLE = b'd',
        /// UTF-8 string, nul terminated and containing no other nul bytes.
        STRING = b's',
        /// Name of an object instance.
        OBJECT_PATH = b'o',
        /// A type signature.
        SIGNATURE = b'g',
        /// Array.
        ARRAY = b'a',
        OPEN_PAREN = b'(',
        CLOSE_PAREN = b')',
        /// Variant type (the type of the value is part of the value itself).
        VARIANT = b'v',
        OPEN_BRACE = b'{',
        CLOSE_BRACE = b'}',
        /// Unix file descriptor index.
        UNIX_FD = b'h',
    }
}

impl Type {
    /// The wire alignment of the type.
    ///
    /// Struct and dict-entry openers align to 8; the closing brackets never
    /// start an encoded value and report 1.
    pub(crate) const fn alignment(self) -> usize {
        match self {
            Type::BYTE | Type::SIGNATURE | Type::VARIANT => 1,
            Type::INT16 | Type::UINT16 => 2,
            Type::BOOLEAN
            | Type::INT32
            | Type::UINT32
            | Type::STRING
            | Type::OBJECT_PATH
            | Type::UNIX_FD
            | Type::ARRAY => 4,
            Type::INT64 | Type::UINT64 | Type::DOUBLE | Type::OPEN_PAREN | Type::OPEN_BRACE => 8,
            _ => 1,
        }
    }

    /// Whether the type is basic. Only basic types may key a dict entry;
    /// variant does not qualify, being a container despite its
    /// single-character code.
    pub(crate) const fn is_basic(self) -> bool {
        matches!(
            self,
            Type::BYTE
                | Type::BOOLEAN
                | Type::INT16
                | Type::UINT16
                | Type::INT32
                | Type::UINT32
                | Type::INT64
                | Type::UINT64
                | Type::DOUBLE
                | Type::STRING
                | Type::OBJECT_PATH
                | Type::SIGNATURE
                | Type::UNIX_FD
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = Flags::NO_REPLY_EXPECTED | Flags::NO_AUTO_START;
        assert!(flags & Flags::NO_REPLY_EXPECTED);
        assert!(flags & Flags::NO_AUTO_START);
        assert!(!(flags & Flags::ALLOW_INTERACTIVE_AUTHORIZATION));
    }

    #[test]
    fn basic_types() {
        assert!(Type::STRING.is_basic());
        assert!(Type::UNIX_FD.is_basic());
        assert!(!Type::VARIANT.is_basic());
        assert!(!Type::ARRAY.is_basic());
        assert!(!Type::OPEN_PAREN.is_basic());
        assert!(!Type::OPEN_BRACE.is_basic());
    }

    #[test]
    fn alignments() {
        assert_eq!(Type::BYTE.alignment(), 1);
        assert_eq!(Type::INT16.alignment(), 2);
        assert_eq!(Type::BOOLEAN.alignment(), 4);
        assert_eq!(Type::STRING.alignment(), 4);
        assert_eq!(Type::SIGNATURE.alignment(), 1);
        assert_eq!(Type::DOUBLE.alignment(), 8);
        assert_eq!(Type::OPEN_PAREN.alignment(), 8);
        assert_eq!(Type::OPEN_BRACE.alignment(), 8);
        assert_eq!(Type::ARRAY.alignment(), 4);
        assert_eq!(Type::VARIANT.alignment(), 1);
    }
}
