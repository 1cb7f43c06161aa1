use std::num::NonZeroU32;

use crate::error::{Error, ErrorKind, Result};
use crate::object_path::ObjectPath;
use crate::proto::{Endianness, Flags};
use crate::signature::SignatureBuf;
use crate::value::{signature_of, Value};

use super::MessageKind;

/// An owned D-Bus message.
///
/// Outbound messages are constructed through [`Message::method_call`] and
/// [`Message::signal`] and have no serial until the connection assigns one;
/// inbound messages always carry the serial the peer chose.
///
/// # Examples
///
/// ```
/// use steadybus::{Message, ObjectPath};
///
/// const PATH: &ObjectPath = ObjectPath::new_const(b"/org/freedesktop/DBus");
///
/// let m = Message::method_call(PATH, "Hello")
///     .with_interface("org.freedesktop.DBus")
///     .with_destination("org.freedesktop.DBus");
///
/// assert_eq!(m.destination(), Some("org.freedesktop.DBus"));
/// assert!(m.expects_reply());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The kind of the message.
    pub(crate) kind: MessageKind,
    /// Serial of the message. Assigned by the connection on send.
    pub(crate) serial: Option<NonZeroU32>,
    /// Flags in the message.
    pub(crate) flags: Flags,
    /// The interface of the message.
    pub(crate) interface: Option<String>,
    /// The destination of the message.
    pub(crate) destination: Option<String>,
    /// The sender of the message.
    pub(crate) sender: Option<String>,
    /// The byte order the message is encoded with.
    pub(crate) endianness: Endianness,
    /// The signature of the body.
    pub(crate) signature: SignatureBuf,
    /// The decoded body values.
    pub(crate) body: Vec<Value>,
}

impl Message {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: None,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            endianness: Endianness::NATIVE,
            signature: SignatureBuf::empty(),
            body: Vec::new(),
        }
    }

    /// Construct a method call [`Message`].
    pub fn method_call(path: &ObjectPath, member: &str) -> Self {
        Self::new(MessageKind::MethodCall {
            path: path.to_owned(),
            member: member.into(),
        })
    }

    /// Construct a signal [`Message`].
    ///
    /// The interface a signal requires is set with [`with_interface`].
    ///
    /// [`with_interface`]: Self::with_interface
    #[must_use]
    pub fn signal(path: &ObjectPath, member: &str) -> Self {
        Self::new(MessageKind::Signal {
            path: path.to_owned(),
            member: member.into(),
        })
    }

    /// Construct a [`MessageKind::MethodReturn`] message answering this one,
    /// with destination and sender derived by flipping the originals.
    ///
    /// Errors if this message has not been assigned a serial.
    pub fn method_return(&self) -> Result<Self> {
        let Some(serial) = self.serial else {
            return Err(Error::new(ErrorKind::ZeroSerial));
        };

        Ok(Self {
            destination: self.sender.clone(),
            sender: self.destination.clone(),
            ..Self::new(MessageKind::MethodReturn {
                reply_serial: serial,
            })
        })
    }

    /// Construct a [`MessageKind::Error`] message answering this one.
    ///
    /// Errors if this message has not been assigned a serial.
    pub fn error(&self, error_name: &str) -> Result<Self> {
        let Some(serial) = self.serial else {
            return Err(Error::new(ErrorKind::ZeroSerial));
        };

        Ok(Self {
            destination: self.sender.clone(),
            sender: self.destination.clone(),
            ..Self::new(MessageKind::Error {
                error_name: error_name.into(),
                reply_serial: serial,
            })
        })
    }

    /// Get the kind of the message.
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Get the serial of the message, if one has been assigned.
    pub fn serial(&self) -> Option<NonZeroU32> {
        self.serial
    }

    /// Get the flags of the message.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Get the interface of the message.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Get the destination of the message.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Get the sender of the message.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Get the byte order of the message.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Get the signature of the body.
    pub fn signature(&self) -> &SignatureBuf {
        &self.signature
    }

    /// Get the body values of the message.
    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// Whether this message is a method call that expects a reply.
    pub fn expects_reply(&self) -> bool {
        matches!(self.kind, MessageKind::MethodCall { .. })
            && !(self.flags & Flags::NO_REPLY_EXPECTED)
    }

    /// Modify the flags of the message.
    #[must_use]
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Modify the interface of the message.
    #[must_use]
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Modify the destination of the message.
    #[must_use]
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Modify the sender of the message.
    #[must_use]
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Modify the byte order the message will be encoded with.
    #[must_use]
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Set the body of the message, computing its signature.
    ///
    /// Errors if the combined signature of the values would be too long.
    pub fn with_body(mut self, body: Vec<Value>) -> Result<Self> {
        self.signature = signature_of(&body)?;
        self.body = body;
        Ok(self)
    }
}
