use std::num::NonZeroU32;

use crate::object_path::ObjectPathBuf;

/// The kind of a [`Message`], carrying the header fields which are required
/// for that kind.
///
/// [`Message`]: crate::Message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// A method call. This message kind may prompt a reply.
    MethodCall {
        /// The object to invoke the method on.
        path: ObjectPathBuf,
        /// The method name.
        member: String,
    },
    /// A method reply with returned data.
    MethodReturn {
        /// The serial of the call being answered.
        reply_serial: NonZeroU32,
    },
    /// An error reply.
    Error {
        /// The name of the error that occurred.
        error_name: String,
        /// The serial of the call being answered.
        reply_serial: NonZeroU32,
    },
    /// A signal emission. Signals additionally require an interface, carried
    /// in the message itself.
    Signal {
        /// The object the signal is emitted from.
        path: ObjectPathBuf,
        /// The signal name.
        member: String,
    },
}

impl MessageKind {
    /// The serial this message replies to, if it is a reply.
    pub fn reply_serial(&self) -> Option<NonZeroU32> {
        match self {
            MessageKind::MethodReturn { reply_serial } => Some(*reply_serial),
            MessageKind::Error { reply_serial, .. } => Some(*reply_serial),
            _ => None,
        }
    }
}
