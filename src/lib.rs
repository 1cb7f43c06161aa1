//! A resilient client-side D-Bus implementation for Tokio.
//!
//! The crate covers the three layers a D-Bus client is made of: the binary
//! wire codec (signatures, alignment, endianness and message framing), the
//! line-oriented SASL handshake which precedes it, and a connection with a
//! request/response correlator offering per-call deadlines, cancellation,
//! automatic reconnection with exponential backoff and a periodic liveness
//! probe.
//!
//! ```no_run
//! use steadybus::{Connection, Message, ObjectPath};
//!
//! # #[tokio::main] async fn main() -> steadybus::Result<()> {
//! let connection = Connection::session_bus().await?;
//!
//! let call = Message::method_call(
//!     ObjectPath::new_const(b"/org/freedesktop/DBus"),
//!     "ListNames",
//! )
//! .with_interface("org.freedesktop.DBus")
//! .with_destination("org.freedesktop.DBus");
//!
//! let reply = connection.call(call).await?;
//! println!("{:?}", reply.body());
//! # Ok(()) }
//! ```

#![deny(missing_docs)]
#![allow(clippy::module_inception)]

#[macro_use]
mod macros;

#[doc(inline)]
pub use self::proto::{Endianness, Flags};
mod proto;

pub mod org_freedesktop_dbus;

#[doc(inline)]
pub use self::error::{Error, ErrorClass, Result};
mod error;

#[doc(inline)]
pub use self::signature::{Signature, SignatureBuf, SignatureError};
pub use self::signature::{Iter as SignatureIter, SignatureType};
mod signature;

#[doc(inline)]
pub use self::object_path::{ObjectPath, ObjectPathBuf, ObjectPathError};
mod object_path;

mod names;

#[doc(inline)]
pub use self::value::Value;
mod value;

mod codec;

#[doc(inline)]
pub use self::message::{Message, MessageKind};
mod message;

mod frame;

#[doc(inline)]
pub use self::sasl::{IdentityResolver, Mechanism, StaticIdentity, UidIdentity};
mod sasl;

#[doc(inline)]
pub use self::address::Address;
mod address;

#[doc(inline)]
pub use self::connection::{Connection, ConnectionBuilder, ConnectionEvent, ConnectionState};
mod connection;

pub use self::dispatch::InboundHandler;
mod dispatch;

mod pool;

mod utils;
