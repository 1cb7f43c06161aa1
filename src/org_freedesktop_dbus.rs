//! Constants for the `org.freedesktop.DBus` bus interface.

use crate::object_path::ObjectPath;

/// The well-known name of the message bus itself.
pub const DESTINATION: &str = "org.freedesktop.DBus";

/// The object path of the message bus.
pub const PATH: &ObjectPath = ObjectPath::new_const(b"/org/freedesktop/DBus");

/// The interface of the message bus.
pub const INTERFACE: &str = "org.freedesktop.DBus";

/// The peer interface every connection implements, used for liveness pings.
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";
