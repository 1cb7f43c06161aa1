use std::num::NonZeroU32;

use crate::object_path::ObjectPath;
use crate::proto::Flags;
use crate::value::Value;

use super::{Message, MessageKind};

const PATH: &ObjectPath = ObjectPath::new_const(b"/org/freedesktop/DBus");

#[test]
fn method_call_expects_reply() {
    let m = Message::method_call(PATH, "Hello");
    assert!(m.expects_reply());

    let m = m.with_flags(Flags::NO_REPLY_EXPECTED);
    assert!(!m.expects_reply());

    let m = Message::signal(PATH, "NameAcquired").with_interface("org.freedesktop.DBus");
    assert!(!m.expects_reply());
}

#[test]
fn reply_flips_addressing() {
    let mut m = Message::method_call(PATH, "Hello")
        .with_sender(":1.7")
        .with_destination("org.freedesktop.DBus");
    m.serial = NonZeroU32::new(42);

    let reply = m.method_return().unwrap();
    assert_eq!(reply.destination(), m.sender());
    assert_eq!(reply.sender(), m.destination());
    assert_eq!(reply.kind().reply_serial(), NonZeroU32::new(42));

    let error = m.error("org.freedesktop.DBus.Error.UnknownMethod").unwrap();
    assert!(matches!(error.kind(), MessageKind::Error { .. }));
    assert_eq!(error.kind().reply_serial(), NonZeroU32::new(42));
}

#[test]
fn reply_to_unsent_message_is_an_error() {
    let m = Message::method_call(PATH, "Hello");
    assert!(m.method_return().is_err());
}

#[test]
fn body_updates_signature() {
    let m = Message::method_call(PATH, "RequestName")
        .with_body(vec![Value::from("org.example.Name"), Value::UInt32(4)])
        .unwrap();

    assert_eq!(m.signature().as_str(), "su");
    assert_eq!(m.body().len(), 2);
}
