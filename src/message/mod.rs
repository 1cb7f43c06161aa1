pub use self::message_kind::MessageKind;
mod message_kind;

pub use self::message::Message;
mod message;

#[cfg(test)]
mod tests;
