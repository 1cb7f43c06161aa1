//! The application-domain worker.
//!
//! Inbound messages which are not replies are handed off the transport task
//! through a channel and delivered to registered handlers on a dedicated
//! thread. Handlers run one message at a time in arrival order, and are
//! explicitly allowed to block.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::warn;

use crate::message::Message;

/// A user-supplied inbound message handler.
pub type InboundHandler = Box<dyn FnMut(&Message) + Send + 'static>;

pub(crate) struct Dispatcher {
    tx: mpsc::Sender<Message>,
    handlers: Arc<Mutex<Vec<InboundHandler>>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Message>();
        let handlers: Arc<Mutex<Vec<InboundHandler>>> = Arc::new(Mutex::new(Vec::new()));

        let worker_handlers = Arc::clone(&handlers);

        let spawned = thread::Builder::new()
            .name("steadybus-dispatch".into())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    let mut handlers = match worker_handlers.lock() {
                        Ok(handlers) => handlers,
                        Err(poisoned) => poisoned.into_inner(),
                    };

                    for handler in handlers.iter_mut() {
                        handler(&message);
                    }
                }
            });

        if let Err(error) = spawned {
            warn!(?error, "failed to spawn dispatch worker");
        }

        Self { tx, handlers }
    }

    /// Register a handler for inbound messages.
    pub(crate) fn add_handler(&self, handler: InboundHandler) {
        let mut handlers = match self.handlers.lock() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };

        handlers.push(handler);
    }

    /// Queue a message for delivery on the worker.
    pub(crate) fn dispatch(&self, message: Message) {
        // A send failure means the worker is gone, which only happens on
        // shutdown; the message is dropped like any other post-close event.
        let _ = self.tx.send(message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::object_path::ObjectPath;

    use super::*;

    #[test]
    fn delivers_in_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        dispatcher.add_handler(Box::new(move |message| {
            let member = match message.kind() {
                crate::MessageKind::Signal { member, .. } => member.clone(),
                _ => return,
            };
            sink.lock().unwrap().push(member);
        }));

        let path = ObjectPath::new_const(b"/test");

        for name in ["One", "Two", "Three"] {
            dispatcher.dispatch(Message::signal(path, name).with_interface("org.test.Iface"));
        }

        // The worker thread drains asynchronously.
        for _ in 0..100 {
            if seen.lock().unwrap().len() == 3 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(*seen.lock().unwrap(), ["One", "Two", "Three"]);
    }

    #[test]
    fn all_handlers_observe_each_message() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let count = Arc::clone(&count);
            dispatcher.add_handler(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let path = ObjectPath::new_const(b"/test");
        dispatcher.dispatch(Message::signal(path, "Ping").with_interface("org.test.Iface"));

        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 2 {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }

        panic!("handlers did not run");
    }
}
