use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;
use crate::pool::BufferPool;

use super::config::Config;
use super::io::{self, Command};
use super::reconnect::{retry_decision, CircuitBreaker, RetryDecision};
use super::{health, ConnectionBuilder, ConnectionEvent, ConnectionState};

/// State shared between the connection task, the monitors and the handles.
pub(crate) struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    pub(crate) inbound: broadcast::Sender<Message>,
    name: Mutex<Option<String>>,
    guid: Mutex<Option<String>>,
    last_activity: Mutex<Instant>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) pool: BufferPool,
}

impl Shared {
    fn new(state_tx: watch::Sender<ConnectionState>) -> Self {
        Self {
            state_tx,
            events: broadcast::channel(64).0,
            inbound: broadcast::channel(256).0,
            name: Mutex::new(None),
            guid: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            dispatcher: Dispatcher::new(),
            pool: BufferPool::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }

            debug!(from = ?current, to = ?state, "state");
            *current = state;
            true
        });
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn set_name(&self, name: String) {
        *lock(&self.name) = Some(name);
    }

    pub(crate) fn clear_name(&self) {
        *lock(&self.name) = None;
    }

    pub(crate) fn name(&self) -> Option<String> {
        lock(&self.name).clone()
    }

    pub(crate) fn set_guid(&self, guid: String) {
        *lock(&self.guid) = Some(guid);
    }

    pub(crate) fn guid(&self) -> Option<String> {
        lock(&self.guid).clone()
    }

    pub(crate) fn touch_activity(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A handle to a D-Bus connection.
///
/// The handle is cheap to clone; all clones drive the same connection. The
/// connection itself lives on a background task which owns the transport
/// and is shut down when [`close`] is called or every handle is dropped.
///
/// [`close`]: Connection::close
///
/// # Examples
///
/// ```no_run
/// use steadybus::{Connection, Message, ObjectPath, Value};
///
/// # #[tokio::main] async fn main() -> steadybus::Result<()> {
/// let connection = Connection::session_bus().await?;
///
/// let call = Message::method_call(
///     ObjectPath::new_const(b"/org/freedesktop/DBus"),
///     "GetNameOwner",
/// )
/// .with_interface("org.freedesktop.DBus")
/// .with_destination("org.freedesktop.DBus")
/// .with_body(vec![Value::from("org.freedesktop.DBus")])?;
///
/// let reply = connection.call(call).await?;
/// println!("owner: {:?}", reply.body());
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Connection {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Connect to the session bus with the default configuration.
    pub async fn session_bus() -> Result<Self> {
        ConnectionBuilder::new().session_bus().connect().await
    }

    /// Connect to the system bus with the default configuration.
    pub async fn system_bus() -> Result<Self> {
        ConnectionBuilder::new().system_bus().connect().await
    }

    pub(crate) async fn start(config: Arc<Config>) -> Result<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared::new(state_tx));
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (connected_tx, connected_rx) = oneshot::channel();

        tokio::spawn(run(
            config,
            Arc::clone(&shared),
            cmd_rx,
            cmd_tx.downgrade(),
            connected_tx,
        ));

        match connected_rx.await {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                shared,
                state_rx,
            }),
            Ok(Err(error)) => Err(error),
            Err(..) => Err(Error::new(ErrorKind::ClosedChannel)),
        }
    }

    /// Send a method call and wait for its reply, using the configured
    /// default deadline.
    ///
    /// An `ERROR` reply resolves the future successfully; inspect
    /// [`Message::kind`] to react to it. Dropping the returned future
    /// cancels the request: a late reply is discarded silently.
    pub async fn call(&self, message: Message) -> Result<Message> {
        self.call_inner(message, None).await
    }

    /// Send a method call with an explicit per-call deadline.
    pub async fn call_with_timeout(&self, message: Message, timeout: Duration) -> Result<Message> {
        self.call_inner(message, Some(timeout)).await
    }

    async fn call_inner(&self, message: Message, timeout: Option<Duration>) -> Result<Message> {
        if !message.expects_reply() {
            return Err(Error::new(ErrorKind::InvalidConfiguration(
                "a message without an expected reply cannot be awaited".into(),
            )));
        }

        let (reply_tx, reply_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Call {
                message,
                reply: reply_tx,
                timeout,
            })
            .await
            .map_err(|_| Error::new(ErrorKind::ClosedChannel))?;

        reply_rx
            .await
            .map_err(|_| Error::new(ErrorKind::ClosedChannel))?
    }

    /// Send a message without waiting for a reply: a signal, an error, a
    /// method return, or a call flagged `NO_REPLY_EXPECTED`.
    ///
    /// The returned future resolves once the transport accepted the bytes.
    pub async fn send(&self, message: Message) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Send {
                message,
                done: done_tx,
            })
            .await
            .map_err(|_| Error::new(ErrorKind::ClosedChannel))?;

        done_rx
            .await
            .map_err(|_| Error::new(ErrorKind::ClosedChannel))?
    }

    /// Register a handler for inbound messages which are not replies.
    ///
    /// Handlers run on a dedicated worker in arrival order and may block.
    pub fn add_inbound_handler(&self, handler: impl FnMut(&Message) + Send + 'static) {
        self.shared.dispatcher.add_handler(Box::new(handler));
    }

    /// Subscribe to inbound messages which are not replies.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<Message> {
        self.shared.inbound.subscribe()
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.subscribe_events()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// The unique bus name assigned by the `Hello` reply, while connected.
    pub fn unique_name(&self) -> Option<String> {
        self.shared.name()
    }

    /// The GUID the server sent during authentication.
    pub fn server_guid(&self) -> Option<String> {
        self.shared.guid()
    }

    #[cfg(test)]
    pub(crate) fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Shut the connection down and wait until it is fully closed.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;

        let mut state_rx = self.state_rx.clone();
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

/// The connection task: establishes sessions and retries per policy.
async fn run(
    config: Arc<Config>,
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::Receiver<Command>,
    weak_cmd: mpsc::WeakSender<Command>,
    connected_tx: oneshot::Sender<Result<()>>,
) {
    let mut connected_tx = Some(connected_tx);
    let mut breaker = CircuitBreaker::new(
        config.breaker_failure_threshold,
        config.breaker_recovery_timeout,
        config.breaker_success_threshold,
    );
    let mut attempt = 0u32;

    loop {
        if let Some(hold) = breaker.hold_off(Instant::now()) {
            debug!(?hold, "circuit breaker open");
            tokio::time::sleep(hold).await;
            continue;
        }

        let established = match tokio::time::timeout(
            config.connect_timeout,
            io::establish(&config, &shared),
        )
        .await
        {
            Ok(result) => result,
            Err(..) => Err(Error::new(ErrorKind::Timeout)),
        };

        match established {
            Ok(mut session) => {
                breaker.record_success();
                attempt = 0;
                shared.set_state(ConnectionState::Connected);
                shared.touch_activity();

                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Ok(()));
                }

                let monitor = config.health_check_enabled.then(|| {
                    tokio::spawn(health::run(
                        weak_cmd.clone(),
                        Arc::clone(&shared),
                        Arc::clone(&config),
                    ))
                });

                let end = session.run(&mut cmd_rx).await;

                if let Some(monitor) = monitor {
                    monitor.abort();
                }

                // The transport is inactive; every outstanding request is
                // failed and the map cleared.
                session.pending.fail_all();

                match end {
                    Ok(()) => {
                        shared.set_state(ConnectionState::Closed);
                        return;
                    }
                    Err(error) => {
                        warn!(%error, "session lost");

                        if !config.auto_reconnect
                            || !pause_before_retry(&config, &shared, &error, &mut attempt).await
                        {
                            shared.set_state(ConnectionState::Closed);
                            return;
                        }

                        breaker.record_failure(Instant::now());
                    }
                }
            }
            Err(error) => {
                if let Some(tx) = connected_tx.take() {
                    // The initial connect fails fast; reconnection is only
                    // armed once a session has been established.
                    shared.set_state(ConnectionState::Closed);
                    let _ = tx.send(Err(error));
                    return;
                }

                breaker.record_failure(Instant::now());

                if !config.auto_reconnect
                    || !pause_before_retry(&config, &shared, &error, &mut attempt).await
                {
                    shared.set_state(ConnectionState::Closed);
                    return;
                }
            }
        }
    }
}

/// Apply the retry policy; returns false when the error or the budget says
/// to give up.
async fn pause_before_retry(
    config: &Arc<Config>,
    shared: &Arc<Shared>,
    error: &Error,
    attempt: &mut u32,
) -> bool {
    *attempt += 1;

    let decision = retry_decision(error.class(), *attempt, config.backoff.max_attempts);

    if decision == RetryDecision::GiveUp {
        warn!(attempt = *attempt, class = ?error.class(), "giving up");
        return false;
    }

    shared.emit(ConnectionEvent::ReconnectionStarting { attempt: *attempt });
    shared.clear_name();
    shared.set_state(ConnectionState::Reconnecting);

    let mut delay = config.backoff.delay(*attempt);

    if decision == RetryDecision::RetryWithExtraDelay {
        delay += config.backoff.initial_delay;
    }

    debug!(?delay, attempt = *attempt, "reconnect scheduled");
    tokio::time::sleep(delay).await;
    true
}
