//! The transport-domain task.
//!
//! One task per connection owns the socket and the inbound stage sequence:
//! the SASL stage runs first and removes itself by transitioning into the
//! frame stage, which feeds the typed-message router. Serial assignment and
//! every pending-map mutation happen on this task; user code never runs
//! here.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::frame;
use crate::message::{Message, MessageKind};
use crate::org_freedesktop_dbus as bus;
use crate::sasl::{LineBuffer, SaslClient, SaslOutcome};
use crate::value::Value;

use super::config::Config;
use super::pending::{self, PendingReplies, SerialCounter};
use super::transport::Transport;
use super::{ConnectionEvent, ConnectionState, Shared};

/// Requests crossing from the application domain into the transport task.
pub(crate) enum Command {
    /// Send a method call and complete `reply` with the correlated answer.
    Call {
        message: Message,
        reply: oneshot::Sender<Result<Message>>,
        timeout: Option<Duration>,
    },
    /// Send a message without registering a reply.
    Send {
        message: Message,
        done: oneshot::Sender<Result<()>>,
    },
    /// Tear the current session down and let the retry policy decide.
    Recycle,
    /// Shut the connection down for good.
    Close,
}

/// An established session: authenticated transport plus correlator state.
pub(crate) struct Session {
    transport: Transport,
    /// Bytes received but not yet consumed by the frame decoder.
    read_buf: Vec<u8>,
    pub(crate) pending: PendingReplies,
    serials: SerialCounter,
    shared: Arc<Shared>,
    config: Arc<Config>,
}

/// Open the transport, authenticate, and acquire the mandatory bus name.
///
/// The caller bounds the whole sequence with `connect_timeout`.
pub(crate) async fn establish(config: &Arc<Config>, shared: &Arc<Shared>) -> Result<Session> {
    shared.set_state(ConnectionState::Connecting);

    let mut transport = (config.connector)().await?;
    debug!("transport connected");

    shared.set_state(ConnectionState::Authenticating);

    let (guid, leftover) = match authenticate(config, shared, &mut transport).await {
        Ok(out) => out,
        Err(error) => {
            shared.emit(ConnectionEvent::SaslAuthFailed);
            return Err(error);
        }
    };

    shared.set_guid(guid);
    shared.emit(ConnectionEvent::SaslAuthComplete);
    shared.set_state(ConnectionState::AwaitingName);

    let mut session = Session {
        transport,
        read_buf: leftover,
        pending: PendingReplies::new(),
        serials: SerialCounter::new(),
        shared: Arc::clone(shared),
        config: Arc::clone(config),
    };

    match session.acquire_name().await {
        Ok(name) => {
            debug!(name = %name, "name acquired");
            session.shared.set_name(name.clone());
            session.shared.emit(ConnectionEvent::NameAcquired(name));
            Ok(session)
        }
        Err(error) => {
            session.shared.emit(ConnectionEvent::NameAcquisitionFailed);
            Err(error)
        }
    }
}

/// Drive the SASL stage to completion, returning the server GUID and any
/// binary bytes which followed the final handshake line.
async fn authenticate(
    config: &Arc<Config>,
    shared: &Arc<Shared>,
    transport: &mut Transport,
) -> Result<(String, Vec<u8>)> {
    let mut sasl = SaslClient::new(
        config.mechanisms.iter().copied(),
        Arc::clone(&config.identity),
        config.cookie_keyring_path.clone(),
    )?;

    let mut out = Vec::new();
    sasl.initial(&mut out)?;
    transport.write_all(&out).await?;
    shared.emit(ConnectionEvent::SaslNulByteSent);

    let mut lines = LineBuffer::new();
    let mut scratch = [0u8; 1024];

    loop {
        if let Some(line) = lines.next_line()? {
            let mut out = Vec::new();
            let outcome = sasl.advance(&line, &mut out)?;

            if !out.is_empty() {
                transport.write_all(&out).await?;
            }

            if outcome == SaslOutcome::Authenticated {
                let guid = sasl.guid().unwrap_or_default().to_owned();
                return Ok((guid, lines.take_remainder()));
            }

            continue;
        }

        let n = transport.read(&mut scratch).await?;

        if n == 0 {
            return Err(Error::new(ErrorKind::Disconnected));
        }

        lines.extend(&scratch[..n]);
    }
}

impl Session {
    /// Send the mandatory `Hello` call and wait for the unique name it
    /// assigns. Anything else arriving meanwhile flows to the inbound path.
    async fn acquire_name(&mut self) -> Result<String> {
        let hello = Message::method_call(bus::PATH, "Hello")
            .with_interface(bus::INTERFACE)
            .with_destination(bus::DESTINATION);

        let serial = self.serials.next_serial();
        self.write_frame(&hello, serial).await?;

        let mut scratch = [0u8; 4096];

        loop {
            while let Some((message, consumed)) = self.try_decode()? {
                self.read_buf.drain(..consumed);

                if message.kind().reply_serial() != Some(serial) {
                    self.deliver_inbound(message);
                    continue;
                }

                match message.kind() {
                    MessageKind::Error { error_name, .. } => {
                        return Err(Error::new(ErrorKind::HelloFailed(
                            error_name.as_str().into(),
                        )));
                    }
                    _ => {
                        let Some(Value::String(name)) = message.body().first() else {
                            return Err(Error::new(ErrorKind::InvalidHeaderField));
                        };

                        return Ok(name.clone());
                    }
                }
            }

            let n = self.transport.read(&mut scratch).await?;

            if n == 0 {
                return Err(Error::new(ErrorKind::Disconnected));
            }

            self.read_buf.extend_from_slice(&scratch[..n]);
        }
    }

    /// The main loop: commands in, frames out, deadlines swept.
    ///
    /// Returns `Ok(())` on a deliberate close and an error when the session
    /// died; outstanding requests are failed by the caller either way.
    pub(crate) async fn run(&mut self, cmd_rx: &mut mpsc::Receiver<Command>) -> Result<()> {
        enum Tick {
            Command(Option<Command>),
            Read(std::io::Result<usize>),
            Expired,
        }

        let mut scratch = vec![0u8; 8192];

        loop {
            let deadline = self.pending.next_deadline();

            // The select is scoped so that its borrows end before the tick
            // is acted on.
            let tick = tokio::select! {
                command = cmd_rx.recv() => Tick::Command(command),
                read = self.transport.read(&mut scratch) => Tick::Read(read),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => Tick::Expired,
            };

            match tick {
                Tick::Command(None) | Tick::Command(Some(Command::Close)) => {
                    let _ = self.transport.shutdown().await;
                    return Ok(());
                }
                Tick::Command(Some(Command::Recycle)) => {
                    warn!("session recycled after failed health probes");
                    return Err(Error::new(ErrorKind::Disconnected));
                }
                Tick::Command(Some(Command::Call {
                    message,
                    reply,
                    timeout,
                })) => {
                    self.handle_call(message, reply, timeout).await?;
                }
                Tick::Command(Some(Command::Send { message, done })) => {
                    let serial = self.serials.next_serial();
                    let result = self.write_frame(&message, serial).await;

                    let failed_transport = matches!(
                        &result,
                        Err(error) if matches!(
                            error.kind(),
                            ErrorKind::Io(..) | ErrorKind::Disconnected
                        )
                    );

                    let _ = done.send(result);

                    if failed_transport {
                        return Err(Error::new(ErrorKind::Disconnected));
                    }
                }
                Tick::Read(read) => {
                    let n = read?;

                    if n == 0 {
                        return Err(Error::new(ErrorKind::Disconnected));
                    }

                    self.shared.touch_activity();
                    self.read_buf.extend_from_slice(&scratch[..n]);
                    self.drain_frames()?;
                }
                Tick::Expired => {
                    self.pending.expire(Instant::now());
                }
            }
        }
    }

    async fn handle_call(
        &mut self,
        message: Message,
        reply: oneshot::Sender<Result<Message>>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if !message.expects_reply() {
            let _ = reply.send(Err(Error::new(ErrorKind::InvalidConfiguration(
                "a message without an expected reply cannot be awaited".into(),
            ))));
            return Ok(());
        }

        if self.pending.is_full() {
            let _ = reply.send(Err(Error::new(ErrorKind::PendingLimitExceeded(
                pending::MAX_PENDING,
            ))));
            return Ok(());
        }

        let serial = self.serials.next_serial();

        // The serial counter lapping 2^32 - 1 outstanding requests is a
        // programmer error the correlator reports as fatal.
        if self.pending.contains(serial) {
            let _ = reply.send(Err(Error::new(ErrorKind::SerialCollision(serial.get()))));
            return Err(Error::new(ErrorKind::SerialCollision(serial.get())));
        }

        let deadline =
            Instant::now() + timeout.unwrap_or(self.config.method_call_timeout);

        // Encode before registering so that a codec error surfaces to this
        // caller alone.
        let mut buf = self.shared.pool.acquire(512);

        if let Err(error) = frame::encode_message(&message, serial, &mut buf) {
            self.shared.pool.release(buf);
            let _ = reply.send(Err(error));
            return Ok(());
        }

        if let Err(error) = self.pending.register(serial, deadline, reply) {
            self.shared.pool.release(buf);
            return Err(error);
        }

        trace!(serial = serial.get(), "call registered");

        let result = self.transport.write_all(&buf).await;
        self.shared.pool.release(buf);
        self.shared.touch_activity();

        // A write failure ends the session; the pending entry just
        // registered is failed alongside every other one.
        result?;
        Ok(())
    }

    async fn write_frame(&mut self, message: &Message, serial: std::num::NonZeroU32) -> Result<()> {
        let mut buf = self.shared.pool.acquire(512);

        let result = match frame::encode_message(message, serial, &mut buf) {
            Ok(()) => self
                .transport
                .write_all(&buf)
                .await
                .map_err(Error::from),
            Err(error) => Err(error),
        };

        self.shared.pool.release(buf);
        self.shared.touch_activity();
        result
    }

    fn try_decode(&mut self) -> Result<Option<(Message, usize)>> {
        match frame::decode_frame(&self.read_buf) {
            Ok(decoded) => Ok(decoded),
            Err(error) => {
                let dump_len = self.read_buf.len().min(256);
                error!(
                    %error,
                    "protocol error, closing session\n{}",
                    frame::hex_dump(&self.read_buf[..dump_len])
                );
                Err(error)
            }
        }
    }

    fn drain_frames(&mut self) -> Result<()> {
        while let Some((message, consumed)) = self.try_decode()? {
            self.read_buf.drain(..consumed);
            self.route(message);
        }

        Ok(())
    }

    /// Reply matching is strictly by serial; signals and foreign replies
    /// flow to the application inbound path.
    fn route(&mut self, message: Message) {
        if let Some(reply_serial) = message.kind().reply_serial() {
            if let Some(unmatched) = self.pending.complete(reply_serial, message) {
                trace!(
                    reply_serial = reply_serial.get(),
                    "reply without a pending request"
                );
                self.deliver_inbound(unmatched);
            }

            return;
        }

        self.deliver_inbound(message);
    }

    fn deliver_inbound(&self, message: Message) {
        let _ = self.shared.inbound.send(message.clone());
        self.shared.dispatcher.dispatch(message);
    }
}
