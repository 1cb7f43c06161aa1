/// The lifecycle state of a [`Connection`].
///
/// The state is mutated only by the connection task and observed through
/// [`Connection::state`] and the watch channel behind it. Transitions are
/// monotonic within one session; [`Closed`] is terminal.
///
/// [`Connection`]: crate::Connection
/// [`Connection::state`]: crate::Connection::state
/// [`Closed`]: ConnectionState::Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// The socket is being opened.
    Connecting,
    /// SASL is in progress.
    Authenticating,
    /// Authenticated; waiting for the `Hello` reply naming us.
    AwaitingName,
    /// Fully established.
    Connected,
    /// A session was lost and a retry is pending.
    Reconnecting,
    /// Terminal.
    Closed,
}

/// Discrete lifecycle signals emitted by the connection task.
///
/// Subscribe through [`Connection::subscribe_events`]. Missing an event is
/// harmless; they carry no data the connection state does not also expose.
///
/// [`Connection::subscribe_events`]: crate::Connection::subscribe_events
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// The mandatory NUL byte opening the SASL exchange was written.
    SaslNulByteSent,
    /// SASL completed; binary frames follow.
    SaslAuthComplete,
    /// SASL failed; the connection will not be established.
    SaslAuthFailed,
    /// The `Hello` reply arrived with our unique bus name.
    NameAcquired(String),
    /// The `Hello` call failed.
    NameAcquisitionFailed,
    /// A session was lost and a reconnect attempt is being scheduled.
    ReconnectionStarting {
        /// The attempt number, starting at 1.
        attempt: u32,
    },
    /// A liveness probe failed.
    HealthDegraded,
}
