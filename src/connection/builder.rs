use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::error::{Error, ErrorKind, Result};
use crate::sasl::{IdentityResolver, Mechanism, UidIdentity};

use super::config::{Config, Connector};
use super::reconnect::BackoffPolicy;
use super::transport::Transport;
use super::Connection;

enum BusKind {
    Session,
    System,
    Address(Address),
    #[cfg(test)]
    Custom(Connector),
}

/// Builder of a [`Connection`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use steadybus::ConnectionBuilder;
///
/// # #[tokio::main] async fn main() -> steadybus::Result<()> {
/// let connection = ConnectionBuilder::new()
///     .session_bus()
///     .method_call_timeout(Duration::from_secs(10))
///     .auto_reconnect(true)
///     .connect()
///     .await?;
/// # Ok(()) }
/// ```
pub struct ConnectionBuilder {
    bus: BusKind,
    connect_timeout: Duration,
    method_call_timeout: Duration,
    auto_reconnect: bool,
    reconnect_initial_delay: Duration,
    reconnect_max_delay: Duration,
    reconnect_multiplier: f64,
    reconnect_jitter_factor: f64,
    reconnect_max_attempts: u32,
    breaker_failure_threshold: u32,
    breaker_recovery_timeout: Duration,
    breaker_success_threshold: u32,
    health_check_enabled: bool,
    health_check_interval: Duration,
    health_check_timeout: Duration,
    mechanisms: Vec<Mechanism>,
    cookie_keyring_path: Option<PathBuf>,
    identity: Arc<dyn IdentityResolver>,
}

impl ConnectionBuilder {
    /// Construct a new builder with the default configuration, targeting
    /// the session bus.
    pub fn new() -> Self {
        Self {
            bus: BusKind::Session,
            connect_timeout: Duration::from_secs(30),
            method_call_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            reconnect_initial_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_multiplier: 2.0,
            reconnect_jitter_factor: 0.1,
            reconnect_max_attempts: 10,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(30),
            breaker_success_threshold: 1,
            health_check_enabled: true,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            // ANONYMOUS is deliberately not attempted unless opted into.
            mechanisms: vec![Mechanism::External, Mechanism::Cookie],
            cookie_keyring_path: None,
            identity: Arc::new(UidIdentity),
        }
    }

    /// Connect to the session bus (default), resolved from
    /// `DBUS_SESSION_BUS_ADDRESS`.
    pub fn session_bus(mut self) -> Self {
        self.bus = BusKind::Session;
        self
    }

    /// Connect to the system bus, resolved from `DBUS_SYSTEM_BUS_ADDRESS`
    /// with the well-known socket as fallback.
    pub fn system_bus(mut self) -> Self {
        self.bus = BusKind::System;
        self
    }

    /// Connect to an explicit [`Address`].
    pub fn address(mut self, address: Address) -> Self {
        self.bus = BusKind::Address(address);
        self
    }

    /// Connect through an arbitrary transport factory, used by tests to
    /// wire connections over in-memory pipes.
    #[cfg(test)]
    pub(crate) fn connector(mut self, connector: Connector) -> Self {
        self.bus = BusKind::Custom(connector);
        self
    }

    /// Upper bound on the entire connect + SASL + Hello handshake.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Default per-call deadline for method calls.
    pub fn method_call_timeout(mut self, timeout: Duration) -> Self {
        self.method_call_timeout = timeout;
        self
    }

    /// Enable or disable automatic reconnection.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Delay before the first reconnect attempt.
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    /// Upper bound on the backoff delay.
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Backoff growth factor per attempt.
    pub fn reconnect_multiplier(mut self, multiplier: f64) -> Self {
        self.reconnect_multiplier = multiplier;
        self
    }

    /// Random noise applied to each backoff delay, as a fraction in
    /// `[0, 1)`.
    pub fn reconnect_jitter_factor(mut self, factor: f64) -> Self {
        self.reconnect_jitter_factor = factor;
        self
    }

    /// How many reconnect attempts to make before giving up.
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Consecutive failures after which the circuit breaker opens.
    pub fn breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// How long the circuit breaker stays open before trial attempts.
    pub fn breaker_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.breaker_recovery_timeout = timeout;
        self
    }

    /// Consecutive trial successes required to close the breaker again.
    pub fn breaker_success_threshold(mut self, threshold: u32) -> Self {
        self.breaker_success_threshold = threshold;
        self
    }

    /// Enable or disable the periodic liveness probe.
    pub fn health_check_enabled(mut self, enabled: bool) -> Self {
        self.health_check_enabled = enabled;
        self
    }

    /// How often the liveness probe runs.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Deadline for each `Ping` probe.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// The ordered list of SASL mechanisms to attempt.
    pub fn auth_mechanisms(mut self, mechanisms: &[Mechanism]) -> Self {
        self.mechanisms = mechanisms.to_vec();
        self
    }

    /// Override the cookie-keyring directory used by DBUS_COOKIE_SHA1.
    pub fn cookie_keyring_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_keyring_path = Some(path.into());
        self
    }

    /// Replace the authorization-identity resolver.
    pub fn identity_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = resolver;
        self
    }

    /// Construct and connect a [`Connection`] with the current
    /// configuration.
    pub async fn connect(self) -> Result<Connection> {
        let config = self.into_config()?;
        Connection::start(Arc::new(config)).await
    }

    fn into_config(self) -> Result<Config> {
        if self.mechanisms.is_empty() {
            return Err(Error::new(ErrorKind::InvalidConfiguration(
                "at least one SASL mechanism must be configured".into(),
            )));
        }

        if self.reconnect_multiplier < 1.0 {
            return Err(Error::new(ErrorKind::InvalidConfiguration(
                "the reconnect multiplier must be at least 1.0".into(),
            )));
        }

        if !(0.0..1.0).contains(&self.reconnect_jitter_factor) {
            return Err(Error::new(ErrorKind::InvalidConfiguration(
                "the jitter factor must be within [0, 1)".into(),
            )));
        }

        let connector: Connector = match self.bus {
            BusKind::Session => {
                let address = Address::session_bus()?;
                Arc::new(move || {
                    let address = address.clone();
                    Box::pin(async move { Transport::connect(&address).await })
                })
            }
            BusKind::System => {
                let address = Address::system_bus()?;
                Arc::new(move || {
                    let address = address.clone();
                    Box::pin(async move { Transport::connect(&address).await })
                })
            }
            BusKind::Address(address) => Arc::new(move || {
                let address = address.clone();
                Box::pin(async move { Transport::connect(&address).await })
            }),
            #[cfg(test)]
            BusKind::Custom(connector) => connector,
        };

        Ok(Config {
            connector,
            connect_timeout: self.connect_timeout,
            method_call_timeout: self.method_call_timeout,
            auto_reconnect: self.auto_reconnect,
            backoff: BackoffPolicy {
                initial_delay: self.reconnect_initial_delay,
                max_delay: self.reconnect_max_delay,
                multiplier: self.reconnect_multiplier,
                jitter_factor: self.reconnect_jitter_factor,
                max_attempts: self.reconnect_max_attempts,
            },
            breaker_failure_threshold: self.breaker_failure_threshold,
            breaker_recovery_timeout: self.breaker_recovery_timeout,
            breaker_success_threshold: self.breaker_success_threshold,
            health_check_enabled: self.health_check_enabled,
            health_check_interval: self.health_check_interval,
            health_check_timeout: self.health_check_timeout,
            mechanisms: self.mechanisms,
            cookie_keyring_path: self.cookie_keyring_path,
            identity: self.identity,
        })
    }
}

impl Default for ConnectionBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
