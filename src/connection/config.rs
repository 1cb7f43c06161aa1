use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::sasl::{IdentityResolver, Mechanism};

use super::reconnect::BackoffPolicy;
use super::transport::Transport;

/// Produces a fresh transport for every (re)connection attempt.
pub(crate) type Connector =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Transport>> + Send>> + Send + Sync>;

/// The resolved configuration a connection runs with.
pub(crate) struct Config {
    pub(crate) connector: Connector,
    /// Upper bound on connect + SASL + Hello as a whole.
    pub(crate) connect_timeout: Duration,
    /// Default per-call deadline.
    pub(crate) method_call_timeout: Duration,
    pub(crate) auto_reconnect: bool,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) breaker_failure_threshold: u32,
    pub(crate) breaker_recovery_timeout: Duration,
    pub(crate) breaker_success_threshold: u32,
    pub(crate) health_check_enabled: bool,
    pub(crate) health_check_interval: Duration,
    pub(crate) health_check_timeout: Duration,
    /// Mechanisms to attempt, highest preference first.
    pub(crate) mechanisms: Vec<Mechanism>,
    pub(crate) cookie_keyring_path: Option<PathBuf>,
    pub(crate) identity: Arc<dyn IdentityResolver>,
}
