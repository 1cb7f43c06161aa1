//! The periodic liveness probe.
//!
//! When the connection is established and has been idle for a while, a
//! `org.freedesktop.DBus.Peer.Ping` method call with a short deadline
//! checks that the bus still answers. Failures raise events; repeated
//! failures recycle the session, which triggers reconnection when enabled.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use tracing::{debug, warn};

use crate::message::Message;
use crate::org_freedesktop_dbus as bus;

use super::config::Config;
use super::io::Command;
use super::{ConnectionEvent, ConnectionState, Shared};

/// Failures in a row after which the session is recycled.
const RECYCLE_AFTER: u32 = 2;

pub(crate) async fn run(
    cmd_tx: mpsc::WeakSender<Command>,
    shared: Arc<Shared>,
    config: Arc<Config>,
) {
    let mut interval = tokio::time::interval(config.health_check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so probes start one
    // interval after connecting.
    interval.tick().await;

    let mut failures = 0u32;

    loop {
        interval.tick().await;

        if shared.state() != ConnectionState::Connected {
            continue;
        }

        // A busy connection proves liveness on its own.
        if shared.idle_for() < config.health_check_interval {
            continue;
        }

        let ping = Message::method_call(bus::PATH, "Ping")
            .with_interface(bus::PEER_INTERFACE)
            .with_destination(bus::DESTINATION);

        let (reply_tx, reply_rx) = oneshot::channel();

        let command = Command::Call {
            message: ping,
            reply: reply_tx,
            timeout: Some(config.health_check_timeout),
        };

        // Holding only a weak sender keeps the connection from being kept
        // alive by its own monitor once every user handle is gone.
        let Some(sender) = cmd_tx.upgrade() else {
            return;
        };

        if sender.send(command).await.is_err() {
            return;
        }

        drop(sender);

        match reply_rx.await {
            Ok(Ok(..)) => {
                failures = 0;
                debug!("health probe ok");
            }
            Ok(Err(error)) => {
                failures += 1;
                warn!(%error, failures, "health probe failed");
                shared.emit(ConnectionEvent::HealthDegraded);

                if failures >= RECYCLE_AFTER {
                    if let Some(sender) = cmd_tx.upgrade() {
                        let _ = sender.send(Command::Recycle).await;
                    }

                    return;
                }
            }
            Err(..) => return,
        }
    }
}
