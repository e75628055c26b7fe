//! # Connection Supervisor
//!
//! Drives the cloud connection through its lifecycle:
//!
//! ```text
//!       (start)
//!          │
//!          ▼
//!   ┌──► INITIAL ──init ok──► CONNECTED ──link error / rotation──► DRAINING
//!   │       │                                                        │
//!   │       └── init failed: wait_connection_period, retry           │
//!   │                                                                │
//!   └──────────── sleep heartbeat × 2, drain reconnect signals ◄─────┘
//! ```
//!
//! - **INITIAL → CONNECTED**: reopen the queue, publish `cloud-connected` to every
//!   local group, then start receiver, sender and keepalive under a per-connection
//!   token. Publishing first means every group sees the event before any inbound
//!   cloud message.
//! - **CONNECTED → DRAINING**: the first reconnect signal, or a rotation signal.
//! - **DRAINING**: close the queue, stop the connection tasks, close the link,
//!   publish `cloud-disconnected`, wait `heartbeat × 2` and discard the reconnect
//!   signals that piled up meanwhile.
//!
//! Process shutdown exits from any state; from CONNECTED it still goes through the
//! drain steps so local modules see `cloud-disconnected`.

use super::{downlink, keepalive, uplink, HubState};
use crate::error::LinkError;
use crate::modules::{
    CLOUD_CONNECTED, CLOUD_DISCONNECTED, CONNECTION_RESOURCE, CONNECTION_SOURCE, HUB_GROUP,
};
use beehive::{Message, Operation};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pending reconnect signals held per connection.
const RECONNECT_SIGNALS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    Connected,
    Draining,
}

enum Stop {
    Shutdown,
    LinkFailure(LinkError),
    Rotation,
}

pub(crate) struct ConnectionSupervisor {
    state: HubState,
    rotation: Option<mpsc::Receiver<()>>,
    current: ConnectionState,
}

impl ConnectionSupervisor {
    pub(crate) fn new(state: HubState, rotation: Option<mpsc::Receiver<()>>) -> Self {
        Self {
            state,
            rotation,
            current: ConnectionState::Initial,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        info!(from = ?self.current, to = ?next, "connection state changed");
        self.current = next;
    }

    /// Runs until `cancel` fires, then hands back the rotation receiver so a
    /// restarted hub keeps listening to it.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Option<mpsc::Receiver<()>> {
        loop {
            // INITIAL
            let init = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.state.link.init() => result,
            };
            if let Err(e) = init {
                error!(error = %e, retry_in = ?self.state.config.wait_connection_period, "connection failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.state.config.wait_connection_period) => continue,
                }
            }

            // CONNECTED
            self.transition(ConnectionState::Connected);
            self.state.queue.reopen();
            self.publish(CLOUD_CONNECTED);

            let connection = cancel.child_token();
            let (signal_tx, mut signals) = mpsc::channel(RECONNECT_SIGNALS);
            let mut tasks = JoinSet::new();
            tasks.spawn(downlink::run(
                self.state.clone(),
                signal_tx.clone(),
                connection.clone(),
            ));
            tasks.spawn(uplink::run(
                self.state.clone(),
                signal_tx,
                connection.clone(),
            ));
            tasks.spawn(keepalive::run(self.state.clone(), connection.clone()));

            let stop = tokio::select! {
                biased;
                _ = cancel.cancelled() => Stop::Shutdown,
                Some(e) = signals.recv() => Stop::LinkFailure(e),
                Some(()) = next_rotation(&mut self.rotation) => Stop::Rotation,
            };
            match &stop {
                Stop::Shutdown => info!("shutting down cloud connection"),
                Stop::LinkFailure(e) => warn!(error = %e, "cloud link failed, reconnecting"),
                Stop::Rotation => info!("certificates rotated, reconnecting"),
            }

            // DRAINING
            self.transition(ConnectionState::Draining);
            self.state.queue.close();
            connection.cancel();
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "connection task panicked");
                }
            }
            self.state.link.close().await;
            self.publish(CLOUD_DISCONNECTED);

            if matches!(stop, Stop::Shutdown) {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.state.config.heartbeat * 2) => {}
            }
            let mut discarded = 0;
            while signals.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                info!(discarded, "dropped stale reconnect signals");
            }
            self.transition(ConnectionState::Initial);
        }
        info!("connection supervisor stopped");
        self.rotation
    }

    /// Sends one connection event to every local group but the hub's own.
    fn publish(&self, event: &str) {
        for group in self.state.bus.groups() {
            if group == HUB_GROUP {
                continue;
            }
            let msg = Message::new()
                .route(CONNECTION_SOURCE, group.as_str(), CONNECTION_RESOURCE, Operation::Publish)
                .with_body(event);
            self.state.bus.send_to_group(&group, msg);
        }
        info!(event, "connection state published");
    }
}

async fn next_rotation(rotation: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match rotation {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
