//! Sender task: priority queue → rate limiter → cloud link.
//!
//! A sync request gets its sync-keeper entry before the write, so a fast response
//! can never beat the registration. One whose local caller already gave up (for
//! instance while the link was down) is dropped instead of sent. The entry's waiter
//! task forwards the cloud's response to the bus and removes the entry when the
//! response arrives, when the entry expires (`heartbeat × 2`) or when the local
//! caller stops waiting.
//!
//! A failed write puts the message back at its original queue position, then
//! reports to the connection supervisor and ends the task.

use super::queue::QueuedMessage;
use super::HubState;
use crate::error::LinkError;
use beehive::{Message, WaiterHandle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub(crate) async fn run(
    state: HubState,
    reconnect: mpsc::Sender<LinkError>,
    cancel: CancellationToken,
) {
    debug!("sender started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = state.queue.get() => item,
        };
        let Some(item) = next else {
            debug!("sender stopped");
            return;
        };

        let throttled = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = state.limiter.throttle(item.msg.id()) => true,
        };
        if !throttled {
            state.queue.requeue(item);
            return;
        }

        match send_one(&state, &item, &cancel).await {
            Ok(()) => {}
            Err(Some(e)) => {
                error!(msg_id = %item.msg.id(), error = %e, "failed to send message to cloud");
                state.queue.requeue(item);
                // a pending signal already triggers the reconnect
                let _ = reconnect.try_send(e);
                return;
            }
            Err(None) => {
                state.queue.requeue(item);
                return;
            }
        }
    }
}

/// Writes one message. `Err(None)` means the write was cancelled.
///
/// A sync request whose local caller already stopped waiting is discarded unsent.
async fn send_one(
    state: &HubState,
    item: &QueuedMessage,
    cancel: &CancellationToken,
) -> Result<(), Option<LinkError>> {
    let msg = &item.msg;
    let id = msg.id().to_string();
    let pending = if msg.is_sync() {
        let Some(local) = state.bus.waiter(&id) else {
            debug!(msg_id = %id, "sync caller gave up before the write, request discarded");
            return Ok(());
        };
        let mailbox = state.keeper.add(&id, state.config.sync_keeper_ttl());
        Some((local, mailbox))
    } else {
        None
    };

    let written = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = state.link.send(msg) => Some(result),
    };

    match written {
        Some(Ok(())) => {
            debug!(msg_id = %id, priority = %msg.priority(), "sent to cloud");
            if let Some((local, mailbox)) = pending {
                spawn_sync_waiter(state.clone(), id, local, mailbox);
            }
            Ok(())
        }
        Some(Err(e)) => {
            if pending.is_some() {
                state.keeper.remove(&id);
            }
            Err(Some(e))
        }
        None => {
            if pending.is_some() {
                state.keeper.remove(&id);
            }
            Err(None)
        }
    }
}

fn spawn_sync_waiter(
    state: HubState,
    id: String,
    local: WaiterHandle,
    mut mailbox: mpsc::Receiver<Message>,
) {
    let expires_at = state
        .keeper
        .expires_at(&id)
        .unwrap_or_else(|| tokio::time::Instant::now() + state.config.sync_keeper_ttl());

    tokio::spawn(async move {
        tokio::select! {
            resp = mailbox.recv() => {
                if let Some(resp) = resp {
                    debug!(msg_id = %id, "sync response received from cloud");
                    state.bus.send_resp(resp);
                }
            }
            _ = tokio::time::sleep_until(expires_at) => {
                warn!(msg_id = %id, "timeout waiting for cloud response");
            }
            _ = local.released() => {
                debug!(msg_id = %id, "local caller stopped waiting");
            }
        }
        state.keeper.remove(&id);
    });
}
