//! Keepalive task: one ping into the priority queue per heartbeat.
//!
//! A missed heartbeat does not trigger a reconnect by itself; link errors do.

use super::{classifier, HubState};
use crate::modules::{HUB_MODULE, KEEPALIVE_BODY, KEEPALIVE_GROUP, KEEPALIVE_RESOURCE};
use beehive::{Message, Operation};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub fn ping() -> Message {
    Message::new()
        .route(HUB_MODULE, KEEPALIVE_GROUP, KEEPALIVE_RESOURCE, Operation::Keepalive)
        .with_body(KEEPALIVE_BODY)
}

pub(crate) async fn run(state: HubState, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(state.config.heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(period = ?state.config.heartbeat, "keepalive started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("keepalive stopped");
                return;
            }
            _ = ticker.tick() => {
                let msg = classifier::stamp(ping());
                trace!(msg_id = %msg.id(), "keepalive queued");
                state.queue.push(msg);
            }
        }
    }
}
