//! # Edge Hub
//!
//! The `hub` module owns the cloud link. Local modules reach the cloud with
//! `send("hub", msg)` or `send_sync("hub", msg, timeout)`; inbound cloud traffic is
//! dispatched back onto the bus.
//!
//! ## Data Flow
//!
//! ```text
//!  bus inbox "hub" ──► classify ──► PriorityQueue ──► limiter ──► link.send ──► cloud
//!                                                        │
//!                                          sync? ──► SyncKeeper ◄── dispatcher ◄── link.receive
//! ```
//!
//! ## Tasks
//!
//! | Task | Lifetime | Role |
//! |---|---|---|
//! | intake | module | drains the hub inbox into the priority queue |
//! | connection supervisor | module | INITIAL / CONNECTED / DRAINING state machine |
//! | sender | one connection | queue → limiter → link |
//! | receiver | one connection | link → dispatcher |
//! | keepalive | one connection | pushes a ping every heartbeat |
//!
//! The queue, limiter and sync-keeper outlive connections, so a message pushed
//! while the link is down leaves once it is back.

pub mod classifier;
pub mod connection;
pub mod downlink;
pub mod keepalive;
pub mod limiter;
pub mod queue;
pub mod sync_keeper;
pub mod uplink;

use crate::config::HubConfig;
use crate::dispatcher::Dispatcher;
use crate::link::CloudLink;
use crate::modules::{HUB_GROUP, HUB_MODULE};
use async_trait::async_trait;
use beehive::{BusContext, BusError, Module, ModuleError, RestartPolicy};
use connection::ConnectionSupervisor;
use limiter::RateLimiter;
use queue::PriorityQueue;
use std::sync::Arc;
use sync_keeper::SyncKeeper;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, Instrument};

/// Everything the per-connection tasks share.
#[derive(Clone)]
pub(crate) struct HubState {
    pub bus: BusContext,
    pub link: Arc<dyn CloudLink>,
    pub config: Arc<HubConfig>,
    pub queue: PriorityQueue,
    pub limiter: Arc<RateLimiter>,
    pub keeper: SyncKeeper,
    pub dispatcher: Arc<Dispatcher>,
}

/// The module that bridges the bus and the cloud.
pub struct HubModule {
    config: Arc<HubConfig>,
    link: Arc<dyn CloudLink>,
    queue: PriorityQueue,
    limiter: Arc<RateLimiter>,
    keeper: SyncKeeper,
    rotation: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
}

impl HubModule {
    pub fn new(config: HubConfig, link: Arc<dyn CloudLink>) -> Self {
        let limiter = RateLimiter::new(config.message_qps, config.message_burst);
        Self {
            config: Arc::new(config),
            link,
            queue: PriorityQueue::new(),
            limiter: Arc::new(limiter),
            keeper: SyncKeeper::new(),
            rotation: parking_lot::Mutex::new(None),
        }
    }

    /// Certificate rotation notifications. Each signal forces a reconnect.
    ///
    /// Ignored unless `rotate_certificates` is set.
    pub fn with_rotation(self, rotation: mpsc::Receiver<()>) -> Self {
        if self.config.rotate_certificates {
            *self.rotation.lock() = Some(rotation);
        } else {
            info!("certificate rotation disabled, ignoring rotation signal");
        }
        self
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Messages waiting for the link.
    pub fn queue(&self) -> &PriorityQueue {
        &self.queue
    }

    /// In-flight cloud-bound sync requests.
    pub fn keeper(&self) -> &SyncKeeper {
        &self.keeper
    }

    fn state(&self, bus: BusContext) -> HubState {
        let dispatcher = Dispatcher::with_defaults(bus.clone(), self.keeper.clone());
        HubState {
            bus,
            link: self.link.clone(),
            config: self.config.clone(),
            queue: self.queue.clone(),
            limiter: self.limiter.clone(),
            keeper: self.keeper.clone(),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

#[async_trait]
impl Module for HubModule {
    fn name(&self) -> &str {
        HUB_MODULE
    }

    fn group(&self) -> &str {
        HUB_GROUP
    }

    fn restart_policy(&self) -> Option<RestartPolicy> {
        self.config.restart_policy
    }

    async fn start(&self, ctx: BusContext) -> Result<(), ModuleError> {
        let span = info_span!("edgehub", node = %self.config.node_name);
        let state = self.state(ctx.clone());
        let cancel = ctx.shutdown_token();
        let rotation = self.rotation.lock().take();

        let supervisor = tokio::spawn(
            ConnectionSupervisor::new(state.clone(), rotation)
                .run(cancel.clone())
                .instrument(span.clone()),
        );

        let result = intake(&state).instrument(span).await;

        cancel.cancel();
        match supervisor.await {
            Ok(rotation) => *self.rotation.lock() = rotation,
            Err(e) => error!(error = %e, "connection supervisor panicked"),
        }
        result.map_err(Into::into)
    }

    async fn cleanup(&self) {
        self.link.close().await;
        self.queue.close();
        info!(pending = self.queue.size(), in_flight = self.keeper.len(), "hub cleaned up");
    }
}

/// Moves messages from the hub inbox into the priority queue until shutdown.
async fn intake(state: &HubState) -> Result<(), BusError> {
    info!("hub started");
    loop {
        match state.bus.receive(HUB_MODULE).await {
            Ok(msg) => {
                let msg = classifier::stamp(msg);
                debug!(msg_id = %msg.id(), priority = %msg.priority(), "queued for cloud");
                state.queue.push(msg);
            }
            Err(BusError::ShutDown) => {
                info!("hub stopped");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "hub inbox unavailable");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockLink;
    use beehive::ModuleInfo;

    #[tokio::test(start_paused = true)]
    async fn rotation_outlives_a_failed_start() {
        let mut config = HubConfig::new("cloudhub.test:10000", "proj", "edge-1").unwrap();
        config.message_qps = 0.0;
        config.rotate_certificates = true;
        let (link, cloud) = MockLink::new();
        let (rotate, rotation) = mpsc::channel(1);
        let hub = Arc::new(HubModule::new(config, Arc::new(link)).with_rotation(rotation));

        // no hub inbox on this bus, so the intake fails right away
        assert!(hub.start(BusContext::new()).await.is_err());
        assert!(hub.rotation.lock().is_some());

        let bus = BusContext::new();
        bus.add_module(&ModuleInfo::new(HUB_MODULE)).unwrap();
        let restarted = {
            let hub = hub.clone();
            let bus = bus.clone();
            tokio::spawn(async move { hub.start(bus).await })
        };
        cloud.wait_for_connections(1).await;

        rotate.send(()).await.unwrap();
        cloud.wait_for_connections(2).await;
        assert_eq!(cloud.close_calls(), 1);

        bus.shutdown();
        assert!(restarted.await.unwrap().is_ok());
        assert!(hub.rotation.lock().is_some());
    }
}
