use crate::config::HubConfig;
use crate::hub::HubModule;
use crate::link::CloudLink;
use beehive::{BusContext, BusError, Core, CoreHandle, Module, ModuleRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// The runtime orchestrator of one edge node.
///
/// `EdgeSystem` is responsible for:
/// - **Wiring**: one bus, the hub module and any additional local modules
/// - **Lifecycle**: starting every module under the core runtime and shutting them
///   all down on one signal
///
/// # Example
///
/// ```ignore
/// let system = EdgeSystem::builder(config)
///     .link(Arc::new(WebSocketLink::new(&config)))
///     .start()?;
///
/// system.bus().send("hub", msg)?;
///
/// system.shutdown(Duration::from_secs(5)).await;
/// ```
pub struct EdgeSystem {
    bus: BusContext,
    hub: Arc<HubModule>,
    core: CoreHandle,
}

/// Collects the parts of an [`EdgeSystem`] before it starts.
pub struct EdgeSystemBuilder {
    config: HubConfig,
    link: Option<Arc<dyn CloudLink>>,
    bus: Option<BusContext>,
    modules: Vec<Arc<dyn Module>>,
    rotation: Option<mpsc::Receiver<()>>,
    sync_timeout: Option<Duration>,
}

impl EdgeSystemBuilder {
    /// The cloud transport. Defaults to a WebSocket link built from the config.
    pub fn link(mut self, link: Arc<dyn CloudLink>) -> Self {
        self.link = Some(link);
        self
    }

    /// Runs on an existing bus instead of a fresh one.
    pub fn bus(mut self, bus: BusContext) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Another local module to host next to the hub.
    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn rotation(mut self, rotation: mpsc::Receiver<()>) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Default timeout for `send_sync` calls made with a zero timeout.
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Registers every module and starts them.
    pub fn start(self) -> Result<EdgeSystem, BusError> {
        let bus = match (self.bus, self.sync_timeout) {
            (Some(bus), _) => bus,
            (None, Some(timeout)) => BusContext::with_sync_timeout(timeout),
            (None, None) => BusContext::new(),
        };
        let link = match self.link {
            Some(link) => link,
            None => Arc::new(crate::link::WebSocketLink::new(&self.config)),
        };

        let node = self.config.node_name.clone();
        let mut hub = HubModule::new(self.config, link);
        if let Some(rotation) = self.rotation {
            hub = hub.with_rotation(rotation);
        }
        let hub = Arc::new(hub);

        let mut registry = ModuleRegistry::new();
        registry.register(hub.clone())?;
        for module in self.modules {
            registry.register(module)?;
        }

        let core = Core::start(registry, bus.clone())?;
        info!(node = %node, modules = ?bus.modules(), "edge system started");

        Ok(EdgeSystem { bus, hub, core })
    }
}

impl EdgeSystem {
    pub fn builder(config: HubConfig) -> EdgeSystemBuilder {
        EdgeSystemBuilder {
            config,
            link: None,
            bus: None,
            modules: Vec::new(),
            rotation: None,
            sync_timeout: None,
        }
    }

    pub fn bus(&self) -> &BusContext {
        &self.bus
    }

    pub fn hub(&self) -> &Arc<HubModule> {
        &self.hub
    }

    /// Cancels the bus and waits up to `grace` for every module before cleanup.
    pub async fn shutdown(self, grace: Duration) {
        info!("Shutting down edge system...");
        self.core.shutdown(grace).await;
        info!("Edge system shutdown complete.");
    }
}
