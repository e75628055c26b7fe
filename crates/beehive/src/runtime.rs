//! # Core Runtime
//!
//! [`Core`] turns a [`ModuleRegistry`] into running tasks:
//!
//! 1. every enabled module gets its inbox and joins its group on the [`BusContext`];
//! 2. each module's `start` runs in its own task under a supervisor;
//! 3. the supervisor applies the module's [`RestartPolicy`] when `start` returns,
//!    fails or panics. Before each restart the interval grows by the policy's rule
//!    (starting from `intervalSecond`) and the supervisor waits that long.
//!
//! A module without a restart policy runs once. Nothing is restarted after the bus
//! has been shut down.
//!
//! [`CoreHandle::shutdown`] fires the shared cancellation signal, gives the modules a
//! grace period to return, aborts the stragglers and finally calls every module's
//! `cleanup` before removing it from the bus.

use crate::context::BusContext;
use crate::error::BusError;
use crate::module::{Module, StartOutcome};
use crate::registry::ModuleRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Starts registered modules on a bus.
pub struct Core;

impl Core {
    /// Registers every module's inbox and group, then spawns one supervised task per module.
    ///
    /// Inboxes are all created before any module starts, so a module may send to
    /// another one from the first line of its `start`.
    pub fn start(registry: ModuleRegistry, ctx: BusContext) -> Result<CoreHandle, BusError> {
        let entries = registry.into_entries();

        for entry in &entries {
            ctx.add_module(&entry.info)?;
            ctx.add_module_group(&entry.info.name, entry.module.group())?;
        }

        let mut tasks = JoinSet::new();
        let mut modules = Vec::with_capacity(entries.len());
        for entry in entries {
            info!(module = entry.module.name(), "starting module");
            tasks.spawn(supervise(entry.module.clone(), ctx.clone()));
            modules.push(entry.module);
        }

        Ok(CoreHandle {
            ctx,
            modules,
            tasks,
        })
    }
}

/// Runs `start` until the module's restart policy says stop.
async fn supervise(module: Arc<dyn Module>, ctx: BusContext) {
    let name = module.name().to_string();
    let policy = module.restart_policy();
    let mut attempts: u32 = 0;
    let mut interval = policy.map(|p| p.initial_interval()).unwrap_or_default();

    loop {
        let task_module = module.clone();
        let task_ctx = ctx.clone();
        let outcome = match tokio::spawn(async move { task_module.start(task_ctx).await }).await
        {
            Ok(Ok(())) => StartOutcome::Returned,
            Ok(Err(e)) => StartOutcome::Failed(e.to_string()),
            Err(join) if join.is_panic() => StartOutcome::Panicked,
            Err(_) => StartOutcome::Returned,
        };

        match &outcome {
            StartOutcome::Returned => info!(module = %name, "module returned"),
            StartOutcome::Failed(reason) => error!(module = %name, %reason, "module failed"),
            StartOutcome::Panicked => error!(module = %name, "module panicked"),
        }

        if ctx.is_shut_down() {
            break;
        }
        let Some(policy) = policy else {
            break;
        };
        if !policy.should_restart(&outcome) {
            break;
        }
        if !policy.allows(attempts) {
            warn!(module = %name, attempts, "restart limit reached, module stays down");
            break;
        }

        attempts += 1;
        interval = policy.next_interval(interval);
        info!(module = %name, attempts, ?interval, "restarting module");
        let cancel = ctx.shutdown_token();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Handle on the running modules of one process.
pub struct CoreHandle {
    ctx: BusContext,
    modules: Vec<Arc<dyn Module>>,
    tasks: JoinSet<()>,
}

impl CoreHandle {
    pub fn context(&self) -> &BusContext {
        &self.ctx
    }

    /// Waits until every module supervisor has finished on its own.
    pub async fn join(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Cancels the bus, waits up to `grace` for the modules, then runs their cleanup.
    pub async fn shutdown(mut self, grace: Duration) {
        info!("Shutting down modules...");
        self.ctx.shutdown();

        if tokio::time::timeout(grace, self.join()).await.is_err() {
            warn!(?grace, remaining = self.tasks.len(), "grace period over, aborting modules");
            self.tasks.abort_all();
            self.join().await;
        }

        for module in &self.modules {
            module.cleanup().await;
            self.ctx.remove_module(module.name());
            info!(module = module.name(), "module cleaned up");
        }
        info!("Module shutdown complete.");
    }
}
