//! # Bus Context
//!
//! [`BusContext`] is the in-process router between modules. It owns one bounded FIFO
//! inbox per registered module, the group membership table, the table of pending
//! sync waiters and the process-wide cancellation token.
//!
//! ## Delivery semantics
//!
//! | Operation | Full inbox | Unknown target |
//! |---|---|---|
//! | [`send`](BusContext::send) | message dropped, warning logged | `UnknownModule` |
//! | [`send_to_group`](BusContext::send_to_group) | that member skipped, warning logged | warning, nothing sent |
//! | [`send_sync`](BusContext::send_sync) | `QueueFull`, no waiter registered | `UnknownModule` |
//!
//! Sends never park on the network; the only blocking points are
//! [`receive`](BusContext::receive), [`send_sync`](BusContext::send_sync) and
//! [`send_to_group_sync`](BusContext::send_to_group_sync).
//!
//! ## Correlation
//!
//! A sync sender waits on its own response mailbox keyed by the request id.
//! [`send_resp`](BusContext::send_resp) looks the mailbox up by the response's
//! `parent_id`; a response nobody waits for is dropped.
//!
//! ## Shutdown
//!
//! [`shutdown`](BusContext::shutdown) cancels the shared token. Every pending
//! `receive`/`send_sync` returns [`BusError::ShutDown`] and later sends fail the same way.

use crate::error::BusError;
use crate::message::Message;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default capacity of a module inbox.
pub const CHANNEL_SIZE_DEFAULT: usize = 1024;

/// Default timeout used by `send_sync` when called with a zero timeout.
pub const MESSAGE_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);

/// Registration parameters of a module inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub capacity: usize,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: CHANNEL_SIZE_DEFAULT,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

struct Inbox {
    capacity: usize,
    sender: mpsc::Sender<Message>,
    receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
}

struct Inner {
    modules: RwLock<HashMap<String, Inbox>>,
    groups: RwLock<BTreeMap<String, BTreeSet<String>>>,
    waiters: RwLock<HashMap<String, mpsc::Sender<Message>>>,
    shutdown: CancellationToken,
    sync_timeout: Duration,
}

/// Handle to the process-wide bus. Cheap to clone.
#[derive(Clone)]
pub struct BusContext {
    inner: Arc<Inner>,
}

impl Default for BusContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a sync waiter from the table when the waiting call returns.
struct WaiterGuard<'a> {
    ctx: &'a BusContext,
    id: String,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.ctx.inner.waiters.write().remove(&self.id);
    }
}

/// Observes a pending sync waiter from outside the bus.
#[derive(Clone)]
pub struct WaiterHandle {
    sender: mpsc::Sender<Message>,
}

impl WaiterHandle {
    /// Completes once the waiter stopped waiting (answered, timed out or shut down).
    pub async fn released(&self) {
        self.sender.closed().await;
    }
}

impl BusContext {
    pub fn new() -> Self {
        Self::with_sync_timeout(MESSAGE_TIMEOUT_DEFAULT)
    }

    /// Creates a bus whose `send_sync` falls back to `sync_timeout` for zero timeouts.
    pub fn with_sync_timeout(sync_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                modules: RwLock::new(HashMap::new()),
                groups: RwLock::new(BTreeMap::new()),
                waiters: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                sync_timeout,
            }),
        }
    }

    // --- Registration ---

    /// Creates the inbox of a module.
    ///
    /// Re-adding a module with identical parameters is a no-op; anything else fails
    /// with [`BusError::AlreadyRegistered`].
    pub fn add_module(&self, info: &ModuleInfo) -> Result<(), BusError> {
        let mut modules = self.inner.modules.write();
        if let Some(existing) = modules.get(&info.name) {
            if existing.capacity == info.capacity {
                return Ok(());
            }
            return Err(BusError::AlreadyRegistered(info.name.clone()));
        }

        let (sender, receiver) = mpsc::channel(info.capacity);
        modules.insert(
            info.name.clone(),
            Inbox {
                capacity: info.capacity,
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            },
        );
        info!(module = %info.name, capacity = info.capacity, "module inbox created");
        Ok(())
    }

    /// Records that `module` belongs to `group`.
    pub fn add_module_group(&self, module: &str, group: &str) -> Result<(), BusError> {
        if !self.inner.modules.read().contains_key(module) {
            warn!(module, group, "bad module name when adding module group");
            return Err(BusError::UnknownModule(module.to_string()));
        }
        self.inner
            .groups
            .write()
            .entry(group.to_string())
            .or_default()
            .insert(module.to_string());
        debug!(module, group, "module joined group");
        Ok(())
    }

    /// Drops the inbox and every group membership of `module`.
    pub fn remove_module(&self, module: &str) {
        if self.inner.modules.write().remove(module).is_none() {
            warn!(module, "remove of unknown module");
            return;
        }
        let mut groups = self.inner.groups.write();
        for members in groups.values_mut() {
            members.remove(module);
        }
        groups.retain(|_, members| !members.is_empty());
        info!(module, "module removed");
    }

    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn groups(&self) -> Vec<String> {
        self.inner.groups.read().keys().cloned().collect()
    }

    pub fn group_members(&self, group: &str) -> Vec<String> {
        self.inner
            .groups
            .read()
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    // --- Delivery ---

    /// Async delivery to module `dst`; returns as soon as the message is enqueued.
    ///
    /// A full inbox drops the message with a warning.
    pub fn send(&self, dst: &str, msg: Message) -> Result<(), BusError> {
        self.ensure_running()?;
        let sender = self.sender(dst)?;
        match sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                warn!(module = dst, msg_id = %msg.id(), "inbox full, message dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(BusError::ShutDown),
        }
    }

    /// Copies `msg` into the inbox of every member of `group`.
    ///
    /// Returns the number of members that accepted the message. Members with a full
    /// inbox are skipped with a warning.
    pub fn send_to_group(&self, group: &str, msg: Message) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        let targets = self.group_senders(group);
        if targets.is_empty() {
            warn!(group, msg_id = %msg.id(), "bad group when sending to group, do nothing");
            return 0;
        }

        let mut delivered = 0;
        for (module, sender) in targets {
            match sender.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(module = %module, group, msg_id = %msg.id(), "inbox full, group member skipped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(module = %module, group, "inbox closed, group member skipped");
                }
            }
        }
        delivered
    }

    /// Sends `msg` to `dst` and waits for the response whose `parent_id` is `msg.id`.
    ///
    /// A zero `timeout` falls back to the bus default. A full inbox fails immediately
    /// with [`BusError::QueueFull`] and leaves no waiter behind.
    pub async fn send_sync(
        &self,
        dst: &str,
        mut msg: Message,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        self.ensure_running()?;
        let timeout = self.effective_timeout(timeout);
        msg.header.sync = true;

        let sender = self.sender(dst)?;
        let permit = sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => BusError::QueueFull(dst.to_string()),
            TrySendError::Closed(()) => BusError::ShutDown,
        })?;

        let id = msg.id().to_string();
        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        self.inner.waiters.write().insert(id.clone(), resp_tx);
        let _guard = WaiterGuard {
            ctx: self,
            id: id.clone(),
        };

        debug!(module = dst, msg_id = %id, ?timeout, "sync request sent");
        permit.send(msg);

        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(BusError::ShutDown),
            resp = resp_rx.recv() => resp.ok_or(BusError::ShutDown),
            _ = tokio::time::sleep(timeout) => {
                warn!(module = dst, msg_id = %id, ?timeout, "timeout waiting for sync response");
                Err(BusError::Timeout { id, timeout })
            }
        }
    }

    /// Broadcasts a sync request to every member of `group` and waits for one response
    /// per member.
    pub async fn send_to_group_sync(
        &self,
        group: &str,
        mut msg: Message,
        timeout: Duration,
    ) -> Result<Vec<Message>, BusError> {
        self.ensure_running()?;
        let timeout = self.effective_timeout(timeout);
        let targets = self.group_senders(group);
        if targets.is_empty() {
            return Err(BusError::UnknownGroup(group.to_string()));
        }
        msg.header.sync = true;

        let mut permits = Vec::with_capacity(targets.len());
        for (module, sender) in &targets {
            let permit = sender.try_reserve().map_err(|e| match e {
                TrySendError::Full(()) => BusError::QueueFull(module.clone()),
                TrySendError::Closed(()) => BusError::ShutDown,
            })?;
            permits.push(permit);
        }

        let expected = permits.len();
        let id = msg.id().to_string();
        let (resp_tx, mut resp_rx) = mpsc::channel(expected);
        self.inner.waiters.write().insert(id.clone(), resp_tx);
        let _guard = WaiterGuard {
            ctx: self,
            id: id.clone(),
        };

        for permit in permits {
            permit.send(msg.clone());
        }

        let collect = async {
            let mut responses = Vec::with_capacity(expected);
            while responses.len() < expected {
                match resp_rx.recv().await {
                    Some(resp) => responses.push(resp),
                    None => return Err(BusError::ShutDown),
                }
            }
            Ok(responses)
        };

        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(BusError::ShutDown),
            result = collect => result,
            _ = tokio::time::sleep(timeout) => {
                warn!(group, msg_id = %id, ?timeout, "timeout waiting for group sync responses");
                Err(BusError::Timeout { id, timeout })
            }
        }
    }

    /// Hands a response to the waiter identified by `resp.parent_id`.
    ///
    /// Responses without a waiter are dropped.
    pub fn send_resp(&self, resp: Message) {
        let waiter = self.inner.waiters.read().get(resp.parent_id()).cloned();
        match waiter {
            Some(sender) => {
                if let Err(e) = sender.try_send(resp) {
                    let resp = match e {
                        TrySendError::Full(m) | TrySendError::Closed(m) => m,
                    };
                    warn!(parent_id = %resp.parent_id(), "waiter not ready, response discarded");
                }
            }
            None => {
                debug!(parent_id = %resp.parent_id(), msg_id = %resp.id(), "no waiter for response, dropped");
            }
        }
    }

    /// Blocks until a message arrives in the inbox of `module`.
    pub async fn receive(&self, module: &str) -> Result<Message, BusError> {
        self.ensure_running()?;
        let receiver = {
            let modules = self.inner.modules.read();
            match modules.get(module) {
                Some(inbox) => inbox.receiver.clone(),
                None => {
                    warn!(module, "failed to get channel when receiving message");
                    return Err(BusError::UnknownModule(module.to_string()));
                }
            }
        };

        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(BusError::ShutDown),
            msg = async {
                let mut rx = receiver.lock().await;
                rx.recv().await
            } => msg.ok_or(BusError::ShutDown),
        }
    }

    // --- Waiters ---

    pub fn has_waiter(&self, id: &str) -> bool {
        self.inner.waiters.read().contains_key(id)
    }

    pub fn waiter(&self, id: &str) -> Option<WaiterHandle> {
        self.inner
            .waiters
            .read()
            .get(id)
            .map(|sender| WaiterHandle {
                sender: sender.clone(),
            })
    }

    // --- Shutdown ---

    /// Fires the process-wide cancellation signal.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("bus shutting down");
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// A child of the process-wide token, for tasks that must stop on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        if self.is_shut_down() {
            Err(BusError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn effective_timeout(&self, timeout: Duration) -> Duration {
        if timeout.is_zero() {
            self.inner.sync_timeout
        } else {
            timeout
        }
    }

    fn sender(&self, module: &str) -> Result<mpsc::Sender<Message>, BusError> {
        match self.inner.modules.read().get(module) {
            Some(inbox) => Ok(inbox.sender.clone()),
            None => {
                warn!(module, "bad module name when sending message");
                Err(BusError::UnknownModule(module.to_string()))
            }
        }
    }

    fn group_senders(&self, group: &str) -> Vec<(String, mpsc::Sender<Message>)> {
        let groups = self.inner.groups.read();
        let Some(members) = groups.get(group) else {
            return Vec::new();
        };
        let modules = self.inner.modules.read();
        members
            .iter()
            .filter_map(|name| {
                modules
                    .get(name)
                    .map(|inbox| (name.clone(), inbox.sender.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Operation;

    fn bus_with(modules: &[(&str, &str)]) -> BusContext {
        let ctx = BusContext::new();
        for (name, group) in modules {
            ctx.add_module(&ModuleInfo::new(*name)).unwrap();
            ctx.add_module_group(name, group).unwrap();
        }
        ctx
    }

    #[test]
    fn add_module_is_idempotent_only_for_same_parameters() {
        let ctx = BusContext::new();
        ctx.add_module(&ModuleInfo::new("twin")).unwrap();
        ctx.add_module(&ModuleInfo::new("twin")).unwrap();

        let err = ctx
            .add_module(&ModuleInfo::new("twin").with_capacity(8))
            .unwrap_err();
        assert_eq!(err, BusError::AlreadyRegistered("twin".into()));
    }

    #[test]
    fn add_module_group_requires_module() {
        let ctx = BusContext::new();
        let err = ctx.add_module_group("ghost", "meta").unwrap_err();
        assert_eq!(err, BusError::UnknownModule("ghost".into()));
    }

    #[tokio::test]
    async fn send_preserves_fifo_order() {
        let ctx = bus_with(&[("twin", "twin")]);
        let first = Message::new().with_body(1);
        let second = Message::new().with_body(2);
        ctx.send("twin", first.clone()).unwrap();
        ctx.send("twin", second.clone()).unwrap();

        assert_eq!(ctx.receive("twin").await.unwrap().id(), first.id());
        assert_eq!(ctx.receive("twin").await.unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn send_to_unknown_module_fails() {
        let ctx = BusContext::new();
        let err = ctx.send("nobody", Message::new()).unwrap_err();
        assert_eq!(err, BusError::UnknownModule("nobody".into()));
    }

    #[tokio::test]
    async fn send_to_full_inbox_drops() {
        let ctx = BusContext::new();
        ctx.add_module(&ModuleInfo::new("tiny").with_capacity(1))
            .unwrap();
        let kept = Message::new();
        ctx.send("tiny", kept.clone()).unwrap();
        ctx.send("tiny", Message::new()).unwrap();

        assert_eq!(ctx.receive("tiny").await.unwrap().id(), kept.id());
        let pending = tokio::time::timeout(Duration::from_millis(20), ctx.receive("tiny")).await;
        assert!(pending.is_err(), "dropped message must not be delivered");
    }

    #[tokio::test]
    async fn group_fan_out_skips_full_members() {
        let ctx = BusContext::new();
        ctx.add_module(&ModuleInfo::new("a").with_capacity(1)).unwrap();
        ctx.add_module(&ModuleInfo::new("b")).unwrap();
        ctx.add_module_group("a", "meta").unwrap();
        ctx.add_module_group("b", "meta").unwrap();

        assert_eq!(ctx.send_to_group("meta", Message::new()), 2);
        assert_eq!(ctx.send_to_group("meta", Message::new()), 1);
        assert_eq!(ctx.send_to_group("nobody", Message::new()), 0);
    }

    #[tokio::test]
    async fn send_sync_returns_matching_response() {
        let ctx = bus_with(&[("meta", "meta")]);
        let responder = ctx.clone();
        tokio::spawn(async move {
            let req = responder.receive("meta").await.unwrap();
            assert!(req.is_sync());
            responder.send_resp(Message::new_response(&req, "done"));
        });

        let req = Message::new().route("edged", "meta", "default/pod/p1", Operation::Query);
        let resp = ctx
            .send_sync("meta", req.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.parent_id(), req.id());
        assert!(!ctx.has_waiter(req.id()));
    }

    #[tokio::test]
    async fn send_sync_times_out_and_cleans_waiter() {
        let ctx = bus_with(&[("meta", "meta")]);
        let req = Message::new();
        let started = tokio::time::Instant::now();
        let err = ctx
            .send_sync("meta", req.clone(), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!ctx.has_waiter(req.id()));
    }

    #[tokio::test]
    async fn send_sync_to_full_inbox_is_queue_full() {
        let ctx = BusContext::new();
        ctx.add_module(&ModuleInfo::new("tiny").with_capacity(1))
            .unwrap();
        ctx.send("tiny", Message::new()).unwrap();

        let req = Message::new();
        let err = ctx
            .send_sync("tiny", req.clone(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::QueueFull("tiny".into()));
        assert!(!ctx.has_waiter(req.id()));
    }

    #[tokio::test]
    async fn response_without_waiter_is_dropped() {
        let ctx = bus_with(&[("meta", "meta")]);
        ctx.send_resp(Message::new().with_parent_id("abc"));
        let pending = tokio::time::timeout(Duration::from_millis(20), ctx.receive("meta")).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn shutdown_releases_receivers_and_waiters() {
        let ctx = bus_with(&[("meta", "meta"), ("twin", "twin")]);

        let receiver = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.receive("twin").await })
        };
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.send_sync("meta", Message::new(), Duration::from_secs(30))
                    .await
            })
        };
        tokio::task::yield_now().await;
        ctx.shutdown();

        assert_eq!(receiver.await.unwrap().unwrap_err(), BusError::ShutDown);
        assert_eq!(waiter.await.unwrap().unwrap_err(), BusError::ShutDown);
        assert_eq!(ctx.send("meta", Message::new()).unwrap_err(), BusError::ShutDown);
    }

    #[tokio::test]
    async fn group_sync_collects_one_response_per_member() {
        let ctx = bus_with(&[("a", "twin"), ("b", "twin")]);
        for member in ["a", "b"] {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let req = ctx.receive(member).await.unwrap();
                ctx.send_resp(Message::new_response(&req, member));
            });
        }

        let responses = ctx
            .send_to_group_sync("twin", Message::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[test]
    fn remove_module_drops_group_membership() {
        let ctx = bus_with(&[("a", "twin"), ("b", "twin")]);
        ctx.remove_module("a");
        assert_eq!(ctx.group_members("twin"), vec!["b".to_string()]);
        assert_eq!(ctx.modules(), vec!["b".to_string()]);
    }
}
