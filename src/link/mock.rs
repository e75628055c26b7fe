//! # In-Memory Cloud
//!
//! [`MockLink`] implements [`CloudLink`] without a network; the paired [`MockCloud`]
//! handle plays the cloud side in tests:
//!
//! | Need | Call |
//! |---|---|
//! | Inspect uplink traffic | [`MockCloud::sent`], [`MockCloud::wait_for_sent`], [`MockCloud::wait_for_message`] |
//! | Inject downlink traffic | [`MockCloud::push`] |
//! | Fail the next dials | [`MockCloud::fail_next_inits`] |
//! | Fail the next writes | [`MockCloud::fail_next_sends`] |
//! | Break the read side | [`MockCloud::drop_connection`] |
//! | Observe reconnects | [`MockCloud::init_calls`], [`MockCloud::close_calls`], [`MockCloud::wait_for_connections`] |
//!
//! ```rust
//! use edge_hub::link::{CloudLink, MockLink};
//! use beehive::Message;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (link, cloud) = MockLink::new();
//!     link.init().await.unwrap();
//!     link.send(&Message::new()).await.unwrap();
//!     assert_eq!(cloud.sent().len(), 1);
//! }
//! ```

use super::CloudLink;
use crate::error::LinkError;
use async_trait::async_trait;
use beehive::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Deadline reported by injected write failures.
const MOCK_WRITE_DEADLINE: Duration = Duration::from_secs(15);

struct Shared {
    connected: AtomicBool,
    drop_pending: AtomicBool,
    init_calls: AtomicU32,
    close_calls: AtomicU32,
    connections: AtomicU32,
    fail_inits: AtomicU32,
    fail_sends: AtomicU32,
    sent: Mutex<Vec<Message>>,
    auth: Mutex<HashMap<String, String>>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    read_interrupt: Notify,
    changed: Notify,
}

/// Test transport.
pub struct MockLink {
    shared: Arc<Shared>,
}

/// Cloud side of a [`MockLink`].
#[derive(Clone)]
pub struct MockCloud {
    shared: Arc<Shared>,
}

impl MockLink {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (MockLink, MockCloud) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            drop_pending: AtomicBool::new(false),
            init_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
            connections: AtomicU32::new(0),
            fail_inits: AtomicU32::new(0),
            fail_sends: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            auth: Mutex::new(HashMap::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            read_interrupt: Notify::new(),
            changed: Notify::new(),
        });
        (
            MockLink {
                shared: shared.clone(),
            },
            MockCloud { shared },
        )
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl CloudLink for MockLink {
    async fn init(&self) -> Result<(), LinkError> {
        let shared = &self.shared;
        shared.init_calls.fetch_add(1, Ordering::SeqCst);
        let result = if take_one(&shared.fail_inits) {
            Err(LinkError::MaxRetryExceeded)
        } else {
            shared.drop_pending.store(false, Ordering::SeqCst);
            shared.connected.store(true, Ordering::SeqCst);
            shared.connections.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        shared.changed.notify_waiters();
        result
    }

    async fn send(&self, msg: &Message) -> Result<(), LinkError> {
        let shared = &self.shared;
        if !shared.connected.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        if take_one(&shared.fail_sends) {
            return Err(LinkError::WriteTimeout(MOCK_WRITE_DEADLINE));
        }
        shared.sent.lock().push(msg.clone());
        shared.changed.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<Message, LinkError> {
        let shared = &self.shared;
        if !shared.connected.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        let mut rx = shared.inbound_rx.lock().await;
        loop {
            let interrupted = shared.read_interrupt.notified();
            tokio::pin!(interrupted);
            interrupted.as_mut().enable();

            if shared.drop_pending.swap(false, Ordering::SeqCst)
                || !shared.connected.load(Ordering::SeqCst)
            {
                return Err(LinkError::Closed);
            }

            tokio::select! {
                msg = rx.recv() => return msg.ok_or(LinkError::Closed),
                _ = &mut interrupted => continue,
            }
        }
    }

    async fn close(&self) {
        let shared = &self.shared;
        shared.connected.store(false, Ordering::SeqCst);
        shared.close_calls.fetch_add(1, Ordering::SeqCst);
        shared.read_interrupt.notify_waiters();
        shared.changed.notify_waiters();
    }

    fn notify_auth(&self, headers: HashMap<String, String>) {
        *self.shared.auth.lock() = headers;
    }
}

impl MockCloud {
    /// Queues a downlink message for the hub's receiver.
    pub fn push(&self, msg: Message) {
        // the receiving half lives in `Shared`, so this cannot fail
        let _ = self.shared.inbound_tx.send(msg);
    }

    /// Every message written by the hub so far, in write order.
    pub fn sent(&self) -> Vec<Message> {
        self.shared.sent.lock().clone()
    }

    /// Waits until at least `n` messages have been written, then returns all of them.
    pub async fn wait_for_sent(&self, n: usize) -> Vec<Message> {
        self.wait_until(|| self.shared.sent.lock().len() >= n).await;
        self.sent()
    }

    /// Waits until a written message matches `pred` and returns it.
    pub async fn wait_for_message(&self, pred: impl Fn(&Message) -> bool) -> Message {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            let found = self.shared.sent.lock().iter().find(|m| pred(m)).cloned();
            if let Some(found) = found {
                return found;
            }
            changed.await;
        }
    }

    /// Waits until `init` has succeeded at least `n` times.
    pub async fn wait_for_connections(&self, n: u32) {
        self.wait_until(|| self.connections() >= n).await;
    }

    /// Waits until `close` has been called at least `n` times.
    pub async fn wait_for_closes(&self, n: u32) {
        self.wait_until(|| self.close_calls() >= n).await;
    }

    pub fn fail_next_inits(&self, n: u32) {
        self.shared.fail_inits.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.shared.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Makes the pending (or next) `receive` fail as if the peer went away.
    pub fn drop_connection(&self) {
        self.shared.drop_pending.store(true, Ordering::SeqCst);
        self.shared.read_interrupt.notify_waiters();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn init_calls(&self) -> u32 {
        self.shared.init_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> u32 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn auth_headers(&self) -> HashMap<String, String> {
        self.shared.auth.lock().clone()
    }

    async fn wait_until(&self, done: impl Fn() -> bool) {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if done() {
                return;
            }
            changed.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_are_consumed_one_by_one() {
        let (link, cloud) = MockLink::new();
        cloud.fail_next_inits(1);
        assert!(matches!(link.init().await, Err(LinkError::MaxRetryExceeded)));
        link.init().await.unwrap();
        assert_eq!(cloud.init_calls(), 2);
        assert_eq!(cloud.connections(), 1);

        cloud.fail_next_sends(1);
        assert!(link.send(&Message::new()).await.is_err());
        link.send(&Message::new()).await.unwrap();
        assert_eq!(cloud.sent().len(), 1);
    }

    #[tokio::test]
    async fn pushed_messages_are_received_in_order() {
        let (link, cloud) = MockLink::new();
        link.init().await.unwrap();
        let first = Message::new();
        let second = Message::new();
        cloud.push(first.clone());
        cloud.push(second.clone());

        assert_eq!(link.receive().await.unwrap().id(), first.id());
        assert_eq!(link.receive().await.unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn drop_connection_fails_pending_receive() {
        let (link, cloud) = MockLink::new();
        link.init().await.unwrap();
        let link = Arc::new(link);
        let reader = {
            let link = link.clone();
            tokio::spawn(async move { link.receive().await })
        };
        tokio::task::yield_now().await;

        cloud.drop_connection();
        assert!(matches!(reader.await.unwrap(), Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn close_disconnects() {
        let (link, cloud) = MockLink::new();
        link.init().await.unwrap();
        link.close().await;

        assert!(!cloud.is_connected());
        assert_eq!(cloud.close_calls(), 1);
        assert!(matches!(
            link.send(&Message::new()).await,
            Err(LinkError::NotConnected)
        ));
    }
}
