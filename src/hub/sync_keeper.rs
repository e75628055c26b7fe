//! # Sync-Keeper
//!
//! Correlates cloud-bound sync requests with the responses coming back on the
//! downlink. Each entry maps a request id to a single-slot mailbox and an expiry.
//!
//! The map sits behind one reader/writer lock: delivery and lookups take the read
//! lock, only `add`/`remove` write. The sender owns the waiter task of every entry
//! and is responsible for removing it.

use beehive::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct Entry {
    sender: mpsc::Sender<Message>,
    expires_at: Instant,
}

/// Result of handing a downlink response to the keeper.
#[derive(Debug, PartialEq)]
pub enum Delivery {
    Delivered,
    /// The entry exists but its mailbox already holds a response.
    Full,
    /// No entry for this parent id; the response is handed back.
    Unknown(Message),
}

#[derive(Clone, Default)]
pub struct SyncKeeper {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl SyncKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers request `id` and returns the receiving side of its mailbox.
    pub fn add(&self, id: &str, ttl: Duration) -> mpsc::Receiver<Message> {
        let (sender, receiver) = mpsc::channel(1);
        self.entries.write().insert(
            id.to_string(),
            Entry {
                sender,
                expires_at: Instant::now() + ttl,
            },
        );
        receiver
    }

    /// Routes `resp` to the entry named by its `parent_id`.
    pub fn deliver(&self, resp: Message) -> Delivery {
        let entries = self.entries.read();
        match entries.get(resp.parent_id()) {
            Some(entry) => match entry.sender.try_send(resp) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Full,
            },
            None => Delivery::Unknown(resp),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn expires_at(&self, id: &str) -> Option<Instant> {
        self.entries.read().get(id).map(|e| e.expires_at)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_matching_entry_once() {
        let keeper = SyncKeeper::new();
        let req = Message::new();
        let mut rx = keeper.add(req.id(), Duration::from_secs(30));

        assert_eq!(keeper.deliver(Message::new_response(&req, "a")), Delivery::Delivered);
        assert_eq!(keeper.deliver(Message::new_response(&req, "b")), Delivery::Full);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.parent_id(), req.id());
        assert_eq!(got.content, serde_json::json!("a"));
    }

    #[test]
    fn unknown_parent_is_reported() {
        let keeper = SyncKeeper::new();
        let resp = Message::new().with_parent_id("nobody");
        assert!(matches!(keeper.deliver(resp), Delivery::Unknown(m) if m.parent_id() == "nobody"));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_records_expiry_and_can_be_removed() {
        let keeper = SyncKeeper::new();
        let now = Instant::now();
        let _rx = keeper.add("req-1", Duration::from_secs(30));

        assert_eq!(keeper.expires_at("req-1"), Some(now + Duration::from_secs(30)));
        assert!(keeper.remove("req-1"));
        assert!(!keeper.contains("req-1"));
        assert!(keeper.is_empty());
    }
}
