//! # Uplink Priority Queue
//!
//! A min-heap keyed by `(priority, sequence)`. The sequence number is taken at
//! enqueue time, so messages of one class leave in FIFO order and a lower class
//! always leaves first.
//!
//! `get` parks until an item is available or the queue is closed. Closing wakes
//! every parked consumer with `None` but keeps the queued items: producers may keep
//! pushing while the link is down, and the backlog drains in priority order once
//! the queue is reopened.

use beehive::{Message, Priority};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::Notify;

/// A message together with its position in the queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub msg: Message,
    seq: u64,
}

impl QueuedMessage {
    pub fn priority(&self) -> Priority {
        self.msg.priority()
    }

    fn key(&self) -> (Priority, u64) {
        (self.msg.priority(), self.seq)
    }
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Reverse<QueuedMessage>>,
    next_seq: u64,
    closed: bool,
}

/// Shared, cloneable handle to the uplink queue.
#[derive(Clone, Default)]
pub struct PriorityQueue {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `msg` under its current priority.
    pub fn push(&self, msg: Message) {
        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Reverse(QueuedMessage { msg, seq }));
        }
        self.notify.notify_one();
    }

    /// Puts an item taken by `get` back at its original position.
    pub fn requeue(&self, item: QueuedMessage) {
        self.state.lock().heap.push(Reverse(item));
        self.notify.notify_one();
    }

    /// Waits for the highest-priority item. Returns `None` once the queue is closed.
    pub async fn get(&self) -> Option<QueuedMessage> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(Reverse(item)) = state.heap.pop() {
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Wakes every consumer with `None`. Queued items are kept.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Lets consumers take items again after a `close`.
    pub fn reopen(&self) {
        self.state.lock().closed = false;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn size(&self) -> usize {
        self.state.lock().heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn with_priority(priority: Priority) -> Message {
        let mut msg = Message::new();
        msg.set_priority(priority);
        msg
    }

    #[tokio::test]
    async fn lowest_class_leaves_first_and_ties_are_fifo() {
        let queue = PriorityQueue::new();
        let low = with_priority(Priority::Low);
        let normal_a = with_priority(Priority::Normal);
        let normal_b = with_priority(Priority::Normal);
        let emergency = with_priority(Priority::Emergency);
        for msg in [&low, &normal_a, &normal_b, &emergency] {
            queue.push(msg.clone());
        }

        let order: Vec<String> = [
            queue.get().await.unwrap(),
            queue.get().await.unwrap(),
            queue.get().await.unwrap(),
            queue.get().await.unwrap(),
        ]
        .into_iter()
        .map(|item| item.msg.id().to_string())
        .collect();

        assert_eq!(
            order,
            vec![
                emergency.id().to_string(),
                normal_a.id().to_string(),
                normal_b.id().to_string(),
                low.id().to_string(),
            ]
        );
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn get_waits_for_push() {
        let queue = PriorityQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        let msg = Message::new();
        queue.push(msg.clone());
        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got.msg.id(), msg.id());
    }

    #[tokio::test]
    async fn close_wakes_consumers_and_keeps_items() {
        let queue = PriorityQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.close();
        assert!(consumer.await.unwrap().is_none());

        queue.push(Message::new());
        assert!(queue.get().await.is_none());
        assert_eq!(queue.size(), 1);

        queue.reopen();
        let item = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .unwrap();
        assert!(item.is_some());
    }

    #[tokio::test]
    async fn requeue_restores_original_position() {
        let queue = PriorityQueue::new();
        let first = Message::new();
        let second = Message::new();
        queue.push(first.clone());
        queue.push(second.clone());

        let taken = queue.get().await.unwrap();
        assert_eq!(taken.msg.id(), first.id());
        queue.requeue(taken);

        assert_eq!(queue.get().await.unwrap().msg.id(), first.id());
        assert_eq!(queue.get().await.unwrap().msg.id(), second.id());
    }
}
