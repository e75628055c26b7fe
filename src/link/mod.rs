//! # Cloud Link
//!
//! The transport between the hub and the cloud, as a trait so the hub can run
//! against the production WebSocket client or the in-memory [`mock::MockLink`].
//!
//! One link instance lives for the whole process. Every connection cycle calls
//! [`init`](CloudLink::init) and, on the way down, [`close`](CloudLink::close).
//! Writes from the sender and reads from the receiver may run concurrently.

pub mod mock;
pub mod tls;
pub mod websocket;

use crate::error::LinkError;
use async_trait::async_trait;
use beehive::Message;
use std::collections::HashMap;

pub use mock::{MockCloud, MockLink};
pub use websocket::WebSocketLink;

#[async_trait]
pub trait CloudLink: Send + Sync + 'static {
    /// Establishes a fresh connection, retrying per the link's own policy.
    async fn init(&self) -> Result<(), LinkError>;

    /// Writes one message. Writes are serialized internally.
    async fn send(&self, msg: &Message) -> Result<(), LinkError>;

    /// Waits for the next inbound message.
    async fn receive(&self) -> Result<Message, LinkError>;

    /// Tears down the current connection, if any.
    async fn close(&self);

    /// Extra authentication headers applied on the next `init`.
    fn notify_auth(&self, headers: HashMap<String, String>);
}
