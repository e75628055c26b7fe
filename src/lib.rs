//! # Edge Hub
//!
//! The cloud link of an edge node: a [`beehive`] module that carries bus messages to
//! the cloud over a mutually-authenticated WebSocket and dispatches cloud traffic
//! back to local modules.
//!
//! ## Design
//!
//! ### Priority-Aware Uplink
//! Every message headed for the cloud is classified ([`hub::classifier`]) and queued
//! in a min-heap ([`hub::queue`]). A single token bucket ([`hub::limiter`]) paces the
//! link, so under load the most important traffic consumes the tokens first.
//!
//! ### Request/Response Across the Link
//! A module may `send_sync` to the hub. The request's id is recorded in the
//! [`hub::sync_keeper`] and the cloud's response, recognised by its `parent_id`, is
//! routed back to the waiting caller.
//!
//! ### Self-Healing Connection
//! The [`hub::connection`] supervisor owns the link lifecycle. Any observed link
//! error leads to a reconnect cycle; nothing on the data path ever gives up.
//! Local modules learn about it through `cloud-connected` / `cloud-disconnected`
//! events.
//!
//! ## Module Tour
//!
//! - **[`config`]**: TOML configuration and validation.
//! - **[`link`]**: the [`CloudLink`](link::CloudLink) transport trait, the WebSocket
//!   client and the in-memory test cloud.
//! - **[`hub`]**: the hub module and its tasks.
//! - **[`dispatcher`]**: downlink routing to local groups and modules.
//! - **[`lifecycle`]**: the [`EdgeSystem`](lifecycle::EdgeSystem) orchestrator.
//!
//! ## Testing
//!
//! [`link::MockLink`] stands in for the cloud. See `tests/` for full reconnect and
//! request/response scenarios driven on paused time.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod link;
pub mod modules;

pub use config::HubConfig;
pub use error::{ConfigError, DispatchError, LinkError};
pub use hub::HubModule;
pub use lifecycle::EdgeSystem;
