//! # Lifecycle
//!
//! Process-level orchestration: [`EdgeSystem`] builds the bus, registers the hub
//! and any local modules, starts them under the core runtime and shuts them down.

mod edge_system;

pub use edge_system::{EdgeSystem, EdgeSystemBuilder};
