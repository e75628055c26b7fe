//! # Log Setup
//!
//! Every log line is structured: modules, message ids and node names are recorded as
//! fields rather than formatted into the text, e.g.
//!
//! ```text
//! INFO edgehub{node=edge-1}: connected to cloud url=wss://...
//! ```
//!
//! Levels are controlled through `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=info edge-hub --config edgehub.toml
//! RUST_LOG=edge_hub::hub=debug,beehive=info edge-hub
//! ```

/// Installs the global subscriber. Call once, at the top of `main`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
