//! # Beehive
//!
//! An in-process message bus for a set of long-lived modules.
//!
//! Modules are registered by name, grouped by function, and exchange [`Message`]s
//! through a shared [`BusContext`]:
//!
//! - **point-to-point** delivery into a module's bounded FIFO inbox ([`BusContext::send`]);
//! - **group fan-out** to every member of a group ([`BusContext::send_to_group`]);
//! - **request/response** correlation keyed by message id ([`BusContext::send_sync`],
//!   [`BusContext::send_resp`]).
//!
//! The [`Core`] runtime creates every inbox, starts each [`Module`] under a supervisor
//! that honours its [`RestartPolicy`], and shuts everything down on a single
//! cancellation signal.
//!
//! ```rust
//! use beehive::{BusContext, Message, ModuleInfo, Operation};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = BusContext::new();
//!     bus.add_module(&ModuleInfo::new("twin")).unwrap();
//!     bus.add_module_group("twin", "twin").unwrap();
//!
//!     let msg = Message::new().route("edged", "twin", "default/device/d1", Operation::Update);
//!     bus.send("twin", msg.clone()).unwrap();
//!
//!     let got = bus.receive("twin").await.unwrap();
//!     assert_eq!(got.id(), msg.id());
//! }
//! ```

pub mod context;
pub mod error;
pub mod message;
pub mod module;
pub mod registry;
pub mod runtime;
pub mod tracing;

pub use context::{
    BusContext, ModuleInfo, WaiterHandle, CHANNEL_SIZE_DEFAULT, MESSAGE_TIMEOUT_DEFAULT,
};
pub use error::{BusError, ModuleError};
pub use message::{Message, MessageHeader, MessageRoute, Operation, Priority};
pub use module::{Module, RestartKind, RestartPolicy, StartOutcome};
pub use registry::ModuleRegistry;
pub use runtime::{Core, CoreHandle};
