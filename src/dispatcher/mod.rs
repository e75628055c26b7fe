//! # Downlink Dispatcher
//!
//! Routes messages coming from the cloud to local modules. Handlers are tried in
//! registration order and the first one whose [`Handler::filter`] accepts the
//! message owns it.
//!
//! A message carrying a `parent_id` is a response: its owner hands it to the
//! [`Forwarder::respond`] path (sync-keeper first, then the bus waiters) instead of
//! the handler's normal destination. Responses no handler accepts still take the
//! respond path. Any other message no handler accepts yields
//! [`DispatchError::NoHandler`]; the receiver logs it and moves on.

pub mod handlers;

use crate::error::DispatchError;
use crate::hub::sync_keeper::{Delivery, SyncKeeper};
use beehive::{BusContext, Message};
use tracing::debug;

pub use handlers::{default_handlers, GroupHandler, TaskManagerHandler, UserHandler};

/// One downlink route.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this handler owns `msg`.
    fn filter(&self, msg: &Message) -> bool;

    /// Delivers an original (non-response) message.
    fn process(&self, msg: Message, forwarder: &Forwarder) -> Result<(), DispatchError>;
}

/// Delivery paths available to handlers.
#[derive(Clone)]
pub struct Forwarder {
    bus: BusContext,
    keeper: SyncKeeper,
}

impl Forwarder {
    pub fn new(bus: BusContext, keeper: SyncKeeper) -> Self {
        Self { bus, keeper }
    }

    /// Hands a response to whoever waits for its parent.
    ///
    /// Responses nobody waits for are dropped.
    pub fn respond(&self, msg: Message) -> Result<(), DispatchError> {
        let parent = msg.parent_id().to_string();
        match self.keeper.deliver(msg) {
            Delivery::Delivered => Ok(()),
            Delivery::Full => Err(DispatchError::KeeperFull(parent)),
            Delivery::Unknown(msg) => {
                self.bus.send_resp(msg);
                Ok(())
            }
        }
    }

    pub fn to_module(&self, module: &str, msg: Message) -> Result<(), DispatchError> {
        self.bus.send(module, msg)?;
        Ok(())
    }

    pub fn to_group(&self, group: &str, msg: Message) -> Result<(), DispatchError> {
        let delivered = self.bus.send_to_group(group, msg);
        debug!(group, delivered, "downlink fanned out");
        Ok(())
    }
}

/// Ordered handler list.
pub struct Dispatcher {
    handlers: Vec<Box<dyn Handler>>,
    forwarder: Forwarder,
}

impl Dispatcher {
    /// A dispatcher with no handlers.
    pub fn new(bus: BusContext, keeper: SyncKeeper) -> Self {
        Self {
            handlers: Vec::new(),
            forwarder: Forwarder::new(bus, keeper),
        }
    }

    /// A dispatcher with the default routes for `meta`/`func`/`resource`, `twin`,
    /// `user` and `taskmanager`.
    pub fn with_defaults(bus: BusContext, keeper: SyncKeeper) -> Self {
        let mut dispatcher = Self::new(bus, keeper);
        for handler in default_handlers() {
            dispatcher.register(handler);
        }
        dispatcher
    }

    /// Appends a handler; earlier handlers win.
    pub fn register(&mut self, handler: Box<dyn Handler>) {
        debug!(handler = handler.name(), "handler registered");
        self.handlers.push(handler);
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Routes one downlink message.
    pub fn dispatch(&self, msg: Message) -> Result<(), DispatchError> {
        let Some(handler) = self.handlers.iter().find(|h| h.filter(&msg)) else {
            // a response is owned by its waiter, whatever group it carries
            if msg.is_response() {
                debug!(msg_id = %msg.id(), group = msg.group(), "unrouted response, trying waiters");
                return self.forwarder.respond(msg);
            }
            return Err(DispatchError::NoHandler {
                group: msg.group().to_string(),
            });
        };
        debug!(handler = handler.name(), msg_id = %msg.id(), "dispatching downlink message");
        if msg.is_response() {
            return self.forwarder.respond(msg);
        }
        handler.process(msg, &self.forwarder)
    }
}
