//! Default downlink routes.

use super::{Forwarder, Handler};
use crate::error::DispatchError;
use crate::modules::{
    EVENTBUS_MODULE, FUNC_GROUP, META_GROUP, RESOURCE_GROUP, ROUTER_EVENTBUS_SOURCE, ROUTER_SERVICEBUS_SOURCE,
    SERVICEBUS_MODULE, STREAMRULE_ENDPOINT_SOURCE, STREAMRULE_MODULE, TASK_MANAGER_GROUP,
    TASK_MANAGER_MODULE, TWIN_GROUP, USER_GROUP,
};
use beehive::Message;
use tracing::warn;

/// Fans messages of one or more cloud groups out to a local group.
pub struct GroupHandler {
    name: &'static str,
    accepts: &'static [&'static str],
    target: &'static str,
}

impl GroupHandler {
    pub const fn new(
        name: &'static str,
        accepts: &'static [&'static str],
        target: &'static str,
    ) -> Self {
        Self {
            name,
            accepts,
            target,
        }
    }
}

impl Handler for GroupHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn filter(&self, msg: &Message) -> bool {
        self.accepts.iter().any(|group| *group == msg.group())
    }

    fn process(&self, msg: Message, forwarder: &Forwarder) -> Result<(), DispatchError> {
        forwarder.to_group(self.target, msg)
    }
}

/// `user` group traffic, routed to a bus module by the cloud-side source.
pub struct UserHandler;

impl Handler for UserHandler {
    fn name(&self) -> &str {
        USER_GROUP
    }

    fn filter(&self, msg: &Message) -> bool {
        msg.group() == USER_GROUP
    }

    fn process(&self, msg: Message, forwarder: &Forwarder) -> Result<(), DispatchError> {
        let module = match msg.source() {
            ROUTER_EVENTBUS_SOURCE => EVENTBUS_MODULE,
            ROUTER_SERVICEBUS_SOURCE => SERVICEBUS_MODULE,
            STREAMRULE_ENDPOINT_SOURCE => STREAMRULE_MODULE,
            other => {
                warn!(source = other, msg_id = %msg.id(), "no user module for source, dropped");
                return Ok(());
            }
        };
        forwarder.to_module(module, msg)
    }
}

pub struct TaskManagerHandler;

impl Handler for TaskManagerHandler {
    fn name(&self) -> &str {
        TASK_MANAGER_GROUP
    }

    fn filter(&self, msg: &Message) -> bool {
        msg.group() == TASK_MANAGER_GROUP
    }

    fn process(&self, msg: Message, forwarder: &Forwarder) -> Result<(), DispatchError> {
        forwarder.to_module(TASK_MANAGER_MODULE, msg)
    }
}

/// `meta`/`func`/`resource`, `twin`, `user`, `taskmanager`, in that order.
pub fn default_handlers() -> Vec<Box<dyn Handler>> {
    vec![
        Box::new(GroupHandler::new(
            META_GROUP,
            &[META_GROUP, FUNC_GROUP, RESOURCE_GROUP],
            META_GROUP,
        )),
        Box::new(GroupHandler::new(TWIN_GROUP, &[TWIN_GROUP], TWIN_GROUP)),
        Box::new(UserHandler),
        Box::new(TaskManagerHandler),
    ]
}
