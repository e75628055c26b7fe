//! Well-known module names, group names and routing constants shared by the hub,
//! the dispatcher and local modules.

pub const HUB_MODULE: &str = "hub";
pub const HUB_GROUP: &str = "hub";

pub const META_GROUP: &str = "meta";
pub const FUNC_GROUP: &str = "func";
/// Cloud requests of the metadata manager travel in this group.
pub const RESOURCE_GROUP: &str = "resource";
pub const TWIN_GROUP: &str = "twin";
pub const USER_GROUP: &str = "user";
pub const TASK_MANAGER_GROUP: &str = "taskmanager";

pub const TASK_MANAGER_MODULE: &str = "taskmanager";
pub const EVENTBUS_MODULE: &str = "eventbus";
pub const SERVICEBUS_MODULE: &str = "servicebus";
pub const STREAMRULE_MODULE: &str = "streamrule";

/// Sources of `user` group traffic coming from the cloud router.
pub const ROUTER_EVENTBUS_SOURCE: &str = "router_eventbus";
pub const ROUTER_SERVICEBUS_SOURCE: &str = "router_servicebus";
pub const STREAMRULE_ENDPOINT_SOURCE: &str = "streamrule_endpoint";

/// Local sources with a dedicated uplink class.
pub const EVENTBUS_SOURCE: &str = "eventbus";
pub const METAMANAGER_SOURCE: &str = "metamanager";

/// Connection-state events.
pub const CONNECTION_SOURCE: &str = "edgehub";
pub const CONNECTION_RESOURCE: &str = "node/connection";
pub const CLOUD_CONNECTED: &str = "cloud-connected";
pub const CLOUD_DISCONNECTED: &str = "cloud-disconnected";

/// Keepalive route.
pub const KEEPALIVE_GROUP: &str = RESOURCE_GROUP;
pub const KEEPALIVE_RESOURCE: &str = "node";
pub const KEEPALIVE_BODY: &str = "ping";
