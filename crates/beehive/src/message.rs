//! # Message Model
//!
//! This module defines the single envelope carried between modules and across the
//! cloud link. A [`Message`] is made of a [`MessageHeader`] (identity, correlation,
//! priority), a [`MessageRoute`] (who sent it and what it targets) and an opaque JSON
//! body.
//!
//! ## Wire Format
//!
//! Header and route are flattened into one JSON object, so a message on the wire
//! looks like:
//!
//! ```json
//! {
//!   "id": "6a0c...", "parent_id": "", "timestamp": 1718000000000, "sync": false,
//!   "source": "twin", "group": "twin", "resource": "default/device/d1",
//!   "operation": "update", "priority": "normal", "content": {"temp": 21}
//! }
//! ```
//!
//! ## Responses
//!
//! Responses must be built with [`Message::new_response`]. It copies the request's
//! `id` into `parent_id`, keeps the route, sets the operation to
//! [`Operation::Response`] and carries the request's [`Priority`] back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// The closed set of operations a message may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Query,
    Response,
    Upload,
    Publish,
    Keepalive,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Query => "query",
            Operation::Response => "response",
            Operation::Upload => "upload",
            Operation::Publish => "publish",
            Operation::Keepalive => "keepalive",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority class of a message on the cloud link.
///
/// Classes are totally ordered: `Emergency < Urgent < Important < Normal < Low`.
/// A lower class drains first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Emergency = 0,
    Urgent = 1,
    Important = 2,
    #[default]
    Normal = 3,
    Low = 4,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Emergency => "emergency",
            Priority::Urgent => "urgent",
            Priority::Important => "important",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

/// Identity and correlation data of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub id: String,
    /// Empty on originals, the request's `id` on responses.
    #[serde(default)]
    pub parent_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Set by `send_sync`; the sender awaits a response.
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub priority: Priority,
}

/// Where a message comes from and what it operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRoute {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub resource: String,
    pub operation: Operation,
}

/// The envelope routed by the bus and framed onto the cloud link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub header: MessageHeader,
    #[serde(flatten)]
    pub router: MessageRoute,
    #[serde(default)]
    pub content: Value,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// Creates an original message with a fresh UUIDv4 id and the current timestamp.
    ///
    /// The route defaults to an empty source/group/resource and [`Operation::Query`];
    /// fill it in with the `with_*` builders.
    pub fn new() -> Self {
        Self {
            header: MessageHeader {
                id: Uuid::new_v4().to_string(),
                parent_id: String::new(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                sync: false,
                priority: Priority::default(),
            },
            router: MessageRoute {
                source: String::new(),
                group: String::new(),
                resource: String::new(),
                operation: Operation::Query,
            },
            content: Value::Null,
        }
    }

    /// Builds the response to `request`.
    ///
    /// The response gets a fresh id, `parent_id = request.id`, the request's route
    /// and priority, and `Operation::Response`.
    pub fn new_response(request: &Message, content: impl Into<Value>) -> Self {
        let mut resp = Self::new();
        resp.header.parent_id = request.header.id.clone();
        resp.header.priority = request.header.priority;
        resp.router = MessageRoute {
            source: request.router.source.clone(),
            group: request.router.group.clone(),
            resource: request.router.resource.clone(),
            operation: Operation::Response,
        };
        resp.content = content.into();
        resp
    }

    /// Sets source, group, resource and operation in one call.
    pub fn route(
        self,
        source: impl Into<String>,
        group: impl Into<String>,
        resource: impl Into<String>,
        operation: Operation,
    ) -> Self {
        self.with_source(source)
            .with_group(group)
            .with_resource(resource)
            .with_operation(operation)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.router.source = source.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.router.group = group.into();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.router.resource = resource.into();
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.router.operation = operation;
        self
    }

    pub fn with_body(mut self, content: impl Into<Value>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.header.parent_id = parent_id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn parent_id(&self) -> &str {
        &self.header.parent_id
    }

    pub fn source(&self) -> &str {
        &self.router.source
    }

    pub fn group(&self) -> &str {
        &self.router.group
    }

    pub fn resource(&self) -> &str {
        &self.router.resource
    }

    pub fn operation(&self) -> Operation {
        self.router.operation
    }

    pub fn priority(&self) -> Priority {
        self.header.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.header.priority = priority;
    }

    pub fn is_sync(&self) -> bool {
        self.header.sync
    }

    /// A message with a parent id is always a response.
    pub fn is_response(&self) -> bool {
        !self.header.parent_id.is_empty()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MessageID: {} ParentID: {} Group: {} Source: {} Resource: {} Operation: {} Priority: {}",
            self.header.id,
            self.header.parent_id,
            self.router.group,
            self.router.source,
            self.router.resource,
            self.router.operation,
            self.header.priority,
        )
    }
}
