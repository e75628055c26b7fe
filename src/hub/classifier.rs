//! Uplink priority classification.
//!
//! Rules are evaluated top to bottom, first match wins:
//!
//! | Condition | Class |
//! |---|---|
//! | response (`parent_id` set) | request's class, unchanged |
//! | `keepalive` | `Urgent` |
//! | `delete` | `Important` |
//! | source `eventbus` | `Important` |
//! | source `metamanager` | `Normal` |
//! | `upload` | `Low` |
//! | anything else | `Normal` |

use crate::modules::{EVENTBUS_SOURCE, METAMANAGER_SOURCE};
use beehive::{Message, Operation, Priority};

/// Returns the class `msg` should be queued with.
pub fn classify(msg: &Message) -> Priority {
    if msg.is_response() {
        return msg.priority();
    }
    match msg.operation() {
        Operation::Keepalive => return Priority::Urgent,
        Operation::Delete => return Priority::Important,
        _ => {}
    }
    match msg.source() {
        EVENTBUS_SOURCE => Priority::Important,
        METAMANAGER_SOURCE => Priority::Normal,
        _ if msg.operation() == Operation::Upload => Priority::Low,
        _ => Priority::Normal,
    }
}

/// Stamps `msg` with its class.
pub fn stamp(mut msg: Message) -> Message {
    let priority = classify(&msg);
    msg.set_priority(priority);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(source: &str, op: Operation) -> Message {
        Message::new().route(source, "meta", "default/pod/p1", op)
    }

    #[test]
    fn keepalive_is_urgent() {
        let ping = Message::new()
            .route("hub", "resource", "node", Operation::Keepalive)
            .with_body("ping");
        assert_eq!(classify(&ping), Priority::Urgent);
    }

    #[test]
    fn deletes_and_eventbus_are_important() {
        assert_eq!(classify(&msg("edged", Operation::Delete)), Priority::Important);
        assert_eq!(classify(&msg("eventbus", Operation::Publish)), Priority::Important);
    }

    #[test]
    fn metamanager_and_default_are_normal() {
        assert_eq!(classify(&msg("metamanager", Operation::Update)), Priority::Normal);
        assert_eq!(classify(&msg("edged", Operation::Update)), Priority::Normal);
        assert_eq!(classify(&msg("metamanager", Operation::Upload)), Priority::Normal);
    }

    #[test]
    fn uploads_are_low() {
        assert_eq!(classify(&msg("edged", Operation::Upload)), Priority::Low);
    }

    #[test]
    fn responses_keep_request_class() {
        let mut req = msg("cloud", Operation::Query);
        req.set_priority(Priority::Emergency);
        let resp = Message::new_response(&req, "ok").with_operation(Operation::Delete);
        assert_eq!(classify(&resp), Priority::Emergency);

        let stamped = stamp(Message::new_response(&req, "ok"));
        assert_eq!(stamped.priority(), Priority::Emergency);
    }
}
