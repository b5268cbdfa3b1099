//! Entity addressing and receive modes

use serde::{Deserialize, Serialize};

use crate::impl_wire_str_conversions;

/// A queue or a topic subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Queue(String),
    Subscription { topic: String, subscription: String },
}

/// A system sub-queue of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQueue {
    DeadLetter,
    Transfer,
}

impl_wire_str_conversions!(SubQueue {
    DeadLetter => "dead_letter",
    Transfer => "transfer",
});

impl SubQueue {
    const fn path_suffix(self) -> &'static str {
        match self {
            Self::DeadLetter => "/$DeadLetterQueue",
            Self::Transfer => "/$Transfer/$DeadLetterQueue",
        }
    }
}

impl Entity {
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue(name.into())
    }

    pub fn subscription(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self::Subscription { topic: topic.into(), subscription: subscription.into() }
    }

    /// Broker address of the entity, optionally of one of its sub-queues.
    #[must_use]
    pub fn path(&self, sub_queue: Option<SubQueue>) -> String {
        let mut path = match self {
            Self::Queue(name) => name.clone(),
            Self::Subscription { topic, subscription } => {
                format!("{topic}/Subscriptions/{subscription}")
            }
        };
        if let Some(sub_queue) = sub_queue {
            path.push_str(sub_queue.path_suffix());
        }
        path
    }
}

/// How received messages are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// Messages are locked and must be settled explicitly.
    #[default]
    PeekLock,
    /// Messages are settled by the broker on delivery.
    ReceiveAndDelete,
}

impl_wire_str_conversions!(ReceiveMode {
    PeekLock => "peek_lock",
    ReceiveAndDelete => "receive_and_delete",
});

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates entity path rendering for every sub-queue.
    ///
    /// Assertions:
    /// - Confirms a subscription renders as `topic/Subscriptions/sub`.
    /// - Confirms dead-letter and transfer suffixes are appended.
    #[test]
    fn test_entity_paths() {
        let queue = Entity::queue("orders");
        let sub = Entity::subscription("events", "audit");

        assert_eq!(queue.path(None), "orders");
        assert_eq!(sub.path(None), "events/Subscriptions/audit");
        assert_eq!(queue.path(Some(SubQueue::DeadLetter)), "orders/$DeadLetterQueue");
        assert_eq!(
            sub.path(Some(SubQueue::Transfer)),
            "events/Subscriptions/audit/$Transfer/$DeadLetterQueue"
        );
    }

    #[test]
    fn test_receive_mode_parse() {
        assert_eq!("receive_and_delete".parse::<ReceiveMode>(), Ok(ReceiveMode::ReceiveAndDelete));
        assert_eq!(ReceiveMode::default(), ReceiveMode::PeekLock);
    }
}
