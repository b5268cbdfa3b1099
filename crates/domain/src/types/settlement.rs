//! Settlement values

use std::collections::BTreeMap;

use uuid::Uuid;

use super::value::Value;
use crate::impl_wire_str_conversions;

/// Outcome reported to the broker for a locked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispositionStatus {
    Completed,
    Abandoned,
    Suspended,
    Deferred,
}

// "defered" is the broker's spelling.
impl_wire_str_conversions!(DispositionStatus {
    Completed => "completed",
    Abandoned => "abandoned",
    Suspended => "suspended",
    Deferred => "defered",
});

/// One settlement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub status: DispositionStatus,
    pub lock_token: Uuid,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_description: Option<String>,
    pub properties_to_modify: BTreeMap<String, Value>,
}

impl Disposition {
    #[must_use]
    pub fn new(status: DispositionStatus, lock_token: Uuid) -> Self {
        Self {
            status,
            lock_token,
            dead_letter_reason: None,
            dead_letter_description: None,
            properties_to_modify: BTreeMap::new(),
        }
    }
}

/// Options for dead-lettering a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadLetterOptions {
    pub reason: Option<String>,
    pub description: Option<String>,
    pub properties_to_modify: BTreeMap<String, Value>,
}
