mod bus;
mod consumer;
mod producer;

pub use bus::{Delivery, MemoryBus, MessageBus, Subscription};
pub use consumer::Consumer;
pub use producer::{BusProducer, Producer};

use serde::{Deserialize, Serialize};

use super::pattern::Direction;

/// Kind of divergence found by the validator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Present in base, absent from target.
    TargetMissing,
    /// Present in both, contents differ.
    Neq,
    /// Present in target, absent from base.
    BaseMissing,
}

/// Message published once per detected inconsistency.
///
/// `direction` names the store that was the base of the comparison and is
/// therefore authoritative for the repair. It stays a plain string on the
/// wire so a consumer can reject values it does not understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InconsistentEvent {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "Type")]
    pub event_type: EventType,
}

impl InconsistentEvent {
    pub fn new(id: i64, direction: Direction, event_type: EventType) -> Self {
        Self {
            id,
            direction: direction.as_str().to_string(),
            event_type,
        }
    }
}
