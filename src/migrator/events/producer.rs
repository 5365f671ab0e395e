use std::sync::Arc;

use crate::error::MigratorError;

use super::bus::MessageBus;
use super::InconsistentEvent;

pub trait Producer: Send + Sync {
    fn produce_inconsistent_event(&self, event: &InconsistentEvent) -> Result<(), MigratorError>;
}

/// Publishes events as JSON on a single topic. No key: repairs of different
/// ids are independent.
pub struct BusProducer {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl BusProducer {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }
}

impl Producer for BusProducer {
    fn produce_inconsistent_event(&self, event: &InconsistentEvent) -> Result<(), MigratorError> {
        let payload = serde_json::to_vec(event)?;
        self.bus.publish(&self.topic, payload)
    }
}
