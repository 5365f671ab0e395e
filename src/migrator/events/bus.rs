use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::MigratorError;

/// Minimal publish/subscribe surface the migrator needs from a message bus.
///
/// Delivery is at least once: a message that is not acknowledged comes back.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MigratorError>;

    /// Joins `group_id` on `topic`. Each group receives every message once.
    fn subscribe(&self, topic: &str, group_id: &str) -> Result<Subscription, MigratorError>;
}

#[derive(Debug)]
struct Envelope {
    payload: Vec<u8>,
    attempt: u32,
}

/// Receiving end of one consumer group.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
    requeue: mpsc::UnboundedSender<Envelope>,
    max_redeliveries: u32,
}

impl Subscription {
    /// Waits for the next message of this group.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let envelope = self.rx.recv().await?;
        Some(Delivery {
            envelope,
            requeue: self.requeue.clone(),
            max_redeliveries: self.max_redeliveries,
        })
    }
}

/// One received message. Dropping it acknowledges it; `nack` hands it back
/// for redelivery.
pub struct Delivery {
    envelope: Envelope,
    requeue: mpsc::UnboundedSender<Envelope>,
    max_redeliveries: u32,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    pub fn attempt(&self) -> u32 {
        self.envelope.attempt
    }

    pub fn nack(self) {
        let Delivery {
            mut envelope,
            requeue,
            max_redeliveries,
        } = self;

        if envelope.attempt >= max_redeliveries {
            warn!(
                "Dropping message after {} delivery attempts: {}",
                envelope.attempt + 1,
                String::from_utf8_lossy(&envelope.payload)
            );
            return;
        }

        envelope.attempt += 1;
        if requeue.send(envelope).is_err() {
            debug!("Subscription closed before a nacked message could be requeued");
        }
    }
}

/// In-process bus with one queue per (topic, consumer group).
pub struct MemoryBus {
    groups: Mutex<HashMap<String, HashMap<String, mpsc::UnboundedSender<Envelope>>>>,
    max_redeliveries: u32,
}

impl MemoryBus {
    pub fn new(max_redeliveries: u32) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            max_redeliveries,
        }
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MigratorError> {
        let mut topics = self.groups.lock().map_err(|_| MigratorError::LockPoisoned)?;

        let Some(groups) = topics.get_mut(topic) else {
            debug!("No consumer group on topic '{}', message dropped", topic);
            return Ok(());
        };

        // Forget groups whose subscription has been dropped
        groups.retain(|_, tx| !tx.is_closed());

        for tx in groups.values() {
            let _ = tx.send(Envelope {
                payload: payload.clone(),
                attempt: 0,
            });
        }

        Ok(())
    }

    fn subscribe(&self, topic: &str, group_id: &str) -> Result<Subscription, MigratorError> {
        let mut topics = self.groups.lock().map_err(|_| MigratorError::LockPoisoned)?;
        let groups = topics.entry(topic.to_string()).or_default();

        if groups.get(group_id).is_some_and(|tx| !tx.is_closed()) {
            return Err(MigratorError::Error(format!(
                "Consumer group '{}' is already subscribed to '{}'",
                group_id, topic
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        groups.insert(group_id.to_string(), tx.clone());

        Ok(Subscription {
            rx,
            requeue: tx,
            max_redeliveries: self.max_redeliveries,
        })
    }
}
