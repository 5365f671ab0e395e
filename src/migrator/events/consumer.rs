use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::MigratorError;
use crate::migrator::entity::Entity;
use crate::migrator::fixer::Fixer;
use crate::migrator::pattern::Direction;
use crate::migrator::store::Store;

use super::bus::{MessageBus, Subscription};
use super::InconsistentEvent;

/// Reads inconsistency events from the bus and repairs each one.
///
/// Holds one fixer per direction so it can repair either way regardless of
/// the pool's current pattern.
pub struct Consumer<T: Entity> {
    subscription: Subscription,
    topic: String,
    src_first: Arc<Fixer<T>>,
    dst_first: Arc<Fixer<T>>,
}

impl<T: Entity> Consumer<T> {
    pub fn new(
        bus: &dyn MessageBus,
        topic: &str,
        group_id: &str,
        src: Store,
        dst: Store,
    ) -> Result<Self, MigratorError> {
        let src_first = Arc::new(Fixer::new(src.clone(), dst.clone())?);
        let dst_first = Arc::new(Fixer::new(dst, src)?);
        let subscription = bus.subscribe(topic, group_id)?;

        Ok(Self {
            subscription,
            topic: topic.to_string(),
            src_first,
            dst_first,
        })
    }

    /// Consumes until `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        info!("Consuming inconsistency events from '{}'", self.topic);

        loop {
            let delivery = tokio::select! {
                _ = token.cancelled() => break,
                delivery = self.subscription.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let result = self.handle(delivery.payload()).await;
            match result {
                // Dropping the delivery acknowledges it
                Ok(()) => {}
                Err(e) => {
                    warn!(
                        "Failed to process message from '{}' (attempt {}): {}",
                        self.topic,
                        delivery.attempt() + 1,
                        e
                    );
                    delivery.nack();
                }
            }
        }

        info!("Stopped consuming from '{}'", self.topic);
    }

    /// Errors returned here leave the message unacknowledged. A failed fix is
    /// only logged: the next validation pass will find the row again.
    async fn handle(&self, payload: &[u8]) -> Result<(), MigratorError> {
        let event: InconsistentEvent = serde_json::from_slice(payload)?;

        let fixer = match event.direction.parse::<Direction>()? {
            Direction::Src => Arc::clone(&self.src_first),
            Direction::Dst => Arc::clone(&self.dst_first),
        };

        let id = event.id;
        match tokio::task::spawn_blocking(move || fixer.fix(id)).await? {
            Ok(()) => {}
            Err(e) => {
                error!(
                    "Failed to fix {} id {} ({:?}, base {}): {}",
                    T::TABLE,
                    id,
                    event.event_type,
                    event.direction,
                    e
                );
            }
        }

        Ok(())
    }
}
