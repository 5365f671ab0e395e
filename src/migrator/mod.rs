//! Online migration of one entity between a source and a destination store.
//!
//! Application writes go through [`DoubleWritePool`], which fans them out
//! according to the live [`Pattern`]. The [`Validator`] scans both stores and
//! publishes an [`InconsistentEvent`] per divergent row; the event
//! [`Consumer`] hands each one to a [`Fixer`]. The [`Scheduler`] is the
//! control plane tying pattern switches and validation runs together.

mod entity;
mod events;
mod fixer;
mod pattern;
mod pool;
mod scheduler;
mod store;
mod validator;

pub use entity::Entity;
pub use events::{
    BusProducer, Consumer, Delivery, EventType, InconsistentEvent, MemoryBus, MessageBus, Producer,
    Subscription,
};
pub use fixer::Fixer;
pub use pattern::{Direction, Pattern, SharedPattern};
pub use pool::{DoubleWritePool, DoubleWriteTx};
pub use scheduler::{RunKind, Scheduler, SchedulerStatus};
pub use store::{Store, StoreTx};
pub use validator::{ScanMode, Validator};
