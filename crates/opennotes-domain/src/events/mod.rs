//! Domain events published on the durable bus.

mod domain_events;

pub use domain_events::{
    BulkScanMessage, DomainEvent, EventEnvelope, FlaggedMessage, MessageScores,
};
