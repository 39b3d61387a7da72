//! NATS JetStream event bus.

mod nats;

pub use nats::NatsEventBus;
