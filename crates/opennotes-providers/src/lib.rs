//! Provider adapters for OpenNotes-Server.
//!
//! Concrete implementations of the domain ports: Redis cache, locks and
//! sliding-window rate limiting; NATS JetStream event bus with durable
//! consumers; PostgreSQL repositories over sqlx and pgvector; HTTP-backed
//! embedding, moderation and flashpoint providers.

pub mod cache;
pub mod database;
pub mod events;
pub mod llm;
