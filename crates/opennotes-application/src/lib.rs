//! Application layer for OpenNotes-Server.
//!
//! Use-case services orchestrating the domain ports: the batch job engine,
//! chunking and embedding pipeline, hybrid search, scoring adapter,
//! previously-seen similarity lookup, bulk content scan, session registry,
//! audit emission, and the durable workflow engine.

pub mod services;
pub mod workflow;
