//! Port traits implemented by the provider and infrastructure layers.
//!
//! Services depend on these contracts, never on concrete adapters; test
//! doubles implementing a port are interchangeable with the production one.

pub mod cache;
pub mod events;
pub mod providers;
pub mod repositories;

pub use cache::{CacheProvider, CacheSubscriptionHandler, LockManager, RateLimiter};
pub use events::{EventBus, EventHandler, SubscriptionHealth};
pub use providers::{
    EmbeddingProvider, FlashpointDetector, FlashpointVerdict, ModerationProvider,
    ModerationVerdict, NoteScorer, ScoringDataProvider,
};
pub use repositories::{
    AuditRepository, BatchJobRepository, ChunkRepository, CommunityServerRepository,
    FactCheckRepository, NoteRepository, PreviouslySeenRepository, TokenBucketRepository,
    WorkflowRepository,
};
