//! Use-case services.

pub mod audit;
pub mod batch_jobs;
pub mod bulk_scan;
pub mod chunking;
pub mod embedding;
pub mod progress;
pub mod promotion;
pub mod rechunk;
pub mod scoring;
pub mod search;
pub mod session;
pub mod similarity;

pub use audit::{AuditPublisher, AuditPublisherConfig, AuditStats, truncate_body};
pub use batch_jobs::BatchJobService;
pub use bulk_scan::{BulkScanConfig, BulkScanService};
pub use chunking::{ChunkerConfig, SentenceWindowChunker};
pub use embedding::EmbeddingPipeline;
pub use progress::ProgressTracker;
pub use promotion::PromotionService;
pub use rechunk::RechunkService;
pub use scoring::{BatchScoringTrigger, ScoringAdapter, TriggerStatus};
pub use search::HybridSearchService;
pub use session::SessionManager;
pub use similarity::SimilarityService;
