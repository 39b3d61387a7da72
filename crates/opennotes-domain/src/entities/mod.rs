//! Domain entities.

pub mod audit;
pub mod batch_job;
pub mod chunk;
pub mod community;
pub mod fact_check;
pub mod note;
pub mod previously_seen;
pub mod session;
pub mod token_bucket;
pub mod workflow;

pub use audit::AuditRecord;
pub use batch_job::{BatchJob, JobProgress, JobStatus};
pub use chunk::{Chunk, ChunkLink, ChunkSourceKind, chunk_text_hash};
pub use community::CommunityServer;
pub use fact_check::{CandidateStatus, FactCheckCandidate, FactCheckItem};
pub use note::{Note, Rating, Request, RequestStatus};
pub use previously_seen::{PreviouslySeenMatch, PreviouslySeenMessage};
pub use session::SessionData;
pub use token_bucket::{OpenHold, PoolStatus, TokenBucketPool, TokenHold};
pub use workflow::{WorkflowExecution, WorkflowStatus};
