//! Token-bucket pool entities: a named weighted semaphore persisted in the
//! primary database so capacity spans workers and survives restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named pool with a fixed capacity.
///
/// Invariant: the sum of weights over open holds never exceeds `capacity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketPool {
    pub id: Uuid,
    pub name: String,
    pub capacity: i64,
    pub created_at: DateTime<Utc>,
}

/// A weighted hold on a pool, exclusively owned by one workflow execution.
///
/// Released on normal completion; the periodic reclaimer releases holds
/// whose owning workflow has been terminal longer than a threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHold {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub workflow_id: String,
    pub weight: i64,
    pub acquired_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl TokenHold {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.released_at.is_none()
    }
}

/// Snapshot of a pool's utilization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub name: String,
    pub capacity: i64,
    pub held: i64,
    pub available: i64,
    pub open_holds: Vec<OpenHold>,
}

/// One open hold as reported by [`PoolStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenHold {
    pub workflow_id: String,
    pub weight: i64,
    pub acquired_at: DateTime<Utc>,
}
