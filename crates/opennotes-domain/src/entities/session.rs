//! Session registry entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A user session stored in the cache layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub user_id: Uuid,
    pub username: String,
    pub device_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl SessionData {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
