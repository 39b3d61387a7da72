//! Community server entity: the tenant boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The tenant unit. All domain data is scoped, directly or transitively, by
/// `community_server_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityServer {
    /// Internal id.
    pub id: Uuid,
    /// Platform discriminator, e.g. `discord`.
    pub platform: String,
    /// External snowflake on the platform.
    pub platform_community_server_id: String,
    pub name: String,
    pub is_active: bool,
    pub welcome_message: Option<String>,
    /// When enabled, bulk scans publish per-batch score events for every
    /// message rather than only flagged ones.
    pub vibecheck_debug_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
