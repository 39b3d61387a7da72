//! Cache-backed session registry.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use opennotes_domain::constants::SESSION_KEY_PREFIX;
use opennotes_domain::entities::SessionData;
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::CacheProvider;

/// Session create/read/refresh/revoke over the cache port.
pub struct SessionManager {
    cache: Arc<dyn CacheProvider>,
    default_ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheProvider>, default_ttl: Duration) -> Self {
        Self { cache, default_ttl }
    }

    fn session_key(session_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}:{session_id}")
    }

    fn user_sessions_key(user_id: Uuid) -> String {
        format!("{SESSION_KEY_PREFIX}:user:{user_id}:sessions")
    }

    /// Create a session: write the blob with TTL and add the id to the
    /// user's session set.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        username: &str,
        device_id: Option<String>,
        ttl: Option<Duration>,
        metadata: BTreeMap<String, String>,
    ) -> Result<SessionData> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let session_id = Uuid::new_v4().simple().to_string();
        let session = SessionData {
            session_id: session_id.clone(),
            user_id,
            username: username.to_owned(),
            device_id,
            expires_at: Utc::now()
                + ChronoDuration::seconds(ttl.as_secs().min(i64::MAX as u64) as i64),
            metadata,
        };

        let session_key = Self::session_key(&session_id);
        let user_key = Self::user_sessions_key(user_id);
        let blob = serde_json::to_string(&session)?;

        let write: Result<()> = async {
            self.cache.set(&session_key, &blob, Some(ttl)).await?;
            self.cache.sadd(&user_key, &session_id).await?;
            self.cache.expire(&user_key, ttl).await?;
            Ok(())
        }
        .await;

        if let Err(e) = write {
            // Best-effort rollback of the partial state.
            let _ = self.cache.delete(&session_key).await;
            let _ = self.cache.srem(&user_key, &session_id).await;
            return Err(Error::cache(format!(
                "Failed to create session for user {user_id}: {e}"
            )));
        }

        info!(user_id = %user_id, session_id, "Created session");
        Ok(session)
    }

    /// Read a session, deleting it on expiry (delete-on-read).
    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionData>> {
        let key = Self::session_key(session_id);
        let Some(blob) = self.cache.get(&key).await? else {
            return Ok(None);
        };

        let session: SessionData = match serde_json::from_str(&blob) {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id, error = %e, "Dropping undecodable session blob");
                let _ = self.cache.delete(&key).await;
                return Ok(None);
            }
        };

        if session.is_expired() {
            self.delete_session(session_id, session.user_id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Rewrite the blob with a fresh TTL and pushed-out expiry.
    pub async fn refresh_session(&self, session_id: &str) -> Result<Option<SessionData>> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        session.expires_at = Utc::now()
            + ChronoDuration::seconds(self.default_ttl.as_secs().min(i64::MAX as u64) as i64);
        let blob = serde_json::to_string(&session)?;
        self.cache
            .set(&Self::session_key(session_id), &blob, Some(self.default_ttl))
            .await?;
        Ok(Some(session))
    }

    /// Revoke one session.
    pub async fn delete_session(&self, session_id: &str, user_id: Uuid) -> Result<bool> {
        let existed = self.cache.delete(&Self::session_key(session_id)).await?;
        self.cache
            .srem(&Self::user_sessions_key(user_id), session_id)
            .await?;
        Ok(existed)
    }

    /// Revoke every session of a user. Returns the number revoked.
    pub async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let user_key = Self::user_sessions_key(user_id);
        let ids = self.cache.smembers(&user_key).await?;
        let mut deleted = 0u64;
        for session_id in &ids {
            if self.cache.delete(&Self::session_key(session_id)).await? {
                deleted += 1;
            }
        }
        self.cache.delete(&user_key).await?;
        info!(user_id = %user_id, deleted, "Revoked user sessions");
        Ok(deleted)
    }
}
