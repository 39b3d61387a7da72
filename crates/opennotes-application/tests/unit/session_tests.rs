//! Session registry behavior.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use opennotes_application::services::SessionManager;

use crate::fakes::InMemoryCache;

fn manager() -> (SessionManager, Arc<InMemoryCache>) {
    let cache = Arc::new(InMemoryCache::new());
    (
        SessionManager::new(cache.clone(), Duration::from_secs(3600)),
        cache,
    )
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let (manager, _) = manager();
    let user_id = Uuid::now_v7();
    let session = manager
        .create_session(user_id, "alice", Some("laptop".to_owned()), None, BTreeMap::new())
        .await
        .unwrap();

    let loaded = manager.get_session(&session.session_id).await.unwrap().unwrap();
    assert_eq!(loaded, session);
}

#[tokio::test]
async fn creation_registers_in_the_user_set() {
    let (manager, cache) = manager();
    let user_id = Uuid::now_v7();
    let session = manager
        .create_session(user_id, "alice", None, None, BTreeMap::new())
        .await
        .unwrap();

    let set_key = format!("session:user:{user_id}:sessions");
    let members = cache.sets.lock().unwrap().get(&set_key).cloned().unwrap();
    assert!(members.contains(&session.session_id));
}

#[tokio::test]
async fn expired_session_is_deleted_on_read() {
    let (manager, _) = manager();
    let user_id = Uuid::now_v7();
    // A zero TTL expires immediately.
    let session = manager
        .create_session(user_id, "alice", None, Some(Duration::ZERO), BTreeMap::new())
        .await
        .unwrap();

    assert!(manager.get_session(&session.session_id).await.unwrap().is_none());
    // Second read still finds nothing (the blob is gone, not just expired).
    assert!(manager.get_session(&session.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_pushes_expiry_out() {
    let (manager, _) = manager();
    let user_id = Uuid::now_v7();
    let session = manager
        .create_session(user_id, "alice", None, None, BTreeMap::new())
        .await
        .unwrap();

    let refreshed = manager
        .refresh_session(&session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.expires_at >= session.expires_at);
}

#[tokio::test]
async fn revoking_the_user_clears_every_session() {
    let (manager, _) = manager();
    let user_id = Uuid::now_v7();
    let a = manager
        .create_session(user_id, "alice", None, None, BTreeMap::new())
        .await
        .unwrap();
    let b = manager
        .create_session(user_id, "alice", None, None, BTreeMap::new())
        .await
        .unwrap();

    let deleted = manager.delete_user_sessions(user_id).await.unwrap();
    assert_eq!(deleted, 2);
    assert!(manager.get_session(&a.session_id).await.unwrap().is_none());
    assert!(manager.get_session(&b.session_id).await.unwrap().is_none());
}
