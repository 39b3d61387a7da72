//! Alpha resolution and self-healing.

use std::sync::Arc;

use opennotes_application::services::{EmbeddingPipeline, HybridSearchService};
use opennotes_domain::constants::{DATASET_ALPHA_KEY_PREFIX, DEFAULT_ALPHA_KEY};
use opennotes_domain::value_objects::FusionAlpha;

use crate::fakes::{EmptyChunks, InMemoryCache, InMemoryTokenBucket, ScriptedEmbeddingProvider};

fn search_service() -> (Arc<HybridSearchService>, Arc<InMemoryCache>) {
    let cache = Arc::new(InMemoryCache::new());
    let embeddings = Arc::new(EmbeddingPipeline::new(
        Arc::new(ScriptedEmbeddingProvider::succeeding()),
        cache.clone(),
        Arc::new(InMemoryTokenBucket::new(10)),
    ));
    (
        Arc::new(HybridSearchService::new(
            Arc::new(EmptyChunks),
            cache.clone(),
            embeddings,
        )),
        cache,
    )
}

#[tokio::test]
async fn cache_miss_self_heals_to_fallback() {
    let (search, cache) = search_service();
    let alpha = search.resolve_alpha(None).await;
    assert_eq!(alpha.value(), 0.7);
    // The fallback was written back so the next read is cached.
    let healed = cache.kv.lock().unwrap().get(DEFAULT_ALPHA_KEY).cloned();
    assert_eq!(healed.as_deref(), Some("0.7"));
}

#[tokio::test]
async fn dataset_override_takes_priority() {
    let (search, _) = search_service();
    search
        .set_alpha(FusionAlpha::new(0.9).unwrap(), Some("snopes"))
        .await
        .unwrap();
    search
        .set_alpha(FusionAlpha::new(0.4).unwrap(), None)
        .await
        .unwrap();

    assert_eq!(search.resolve_alpha(Some("snopes")).await.value(), 0.9);
    assert_eq!(search.resolve_alpha(Some("politifact")).await.value(), 0.4);
    assert_eq!(search.resolve_alpha(None).await.value(), 0.4);
}

#[tokio::test]
async fn deleting_an_override_reverts_to_default() {
    let (search, _) = search_service();
    search
        .set_alpha(FusionAlpha::new(0.9).unwrap(), Some("snopes"))
        .await
        .unwrap();
    assert!(search.delete_alpha("snopes").await.unwrap());
    assert!(!search.delete_alpha("snopes").await.unwrap());
    assert_eq!(search.resolve_alpha(Some("snopes")).await.value(), 0.7);
}

#[tokio::test]
async fn invalid_cached_value_restores_fallback() {
    let (search, cache) = search_service();
    let key = format!("{DATASET_ALPHA_KEY_PREFIX}snopes");
    cache
        .kv
        .lock()
        .unwrap()
        .insert(key.clone(), "not-a-number".to_owned());

    let alpha = search.resolve_alpha(Some("snopes")).await;
    assert_eq!(alpha.value(), 0.7);
    let healed = cache.kv.lock().unwrap().get(&key).cloned();
    assert_eq!(healed.as_deref(), Some("0.7"));
}

#[tokio::test]
async fn out_of_range_cached_value_restores_fallback() {
    let (search, cache) = search_service();
    cache
        .kv
        .lock()
        .unwrap()
        .insert(DEFAULT_ALPHA_KEY.to_owned(), "1.5".to_owned());
    assert_eq!(search.resolve_alpha(None).await.value(), 0.7);
}

#[tokio::test]
async fn broken_cache_falls_back_without_writing() {
    let (search, cache) = search_service();
    cache.break_backend();
    assert_eq!(search.resolve_alpha(Some("snopes")).await.value(), 0.7);
}

#[tokio::test]
async fn get_all_alphas_lists_overrides() {
    let (search, _) = search_service();
    search
        .set_alpha(FusionAlpha::new(0.9).unwrap(), Some("snopes"))
        .await
        .unwrap();
    let (default, overrides) = search.get_all_alphas().await.unwrap();
    assert_eq!(default, 0.7);
    assert_eq!(overrides.get("snopes"), Some(&0.9));
}
