//! Embedding pipeline: caching, token gating, rate-limit backoff.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use opennotes_application::services::EmbeddingPipeline;
use opennotes_domain::error::Error;

use crate::fakes::{InMemoryCache, InMemoryTokenBucket, ScriptedEmbeddingProvider};

fn pipeline(
    provider: ScriptedEmbeddingProvider,
    capacity: i64,
) -> (
    EmbeddingPipeline,
    Arc<ScriptedEmbeddingProvider>,
    Arc<InMemoryTokenBucket>,
) {
    let provider = Arc::new(provider);
    let cache = Arc::new(InMemoryCache::new());
    let bucket = Arc::new(InMemoryTokenBucket::new(capacity));
    (
        EmbeddingPipeline::new(provider.clone(), cache, bucket.clone()),
        provider,
        bucket,
    )
}

#[tokio::test]
async fn second_call_hits_the_cache() {
    let (pipeline, provider, bucket) = pipeline(ScriptedEmbeddingProvider::succeeding(), 10);

    let first = pipeline.embed("the claim", "wf-1").await.unwrap();
    let second = pipeline.embed("the claim", "wf-2").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    // Tokens were released after the provider call.
    assert_eq!(bucket.held(), 0);
}

#[tokio::test]
async fn tokens_are_released_on_provider_failure() {
    let (pipeline, _, bucket) = pipeline(
        ScriptedEmbeddingProvider::failing_with(vec![Error::embedding("bad input")]),
        10,
    );
    assert!(pipeline.embed("text", "wf-1").await.is_err());
    assert_eq!(bucket.held(), 0);
}

#[tokio::test]
async fn provider_rate_limit_retries_then_succeeds() {
    let (pipeline, provider, bucket) = pipeline(
        ScriptedEmbeddingProvider::failing_with(vec![Error::ProviderRateLimited {
            message: "429".to_owned(),
        }]),
        10,
    );

    let embedding = pipeline.embed("text", "wf-1").await.unwrap();
    assert_eq!(embedding.len(), 4);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(bucket.held(), 0);
}

#[tokio::test]
async fn distinct_texts_are_cached_separately() {
    let (pipeline, provider, _) = pipeline(ScriptedEmbeddingProvider::succeeding(), 10);
    pipeline.embed("one", "wf-1").await.unwrap();
    pipeline.embed("two", "wf-1").await.unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}
