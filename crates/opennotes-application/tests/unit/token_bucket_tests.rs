//! Token-bucket pool semantics against the in-memory double.
//!
//! These mirror the production adapter's contract; the double and the
//! sqlx-backed implementation are interchangeable behind the port.

use opennotes_domain::ports::TokenBucketRepository;

use crate::fakes::InMemoryTokenBucket;

#[tokio::test]
async fn saturation_and_release() {
    let pool = InMemoryTokenBucket::new(10);

    assert!(pool.try_acquire("llm", 3, "w1").await.unwrap());
    assert!(pool.try_acquire("llm", 3, "w2").await.unwrap());
    assert!(pool.try_acquire("llm", 3, "w3").await.unwrap());
    assert_eq!(pool.held(), 9);

    // 9 + 3 > 10: refused.
    assert!(!pool.try_acquire("llm", 3, "w4").await.unwrap());

    assert!(pool.release("llm", "w1").await.unwrap());
    assert!(pool.try_acquire("llm", 3, "w4").await.unwrap());
    assert_eq!(pool.held(), 9);
}

#[tokio::test]
async fn acquire_is_idempotent_per_workflow() {
    let pool = InMemoryTokenBucket::new(5);
    assert!(pool.try_acquire("llm", 4, "w1").await.unwrap());
    // Same workflow re-acquiring does not double-count.
    assert!(pool.try_acquire("llm", 4, "w1").await.unwrap());
    assert_eq!(pool.held(), 4);
}

#[tokio::test]
async fn exact_capacity_is_granted() {
    let pool = InMemoryTokenBucket::new(10);
    assert!(pool.try_acquire("llm", 7, "w1").await.unwrap());
    assert!(pool.try_acquire("llm", 3, "w2").await.unwrap());
    assert_eq!(pool.held(), 10);
    assert!(!pool.try_acquire("llm", 1, "w3").await.unwrap());
}

#[tokio::test]
async fn release_twice_reports_no_second_row() {
    let pool = InMemoryTokenBucket::new(10);
    pool.try_acquire("llm", 2, "w1").await.unwrap();
    assert!(pool.release("llm", "w1").await.unwrap());
    assert!(!pool.release("llm", "w1").await.unwrap());
}

#[tokio::test]
async fn capacity_invariant_holds_under_concurrency() {
    use std::sync::Arc;
    let pool = Arc::new(InMemoryTokenBucket::new(10));

    let mut handles = Vec::new();
    for i in 0..50 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            pool.try_acquire("llm", 3, &format!("wf-{i}")).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(pool.held() <= 10);

    let status = pool.status("llm").await.unwrap().unwrap();
    assert_eq!(status.held + status.available, status.capacity);
}
