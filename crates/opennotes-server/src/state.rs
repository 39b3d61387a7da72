//! Shared application context.

use std::sync::Arc;

use opennotes_application::services::{
    AuditPublisher, BatchJobService, HybridSearchService, PromotionService, RechunkService,
    ScoringAdapter, SessionManager, SimilarityService,
};
use opennotes_application::workflow::WorkflowEngine;
use opennotes_domain::ports::{
    CacheProvider, CommunityServerRepository, EventBus, LockManager, RateLimiter,
    TokenBucketRepository, WorkflowRepository,
};
use opennotes_infrastructure::config::AppConfig;
use opennotes_infrastructure::crypto::JwtVerifier;

/// Everything the HTTP handlers need, passed explicitly.
///
/// One instance per process lifetime; tests construct fresh instances with
/// whatever doubles they need.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub cache: Arc<dyn CacheProvider>,
    pub locks: Arc<dyn LockManager>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub bus: Arc<dyn EventBus>,
    pub communities: Arc<dyn CommunityServerRepository>,
    pub token_bucket: Arc<dyn TokenBucketRepository>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub jobs: Arc<BatchJobService>,
    pub promotion: Arc<PromotionService>,
    pub rechunk: Arc<RechunkService>,
    pub search: Arc<HybridSearchService>,
    pub scoring: Arc<ScoringAdapter>,
    pub similarity: Arc<SimilarityService>,
    pub sessions: Arc<SessionManager>,
    pub audit: Arc<AuditPublisher>,
    pub jwt: Arc<JwtVerifier>,
    pub engine: Arc<WorkflowEngine>,
}
