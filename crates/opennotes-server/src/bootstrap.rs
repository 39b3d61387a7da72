//! Application assembly: wire providers into services, register workflows
//! and maintenance jobs, and start the transport.

use futures::future::BoxFuture;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use opennotes_application::services::{
    AuditPublisher, AuditPublisherConfig, BatchJobService, BulkScanConfig, BulkScanService,
    ChunkerConfig, EmbeddingPipeline, HybridSearchService, ProgressTracker, PromotionService,
    RechunkService, ScoringAdapter, SentenceWindowChunker, SessionManager, SimilarityService,
};
use opennotes_application::services::scoring::BatchScoringTrigger;
use opennotes_application::workflow::{Workflow, WorkflowContext, WorkflowEngine};
use opennotes_domain::entities::ChunkSourceKind;
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::{
    ChunkRepository, EventBus, ModerationProvider, NoteRepository, TokenBucketRepository,
};
use opennotes_infrastructure::circuit_breaker::CircuitBreakerRegistry;
use opennotes_infrastructure::config::AppConfig;
use opennotes_infrastructure::crypto::JwtVerifier;
use opennotes_infrastructure::scheduler::{Scheduler, register_maintenance_jobs};
use opennotes_providers::cache::{RechunkLockManager, RedisCacheProvider, SlidingWindowRateLimiter};
use opennotes_providers::database::{
    PgAuditRepository, PgBatchJobRepository, PgChunkRepository, PgCommunityServerRepository,
    PgFactCheckRepository, PgNoteRepository, PgPreviouslySeenRepository, PgScoringDataProvider,
    PgTokenBucketRepository, PgWorkflowRepository, connect_pool,
};
use opennotes_providers::events::NatsEventBus;
use opennotes_providers::llm::{
    HttpEmbeddingProvider, HttpModerationProvider, global_flashpoint_detector,
};

use crate::state::AppContext;

/// Durable workflow executing one rechunk batch job.
struct RechunkWorkflow {
    name: String,
    kind: ChunkSourceKind,
    rechunk: Arc<RechunkService>,
}

#[async_trait::async_trait]
impl Workflow for RechunkWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkflowContext, input: Option<Value>) -> Result<Value> {
        let job_id: Uuid = input
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::internal("Rechunk workflow requires a job id input"))?;
        let rechunk = Arc::clone(&self.rechunk);
        let kind = self.kind;
        ctx.step(
            "run_rechunk_job",
            opennotes_application::workflow::RetryPolicy::none(),
            move || {
                let rechunk = Arc::clone(&rechunk);
                Box::pin(async move {
                    rechunk.run_job(job_id, kind).await?;
                    Ok(Value::String("completed".to_owned()))
                })
            },
        )
        .await
    }
}

/// Durable workflow scoring a whole community and writing scores back.
struct ScoreCommunityWorkflow {
    scoring: Arc<ScoringAdapter>,
    notes: Arc<dyn NoteRepository>,
}

#[async_trait::async_trait]
impl Workflow for ScoreCommunityWorkflow {
    fn name(&self) -> &str {
        "score_community"
    }

    async fn run(&self, ctx: &WorkflowContext, input: Option<Value>) -> Result<Value> {
        let community_id: Uuid = input
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::internal("Scoring workflow requires a community id input"))?;

        let scoring = Arc::clone(&self.scoring);
        let outcome = ctx
            .step(
                "score_community",
                opennotes_application::workflow::RetryPolicy::default(),
                move || {
                    let scoring = Arc::clone(&scoring);
                    Box::pin(async move {
                        let outcome = scoring.score_community(community_id).await?;
                        Ok(serde_json::to_value(outcome)?)
                    })
                },
            )
            .await?;

        let notes = Arc::clone(&self.notes);
        let write_back = outcome.clone();
        ctx.step(
            "write_back_scores",
            opennotes_application::workflow::RetryPolicy::default(),
            move || {
                let notes = Arc::clone(&notes);
                let outcome = write_back.clone();
                Box::pin(async move {
                    let outcome: opennotes_domain::value_objects::ScoringOutcome =
                        serde_json::from_value(outcome)?;
                    for scored in &outcome.scores {
                        notes.set_helpfulness_score(scored.note_id, scored.score).await?;
                    }
                    Ok(Value::from(outcome.scores.len() as u64))
                })
            },
        )
        .await
    }
}

/// Wire the full application and return the context plus the scheduler
/// shutdown token.
pub async fn build(config: AppConfig) -> anyhow::Result<(AppContext, CancellationToken)> {
    let config = Arc::new(config);

    // --- Providers ---
    let pool = connect_pool(&config.database_url, 16).await?;
    sqlx::migrate!("../opennotes-providers/migrations")
        .run(&pool)
        .await?;

    let cache = Arc::new(RedisCacheProvider::connect(&config.redis_url).await?);
    let redis_manager = match redis::Client::open(config.redis_url.as_str()) {
        Ok(client) => client.get_connection_manager().await.ok(),
        Err(_) => None,
    };
    if redis_manager.is_none() {
        warn!("Redis unavailable for locks and rate limiting, degrading permissively");
    }
    let locks = Arc::new(RechunkLockManager::new(redis_manager.clone()));
    let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(redis_manager));
    let bus = Arc::new(NatsEventBus::connect(&config.nats_url).await?);

    let batch_jobs_repo = Arc::new(PgBatchJobRepository::new(pool.clone()));
    let chunks_repo: Arc<dyn ChunkRepository> = Arc::new(PgChunkRepository::new(pool.clone()));
    let fact_checks_repo = Arc::new(PgFactCheckRepository::new(pool.clone()));
    let previously_seen_repo = Arc::new(PgPreviouslySeenRepository::new(pool.clone()));
    let communities_repo = Arc::new(PgCommunityServerRepository::new(pool.clone()));
    let notes_repo: Arc<dyn NoteRepository> = Arc::new(PgNoteRepository::new(pool.clone()));
    let token_bucket = Arc::new(PgTokenBucketRepository::new(pool.clone()));
    let workflows_repo = Arc::new(PgWorkflowRepository::new(pool.clone()));
    let audit_repo = Arc::new(PgAuditRepository::new(pool.clone()));
    let scoring_data = Arc::new(PgScoringDataProvider::new(pool.clone()));

    token_bucket
        .ensure_pool(&config.token_pool.name, config.token_pool.capacity)
        .await?;

    // --- Services ---
    let tracker = Arc::new(ProgressTracker::new(cache.clone()));
    let jobs = Arc::new(BatchJobService::new(batch_jobs_repo.clone(), tracker));
    let promotion = Arc::new(PromotionService::new(fact_checks_repo.clone()));
    let chunker = SentenceWindowChunker::new(ChunkerConfig::default());
    let rechunk = Arc::new(RechunkService::new(
        jobs.clone(),
        chunks_repo.clone(),
        fact_checks_repo.clone(),
        previously_seen_repo.clone(),
        locks.clone(),
        chunker,
    ));

    let breakers = CircuitBreakerRegistry::new();
    let embedding_breaker = breakers.register(
        "embedding",
        config.circuit_breaker.failure_threshold,
        Duration::from_secs(config.circuit_breaker.timeout),
    );
    let embedding_provider = Arc::new(HttpEmbeddingProvider::new(
        &config.embedding,
        embedding_breaker,
    )?);
    let embeddings = Arc::new(EmbeddingPipeline::new(
        embedding_provider,
        cache.clone(),
        token_bucket.clone(),
    ));
    let search = Arc::new(HybridSearchService::new(
        chunks_repo.clone(),
        cache.clone(),
        embeddings.clone(),
    ));
    let similarity = Arc::new(SimilarityService::new(
        chunks_repo.clone(),
        previously_seen_repo.clone(),
        embeddings.clone(),
    ));
    let scoring = Arc::new(ScoringAdapter::new(
        scoring_data,
        Vec::new(),
        bus.clone(),
        BatchScoringTrigger::default(),
    ));
    let sessions = Arc::new(SessionManager::new(
        cache.clone(),
        Duration::from_secs(config.auth.session_ttl),
    ));
    let audit = Arc::new(AuditPublisher::new(
        audit_repo,
        bus.clone(),
        AuditPublisherConfig::default(),
    ));
    let jwt = Arc::new(JwtVerifier::new(
        &config.auth.jwt_secret_key,
        &config.auth.jwt_algorithm,
        config.auth.max_token_age_seconds,
        cache.clone(),
    )?);

    // --- Workflow engine ---
    let engine = Arc::new(WorkflowEngine::new(workflows_repo.clone()));
    engine.register_queue("rechunk", 2);
    engine.register_queue("scoring", 2);
    engine.register_workflow(Arc::new(RechunkWorkflow {
        name: RechunkService::job_type(ChunkSourceKind::FactCheck),
        kind: ChunkSourceKind::FactCheck,
        rechunk: rechunk.clone(),
    }));
    engine.register_workflow(Arc::new(RechunkWorkflow {
        name: RechunkService::job_type(ChunkSourceKind::PreviouslySeen),
        kind: ChunkSourceKind::PreviouslySeen,
        rechunk: rechunk.clone(),
    }));
    engine.register_workflow(Arc::new(ScoreCommunityWorkflow {
        scoring: scoring.clone(),
        notes: notes_repo,
    }));
    engine.on_final_failure(
        "score_community",
        Arc::new(|workflow_id, error| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                error!(workflow_id, error, "Scoring workflow exhausted retries");
            })
        }),
    );
    engine.resume_queue("rechunk", 50).await?;
    engine.resume_queue("scoring", 50).await?;

    // --- Bulk scan consumer ---
    let artifact_path = std::env::var("FLASHPOINT_ARTIFACT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/flashpoints/optimized_detector.json"));
    let flashpoints = global_flashpoint_detector(
        &config.embedding.api_base,
        &config.embedding.api_key,
        "gpt-4o-mini",
        Some(&artifact_path),
    )?;
    let moderation: Arc<dyn ModerationProvider> = Arc::new(HttpModerationProvider::new(
        &config.embedding.api_base,
        &config.embedding.api_key,
        Duration::from_secs(config.embedding.timeout_seconds.max(1)),
    )?);
    let bulk_scan = Arc::new(BulkScanService::new(
        bus.clone(),
        communities_repo.clone(),
        Some(moderation),
        flashpoints,
        search.clone(),
        BulkScanConfig::default(),
    ));
    bus.subscribe_durable(
        "bulk-scan-processor",
        "OPENNOTES.bulk_scan.message_batch",
        bulk_scan,
    )
    .await?;

    // --- Scheduler ---
    let shutdown = CancellationToken::new();
    if config.scheduler.enabled {
        let mut scheduler = Scheduler::new();
        register_maintenance_jobs(
            &mut scheduler,
            &config.scheduler,
            jobs.clone(),
            token_bucket.clone(),
        )?;

        // Embedding backfill: sweep chunks missing embeddings.
        let backfill_chunks = chunks_repo.clone();
        let backfill_embeddings = embeddings.clone();
        scheduler.register(
            "backfill_chunk_embeddings",
            "0 */5 * * * *",
            Arc::new(move || {
                let chunks = Arc::clone(&backfill_chunks);
                let embeddings = Arc::clone(&backfill_embeddings);
                Box::pin(async move {
                    if let Err(e) = backfill_embeddings_once(&chunks, &embeddings).await {
                        error!(error = %e, "Embedding backfill failed");
                    }
                })
            }),
        )?;

        // Subscription health: detect deleted consumers and re-subscribe.
        let health_bus = bus.clone();
        let heartbeat = config.health_check.heartbeat_interval.max(5);
        scheduler.register(
            "event_bus_health_check",
            &format!("*/{} * * * * *", heartbeat.min(59)),
            Arc::new(move || {
                let bus = Arc::clone(&health_bus);
                Box::pin(async move {
                    if let Err(e) = bus.check_subscription_health().await {
                        warn!(error = %e, "Subscription health check failed");
                    }
                })
            }),
        )?;

        scheduler.start(shutdown.clone());
        info!("Scheduler started");
    }

    let context = AppContext {
        config,
        cache,
        locks,
        rate_limiter,
        bus,
        communities: communities_repo,
        token_bucket,
        workflows: workflows_repo,
        jobs,
        promotion,
        rechunk,
        search,
        scoring,
        similarity,
        sessions,
        audit,
        jwt,
        engine,
    };
    Ok((context, shutdown))
}

/// Embed one batch of chunks that are still missing embeddings.
async fn backfill_embeddings_once(
    chunks: &Arc<dyn ChunkRepository>,
    embeddings: &Arc<EmbeddingPipeline>,
) -> Result<()> {
    let missing = chunks.find_missing_embeddings(32).await?;
    if missing.is_empty() {
        return Ok(());
    }
    let workflow_id = format!("backfill:{}", Uuid::now_v7());
    for chunk in missing {
        let embedding = embeddings.embed(&chunk.chunk_text, &workflow_id).await?;
        chunks
            .set_embedding(
                chunk.id,
                &embedding,
                embeddings.provider_name(),
                embeddings.model_name(),
            )
            .await?;
    }
    Ok(())
}
