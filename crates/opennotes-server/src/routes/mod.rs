//! HTTP routers.

pub mod batch_jobs;
pub mod community_servers;
pub mod fact_checks;
pub mod fusion_weights;
pub mod health;
pub mod rechunk;
pub mod scoring;
pub mod similarity;

use axum::Router;
use axum::middleware::from_fn_with_state;

use crate::middleware::{audit, auth, rate_limit};
use crate::state::AppContext;

/// Assemble the full API under `/api/v1` with the middleware stack.
#[must_use]
pub fn api_router(context: AppContext) -> Router {
    let api = Router::new()
        .merge(batch_jobs::router())
        .merge(community_servers::router())
        .merge(fact_checks::router())
        .merge(fusion_weights::router())
        .merge(rechunk::router())
        .merge(scoring::router())
        .merge(similarity::router())
        // Outermost first at request time: auth → rate limit → audit.
        .layer(from_fn_with_state(context.clone(), audit::audit))
        .layer(from_fn_with_state(context.clone(), rate_limit::rate_limit))
        .layer(from_fn_with_state(context.clone(), auth::user_context));

    Router::new()
        .merge(health::router())
        .nest("/api/v1", api)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(context)
}
