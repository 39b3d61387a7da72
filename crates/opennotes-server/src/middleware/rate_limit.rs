//! Sliding-window rate limiting per user or client address.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ApiError;
use crate::middleware::auth::AuthContext;
use crate::state::AppContext;
use opennotes_domain::Error;

/// Enforce the configured per-identifier limit. Authenticated requests are
/// keyed by user id, anonymous ones by client IP. Fail-open semantics live
/// in the limiter itself.
pub async fn rate_limit(
    State(context): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = request
        .extensions()
        .get::<AuthContext>()
        .and_then(|auth| auth.user.as_ref())
        .map(|user| format!("user:{}", user.user_id))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| format!("ip:{}", info.0.ip()))
        })
        .unwrap_or_else(|| "anonymous".to_owned());

    let decision = context
        .rate_limiter
        .check(
            &identifier,
            context.config.rate_limit.requests_per_window,
            Duration::from_secs(context.config.rate_limit.window_seconds),
        )
        .await;

    if !decision.allowed {
        return ApiError(Error::RateLimited {
            retry_after: decision.retry_after.unwrap_or(1),
        })
        .into_response();
    }
    next.run(request).await
}
