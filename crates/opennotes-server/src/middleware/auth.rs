//! Bearer-token user context and service-account detection.
//!
//! Enriches the request span with `enduser.id`, `user.username` and
//! `enduser.role` parsed from the bearer token. Invalid tokens never fail
//! the middleware; they simply leave the request anonymous, and each
//! handler decides what anonymity means for it.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Span;
use uuid::Uuid;

use crate::state::AppContext;

/// Who is making the request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub username: String,
    pub role: Option<String>,
}

impl CurrentUser {
    #[must_use]
    pub fn is_service_account(&self) -> bool {
        self.role.as_deref() == Some("service")
    }
}

/// Authentication result attached to every request.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub user: Option<CurrentUser>,
    /// Set when the caller authenticated with an internal service key.
    pub service_key: bool,
}

impl AuthContext {
    /// Service accounts come in two shapes: an internal API key, or a JWT
    /// carrying the service role.
    #[must_use]
    pub fn is_service_account(&self) -> bool {
        self.service_key || self.user.as_ref().is_some_and(CurrentUser::is_service_account)
    }
}

/// Extract the bearer token, verify it, and stash the result as a request
/// extension.
pub async fn user_context(
    State(context): State<AppContext>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut auth = AuthContext {
        service_key: request.headers().get("x-internal-auth").is_some()
            || request.headers().get("x-api-key").is_some(),
        ..Default::default()
    };

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToOwned::to_owned);

    if let Some(token) = bearer {
        match context.jwt.verify(&token).await {
            Ok(claims) => {
                let span = Span::current();
                span.record("enduser.id", claims.sub.to_string().as_str());
                span.record("user.username", claims.username.as_str());
                if let Some(role) = &claims.role {
                    span.record("enduser.role", role.as_str());
                }
                auth.user = Some(CurrentUser {
                    user_id: claims.sub,
                    username: claims.username,
                    role: claims.role,
                });
            }
            Err(e) => {
                tracing::warn!(
                    path = request.uri().path(),
                    error = %e,
                    "Token verification failed"
                );
            }
        }
    }

    request.extensions_mut().insert(auth);
    next.run(request).await
}
