//! Fact-check candidate administration.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Extension, Router};
use serde::Serialize;
use uuid::Uuid;

use opennotes_domain::error::Error;

use crate::error::ApiResult;
use crate::jsonapi::Document;
use crate::middleware::AuthContext;
use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new().route(
        "/fact-checks/candidates/{id}/promote",
        post(promote_candidate),
    )
}

#[derive(Debug, Serialize)]
struct PromotionAttributes {
    candidate_id: Uuid,
    promoted: bool,
}

/// Promote a scraped, human-rated candidate. Idempotent: promoting an
/// already-promoted candidate succeeds again.
async fn promote_candidate(
    State(context): State<AppContext>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Document<PromotionAttributes>> {
    if !auth.is_service_account() {
        return Err(Error::forbidden("Service account required").into());
    }
    let promoted = context.promotion.promote_candidate(id).await?;
    Ok(Document::new(
        "fact-check-promotions",
        id,
        PromotionAttributes {
            candidate_id: id,
            promoted,
        },
    ))
}
