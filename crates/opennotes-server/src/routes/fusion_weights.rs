//! Fusion weight (alpha) administration.

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use opennotes_domain::error::Error;
use opennotes_domain::value_objects::FusionAlpha;

use crate::error::ApiResult;
use crate::jsonapi::Document;
use crate::middleware::AuthContext;
use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/admin/fusion-weights", put(set_alpha).get(get_all_alphas))
        .route(
            "/admin/fusion-weights/{dataset}",
            get(get_dataset_alpha).delete(delete_dataset_alpha),
        )
}

#[derive(Debug, Deserialize)]
struct SetAlphaRequest {
    alpha: f64,
    /// Absent updates the global default.
    dataset: Option<String>,
}

#[derive(Debug, Serialize)]
struct AlphaAttributes {
    alpha: f64,
    dataset: Option<String>,
}

#[derive(Debug, Serialize)]
struct AllAlphasAttributes {
    default_alpha: f64,
    dataset_overrides: HashMap<String, f64>,
}

fn require_service_account(auth: &AuthContext) -> ApiResult<()> {
    if auth.is_service_account() {
        Ok(())
    } else {
        Err(Error::forbidden("Service account required").into())
    }
}

/// Only service accounts may write weights; α outside [0, 1] is a 400.
async fn set_alpha(
    State(context): State<AppContext>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<SetAlphaRequest>,
) -> ApiResult<Document<AlphaAttributes>> {
    require_service_account(&auth)?;
    let alpha = FusionAlpha::new(body.alpha)?;
    context
        .search
        .set_alpha(alpha, body.dataset.as_deref())
        .await?;
    Ok(Document::new(
        "fusion-weights",
        body.dataset.clone().unwrap_or_else(|| "default".to_owned()),
        AlphaAttributes {
            alpha: alpha.value(),
            dataset: body.dataset,
        },
    ))
}

async fn get_all_alphas(
    State(context): State<AppContext>,
) -> ApiResult<Document<AllAlphasAttributes>> {
    let (default_alpha, dataset_overrides) = context.search.get_all_alphas().await?;
    Ok(Document::new(
        "fusion-weights",
        "all",
        AllAlphasAttributes {
            default_alpha,
            dataset_overrides,
        },
    ))
}

async fn get_dataset_alpha(
    State(context): State<AppContext>,
    Path(dataset): Path<String>,
) -> ApiResult<Document<AlphaAttributes>> {
    let alpha = context.search.resolve_alpha(Some(&dataset)).await;
    Ok(Document::new(
        "fusion-weights",
        dataset.clone(),
        AlphaAttributes {
            alpha: alpha.value(),
            dataset: Some(dataset),
        },
    ))
}

/// Removing an override reverts the dataset to the default weight.
async fn delete_dataset_alpha(
    State(context): State<AppContext>,
    Extension(auth): Extension<AuthContext>,
    Path(dataset): Path<String>,
) -> ApiResult<Document<AlphaAttributes>> {
    require_service_account(&auth)?;
    let existed = context.search.delete_alpha(&dataset).await?;
    if !existed {
        return Err(Error::not_found(format!("fusion weight override for {dataset}")).into());
    }
    let alpha = context.search.resolve_alpha(None).await;
    Ok(Document::new(
        "fusion-weights",
        dataset,
        AlphaAttributes {
            alpha: alpha.value(),
            dataset: None,
        },
    ))
}
