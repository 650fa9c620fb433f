use axum::extract::{Path, State};
use axum::response::Json;
use tracing::instrument;

use crate::api::errors::FlagError;
use crate::api::types::{FlagsRequest, FlagsResponse};
use crate::flags::flag_models::EvaluationContext;
use crate::metrics::collector::FlagMetrics;
use crate::server::AppState;

/// Batch flag evaluation for one user context.
#[instrument(skip_all)]
pub async fn flags(
    State(state): State<AppState>,
    Json(request): Json<FlagsRequest>,
) -> Result<Json<FlagsResponse>, FlagError> {
    let user_id = request
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or(FlagError::MissingUserId)?;

    let context = EvaluationContext {
        user_id,
        attributes: request.attributes,
    };

    let results = match request.flag_keys {
        Some(keys) => keys
            .into_iter()
            .map(|key| {
                let result = state.flag_manager.evaluate(&key, &context);
                (key, result)
            })
            .collect(),
        None => state.flag_manager.evaluate_all(&context),
    };

    let flags = results
        .into_iter()
        .map(|(name, result)| (name, result.into()))
        .collect();

    Ok(Json(FlagsResponse { flags }))
}

/// In-process counters for one flag.
pub async fn flag_metrics(
    State(state): State<AppState>,
    Path(flag_name): Path<String>,
) -> Json<FlagMetrics> {
    Json(state.collector.flag_metrics(&flag_name))
}

pub async fn index() -> &'static str {
    "flag engine"
}
