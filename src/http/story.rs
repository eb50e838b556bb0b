//! Story snapshot endpoint.

use crate::http::body::CompressibleJson;
use crate::http::{ApiError, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::debug;

/// Body of `POST /story/snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// A unique identifier for the story.
    pub story_id: String,
    /// A story in the platform's export format; opaque to the gateway.
    pub story: serde_json::Value,
}

/// `POST /story/snapshot` — preprocess a story.
///
/// Every configured figmentator preprocesses the snapshot concurrently; each
/// result is cached under `{suggestion_type}:{story_id}` so later figment
/// requests can use it. Returns 406 when no figmentators are installed.
pub async fn snapshot(
    State(state): State<AppState>,
    CompressibleJson(request): CompressibleJson<SnapshotRequest>,
) -> Result<StatusCode, ApiError> {
    if state.schedulers.is_empty() {
        return Err(ApiError::new(
            StatusCode::NOT_ACCEPTABLE,
            "no figmentators installed",
        ));
    }

    let mut tasks = JoinSet::new();
    for suggestion_type in state.schedulers.types() {
        let state = state.clone();
        let story = request.story.clone();
        let story_id = request.story_id.clone();
        tasks.spawn(async move {
            let key = suggestion_type.cache_key(&story_id);
            let prior = state.cache.get(&key).await?;
            let data = state
                .schedulers
                .preprocess(suggestion_type, story, prior)
                .await?;
            debug!("caching preprocessed snapshot under {key}");
            state.cache.set(&key, data).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("snapshot task failed: {e}"),
            )
        })??;
    }

    Ok(StatusCode::OK)
}
