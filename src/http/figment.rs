//! Figment generation endpoint.

use crate::error::FigmentError;
use crate::http::body::CompressibleJson;
use crate::http::{ApiError, AppState};
use crate::models::figment::{FigmentContext, FigmentStatus};
use crate::models::range::Range;
use crate::models::story::SceneEntry;
use crate::models::suggestion::SuggestionType;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

/// Query parameters of `POST /figment/{story_id}/new`.
#[derive(Debug, Deserialize)]
pub struct NewFigmentParams {
    /// The suggestion type to generate.
    pub suggestion_type: String,
}

/// `POST /figment/{story_id}/new` — create a new figment.
///
/// Looks up the preprocessed snapshot (404 when missing), parses the
/// optional `Range` header (416 when invalid), schedules the context, and
/// maps the resulting status: failed → 406, partial → 206, completed → 200.
/// The response body is the mutated scene entry.
pub async fn new_figment(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Query(params): Query<NewFigmentParams>,
    headers: HeaderMap,
    CompressibleJson(entry): CompressibleJson<SceneEntry>,
) -> Result<Response, ApiError> {
    let suggestion_type: SuggestionType = params.suggestion_type.parse()?;

    let key = suggestion_type.cache_key(&story_id);
    let data = state
        .cache
        .get(&key)
        .await?
        .ok_or_else(|| FigmentError::UnknownStory(story_id.clone()))?;

    let range = parse_range_header(&headers)?;

    let context = FigmentContext {
        status: FigmentStatus::Pending,
        range,
        entry,
        data,
    };
    let context = state.schedulers.figmentate(suggestion_type, context).await?;

    let status = match context.status {
        FigmentStatus::Completed => StatusCode::OK,
        FigmentStatus::Partial => StatusCode::PARTIAL_CONTENT,
        FigmentStatus::Failed => StatusCode::NOT_ACCEPTABLE,
        FigmentStatus::Pending => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(context.entry)).into_response())
}

/// Parse the optional `Range` header.
fn parse_range_header(headers: &HeaderMap) -> Result<Option<Range>, ApiError> {
    let Some(raw) = headers.get(header::RANGE) else {
        return Ok(None);
    };
    let raw = raw.to_str().map_err(|_| {
        ApiError::from(FigmentError::RangeNotSatisfiable(
            "range header is not valid UTF-8".to_owned(),
        ))
    })?;
    let range: Range = raw.parse()?;
    Ok(Some(range))
}
