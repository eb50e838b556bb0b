//! HTTP surface.
//!
//! Two routes drive the whole gateway: `POST /story/snapshot` preprocesses
//! and caches a story, `POST /figment/{story_id}/new` schedules a figment
//! and maps the resulting status onto an HTTP status code.

pub mod body;
pub mod figment;
pub mod story;

use crate::cache::StoryCache;
use crate::error::FigmentError;
use crate::figment::scheduler::SchedulerCollection;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for axum handlers.
///
/// Built once at startup and passed to every handler; there are no global
/// singletons.
#[derive(Clone)]
pub struct AppState {
    /// One scheduler per configured suggestion type.
    pub schedulers: Arc<SchedulerCollection>,
    /// Preprocessed-story cache.
    pub cache: Arc<dyn StoryCache>,
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/story/snapshot", post(story::snapshot))
        .route("/figment/{story_id}/new", post(figment::new_figment))
        .with_state(state)
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error details.
    pub error: ErrorBody,
}

/// Error details within an [`ErrorResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub message: String,
}

/// A handler-level error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// An error with an explicit status.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A 400 for undecodable or unparsable request bodies.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<FigmentError> for ApiError {
    fn from(error: FigmentError) -> Self {
        let status = match &error {
            FigmentError::UnknownStory(_) => StatusCode::NOT_FOUND,
            FigmentError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            FigmentError::NoFigmentator(_) => StatusCode::NOT_ACCEPTABLE,
            FigmentError::Cache(_)
            | FigmentError::Model(_)
            | FigmentError::Pool(_)
            | FigmentError::Scheduler(_)
            | FigmentError::Config(_)
            | FigmentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
