//! Figment generation context and status.

use crate::models::range::Range;
use crate::models::story::SceneEntry;
use serde::{Deserialize, Serialize};

/// Lifecycle status of one figment request.
///
/// Created `Pending` by the HTTP handler; the model moves it to exactly one
/// of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FigmentStatus {
    /// Waiting to be processed.
    Pending,
    /// Validation failed or the model produced no text.
    Failed,
    /// Text was generated but the requested range is not yet satisfied.
    Partial,
    /// The requested range has been fully generated.
    Completed,
}

impl Default for FigmentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Everything a model needs to generate one figment.
///
/// Contexts cross the worker process boundary as JSON, so every field is
/// serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigmentContext {
    /// Request status, updated by the model.
    #[serde(default)]
    pub status: FigmentStatus,
    /// If specified, the portion of the figment to generate.
    #[serde(default)]
    pub range: Option<Range>,
    /// The scene entry to mutate in order to generate a suggestion.
    pub entry: SceneEntry,
    /// The preprocessed story blob created by this figmentator.
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn status_serde_is_snake_case() {
        let json = serde_json::to_string(&FigmentStatus::Partial).unwrap();
        assert_eq!(json, r#""partial""#);
    }

    #[test]
    fn context_round_trips_through_json() {
        let entry: SceneEntry = serde_json::from_value(serde_json::json!({
            "user_pid": "u",
            "seq_id": "1",
            "format": "move",
            "pretty_format": "Move",
            "role": "character:1",
        }))
        .unwrap();
        let context = FigmentContext {
            status: FigmentStatus::Pending,
            range: Some("words=0-4".parse().unwrap()),
            entry,
            data: serde_json::json!({"snapshot": 1}),
        };

        let json = serde_json::to_string(&context).unwrap();
        let back: FigmentContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, FigmentStatus::Pending);
        assert_eq!(back.range, context.range);
        assert_eq!(back.data, context.data);
    }
}
