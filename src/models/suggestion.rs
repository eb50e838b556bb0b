//! Suggestion types a figmentator can be registered for.

use crate::error::FigmentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named role for which a generation model can be registered.
///
/// Each suggestion type gets its own scheduler and its own model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    /// Suggest a scene entry.
    SceneEntry,
}

impl SuggestionType {
    /// All known suggestion types.
    pub const ALL: &'static [SuggestionType] = &[SuggestionType::SceneEntry];

    /// The wire name, used in query params, env prefixes, and cache keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SceneEntry => "scene_entry",
        }
    }

    /// The cache key for a story snapshot preprocessed for this type.
    pub fn cache_key(self, story_id: &str) -> String {
        format!("{}:{story_id}", self.as_str())
    }
}

impl fmt::Display for SuggestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestionType {
    type Err = FigmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scene_entry" => Ok(Self::SceneEntry),
            other => Err(FigmentError::NoFigmentator(format!(
                "unknown suggestion type `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn wire_name_round_trip() {
        let parsed: SuggestionType = "scene_entry".parse().unwrap();
        assert_eq!(parsed, SuggestionType::SceneEntry);
        assert_eq!(parsed.to_string(), "scene_entry");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!("scene-entry".parse::<SuggestionType>().is_err());
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(
            SuggestionType::SceneEntry.cache_key("abc123"),
            "scene_entry:abc123"
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&SuggestionType::SceneEntry).unwrap();
        assert_eq!(json, r#""scene_entry""#);
    }
}
