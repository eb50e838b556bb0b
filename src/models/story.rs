//! Scene entry records from the story export format.
//!
//! Only the fields the gateway inspects are typed; everything else in the
//! export rides along untouched in `extra` so a round-trip through the
//! gateway preserves the full record.

use serde::{Deserialize, Serialize};

/// The kind of a scene entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryFormat {
    /// A scene establishment (narrator).
    Establishment,
    /// A scene continuation (narrator).
    Addition,
    /// A scene conclusion (narrator).
    Conclusion,
    /// A character's move.
    Move,
    /// A character refreshed the cards in their hand.
    Refresh,
    /// A character chose a subplot.
    Subplot,
}

/// A single entry in a scene, i.e. one player's move.
///
/// `description` is the only field the generation core mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEntry {
    /// A unique identifier for a user, unique across all games.
    pub user_pid: String,
    /// An identifier for this entry, unique within a game.
    pub seq_id: String,
    /// The kind of entry.
    pub format: EntryFormat,
    /// A user-friendly string for the entry format.
    pub pretty_format: String,
    /// The seq id of the character playing, or null for narrator moves.
    #[serde(default)]
    pub character_seq_id: Option<String>,
    /// Either `narrator` or `character:XYZ` where XYZ is the character seq id.
    pub role: String,
    /// The markdown text of the move. Generated figments are appended here.
    #[serde(default)]
    pub description: Option<String>,
    /// Every other export field, passed through unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SceneEntry {
    /// The description text, treating a missing description as empty.
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "user_pid": "user-1",
            "seq_id": "42",
            "format": "move",
            "pretty_format": "Move",
            "character_seq_id": "7",
            "role": "character:7",
            "description": "Once upon a time",
            "challenge_cards": [{"namespace": "obstacle", "name": "The Vault"}],
            "place_card": null
        })
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let entry: SceneEntry = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(entry.format, EntryFormat::Move);
        assert!(entry.extra.contains_key("challenge_cards"));

        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back, sample_json());
    }

    #[test]
    fn missing_description_reads_as_empty() {
        let mut value = sample_json();
        value.as_object_mut().unwrap().remove("description");
        let entry: SceneEntry = serde_json::from_value(value).unwrap();
        assert_eq!(entry.description_text(), "");
    }
}
