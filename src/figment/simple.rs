//! A dead simple figmentator that generates lorem-ipsum scene entries.
//!
//! Useful as the default registry entry for smoke tests and local
//! development: it exercises the whole request path without any model
//! weights. Generation draws consecutive chunks from a fixed text, wrapping
//! around when the stream runs out.

use crate::error::{FigmentError, Result};
use crate::figment::model::{CharacterEntryFigmentator, CharacterEntryModel, Figmentator};
use crate::models::figment::{FigmentContext, FigmentStatus};
use crate::models::range::{Range, RangeUnit};
use crate::models::suggestion::SuggestionType;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

const LOREM_IPSUM_RAW: &str = "\
Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do
eiusmod tempor incididunt ut labore et dolore magna aliqua. Ut enim ad minim
veniam, quis nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo
consequat. Duis aute irure dolor in reprehenderit in voluptate velit esse
cillum dolore eu fugiat nulla pariatur. Excepteur sint occaecat cupidatat non
proident, sunt in culpa qui officia deserunt mollit anim id est laborum.

Curabitur pretium tincidunt lacus. Nulla gravida orci a odio. Nullam varius,
turpis et commodo pharetra, est eros bibendum elit, nec luctus magna felis
sollicitudin mauris. Integer in mauris eu nibh euismod gravida. Duis ac tellus
et risus vulputate vehicula. Donec lobortis risus a elit. Etiam tempor. Ut
ullamcorper, ligula eu tempor congue, eros est euismod turpis, id tincidunt
sapien risus a quam. Maecenas fermentum consequat mi. Donec fermentum.
Pellentesque malesuada nulla a mi. Duis sapien sem, aliquet nec, commodo eget,
consequat quis, neque. Aliquam faucibus, elit ut dictum aliquet, felis nisl
adipiscing sapien, sed malesuada diam lacus eget erat. Cras mollis scelerisque
nunc. Nullam arcu. Aliquam consequat. Curabitur augue lorem, dapibus quis,
laoreet et, pretium ac, nisi. Aenean magna nisl, mollis quis, molestie eu,
feugiat in, orci. In hac habitasse platea dictumst.";

/// The NFC-normalized generation stream.
static LOREM_IPSUM: LazyLock<String> = LazyLock::new(|| LOREM_IPSUM_RAW.nfc().collect());

/// The stream split on whitespace, used for word and token ranges.
///
/// Splitting trims whitespace runs, so newlines in the stream disappear for
/// word/token ranges while character ranges preserve them.
static LOREM_IPSUM_SPLIT: LazyLock<Vec<&'static str>> =
    LazyLock::new(|| LOREM_IPSUM.split_whitespace().collect());

/// Draw `count` whitespace-split pieces starting at `index`, wrapping around
/// the stream when it runs out.
fn draw_pieces(index: usize, count: usize) -> Vec<&'static str> {
    LOREM_IPSUM_SPLIT
        .iter()
        .cycle()
        .skip(index % LOREM_IPSUM_SPLIT.len().max(1))
        .take(count)
        .copied()
        .collect()
}

/// The stream as Unicode scalars, used for character ranges.
static LOREM_CHARS: LazyLock<Vec<char>> = LazyLock::new(|| LOREM_IPSUM.chars().collect());

/// Draw `count` chars starting at `index`, wrapping with a joining space.
fn draw_chars(index: usize, count: usize) -> String {
    let total = LOREM_CHARS.len();
    let mut out = String::with_capacity(count);
    let mut position = index % total.max(1);
    while out.chars().count() < count {
        if position >= total {
            out.push(' ');
            position = 0;
            continue;
        }
        out.push(LOREM_CHARS[position]);
        position += 1;
    }
    out
}

/// Compute the text the stub would emit for one context, or `None` when the
/// range cannot be satisfied.
fn generate(range: Option<&Range>, description: &str) -> Option<String> {
    let Some(range) = range else {
        // No range: emit the whole stream once.
        return Some(LOREM_IPSUM.clone());
    };

    let [subrange] = range.ranges.as_slice() else {
        warn!("failed to generate text: too many ranges");
        return None;
    };
    let slice = subrange.slice();
    let stop = match slice.stop {
        None | Some(0) => {
            warn!("failed to generate text: no range end");
            return None;
        }
        Some(stop) => stop as usize,
    };

    match range.unit {
        RangeUnit::Words | RangeUnit::Tokens => {
            let index = description.split_whitespace().count();
            if let Some(start) = slice.start {
                if start as usize != index {
                    warn!("failed to generate text: unexpected range start");
                    return None;
                }
            }
            let count = stop.saturating_sub(index);
            let mut text = draw_pieces(index, count).join(" ");
            if !description.is_empty() && !description.ends_with(char::is_whitespace) {
                text.insert(0, ' ');
            }
            Some(text)
        }
        RangeUnit::Chars | RangeUnit::Sentences => {
            let index = description.nfc().count();
            if let Some(start) = slice.start {
                if start as usize != index {
                    warn!("failed to generate text: unexpected range start");
                    return None;
                }
            }
            Some(draw_chars(index, stop.saturating_sub(index)))
        }
    }
}

/// Measure a description the way the stub generates: whitespace pieces for
/// word and token ranges, Unicode scalars otherwise.
fn stub_len(unit: RangeUnit, text: &str) -> u64 {
    match unit {
        RangeUnit::Words | RangeUnit::Tokens => text.split_whitespace().count() as u64,
        RangeUnit::Chars | RangeUnit::Sentences => text.nfc().count() as u64,
    }
}

/// Mark one context's status after its description was extended.
fn resolve_status(context: &mut FigmentContext) {
    let Some(range) = context.range.as_ref() else {
        context.status = FigmentStatus::Completed;
        return;
    };
    let stop = range
        .slices()
        .first()
        .and_then(|slice| slice.stop)
        .unwrap_or(u64::MAX);
    let length = stub_len(range.unit, context.entry.description_text());
    if range.is_finite() && length > stop {
        context.status = FigmentStatus::Completed;
    } else {
        context.status = FigmentStatus::Partial;
    }
}

/// The lorem-ipsum stub model.
pub struct SimpleFigmentator {
    suggestion_type: SuggestionType,
    preprocess_time: Duration,
    generation_time: Duration,
}

impl SimpleFigmentator {
    /// Create the stub. Only `scene_entry` suggestions are supported.
    pub fn new(suggestion_type: SuggestionType) -> Result<Self> {
        if suggestion_type != SuggestionType::SceneEntry {
            return Err(FigmentError::Model(
                "this figmentator can only generate scene entries".to_owned(),
            ));
        }
        Ok(Self {
            suggestion_type,
            preprocess_time: Duration::from_secs(1),
            generation_time: Duration::from_secs(2),
        })
    }

    /// Registry constructor.
    pub fn boxed(suggestion_type: SuggestionType) -> Result<Box<dyn Figmentator>> {
        Ok(Box::new(Self::new(suggestion_type)?))
    }

    fn read_duration(properties: &serde_json::Value, key: &str) -> Option<Duration> {
        properties
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }
}

impl Figmentator for SimpleFigmentator {
    fn suggestion_type(&self) -> SuggestionType {
        self.suggestion_type
    }

    fn startup(&mut self, properties: Option<&serde_json::Value>) -> Result<bool> {
        if let Some(properties) = properties {
            if let Some(delay) = Self::read_duration(properties, "preprocess_time") {
                self.preprocess_time = delay;
            }
            if let Some(delay) = Self::read_duration(properties, "generation_time") {
                self.generation_time = delay;
            }
        }
        Ok(true)
    }

    fn shutdown(&mut self) {}

    fn preprocess(
        &mut self,
        story: serde_json::Value,
        _prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        // Simulate slow preprocessing.
        std::thread::sleep(self.preprocess_time);
        Ok(story)
    }

    fn figmentate(&mut self, mut contexts: Vec<FigmentContext>) -> Vec<FigmentContext> {
        for context in contexts.iter_mut() {
            if context.entry.description.is_none() {
                context.entry.description = Some(String::new());
            }
            match generate(context.range.as_ref(), context.entry.description_text()) {
                Some(text) => {
                    if let Some(description) = context.entry.description.as_mut() {
                        description.push_str(&text);
                    }
                    resolve_status(context);
                }
                None => context.status = FigmentStatus::Failed,
            }
        }

        // Simulate a slow generation process.
        std::thread::sleep(self.generation_time);
        contexts
    }
}

/// The same lorem-ipsum stream exposed through the character-entry contract.
///
/// Registered as `lorem_character`; mostly useful to exercise the shared
/// validate/sample/filter pipeline end to end.
pub struct LoremCharacterModel;

impl LoremCharacterModel {
    /// Registry constructor.
    pub fn boxed(suggestion_type: SuggestionType) -> Result<Box<dyn Figmentator>> {
        Ok(Box::new(CharacterEntryFigmentator::new(
            suggestion_type,
            LoremCharacterModel,
        )?))
    }
}

impl CharacterEntryModel for LoremCharacterModel {
    fn startup(&mut self, _properties: Option<&serde_json::Value>) -> Result<bool> {
        Ok(true)
    }

    fn preprocess(
        &mut self,
        story: serde_json::Value,
        _prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        Ok(story)
    }

    fn process(&mut self, context: &FigmentContext) -> Option<serde_json::Value> {
        // The stub "infers" during process; sample just echoes the batch.
        generate(context.range.as_ref(), context.entry.description_text())
            .map(serde_json::Value::String)
    }

    fn sample(&mut self, inputs: Vec<serde_json::Value>) -> Vec<Option<String>> {
        inputs
            .into_iter()
            .map(|input| input.as_str().map(str::to_owned))
            .collect()
    }
}
