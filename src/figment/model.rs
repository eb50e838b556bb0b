//! The model contract driven by the scheduler.
//!
//! A [`Figmentator`] is the full polymorphic surface a generation model must
//! implement. Models producing character-entry text usually implement the
//! smaller [`CharacterEntryModel`] instead and let
//! [`CharacterEntryFigmentator`] supply validation, batching glue, profanity
//! filtering, and status bookkeeping.

use crate::error::Result;
use crate::models::figment::{FigmentContext, FigmentStatus};
use crate::models::range::RangeSlice;
use crate::models::suggestion::SuggestionType;
use crate::profanity::Profanity;
use tracing::warn;

/// The operations of a generation model.
///
/// Implementations run inside a worker process: all methods are synchronous
/// and may block for seconds.
pub trait Figmentator: Send {
    /// The suggestion type this model was registered for.
    fn suggestion_type(&self) -> SuggestionType;

    /// Load model parameters and warm caches.
    ///
    /// Returns whether the model is ready to serve; `Ok(false)` fails the
    /// worker handshake without being treated as a crash.
    fn startup(&mut self, properties: Option<&serde_json::Value>) -> Result<bool>;

    /// Release all resources used by the model.
    fn shutdown(&mut self);

    /// Reduce a story snapshot to an opaque blob for later generation.
    ///
    /// `prior` is the blob produced from a previous snapshot of the same
    /// story, when one exists.
    fn preprocess(
        &mut self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Generate a figment for each context in the batch.
    ///
    /// Sets each context's status and, on success, appends to its entry's
    /// description. Never fails the batch as a whole.
    fn figmentate(&mut self, contexts: Vec<FigmentContext>) -> Vec<FigmentContext>;
}

/// The reduced contract for character-entry models.
///
/// `process` builds one request's model input; `sample` runs the whole batch
/// at once and returns outputs parallel to its inputs.
pub trait CharacterEntryModel: Send {
    /// Load model parameters. See [`Figmentator::startup`].
    fn startup(&mut self, properties: Option<&serde_json::Value>) -> Result<bool>;

    /// Release model resources.
    fn shutdown(&mut self) {}

    /// Preprocess a story snapshot. See [`Figmentator::preprocess`].
    fn preprocess(
        &mut self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Build the model input for one validated context, or `None` when the
    /// context cannot be processed.
    fn process(&mut self, context: &FigmentContext) -> Option<serde_json::Value>;

    /// Generate text for a batch of processed inputs.
    ///
    /// The output vector is parallel to `inputs`; `None` or an empty string
    /// marks a failed generation.
    fn sample(&mut self, inputs: Vec<serde_json::Value>) -> Vec<Option<String>>;
}

/// A [`Figmentator`] built from a [`CharacterEntryModel`].
///
/// Owns the profanity filter and implements the shared
/// validate/process/sample/append pipeline.
pub struct CharacterEntryFigmentator<M> {
    suggestion_type: SuggestionType,
    model: M,
    profanity: Profanity,
}

impl<M: CharacterEntryModel> CharacterEntryFigmentator<M> {
    /// Wrap a character-entry model for the given suggestion type.
    pub fn new(suggestion_type: SuggestionType, model: M) -> Result<Self> {
        Ok(Self {
            suggestion_type,
            model,
            profanity: Profanity::embedded()?,
        })
    }

    /// Validate a context's range against its current description.
    ///
    /// Requires a single subrange with a bounded end whose start, when
    /// present, equals the current chunk count of the description (trailing
    /// fragments excluded). Normalizes a missing description to empty.
    fn validate(&self, context: &mut FigmentContext) -> Option<RangeSlice> {
        if context.entry.description.is_none() {
            context.entry.description = Some(String::new());
        }

        let Some(range) = context.range.as_ref() else {
            warn!("failed to generate character entry: no range specified");
            return None;
        };

        if range.ranges.len() > 1 {
            warn!("failed to generate character entry: too many ranges specified");
            return None;
        }

        let slice = range.slices().into_iter().next()?;
        match slice.stop {
            None | Some(0) => {
                warn!("failed to generate character entry: no range end specified");
                return None;
            }
            Some(_) => {}
        }

        let index = range
            .unit
            .chunk(context.entry.description_text(), false)
            .len() as u64;
        if let Some(start) = slice.start {
            if start != index {
                warn!("failed to generate character entry: unexpected range start specified");
                return None;
            }
        }

        Some(slice)
    }
}

impl<M: CharacterEntryModel> Figmentator for CharacterEntryFigmentator<M> {
    fn suggestion_type(&self) -> SuggestionType {
        self.suggestion_type
    }

    fn startup(&mut self, properties: Option<&serde_json::Value>) -> Result<bool> {
        self.model.startup(properties)
    }

    fn shutdown(&mut self) {
        self.model.shutdown();
    }

    fn preprocess(
        &mut self,
        story: serde_json::Value,
        prior: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.model.preprocess(story, prior)
    }

    fn figmentate(&mut self, mut contexts: Vec<FigmentContext>) -> Vec<FigmentContext> {
        let mut segments = Vec::new();
        let mut inputs = Vec::new();
        for context in contexts.iter_mut() {
            let Some(segment) = self.validate(context) else {
                context.status = FigmentStatus::Failed;
                continue;
            };
            let Some(input) = self.model.process(context) else {
                context.status = FigmentStatus::Failed;
                continue;
            };
            segments.push(segment);
            inputs.push(input);
        }

        let samples = self.model.sample(inputs);
        let mut outputs = segments.into_iter().zip(samples);

        for context in contexts.iter_mut() {
            if context.status == FigmentStatus::Failed {
                continue;
            }
            let Some((segment, sample)) = outputs.next() else {
                context.status = FigmentStatus::Failed;
                continue;
            };
            let sample = match sample {
                Some(text) if !text.is_empty() => self.profanity.filter(&text),
                _ => {
                    context.status = FigmentStatus::Failed;
                    continue;
                }
            };

            let Some(range) = context.range.clone() else {
                context.status = FigmentStatus::Failed;
                continue;
            };

            let description = context.entry.description.get_or_insert_with(String::new);
            description.push_str(&sample);

            let chunks = range.unit.chunk(description, true);
            let stop = segment.stop.unwrap_or(u64::MAX);
            if range.is_finite() && (chunks.len() as u64) > stop {
                // Overshoot: cut back to the last whole-chunk boundary.
                let trimmed = range.trim(description).to_owned();
                context.entry.description = Some(trimmed);
                context.status = FigmentStatus::Completed;
            } else {
                context.status = FigmentStatus::Partial;
            }
        }

        contexts
    }
}
