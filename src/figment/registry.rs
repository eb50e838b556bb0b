//! Compiled-in plugin registry.
//!
//! Models are resolved by a plugin key carried in the factory settings. All
//! constructors are linked into the binary; there is no runtime code loading.

use crate::error::{FigmentError, Result};
use crate::figment::model::Figmentator;
use crate::figment::simple::{LoremCharacterModel, SimpleFigmentator};
use crate::models::suggestion::SuggestionType;
use std::collections::HashMap;
use std::sync::Mutex;

/// A constructor producing one model instance for a suggestion type.
pub type FigmentatorCtor = fn(SuggestionType) -> Result<Box<dyn Figmentator>>;

/// Registry mapping plugin keys to model constructors.
///
/// The interior mutex serializes registration and resolution.
pub struct PluginRegistry {
    plugins: Mutex<HashMap<&'static str, FigmentatorCtor>>,
}

impl PluginRegistry {
    /// A registry holding the built-in plugins.
    pub fn builtin() -> Self {
        let registry = Self {
            plugins: Mutex::new(HashMap::new()),
        };
        registry.register("simple", SimpleFigmentator::boxed);
        registry.register("lorem_character", LoremCharacterModel::boxed);
        registry
    }

    /// Register (or replace) a plugin constructor.
    pub fn register(&self, key: &'static str, ctor: FigmentatorCtor) {
        if let Ok(mut plugins) = self.plugins.lock() {
            plugins.insert(key, ctor);
        }
    }

    /// The registered plugin keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self
            .plugins
            .lock()
            .map(|plugins| plugins.keys().copied().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Construct a model instance for `suggestion_type` from the plugin
    /// registered under `key`.
    pub fn create(&self, key: &str, suggestion_type: SuggestionType) -> Result<Box<dyn Figmentator>> {
        let ctor = self
            .plugins
            .lock()
            .ok()
            .and_then(|plugins| plugins.get(key).copied())
            .ok_or_else(|| {
                FigmentError::NoFigmentator(format!("no plugin registered under `{key}`"))
            })?;
        ctor(suggestion_type)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn builtin_plugins_are_registered() {
        let registry = PluginRegistry::builtin();
        assert_eq!(registry.keys(), vec!["lorem_character", "simple"]);
    }

    #[test]
    fn create_resolves_a_plugin() {
        let registry = PluginRegistry::builtin();
        let model = registry.create("simple", SuggestionType::SceneEntry).unwrap();
        assert_eq!(model.suggestion_type(), SuggestionType::SceneEntry);
    }

    #[test]
    fn create_rejects_unknown_plugins() {
        let registry = PluginRegistry::builtin();
        assert!(matches!(
            registry.create("gpt-please", SuggestionType::SceneEntry),
            Err(FigmentError::NoFigmentator(_))
        ));
    }

    #[test]
    fn register_replaces_existing_entries() {
        let registry = PluginRegistry::builtin();
        registry.register("simple", LoremCharacterModel::boxed);
        assert_eq!(registry.keys().len(), 2);
    }
}
