//! Environment-sourced configuration.
//!
//! All settings come from `FIG_*` environment variables so the gateway can be
//! configured per deployment without a config file. Scheduler tuning is
//! per-suggestion-type via a `FIG_SCHEDULER_<TYPE>_*` prefix.

use crate::error::{FigmentError, Result};
use crate::models::suggestion::SuggestionType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Settings for a single configured figmentator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigmentatorSettings {
    /// Plugin key resolved against the compiled-in registry.
    pub plugin: String,
    /// Opaque properties passed to the model's `startup`.
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
}

impl Default for FigmentatorSettings {
    fn default() -> Self {
        Self {
            plugin: "simple".to_owned(),
            properties: None,
        }
    }
}

/// Per-suggestion-type scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// How many seconds to wait to accumulate a batch.
    pub wait_time: f64,
    /// The maximum batch size to generate at once.
    pub max_batch_size: usize,
    /// How many workers can process batches concurrently.
    pub num_workers: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            wait_time: 0.1,
            max_batch_size: 10,
            num_workers: 3,
        }
    }
}

impl SchedulerSettings {
    /// Load settings for one suggestion type from the environment.
    ///
    /// Reads `FIG_SCHEDULER_<TYPE>_WAIT_TIME`, `_MAX_BATCH_SIZE` and
    /// `_NUM_WORKERS`, falling back to the defaults for unset variables.
    pub fn from_env(suggestion_type: SuggestionType) -> Result<Self> {
        let prefix = format!(
            "FIG_SCHEDULER_{}_",
            suggestion_type.as_str().to_uppercase()
        );
        let mut settings = Self::default();
        if let Some(value) = read_var(&format!("{prefix}WAIT_TIME"))? {
            settings.wait_time = value;
        }
        if let Some(value) = read_var(&format!("{prefix}MAX_BATCH_SIZE"))? {
            settings.max_batch_size = value;
        }
        if let Some(value) = read_var(&format!("{prefix}NUM_WORKERS"))? {
            settings.num_workers = value;
        }

        if settings.max_batch_size == 0 {
            return Err(FigmentError::Config(format!(
                "{prefix}MAX_BATCH_SIZE must be at least 1"
            )));
        }
        if settings.num_workers == 0 {
            return Err(FigmentError::Config(format!(
                "{prefix}NUM_WORKERS must be at least 1"
            )));
        }

        Ok(settings)
    }

    /// The batch accumulation wait as a [`Duration`].
    pub fn wait_duration(&self) -> Duration {
        Duration::from_secs_f64(self.wait_time.max(0.0))
    }
}

/// Top-level gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cache backend URL (`memory://` or `redis://host:port/db`).
    pub cache_url: String,
    /// Address to bind the HTTP server to.
    pub host: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Verbose logging.
    pub debug: bool,
    /// Configured figmentators, one per suggestion type.
    pub figmentators: BTreeMap<SuggestionType, FigmentatorSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut figmentators = BTreeMap::new();
        figmentators.insert(SuggestionType::SceneEntry, FigmentatorSettings::default());
        Self {
            cache_url: "memory://".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 8000,
            debug: false,
            figmentators,
        }
    }
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `FIG_FACTORY_FIGMENTATORS` is a JSON object mapping suggestion types to
    /// [`FigmentatorSettings`], e.g. `{"scene_entry":{"plugin":"simple"}}`.
    /// An explicitly empty object disables all figmentators.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Ok(url) = std::env::var("FIG_CACHE_URL") {
            settings.cache_url = url;
        }
        if let Ok(host) = std::env::var("FIG_HOST") {
            settings.host = host;
        }
        if let Some(port) = read_var("FIG_PORT")? {
            settings.port = port;
        }
        if let Ok(debug) = std::env::var("DEBUG") {
            settings.debug = matches!(debug.trim(), "1" | "true" | "True" | "TRUE");
        }
        if let Ok(raw) = std::env::var("FIG_FACTORY_FIGMENTATORS") {
            settings.figmentators = serde_json::from_str(&raw).map_err(|e| {
                FigmentError::Config(format!("invalid FIG_FACTORY_FIGMENTATORS: {e}"))
            })?;
        }

        Ok(settings)
    }
}

/// Read and parse an environment variable, distinguishing "unset" from
/// "set but malformed".
fn read_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| FigmentError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
