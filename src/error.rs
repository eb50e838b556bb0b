//! Error types for the figmentator gateway.

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum FigmentError {
    /// No cached snapshot exists for the requested story.
    #[error("unknown story: {0}")]
    UnknownStory(String),

    /// The `Range` header could not be parsed or uses an unknown unit.
    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// No figmentator is configured for the requested suggestion type.
    #[error("no figmentator available: {0}")]
    NoFigmentator(String),

    /// Story cache backend error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Model-level error (startup, preprocess, or generation).
    #[error("model error: {0}")]
    Model(String),

    /// Worker process pool error (spawn, protocol, or crash).
    #[error("worker pool error: {0}")]
    Pool(String),

    /// Scheduler error (queue or worker lifecycle).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, FigmentError>;
