//! Figmentator: an HTTP-fronted inference gateway for collaborative fiction.
//!
//! The gateway mediates between a story platform and interchangeable
//! text-generation models. Incoming generation requests are merged into
//! bounded batches by a per-suggestion-type scheduler, dispatched to a model
//! running in a pool of worker processes, and fanned back out to the
//! originating HTTP handlers.
//!
//! # Architecture
//!
//! - **HTTP surface**: `axum` routes for story snapshots and figment requests
//! - **Scheduler**: wait/size-bounded batching with N concurrent workers
//! - **Resource**: one worker process pool per suggestion type, rebuilt
//!   transparently when the model crashes
//! - **Models**: compiled-in plugins implementing the [`figment::Figmentator`]
//!   contract, executed out-of-process

pub mod cache;
pub mod config;
pub mod error;
pub mod figment;
pub mod http;
pub mod models;
pub mod profanity;

pub use config::Settings;
pub use error::{FigmentError, Result};
pub use models::figment::{FigmentContext, FigmentStatus};
pub use models::range::{Range, RangeUnit};
pub use models::suggestion::SuggestionType;
