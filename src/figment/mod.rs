//! Figment generation: the model contract, the compiled-in plugin registry,
//! the worker process pool, and the batching scheduler.

pub mod model;
pub mod pool;
pub mod registry;
pub mod resource;
pub mod scheduler;
pub mod simple;

pub use model::{CharacterEntryFigmentator, CharacterEntryModel, Figmentator};
pub use registry::PluginRegistry;
pub use resource::{BatchExecutor, ExecutorFactory, FigmentatorResource};
pub use scheduler::{FigmentScheduler, SchedulerCollection};
