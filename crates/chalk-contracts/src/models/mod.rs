//! Model catalogue keyed by name, with capability-aware selection.

mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
