//! Dependency-driven component pipeline for offline spike sorting.
//!
//! Stages (signal source, spike detector, spike extractor, feature extractor,
//! cluster analyzer) are provided into a [`Registry`] under slot names. Each
//! stage declares which slots it reads, resolves them on first use and caches
//! its output until something upstream changes. Changing a stage's settings
//! invalidates every stage that depends on it, however deep.

#[macro_use]
pub mod macros;
pub mod component;
pub mod config;
pub mod error;
pub mod factory;
pub mod graph;
pub mod registry;
pub mod stages;


// Re-export commonly used types
pub use component::*;
pub use config::*;
pub use error::*;
pub use factory::*;
pub use graph::*;
pub use registry::{global, Registry};
pub use stages::*;
