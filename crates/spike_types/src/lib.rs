//! Shared types for the spike sorting system
//!
//! This crate contains the data bundles that flow between pipeline components
//! (raw signal, spike trains, waveform snippets, feature matrices, labels) and
//! the `ArrayBundle` capability every functional unit input satisfies.

pub mod bundle;
pub mod data;

// Re-export commonly used types
pub use bundle::*;
pub use data::*;
