//! Stateless functional units for spike sorting.
//!
//! Every function here is a pure transform over arrays: threshold detection,
//! waveform cutting, feature computation, PCA and clustering. None of them
//! know about the component graph that calls them.

pub mod cluster;
pub mod detect;
pub mod error;
pub mod extract;
pub mod features;
pub mod labels;
pub mod pca;

pub use cluster::*;
pub use detect::*;
pub use error::*;
pub use extract::*;
pub use features::*;
pub use labels::*;
pub use pca::*;
