//! Built-in pipeline stages

pub mod cluster;
pub mod detector;
pub mod extractor;
pub mod feature_extractor;
pub mod lab_source;
pub mod synthetic;

// Re-export stage implementations
pub use cluster::*;
pub use detector::*;
pub use extractor::*;
pub use feature_extractor::*;
pub use lab_source::*;
pub use synthetic::*;

use crate::factory::StageRegistry;

/// Register all built-in stages with the registry
pub fn register_builtin_stages(registry: &mut StageRegistry) {
    registry.register("synthetic_source", SyntheticSourceFactory);
    registry.register("lab_file_source", LabFileSourceFactory);
    registry.register("spike_detector", SpikeDetectorFactory);
    registry.register("spike_extractor", SpikeExtractorFactory);
    registry.register("feature_extractor", FeatureExtractorFactory);
    registry.register("cluster_analyzer", ClusterAnalyzerFactory);
}
