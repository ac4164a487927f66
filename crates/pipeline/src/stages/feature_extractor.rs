//! Feature extraction stage combining several feature functions.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use spike_types::{FeatureBlock, FeatureSet, SpikeTrain};
use spike_units::{combine, p2p, pcs, spike_index, spike_time, UnitError};
use tracing::debug;

use crate::component::{lock, Cached, Component, ComponentNode, FeatureSource};
use crate::config::StageConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::factory::{parse_params, StageFactory};
use crate::registry::Registry;

const KIND: &str = "feature_extractor";

fn default_ncomps() -> usize {
    2
}

/// One selectable feature function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", deny_unknown_fields)]
pub enum Feature {
    /// Peak-to-peak amplitude per contact.
    P2P,
    /// Whitened principal components per contact.
    #[serde(rename = "PCs")]
    PCs {
        #[serde(default = "default_ncomps")]
        ncomps: usize,
    },
    /// Sequential spike index.
    SpIdx,
    /// Time of the event each snippet was cut around.
    SpTime,
}

impl Feature {
    /// Builds a feature from its name and a JSON object of parameters,
    /// e.g. `("PCs", {"ncomps": 3})`.
    pub fn from_name(name: &str, params: serde_json::Value) -> PipelineResult<Self> {
        let mut object = match params {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(PipelineError::invalid(format!(
                    "parameters of feature '{name}' must be an object, got {other}"
                )))
            }
        };
        object.insert("name".to_string(), serde_json::Value::String(name.to_string()));
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| PipelineError::invalid(format!("feature '{name}': {e}")))
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::P2P => write!(f, "P2P"),
            Feature::PCs { ncomps } => write!(f, "PCs(ncomps={ncomps})"),
            Feature::SpIdx => write!(f, "SpIdx"),
            Feature::SpTime => write!(f, "SpTime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureParams {
    pub features: Vec<Feature>,
    pub normalize: bool,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            features: Vec::new(),
            normalize: true,
        }
    }
}

/// Reduces the waveforms at the `spikes` role to a feature matrix.
///
/// [`Feature::SpTime`] reads the event times carried by the waveforms, so
/// events dropped at the recording edges never leave the rows misaligned.
pub struct FeatureExtractor {
    node: Arc<ComponentNode>,
    params: Mutex<FeatureParams>,
    features: Cached<FeatureSet>,
}

impl FeatureExtractor {
    pub fn new(registry: &Registry, params: FeatureParams) -> Arc<Self> {
        Arc::new(Self {
            node: ComponentNode::new(KIND, registry, &[("spikes", "SpikeSource")]),
            params: Mutex::new(params),
            features: Cached::new(),
        })
    }

    pub fn selected(&self) -> Vec<Feature> {
        lock(&self.params).features.clone()
    }

    pub fn normalize(&self) -> bool {
        lock(&self.params).normalize
    }

    /// Appends a feature; its columns follow those of earlier features.
    pub fn add_feature(&self, feature: Feature) {
        lock(&self.params).features.push(feature);
        self.node.update();
    }

    pub fn add_feature_by_name(&self, name: &str, params: serde_json::Value) -> PipelineResult<()> {
        let feature = Feature::from_name(name, params)?;
        self.add_feature(feature);
        Ok(())
    }

    pub fn clear_features(&self) {
        lock(&self.params).features.clear();
        self.node.update();
    }

    pub fn set_normalize(&self, normalize: bool) {
        lock(&self.params).normalize = normalize;
        self.node.update();
    }

    pub fn computations(&self) -> usize {
        self.features.computations()
    }

    fn compute(&self) -> PipelineResult<FeatureSet> {
        let FeatureParams { features, normalize } = lock(&self.params).clone();
        if features.is_empty() {
            return Err(PipelineError::computation(
                KIND,
                UnitError::EmptyInput("no features selected".to_string()),
            ));
        }

        let spikes = self.node.spikes("spikes")?;
        let mut blocks: Vec<FeatureBlock> = Vec::with_capacity(features.len());
        for feature in &features {
            let block = match feature {
                Feature::P2P => p2p(&*spikes),
                Feature::PCs { ncomps } => pcs(&*spikes, *ncomps),
                Feature::SpIdx => spike_index(&*spikes),
                Feature::SpTime => {
                    let times = SpikeTrain::new(spikes.event_times.to_vec(), spikes.sampling_rate);
                    spike_time(&times)
                }
            }
            .map_err(|e| PipelineError::computation(KIND, e))?;
            blocks.push(block);
        }

        let set = combine(&blocks, normalize).map_err(|e| PipelineError::computation(KIND, e))?;
        debug!(
            n_spikes = set.n_spikes(),
            n_features = set.n_features(),
            normalize,
            "features computed"
        );
        Ok(set)
    }
}

impl FeatureSource for FeatureExtractor {
    fn features(&self) -> PipelineResult<Arc<FeatureSet>> {
        self.features.get_or_compute(self.node.revision(), || self.compute())
    }
}

crate::impl_component!(FeatureExtractor, features);

#[derive(Default)]
pub struct FeatureExtractorFactory;

impl StageFactory for FeatureExtractorFactory {
    fn create(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>> {
        let params: FeatureParams = parse_params(config)?;
        Ok(FeatureExtractor::new(registry, params))
    }

    fn roles(&self) -> &'static [&'static str] {
        &["spikes"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::component::EventSource;
    use crate::stages::{SpikeExtractor, SyntheticParams, SyntheticSource};
    use serde_json::json;
    use spike_units::SpikeWindow;

    fn wire(registry: &Registry) -> Arc<FeatureExtractor> {
        let source = SyntheticSource::new(
            registry,
            SyntheticParams {
                n_spikes: 10,
                n_contacts: 2,
                ..Default::default()
            },
        );
        registry.provide("SignalSource", source.clone());
        registry.provide("SpikeMarkerSource", source);
        registry.provide("SpikeSource", SpikeExtractor::new(registry, SpikeWindow::default()));
        FeatureExtractor::new(
            registry,
            FeatureParams {
                normalize: false,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_p2p_equals_amplitude() {
        let registry = Registry::new();
        let extractor = wire(&registry);
        extractor.add_feature(Feature::P2P);
        let features = extractor.features().unwrap();
        assert_eq!(features.names, vec!["Ch0:P2P", "Ch1:P2P"]);
        assert!(features.data.column(0).iter().all(|&x| x == 100.0));
        assert!(features.data.column(1).iter().all(|&x| x == 50.0));
    }

    #[test]
    fn test_columns_follow_insertion_order() {
        let registry = Registry::new();
        let extractor = wire(&registry);
        extractor.add_feature(Feature::SpIdx);
        extractor.add_feature(Feature::P2P);
        extractor.add_feature(Feature::SpTime);
        let features = extractor.features().unwrap();
        assert_eq!(features.names, vec!["SpIdx", "Ch0:P2P", "Ch1:P2P", "SpTime"]);
        assert_eq!(features.n_features(), features.names.len());
        assert_eq!(features.data[[3, 0]], 3.0);
        assert!((features.data[[0, 3]] - 100.02).abs() < 1e-9);
    }

    #[test]
    fn test_no_features_is_a_computation_error() {
        let registry = Registry::new();
        let extractor = wire(&registry);
        assert_eq!(extractor.features().unwrap_err().kind(), ErrorKind::Computation);
    }

    #[test]
    fn test_add_feature_invalidates() {
        let registry = Registry::new();
        let extractor = wire(&registry);
        extractor.add_feature(Feature::P2P);
        assert_eq!(extractor.features().unwrap().n_features(), 2);
        extractor.features().unwrap();
        assert_eq!(extractor.computations(), 1);

        extractor.add_feature_by_name("PCs", json!({"ncomps": 1})).unwrap();
        let features = extractor.features().unwrap();
        assert_eq!(features.names, vec!["Ch0:P2P", "Ch1:P2P", "Ch0:PC0", "Ch1:PC0"]);
        assert_eq!(extractor.computations(), 2);

        extractor.clear_features();
        assert!(extractor.features().is_err());
    }

    #[test]
    fn test_normalized_columns_in_unit_range() {
        let registry = Registry::new();
        let extractor = wire(&registry);
        extractor.set_normalize(true);
        extractor.add_feature(Feature::SpIdx);
        extractor.add_feature(Feature::P2P);
        let features = extractor.features().unwrap();
        assert_eq!(features.data[[0, 0]], 0.0);
        assert_eq!(features.data[[7, 0]], 1.0);
        // Constant P2P columns collapse to zero.
        assert!(features.data.column(1).iter().all(|&x| x == 0.0));
    }

    struct EdgeEvents {
        node: Arc<ComponentNode>,
    }

    impl EventSource for EdgeEvents {
        fn events(&self) -> PipelineResult<Arc<SpikeTrain>> {
            // The last event sits too close to the end to be cut.
            Ok(Arc::new(SpikeTrain::new(vec![100.02, 200.02, 999.9], 25_000.0)))
        }
    }

    crate::impl_component!(EdgeEvents, events);

    #[test]
    fn test_spike_time_skips_dropped_edge_events() {
        let registry = Registry::new();
        let extractor = wire(&registry);
        registry.provide(
            "SpikeMarkerSource",
            Arc::new(EdgeEvents {
                node: ComponentNode::new("edge_events", &registry, &[]),
            }),
        );
        extractor.add_feature(Feature::P2P);
        extractor.add_feature(Feature::SpTime);

        let features = extractor.features().unwrap();
        assert_eq!(features.n_spikes(), 2);
        let col = features.column("SpTime").unwrap();
        assert!((features.data[[0, col]] - 100.02).abs() < 1e-9);
        assert!((features.data[[1, col]] - 200.02).abs() < 1e-9);
    }

    #[test]
    fn test_feature_from_name() {
        assert_eq!(Feature::from_name("P2P", json!(null)).unwrap(), Feature::P2P);
        assert_eq!(Feature::from_name("PCs", json!({})).unwrap(), Feature::PCs { ncomps: 2 });
        assert!(Feature::from_name("Wavelets", json!({})).is_err());
        assert!(Feature::from_name("PCs", json!(3)).is_err());
    }
}
