//! Cluster analysis stage with manual curation.
//!
//! The analyzer keeps two cached values: the base clustering, keyed by the
//! node's upstream revision, and the curated labels, keyed by its full
//! revision. Manual edits bump only the full revision, so they are replayed
//! on the same base labels. An upstream change (new features, another method
//! or seed) produces a fresh base clustering; edits recorded against the old
//! one are discarded because its label ids no longer mean anything.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use spike_types::Labels;
use spike_units::{apply_edits, cluster, ClusterMethod, LabelEdit};
use tracing::{debug, info, warn};

use crate::component::{lock, Cached, Component, ComponentNode, LabelSource};
use crate::config::StageConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::factory::{parse_params, StageFactory};
use crate::registry::Registry;

const KIND: &str = "cluster_analyzer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterParams {
    pub method: String,
    pub k: usize,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            method: "k_means".to_string(),
            k: 2,
            max_iter: 100,
            seed: 0,
        }
    }
}

impl ClusterParams {
    pub fn to_method(&self) -> PipelineResult<ClusterMethod> {
        let method = ClusterMethod::from_name(&self.method, self.k).map_err(|e| PipelineError::invalid(e.to_string()))?;
        Ok(match method {
            ClusterMethod::KMeans { k, .. } => ClusterMethod::KMeans {
                k,
                max_iter: self.max_iter,
            },
        })
    }
}

#[derive(Debug, Clone)]
struct Settings {
    method: ClusterMethod,
    seed: u64,
}

#[derive(Debug, Default)]
struct Curation {
    edits: Vec<LabelEdit>,
    /// Upstream revision the edits were made against.
    base_revision: u64,
}

/// Labels every row of the feature matrix at the `features` role.
pub struct ClusterAnalyzer {
    node: Arc<ComponentNode>,
    settings: Mutex<Settings>,
    curation: Mutex<Curation>,
    base: Cached<Labels>,
    labels: Cached<Labels>,
}

impl ClusterAnalyzer {
    pub fn new(registry: &Registry, method: ClusterMethod, seed: u64) -> Arc<Self> {
        Arc::new(Self {
            node: ComponentNode::new(KIND, registry, &[("features", "FeatureSource")]),
            settings: Mutex::new(Settings { method, seed }),
            curation: Mutex::new(Curation::default()),
            base: Cached::new(),
            labels: Cached::new(),
        })
    }

    /// k-means with `k` clusters and seed 0.
    pub fn k_means(registry: &Registry, k: usize) -> Arc<Self> {
        Self::new(registry, ClusterMethod::k_means(k), 0)
    }

    pub fn method(&self) -> ClusterMethod {
        lock(&self.settings).method.clone()
    }

    pub fn seed(&self) -> u64 {
        lock(&self.settings).seed
    }

    /// Switches the clustering method; the base clustering is redone.
    pub fn set_method(&self, method: ClusterMethod) {
        lock(&self.settings).method = method;
        self.node.upstream_changed();
    }

    pub fn set_k(&self, k: usize) {
        let method = match self.method() {
            ClusterMethod::KMeans { max_iter, .. } => ClusterMethod::KMeans { k, max_iter },
        };
        self.set_method(method);
    }

    pub fn set_seed(&self, seed: u64) {
        lock(&self.settings).seed = seed;
        self.node.upstream_changed();
    }

    /// Moves the members of `cells` to the unclassified label.
    pub fn delete_cells(&self, cells: &[u32]) {
        self.record(LabelEdit::Delete(cells.to_vec()));
    }

    /// Relabels all of `cells` to the smallest of them.
    pub fn merge_cells(&self, cells: &[u32]) {
        self.record(LabelEdit::Merge(cells.to_vec()));
    }

    /// Renumbers the surviving cells to `1..=m` in ascending label order.
    pub fn relabel(&self) {
        self.record(LabelEdit::Relabel);
    }

    /// Manual edits currently applied on top of the base clustering.
    pub fn edits(&self) -> Vec<LabelEdit> {
        lock(&self.curation).edits.clone()
    }

    /// Clustering before manual edits.
    pub fn base_labels(&self) -> PipelineResult<Arc<Labels>> {
        self.base.get_or_compute(self.node.upstream_revision(), || self.run_clustering())
    }

    pub fn base_computations(&self) -> usize {
        self.base.computations()
    }

    pub fn computations(&self) -> usize {
        self.labels.computations()
    }

    fn record(&self, edit: LabelEdit) {
        {
            let mut curation = lock(&self.curation);
            self.discard_stale(&mut curation);
            debug!(?edit, "manual edit recorded");
            curation.edits.push(edit);
        }
        self.node.update();
    }

    fn discard_stale(&self, curation: &mut Curation) {
        let current = self.node.upstream_revision();
        if curation.base_revision == current {
            return;
        }
        if !curation.edits.is_empty() {
            warn!(
                discarded = curation.edits.len(),
                "input changed since the manual edits were made; discarding them"
            );
            curation.edits.clear();
        }
        curation.base_revision = current;
    }

    fn run_clustering(&self) -> PipelineResult<Labels> {
        let features = self.node.features("features")?;
        let Settings { method, seed } = lock(&self.settings).clone();
        let mut rng = StdRng::seed_from_u64(seed);
        let labels = cluster(features.data.view(), &method, &mut rng)
            .map_err(|e| PipelineError::computation(KIND, e))?;
        info!(%method, n_spikes = labels.len(), "clustering finished");
        Ok(labels)
    }

    fn curate(&self) -> PipelineResult<Labels> {
        let base = self.base_labels()?;
        let mut curation = lock(&self.curation);
        self.discard_stale(&mut curation);
        Ok(apply_edits(&base, &curation.edits))
    }
}

impl LabelSource for ClusterAnalyzer {
    fn labels(&self) -> PipelineResult<Arc<Labels>> {
        self.labels.get_or_compute(self.node.revision(), || self.curate())
    }
}

impl Component for ClusterAnalyzer {
    fn node(&self) -> &Arc<ComponentNode> {
        &self.node
    }

    /// Dirties the base clustering as well as the curated labels.
    ///
    /// Recorded edits are discarded, as after any upstream change.
    fn update(&self) {
        self.node.upstream_changed();
    }

    fn as_label_source(&self) -> Option<&dyn LabelSource> {
        Some(self)
    }
}

#[derive(Default)]
pub struct ClusterAnalyzerFactory;

impl StageFactory for ClusterAnalyzerFactory {
    fn create(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>> {
        let params: ClusterParams = parse_params(config)?;
        let method = params.to_method()?;
        Ok(ClusterAnalyzer::new(registry, method, params.seed))
    }

    fn roles(&self) -> &'static [&'static str] {
        &["features"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::FeatureSource;
    use crate::error::ErrorKind;
    use ndarray::{concatenate, Array2, Axis};
    use rand_distr::StandardNormal;
    use rand::Rng;
    use spike_types::FeatureSet;

    /// Serves a fixed feature matrix that can be swapped out.
    struct FixedFeatures {
        node: Arc<ComponentNode>,
        data: Mutex<Array2<f64>>,
    }

    impl FixedFeatures {
        fn new(registry: &Registry, data: Array2<f64>) -> Arc<Self> {
            Arc::new(Self {
                node: ComponentNode::new("fixed_features", registry, &[]),
                data: Mutex::new(data),
            })
        }

        fn set(&self, data: Array2<f64>) {
            *lock(&self.data) = data;
            self.node.update();
        }
    }

    impl FeatureSource for FixedFeatures {
        fn features(&self) -> PipelineResult<Arc<FeatureSet>> {
            let data = lock(&self.data).clone();
            let names = (0..data.ncols()).map(|i| format!("Fet{i}")).collect();
            Ok(Arc::new(FeatureSet::new(data, names).unwrap()))
        }
    }

    crate::impl_component!(FixedFeatures, features);

    fn two_blocks() -> Array2<f64> {
        concatenate(
            Axis(0),
            &[Array2::<f64>::zeros((100, 2)).view(), Array2::<f64>::ones((100, 2)).view()],
        )
        .unwrap()
    }

    fn random(n: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((n, 2), |_| rng.sample::<f64, _>(StandardNormal))
    }

    #[test]
    fn test_two_blocks_get_two_labels() {
        let registry = Registry::new();
        registry.provide("FeatureSource", FixedFeatures::new(&registry, two_blocks()));
        let analyzer = ClusterAnalyzer::k_means(&registry, 2);
        let labels = analyzer.labels().unwrap();

        let (first, second) = (labels[0], labels[100]);
        assert!(labels[..100].iter().all(|&l| l == first));
        assert!(labels[100..].iter().all(|&l| l == second));
        let mut ids = vec![first, second];
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_edits_reuse_base_clustering() {
        let registry = Registry::new();
        registry.provide("FeatureSource", FixedFeatures::new(&registry, random(100, 1)));
        let analyzer = ClusterAnalyzer::k_means(&registry, 5);
        analyzer.labels().unwrap();

        analyzer.delete_cells(&[1, 2, 3, 4]);
        analyzer.relabel();
        let mut distinct: Vec<u32> = analyzer.labels().unwrap().to_vec();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct, vec![0, 1]);
        assert_eq!(analyzer.base_computations(), 1);
        assert_eq!(analyzer.computations(), 2);
    }

    #[test]
    fn test_edits_before_first_read_apply() {
        let registry = Registry::new();
        registry.provide("FeatureSource", FixedFeatures::new(&registry, two_blocks()));
        let analyzer = ClusterAnalyzer::k_means(&registry, 2);
        analyzer.merge_cells(&[1, 2]);
        assert!(analyzer.labels().unwrap().iter().all(|&l| l == 1));
    }

    #[test]
    fn test_upstream_change_discards_edits() {
        let registry = Registry::new();
        let source = FixedFeatures::new(&registry, two_blocks());
        registry.provide("FeatureSource", source.clone());
        let analyzer = ClusterAnalyzer::k_means(&registry, 2);
        analyzer.labels().unwrap();
        analyzer.delete_cells(&[1, 2]);
        assert!(analyzer.labels().unwrap().iter().all(|&l| l == 0));

        source.set(random(50, 2));
        let labels = analyzer.labels().unwrap();
        assert_eq!(labels.len(), 50);
        assert!(labels.iter().all(|&l| l == 1 || l == 2));
        assert!(analyzer.edits().is_empty());
        assert_eq!(analyzer.base_computations(), 2);
    }

    #[test]
    fn test_update_redoes_base_clustering() {
        let registry = Registry::new();
        registry.provide("FeatureSource", FixedFeatures::new(&registry, two_blocks()));
        let analyzer = ClusterAnalyzer::k_means(&registry, 2);
        analyzer.labels().unwrap();
        analyzer.merge_cells(&[1, 2]);
        analyzer.labels().unwrap();
        assert_eq!(analyzer.base_computations(), 1);

        let upstream_revision = analyzer.node().upstream_revision();
        analyzer.update();
        assert!(analyzer.node().upstream_revision() > upstream_revision);
        let labels = analyzer.labels().unwrap();
        assert_eq!(analyzer.base_computations(), 2);
        assert!(analyzer.edits().is_empty());
        assert!(labels.contains(&1) && labels.contains(&2));
    }

    #[test]
    fn test_set_k_reclusters() {
        let registry = Registry::new();
        registry.provide("FeatureSource", FixedFeatures::new(&registry, random(60, 3)));
        let analyzer = ClusterAnalyzer::k_means(&registry, 2);
        assert!(analyzer.labels().unwrap().iter().all(|&l| l <= 2));

        analyzer.set_k(4);
        let labels = analyzer.labels().unwrap();
        assert!(labels.contains(&4));
        assert_eq!(analyzer.base_computations(), 2);
    }

    #[test]
    fn test_seed_makes_clustering_repeatable() {
        let registry = Registry::new();
        registry.provide("FeatureSource", FixedFeatures::new(&registry, random(80, 4)));
        let a = ClusterAnalyzer::new(&registry, ClusterMethod::k_means(3), 9);
        let b = ClusterAnalyzer::new(&registry, ClusterMethod::k_means(3), 9);
        assert_eq!(a.labels().unwrap(), b.labels().unwrap());
    }

    #[test]
    fn test_too_few_rows_is_a_computation_error() {
        let registry = Registry::new();
        registry.provide("FeatureSource", FixedFeatures::new(&registry, Array2::zeros((0, 2))));
        let analyzer = ClusterAnalyzer::k_means(&registry, 2);
        assert_eq!(analyzer.labels().unwrap_err().kind(), ErrorKind::Computation);
    }

    #[test]
    fn test_params_to_method() {
        let params: ClusterParams = serde_yaml::from_str("k: 4\nseed: 7").unwrap();
        assert_eq!(params.to_method().unwrap(), ClusterMethod::k_means(4));
        let bad = ClusterParams {
            method: "dbscan".to_string(),
            ..Default::default()
        };
        assert_eq!(bad.to_method().unwrap_err().kind(), ErrorKind::Configuration);
    }
}
