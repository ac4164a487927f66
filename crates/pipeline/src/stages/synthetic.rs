//! Deterministic box-spike recording for tests and mock runs.

use std::sync::{Arc, Mutex};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use spike_types::{Signal, SpikeTrain};
use tracing::debug;

use crate::component::{lock, Cached, Component, ComponentNode, EventSource, SignalSource};
use crate::config::StageConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::factory::{parse_params, StageFactory};
use crate::registry::Registry;

const KIND: &str = "synthetic_source";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticParams {
    pub sampling_rate: f64,
    pub n_contacts: usize,
    /// Spacing between spikes (ms).
    pub period_ms: f64,
    /// Recording length in periods; spikes sit at periods `1..n_spikes - 1`.
    pub n_spikes: usize,
    pub amplitude: f64,
    /// Width of each box spike (ms).
    pub spike_ms: f64,
    /// Half-width of uniform noise added to every sample.
    pub noise: f64,
    pub seed: u64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            sampling_rate: 25_000.0,
            n_contacts: 1,
            period_ms: 100.0,
            n_spikes: 100,
            amplitude: 100.0,
            spike_ms: 5.0,
            noise: 0.0,
            seed: 0,
        }
    }
}

impl SyntheticParams {
    /// Sample index of every spike onset.
    fn onsets(&self) -> Vec<usize> {
        (1..self.n_spikes.saturating_sub(1))
            .map(|k| (k as f64 * self.period_ms * self.sampling_rate / 1000.0) as usize)
            .collect()
    }
}

/// A recording of evenly spaced box spikes.
///
/// Contact `c` carries the spikes at `amplitude / (c + 1)`. As an event source
/// it reports the true spike times, half a sample after each onset.
pub struct SyntheticSource {
    node: Arc<ComponentNode>,
    params: Mutex<SyntheticParams>,
    signal: Cached<Signal>,
    events: Cached<SpikeTrain>,
}

impl SyntheticSource {
    pub fn new(registry: &Registry, params: SyntheticParams) -> Arc<Self> {
        Arc::new(Self {
            node: ComponentNode::new(KIND, registry, &[]),
            params: Mutex::new(params),
            signal: Cached::new(),
            events: Cached::new(),
        })
    }

    pub fn params(&self) -> SyntheticParams {
        lock(&self.params).clone()
    }

    pub fn set_params(&self, params: SyntheticParams) {
        *lock(&self.params) = params;
        self.node.update();
    }

    pub fn set_period_ms(&self, period_ms: f64) {
        lock(&self.params).period_ms = period_ms;
        self.node.update();
    }

    pub fn set_n_spikes(&self, n_spikes: usize) {
        lock(&self.params).n_spikes = n_spikes;
        self.node.update();
    }

    pub fn set_amplitude(&self, amplitude: f64) {
        lock(&self.params).amplitude = amplitude;
        self.node.update();
    }

    pub fn set_noise(&self, noise: f64) {
        lock(&self.params).noise = noise;
        self.node.update();
    }

    pub fn signal_computations(&self) -> usize {
        self.signal.computations()
    }

    fn generate(&self) -> PipelineResult<Signal> {
        let p = self.params();
        if p.n_contacts == 0 {
            return Err(PipelineError::invalid("synthetic source needs at least one contact"));
        }
        let n_pts = (p.n_spikes as f64 * p.period_ms * p.sampling_rate / 1000.0) as usize;
        let width = ((p.spike_ms * p.sampling_rate / 1000.0) as usize).max(1);

        let mut data = Array2::<f64>::zeros((p.n_contacts, n_pts));
        for onset in p.onsets() {
            for i in onset..(onset + width).min(n_pts) {
                for c in 0..p.n_contacts {
                    data[[c, i]] += p.amplitude / (c + 1) as f64;
                }
            }
        }
        if p.noise > 0.0 {
            let mut rng = StdRng::seed_from_u64(p.seed);
            data.mapv_inplace(|x| x + rng.gen_range(-p.noise..=p.noise));
        }

        debug!(n_pts, n_contacts = p.n_contacts, "synthetic signal generated");
        Signal::new(data, p.sampling_rate).map_err(|e| PipelineError::invalid(e.to_string()))
    }
}

impl SignalSource for SyntheticSource {
    fn signal(&self) -> PipelineResult<Arc<Signal>> {
        self.signal.get_or_compute(self.node.revision(), || self.generate())
    }
}

impl EventSource for SyntheticSource {
    fn events(&self) -> PipelineResult<Arc<SpikeTrain>> {
        self.events.get_or_compute(self.node.revision(), || {
            let p = self.params();
            let times = p
                .onsets()
                .into_iter()
                .map(|idx| (idx as f64 + 0.5) * 1000.0 / p.sampling_rate)
                .collect();
            Ok(SpikeTrain::new(times, p.sampling_rate))
        })
    }
}

crate::impl_component!(SyntheticSource, signal, events);

#[derive(Default)]
pub struct SyntheticSourceFactory;

impl StageFactory for SyntheticSourceFactory {
    fn create(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>> {
        let params: SyntheticParams = parse_params(config)?;
        Ok(SyntheticSource::new(registry, params))
    }
}
