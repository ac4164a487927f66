//! Waveform snippet extraction stage.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use spike_types::SpikeWaves;
use spike_units::{extract_spikes, SpikeWindow};
use tracing::debug;

use crate::component::{lock, Cached, Component, ComponentNode, SpikeSource};
use crate::config::StageConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::factory::{parse_params, StageFactory};
use crate::registry::Registry;

const KIND: &str = "spike_extractor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorParams {
    /// Window start relative to the event (ms, usually negative).
    pub pre_ms: f64,
    pub post_ms: f64,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        let window = SpikeWindow::default();
        Self {
            pre_ms: window.pre_ms,
            post_ms: window.post_ms,
        }
    }
}

/// Cuts a snippet around every event from the `events` role out of the
/// recording at the `signal` role.
pub struct SpikeExtractor {
    node: Arc<ComponentNode>,
    window: Mutex<SpikeWindow>,
    spikes: Cached<SpikeWaves>,
}

impl SpikeExtractor {
    pub fn new(registry: &Registry, window: SpikeWindow) -> Arc<Self> {
        Arc::new(Self {
            node: ComponentNode::new(
                KIND,
                registry,
                &[("signal", "SignalSource"), ("events", "SpikeMarkerSource")],
            ),
            window: Mutex::new(window),
            spikes: Cached::new(),
        })
    }

    pub fn window(&self) -> SpikeWindow {
        *lock(&self.window)
    }

    /// Replaces the snippet window. An empty window is rejected and leaves the
    /// current one in place.
    pub fn set_window(&self, pre_ms: f64, post_ms: f64) -> PipelineResult<()> {
        let window = SpikeWindow::new(pre_ms, post_ms).map_err(|e| PipelineError::invalid(e.to_string()))?;
        *lock(&self.window) = window;
        self.node.update();
        Ok(())
    }

    pub fn computations(&self) -> usize {
        self.spikes.computations()
    }

    fn extract(&self) -> PipelineResult<SpikeWaves> {
        let signal = self.node.signal("signal")?;
        let events = self.node.events("events")?;
        let waves = extract_spikes(&signal, &events, self.window())
            .map_err(|e| PipelineError::computation(KIND, e))?;
        debug!(
            n_spikes = waves.n_spikes(),
            n_events = events.len(),
            "waveforms extracted"
        );
        Ok(waves)
    }
}

impl SpikeSource for SpikeExtractor {
    fn spikes(&self) -> PipelineResult<Arc<SpikeWaves>> {
        self.spikes.get_or_compute(self.node.revision(), || self.extract())
    }
}

crate::impl_component!(SpikeExtractor, spikes);

#[derive(Default)]
pub struct SpikeExtractorFactory;

impl StageFactory for SpikeExtractorFactory {
    fn create(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>> {
        let params: ExtractorParams = parse_params(config)?;
        let window = SpikeWindow::new(params.pre_ms, params.post_ms).map_err(|e| {
            PipelineError::invalid(format!("stage '{}': {}", config.name, e))
        })?;
        Ok(SpikeExtractor::new(registry, window))
    }

    fn roles(&self) -> &'static [&'static str] {
        &["signal", "events"]
    }
}
