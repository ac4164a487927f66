//! Threshold spike detector stage.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use spike_types::SpikeTrain;
use spike_units::{auto_threshold, detect_spikes, DetectParams, Polarity};
use tracing::debug;

use crate::component::{lock, Cached, Component, ComponentNode, EventSource};
use crate::config::StageConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::factory::{parse_params, StageFactory};
use crate::registry::Registry;

const KIND: &str = "spike_detector";

/// Detection threshold, either in signal units or derived from the noise level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Fixed(f64),
    /// `multiplier` times the median-based noise estimate of the contact.
    Auto { multiplier: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorParams {
    pub threshold: Threshold,
    pub polarity: Polarity,
    pub contact: usize,
    pub refractory_ms: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold: Threshold::Auto { multiplier: 4.0 },
            polarity: Polarity::Rising,
            contact: 0,
            refractory_ms: 1.0,
        }
    }
}

/// Turns the recording at the `signal` role into spike event times.
pub struct SpikeDetector {
    node: Arc<ComponentNode>,
    params: Mutex<DetectorParams>,
    events: Cached<SpikeTrain>,
}

impl SpikeDetector {
    pub fn new(registry: &Registry, params: DetectorParams) -> Arc<Self> {
        Arc::new(Self {
            node: ComponentNode::new(KIND, registry, &[("signal", "SignalSource")]),
            params: Mutex::new(params),
            events: Cached::new(),
        })
    }

    /// A detector with a fixed threshold and default settings otherwise.
    pub fn with_threshold(registry: &Registry, threshold: f64) -> Arc<Self> {
        Self::new(
            registry,
            DetectorParams {
                threshold: Threshold::Fixed(threshold),
                ..Default::default()
            },
        )
    }

    pub fn params(&self) -> DetectorParams {
        lock(&self.params).clone()
    }

    pub fn set_threshold(&self, threshold: f64) {
        lock(&self.params).threshold = Threshold::Fixed(threshold);
        self.node.update();
    }

    pub fn set_auto_threshold(&self, multiplier: f64) {
        lock(&self.params).threshold = Threshold::Auto { multiplier };
        self.node.update();
    }

    pub fn set_polarity(&self, polarity: Polarity) {
        lock(&self.params).polarity = polarity;
        self.node.update();
    }

    pub fn set_contact(&self, contact: usize) {
        lock(&self.params).contact = contact;
        self.node.update();
    }

    pub fn set_refractory_ms(&self, refractory_ms: f64) {
        lock(&self.params).refractory_ms = refractory_ms;
        self.node.update();
    }

    pub fn computations(&self) -> usize {
        self.events.computations()
    }

    fn detect(&self) -> PipelineResult<SpikeTrain> {
        let signal = self.node.signal("signal")?;
        let p = self.params();
        let threshold = match p.threshold {
            Threshold::Fixed(value) => value,
            Threshold::Auto { multiplier } => auto_threshold(&signal, p.contact, multiplier)
                .map_err(|e| PipelineError::computation(KIND, e))?,
        };
        let params = DetectParams {
            threshold,
            polarity: p.polarity,
            contact: p.contact,
            refractory_ms: p.refractory_ms,
        };
        let events = detect_spikes(&signal, &params).map_err(|e| PipelineError::computation(KIND, e))?;
        debug!(threshold, n_events = events.len(), "spikes detected");
        Ok(events)
    }
}

impl EventSource for SpikeDetector {
    fn events(&self) -> PipelineResult<Arc<SpikeTrain>> {
        self.events.get_or_compute(self.node.revision(), || self.detect())
    }
}

crate::impl_component!(SpikeDetector, events);

#[derive(Default)]
pub struct SpikeDetectorFactory;

impl StageFactory for SpikeDetectorFactory {
    fn create(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>> {
        let params: DetectorParams = parse_params(config)?;
        Ok(SpikeDetector::new(registry, params))
    }

    fn roles(&self) -> &'static [&'static str] {
        &["signal"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::stages::{SyntheticParams, SyntheticSource};

    fn source(registry: &Registry) -> Arc<SyntheticSource> {
        let source = SyntheticSource::new(
            registry,
            SyntheticParams {
                n_spikes: 10,
                ..Default::default()
            },
        );
        registry.provide("SignalSource", source.clone());
        source
    }

    #[test]
    fn test_detects_every_box_spike() {
        let registry = Registry::new();
        let source = source(&registry);
        let detector = SpikeDetector::with_threshold(&registry, 50.0);

        let events = detector.events().unwrap();
        let truth = source.events().unwrap();
        assert_eq!(events.len(), truth.len());
        for (t, expected) in events.times.iter().zip(truth.times.iter()) {
            assert!((t - expected).abs() <= 0.04);
        }
    }

    #[test]
    fn test_missing_signal_fails_at_read() {
        let registry = Registry::new();
        let detector = SpikeDetector::with_threshold(&registry, 50.0);
        let err = detector.events().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotFound);
        assert!(err.to_string().contains("SignalSource"));
    }

    #[test]
    fn test_setting_threshold_recomputes() {
        let registry = Registry::new();
        source(&registry);
        let detector = SpikeDetector::with_threshold(&registry, 50.0);
        assert_eq!(detector.events().unwrap().len(), 8);
        detector.events().unwrap();
        assert_eq!(detector.computations(), 1);

        detector.set_threshold(200.0);
        assert!(detector.events().unwrap().is_empty());
        assert_eq!(detector.computations(), 2);
    }

    #[test]
    fn test_auto_threshold_on_box_spikes() {
        let registry = Registry::new();
        source(&registry);
        // Median of |x| is zero, so the level is zero and nothing rises from below it.
        let detector = SpikeDetector::new(&registry, DetectorParams::default());
        let events = detector.events().unwrap();
        assert!(events.is_empty());

        detector.set_polarity(Polarity::Falling);
        detector.set_threshold(50.0);
        let falling = detector.events().unwrap();
        assert_eq!(falling.len(), 8);
        assert!((falling.times[0] - 105.0).abs() <= 0.04);
    }

    #[test]
    fn test_bad_contact_is_a_computation_error() {
        let registry = Registry::new();
        source(&registry);
        let detector = SpikeDetector::with_threshold(&registry, 50.0);
        detector.set_contact(3);
        assert_eq!(detector.events().unwrap_err().kind(), ErrorKind::Computation);
    }

    #[test]
    fn test_threshold_params_from_yaml() {
        let fixed: DetectorParams = serde_yaml::from_str("threshold: 50").unwrap();
        assert_eq!(fixed.threshold, Threshold::Fixed(50.0));
        let auto: DetectorParams = serde_yaml::from_str("threshold: {multiplier: 5.0}\npolarity: falling").unwrap();
        assert_eq!(auto.threshold, Threshold::Auto { multiplier: 5.0 });
        assert_eq!(auto.polarity, Polarity::Falling);
    }
}
