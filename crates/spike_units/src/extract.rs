//! Cutting fixed-width waveform snippets around spike events.

use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use spike_types::{Signal, SpikeTrain, SpikeWaves};

use crate::error::{UnitError, UnitResult};

/// Snippet window relative to each event, in milliseconds.
///
/// The window is half-open: `[pre_ms, post_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeWindow {
    pub pre_ms: f64,
    pub post_ms: f64,
}

impl Default for SpikeWindow {
    fn default() -> Self {
        Self {
            pre_ms: -0.2,
            post_ms: 0.8,
        }
    }
}

impl SpikeWindow {
    pub fn new(pre_ms: f64, post_ms: f64) -> UnitResult<Self> {
        if pre_ms >= post_ms {
            return Err(UnitError::BadParam(format!(
                "spike window [{pre_ms}, {post_ms}) is empty"
            )));
        }
        Ok(Self { pre_ms, post_ms })
    }

    /// Sample offsets `(start, stop)` of the window at sampling rate `fs`.
    pub fn offsets(&self, fs: f64) -> (i64, i64) {
        (
            (self.pre_ms * fs / 1000.0) as i64,
            (self.post_ms * fs / 1000.0) as i64,
        )
    }
}

/// Cuts one snippet per event from every contact of `signal`.
///
/// Events whose window would run past either end of the recording are
/// dropped; the retained event times are reported in the result.
pub fn extract_spikes(
    signal: &Signal,
    events: &SpikeTrain,
    window: SpikeWindow,
) -> UnitResult<SpikeWaves> {
    let fs = signal.sampling_rate;
    let (start, stop) = window.offsets(fs);
    if stop <= start {
        return Err(UnitError::BadParam(format!(
            "spike window [{}, {}) holds no samples at {} Hz",
            window.pre_ms, window.post_ms, fs
        )));
    }

    let n_samples = signal.n_samples() as i64;
    let kept: Vec<(i64, f64)> = events
        .times
        .iter()
        .filter(|t| t.is_finite())
        .map(|&t| ((t * fs / 1000.0) as i64, t))
        .filter(|&(idx, _)| match (idx.checked_add(start), idx.checked_add(stop)) {
            (Some(first), Some(end)) => first >= 0 && end <= n_samples,
            _ => false,
        })
        .collect();

    let dropped = events.len() - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, "events too close to the recording edges were skipped");
    }

    let n_pts = (stop - start) as usize;
    let n_contacts = signal.n_contacts();
    let mut data = Array3::zeros((n_pts, kept.len(), n_contacts));
    for (s, &(idx, _)) in kept.iter().enumerate() {
        let first = (idx + start) as usize;
        for c in 0..n_contacts {
            for k in 0..n_pts {
                data[[k, s, c]] = signal.data[[c, first + k]];
            }
        }
    }

    let time = Array1::from_iter((start..stop).map(|i| i as f64 * 1000.0 / fs));
    let event_times = Array1::from_iter(kept.iter().map(|&(_, t)| t));
    Ok(SpikeWaves::new(data, time, fs, event_times)?)
}
