use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

/// Errors raised when a data bundle is assembled from inconsistent parts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("expected {expected} names for {expected} feature columns, got {actual}")]
    NameCount { expected: usize, actual: usize },
    #[error("time axis has {actual} points but waveforms have {expected} samples per spike")]
    TimeAxis { expected: usize, actual: usize },
    #[error("{actual} event times for {expected} spikes")]
    EventCount { expected: usize, actual: usize },
    #[error("sampling rate must be positive, got {0}")]
    SamplingRate(f64),
}

/// A raw multichannel recording.
///
/// `data` is shaped `(n_contacts, n_samples)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub data: Array2<f64>,
    /// Sampling rate in Hz.
    pub sampling_rate: f64,
}

impl Signal {
    pub fn new(data: Array2<f64>, sampling_rate: f64) -> Result<Self, ShapeError> {
        if !(sampling_rate > 0.0) {
            return Err(ShapeError::SamplingRate(sampling_rate));
        }
        Ok(Self { data, sampling_rate })
    }

    pub fn n_contacts(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Duration of the recording in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.n_samples() as f64 * 1000.0 / self.sampling_rate
    }
}

/// Detected spike events.
///
/// Times are in milliseconds and non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeTrain {
    pub times: Array1<f64>,
    pub sampling_rate: f64,
}

impl SpikeTrain {
    pub fn new(times: Vec<f64>, sampling_rate: f64) -> Self {
        Self {
            times: Array1::from(times),
            sampling_rate,
        }
    }

    pub fn empty(sampling_rate: f64) -> Self {
        Self::new(Vec::new(), sampling_rate)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Waveform snippets cut around spike events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeWaves {
    /// Shaped `(samples_per_spike, n_spikes, n_contacts)`.
    pub data: Array3<f64>,
    /// Time of every snippet sample relative to its event, in ms.
    pub time: Array1<f64>,
    pub sampling_rate: f64,
    /// Event times of the spikes that were actually cut.
    pub event_times: Array1<f64>,
}

impl SpikeWaves {
    pub fn new(
        data: Array3<f64>,
        time: Array1<f64>,
        sampling_rate: f64,
        event_times: Array1<f64>,
    ) -> Result<Self, ShapeError> {
        let (n_pts, n_spikes, _) = data.dim();
        if time.len() != n_pts {
            return Err(ShapeError::TimeAxis {
                expected: n_pts,
                actual: time.len(),
            });
        }
        if event_times.len() != n_spikes {
            return Err(ShapeError::EventCount {
                expected: n_spikes,
                actual: event_times.len(),
            });
        }
        Ok(Self {
            data,
            time,
            sampling_rate,
            event_times,
        })
    }

    pub fn n_spikes(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn n_contacts(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn samples_per_spike(&self) -> usize {
        self.data.len_of(Axis(0))
    }
}

/// One block of feature columns produced by a single feature function.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBlock {
    /// Shaped `(n_spikes, n_columns)`.
    pub data: Array2<f64>,
    pub names: Vec<String>,
}

impl FeatureBlock {
    pub fn new(data: Array2<f64>, names: Vec<String>) -> Result<Self, ShapeError> {
        if names.len() != data.ncols() {
            return Err(ShapeError::NameCount {
                expected: data.ncols(),
                actual: names.len(),
            });
        }
        Ok(Self { data, names })
    }
}

/// The combined feature matrix handed to clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Shaped `(n_spikes, n_features)`.
    pub data: Array2<f64>,
    /// Column labels, index-aligned with `data` columns.
    pub names: Vec<String>,
}

impl FeatureSet {
    pub fn new(data: Array2<f64>, names: Vec<String>) -> Result<Self, ShapeError> {
        if names.len() != data.ncols() {
            return Err(ShapeError::NameCount {
                expected: data.ncols(),
                actual: names.len(),
            });
        }
        Ok(Self { data, names })
    }

    pub fn n_spikes(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Column index of the feature called `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl From<FeatureBlock> for FeatureSet {
    fn from(block: FeatureBlock) -> Self {
        Self {
            data: block.data,
            names: block.names,
        }
    }
}

/// Label reserved for spikes that belong to no cell.
pub const UNCLASSIFIED: u32 = 0;

/// One cluster label per spike.
pub type Labels = Vec<u32>;
