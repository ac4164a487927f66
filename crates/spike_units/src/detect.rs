//! Threshold-crossing spike detection with a refractory window.

use serde::{Deserialize, Serialize};
use spike_types::{Signal, SpikeTrain};

use crate::error::{UnitError, UnitResult};

/// Direction of the threshold crossing that counts as a spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Signal goes from below to at-or-above the threshold.
    #[default]
    Rising,
    /// Signal goes from above to at-or-below the threshold.
    Falling,
}

/// Parameters of a single detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectParams {
    pub threshold: f64,
    pub polarity: Polarity,
    /// Contact (channel) scanned for crossings.
    pub contact: usize,
    /// Detections closer than this to the previous one are suppressed (ms).
    pub refractory_ms: f64,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            polarity: Polarity::Rising,
            contact: 0,
            refractory_ms: 1.0,
        }
    }
}

/// Noise-based threshold: `multiplier * median(|x|) / 0.6745` on one contact.
pub fn auto_threshold(signal: &Signal, contact: usize, multiplier: f64) -> UnitResult<f64> {
    check_contact(signal, contact)?;
    let mut magnitudes: Vec<f64> = signal.data.row(contact).iter().map(|x| x.abs()).collect();
    if magnitudes.is_empty() {
        return Err(UnitError::EmptyInput("signal has no samples".to_string()));
    }
    magnitudes.sort_by(|a, b| a.total_cmp(b));
    let mid = magnitudes.len() / 2;
    let median = if magnitudes.len() % 2 == 0 {
        (magnitudes[mid - 1] + magnitudes[mid]) / 2.0
    } else {
        magnitudes[mid]
    };
    Ok(multiplier * median / 0.6745)
}

/// Scans one contact of `signal` for threshold crossings.
///
/// Event times are sample indices converted to milliseconds and are emitted in
/// time order. A signal without crossings yields an empty train.
pub fn detect_spikes(signal: &Signal, params: &DetectParams) -> UnitResult<SpikeTrain> {
    check_contact(signal, params.contact)?;
    if params.refractory_ms < 0.0 {
        return Err(UnitError::BadParam(format!(
            "refractory window must be non-negative, got {}",
            params.refractory_ms
        )));
    }

    let fs = signal.sampling_rate;
    let trace = signal.data.row(params.contact);
    let thresh = params.threshold;

    let mut times = Vec::new();
    let mut last: Option<f64> = None;
    for i in 1..trace.len() {
        let (prev, cur) = (trace[i - 1], trace[i]);
        let crossed = match params.polarity {
            Polarity::Rising => prev < thresh && cur >= thresh,
            Polarity::Falling => prev > thresh && cur <= thresh,
        };
        if !crossed {
            continue;
        }
        let t = i as f64 * 1000.0 / fs;
        if let Some(prev_t) = last {
            if t - prev_t < params.refractory_ms {
                continue;
            }
        }
        times.push(t);
        last = Some(t);
    }

    tracing::trace!(n_events = times.len(), thresh, "threshold scan finished");
    Ok(SpikeTrain::new(times, fs))
}

fn check_contact(signal: &Signal, contact: usize) -> UnitResult<()> {
    if contact >= signal.n_contacts() {
        return Err(UnitError::ContactOutOfRange {
            contact,
            n_contacts: signal.n_contacts(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn pulses(positions: &[usize], width: usize, amp: f64, n: usize) -> Signal {
        let mut data = Array2::zeros((1, n));
        for &p in positions {
            for i in p..(p + width).min(n) {
                data[[0, i]] = amp;
            }
        }
        Signal::new(data, 1000.0).unwrap()
    }

    #[test]
    fn test_rising_crossings() {
        let signal = pulses(&[10, 50, 90], 5, 100.0, 120);
        let params = DetectParams {
            threshold: 50.0,
            ..Default::default()
        };
        let train = detect_spikes(&signal, &params).unwrap();
        assert_eq!(train.times.to_vec(), vec![10.0, 50.0, 90.0]);
    }

    #[test]
    fn test_falling_polarity() {
        let signal = pulses(&[10], 5, -100.0, 40);
        let params = DetectParams {
            threshold: -50.0,
            polarity: Polarity::Falling,
            ..Default::default()
        };
        let train = detect_spikes(&signal, &params).unwrap();
        assert_eq!(train.times.to_vec(), vec![10.0]);
    }

    #[test]
    fn test_refractory_window_suppresses_close_events() {
        // Pulses 3 ms apart with a 5 ms refractory window.
        let signal = pulses(&[10, 13, 30], 1, 100.0, 40);
        let params = DetectParams {
            threshold: 50.0,
            refractory_ms: 5.0,
            ..Default::default()
        };
        let train = detect_spikes(&signal, &params).unwrap();
        assert_eq!(train.times.to_vec(), vec![10.0, 30.0]);
    }

    #[test]
    fn test_no_crossings_is_empty() {
        let signal = pulses(&[10], 5, 100.0, 40);
        let params = DetectParams {
            threshold: 200.0,
            ..Default::default()
        };
        assert!(detect_spikes(&signal, &params).unwrap().is_empty());
    }

    #[test]
    fn test_contact_out_of_range() {
        let signal = pulses(&[10], 5, 100.0, 40);
        let params = DetectParams {
            contact: 3,
            ..Default::default()
        };
        assert!(matches!(
            detect_spikes(&signal, &params),
            Err(UnitError::ContactOutOfRange { contact: 3, n_contacts: 1 })
        ));
    }

    #[test]
    fn test_auto_threshold_uses_median() {
        let data = Array2::from_shape_vec((1, 5), vec![-1.0, 2.0, -3.0, 4.0, 5.0]).unwrap();
        let signal = Signal::new(data, 1000.0).unwrap();
        let thresh = auto_threshold(&signal, 0, 0.6745).unwrap();
        assert!((thresh - 3.0).abs() < 1e-12);
    }
}
