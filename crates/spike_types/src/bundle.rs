//! The array capability shared by every functional-unit input.

use ndarray::{Array, ArrayViewD, Dimension};

use crate::data::{FeatureSet, Signal, SpikeTrain, SpikeWaves};

/// Anything that exposes a numeric `data` array.
///
/// Feature functions accept any bundle and dispatch on the array rank:
/// 1-D timestamps, 2-D `(n_spikes, n_contacts)` or 3-D
/// `(n_samples, n_spikes, n_contacts)` waveforms.
pub trait ArrayBundle {
    fn data(&self) -> ArrayViewD<'_, f64>;

    fn ndim(&self) -> usize {
        self.data().ndim()
    }
}

impl ArrayBundle for Signal {
    fn data(&self) -> ArrayViewD<'_, f64> {
        self.data.view().into_dyn()
    }
}

impl ArrayBundle for SpikeTrain {
    fn data(&self) -> ArrayViewD<'_, f64> {
        self.times.view().into_dyn()
    }
}

impl ArrayBundle for SpikeWaves {
    fn data(&self) -> ArrayViewD<'_, f64> {
        self.data.view().into_dyn()
    }
}

impl ArrayBundle for FeatureSet {
    fn data(&self) -> ArrayViewD<'_, f64> {
        self.data.view().into_dyn()
    }
}

impl<D: Dimension> ArrayBundle for Array<f64, D> {
    fn data(&self) -> ArrayViewD<'_, f64> {
        self.view().into_dyn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};

    #[test]
    fn test_bundles_report_rank() {
        let train = SpikeTrain::new(vec![1.0, 2.0], 1000.0);
        assert_eq!(train.ndim(), 1);

        let waves = Array3::<f64>::zeros((5, 3, 2));
        assert_eq!(waves.ndim(), 3);
        assert_eq!(ArrayBundle::data(&waves).shape(), &[5, 3, 2]);

        let times = Array1::from(vec![0.5]);
        assert_eq!(ArrayBundle::data(&times).len(), 1);
    }
}
