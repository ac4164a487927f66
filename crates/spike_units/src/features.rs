//! Feature functions computed from spike waveforms or spike times.
//!
//! Each function turns an [`ArrayBundle`] into a [`FeatureBlock`] of columns
//! with matching names. Waveform bundles are either 3-D
//! `(n_samples, n_spikes, n_contacts)` or 2-D `(n_samples, n_spikes)` for a
//! single contact. [`combine`] joins blocks into one [`FeatureSet`].

use ndarray::{concatenate, Array2, ArrayView2, ArrayView3, Axis, Ix2, Ix3};
use spike_types::{ArrayBundle, FeatureBlock, FeatureSet};

use crate::error::{UnitError, UnitResult};
use crate::pca::pca;

/// Views a waveform bundle as `(n_samples, n_spikes, n_contacts)`.
fn waveforms<'a>(bundle: &'a dyn ArrayBundle) -> UnitResult<ArrayView3<'a, f64>> {
    let data = bundle.data();
    match data.ndim() {
        3 => Ok(data.into_dimensionality::<Ix3>().map_err(shape_err)?),
        2 => {
            let two: ArrayView2<'a, f64> = data.into_dimensionality::<Ix2>().map_err(shape_err)?;
            Ok(two.insert_axis(Axis(2)))
        }
        rank => Err(UnitError::UnsupportedRank {
            rank,
            expected: "2 or 3",
        }),
    }
}

fn shape_err(err: ndarray::ShapeError) -> UnitError {
    UnitError::BadParam(err.to_string())
}

/// Peak-to-peak amplitude of every spike on every contact.
///
/// Names: `Ch0:P2P`, `Ch1:P2P`, ...
pub fn p2p(bundle: &dyn ArrayBundle) -> UnitResult<FeatureBlock> {
    let waves = waveforms(bundle)?;
    let (n_pts, n_spikes, n_contacts) = waves.dim();
    if n_pts == 0 {
        return Err(UnitError::EmptyInput("waveforms have no samples".to_string()));
    }

    let mut out = Array2::zeros((n_spikes, n_contacts));
    for s in 0..n_spikes {
        for c in 0..n_contacts {
            let lane = waves.slice(ndarray::s![.., s, c]);
            let max = lane.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
            let min = lane.fold(f64::INFINITY, |m, &x| m.min(x));
            out[[s, c]] = max - min;
        }
    }

    let names = (0..n_contacts).map(|c| format!("Ch{c}:P2P")).collect();
    Ok(FeatureBlock::new(out, names)?)
}

/// Whitened principal-component scores per contact.
///
/// Columns are channel-major: `Ch0:PC0, Ch0:PC1, Ch1:PC0, ...`.
pub fn pcs(bundle: &dyn ArrayBundle, ncomps: usize) -> UnitResult<FeatureBlock> {
    let waves = waveforms(bundle)?;
    let (_, n_spikes, n_contacts) = waves.dim();

    let mut out = Array2::zeros((n_spikes, n_contacts * ncomps));
    let mut names = Vec::with_capacity(n_contacts * ncomps);
    for c in 0..n_contacts {
        // (n_samples, n_spikes): samples are variables, spikes observations.
        let contact = waves.index_axis(Axis(2), c);
        let result = pca(contact, ncomps)?;
        for i in 0..ncomps {
            out.column_mut(c * ncomps + i).assign(&result.scores.row(i));
            names.push(format!("Ch{c}:PC{i}"));
        }
    }

    Ok(FeatureBlock::new(out, names)?)
}

/// Sequential spike index `0, 1, 2, ...`.
pub fn spike_index(bundle: &dyn ArrayBundle) -> UnitResult<FeatureBlock> {
    let waves = waveforms(bundle)?;
    let n_spikes = waves.len_of(Axis(1));
    let data = Array2::from_shape_fn((n_spikes, 1), |(i, _)| i as f64);
    Ok(FeatureBlock::new(data, vec!["SpIdx".to_string()])?)
}

/// Spike occurrence time in milliseconds, from a 1-D timestamp bundle.
pub fn spike_time(bundle: &dyn ArrayBundle) -> UnitResult<FeatureBlock> {
    let data = bundle.data();
    if data.ndim() != 1 {
        return Err(UnitError::UnsupportedRank {
            rank: data.ndim(),
            expected: "1",
        });
    }
    let n = data.len();
    let column = data
        .to_owned()
        .into_shape((n, 1))
        .map_err(shape_err)?;
    Ok(FeatureBlock::new(column, vec!["SpTime".to_string()])?)
}

/// Concatenates feature blocks column-wise, keeping names aligned.
///
/// With `normalize`, every column is independently rescaled to `[0, 1]` using
/// the combined matrix's min and max; constant columns become zero.
pub fn combine(blocks: &[FeatureBlock], normalize: bool) -> UnitResult<FeatureSet> {
    let first = blocks
        .first()
        .ok_or_else(|| UnitError::EmptyInput("no feature blocks to combine".to_string()))?;
    let n_rows = first.data.nrows();
    if let Some(bad) = blocks.iter().find(|b| b.data.nrows() != n_rows) {
        return Err(UnitError::RowMismatch {
            left: n_rows,
            right: bad.data.nrows(),
        });
    }

    let views: Vec<_> = blocks.iter().map(|b| b.data.view()).collect();
    let mut data = concatenate(Axis(1), &views).map_err(shape_err)?;
    let names = blocks.iter().flat_map(|b| b.names.iter().cloned()).collect();

    if normalize && n_rows > 0 {
        for mut column in data.columns_mut() {
            let min = column.fold(f64::INFINITY, |m, &x| m.min(x));
            let max = column.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
            let range = max - min;
            if range > 0.0 {
                column.mapv_inplace(|x| (x - min) / range);
            } else {
                column.mapv_inplace(|_| 0.0);
            }
        }
    }

    Ok(FeatureSet::new(data, names)?)
}
