//! Manual edits of cluster label arrays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spike_types::{Labels, UNCLASSIFIED};

/// One manual curation step applied on top of a clustering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "cells", rename_all = "snake_case")]
pub enum LabelEdit {
    /// Move the members of these cells to [`UNCLASSIFIED`].
    Delete(Vec<u32>),
    /// Relabel these cells to the smallest of them.
    Merge(Vec<u32>),
    /// Renumber the surviving cells to `1..=m`.
    Relabel,
}

impl LabelEdit {
    pub fn apply(&self, labels: &mut [u32]) {
        match self {
            LabelEdit::Delete(cells) => delete_cells(labels, cells),
            LabelEdit::Merge(cells) => merge_cells(labels, cells),
            LabelEdit::Relabel => relabel(labels),
        }
    }
}

/// Applies `edits` in order to a copy of `base`.
pub fn apply_edits(base: &[u32], edits: &[LabelEdit]) -> Labels {
    let mut labels = base.to_vec();
    for edit in edits {
        edit.apply(&mut labels);
    }
    labels
}

pub fn delete_cells(labels: &mut [u32], cells: &[u32]) {
    for label in labels.iter_mut() {
        if cells.contains(label) {
            *label = UNCLASSIFIED;
        }
    }
}

pub fn merge_cells(labels: &mut [u32], cells: &[u32]) {
    let Some(&target) = cells.iter().min() else {
        return;
    };
    for label in labels.iter_mut() {
        if cells.contains(label) {
            *label = target;
        }
    }
}

/// Renumbers the distinct non-zero labels to `1..=m` in ascending label order.
///
/// `0` stays unclassified and relative order of the cells is preserved, so
/// relabeling twice is the same as relabeling once.
pub fn relabel(labels: &mut [u32]) {
    let mut mapping = BTreeMap::new();
    for &label in labels.iter() {
        if label != UNCLASSIFIED {
            mapping.insert(label, 0u32);
        }
    }
    for (next, id) in mapping.values_mut().enumerate() {
        *id = next as u32 + 1;
    }
    for label in labels.iter_mut() {
        if let Some(&id) = mapping.get(label) {
            *label = id;
        }
    }
}
