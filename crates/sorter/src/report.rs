use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use spike_types::UNCLASSIFIED;

/// Cluster sizes of one sorting run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub pipeline: String,
    pub n_spikes: usize,
    pub unclassified: usize,
    /// Label -> number of spikes, excluding unclassified spikes.
    pub clusters: BTreeMap<u32, usize>,
}

impl Report {
    pub fn from_labels(pipeline: &str, labels: &[u32]) -> Self {
        let mut clusters = BTreeMap::new();
        let mut unclassified = 0;
        for &label in labels {
            if label == UNCLASSIFIED {
                unclassified += 1;
            } else {
                *clusters.entry(label).or_insert(0) += 1;
            }
        }
        Self {
            pipeline: pipeline.to_string(),
            n_spikes: labels.len(),
            unclassified,
            clusters,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline: {}", self.pipeline)?;
        writeln!(f, "spikes:   {}", self.n_spikes)?;
        for (label, count) in &self.clusters {
            writeln!(f, "  cell {label:>3}: {count}")?;
        }
        if self.unclassified > 0 {
            writeln!(f, "  unclassified: {}", self.unclassified)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_cluster() {
        let report = Report::from_labels("demo", &[1, 2, 2, 0, 3, 2]);
        assert_eq!(report.n_spikes, 6);
        assert_eq!(report.unclassified, 1);
        assert_eq!(report.clusters.get(&2), Some(&3));
        assert_eq!(report.clusters.len(), 3);

        let text = report.to_string();
        assert!(text.contains("cell   2: 3"));
        assert!(text.contains("unclassified: 1"));
    }

    #[test]
    fn test_json_shape() {
        let report = Report::from_labels("demo", &[1, 1]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["clusters"]["1"], 2);
        assert_eq!(value["n_spikes"], 2);
    }
}
