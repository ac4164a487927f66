use std::path::Path;

use anyhow::{bail, Context, Result};
use pipeline::{PipelineConfig, StageParams};
use serde_json::json;

/// Command-line adjustments applied to a loaded pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Replace every file-backed source with a synthetic recording.
    pub mock: bool,
    /// Number of clusters for every cluster analyzer.
    pub k: Option<usize>,
}

/// Load a pipeline configuration (YAML, or JSON by extension) from file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::from_file(path)
        .with_context(|| format!("Could not load pipeline configuration at '{}'", path.display()))?;
    tracing::info!(path = %path.display(), stages = config.stages.len(), "Loaded configuration");
    Ok(config)
}

pub fn apply_overrides(config: &mut PipelineConfig, overrides: &Overrides) -> Result<()> {
    if overrides.mock {
        for stage in config.stages.iter_mut().filter(|s| s.stage_type == "lab_file_source") {
            tracing::info!(stage = %stage.name, "Using synthetic data instead of recording files");
            stage.stage_type = "synthetic_source".to_string();
            stage.params = StageParams::new();
        }
    }

    if let Some(k) = overrides.k {
        let mut found = false;
        for stage in config.stages.iter_mut().filter(|s| s.stage_type == "cluster_analyzer") {
            stage.set_param("k", json!(k));
            found = true;
        }
        if !found {
            bail!("--k given but the pipeline has no cluster_analyzer stage");
        }
    }

    config.validate()?;
    Ok(())
}
