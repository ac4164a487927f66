//! Pipeline configuration types and serialization

use std::collections::HashMap;
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Stage parameters as a flexible key-value map
pub type StageParams = HashMap<String, serde_json::Value>;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Configuration format version
    #[serde(default = "default_version")]
    pub version: String,
    /// Pipeline metadata
    #[serde(default)]
    pub metadata: PipelineMetadata,
    /// Stage definitions
    pub stages: Vec<StageConfig>,
}

/// Pipeline metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Pipeline name
    #[serde(default)]
    pub name: String,
    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,
    /// Author information
    #[serde(default)]
    pub author: Option<String>,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Individual stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name; the stage is provided under this registry slot
    pub name: String,
    /// Stage type identifier
    #[serde(rename = "type")]
    pub stage_type: String,
    /// Stage parameters
    #[serde(default)]
    pub params: StageParams,
    /// Slots this stage reads, matched positionally to its dependency roles
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Optional stage description
    #[serde(default)]
    pub description: Option<String>,
    /// Whether this stage is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Default value for stage enabled field
fn default_enabled() -> bool {
    true
}

impl PipelineConfig {
    /// Create a new pipeline configuration
    pub fn new(name: String, description: Option<String>) -> Self {
        Self {
            version: default_version(),
            metadata: PipelineMetadata {
                name,
                description,
                ..Default::default()
            },
            stages: vec![],
        }
    }

    /// Add a stage to the pipeline
    pub fn add_stage(&mut self, stage: StageConfig) -> PipelineResult<()> {
        if self.stages.iter().any(|s| s.name == stage.name) {
            return Err(PipelineError::invalid(format!(
                "Stage name '{}' already exists",
                stage.name
            )));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get a mutable reference to a stage by name
    pub fn get_stage_mut(&mut self, name: &str) -> Option<&mut StageConfig> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Enabled stages in declaration order.
    pub fn enabled_stages(&self) -> impl Iterator<Item = &StageConfig> {
        self.stages.iter().filter(|s| s.enabled)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.enabled_stages().next().is_none() {
            return Err(PipelineError::invalid("Pipeline must contain at least one enabled stage"));
        }

        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(PipelineError::invalid(format!(
                    "Duplicate stage name found: {}",
                    stage.name
                )));
            }
        }

        for stage in self.enabled_stages() {
            for input in &stage.inputs {
                match self.get_stage(input) {
                    None => {
                        return Err(PipelineError::invalid(format!(
                            "Stage '{}' references non-existent input '{}'",
                            stage.name, input
                        )))
                    }
                    Some(source) if !source.enabled => {
                        return Err(PipelineError::invalid(format!(
                            "Stage '{}' references disabled input '{}'",
                            stage.name, input
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Enabled stages in topological order (inputs first).
    pub fn topological_order(&self) -> PipelineResult<Vec<&StageConfig>> {
        let mut graph = DiGraph::<&StageConfig, ()>::new();
        let mut node_map = HashMap::new();

        for stage in self.enabled_stages() {
            let idx = graph.add_node(stage);
            node_map.insert(stage.name.as_str(), idx);
        }

        for stage in self.enabled_stages() {
            for input in &stage.inputs {
                if let (Some(&from), Some(&to)) = (node_map.get(input.as_str()), node_map.get(stage.name.as_str())) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(nodes) => Ok(nodes.into_iter().map(|idx| graph[idx]).collect()),
            Err(cycle) => Err(PipelineError::CyclicDependency {
                component: graph[cycle.node_id()].name.clone(),
                slot: graph[cycle.node_id()].inputs.join(", "),
            }),
        }
    }

    /// Load pipeline configuration from JSON
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load pipeline configuration from YAML
    pub fn from_yaml(yaml: &str) -> PipelineResult<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a `.json` file as JSON and anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Self::from_yaml(&text),
        }
    }

    /// Save pipeline configuration to JSON
    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl StageConfig {
    /// Create a new stage configuration
    pub fn new(name: String, stage_type: String, params: StageParams) -> Self {
        Self {
            name,
            stage_type,
            params,
            inputs: vec![],
            description: None,
            enabled: true,
        }
    }

    /// Add an input dependency
    pub fn add_input(&mut self, input: String) {
        self.inputs.push(input);
    }

    /// Sets one parameter, replacing any previous value.
    pub fn set_param(&mut self, key: &str, value: serde_json::Value) {
        self.params.insert(key.to_string(), value);
    }

    /// Set stage description
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    /// Set stage enabled state
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
