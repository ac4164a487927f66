//! Stage factories for building components from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::component::Component;
use crate::config::StageConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::Registry;

/// Builds one kind of component from its stage configuration.
pub trait StageFactory: Send + Sync {
    /// Creates a new component bound to `registry`. It is not provided yet.
    fn create(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>>;

    /// Dependency roles in the order positional `inputs` are matched to them.
    fn roles(&self) -> &'static [&'static str] {
        &[]
    }
}

/// A registry for stage factories, keyed by stage type.
#[derive(Default)]
pub struct StageRegistry {
    factories: HashMap<String, Arc<dyn StageFactory>>,
}

impl StageRegistry {
    /// Creates a new, empty stage registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in stage type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::stages::register_builtin_stages(&mut registry);
        registry
    }

    /// Registers a new stage factory.
    pub fn register<F>(&mut self, stage_type: &str, factory: F)
    where
        F: StageFactory + 'static,
    {
        self.factories.insert(stage_type.to_string(), Arc::new(factory));
    }

    /// Creates a component from a config and wires its inputs.
    pub fn create_stage(&self, config: &StageConfig, registry: &Registry) -> PipelineResult<Arc<dyn Component>> {
        let factory = self
            .factories
            .get(&config.stage_type)
            .ok_or_else(|| PipelineError::UnknownStageType {
                stage_type: config.stage_type.clone(),
            })?;

        let roles = factory.roles();
        if config.inputs.len() > roles.len() {
            return Err(PipelineError::invalid(format!(
                "stage '{}' of type '{}' takes at most {} input(s), got {}",
                config.name,
                config.stage_type,
                roles.len(),
                config.inputs.len()
            )));
        }

        let component = factory.create(config, registry)?;
        for (role, input) in roles.iter().zip(&config.inputs) {
            component.node().connect(role, input)?;
        }
        Ok(component)
    }

    pub fn contains(&self, stage_type: &str) -> bool {
        self.factories.contains_key(stage_type)
    }

    /// Get all registered stage types
    pub fn stage_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort();
        types
    }
}

/// Deserializes a stage's `params` map into its typed parameter struct.
pub(crate) fn parse_params<P: DeserializeOwned>(config: &StageConfig) -> PipelineResult<P> {
    let value = serde_json::Value::Object(config.params.clone().into_iter().collect());
    serde_json::from_value(value).map_err(|e| {
        PipelineError::invalid(format!("stage '{}': bad params: {}", config.name, e))
    })
}
