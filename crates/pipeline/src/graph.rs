//! Pipeline construction from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::component::Component;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::factory::StageRegistry;
use crate::registry::Registry;

/// The components built from one [`PipelineConfig`], all provided into a
/// registry under their stage names.
pub struct Pipeline {
    registry: Registry,
    components: HashMap<String, Arc<dyn Component>>,
    order: Vec<String>,
}

impl Pipeline {
    /// Validates `config`, creates every enabled stage and provides it under
    /// its name, inputs first.
    ///
    /// Nothing is computed here; the first read of a terminal stage pulls the
    /// whole chain.
    pub fn build(config: &PipelineConfig, stages: &StageRegistry, registry: &Registry) -> PipelineResult<Self> {
        config.validate()?;

        let mut components = HashMap::new();
        let mut order = Vec::new();
        for stage_config in config.topological_order()? {
            let component = stages.create_stage(stage_config, registry)?;
            registry.provide(stage_config.name.clone(), component.clone());
            components.insert(stage_config.name.clone(), component);
            order.push(stage_config.name.clone());
        }

        info!(
            pipeline = %config.metadata.name,
            stages = ?order,
            "pipeline built"
        );
        Ok(Self {
            registry: registry.clone(),
            components,
            order,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Stage names, inputs first.
    pub fn stage_names(&self) -> &[String] {
        &self.order
    }

    /// The component built for stage `name`.
    pub fn component(&self, name: &str) -> PipelineResult<&Arc<dyn Component>> {
        self.components.get(name).ok_or_else(|| PipelineError::NameNotFound {
            name: name.to_string(),
        })
    }

    /// The last stage in topological order.
    pub fn terminal(&self) -> PipelineResult<&Arc<dyn Component>> {
        let name = self
            .order
            .last()
            .ok_or_else(|| PipelineError::invalid("pipeline has no stages"))?;
        self.component(name)
    }

    /// Invalidates stage `name` and everything downstream of it.
    ///
    /// Nothing about the stage's settings changes, so the next reads recompute
    /// the same values; use the stage's own setters to change what it produces.
    pub fn update(&self, name: &str) -> PipelineResult<()> {
        self.component(name)?.update();
        Ok(())
    }
}
