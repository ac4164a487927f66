//! Named provider slots shared by all components of a pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use lazy_static::lazy_static;
use tracing::info;

use crate::component::{lock, same_instance, Component};
use crate::error::{PipelineError, PipelineResult};

#[derive(Default)]
pub(crate) struct RegistryInner {
    slots: Mutex<HashMap<String, Arc<dyn Component>>>,
}

/// Maps slot names to live component instances.
///
/// Cloning a `Registry` yields another handle to the same slots. Components
/// keep only a weak handle, so dropping every `Registry` clone drops the
/// instances it holds.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

/// Non-owning handle kept by component nodes.
#[derive(Clone, Default)]
pub struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.0.upgrade().map(|inner| Registry { inner })
    }
}

lazy_static! {
    static ref GLOBAL: Registry = Registry::new();
}

/// The process-wide registry.
///
/// Call [`Registry::reset`] between independent scenarios.
pub fn global() -> &'static Registry {
    &GLOBAL
}

impl Registry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    /// Installs `instance` at `name`.
    ///
    /// If a different instance held the slot, every component that resolved it
    /// through this slot is detached and invalidated (transitively) before
    /// this returns.
    pub fn provide(&self, name: impl Into<String>, instance: Arc<dyn Component>) {
        let name = name.into();
        let previous = lock(&self.inner.slots).insert(name.clone(), instance.clone());
        match previous {
            None => info!(slot = %name, kind = instance.kind(), "provider registered"),
            Some(old) if same_instance(Arc::as_ptr(&old), Arc::as_ptr(&instance)) => {}
            Some(old) => {
                info!(slot = %name, old = old.kind(), new = instance.kind(), "provider replaced");
                Self::detach(&name, &old);
            }
        }
    }

    /// Looks up the instance at `name`. Does not subscribe anything.
    pub fn resolve(&self, name: &str) -> PipelineResult<Arc<dyn Component>> {
        lock(&self.inner.slots)
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::NameNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.inner.slots).contains_key(name)
    }

    /// Slot names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.slots).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every slot.
    ///
    /// Components that had resolved a dropped instance forget it and are
    /// invalidated; their next read re-resolves against the (now empty)
    /// registry.
    pub fn reset(&self) {
        let drained: Vec<(String, Arc<dyn Component>)> = lock(&self.inner.slots).drain().collect();
        for (name, old) in &drained {
            Self::detach(name, old);
        }
        info!(dropped = drained.len(), "registry reset");
    }

    fn detach(name: &str, old: &Arc<dyn Component>) {
        for subscriber in old.node().live_subscribers() {
            subscriber.forget_slot(name, old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Cached, ComponentNode};

    struct Leaf {
        node: Arc<ComponentNode>,
    }

    struct Reader {
        node: Arc<ComponentNode>,
        out: Cached<u64>,
    }

    impl Component for Leaf {
        fn node(&self) -> &Arc<ComponentNode> {
            &self.node
        }
    }

    impl Component for Reader {
        fn node(&self) -> &Arc<ComponentNode> {
            &self.node
        }
    }

    impl Reader {
        fn read(&self) -> PipelineResult<Arc<u64>> {
            self.out.get_or_compute(self.node.revision(), || {
                let input = self.node.dependency("input")?;
                Ok(input.node().revision())
            })
        }
    }

    fn leaf(registry: &Registry) -> Arc<Leaf> {
        Arc::new(Leaf {
            node: ComponentNode::new("leaf", registry, &[]),
        })
    }

    fn reader(registry: &Registry, slot: &str) -> Arc<Reader> {
        Arc::new(Reader {
            node: ComponentNode::new("reader", registry, &[("input", slot)]),
            out: Cached::new(),
        })
    }

    #[test]
    fn test_resolve_unknown_name() {
        let registry = Registry::new();
        let err = registry.resolve("SignalSource").err().unwrap();
        assert!(matches!(err, PipelineError::NameNotFound { ref name } if name == "SignalSource"));
    }

    #[test]
    fn test_provide_and_resolve() {
        let registry = Registry::new();
        let a = leaf(&registry);
        registry.provide("A", a.clone());
        assert!(registry.contains("A"));
        let found = registry.resolve("A").unwrap();
        assert!(same_instance(Arc::as_ptr(&found), Arc::as_ptr(&a)));
        assert_eq!(registry.names(), vec!["A".to_string()]);
    }

    #[test]
    fn test_replace_invalidates_only_resolvers() {
        let registry = Registry::new();
        registry.provide("A", leaf(&registry));
        registry.provide("B", leaf(&registry));
        let on_a = reader(&registry, "A");
        let on_b = reader(&registry, "B");
        on_a.read().unwrap();
        on_b.read().unwrap();

        registry.provide("A", leaf(&registry));

        assert!(on_a.out.is_dirty(on_a.node.revision()));
        assert!(!on_b.out.is_dirty(on_b.node.revision()));
        on_a.read().unwrap();
        assert_eq!(on_a.out.computations(), 2);
        assert_eq!(on_b.out.computations(), 1);
    }

    #[test]
    fn test_replace_with_same_instance_is_silent() {
        let registry = Registry::new();
        let a = leaf(&registry);
        registry.provide("A", a.clone());
        let r = reader(&registry, "A");
        r.read().unwrap();
        registry.provide("A", a.clone());
        assert!(!r.out.is_dirty(r.node.revision()));
    }

    #[test]
    fn test_reset_detaches_subscribers() {
        let registry = Registry::new();
        let a = leaf(&registry);
        registry.provide("A", a.clone());
        let r = reader(&registry, "A");
        r.read().unwrap();
        assert_eq!(a.node.subscriber_count(), 1);

        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(a.node.subscriber_count(), 0);
        let err = r.read().unwrap_err();
        assert!(matches!(err, PipelineError::NameNotFound { .. }));
    }

    #[test]
    fn test_dropped_registry_surfaces_as_missing_name() {
        let r = {
            let registry = Registry::new();
            reader(&registry, "A")
        };
        assert!(matches!(r.read(), Err(PipelineError::NameNotFound { .. })));
    }
}
