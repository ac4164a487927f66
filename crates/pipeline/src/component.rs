//! Core component trait, lazy dependency resolution and cached outputs.
//!
//! Every pipeline stage owns an [`Arc<ComponentNode>`]. The node knows which
//! registry slots the stage reads (its dependency roles), resolves them on
//! first use, and subscribes the stage to whatever it resolved. Calling
//! [`ComponentNode::update`] bumps the node's revision and walks the
//! subscriber graph depth-first so every transitive dependent is stale before
//! its next read. Stage outputs live in [`Cached`] slots keyed by revision.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use spike_types::{FeatureSet, Labels, Signal, SpikeTrain, SpikeWaves};
use tracing::{debug, trace};

use crate::error::{PipelineError, PipelineResult};
use crate::registry::{Registry, WeakRegistry};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Core trait that all pipeline stages must implement
pub trait Component: Send + Sync {
    /// The stage's node in the invalidation graph.
    fn node(&self) -> &Arc<ComponentNode>;

    /// Get the unique name/identifier for this stage type
    fn kind(&self) -> &'static str {
        self.node().kind()
    }

    /// Marks every cached output of this stage and of all its dependents stale.
    fn update(&self) {
        self.node().update();
    }

    fn as_signal_source(&self) -> Option<&dyn SignalSource> {
        None
    }

    fn as_event_source(&self) -> Option<&dyn EventSource> {
        None
    }

    fn as_spike_source(&self) -> Option<&dyn SpikeSource> {
        None
    }

    fn as_feature_source(&self) -> Option<&dyn FeatureSource> {
        None
    }

    fn as_label_source(&self) -> Option<&dyn LabelSource> {
        None
    }
}

/// Provides a raw multichannel recording.
pub trait SignalSource {
    fn signal(&self) -> PipelineResult<Arc<Signal>>;
}

/// Provides spike event times.
pub trait EventSource {
    fn events(&self) -> PipelineResult<Arc<SpikeTrain>>;
}

/// Provides waveform snippets.
pub trait SpikeSource {
    fn spikes(&self) -> PipelineResult<Arc<SpikeWaves>>;
}

/// Provides a feature matrix.
pub trait FeatureSource {
    fn features(&self) -> PipelineResult<Arc<FeatureSet>>;
}

/// Provides cluster labels.
pub trait LabelSource {
    fn labels(&self) -> PipelineResult<Arc<Labels>>;
}

/// Identity of the object behind a (possibly fat) pointer.
pub(crate) fn same_instance<A: ?Sized, B: ?Sized>(a: *const A, b: *const B) -> bool {
    a as *const () == b as *const ()
}

struct Resolved {
    slot: String,
    provider: Arc<dyn Component>,
}

/// Dependency wiring, revision counters and subscribers of one component.
pub struct ComponentNode {
    kind: &'static str,
    registry: WeakRegistry,
    /// Declared role -> registry slot.
    dependencies: Mutex<BTreeMap<String, String>>,
    resolved: Mutex<BTreeMap<String, Resolved>>,
    subscribers: Mutex<Vec<Weak<ComponentNode>>>,
    /// Bumped on every invalidation.
    revision: AtomicU64,
    /// Bumped only when something this component reads changed.
    upstream_revision: AtomicU64,
}

impl fmt::Debug for ComponentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentNode")
            .field("kind", &self.kind)
            .field("dependencies", &*lock(&self.dependencies))
            .field("revision", &self.revision())
            .finish()
    }
}

impl ComponentNode {
    /// Declares a component and the registry slot each dependency role reads.
    ///
    /// Nothing is looked up here; the registry may not hold the providers yet.
    pub fn new(kind: &'static str, registry: &Registry, dependencies: &[(&str, &str)]) -> Arc<Self> {
        let dependencies = dependencies
            .iter()
            .map(|(role, slot)| (role.to_string(), slot.to_string()))
            .collect();
        Arc::new(Self {
            kind,
            registry: registry.downgrade(),
            dependencies: Mutex::new(dependencies),
            resolved: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            revision: AtomicU64::new(0),
            upstream_revision: AtomicU64::new(0),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn upstream_revision(&self) -> u64 {
        self.upstream_revision.load(Ordering::Acquire)
    }

    /// Registry slot currently wired to `role`.
    pub fn slot(&self, role: &str) -> Option<String> {
        lock(&self.dependencies).get(role).cloned()
    }

    pub fn roles(&self) -> Vec<String> {
        lock(&self.dependencies).keys().cloned().collect()
    }

    /// Rewires a declared role to another registry slot.
    pub fn connect(self: &Arc<Self>, role: &str, slot: &str) -> PipelineResult<()> {
        {
            let mut deps = lock(&self.dependencies);
            let current = deps.get_mut(role).ok_or_else(|| self.undeclared(role))?;
            if current == slot {
                return Ok(());
            }
            *current = slot.to_string();
        }
        let previous = lock(&self.resolved).remove(role);
        if let Some(previous) = previous {
            self.release(&previous.provider);
        }
        debug!(component = self.kind, role, slot, "dependency rewired");
        self.upstream_changed();
        Ok(())
    }

    /// Returns the provider behind `role`, resolving and subscribing on first use.
    pub fn dependency(self: &Arc<Self>, role: &str) -> PipelineResult<Arc<dyn Component>> {
        let slot = self.slot(role).ok_or_else(|| self.undeclared(role))?;
        if let Some(found) = lock(&self.resolved).get(role) {
            return Ok(found.provider.clone());
        }

        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| PipelineError::NameNotFound { name: slot.clone() })?;
        let provider = registry.resolve(&slot)?;

        let provider_node = provider.node();
        if same_instance(Arc::as_ptr(provider_node), Arc::as_ptr(self)) || self.reaches(provider_node) {
            return Err(PipelineError::CyclicDependency {
                component: self.kind.to_string(),
                slot,
            });
        }

        provider_node.subscribe(self);
        debug!(component = self.kind, role, slot = %slot, provider = provider.kind(), "dependency resolved");
        lock(&self.resolved).insert(
            role.to_string(),
            Resolved {
                slot,
                provider: provider.clone(),
            },
        );
        Ok(provider)
    }

    /// Reads the signal of the provider behind `role`.
    pub fn signal(self: &Arc<Self>, role: &str) -> PipelineResult<Arc<Signal>> {
        self.read(role, "a signal", |c| c.as_signal_source().map(|s| s.signal()))
    }

    pub fn events(self: &Arc<Self>, role: &str) -> PipelineResult<Arc<SpikeTrain>> {
        self.read(role, "spike events", |c| c.as_event_source().map(|s| s.events()))
    }

    pub fn spikes(self: &Arc<Self>, role: &str) -> PipelineResult<Arc<SpikeWaves>> {
        self.read(role, "spike waveforms", |c| c.as_spike_source().map(|s| s.spikes()))
    }

    pub fn features(self: &Arc<Self>, role: &str) -> PipelineResult<Arc<FeatureSet>> {
        self.read(role, "features", |c| c.as_feature_source().map(|s| s.features()))
    }

    pub fn labels(self: &Arc<Self>, role: &str) -> PipelineResult<Arc<Labels>> {
        self.read(role, "labels", |c| c.as_label_source().map(|s| s.labels()))
    }

    fn read<T>(
        self: &Arc<Self>,
        role: &str,
        capability: &'static str,
        get: impl FnOnce(&dyn Component) -> Option<PipelineResult<Arc<T>>>,
    ) -> PipelineResult<Arc<T>> {
        let provider = self.dependency(role)?;
        get(provider.as_ref()).unwrap_or_else(|| {
            Err(PipelineError::MissingCapability {
                slot: self.slot(role).unwrap_or_default(),
                capability,
            })
        })
    }

    /// Marks this component stale and notifies every subscriber, transitively.
    pub fn update(&self) {
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(component = self.kind, revision, "invalidated");
        for subscriber in self.live_subscribers() {
            subscriber.upstream_changed();
        }
    }

    /// Invalidation caused by something this component reads.
    pub(crate) fn upstream_changed(&self) {
        self.upstream_revision.fetch_add(1, Ordering::AcqRel);
        self.update();
    }

    /// Number of live components that resolved this one.
    pub fn subscriber_count(&self) -> usize {
        self.live_subscribers().len()
    }

    fn subscribe(&self, subscriber: &Arc<ComponentNode>) {
        let mut subs = lock(&self.subscribers);
        subs.retain(|w| w.strong_count() > 0);
        if !subs.iter().any(|w| same_instance(w.as_ptr(), Arc::as_ptr(subscriber))) {
            subs.push(Arc::downgrade(subscriber));
        }
    }

    fn unsubscribe(&self, subscriber: &ComponentNode) {
        lock(&self.subscribers)
            .retain(|w| w.strong_count() > 0 && !same_instance(w.as_ptr(), subscriber as *const ComponentNode));
    }

    pub(crate) fn live_subscribers(&self) -> Vec<Arc<ComponentNode>> {
        lock(&self.subscribers).iter().filter_map(Weak::upgrade).collect()
    }

    /// Drops every handle to `provider` obtained through `slot`.
    ///
    /// Called by the registry when that slot is replaced or reset.
    pub(crate) fn forget_slot(self: &Arc<Self>, slot: &str, provider: &Arc<dyn Component>) {
        let provider_ptr = Arc::as_ptr(provider);
        let (removed, still_held) = {
            let mut resolved = lock(&self.resolved);
            let before = resolved.len();
            resolved.retain(|_, r| !(r.slot == slot && same_instance(Arc::as_ptr(&r.provider), provider_ptr)));
            let still_held = resolved
                .values()
                .any(|r| same_instance(Arc::as_ptr(&r.provider), provider_ptr));
            (before != resolved.len(), still_held)
        };
        if !still_held {
            provider.node().unsubscribe(self);
        }
        if removed {
            debug!(component = self.kind, slot, "provider replaced");
            self.upstream_changed();
        }
    }

    fn release(self: &Arc<Self>, provider: &Arc<dyn Component>) {
        let provider_ptr = Arc::as_ptr(provider);
        let still_held = lock(&self.resolved)
            .values()
            .any(|r| same_instance(Arc::as_ptr(&r.provider), provider_ptr));
        if !still_held {
            provider.node().unsubscribe(self);
        }
    }

    /// True if `target` is this node or one of its transitive subscribers.
    fn reaches(&self, target: &ComponentNode) -> bool {
        let target = target as *const ComponentNode;
        let mut seen = HashSet::new();
        let mut stack = self.live_subscribers();
        while let Some(node) = stack.pop() {
            let ptr = Arc::as_ptr(&node);
            if ptr == target {
                return true;
            }
            if seen.insert(ptr as usize) {
                stack.extend(node.live_subscribers());
            }
        }
        false
    }

    fn undeclared(&self, role: &str) -> PipelineError {
        PipelineError::UndeclaredDependency {
            component: self.kind.to_string(),
            role: role.to_string(),
        }
    }
}

/// A memoised output of a component.
///
/// The value is clean while the revision it was computed at matches the
/// revision it is read at; anything else is dirty and recomputes.
pub struct Cached<T> {
    slot: Mutex<Option<(u64, Arc<T>)>>,
    computations: AtomicUsize,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            computations: AtomicUsize::new(0),
        }
    }
}

impl<T> Cached<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self, revision: u64) -> bool {
        !matches!(&*lock(&self.slot), Some((rev, _)) if *rev == revision)
    }

    /// Returns the stored value if clean at `revision`, otherwise recomputes it.
    ///
    /// A failed computation leaves the slot dirty.
    pub fn get_or_compute(
        &self,
        revision: u64,
        compute: impl FnOnce() -> PipelineResult<T>,
    ) -> PipelineResult<Arc<T>> {
        let mut slot = lock(&self.slot);
        if let Some((rev, value)) = &*slot {
            if *rev == revision {
                return Ok(value.clone());
            }
        }
        self.computations.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(compute()?);
        *slot = Some((revision, value.clone()));
        Ok(value)
    }

    /// Last computed value, clean or not.
    pub fn peek(&self) -> Option<Arc<T>> {
        lock(&self.slot).as_ref().map(|(_, v)| v.clone())
    }

    pub fn invalidate(&self) {
        *lock(&self.slot) = None;
    }

    /// How many times the value has been (re)computed.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        node: Arc<ComponentNode>,
        value: Cached<u64>,
    }

    impl Probe {
        fn new(registry: &Registry, deps: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                node: ComponentNode::new("probe", registry, deps),
                value: Cached::new(),
            })
        }

        fn value(&self) -> PipelineResult<Arc<u64>> {
            self.value.get_or_compute(self.node.revision(), || {
                let mut total = 1;
                for role in self.node.roles() {
                    let upstream = self.node.dependency(&role)?;
                    total += upstream.node().revision();
                }
                Ok(total)
            })
        }
    }

    impl Component for Probe {
        fn node(&self) -> &Arc<ComponentNode> {
            &self.node
        }
    }

    #[test]
    fn test_cached_memoizes_until_revision_moves() {
        let cached = Cached::new();
        assert!(cached.is_dirty(0));
        let a = cached.get_or_compute(0, || Ok(5)).unwrap();
        let b = cached.get_or_compute(0, || Ok(6)).unwrap();
        assert_eq!((*a, *b), (5, 5));
        assert_eq!(cached.computations(), 1);
        assert!(!cached.is_dirty(0));

        let c = cached.get_or_compute(1, || Ok(7)).unwrap();
        assert_eq!(*c, 7);
        assert_eq!(cached.computations(), 2);
    }

    #[test]
    fn test_failed_computation_stays_dirty() {
        let cached: Cached<u8> = Cached::new();
        let err = cached.get_or_compute(0, || Err(PipelineError::invalid("boom")));
        assert!(err.is_err());
        assert!(cached.is_dirty(0));
        assert!(cached.peek().is_none());
    }

    #[test]
    fn test_resolution_is_lazy() {
        let registry = Registry::new();
        let consumer = Probe::new(&registry, &[("input", "Upstream")]);
        // Built before the provider exists.
        let upstream = Probe::new(&registry, &[]);
        registry.provide("Upstream", upstream.clone());

        assert_eq!(upstream.node.subscriber_count(), 0);
        consumer.value().unwrap();
        assert_eq!(upstream.node.subscriber_count(), 1);
    }

    #[test]
    fn test_undeclared_role_is_an_error() {
        let registry = Registry::new();
        let probe = Probe::new(&registry, &[]);
        let err = probe.node.dependency("missing").err().unwrap();
        assert!(matches!(err, PipelineError::UndeclaredDependency { .. }));
        assert!(probe.node.connect("missing", "Slot").is_err());
    }

    #[test]
    fn test_update_reaches_transitive_dependents() {
        let registry = Registry::new();
        let a = Probe::new(&registry, &[]);
        let b = Probe::new(&registry, &[("a", "A")]);
        let c = Probe::new(&registry, &[("b", "B")]);
        registry.provide("A", a.clone());
        registry.provide("B", b.clone());
        c.value().unwrap();
        b.value().unwrap();

        let before = c.node.revision();
        a.update();
        assert!(b.value.is_dirty(b.node.revision()));
        assert!(c.node.revision() > before);
        c.value().unwrap();
        assert_eq!(c.value.computations(), 2);
    }

    #[test]
    fn test_self_dependency_is_cyclic() {
        let registry = Registry::new();
        let probe = Probe::new(&registry, &[("me", "Me")]);
        registry.provide("Me", probe.clone());
        let err = probe.value().unwrap_err();
        assert!(matches!(err, PipelineError::CyclicDependency { .. }));
    }

    #[test]
    fn test_two_node_cycle_is_rejected() {
        let registry = Registry::new();
        let a = Probe::new(&registry, &[("b", "B")]);
        let b = Probe::new(&registry, &[("a", "A")]);
        registry.provide("A", a.clone());
        registry.provide("B", b.clone());
        // a resolves b, then b trying to resolve a closes the loop.
        a.node.dependency("b").unwrap();
        let err = b.node.dependency("a").err().unwrap();
        assert!(matches!(err, PipelineError::CyclicDependency { .. }));
    }

    #[test]
    fn test_connect_rewires_and_invalidates() {
        let registry = Registry::new();
        let first = Probe::new(&registry, &[]);
        let second = Probe::new(&registry, &[]);
        let consumer = Probe::new(&registry, &[("input", "First")]);
        registry.provide("First", first.clone());
        registry.provide("Second", second.clone());

        consumer.value().unwrap();
        consumer.node.connect("input", "Second").unwrap();
        assert!(consumer.value.is_dirty(consumer.node.revision()));
        assert_eq!(first.node.subscriber_count(), 0);
        consumer.value().unwrap();
        assert_eq!(second.node.subscriber_count(), 1);
    }
}
