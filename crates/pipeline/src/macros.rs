//! Utility macros for the pipeline crate.

/// Implements [`Component`](crate::component::Component) for a stage struct
/// holding its node in a `node` field, and exposes the listed capabilities.
///
/// # Example
///
/// ```ignore
/// impl_component!(SpikeDetector, events);
/// impl_component!(LabFileSource, signal, events);
/// ```
///
/// Each capability name (`signal`, `events`, `spikes`, `features`, `labels`)
/// requires the matching source trait to be implemented for the type.
#[macro_export]
macro_rules! impl_component {
    (@cap signal) => {
        fn as_signal_source(&self) -> Option<&dyn $crate::component::SignalSource> {
            Some(self)
        }
    };
    (@cap events) => {
        fn as_event_source(&self) -> Option<&dyn $crate::component::EventSource> {
            Some(self)
        }
    };
    (@cap spikes) => {
        fn as_spike_source(&self) -> Option<&dyn $crate::component::SpikeSource> {
            Some(self)
        }
    };
    (@cap features) => {
        fn as_feature_source(&self) -> Option<&dyn $crate::component::FeatureSource> {
            Some(self)
        }
    };
    (@cap labels) => {
        fn as_label_source(&self) -> Option<&dyn $crate::component::LabelSource> {
            Some(self)
        }
    };
    ($ty:ty $(, $cap:ident)* $(,)?) => {
        impl $crate::component::Component for $ty {
            fn node(&self) -> &::std::sync::Arc<$crate::component::ComponentNode> {
                &self.node
            }

            $( $crate::impl_component!(@cap $cap); )*
        }
    };
}
