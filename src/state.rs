//! Live feature cache shared between the orchestrator and presentation layers.

use std::sync::Arc;

use dashmap::DashMap;

use crate::models::{ComponentFeature, ComponentKey, LiveFeatures};

/// Per-component set of features believed active.
///
/// Cloning shares the underlying map. Each operation is atomic for the
/// component it touches; ordering between operations on the same
/// (component, feature) pair is provided by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FeatureState {
    live: Arc<DashMap<ComponentKey, LiveFeatures>>,
}

impl FeatureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, component: &ComponentKey, feature: ComponentFeature) -> bool {
        self.live
            .get(component)
            .is_some_and(|live| live.contains(feature))
    }

    /// Mark a feature live. Adding a debug feature also adds its base.
    pub fn add(&self, component: &ComponentKey, feature: ComponentFeature) {
        self.live.entry(component.clone()).or_default().add(feature);
    }

    /// Mark a feature stopped. Removing a base also removes the debug feature
    /// layered on top of it.
    pub fn remove(&self, component: &ComponentKey, feature: ComponentFeature) {
        if let Some(mut live) = self.live.get_mut(component) {
            live.remove(feature);
        }
        self.live.remove_if(component, |_, live| live.is_empty());
    }

    /// Snapshot of the live features of a component.
    pub fn features(&self, component: &ComponentKey) -> LiveFeatures {
        self.live
            .get(component)
            .map(|live| live.value().clone())
            .unwrap_or_default()
    }

    /// Drop everything known about a component, e.g. after it was deleted.
    pub fn forget(&self, component: &ComponentKey) {
        self.live.remove(component);
    }
}
