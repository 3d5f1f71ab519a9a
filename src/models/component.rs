use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::feature::{ComponentFeature, FeatureMode};

/// Stable identity of a component: which namespace it lives in, where its
/// working copy is, and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    pub namespace: String,
    pub name: String,
    /// Local working directory the external tool runs in.
    pub path: PathBuf,
}

impl ComponentKey {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Declared runtime capabilities of a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Devfile component type, e.g. `nodejs`.
    pub component_type: Option<String>,
    pub supported_features: Vec<FeatureMode>,
}

impl ComponentInfo {
    pub fn supports(&self, feature: ComponentFeature) -> bool {
        self.supported_features.contains(&feature.mode())
    }
}

/// A deployable unit tracked in a namespace.
///
/// Live features are not stored here: they live in
/// [`FeatureState`](crate::state::FeatureState), keyed by [`Component::key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub key: ComponentKey,
    pub info: ComponentInfo,
    pub created_at: DateTime<Utc>,
}

impl Component {
    pub fn new(key: ComponentKey, info: ComponentInfo) -> Self {
        Self {
            key,
            info,
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }
}

/// The set of features believed active on a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveFeatures(BTreeSet<ComponentFeature>);

impl LiveFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, feature: ComponentFeature) -> bool {
        self.0.contains(&feature)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ComponentFeature> + '_ {
        self.0.iter().copied()
    }

    /// Add a feature. A debug feature brings its base along.
    pub fn add(&mut self, feature: ComponentFeature) {
        self.0.insert(feature);
        if let Some(base) = feature.paired() {
            self.0.insert(base);
        }
    }

    /// Remove a feature. Removing a base also drops the debug layer on it.
    pub fn remove(&mut self, feature: ComponentFeature) {
        self.0.remove(&feature);
        if !feature.is_debug() {
            self.0.remove(&feature.as_debug());
        }
    }

    /// Badges in display order, e.g. `["debug", "dev"]`.
    pub fn badges(&self) -> Vec<&'static str> {
        let mut badges: Vec<_> = self.0.iter().map(|f| f.badge()).collect();
        badges.sort_unstable();
        badges
    }
}

/// A cluster namespace and the components it contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub components: Vec<Component>,
}

/// Input for registering a component in a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateComponentInput {
    pub name: String,
    pub path: PathBuf,
    pub component_type: Option<String>,
    /// Defaults to dev and debug when not specified.
    #[serde(default)]
    pub supported_features: Option<Vec<FeatureMode>>,
}

/// Presentation of a component with its live features, used for responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentView {
    #[serde(flatten)]
    pub component: Component,
    pub live_features: LiveFeatures,
    /// Text shown next to the component in the tree, e.g. `debug, dev`.
    pub status: String,
}

/// A namespace with component views, used for listing responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceView {
    pub name: String,
    pub components: Vec<ComponentView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_debug_adds_base() {
        let mut live = LiveFeatures::new();
        live.add(ComponentFeature::DEBUG);
        assert!(live.contains(ComponentFeature::DEBUG));
        assert!(live.contains(ComponentFeature::DEV));
        assert_eq!(live.badges(), vec!["debug", "dev"]);
    }

    #[test]
    fn removing_base_drops_debug_layer() {
        let mut live = LiveFeatures::new();
        live.add(ComponentFeature::DEBUG);
        live.add(ComponentFeature::DEV_ON_PODMAN);
        live.remove(ComponentFeature::DEV);
        assert!(!live.contains(ComponentFeature::DEBUG));
        assert!(!live.contains(ComponentFeature::DEV));
        assert!(live.contains(ComponentFeature::DEV_ON_PODMAN));
    }

    #[test]
    fn removing_debug_keeps_base() {
        let mut live = LiveFeatures::new();
        live.add(ComponentFeature::DEBUG);
        live.remove(ComponentFeature::DEBUG);
        assert!(live.contains(ComponentFeature::DEV));
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn supports_checks_mode() {
        let info = ComponentInfo {
            component_type: None,
            supported_features: vec![FeatureMode::Dev],
        };
        assert!(info.supports(ComponentFeature::DEV_ON_PODMAN));
        assert!(!info.supports(ComponentFeature::DEBUG));
    }
}
