//! In-memory ownership of namespaces and their components.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::models::*;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("component {name} already exists in namespace {namespace}")]
    AlreadyExists { namespace: String, name: String },

    #[error("invalid component: {0}")]
    Invalid(String),
}

/// Namespaces and the components they contain. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    namespaces: Arc<RwLock<BTreeMap<String, BTreeMap<String, Component>>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a namespace exists, even with no components.
    pub fn ensure_namespace(&self, name: &str) {
        self.namespaces.write().entry(name.to_string()).or_default();
    }

    /// All namespaces ordered by name, components ordered by name.
    pub fn list_namespaces(&self) -> Vec<Namespace> {
        self.namespaces
            .read()
            .iter()
            .map(|(name, components)| Namespace {
                name: name.clone(),
                components: components.values().cloned().collect(),
            })
            .collect()
    }

    pub fn create_component(
        &self,
        namespace: &str,
        input: CreateComponentInput,
    ) -> Result<Component, RegistryError> {
        let name = input.name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(RegistryError::Invalid(format!(
                "'{}' is not a valid component name",
                input.name
            )));
        }
        if namespace.trim().is_empty() {
            return Err(RegistryError::Invalid("namespace is required".to_string()));
        }

        let mut namespaces = self.namespaces.write();
        let components = namespaces.entry(namespace.to_string()).or_default();
        if components.contains_key(name) {
            return Err(RegistryError::AlreadyExists {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        let component = Component::new(
            ComponentKey::new(namespace, name, input.path),
            ComponentInfo {
                component_type: input.component_type,
                supported_features: input
                    .supported_features
                    .unwrap_or_else(|| vec![FeatureMode::Dev, FeatureMode::Debug]),
            },
        );
        components.insert(name.to_string(), component.clone());
        tracing::debug!("Registered component {}", component.key);
        Ok(component)
    }

    pub fn get_component(&self, namespace: &str, name: &str) -> Option<Component> {
        self.namespaces
            .read()
            .get(namespace)
            .and_then(|components| components.get(name).cloned())
    }

    /// Remove a component, returning it if it existed.
    pub fn delete_component(&self, namespace: &str, name: &str) -> Option<Component> {
        self.namespaces
            .write()
            .get_mut(namespace)
            .and_then(|components| components.remove(name))
    }
}
