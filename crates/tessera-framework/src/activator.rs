//! Bundle activators: user callbacks run on start and stop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bundle::Bundle;

/// Error type returned by activators.
pub type ActivatorError = Box<dyn std::error::Error + Send + Sync>;

/// Start and stop callbacks of a bundle.
#[async_trait]
pub trait BundleActivator: Send + Sync {
    /// Called while the bundle is STARTING. An error returns the bundle to
    /// RESOLVED.
    async fn start(&self, bundle: &Bundle) -> Result<(), ActivatorError>;

    /// Called while the bundle is STOPPING. The bundle ends up RESOLVED
    /// even if this fails.
    async fn stop(&self, bundle: &Bundle) -> Result<(), ActivatorError> {
        let _ = bundle;
        Ok(())
    }
}

/// Activators keyed by bundle symbolic name.
#[derive(Clone, Default)]
pub struct ActivatorRegistry {
    activators: HashMap<String, Arc<dyn BundleActivator>>,
}

impl ActivatorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the activator for `symbolic_name`, replacing any previous one.
    pub fn register(&mut self, symbolic_name: impl Into<String>, activator: Arc<dyn BundleActivator>) {
        self.activators.insert(symbolic_name.into(), activator);
    }

    /// The activator for `symbolic_name`.
    #[must_use]
    pub fn get(&self, symbolic_name: &str) -> Option<Arc<dyn BundleActivator>> {
        self.activators.get(symbolic_name).cloned()
    }

    /// Number of registered activators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.activators.len()
    }

    /// Whether no activator is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activators.is_empty()
    }
}

impl std::fmt::Debug for ActivatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.activators.keys().collect();
        names.sort();
        f.debug_struct("ActivatorRegistry")
            .field("bundles", &names)
            .finish()
    }
}
