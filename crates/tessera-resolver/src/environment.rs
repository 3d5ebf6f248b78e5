//! The resolver environment: every known resource and the published wiring.
//!
//! Resources enter at install and leave at uninstall. Wirings change only
//! through [`Environment::update_wiring`], which publishes one resolution
//! batch atomically under the write lock.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tessera_core::{Resource, ResourceId, WireMap, Wiring};
use tracing::{debug, trace};

use crate::error::{ResolutionError, ResolutionResult};

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<ResourceId, Arc<Resource>>,
    wirings: BTreeMap<ResourceId, Wiring>,
}

/// Registry of all known resources and their published wirings.
#[derive(Debug, Default)]
pub struct Environment {
    state: RwLock<State>,
}

/// A consistent, read-only copy of the environment for one resolution.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    resources: BTreeMap<ResourceId, Arc<Resource>>,
    wirings: BTreeMap<ResourceId, Wiring>,
}

impl Snapshot {
    /// All resources in id order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    /// Look up a resource.
    #[must_use]
    pub fn resource(&self, id: ResourceId) -> Option<&Arc<Resource>> {
        self.resources.get(&id)
    }

    /// Published wiring of a resource.
    #[must_use]
    pub fn wiring(&self, id: ResourceId) -> Option<&Wiring> {
        self.wirings.get(&id)
    }

    /// Whether a resource has a published wiring.
    #[must_use]
    pub fn is_resolved(&self, id: ResourceId) -> bool {
        self.wirings.contains_key(&id)
    }
}

impl Environment {
    /// Create an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an installed resource.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::DuplicateResource`] if the id is taken.
    pub fn install(&self, resource: Arc<Resource>) -> ResolutionResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let id = resource.id();
        if state.resources.contains_key(&id) {
            return Err(ResolutionError::DuplicateResource(id));
        }
        debug!(resource = %resource, "Resource added to environment");
        state.resources.insert(id, resource);
        Ok(())
    }

    /// Remove a resource and its wiring.
    ///
    /// Providers forget the incoming wires of the removed resource. Wirings
    /// of consumers that still reference it are left as they are and are not
    /// re-queried.
    pub fn uninstall(&self, id: ResourceId) -> Option<Arc<Resource>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let removed = state.resources.remove(&id)?;
        unpublish(&mut state, id);
        debug!(resource = %removed, "Resource removed from environment");
        Some(removed)
    }

    /// Withdraw the published wiring of `id`, leaving the resource
    /// installed but unresolved. Returns whether a wiring was withdrawn.
    pub fn withdraw_wiring(&self, id: ResourceId) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        unpublish(&mut state, id)
    }

    /// Look up a resource.
    #[must_use]
    pub fn resource(&self, id: ResourceId) -> Option<Arc<Resource>> {
        self.read().resources.get(&id).cloned()
    }

    /// All resources in id order.
    #[must_use]
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        self.read().resources.values().cloned().collect()
    }

    /// Published wiring of a resource.
    #[must_use]
    pub fn wiring(&self, id: ResourceId) -> Option<Wiring> {
        self.read().wirings.get(&id).cloned()
    }

    /// Whether a resource has a published wiring.
    #[must_use]
    pub fn is_resolved(&self, id: ResourceId) -> bool {
        self.read().wirings.contains_key(&id)
    }

    /// Copy the current state for a resolution.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let state = self.read();
        Snapshot {
            resources: state.resources.clone(),
            wirings: state.wirings.clone(),
        }
    }

    /// Publish the wiring of one resolution batch.
    ///
    /// Every resource keyed in `wires` gets its required wires replaced;
    /// providers gain the matching incoming wires. Entries for resources
    /// that were uninstalled meanwhile are skipped. Returns the ids whose
    /// wiring was published.
    pub fn update_wiring(&self, wires: &WireMap) -> Vec<ResourceId> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut published = Vec::with_capacity(wires.len());

        for (requirer, required) in wires {
            if !state.resources.contains_key(requirer) {
                trace!(resource = %requirer, "Skipping wiring of uninstalled resource");
                continue;
            }
            let provided = state
                .wirings
                .get(requirer)
                .map(|w| w.provided_wires().to_vec())
                .unwrap_or_default();
            state
                .wirings
                .insert(*requirer, Wiring::new(required.clone(), provided));
            published.push(*requirer);
        }

        for required in wires.values() {
            for wire in required {
                if !state.resources.contains_key(&wire.requirer())
                    || !state.resources.contains_key(&wire.provider())
                {
                    continue;
                }
                state
                    .wirings
                    .entry(wire.provider())
                    .or_default()
                    .add_provided(wire.clone());
            }
        }

        debug!(count = published.len(), "Wiring published");
        published
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unpublish(state: &mut State, id: ResourceId) -> bool {
    let Some(wiring) = state.wirings.remove(&id) else {
        return false;
    };
    for wire in wiring.required_wires() {
        if let Some(provider) = state.wirings.get_mut(&wire.provider()) {
            provider.remove_provided_from(id);
        }
    }
    true
}
