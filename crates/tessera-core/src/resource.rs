//! Resources: installable units with their capabilities and requirements.
//!
//! A [`Resource`] is immutable in its graph shape (identity, capabilities,
//! requirements, content) and mutable only in two places, each behind its own
//! lock: the lifecycle [`ResourceState`] and the typed [`ResourceSlots`]
//! side-channel that the resolver and composer fill in.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::capability::{Capability, Requirement};
use crate::deployment::{ActivationPolicy, ContentRoot, NativeLibrary};
use crate::namespace::Namespace;

/// Identifier of the distinguished system resource.
pub const SYSTEM_RESOURCE_ID: ResourceId = ResourceId(0);

/// Symbolic name of the distinguished system resource.
pub const SYSTEM_SYMBOLIC_NAME: &str = "system.bundle";

/// Opaque resource identifier, assigned at install time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Symbolic name, version and revision of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Symbolic name.
    pub symbolic_name: String,
    /// Version.
    pub version: Version,
    /// Revision counter, bumped on every update of the same bundle.
    pub revision: u32,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbolic_name, self.version)
    }
}

/// The resource variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The framework itself.
    System,
    /// An ordinary, independently loadable unit.
    Host,
    /// A unit merged into a host's load unit.
    Fragment,
}

/// Lifecycle state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Known to the environment, not yet wired.
    Installed,
    /// Wired and composed.
    Resolved,
    /// Activation in progress (or deferred until first class load).
    Starting,
    /// Running.
    Active,
    /// Deactivation in progress.
    Stopping,
    /// Removed from the environment.
    Uninstalled,
}

impl ResourceState {
    /// Whether the state implies a published wiring.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Starting | Self::Active | Self::Stopping
        )
    }

    /// Whether the unit is active or on its way there.
    #[must_use]
    pub fn is_active_or_starting(self) -> bool {
        matches!(self, Self::Active | Self::Starting)
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Installed => "INSTALLED",
            Self::Resolved => "RESOLVED",
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Stopping => "STOPPING",
            Self::Uninstalled => "UNINSTALLED",
        };
        f.write_str(name)
    }
}

/// Identifier of a composed load unit: a module name plus a slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentifier {
    name: String,
    slot: String,
}

impl ModuleIdentifier {
    /// Create an identifier.
    #[must_use]
    pub fn new(name: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: slot.into(),
        }
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module slot.
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.slot)
    }
}

/// A native library bound at resolve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeBinding {
    /// Library name (file name without extension).
    pub name: String,
    /// Entry path of the library inside the providing content root.
    pub path: String,
    /// The resource whose content provides the library.
    pub provider: ResourceId,
}

/// Typed extension slots filled in by the resolver and the composer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSlots {
    /// Identifier of the composed load unit (hosts and system only).
    pub module_identifier: Option<ModuleIdentifier>,
    /// Fragments attached to this host.
    pub attached_fragments: BTreeSet<ResourceId>,
    /// The host this fragment is attached to.
    pub host: Option<ResourceId>,
    /// Native libraries bound for this resource.
    pub native_bindings: Vec<NativeBinding>,
}

/// An installable unit: host, fragment or the system resource.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    identity: ResourceIdentity,
    kind: ResourceKind,
    singleton: bool,
    capabilities: Vec<Capability>,
    requirements: Vec<Requirement>,
    content: Vec<ContentRoot>,
    native_libraries: Vec<NativeLibrary>,
    activation_policy: Option<ActivationPolicy>,
    state: RwLock<ResourceState>,
    slots: RwLock<ResourceSlots>,
}

impl Resource {
    /// Create a resource in the `Installed` state with no capabilities.
    #[must_use]
    pub fn new(id: ResourceId, identity: ResourceIdentity, kind: ResourceKind) -> Self {
        Self {
            id,
            identity,
            kind,
            singleton: false,
            capabilities: Vec::new(),
            requirements: Vec::new(),
            content: Vec::new(),
            native_libraries: Vec::new(),
            activation_policy: None,
            state: RwLock::new(ResourceState::Installed),
            slots: RwLock::new(ResourceSlots::default()),
        }
    }

    /// Mark the resource a singleton.
    #[must_use]
    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    /// Append a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Append a requirement.
    #[must_use]
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Append a content root.
    #[must_use]
    pub fn with_content(mut self, root: ContentRoot) -> Self {
        self.content.push(root);
        self
    }

    /// Append a native library declaration.
    #[must_use]
    pub fn with_native_library(mut self, library: NativeLibrary) -> Self {
        self.native_libraries.push(library);
        self
    }

    /// Set the activation policy.
    #[must_use]
    pub fn with_activation_policy(mut self, policy: ActivationPolicy) -> Self {
        self.activation_policy = Some(policy);
        self
    }

    /// The resource id.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Identity triple.
    #[must_use]
    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    /// Symbolic name.
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        &self.identity.symbolic_name
    }

    /// Version.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.identity.version
    }

    /// Resource variant.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Whether this is a fragment.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.kind == ResourceKind::Fragment
    }

    /// Whether this is the system resource.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind == ResourceKind::System
    }

    /// Whether this is an ordinary host.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.kind == ResourceKind::Host
    }

    /// Whether at most one resource with this symbolic name may be resolved.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// All capabilities in declaration order.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Capabilities in one namespace.
    pub fn capabilities_in<'a>(
        &'a self,
        namespace: &'a Namespace,
    ) -> impl Iterator<Item = &'a Capability> + 'a {
        self.capabilities
            .iter()
            .filter(move |c| c.namespace() == namespace)
    }

    /// All requirements in declaration order.
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Requirements in one namespace.
    pub fn requirements_in<'a>(
        &'a self,
        namespace: &'a Namespace,
    ) -> impl Iterator<Item = &'a Requirement> + 'a {
        self.requirements
            .iter()
            .filter(move |r| r.namespace() == namespace)
    }

    /// The single `host` capability of a host or system resource.
    #[must_use]
    pub fn host_capability(&self) -> Option<&Capability> {
        self.capabilities_in(&Namespace::Host).next()
    }

    /// The `host` requirement of a fragment.
    #[must_use]
    pub fn host_requirement(&self) -> Option<&Requirement> {
        self.requirements_in(&Namespace::Host).next()
    }

    /// Content roots of this resource (not including attached fragments).
    #[must_use]
    pub fn content_roots(&self) -> &[ContentRoot] {
        &self.content
    }

    /// Native libraries declared by this resource.
    #[must_use]
    pub fn native_libraries(&self) -> &[NativeLibrary] {
        &self.native_libraries
    }

    /// Declared activation policy.
    #[must_use]
    pub fn activation_policy(&self) -> Option<&ActivationPolicy> {
        self.activation_policy.as_ref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ResourceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the lifecycle state, returning the previous one.
    pub fn set_state(&self, state: ResourceState) -> ResourceState {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, state)
    }

    /// Snapshot of the extension slots.
    #[must_use]
    pub fn slots(&self) -> ResourceSlots {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the extension slots under their lock.
    pub fn update_slots<R>(&self, f: impl FnOnce(&mut ResourceSlots) -> R) -> R {
        let mut guard = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Identifier of the composed load unit, if composed.
    #[must_use]
    pub fn module_identifier(&self) -> Option<ModuleIdentifier> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .module_identifier
            .clone()
    }

    /// Fragments currently attached to this host.
    #[must_use]
    pub fn attached_fragments(&self) -> Vec<ResourceId> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .attached_fragments
            .iter()
            .copied()
            .collect()
    }

    /// The host a fragment is attached to.
    #[must_use]
    pub fn host(&self) -> Option<ResourceId> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).host
    }

    /// Whether [`Resource::attach_fragment`] would accept `fragment`: it must
    /// be a fragment, this must be a host, and the fragment must not already
    /// belong to another host.
    #[must_use]
    pub fn accepts_fragment(&self, fragment: &Resource) -> bool {
        fragment.is_fragment()
            && !self.is_fragment()
            && fragment.id != self.id
            && fragment.host().is_none_or(|host| host == self.id)
    }

    /// Attach `fragment` to this host. Re-attaching is a no-op.
    ///
    /// Returns `false` if either side has the wrong kind or the fragment is
    /// attached elsewhere; detach it from its current host first.
    pub fn attach_fragment(&self, fragment: &Resource) -> bool {
        if !self.accepts_fragment(fragment) {
            return false;
        }
        fragment.update_slots(|s| s.host = Some(self.id));
        self.update_slots(|s| s.attached_fragments.insert(fragment.id));
        true
    }

    /// Detach `fragment` from this host.
    ///
    /// Only unresolved fragments may be detached; returns whether a detach
    /// took place.
    pub fn detach_fragment(&self, fragment: &Resource) -> bool {
        if fragment.state().is_resolved() || fragment.host() != Some(self.id) {
            return false;
        }
        fragment.update_slots(|s| s.host = None);
        self.update_slots(|s| s.attached_fragments.remove(&fragment.id));
        true
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.identity, self.id)
    }
}
