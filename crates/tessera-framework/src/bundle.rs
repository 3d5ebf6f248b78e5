//! Installed bundles.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tessera_core::{ModuleIdentifier, Resource, ResourceId, ResourceState};
use tokio::sync::{Mutex, MutexGuard};

/// An installed bundle: its resource plus lifecycle bookkeeping.
///
/// The lifecycle state lives on the resource. Start and stop of one bundle
/// are serialized by the bundle's own async lock.
pub struct Bundle {
    resource: Arc<Resource>,
    location: String,
    auto_start: bool,
    start_level: AtomicU32,
    persistently_started: AtomicBool,
    lifecycle: Mutex<()>,
}

impl Bundle {
    pub(crate) fn new(
        resource: Arc<Resource>,
        location: impl Into<String>,
        start_level: u32,
        auto_start: bool,
    ) -> Self {
        Self {
            resource,
            location: location.into(),
            auto_start,
            start_level: AtomicU32::new(start_level),
            persistently_started: AtomicBool::new(auto_start),
            lifecycle: Mutex::new(()),
        }
    }

    /// Bundle id.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    /// The underlying resource.
    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Symbolic name.
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        self.resource.symbolic_name()
    }

    /// Install location.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.resource.state()
    }

    /// Whether the bundle is a fragment.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.resource.is_fragment()
    }

    /// Whether this is the system bundle.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.resource.is_system()
    }

    /// Whether activation waits for the first class load.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.resource.activation_policy().is_some()
    }

    /// Whether the deployment asked to be started at bootstrap.
    #[must_use]
    pub fn is_auto_start(&self) -> bool {
        self.auto_start
    }

    /// Declared start level.
    #[must_use]
    pub fn start_level(&self) -> u32 {
        self.start_level.load(Ordering::Acquire)
    }

    pub(crate) fn set_start_level(&self, level: u32) {
        self.start_level.store(level, Ordering::Release);
    }

    /// Whether the bundle should run whenever its start level is reached.
    #[must_use]
    pub fn is_persistently_started(&self) -> bool {
        self.persistently_started.load(Ordering::Acquire)
    }

    pub(crate) fn set_persistently_started(&self, started: bool) {
        self.persistently_started.store(started, Ordering::Release);
    }

    /// Module identifier once resolved.
    #[must_use]
    pub fn module_identifier(&self) -> Option<ModuleIdentifier> {
        self.resource.module_identifier()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id())
            .field("symbolic_name", &self.symbolic_name())
            .field("state", &self.state())
            .field("start_level", &self.start_level())
            .field("persistently_started", &self.is_persistently_started())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.resource, f)
    }
}
