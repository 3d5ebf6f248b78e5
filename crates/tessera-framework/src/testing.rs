//! Helpers shared by the unit tests of this crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tessera_events::EventBus;
use tessera_modules::{ModuleLoader, ModuleManager, NativeCode, PathFilter, Platform};
use tessera_resolver::Environment;
use tessera_test::EventRecorder;

use crate::activator::{ActivatorError, ActivatorRegistry, BundleActivator};
use crate::bundle::Bundle;
use crate::manager::BundleManager;
use crate::plugin::ResolverPlugin;

/// Records start and stop calls in one shared log.
#[derive(Default)]
pub(crate) struct Recording {
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
    pub(crate) fail_start: bool,
}

impl Recording {
    pub(crate) fn sharing(calls: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            calls: Arc::clone(calls),
            fail_start: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BundleActivator for Recording {
    async fn start(&self, bundle: &Bundle) -> Result<(), ActivatorError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("start {}", bundle.symbolic_name()));
        if self.fail_start {
            return Err("refused".into());
        }
        Ok(())
    }

    async fn stop(&self, bundle: &Bundle) -> Result<(), ActivatorError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("stop {}", bundle.symbolic_name()));
        Ok(())
    }
}

/// Never finishes within the test start timeout.
pub(crate) struct Slow;

#[async_trait]
impl BundleActivator for Slow {
    async fn start(&self, _bundle: &Bundle) -> Result<(), ActivatorError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

pub(crate) fn plugin(bus: &EventBus) -> Arc<ResolverPlugin> {
    let modules = Arc::new(ModuleManager::new(
        Arc::new(ModuleLoader::new()),
        PathFilter::reject_all(),
    ));
    Arc::new(ResolverPlugin::new(
        Arc::new(Environment::new()),
        modules,
        NativeCode::new(Platform::new("linux", "x86_64")),
        bus.clone(),
    ))
}

/// A manager at start level 0 with a 200ms start timeout.
pub(crate) fn manager(activators: ActivatorRegistry) -> (Arc<BundleManager>, Arc<EventRecorder>) {
    let bus = EventBus::new();
    let recorder = EventRecorder::attach(&bus);
    let manager = BundleManager::new(
        plugin(&bus),
        bus,
        activators,
        Duration::from_millis(200),
        1,
    );
    (Arc::new(manager), recorder)
}
