//! Shared harness for the integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::Deployment;
use tessera_modules::Platform;
use tessera_framework::{
    ActivatorError, Bundle, BundleActivator, Framework, FrameworkBuilder, InMemorySource,
};

/// Bound used when a test awaits a level change.
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(5);

/// Ordered log of activator calls, shared by every activator of a harness.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl Journal {
    /// Calls so far, as `start <name>` / `stop <name>`.
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }
}

/// Writes every start and stop into a [`Journal`]. Fails starts if asked to.
pub struct JournalActivator {
    journal: Journal,
    fail_start: bool,
}

#[async_trait]
impl BundleActivator for JournalActivator {
    async fn start(&self, bundle: &Bundle) -> Result<(), ActivatorError> {
        self.journal
            .push(format!("start {}", bundle.symbolic_name()));
        if self.fail_start {
            return Err(format!("{} refuses to start", bundle.symbolic_name()).into());
        }
        Ok(())
    }

    async fn stop(&self, bundle: &Bundle) -> Result<(), ActivatorError> {
        self.journal.push(format!("stop {}", bundle.symbolic_name()));
        Ok(())
    }
}

/// Builds a framework over in-memory deployments with journaling
/// activators.
pub struct Harness {
    source: InMemorySource,
    builder: FrameworkBuilder,
    journal: Journal,
}

#[allow(dead_code)]
impl Harness {
    /// An empty harness.
    pub fn new() -> Self {
        tessera_test::setup_test_logging_default();
        Self {
            source: InMemorySource::new(),
            builder: Framework::builder(),
            journal: Journal::default(),
        }
    }

    /// Make `deployment` loadable by location and journal its lifecycle.
    pub fn deploy(self, deployment: Deployment) -> Self {
        let name = deployment.symbolic_name.clone();
        self.source.add(deployment);
        self.activator(&name, false)
    }

    /// Make `deployment` loadable; its activator fails on start.
    pub fn deploy_failing(self, deployment: Deployment) -> Self {
        let name = deployment.symbolic_name.clone();
        self.source.add(deployment);
        self.activator(&name, true)
    }

    fn activator(mut self, name: &str, fail_start: bool) -> Self {
        let activator = JournalActivator {
            journal: self.journal.clone(),
            fail_start,
        };
        self.builder = self.builder.activator(name, Arc::new(activator));
        self
    }

    /// Set a configuration property.
    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.builder = self.builder.property(key, value);
        self
    }

    /// Select native libraries for `os`/`arch`.
    pub fn platform(mut self, os: &str, arch: &str) -> Self {
        self.builder = self.builder.platform(Platform::new(os, arch));
        self
    }

    /// Build the framework.
    ///
    /// The test subscriber installed by [`Harness::new`] stays in place.
    pub fn build(self) -> (Framework, Journal) {
        let framework = self
            .builder
            .source(Arc::new(self.source))
            .with_logging()
            .build()
            .expect("framework configuration must be valid");
        (framework, self.journal)
    }
}
