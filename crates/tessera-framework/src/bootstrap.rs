//! Bootstrap pipeline: INSTALL, RESOLVE, ACTIVATE, COMPLETE.
//!
//! Each phase hands its cohort to the next once a [`CompletionBarrier`]
//! has seen every member confirm or drop out. Per-bundle failures never
//! abort the pipeline; they are published as framework error events and
//! collected in the [`BootstrapReport`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tessera_core::{ResourceId, ResourceState};
use tessera_events::{BootstrapPhase, EventMetadata, EventSubscriber, FrameworkEvent};
use tessera_telemetry::OperationContext;
use tokio::sync::{Semaphore, oneshot};
use tracing::{Instrument, debug, info, warn};

use crate::bundle::Bundle;
use crate::error::{FrameworkError, FrameworkResult};
use crate::manager::{BundleManager, StartOptions};
use crate::notify::report_error;
use crate::source::DeploymentSource;

#[derive(Debug)]
struct BarrierState<K> {
    expected: BTreeSet<K>,
    arrived: BTreeSet<K>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl<K: Ord> BarrierState<K> {
    fn is_complete(&self) -> bool {
        self.expected.iter().all(|k| self.arrived.contains(k))
    }

    fn release_if_complete(&mut self) {
        if self.is_complete() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

/// Counting barrier over a set of expected members.
///
/// Completion is evaluated on every arrival, every forfeit and at attach
/// time, all under one mutex, so a waiter attached after the last arrival
/// is released immediately.
#[derive(Debug)]
pub struct CompletionBarrier<K = ResourceId> {
    state: Mutex<BarrierState<K>>,
}

impl<K: Ord + Clone> CompletionBarrier<K> {
    /// A barrier waiting for every member of `expected`.
    pub fn new(expected: impl IntoIterator<Item = K>) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                expected: expected.into_iter().collect(),
                arrived: BTreeSet::new(),
                waiters: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BarrierState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a confirmation. Returns whether `member` was expected.
    pub fn arrive(&self, member: &K) -> bool {
        let mut state = self.lock();
        if !state.expected.contains(member) {
            return false;
        }
        state.arrived.insert(member.clone());
        state.release_if_complete();
        true
    }

    /// Stop waiting for `member`.
    pub fn forfeit(&self, member: &K) {
        let mut state = self.lock();
        state.expected.remove(member);
        state.arrived.remove(member);
        state.release_if_complete();
    }

    /// Whether every expected member has arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().is_complete()
    }

    /// Members that are still expected.
    #[must_use]
    pub fn expected(&self) -> Vec<K> {
        self.lock().expected.iter().cloned().collect()
    }

    /// Members that have arrived, in order.
    #[must_use]
    pub fn arrived(&self) -> Vec<K> {
        self.lock().arrived.iter().cloned().collect()
    }

    /// A receiver that fires once the barrier is complete.
    pub fn attach(&self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.lock();
        state.waiters.push(sender);
        state.release_if_complete();
        receiver
    }

    /// Wait for completion, then return the arrived members.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Timeout`] if the barrier is not complete
    /// within `bound`.
    pub async fn wait(&self, bound: Duration, operation: &str) -> FrameworkResult<Vec<K>> {
        let receiver = self.attach();
        match tokio::time::timeout(bound, receiver).await {
            Ok(_) => Ok(self.arrived()),
            Err(_) => Err(FrameworkError::timeout(operation, bound)),
        }
    }
}

/// Arrives on a barrier when a bundle enters the target state.
struct BarrierListener {
    barrier: Arc<CompletionBarrier>,
    target: ResourceState,
}

impl EventSubscriber for BarrierListener {
    fn on_event(&self, event: &FrameworkEvent) {
        if let FrameworkEvent::BundleStateChanged { bundle_id, to, .. } = event
            && *to == self.target
        {
            self.barrier.arrive(bundle_id);
        }
    }

    fn accepts(&self, event: &FrameworkEvent) -> bool {
        matches!(event, FrameworkEvent::BundleStateChanged { .. })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "bootstrap-barrier"
    }
}

/// One location handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapEntry {
    /// Install location.
    pub location: String,
    /// Start during bootstrap even if the descriptor does not ask for it.
    pub auto_start: bool,
}

impl BootstrapEntry {
    /// Install only.
    #[must_use]
    pub fn install(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            auto_start: false,
        }
    }

    /// Install and start.
    #[must_use]
    pub fn start(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            auto_start: true,
        }
    }
}

/// Why a bundle was kept out of the bootstrap resolve cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FilterReason {
    /// The bundle is not marked for automatic start.
    NotAutoStart,
    /// Fragments are resolved with their host.
    Fragment,
    /// The bundle's start level is above the beginning start level.
    StartLevel {
        /// The bundle's level.
        level: u32,
        /// The beginning start level.
        beginning: u32,
    },
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAutoStart => f.write_str("not marked for automatic start"),
            Self::Fragment => f.write_str("fragments resolve with their host"),
            Self::StartLevel { level, beginning } => write!(
                f,
                "start level {level} is above the beginning start level {beginning}"
            ),
        }
    }
}

/// An install that did not produce a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallFailure {
    /// The location.
    pub location: String,
    /// Why it failed.
    pub reason: String,
}

/// Outcome of one bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    /// Bundles installed, in install order.
    pub installed: Vec<ResourceId>,
    /// Locations that could not be installed.
    pub install_failures: Vec<InstallFailure>,
    /// Installed bundles kept out of the resolve cohort.
    pub filtered: Vec<(ResourceId, FilterReason)>,
    /// Cohort members the resolver could not wire.
    pub unresolved: Vec<(ResourceId, String)>,
    /// Cohort members that resolved.
    pub resolved: Vec<ResourceId>,
    /// Bundles that reached ACTIVE (or lazy STARTING).
    pub activated: Vec<ResourceId>,
    /// Bundles whose start failed.
    pub activation_failures: Vec<(ResourceId, String)>,
}

impl BootstrapReport {
    /// Install, resolve and activation failures combined.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.install_failures
            .len()
            .saturating_add(self.unresolved.len())
            .saturating_add(self.activation_failures.len())
    }
}

/// Drives a cohort of locations through the four phases.
pub struct Bootstrap {
    manager: Arc<BundleManager>,
    source: Arc<dyn DeploymentSource>,
    max_threads: usize,
    beginning_level: u32,
    timeout: Duration,
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("max_threads", &self.max_threads)
            .field("beginning_level", &self.beginning_level)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Bootstrap {
    /// Create a pipeline. `timeout` bounds each barrier wait.
    #[must_use]
    pub fn new(
        manager: Arc<BundleManager>,
        source: Arc<dyn DeploymentSource>,
        max_threads: usize,
        beginning_level: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            manager,
            source,
            max_threads: max_threads.max(1),
            beginning_level,
            timeout,
        }
    }

    /// Run every phase over `entries`.
    pub async fn run(&self, entries: Vec<BootstrapEntry>) -> BootstrapReport {
        let ctx = OperationContext::new("bootstrap").with_operation("run");
        async {
            let mut report = BootstrapReport::default();

            let installed = self.install_phase(entries, &mut report).await;
            let resolved = self.resolve_phase(&installed, &mut report).await;
            self.activate_phase(&resolved, &mut report).await;
            self.complete_phase(&report);

            info!(
                installed = report.installed.len(),
                resolved = report.resolved.len(),
                activated = report.activated.len(),
                failures = report.failure_count(),
                elapsed_ms = ctx.elapsed_ms(),
                "Bootstrap complete"
            );
            report
        }
        .instrument(ctx.span())
        .await
    }

    fn enter(&self, phase: BootstrapPhase, cohort: usize) {
        debug!(%phase, cohort, "Bootstrap phase");
        self.manager.bus().publish(FrameworkEvent::BootstrapPhaseChanged {
            metadata: EventMetadata::new("bootstrap"),
            phase,
            cohort,
        });
    }

    async fn install_phase(
        &self,
        entries: Vec<BootstrapEntry>,
        report: &mut BootstrapReport,
    ) -> Vec<Arc<Bundle>> {
        self.enter(BootstrapPhase::Install, entries.len());
        let barrier = Arc::new(CompletionBarrier::new(0..entries.len()));
        let permits = Arc::new(Semaphore::new(self.max_threads));
        let mut handles = Vec::with_capacity(entries.len());

        for (index, entry) in entries.into_iter().enumerate() {
            // Ids are reserved here so install order follows entry order.
            let id = self.manager.reserve_id();
            let manager = Arc::clone(&self.manager);
            let source = Arc::clone(&self.source);
            let barrier = Arc::clone(&barrier);
            let permits = Arc::clone(&permits);
            handles.push(tokio::spawn(
                async move {
                    let _permit = permits.acquire_owned().await;
                    let outcome = install_one(&manager, source.as_ref(), id, &entry).await;
                    match &outcome {
                        Ok(_) => {
                            barrier.arrive(&index);
                        },
                        Err(error) => {
                            report_error(manager.bus(), None, "install", error);
                            barrier.forfeit(&index);
                        },
                    }
                    (index, entry.location, outcome)
                }
                .in_current_span(),
            ));
        }

        if let Err(error) = barrier.wait(self.timeout, "bootstrap install").await {
            report_error(self.manager.bus(), None, "install", &error);
        }

        // Handles join in entry order.
        let mut outcomes = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => warn!(error = %error, "Install task failed"),
            }
        }

        let mut installed: Vec<Arc<Bundle>> = Vec::new();
        for (_, location, outcome) in outcomes {
            match outcome {
                Ok(bundle) => {
                    if !installed.iter().any(|b| b.id() == bundle.id()) {
                        report.installed.push(bundle.id());
                        installed.push(bundle);
                    }
                },
                Err(error) => report.install_failures.push(InstallFailure {
                    location,
                    reason: error.to_string(),
                }),
            }
        }
        installed.sort_by_key(|b| b.id());
        installed
    }

    fn filter_reason(&self, bundle: &Bundle) -> Option<FilterReason> {
        if bundle.is_fragment() {
            Some(FilterReason::Fragment)
        } else if !bundle.is_auto_start() {
            Some(FilterReason::NotAutoStart)
        } else if bundle.start_level() > self.beginning_level {
            Some(FilterReason::StartLevel {
                level: bundle.start_level(),
                beginning: self.beginning_level,
            })
        } else {
            None
        }
    }

    async fn resolve_phase(
        &self,
        installed: &[Arc<Bundle>],
        report: &mut BootstrapReport,
    ) -> Vec<Arc<Bundle>> {
        let mut cohort = Vec::new();
        for bundle in installed {
            match self.filter_reason(bundle) {
                Some(reason) => {
                    debug!(bundle = %bundle, %reason, "Bundle filtered from bootstrap resolve");
                    report.filtered.push((bundle.id(), reason));
                },
                None => cohort.push(Arc::clone(bundle)),
            }
        }
        self.enter(BootstrapPhase::Resolve, cohort.len());

        let barrier = Arc::new(CompletionBarrier::new(cohort.iter().map(|b| b.id())));
        let registry = self.manager.bus().registry();
        let listener = registry.register(Arc::new(BarrierListener {
            barrier: Arc::clone(&barrier),
            target: ResourceState::Resolved,
        }));
        for bundle in &cohort {
            if bundle.state().is_resolved() {
                barrier.arrive(&bundle.id());
            }
        }

        let resources: Vec<_> = cohort.iter().map(|b| Arc::clone(b.resource())).collect();
        let outcome = self.manager.plugin().resolve_bundles(&resources).await;
        for (id, reason) in &outcome.unresolved {
            barrier.forfeit(id);
            report_error(self.manager.bus(), Some(*id), "resolve", reason);
        }
        report.unresolved = outcome.unresolved;

        let resolved = match barrier.wait(self.timeout, "bootstrap resolve").await {
            Ok(resolved) => resolved,
            Err(error) => {
                report_error(self.manager.bus(), None, "resolve", &error);
                barrier.arrived()
            },
        };
        registry.unregister(listener);

        report.resolved = resolved;
        cohort
            .into_iter()
            .filter(|b| report.resolved.contains(&b.id()))
            .collect()
    }

    async fn activate_phase(&self, resolved: &[Arc<Bundle>], report: &mut BootstrapReport) {
        let cohort: Vec<Arc<Bundle>> = resolved
            .iter()
            .filter(|b| b.is_persistently_started())
            .cloned()
            .collect();
        self.enter(BootstrapPhase::Activate, cohort.len());

        let barrier = Arc::new(CompletionBarrier::new(cohort.iter().map(|b| b.id())));
        let registry = self.manager.bus().registry();
        let listener = registry.register(Arc::new(BarrierListener {
            barrier: Arc::clone(&barrier),
            target: ResourceState::Active,
        }));
        for bundle in &cohort {
            if bundle.state() == ResourceState::Active {
                barrier.arrive(&bundle.id());
            }
        }

        let permits = Arc::new(Semaphore::new(self.max_threads));
        let mut handles = Vec::with_capacity(cohort.len());
        for bundle in cohort {
            let manager = Arc::clone(&self.manager);
            let barrier = Arc::clone(&barrier);
            let permits = Arc::clone(&permits);
            handles.push(tokio::spawn(
                async move {
                    let _permit = permits.acquire_owned().await;
                    let options = StartOptions {
                        transient: true,
                        ignore_level: true,
                        ..StartOptions::default()
                    };
                    let result = manager.start(bundle.id(), options).await;
                    match &result {
                        // A lazy bundle waits in STARTING for its first class load.
                        Ok(()) if bundle.state() == ResourceState::Starting => {
                            barrier.arrive(&bundle.id());
                        },
                        Ok(()) => {},
                        Err(error) => {
                            report_error(manager.bus(), Some(bundle.id()), "start", error);
                            barrier.forfeit(&bundle.id());
                        },
                    }
                    (bundle.id(), result)
                }
                .in_current_span(),
            ));
        }

        if let Err(error) = barrier.wait(self.timeout, "bootstrap activate").await {
            report_error(self.manager.bus(), None, "start", &error);
        }
        for joined in join_all(handles).await {
            match joined {
                Ok((id, Err(error))) => report.activation_failures.push((id, error.to_string())),
                Ok((_, Ok(()))) => {},
                Err(error) => warn!(error = %error, "Activation task failed"),
            }
        }
        registry.unregister(listener);

        report.activated = barrier.arrived();
        report.activation_failures.sort_by_key(|(id, _)| *id);
    }

    fn complete_phase(&self, report: &BootstrapReport) {
        self.enter(BootstrapPhase::Complete, report.activated.len());
        self.manager.bus().publish(FrameworkEvent::BootstrapComplete {
            metadata: EventMetadata::new("bootstrap"),
            installed: report.installed.len(),
            resolved: report.resolved.len(),
            activated: report.activated.len(),
            failures: report.failure_count(),
        });
    }
}

async fn install_one(
    manager: &BundleManager,
    source: &dyn DeploymentSource,
    id: ResourceId,
    entry: &BootstrapEntry,
) -> FrameworkResult<Arc<Bundle>> {
    let mut deployment = source.load(&entry.location).await?;
    deployment.location.clone_from(&entry.location);
    deployment.auto_start |= entry.auto_start;
    manager.install_with_id(id, &deployment)
}
