//! Start-level scheduler.
//!
//! All level changes run on one worker task that drains a command queue, so
//! two walks never interleave. Callers get a [`LevelChange`] handle back
//! immediately and may await it or drop it.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::ResourceId;
use tessera_events::{EventBus, EventMetadata, FrameworkEvent};
use tessera_telemetry::OperationContext;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info};

use crate::bundle::Bundle;
use crate::error::{FrameworkError, FrameworkResult};
use crate::manager::{BundleManager, StartOptions};
use crate::notify::report_error;

enum Command {
    SetLevel {
        target: u32,
        done: oneshot::Sender<u32>,
    },
    SetBundleLevel {
        bundle: Arc<Bundle>,
        level: u32,
        done: oneshot::Sender<()>,
    },
}

/// Pending completion of a framework start-level change.
#[derive(Debug)]
pub struct LevelChange {
    target: u32,
    done: oneshot::Receiver<u32>,
}

impl LevelChange {
    /// The requested level.
    #[must_use]
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Wait for the walk to finish. Returns the level reached.
    ///
    /// # Errors
    ///
    /// - [`FrameworkError::Timeout`] if the walk takes longer than `bound`.
    /// - [`FrameworkError::SchedulerStopped`] if the worker is gone.
    pub async fn wait(self, bound: Duration) -> FrameworkResult<u32> {
        match tokio::time::timeout(bound, self.done).await {
            Ok(Ok(level)) => Ok(level),
            Ok(Err(_)) => Err(FrameworkError::SchedulerStopped),
            Err(_) => Err(FrameworkError::timeout(
                format!("start level change to {}", self.target),
                bound,
            )),
        }
    }
}

/// Handle to the start-level worker.
#[derive(Debug, Clone)]
pub struct StartLevel {
    manager: Arc<BundleManager>,
    commands: mpsc::UnboundedSender<Command>,
}

impl StartLevel {
    /// Spawn the worker on the current runtime. It runs until every handle
    /// is dropped.
    #[must_use]
    pub fn spawn(manager: Arc<BundleManager>) -> (Self, JoinHandle<()>) {
        let (commands, queue) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(Arc::clone(&manager), queue));
        (Self { manager, commands }, worker)
    }

    /// The active framework start level.
    #[must_use]
    pub fn start_level(&self) -> u32 {
        self.manager.active_start_level()
    }

    /// Queue a walk to `target`.
    ///
    /// Moving up starts persistently-started bundles level by level; moving
    /// down stops them level by level. Per-bundle failures are reported as
    /// [`FrameworkEvent::FrameworkError`] and do not stop the walk.
    pub fn set_start_level(&self, target: u32) -> LevelChange {
        let (done, receiver) = oneshot::channel();
        if self
            .commands
            .send(Command::SetLevel { target, done })
            .is_err()
        {
            debug!(target, "Start-level worker is gone");
        }
        LevelChange {
            target,
            done: receiver,
        }
    }

    /// Start level of a bundle.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::UnknownBundle`] if it is not installed.
    pub fn bundle_start_level(&self, id: ResourceId) -> FrameworkResult<u32> {
        Ok(self.require(id)?.start_level())
    }

    /// Change the start level of a bundle, then start or stop it on the
    /// worker so that it matches the active level.
    ///
    /// # Errors
    ///
    /// - [`FrameworkError::SystemBundleStartLevel`] for the system bundle.
    /// - [`FrameworkError::InvalidStartLevel`] for level 0.
    /// - [`FrameworkError::UnknownBundle`] if it is not installed.
    /// - [`FrameworkError::SchedulerStopped`] if the worker is gone.
    pub async fn set_bundle_start_level(&self, id: ResourceId, level: u32) -> FrameworkResult<()> {
        let bundle = self.require(id)?;
        if bundle.is_system() {
            return Err(FrameworkError::SystemBundleStartLevel);
        }
        if level == 0 {
            return Err(FrameworkError::InvalidStartLevel(level));
        }
        let (done, receiver) = oneshot::channel();
        self.commands
            .send(Command::SetBundleLevel {
                bundle,
                level,
                done,
            })
            .map_err(|_| FrameworkError::SchedulerStopped)?;
        receiver.await.map_err(|_| FrameworkError::SchedulerStopped)
    }

    /// Start level assigned to newly installed bundles.
    #[must_use]
    pub fn initial_bundle_start_level(&self) -> u32 {
        self.manager.initial_bundle_start_level()
    }

    /// Change the start level assigned to newly installed bundles.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::InvalidStartLevel`] for level 0.
    pub fn set_initial_bundle_start_level(&self, level: u32) -> FrameworkResult<()> {
        if level == 0 {
            return Err(FrameworkError::InvalidStartLevel(level));
        }
        self.manager.set_initial_bundle_start_level(level);
        Ok(())
    }

    /// Whether a bundle is started whenever its level is reached.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::UnknownBundle`] if it is not installed.
    pub fn is_persistently_started(&self, id: ResourceId) -> FrameworkResult<bool> {
        Ok(self.require(id)?.is_persistently_started())
    }

    fn require(&self, id: ResourceId) -> FrameworkResult<Arc<Bundle>> {
        self.manager
            .bundle(id)
            .ok_or(FrameworkError::UnknownBundle(id))
    }
}

async fn run(manager: Arc<BundleManager>, mut queue: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = queue.recv().await {
        match command {
            Command::SetLevel { target, done } => {
                let ctx = OperationContext::new("start_level").with_operation("walk");
                let reached = walk(&manager, target).instrument(ctx.span()).await;
                let _ = done.send(reached);
            },
            Command::SetBundleLevel {
                bundle,
                level,
                done,
            } => {
                align_bundle(&manager, &bundle, level).await;
                let _ = done.send(());
            },
        }
    }
    debug!("Start-level worker finished");
}

/// Bundles the walk acts on at `level`, in install order.
fn at_level(manager: &BundleManager, level: u32) -> Vec<Arc<Bundle>> {
    manager
        .bundles()
        .into_iter()
        .filter(|b| !b.is_system() && !b.is_fragment() && b.start_level() == level)
        .collect()
}

async fn walk(manager: &BundleManager, target: u32) -> u32 {
    let bus = manager.bus();
    let from = manager.active_start_level();
    let mut current = from;
    info!(from, target, "Start level change");

    while current < target {
        current = current.saturating_add(1);
        manager.set_active_start_level(current);
        for bundle in at_level(manager, current) {
            if !bundle.is_persistently_started() || bundle.state().is_active_or_starting() {
                continue;
            }
            if let Err(error) = manager.start(bundle.id(), StartOptions::transient()).await {
                report_error(bus, Some(bundle.id()), "start", &error);
            }
        }
    }

    while current > target {
        for bundle in at_level(manager, current).iter().rev() {
            if !bundle.state().is_active_or_starting() {
                continue;
            }
            if let Err(error) = manager.stop(bundle.id(), true).await {
                report_error(bus, Some(bundle.id()), "stop", &error);
            }
        }
        current = current.saturating_sub(1);
        manager.set_active_start_level(current);
    }

    publish_level_change(bus, from, current);
    current
}

fn publish_level_change(bus: &EventBus, from: u32, to: u32) {
    info!(from, to, "Start level reached");
    bus.publish(FrameworkEvent::StartLevelChanged {
        metadata: EventMetadata::new("start_level"),
        from,
        to,
    });
}

async fn align_bundle(manager: &BundleManager, bundle: &Bundle, level: u32) {
    bundle.set_start_level(level);
    let active = manager.active_start_level();
    let bus = manager.bus();

    if level <= active {
        if bundle.is_persistently_started() && !bundle.state().is_active_or_starting() {
            if let Err(error) = manager.start(bundle.id(), StartOptions::transient()).await {
                report_error(bus, Some(bundle.id()), "start", &error);
            }
        }
    } else if bundle.state().is_active_or_starting()
        && let Err(error) = manager.stop(bundle.id(), true).await
    {
        report_error(bus, Some(bundle.id()), "stop", &error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::ActivatorRegistry;
    use crate::testing::{Recording, manager};
    use std::sync::Mutex;
    use tessera_core::ResourceState;
    use tessera_test::test_host;

    const WAIT: Duration = Duration::from_secs(5);

    fn recording(names: &[&str]) -> (ActivatorRegistry, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut activators = ActivatorRegistry::new();
        for name in names {
            activators.register(*name, Arc::new(Recording::sharing(&calls)));
        }
        (activators, calls)
    }

    #[tokio::test]
    async fn test_increase_starts_level_by_level() {
        let (activators, calls) = recording(&["a", "b", "c", "d"]);
        let (mgr, recorder) = manager(activators);
        for (name, level) in [("c", 3), ("a", 1), ("b", 2), ("d", 1)] {
            let bundle = mgr
                .install(&test_host(name, "1.0").with_start_level(level))
                .unwrap();
            bundle.set_persistently_started(true);
        }

        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));
        let reached = levels.set_start_level(3).wait(WAIT).await.unwrap();

        assert_eq!(reached, 3);
        assert_eq!(levels.start_level(), 3);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["start a", "start d", "start b", "start c"]
        );
        assert_eq!(recorder.level_changes(), vec![(0, 3)]);
    }

    #[tokio::test]
    async fn test_decrease_stops_in_reverse_order() {
        let (activators, calls) = recording(&["a", "b", "c"]);
        let (mgr, recorder) = manager(activators);
        let mut ids = Vec::new();
        for (name, level) in [("a", 1), ("b", 2), ("c", 3)] {
            let bundle = mgr
                .install(&test_host(name, "1.0").with_start_level(level))
                .unwrap();
            bundle.set_persistently_started(true);
            ids.push(bundle.id());
        }
        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));
        levels.set_start_level(3).wait(WAIT).await.unwrap();
        calls.lock().unwrap().clear();

        levels.set_start_level(1).wait(WAIT).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["stop c", "stop b"]);
        assert_eq!(mgr.bundle(ids[0]).unwrap().state(), ResourceState::Active);
        assert_eq!(mgr.bundle(ids[2]).unwrap().state(), ResourceState::Resolved);
        assert!(mgr.bundle(ids[2]).unwrap().is_persistently_started());
        assert_eq!(recorder.level_changes(), vec![(0, 3), (3, 1)]);
    }

    #[tokio::test]
    async fn test_not_persistently_started_bundles_stay_put() {
        let (mgr, _) = manager(ActivatorRegistry::new());
        let idle = mgr.install(&test_host("idle", "1.0")).unwrap();
        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));
        levels.set_start_level(2).wait(WAIT).await.unwrap();
        assert_eq!(idle.state(), ResourceState::Installed);
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_walk_continues() {
        let mut activators = ActivatorRegistry::new();
        activators.register("bad", Arc::new(Recording::failing()));
        let (mgr, recorder) = manager(activators);
        let bad = mgr
            .install(&test_host("bad", "1.0").with_start_level(1))
            .unwrap();
        let good = mgr
            .install(&test_host("good", "1.0").with_start_level(2))
            .unwrap();
        bad.set_persistently_started(true);
        good.set_persistently_started(true);

        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));
        levels.set_start_level(2).wait(WAIT).await.unwrap();

        assert_eq!(bad.state(), ResourceState::Resolved);
        assert_eq!(good.state(), ResourceState::Active);
        assert_eq!(
            recorder.errors(),
            vec![(
                "start".to_string(),
                "activator of bundle #1 failed: refused".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_same_level_still_announces() {
        let (mgr, recorder) = manager(ActivatorRegistry::new());
        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));
        assert_eq!(levels.set_start_level(0).wait(WAIT).await.unwrap(), 0);
        assert_eq!(recorder.level_changes(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn test_queued_changes_run_in_order() {
        let (mgr, recorder) = manager(ActivatorRegistry::new());
        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));
        let first = levels.set_start_level(4);
        drop(levels.set_start_level(2));
        let last = levels.set_start_level(3);
        assert_eq!(first.target(), 4);
        assert_eq!(last.wait(WAIT).await.unwrap(), 3);
        assert_eq!(recorder.level_changes(), vec![(0, 4), (4, 2), (2, 3)]);
    }

    #[tokio::test]
    async fn test_bundle_start_level_moves_bundle() {
        let (mgr, _) = manager(ActivatorRegistry::new());
        let web = mgr
            .install(&test_host("web", "1.0").with_start_level(1))
            .unwrap();
        web.set_persistently_started(true);
        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));
        levels.set_start_level(2).wait(WAIT).await.unwrap();
        assert_eq!(web.state(), ResourceState::Active);

        levels.set_bundle_start_level(web.id(), 5).await.unwrap();
        assert_eq!(levels.bundle_start_level(web.id()).unwrap(), 5);
        assert_eq!(web.state(), ResourceState::Resolved);
        assert!(levels.is_persistently_started(web.id()).unwrap());

        levels.set_bundle_start_level(web.id(), 2).await.unwrap();
        assert_eq!(web.state(), ResourceState::Active);
    }

    #[tokio::test]
    async fn test_bundle_start_level_validation() {
        let (mgr, _) = manager(ActivatorRegistry::new());
        let system = tessera_core::system_resource(semver::Version::new(1, 0, 0), &[]).unwrap();
        let system = mgr.install_system(Arc::new(system)).unwrap();
        let web = mgr.install(&test_host("web", "1.0")).unwrap();
        let (levels, _worker) = StartLevel::spawn(Arc::clone(&mgr));

        assert!(matches!(
            levels.set_bundle_start_level(system.id(), 3).await,
            Err(FrameworkError::SystemBundleStartLevel)
        ));
        assert!(matches!(
            levels.set_bundle_start_level(web.id(), 0).await,
            Err(FrameworkError::InvalidStartLevel(0))
        ));
        assert!(matches!(
            levels.set_initial_bundle_start_level(0),
            Err(FrameworkError::InvalidStartLevel(0))
        ));
        levels.set_initial_bundle_start_level(4).unwrap();
        let late = mgr.install(&test_host("late", "1.0")).unwrap();
        assert_eq!(late.start_level(), 4);
    }
}
