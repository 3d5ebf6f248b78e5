//! Integration tests for the start-level scheduler.
//!
//! Bundles are installed after the framework has started, then the active
//! start level is moved up and down through the public API.

mod common;

use common::{Harness, WAIT};
use tessera_core::ResourceState;
use tessera_framework::{Framework, FrameworkError};
use tessera_test::{EventRecorder, test_host};

fn layered() -> (Framework, common::Journal) {
    Harness::new()
        .deploy(test_host("core", "1.0").with_start_level(1))
        .deploy(test_host("storage", "1.0").with_start_level(2))
        .deploy(test_host("web", "1.0").with_start_level(3))
        .deploy(test_host("admin", "1.0").with_start_level(2))
        .build()
}

async fn install_and_start(framework: &Framework, names: &[&str]) {
    for name in names {
        let bundle = framework
            .install_location(&format!("mem:{name}"))
            .await
            .unwrap();
        framework.start_bundle(bundle.id()).await.unwrap();
    }
}

#[tokio::test]
async fn test_raising_level_starts_bundles_level_by_level() {
    let (framework, journal) = layered();
    framework.start().await.unwrap();
    install_and_start(&framework, &["core", "storage", "web", "admin"]).await;

    // Only level 1 is active; the rest are deferred.
    assert_eq!(journal.calls(), vec!["start core"]);
    let web = framework.bundles().bundle_at("mem:web").unwrap();
    assert_eq!(web.state(), ResourceState::Installed);
    assert!(web.is_persistently_started());

    let reached = framework
        .start_level()
        .unwrap()
        .set_start_level(3)
        .wait(WAIT)
        .await
        .unwrap();
    assert_eq!(reached, 3);
    assert_eq!(
        journal.calls(),
        vec!["start core", "start storage", "start admin", "start web"]
    );
    assert_eq!(web.state(), ResourceState::Active);
}

#[tokio::test]
async fn test_lowering_level_stops_in_reverse_order() {
    let (framework, journal) = layered();
    framework.start().await.unwrap();
    install_and_start(&framework, &["core", "storage", "web", "admin"]).await;
    let levels = framework.start_level().unwrap();
    levels.set_start_level(3).wait(WAIT).await.unwrap();
    journal.clear();

    levels.set_start_level(1).wait(WAIT).await.unwrap();
    assert_eq!(
        journal.calls(),
        vec!["stop web", "stop admin", "stop storage"]
    );
    let storage = framework.bundles().bundle_at("mem:storage").unwrap();
    assert_eq!(storage.state(), ResourceState::Resolved);
    // Stopping through a level change keeps the bundle persistently started.
    assert!(storage.is_persistently_started());

    levels.set_start_level(2).wait(WAIT).await.unwrap();
    assert_eq!(storage.state(), ResourceState::Active);
}

#[tokio::test]
async fn test_level_changes_are_announced() {
    let (framework, _journal) = layered();
    let recorder = EventRecorder::attach(framework.event_bus());
    framework.start().await.unwrap();
    let levels = framework.start_level().unwrap();

    levels.set_start_level(3).wait(WAIT).await.unwrap();
    levels.set_start_level(3).wait(WAIT).await.unwrap();
    levels.set_start_level(2).wait(WAIT).await.unwrap();

    assert_eq!(recorder.level_changes(), vec![(0, 1), (1, 3), (3, 3), (3, 2)]);
}

#[tokio::test]
async fn test_persistently_stopped_bundle_stays_down() {
    let (framework, journal) = layered();
    framework.start().await.unwrap();
    install_and_start(&framework, &["core", "storage"]).await;
    let levels = framework.start_level().unwrap();
    levels.set_start_level(2).wait(WAIT).await.unwrap();

    let storage = framework.bundles().bundle_at("mem:storage").unwrap();
    framework.stop_bundle(storage.id()).await.unwrap();
    assert!(!storage.is_persistently_started());

    levels.set_start_level(1).wait(WAIT).await.unwrap();
    levels.set_start_level(2).wait(WAIT).await.unwrap();
    assert_eq!(storage.state(), ResourceState::Resolved);
    assert_eq!(
        journal.calls(),
        vec!["start core", "start storage", "stop storage"]
    );
}

#[tokio::test]
async fn test_moving_bundle_level_applies_immediately() {
    let (framework, journal) = layered();
    framework.start().await.unwrap();
    install_and_start(&framework, &["web"]).await;
    let levels = framework.start_level().unwrap();
    let web = framework.bundles().bundle_at("mem:web").unwrap();
    assert_eq!(levels.bundle_start_level(web.id()).unwrap(), 3);

    levels.set_bundle_start_level(web.id(), 1).await.unwrap();
    assert_eq!(web.state(), ResourceState::Active);

    levels.set_bundle_start_level(web.id(), 4).await.unwrap();
    assert_eq!(web.state(), ResourceState::Resolved);
    assert_eq!(journal.calls(), vec!["start web", "stop web"]);

    assert!(matches!(
        levels
            .set_bundle_start_level(tessera_core::SYSTEM_RESOURCE_ID, 2)
            .await,
        Err(FrameworkError::SystemBundleStartLevel)
    ));
}

#[tokio::test]
async fn test_stop_walks_every_level_down() {
    let (framework, journal) = layered();
    framework.start().await.unwrap();
    install_and_start(&framework, &["core", "storage", "web"]).await;
    framework
        .start_level()
        .unwrap()
        .set_start_level(3)
        .wait(WAIT)
        .await
        .unwrap();
    journal.clear();

    framework.stop().await.unwrap();
    assert_eq!(
        journal.calls(),
        vec!["stop web", "stop storage", "stop core"]
    );
    assert_eq!(framework.start_level().unwrap().start_level(), 0);
}

#[tokio::test]
async fn test_level_zero_bundle_is_stopped_with_the_framework() {
    let (framework, journal) = Harness::new()
        .deploy(test_host("zero", "1.0").with_start_level(0))
        .property("tessera.auto.start", "mem:zero")
        .build();
    framework.start().await.unwrap();

    let zero = framework.bundles().bundle_at("mem:zero").unwrap();
    assert_eq!(zero.start_level(), 1);
    assert_eq!(zero.state(), ResourceState::Active);

    framework.stop().await.unwrap();
    assert_eq!(zero.state(), ResourceState::Resolved);
    assert_eq!(journal.calls(), vec!["start zero", "stop zero"]);
}
