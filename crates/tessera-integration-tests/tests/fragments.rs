//! Integration tests for fragment attachment and lifecycle.

mod common;

use common::Harness;
use tessera_core::{HostRef, ResourceState};
use tessera_framework::FrameworkError;
use tessera_test::{EventRecorder, test_fragment, test_host, test_importer};

#[tokio::test]
async fn test_fragment_joins_active_host() {
    let (framework, journal) = Harness::new()
        .deploy(test_host("web", "1.0"))
        .deploy(test_fragment("web.nl", "web"))
        .build();
    framework.start().await.unwrap();
    let web = framework.install_location("mem:web").await.unwrap();
    framework.start_bundle(web.id()).await.unwrap();
    let before = framework.load_class(web.id(), "web/nl/Extra.class").await.unwrap();
    assert_eq!(before, None);

    let fragment = framework.install_location("mem:web.nl").await.unwrap();
    framework.bundles().resolve(fragment.id()).await.unwrap();

    assert_eq!(fragment.state(), ResourceState::Resolved);
    assert_eq!(fragment.resource().host(), Some(web.id()));
    assert_eq!(web.resource().attached_fragments(), vec![fragment.id()]);
    // The host keeps running while its content grows.
    assert_eq!(web.state(), ResourceState::Active);
    assert_eq!(journal.calls(), vec!["start web"]);

    let after = framework.load_class(web.id(), "web/nl/Extra.class").await.unwrap();
    assert_eq!(after, web.module_identifier());
}

#[tokio::test]
async fn test_fragment_has_no_lifecycle() {
    let (framework, _journal) = Harness::new()
        .deploy(test_host("web", "1.0"))
        .deploy(test_fragment("web.nl", "web"))
        .build();
    framework.start().await.unwrap();
    framework.install_location("mem:web").await.unwrap();
    let fragment = framework.install_location("mem:web.nl").await.unwrap();

    assert!(matches!(
        framework.start_bundle(fragment.id()).await,
        Err(FrameworkError::FragmentLifecycle(id)) if id == fragment.id()
    ));
    assert!(matches!(
        framework.stop_bundle(fragment.id()).await,
        Err(FrameworkError::FragmentLifecycle(_))
    ));
}

#[tokio::test]
async fn test_fragment_without_host_stays_installed() {
    let (framework, _journal) = Harness::new()
        .deploy(test_fragment("orphan.nl", "orphan"))
        .build();
    framework.start().await.unwrap();
    let orphan = framework.install_location("mem:orphan.nl").await.unwrap();

    assert!(framework.bundles().resolve(orphan.id()).await.is_err());
    assert_eq!(orphan.state(), ResourceState::Installed);
    assert_eq!(orphan.resource().host(), None);
}

#[tokio::test]
async fn test_fragment_imports_become_host_imports() {
    let mut extension = test_importer("web.ext", &["com.acme.api"]);
    extension.fragment_host = Some(HostRef::new("web"));
    let (framework, _journal) = Harness::new()
        .deploy(tessera_test::test_exporter("api", "1.0", &["com.acme.api"]))
        .deploy(test_host("web", "1.0"))
        .deploy(extension)
        .build();
    framework.start().await.unwrap();
    let api = framework.install_location("mem:api").await.unwrap();
    let web = framework.install_location("mem:web").await.unwrap();
    let ext = framework.install_location("mem:web.ext").await.unwrap();

    framework.start_bundle(web.id()).await.unwrap();

    assert_eq!(ext.state(), ResourceState::Resolved);
    assert_eq!(api.state(), ResourceState::Resolved);
    let provider = framework
        .load_class(web.id(), "com/acme/api/Api.class")
        .await
        .unwrap();
    assert_eq!(provider, api.module_identifier());
}

#[tokio::test]
async fn test_uninstalling_fragment_detaches_it() {
    let (framework, _journal) = Harness::new()
        .deploy(test_host("web", "1.0"))
        .deploy(test_fragment("web.nl", "web"))
        .build();
    let recorder = EventRecorder::attach(framework.event_bus());
    framework.start().await.unwrap();
    let web = framework.install_location("mem:web").await.unwrap();
    let fragment = framework.install_location("mem:web.nl").await.unwrap();
    framework.start_bundle(web.id()).await.unwrap();
    assert_eq!(web.resource().attached_fragments(), vec![fragment.id()]);

    framework.uninstall_bundle(fragment.id()).await.unwrap();

    assert!(web.resource().attached_fragments().is_empty());
    assert_eq!(fragment.state(), ResourceState::Uninstalled);
    assert!(framework.bundles().bundle(fragment.id()).is_none());
    assert!(!framework.environment().is_resolved(fragment.id()));
    assert_eq!(
        recorder.transitions(fragment.id()).last(),
        Some(&ResourceState::Uninstalled)
    );
}
