//! Tests for kubewatch::engine — snapshot versioning, demo fallback with no
//! cluster, and state switching. Exercised against a disconnected facade;
//! cluster-backed paths are covered by the facade's own contract.

use std::sync::Arc;
use std::time::Duration;

use kubewatch::cache::ResourceCache;
use kubewatch::engine::{Engine, EngineConfig, EngineError};
use kubewatch::k8s::facade::Facade;
use kubewatch::registry::Registry;
use kubewatch::template::TemplateEngine;
use tokio_util::sync::CancellationToken;

fn build_engine(kind: &str) -> Arc<Engine> {
    let registry = Arc::new(Registry::new());
    registry.load_defaults().expect("defaults valid");
    Engine::new(
        registry,
        Arc::new(ResourceCache::default()),
        Arc::new(TemplateEngine::new()),
        Facade::disconnected(),
        EngineConfig {
            kind: kind.to_string(),
            namespace: None,
            refresh_interval: Duration::from_secs(60),
            kubeconfig: None,
        },
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn refresh_publishes_versioned_snapshots() {
    let engine = build_engine("pods");
    let mut rx = engine.subscribe();
    assert_eq!(rx.borrow().version, 0, "initial snapshot is empty");

    engine.refresh().await.expect("refresh");
    rx.changed().await.expect("snapshot emitted");
    let first = rx.borrow_and_update().clone();
    assert_eq!(first.version, 1);

    engine.refresh().await.expect("refresh");
    rx.changed().await.expect("snapshot emitted");
    let second = rx.borrow_and_update().clone();
    assert_eq!(second.version, 2, "versions are monotonic");
    engine.shutdown();
}

#[tokio::test]
async fn disconnected_engine_serves_demo_pods() {
    let engine = build_engine("pods");
    engine.refresh().await.expect("refresh");
    let snapshot = engine.subscribe().borrow().clone();
    assert!(!snapshot.rows.is_empty(), "demo payload fills the table");
    assert!(snapshot
        .rows
        .iter()
        .any(|r| r.identity.name.starts_with("api-server")));
    // Demo rows carry full identities so selection still works.
    assert!(snapshot.rows.iter().all(|r| !r.identity.uid.is_empty()));
    engine.shutdown();
}

#[tokio::test]
async fn set_kind_rejects_unknown_names() {
    let engine = build_engine("pods");
    let err = engine.set_kind("widgets").unwrap_err();
    assert!(matches!(err, EngineError::UnknownKind(name) if name == "widgets"));
    assert_eq!(engine.kind(), "pods", "state unchanged on error");
    engine.shutdown();
}

#[tokio::test]
async fn set_kind_switches_and_resets_sort() {
    let engine = build_engine("pods");
    engine.cycle_sort("NAME");
    assert!(engine.flags().sort.column.is_some());
    engine.set_kind("deployments").expect("known kind");
    assert_eq!(engine.kind(), "deployments");
    assert!(engine.flags().sort.column.is_none(), "sort reset on switch");
    engine.shutdown();
}

#[tokio::test]
async fn namespace_switch_toggles_namespace_column() {
    let engine = build_engine("pods");
    assert!(engine.flags().show_namespace, "all-namespaces shows the column");
    engine.set_namespace(Some("prod".to_string()), false);
    assert!(!engine.flags().show_namespace);
    assert_eq!(engine.namespace().as_deref(), Some("prod"));
    engine.shutdown();
}

#[tokio::test]
async fn filter_and_grouping_flags_flow_into_snapshots() {
    let engine = build_engine("pods");
    engine.set_filter("api".to_string());
    engine.refresh().await.expect("refresh");
    let snapshot = engine.subscribe().borrow().clone();
    assert_eq!(snapshot.flags.filter, "api");
    assert!(snapshot
        .rows
        .iter()
        .all(|r| r.identity.name.contains("api")));

    engine.toggle_grouping();
    assert!(!engine.flags().grouping);
    engine.shutdown();
}
