//! Tests for kubewatch::render — pipeline ordering guarantees, multi-context
//! stable sort, grouping/aggregation, filtering, and sort cycling.

use std::sync::Arc;

use kubewatch::definition::ResourceDefinition;
use kubewatch::registry::Registry;
use kubewatch::render::{render_snapshot, RenderFlags, SortSpec, CONTEXT_COLUMN};
use kubewatch::resource::Resource;
use kubewatch::template::TemplateEngine;
use serde_json::json;

const POD_DEF: &str = r#"
apiVersion: kubewatch.io/v1
kind: ResourceDefinition
metadata:
  name: pods
spec:
  kubernetes:
    group: ""
    version: v1
    kind: Pod
    plural: pods
    namespaced: true
  columns:
    - name: NAME
      template: "{{ .metadata.name }}"
      width: 24
      sortable: true
    - name: STATUS
      template: "{{ .status.phase | default \"Unknown\" }}"
      width: 12
      sortable: true
"#;

const DEPLOY_DEF: &str = r#"
apiVersion: kubewatch.io/v1
kind: ResourceDefinition
metadata:
  name: deployments
spec:
  kubernetes:
    group: apps
    version: v1
    kind: Deployment
    plural: deployments
    namespaced: true
  columns:
    - name: NAME
      template: "{{ .metadata.name }}"
      width: 24
      sortable: true
    - name: AVAILABLE
      template: "{{ .status.availableReplicas | default 0 }}"
      width: 9
  grouping:
    enabled: true
    groupBy:
      - "{{ .metadata.name }}"
      - "{{ . | containerImages }}"
    aggregations:
      - column: AVAILABLE
        op: sum
"#;

fn pod(ctx: &str, name: &str, uid: &str) -> Resource {
    Resource::new(
        ctx,
        json!({
            "metadata": {"name": name, "namespace": "default", "uid": uid},
            "status": {"phase": "Running"}
        }),
    )
}

fn deployment(name: &str, image: &str, available: i64, uid: &str) -> Resource {
    Resource::new(
        "",
        json!({
            "metadata": {"name": name, "namespace": "default", "uid": uid},
            "spec": {"template": {"spec": {"containers": [{"image": image}]}}},
            "status": {"availableReplicas": available}
        }),
    )
}

fn pods_def() -> Arc<ResourceDefinition> {
    Arc::new(ResourceDefinition::from_yaml(POD_DEF).expect("valid definition"))
}

fn deploy_def() -> Arc<ResourceDefinition> {
    Arc::new(ResourceDefinition::from_yaml(DEPLOY_DEF).expect("valid definition"))
}

// ── Multi-context stable sort (scenario S1) ──────────────────────────────────

#[test]
fn multi_context_sort_is_stable_across_refresh_permutations() {
    let def = pods_def();
    let engine = TemplateEngine::new();
    let flags = RenderFlags {
        multi_context: true,
        sort: SortSpec {
            column: Some(CONTEXT_COLUMN.to_string()),
            ascending: true,
        },
        ..RenderFlags::default()
    };

    let first = vec![pod("B", "pod-1", "u1"), pod("A", "pod-2", "u2"), pod("C", "pod-3", "u3")];
    let mut second = first.clone();
    second.reverse();

    let names = |resources: &[Resource]| -> Vec<(String, String)> {
        let snap = render_snapshot(1, &def, &engine, &flags, resources, Vec::new(), Vec::new());
        snap.rows
            .iter()
            .map(|r| (r.identity.context.clone(), r.identity.name.clone()))
            .collect()
    };

    let expected = vec![
        ("A".to_string(), "pod-2".to_string()),
        ("B".to_string(), "pod-1".to_string()),
        ("C".to_string(), "pod-3".to_string()),
    ];
    assert_eq!(names(&first), expected);
    assert_eq!(names(&second), expected, "input permutation must not matter");
}

#[test]
fn identical_input_renders_identical_order() {
    let def = pods_def();
    let engine = TemplateEngine::new();
    let flags = RenderFlags::default();
    let resources = vec![pod("", "b", "u1"), pod("", "a", "u2"), pod("", "c", "u3")];
    let snap1 = render_snapshot(1, &def, &engine, &flags, &resources, Vec::new(), Vec::new());
    let snap2 = render_snapshot(2, &def, &engine, &flags, &resources, Vec::new(), Vec::new());
    let order1: Vec<_> = snap1.rows.iter().map(|r| r.identity.name.clone()).collect();
    let order2: Vec<_> = snap2.rows.iter().map(|r| r.identity.name.clone()).collect();
    assert_eq!(order1, order2);
    // With no sort column the tie-break alone orders rows.
    assert_eq!(order1, vec!["a", "b", "c"]);
}

#[test]
fn descending_sort_reverses_primary_but_not_tie_break() {
    let def = pods_def();
    let engine = TemplateEngine::new();
    let mut flags = RenderFlags {
        multi_context: true,
        ..RenderFlags::default()
    };
    flags.sort = SortSpec {
        column: Some(CONTEXT_COLUMN.to_string()),
        ascending: false,
    };
    // Two rows tie on context "B"; they must order by name ascending anyway.
    let resources = vec![
        pod("A", "x", "u1"),
        pod("B", "zeta", "u2"),
        pod("B", "alpha", "u3"),
    ];
    let snap = render_snapshot(1, &def, &engine, &flags, &resources, Vec::new(), Vec::new());
    let order: Vec<_> = snap.rows.iter().map(|r| r.identity.name.clone()).collect();
    assert_eq!(order, vec!["alpha", "zeta", "x"]);
}

// ── Synthetic columns ─────────────────────────────────────────────────────────

#[test]
fn context_and_namespace_columns_appear_per_flags() {
    let def = pods_def();
    let engine = TemplateEngine::new();
    let flags = RenderFlags {
        multi_context: true,
        show_namespace: true,
        ..RenderFlags::default()
    };
    let snap = render_snapshot(1, &def, &engine, &flags, &[pod("prod", "p", "u")], Vec::new(), Vec::new());
    let headers: Vec<_> = snap.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(headers, vec!["CONTEXT", "NAMESPACE", "NAME", "STATUS"]);
    assert_eq!(snap.rows[0].cells[0], "prod");
    assert_eq!(snap.rows[0].cells[1], "default");
}

// ── Grouping (scenario S4) ────────────────────────────────────────────────────

#[test]
fn deployments_with_same_name_but_different_images_form_two_groups() {
    let def = deploy_def();
    let engine = TemplateEngine::new();
    let flags = RenderFlags {
        grouping: true,
        ..RenderFlags::default()
    };
    let resources = vec![
        deployment("test-app", "registry/app:v1", 1, "u1"),
        deployment("test-app", "registry/app:v2", 1, "u2"),
    ];
    let snap = render_snapshot(1, &def, &engine, &flags, &resources, Vec::new(), Vec::new());
    assert_eq!(snap.rows.len(), 2, "different images must not collapse");
    assert!(snap.rows.iter().all(|r| r.count == 1));
}

#[test]
fn deployments_with_same_name_and_image_form_one_group_with_count() {
    let def = deploy_def();
    let engine = TemplateEngine::new();
    let flags = RenderFlags {
        grouping: true,
        ..RenderFlags::default()
    };
    let resources = vec![
        deployment("test-app", "registry/app:v1", 2, "u1"),
        deployment("test-app", "registry/app:v1", 3, "u2"),
    ];
    let snap = render_snapshot(1, &def, &engine, &flags, &resources, Vec::new(), Vec::new());
    assert_eq!(snap.rows.len(), 1);
    assert_eq!(snap.rows[0].count, 2);
    // AVAILABLE aggregates by sum.
    assert_eq!(snap.rows[0].cells[1], "5");
}

#[test]
fn grouping_disabled_keeps_rows_apart() {
    let def = deploy_def();
    let engine = TemplateEngine::new();
    let flags = RenderFlags {
        grouping: false,
        ..RenderFlags::default()
    };
    let resources = vec![
        deployment("test-app", "registry/app:v1", 2, "u1"),
        deployment("test-app", "registry/app:v1", 3, "u2"),
    ];
    let snap = render_snapshot(1, &def, &engine, &flags, &resources, Vec::new(), Vec::new());
    assert_eq!(snap.rows.len(), 2);
}

// ── Filtering ─────────────────────────────────────────────────────────────────

#[test]
fn substring_filter_is_case_insensitive_over_rendered_cells() {
    let def = pods_def();
    let engine = TemplateEngine::new();
    let flags = RenderFlags {
        filter: "RUN".to_string(),
        ..RenderFlags::default()
    };
    let snap = render_snapshot(1, &def, &engine, &flags, &[pod("", "p1", "u1")], Vec::new(), Vec::new());
    assert_eq!(snap.rows.len(), 1, "STATUS cell contains 'Running'");

    let flags = RenderFlags {
        filter: "nomatch".to_string(),
        ..RenderFlags::default()
    };
    let snap = render_snapshot(2, &def, &engine, &flags, &[pod("", "p1", "u1")], Vec::new(), Vec::new());
    assert!(snap.rows.is_empty());
}

#[test]
fn named_filter_evaluates_condition_against_the_object() {
    let yaml = r#"
apiVersion: kubewatch.io/v1
kind: ResourceDefinition
metadata:
  name: pods
spec:
  kubernetes:
    group: ""
    version: v1
    kind: Pod
    plural: pods
    namespaced: true
  columns:
    - name: NAME
      template: "{{ .metadata.name }}"
  filters:
    - name: terminating
      condition: "{{ .metadata.deletionTimestamp }}"
"#;
    let def = Arc::new(ResourceDefinition::from_yaml(yaml).expect("valid"));
    let engine = TemplateEngine::new();
    let flags = RenderFlags {
        filter: "@terminating".to_string(),
        ..RenderFlags::default()
    };
    let terminating = Resource::new(
        "",
        json!({"metadata": {"name": "dying", "namespace": "default", "uid": "u1",
                             "deletionTimestamp": "2024-01-01T00:00:00Z"}}),
    );
    let healthy = pod("", "alive", "u2");
    let snap = render_snapshot(
        1,
        &def,
        &engine,
        &flags,
        &[terminating, healthy],
        Vec::new(),
        Vec::new(),
    );
    assert_eq!(snap.rows.len(), 1);
    assert_eq!(snap.rows[0].identity.name, "dying");
}

// ── Embedded ingress definition (scenario S5) ────────────────────────────────

#[test]
fn embedded_ingress_definition_renders_ports_by_tls_presence() {
    let registry = Registry::new();
    registry.load_defaults().expect("embedded defaults are valid");
    let def = registry.get("ingresses").expect("ingresses registered");
    let engine = TemplateEngine::new();
    let flags = RenderFlags::default();

    let plain = Resource::new(
        "",
        json!({"metadata": {"name": "web", "namespace": "default", "uid": "u1"},
               "spec": {"rules": [{"host": "example.com"}]}}),
    );
    let tls = Resource::new(
        "",
        json!({"metadata": {"name": "web-tls", "namespace": "default", "uid": "u2"},
               "spec": {"rules": [{"host": "example.com"}],
                         "tls": [{"secretName": "a"}, {"secretName": "b"}]}}),
    );
    let snap = render_snapshot(1, &def, &engine, &flags, &[plain, tls], Vec::new(), Vec::new());
    let ports_idx = snap
        .columns
        .iter()
        .position(|c| c.name == "PORTS")
        .expect("PORTS column");
    let by_name = |name: &str| -> String {
        snap.rows
            .iter()
            .find(|r| r.identity.name == name)
            .map(|r| r.cells[ports_idx].clone())
            .expect("row present")
    };
    assert_eq!(by_name("web"), "80");
    assert_eq!(by_name("web-tls"), "80, 443");
}

// ── Sort cycling ──────────────────────────────────────────────────────────────

#[test]
fn sort_cycle_walks_ascending_descending_none() {
    let mut sort = SortSpec::default();
    sort.cycle("NAME");
    assert_eq!(sort.column.as_deref(), Some("NAME"));
    assert!(sort.ascending);
    sort.cycle("NAME");
    assert!(!sort.ascending);
    sort.cycle("NAME");
    assert_eq!(sort.column, None);
}

#[test]
fn sort_cycle_restarts_on_a_different_column() {
    let mut sort = SortSpec::default();
    sort.cycle("NAME");
    sort.cycle("STATUS");
    assert_eq!(sort.column.as_deref(), Some("STATUS"));
    assert!(sort.ascending);
}

// ── Rendering errors stay contained (taxonomy: rendering) ────────────────────

#[test]
fn template_error_in_one_column_keeps_the_row() {
    let yaml = r#"
apiVersion: kubewatch.io/v1
kind: ResourceDefinition
metadata:
  name: pods
spec:
  kubernetes:
    group: ""
    version: v1
    kind: Pod
    plural: pods
    namespaced: true
  columns:
    - name: NAME
      template: "{{ .metadata.name }}"
    - name: BROKEN
      template: "{{ .x | trunc \"not-a-number\" }}"
"#;
    let def = Arc::new(ResourceDefinition::from_yaml(yaml).expect("valid"));
    let engine = TemplateEngine::new();
    let snap = render_snapshot(
        1,
        &def,
        &engine,
        &RenderFlags::default(),
        &[pod("", "p1", "u1")],
        Vec::new(),
        Vec::new(),
    );
    assert_eq!(snap.rows.len(), 1);
    assert_eq!(snap.rows[0].cells[0], "p1");
    assert!(snap.rows[0].cells[1].starts_with("<error:"));
    assert!(engine.render_errors() > 0);
}
