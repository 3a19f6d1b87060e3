//! Tests for kubewatch::registry — name/GVK index consistency, override
//! shadowing, and directory loading with skip-on-error.

use kube::core::GroupVersionKind;
use kubewatch::registry::Registry;

fn definition(name: &str, kind: &str, extra_column: Option<&str>) -> String {
    let extra = extra_column
        .map(|c| {
            format!(
                "    - name: {c}\n      template: \"{{{{ .metadata.uid }}}}\"\n"
            )
        })
        .unwrap_or_default();
    format!(
        r#"
apiVersion: kubewatch.io/v1
kind: ResourceDefinition
metadata:
  name: {name}
spec:
  kubernetes:
    group: apps
    version: v1
    kind: {kind}
    plural: {name}
    namespaced: true
  columns:
    - name: NAME
      template: "{{{{ .metadata.name }}}}"
{extra}"#
    )
}

// ── Registration and lookup ───────────────────────────────────────────────────

#[test]
fn register_indexes_by_name_and_gvk() {
    let registry = Registry::new();
    registry
        .register_yaml(&definition("deployments", "Deployment", None))
        .expect("valid");
    assert!(registry.get("deployments").is_some());
    let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");
    let by_gvk = registry.get_by_gvk(&gvk).expect("gvk indexed");
    assert_eq!(by_gvk.name, "deployments");
}

#[test]
fn later_registration_shadows_earlier_one() {
    let registry = Registry::new();
    registry
        .register_yaml(&definition("deployments", "Deployment", None))
        .expect("valid");
    registry
        .register_yaml(&definition("deployments", "Deployment", Some("UID")))
        .expect("valid");
    assert_eq!(registry.len(), 1);
    let def = registry.get("deployments").expect("present");
    assert_eq!(def.columns.len(), 2, "override with extra column wins");
    // The GVK index follows the override too.
    let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");
    assert_eq!(registry.get_by_gvk(&gvk).expect("indexed").columns.len(), 2);
}

#[test]
fn rebinding_a_name_to_a_new_gvk_drops_the_old_gvk_entry() {
    let registry = Registry::new();
    registry
        .register_yaml(&definition("workloads", "Deployment", None))
        .expect("valid");
    registry
        .register_yaml(&definition("workloads", "StatefulSet", None))
        .expect("valid");
    let old = GroupVersionKind::gvk("apps", "v1", "Deployment");
    let new = GroupVersionKind::gvk("apps", "v1", "StatefulSet");
    assert!(registry.get_by_gvk(&old).is_none(), "stale index entry");
    assert!(registry.get_by_gvk(&new).is_some());
    assert_eq!(registry.len(), 1);
}

#[test]
fn invalid_document_is_rejected_and_not_registered() {
    let registry = Registry::new();
    let result = registry.register_yaml("apiVersion: nope/v1\nkind: Huh");
    assert!(result.is_err());
    assert!(registry.is_empty());
}

#[test]
fn names_are_sorted() {
    let registry = Registry::new();
    registry
        .register_yaml(&definition("statefulsets", "StatefulSet", None))
        .expect("valid");
    registry
        .register_yaml(&definition("deployments", "Deployment", None))
        .expect("valid");
    assert_eq!(registry.names(), vec!["deployments", "statefulsets"]);
}

// ── Embedded defaults ─────────────────────────────────────────────────────────

#[test]
fn embedded_defaults_register_the_seven_kinds() {
    let registry = Registry::new();
    let loaded = registry.load_defaults().expect("defaults valid");
    assert_eq!(loaded, 7);
    for name in [
        "pods",
        "deployments",
        "statefulsets",
        "services",
        "ingresses",
        "configmaps",
        "secrets",
    ] {
        assert!(registry.get(name).is_some(), "{name} missing");
    }
    let pods = registry.get("pods").expect("pods");
    assert!(pods.columns.iter().any(|c| c.name == "STATUS"));
    assert!(pods.operation_for_key("D").is_some_and(|op| op.confirm));
}

// ── Directory loading ─────────────────────────────────────────────────────────

#[test]
fn load_dir_recurses_and_skips_invalid_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("team");
    std::fs::create_dir_all(&nested).expect("mkdir");
    std::fs::write(
        dir.path().join("deployments.yaml"),
        definition("deployments", "Deployment", None),
    )
    .expect("write");
    std::fs::write(
        nested.join("statefulsets.yml"),
        definition("statefulsets", "StatefulSet", None),
    )
    .expect("write");
    std::fs::write(nested.join("broken.yaml"), "kind: Nonsense").expect("write");
    std::fs::write(nested.join("notes.txt"), "ignored").expect("write");

    let registry = Registry::new();
    let report = registry.load_dir(dir.path());
    assert_eq!(report.loaded, 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(registry.get("deployments").is_some());
    assert!(registry.get("statefulsets").is_some());
}

#[test]
fn user_override_shadows_embedded_default() {
    let registry = Registry::new();
    registry.load_defaults().expect("defaults valid");
    let dir = tempfile::tempdir().expect("tempdir");
    let slim = r#"
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
"#;
    std::fs::write(dir.path().join("pods.yaml"), slim).expect("write");
    let report = registry.load_dir(dir.path());
    assert_eq!(report.loaded, 1);
    let pods = registry.get("pods").expect("pods");
    assert_eq!(pods.columns.len(), 1, "override replaced the default");
}
