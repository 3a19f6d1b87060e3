//! Process-wide resource definition registry.
//!
//! Read-mostly: rendering threads look definitions up concurrently while
//! (re)loads take the write lock. Definitions are indexed by `metadata.name`
//! and by group/version/kind; later registrations of the same name override
//! earlier ones so user overrides shadow the embedded defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use kube::core::GroupVersionKind;
use tracing::warn;

use crate::definition::{DefinitionError, ResourceDefinition};

// Embedded default definitions, compiled into the binary.
const DEFAULTS: &[(&str, &str)] = &[
    ("pods", include_str!("../defs/pods.yaml")),
    ("deployments", include_str!("../defs/deployments.yaml")),
    ("statefulsets", include_str!("../defs/statefulsets.yaml")),
    ("services", include_str!("../defs/services.yaml")),
    ("ingresses", include_str!("../defs/ingresses.yaml")),
    ("configmaps", include_str!("../defs/configmaps.yaml")),
    ("secrets", include_str!("../defs/secrets.yaml")),
];

#[derive(Default)]
struct Indexes {
    by_name: HashMap<String, Arc<ResourceDefinition>>,
    by_gvk: HashMap<GroupVersionKind, Arc<ResourceDefinition>>,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<Indexes>,
}

/// Result of loading a directory of definition files. Invalid documents are
/// skipped so one bad override cannot take down the rest.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<(PathBuf, DefinitionError)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated definition, replacing any previous definition
    /// with the same name. Both indexes are updated together: the shadowed
    /// definition's GVK entry is removed before the new one is inserted, so
    /// the name and GVK indexes never disagree.
    pub fn register(&self, def: ResourceDefinition) -> Arc<ResourceDefinition> {
        let def = Arc::new(def);
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(previous) = inner.by_name.insert(def.name.clone(), def.clone()) {
            if previous.gvk != def.gvk {
                let still_current = inner
                    .by_gvk
                    .get(&previous.gvk)
                    .is_some_and(|d| d.name == previous.name);
                if still_current {
                    inner.by_gvk.remove(&previous.gvk);
                }
            }
        }
        inner.by_gvk.insert(def.gvk.clone(), def.clone());
        def
    }

    /// Parse, validate and register a YAML document.
    pub fn register_yaml(&self, text: &str) -> Result<Arc<ResourceDefinition>, DefinitionError> {
        Ok(self.register(ResourceDefinition::from_yaml(text)?))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResourceDefinition>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .by_name
            .get(name)
            .cloned()
    }

    pub fn get_by_gvk(&self, gvk: &GroupVersionKind) -> Option<Arc<ResourceDefinition>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .by_gvk
            .get(gvk)
            .cloned()
    }

    /// All registered names, sorted for stable menus.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .by_name
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.by_name.clear();
        inner.by_gvk.clear();
    }

    /// Register the embedded default definitions. The embedded set is
    /// validated like any other input; a failure here is a build defect.
    pub fn load_defaults(&self) -> Result<usize, DefinitionError> {
        for (_, text) in DEFAULTS {
            self.register_yaml(text)?;
        }
        Ok(DEFAULTS.len())
    }

    /// Recursively load user override documents (`*.yaml`, `*.yml`) from a
    /// directory. Overrides shadow defaults by `metadata.name`. Invalid
    /// documents are logged and skipped, others continue.
    pub fn load_dir(&self, dir: &Path) -> LoadReport {
        let mut report = LoadReport::default();
        self.load_dir_into(dir, &mut report);
        report
    }

    fn load_dir_into(&self, dir: &Path, report: &mut LoadReport) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "cannot read resource override directory");
                return;
            }
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        paths.sort();
        for path in paths {
            if path.is_dir() {
                self.load_dir_into(&path, report);
                continue;
            }
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
            if !is_yaml {
                continue;
            }
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) => {
                    warn!(file = %path.display(), %err, "cannot read definition file");
                    continue;
                }
            };
            match self.register_yaml(&text) {
                Ok(def) => {
                    report.loaded += 1;
                    tracing::debug!(file = %path.display(), name = %def.name, "loaded definition");
                }
                Err(err) => {
                    warn!(file = %path.display(), %err, "skipping invalid definition");
                    report.skipped.push((path, err));
                }
            }
        }
    }
}
