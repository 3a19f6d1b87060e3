//! Declarative resource definitions — the documents that teach the tool how
//! to display a Kubernetes kind.
//!
//! A definition arrives as a YAML document with `apiVersion: kubewatch.io/v1`
//! and `kind: ResourceDefinition`, is validated here, and is then indexed by
//! the registry both by `metadata.name` and by group/version/kind.

use kube::core::{ApiResource, GroupVersionKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const API_VERSION: &str = "kubewatch.io/v1";
pub const DOCUMENT_KIND: &str = "ResourceDefinition";

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to parse definition: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported apiVersion '{found}' (expected '{API_VERSION}')")]
    ApiVersion { found: String },
    #[error("unsupported document kind '{found}' (expected '{DOCUMENT_KIND}')")]
    DocumentKind { found: String },
    #[error("metadata.name must be a non-empty lowercase identifier, got '{found}'")]
    BadName { found: String },
    #[error("definition '{name}': spec.kubernetes.kind and plural must be non-empty")]
    BadKubernetesSpec { name: String },
    #[error("definition '{name}': at least one column is required")]
    NoColumns { name: String },
    #[error("definition '{name}': column '{column}' has an empty template")]
    EmptyTemplate { name: String, column: String },
    #[error("definition '{name}': column '{column}' has width {width}, minimum is 1")]
    BadWidth {
        name: String,
        column: String,
        width: u16,
    },
    #[error("definition '{name}': duplicate column '{column}'")]
    DuplicateColumn { name: String, column: String },
    #[error("definition '{name}': grouping.groupBy must not be empty when grouping is enabled")]
    EmptyGroupBy { name: String },
    #[error("definition '{name}': aggregation references unknown column '{column}'")]
    UnknownAggregationColumn { name: String, column: String },
    #[error("definition '{name}': operation '{operation}' has an empty keybinding")]
    EmptyKeybinding { name: String, operation: String },
    #[error("definition '{name}': filter '{filter}' has an empty condition")]
    EmptyFilterCondition { name: String, filter: String },
}

// ─── On-disk document model ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionDoc {
    pub api_version: String,
    pub kind: String,
    pub metadata: DefinitionMeta,
    pub spec: DefinitionSpec,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefinitionMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefinitionSpec {
    pub kubernetes: KubernetesSpec,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
    #[serde(default)]
    pub grouping: Option<GroupingSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KubernetesSpec {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    #[serde(default = "default_true")]
    pub namespaced: bool,
}

fn default_true() -> bool {
    true
}

fn default_width() -> u16 {
    12
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    /// Header text, uppercase by convention.
    pub name: String,
    /// Cell template; required and non-empty.
    pub template: String,
    /// Advisory width; rendering may shrink-to-fit.
    #[serde(default = "default_width")]
    pub width: u16,
    /// Columns with lower priority are hidden first on narrow terminals.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub align: Align,
    #[serde(default)]
    pub sortable: bool,
    /// Optional template producing the sort value (overrides rendered text).
    #[serde(default)]
    pub sort_key: Option<String>,
    /// Optional boolean template; false suppresses rendering of the cell.
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub name: String,
    pub keybinding: String,
    /// The kubectl-equivalent command template; informational for built-in
    /// operations, executable for user-defined ones.
    pub command: String,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub confirm_message: Option<String>,
    #[serde(default)]
    pub requires_running: bool,
    #[serde(default)]
    pub interactive: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationSpec {
    pub column: String,
    pub op: AggregateOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Min,
    Max,
    Count,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterSpec {
    pub name: String,
    pub condition: String,
}

// ─── Validated definition ─────────────────────────────────────────────────────

/// A validated resource definition, ready for registration.
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    pub name: String,
    pub description: Option<String>,
    pub gvk: GroupVersionKind,
    pub plural: String,
    pub namespaced: bool,
    pub columns: Vec<ColumnSpec>,
    pub operations: Vec<OperationSpec>,
    pub grouping: Option<GroupingSpec>,
    pub filters: Vec<FilterSpec>,
}

impl ResourceDefinition {
    pub fn from_yaml(text: &str) -> Result<Self, DefinitionError> {
        let doc: DefinitionDoc = serde_yaml::from_str(text)?;
        Self::validate(doc)
    }

    /// Validate a parsed document. Invalid documents are rejected with a
    /// descriptive error naming the offending field.
    pub fn validate(doc: DefinitionDoc) -> Result<Self, DefinitionError> {
        if doc.api_version != API_VERSION {
            return Err(DefinitionError::ApiVersion {
                found: doc.api_version,
            });
        }
        if doc.kind != DOCUMENT_KIND {
            return Err(DefinitionError::DocumentKind { found: doc.kind });
        }
        let name = doc.metadata.name.clone();
        if name.is_empty() || name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(DefinitionError::BadName { found: name });
        }
        let k = &doc.spec.kubernetes;
        if k.kind.is_empty() || k.plural.is_empty() || k.version.is_empty() {
            return Err(DefinitionError::BadKubernetesSpec { name });
        }
        if doc.spec.columns.is_empty() {
            return Err(DefinitionError::NoColumns { name });
        }
        let mut seen = std::collections::HashSet::new();
        for col in &doc.spec.columns {
            if col.template.trim().is_empty() {
                return Err(DefinitionError::EmptyTemplate {
                    name,
                    column: col.name.clone(),
                });
            }
            if col.width < 1 {
                return Err(DefinitionError::BadWidth {
                    name,
                    column: col.name.clone(),
                    width: col.width,
                });
            }
            if !seen.insert(col.name.clone()) {
                return Err(DefinitionError::DuplicateColumn {
                    name,
                    column: col.name.clone(),
                });
            }
        }
        if let Some(grouping) = &doc.spec.grouping {
            if grouping.enabled && grouping.group_by.is_empty() {
                return Err(DefinitionError::EmptyGroupBy { name });
            }
            for agg in &grouping.aggregations {
                if !doc.spec.columns.iter().any(|c| c.name == agg.column) {
                    return Err(DefinitionError::UnknownAggregationColumn {
                        name,
                        column: agg.column.clone(),
                    });
                }
            }
        }
        for op in &doc.spec.operations {
            if op.keybinding.is_empty() {
                return Err(DefinitionError::EmptyKeybinding {
                    name,
                    operation: op.name.clone(),
                });
            }
        }
        for filter in &doc.spec.filters {
            if filter.condition.trim().is_empty() {
                return Err(DefinitionError::EmptyFilterCondition {
                    name,
                    filter: filter.name.clone(),
                });
            }
        }

        Ok(Self {
            name,
            description: doc.metadata.description,
            gvk: GroupVersionKind::gvk(&k.group, &k.version, &k.kind),
            plural: k.plural.clone(),
            namespaced: k.namespaced,
            columns: doc.spec.columns,
            operations: doc.spec.operations,
            grouping: doc.spec.grouping,
            filters: doc.spec.filters,
        })
    }

    /// The dynamic API descriptor used to build an `Api<DynamicObject>`.
    pub fn api_resource(&self) -> ApiResource {
        let api_version = if self.gvk.group.is_empty() {
            self.gvk.version.clone()
        } else {
            format!("{}/{}", self.gvk.group, self.gvk.version)
        };
        ApiResource {
            group: self.gvk.group.clone(),
            version: self.gvk.version.clone(),
            api_version,
            kind: self.gvk.kind.clone(),
            plural: self.plural.clone(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn operation_for_key(&self, key: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|o| o.keybinding == key)
    }

    pub fn filter(&self, name: &str) -> Option<&FilterSpec> {
        self.filters.iter().find(|f| f.name == name)
    }

    /// Whether grouping is declared and enabled for this kind.
    pub fn grouping_enabled(&self) -> bool {
        self.grouping.as_ref().is_some_and(|g| g.enabled)
    }

    /// True for kinds whose rows can carry pod logs (pods and pod owners).
    pub fn pod_bearing(&self) -> bool {
        matches!(
            self.gvk.kind.as_str(),
            "Pod" | "Deployment" | "StatefulSet"
        )
    }
}
