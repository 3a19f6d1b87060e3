//! The tagged resource value and its logical identity.
//!
//! Every Kubernetes object flows through the system as a [`Resource`]: a raw
//! JSON tree tagged with the cluster context it came from. Kind-specific
//! behavior lives in the `ResourceDefinition` looked up from the registry, so
//! there is exactly one concrete type here regardless of how many kinds the
//! tool displays.

use serde_json::Value;

/// A single Kubernetes object plus the context it was fetched from.
#[derive(Debug, Clone)]
pub struct Resource {
    /// The kubeconfig context this object belongs to (empty in single-cluster mode).
    pub context: String,
    /// The object as returned by the API server, untyped.
    pub object: Value,
}

impl Resource {
    pub fn new(context: impl Into<String>, object: Value) -> Self {
        Self {
            context: context.into(),
            object,
        }
    }

    fn meta_str(&self, field: &str) -> &str {
        self.object
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.meta_str("name")
    }

    pub fn namespace(&self) -> &str {
        self.meta_str("namespace")
    }

    pub fn uid(&self) -> &str {
        self.meta_str("uid")
    }

    pub fn creation_timestamp(&self) -> Option<&str> {
        let ts = self.meta_str("creationTimestamp");
        if ts.is_empty() {
            None
        } else {
            Some(ts)
        }
    }

    /// The logical identity of this object for selection tracking.
    pub fn identity(&self, kind: &str) -> ResourceIdentity {
        ResourceIdentity {
            context: self.context.clone(),
            namespace: self.namespace().to_string(),
            kind: kind.to_string(),
            name: self.name().to_string(),
            uid: self.uid().to_string(),
        }
    }
}

/// The `(context, namespace, kind, name, uid)` tuple that identifies a row
/// across refreshes, re-sorts and additions/removals. Selection is always
/// expressed in identities, never in row indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceIdentity {
    pub context: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl ResourceIdentity {
    /// Machine-parseable location string: "ctx:kind/ns/name" (context and
    /// namespace omitted when empty).
    pub fn location(&self) -> String {
        let loc = if self.namespace.is_empty() {
            format!("{}/{}", self.kind, self.name)
        } else {
            format!("{}/{}/{}", self.kind, self.namespace, self.name)
        };
        if self.context.is_empty() {
            loc
        } else {
            format!("{}:{}", self.context, loc)
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.location())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(ctx: &str, ns: &str, name: &str, uid: &str) -> Resource {
        Resource::new(
            ctx,
            json!({"metadata": {"name": name, "namespace": ns, "uid": uid}}),
        )
    }

    #[test]
    fn accessors_read_metadata() {
        let r = pod("prod", "default", "nginx", "u-1");
        assert_eq!(r.name(), "nginx");
        assert_eq!(r.namespace(), "default");
        assert_eq!(r.uid(), "u-1");
        assert_eq!(r.creation_timestamp(), None);
    }

    #[test]
    fn identity_location_with_context() {
        let id = pod("prod", "default", "nginx", "u-1").identity("Pod");
        assert_eq!(id.location(), "prod:Pod/default/nginx");
    }

    #[test]
    fn identity_location_cluster_scoped() {
        let r = Resource::new("", json!({"metadata": {"name": "node-1"}}));
        assert_eq!(r.identity("Node").location(), "Node/node-1");
    }
}
