//! kwatch core types: documents, resource identities, snapshots and change events.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod path;

pub use path::{PathError, PathExpr};

/// One snapshot of a resource as a generic tree: scalars, sequences and key-maps.
///
/// Maps iterate in sorted key order, which keeps every serialization of a
/// document stable across revisions.
pub type Document = serde_json::Value;

/// Kind of mutation carried by a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Create => "CREATE",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `(kind, namespace, name)` of one object. Namespace is empty for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind: kind.into(), namespace: namespace.into(), name: name.into() }
    }

    /// Build the identity of `doc` as an object of `kind`. Returns `None` when
    /// the document carries no `metadata.name`.
    pub fn from_document(kind: &str, doc: &Document) -> Option<Self> {
        let name = meta_str(doc, "name").filter(|n| !n.is_empty())?;
        let namespace = meta_str(doc, "namespace").unwrap_or("");
        Some(Self::new(kind, namespace, name))
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects.
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Read a string field from `metadata`.
pub fn meta_str<'a>(doc: &'a Document, field: &str) -> Option<&'a str> {
    doc.get("metadata").and_then(|m| m.get(field)).and_then(|v| v.as_str())
}

pub fn resource_version(doc: &Document) -> Option<&str> {
    meta_str(doc, "resourceVersion")
}

pub fn generation(doc: &Document) -> i64 {
    doc.get("metadata")
        .and_then(|m| m.get("generation"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

/// Last observed revision of an object together with the time it was seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub raw: Document,
    pub seen_at: DateTime<Utc>,
}

/// A notification as delivered by a source stream, before routing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub kind: ChangeKind,
    pub object: Document,
}

impl RawEvent {
    pub fn new(kind: ChangeKind, object: Document) -> Self {
        Self { kind, object }
    }
}

/// A routed notification: the current revision plus whatever was cached before it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub identity: ResourceIdentity,
    pub current: Document,
    pub observed_at: DateTime<Utc>,
    /// Absent for a first CREATE, or when earlier notifications were missed.
    pub previous: Option<Snapshot>,
}

pub mod prelude {
    pub use super::{ChangeEvent, ChangeKind, Document, PathExpr, RawEvent, ResourceIdentity, Snapshot};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_key_omits_empty_namespace() {
        let pod = json!({"metadata": {"name": "nginx", "namespace": "default"}});
        let node = json!({"metadata": {"name": "worker-1"}});
        assert_eq!(ResourceIdentity::from_document("Pod", &pod).unwrap().key(), "default/nginx");
        assert_eq!(ResourceIdentity::from_document("Node", &node).unwrap().to_string(), "worker-1");
    }

    #[test]
    fn identity_requires_name() {
        assert!(ResourceIdentity::from_document("Pod", &json!({"metadata": {}})).is_none());
        assert!(ResourceIdentity::from_document("Pod", &json!({"metadata": {"name": ""}})).is_none());
        assert!(ResourceIdentity::from_document("Pod", &json!("scalar")).is_none());
    }

    #[test]
    fn same_name_different_kind_is_distinct() {
        let a = ResourceIdentity::new("ConfigMap", "default", "x");
        let b = ResourceIdentity::new("Secret", "default", "x");
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn metadata_accessors() {
        let doc = json!({"metadata": {"name": "a", "resourceVersion": "42", "generation": 3}});
        assert_eq!(resource_version(&doc), Some("42"));
        assert_eq!(generation(&doc), 3);
        assert_eq!(generation(&json!({})), 0);
        assert_eq!(ChangeKind::Delete.to_string(), "DELETE");
    }
}
