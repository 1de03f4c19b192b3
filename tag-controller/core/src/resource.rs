use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Filtered label or annotation key/value pairs.
pub type Tags = BTreeMap<String, String>;

/// Identifying dimensions attached to every metric emitted for a resource.
pub type MetricLabels = BTreeMap<String, String>;

/// The kinds of Kubernetes workloads that are cataloged.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Pod,
    Namespace,
    Node,
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
}

/// The canonical record of one Kubernetes object's identity and tags.
///
/// `(resource_type, name, namespace)` is the logical key of a record: a store
/// never holds more than one record per key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTags {
    /// Assigned by the store when the record is first created.
    pub id: Option<String>,
    pub resource_type: ResourceType,
    pub name: String,
    /// Set for namespaced kinds; `None` for namespaces and nodes.
    pub namespace: Option<String>,
    pub metric_labels: MetricLabels,
    pub labels: Tags,
    pub annotations: Tags,
    pub record_created: Option<DateTime<Utc>>,
    pub record_updated: Option<DateTime<Utc>>,
    /// When the record was last pushed downstream. `None` marks the record as
    /// pending.
    pub sent_at: Option<DateTime<Utc>>,
}

/// Lookup conditions for a record's logical key.
///
/// When `namespace` is `None` only the type and name are matched.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Conditions {
    pub resource_type: ResourceType,
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown resource type: {0}")]
pub struct UnknownResourceType(String);

// === impl ResourceType ===

impl ResourceType {
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Namespace,
        ResourceType::Node,
        ResourceType::Pod,
        ResourceType::Deployment,
        ResourceType::StatefulSet,
        ResourceType::DaemonSet,
        ResourceType::Job,
        ResourceType::CronJob,
    ];

    /// The value of the `resource_type` metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Namespace => "namespace",
            Self::Node => "node",
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
            Self::DaemonSet => "daemonset",
            Self::Job => "job",
            Self::CronJob => "cronjob",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownResourceType(s.to_string()))
    }
}

// === impl ResourceTags ===

impl ResourceTags {
    /// Returns the conditions that locate this record's logical key.
    pub fn conditions(&self) -> Conditions {
        Conditions {
            resource_type: self.resource_type,
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Returns true if the record has not been pushed downstream since it was
    /// last written.
    pub fn is_pending(&self) -> bool {
        self.sent_at.is_none()
    }

    /// Approximates the number of bytes the record contributes downstream.
    pub fn size(&self) -> usize {
        let tags = |t: &Tags| {
            if t.is_empty() {
                return 0;
            }
            serde_json::to_vec(t).map(|b| b.len()).unwrap_or_default()
        };
        self.name.len()
            + self.namespace.as_deref().map(str::len).unwrap_or_default()
            + tags(&self.labels)
            + tags(&self.annotations)
    }
}

// === impl Conditions ===

impl Conditions {
    pub fn matches(&self, record: &ResourceTags) -> bool {
        if record.resource_type != self.resource_type || record.name != self.name {
            return false;
        }
        match self.namespace {
            Some(ref ns) => record.namespace.as_ref() == Some(ns),
            None => true,
        }
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Some(ref ns) => write!(f, "{}/{}/{}", self.resource_type, ns, self.name),
            None => write!(f, "{}/{}", self.resource_type, self.name),
        }
    }
}
