use crate::{filter::Pattern, resource::ResourceType};
use serde::Deserialize;

/// Controls which tags are collected for which kinds of resources.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub labels: ClassFilter,
    pub annotations: ClassFilter,
}

/// Collection settings for one class of tags (labels or annotations).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClassFilter {
    pub enabled: bool,
    pub patterns: Vec<Pattern>,
    pub resources: Resources,
}

/// Per-kind enablement.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub pods: bool,
    pub namespaces: bool,
    pub deployments: bool,
    pub statefulsets: bool,
    pub daemonsets: bool,
    pub jobs: bool,
    pub cronjobs: bool,
    pub nodes: bool,
}

// === impl Settings ===

impl Settings {
    /// Returns true if labels or annotations are collected for `kind`.
    pub fn collects(&self, kind: ResourceType) -> bool {
        self.labels.resources.enabled(kind) || self.annotations.resources.enabled(kind)
    }

    /// The kinds for which anything is collected.
    pub fn collected_kinds(&self) -> impl Iterator<Item = ResourceType> + '_ {
        ResourceType::ALL.into_iter().filter(|k| self.collects(*k))
    }
}

// === impl ClassFilter ===

impl ClassFilter {
    /// Returns true if this class is collected for `kind`, both globally and
    /// for the kind itself.
    pub fn enabled_for(&self, kind: ResourceType) -> bool {
        self.enabled && self.resources.enabled(kind)
    }
}

// === impl Resources ===

impl Resources {
    pub fn enabled(&self, kind: ResourceType) -> bool {
        match kind {
            ResourceType::Pod => self.pods,
            ResourceType::Namespace => self.namespaces,
            ResourceType::Node => self.nodes,
            ResourceType::Deployment => self.deployments,
            ResourceType::StatefulSet => self.statefulsets,
            ResourceType::DaemonSet => self.daemonsets,
            ResourceType::Job => self.jobs,
            ResourceType::CronJob => self.cronjobs,
        }
    }

    /// Enables every kind.
    pub fn all() -> Self {
        Self {
            pods: true,
            namespaces: true,
            deployments: true,
            statefulsets: true,
            daemonsets: true,
            jobs: true,
            cronjobs: true,
            nodes: true,
        }
    }

    /// Disables every kind.
    pub fn none() -> Self {
        Self {
            pods: false,
            namespaces: false,
            deployments: false,
            statefulsets: false,
            daemonsets: false,
            jobs: false,
            cronjobs: false,
            nodes: false,
        }
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            pods: true,
            namespaces: true,
            ..Self::none()
        }
    }
}
