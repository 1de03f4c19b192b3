use crate::workload::{Descriptor, Workload};
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{Namespace, Node, Pod},
};
use std::collections::BTreeMap;
use tag_controller_core::{
    filter, ClassFilter, MetricLabels, ResourceTags, ResourceType, Settings, Tags,
};


/// Converts a workload into its canonical record.
///
/// The record's `id`, timestamps and `sent_at` are left unset.
pub fn normalize<K: Workload>(obj: &K, settings: &Settings) -> ResourceTags {
    let Descriptor {
        resource_type,
        identity,
        namespaced,
    } = K::DESCRIPTOR;

    let meta = obj.meta();
    let name = meta.name.clone().unwrap_or_default();
    let namespace = namespaced.then(|| meta.namespace.clone().unwrap_or_default());

    let labels = collect(&settings.labels, resource_type, meta.labels.as_ref());
    let annotations = collect(&settings.annotations, resource_type, meta.annotations.as_ref());

    let mut metric_labels = MetricLabels::new();
    metric_labels.insert(identity.to_string(), name.clone());
    if let Some(ns) = namespace.as_ref() {
        metric_labels.insert("namespace".to_string(), ns.clone());
    }
    metric_labels.insert(
        "resource_type".to_string(),
        resource_type.as_str().to_string(),
    );

    ResourceTags {
        id: None,
        resource_type,
        name,
        namespace,
        metric_labels,
        labels,
        annotations,
        record_created: None,
        record_updated: None,
        sent_at: None,
    }
}

fn collect(
    class: &ClassFilter,
    kind: ResourceType,
    tags: Option<&BTreeMap<String, String>>,
) -> Tags {
    if !class.resources.enabled(kind) {
        return Tags::new();
    }
    match tags {
        Some(tags) => filter(tags, &class.patterns, class.enabled_for(kind)),
        None => Tags::new(),
    }
}

pub fn format_pod_data(obj: &Pod, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}

pub fn format_namespace_data(obj: &Namespace, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}

pub fn format_node_data(obj: &Node, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}

pub fn format_deployment_data(obj: &Deployment, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}

pub fn format_statefulset_data(obj: &StatefulSet, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}

pub fn format_daemonset_data(obj: &DaemonSet, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}

pub fn format_job_data(obj: &Job, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}

pub fn format_cronjob_data(obj: &CronJob, settings: &Settings) -> ResourceTags {
    normalize(obj, settings)
}
