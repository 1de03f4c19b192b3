#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod backfill;
pub mod cluster;
pub mod metrics;
mod normalize;
pub mod throttle;
pub mod workload;

pub use self::{
    backfill::{Backfill, KindReport, Report},
    cluster::{Cluster, Page, PageRequest},
    metrics::{BackfillMetrics, UpsertMetrics},
    normalize::{
        format_cronjob_data, format_daemonset_data, format_deployment_data, format_job_data,
        format_namespace_data, format_node_data, format_pod_data, format_statefulset_data,
        normalize,
    },
    throttle::Throttle,
    workload::{descriptor, Descriptor, Workload},
};
pub use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{Namespace, Node, Pod},
};
