use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{Namespace, Node, Pod},
};
use serde::de::DeserializeOwned;
use tag_controller_core::ResourceType;

/// Describes how a kind of workload is cataloged.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub resource_type: ResourceType,
    /// The metric label that carries the object's name.
    pub identity: &'static str,
    /// Whether records for this kind carry a namespace.
    pub namespaced: bool,
}

/// A Kubernetes resource whose metadata is cataloged.
pub trait Workload:
    kube::Resource<DynamicType = ()>
    + DeserializeOwned
    + Clone
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    const DESCRIPTOR: Descriptor;
}

macro_rules! workload {
    ($ty:ty, $resource_type:ident, $identity:literal, $namespaced:literal) => {
        impl Workload for $ty {
            const DESCRIPTOR: Descriptor = Descriptor {
                resource_type: ResourceType::$resource_type,
                identity: $identity,
                namespaced: $namespaced,
            };
        }
    };
}

workload!(Pod, Pod, "pod", true);
workload!(Namespace, Namespace, "namespace", false);
workload!(Node, Node, "node", false);
workload!(Deployment, Deployment, "workload", true);
workload!(StatefulSet, StatefulSet, "workload", true);
workload!(DaemonSet, DaemonSet, "workload", true);
workload!(Job, Job, "workload", true);
workload!(CronJob, CronJob, "workload", true);

/// Returns the descriptor for `resource_type`.
pub fn descriptor(resource_type: ResourceType) -> Descriptor {
    match resource_type {
        ResourceType::Pod => Pod::DESCRIPTOR,
        ResourceType::Namespace => Namespace::DESCRIPTOR,
        ResourceType::Node => Node::DESCRIPTOR,
        ResourceType::Deployment => Deployment::DESCRIPTOR,
        ResourceType::StatefulSet => StatefulSet::DESCRIPTOR,
        ResourceType::DaemonSet => DaemonSet::DESCRIPTOR,
        ResourceType::Job => Job::DESCRIPTOR,
        ResourceType::CronJob => CronJob::DESCRIPTOR,
    }
}
