use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use tag_controller_core::{ResourceType, UpsertError, Written};

/// Counts store writes by resource type and result.
#[derive(Clone, Debug, Default)]
pub struct UpsertMetrics {
    upserts: Family<UpsertLabels, Counter>,
}

/// Counts objects listed during backfill, and listing failures.
#[derive(Clone, Debug, Default)]
pub struct BackfillMetrics {
    listed: Family<KindLabels, Counter>,
    list_errors: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct UpsertLabels {
    resource_type: &'static str,
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    resource_type: &'static str,
}

// === impl UpsertMetrics ===

impl UpsertMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let upserts = Family::default();
        prom.register(
            "upserts",
            "Count of resource tag writes by result",
            upserts.clone(),
        );
        Self { upserts }
    }

    pub fn observe(&self, resource_type: ResourceType, res: &Result<Written, UpsertError>) {
        let result = match res {
            Ok(Written::Created { .. }) => "created",
            Ok(Written::Updated { .. }) => "updated",
            Err(UpsertError::Timeout { .. }) => "timeout",
            Err(_) => "error",
        };
        self.upserts
            .get_or_create(&UpsertLabels {
                resource_type: resource_type.as_str(),
                result,
            })
            .inc();
    }
}

// === impl BackfillMetrics ===

impl BackfillMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let listed = Family::default();
        prom.register(
            "listed",
            "Count of resources listed from the cluster",
            listed.clone(),
        );

        let list_errors = Family::default();
        prom.register(
            "list_errors",
            "Count of failed resource list requests",
            list_errors.clone(),
        );

        Self {
            listed,
            list_errors,
        }
    }

    pub(crate) fn listed(&self, resource_type: ResourceType, n: usize) {
        self.listed
            .get_or_create(&KindLabels {
                resource_type: resource_type.as_str(),
            })
            .inc_by(n as u64);
    }

    pub(crate) fn list_error(&self, resource_type: ResourceType) {
        self.list_errors
            .get_or_create(&KindLabels {
                resource_type: resource_type.as_str(),
            })
            .inc();
    }
}
