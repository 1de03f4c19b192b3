use kube::core::admission::Operation;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use tag_controller_core::ResourceType;
use tag_controller_k8s::{backfill, BackfillMetrics, UpsertMetrics};

/// All of the controller's metrics, registered once at startup.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub admission: AdmissionMetrics,
    pub upserts: UpsertMetrics,
    pub backfill: BackfillMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    requests: Family<AdmissionLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct AdmissionLabels {
    kind: &'static str,
    operation: &'static str,
    outcome: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(prom: &mut Registry) -> Self {
        let admission = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let upserts = UpsertMetrics::register(prom);
        let backfill = BackfillMetrics::register(prom.sub_registry_with_prefix("backfill"));
        Self {
            admission,
            upserts,
            backfill,
        }
    }

    pub fn backfill(&self) -> backfill::Metrics {
        backfill::Metrics {
            backfill: self.backfill.clone(),
            upserts: self.upserts.clone(),
        }
    }
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    fn register(prom: &mut Registry) -> Self {
        let requests = Family::default();
        prom.register(
            "requests",
            "Count of admission requests by kind, operation and outcome",
            requests.clone(),
        );
        Self { requests }
    }

    pub(crate) fn observe(
        &self,
        kind: Option<ResourceType>,
        op: Option<&Operation>,
        outcome: &'static str,
    ) {
        self.requests
            .get_or_create(&AdmissionLabels {
                kind: kind.map(|k| k.as_str()).unwrap_or("unknown"),
                operation: op.map(operation_str).unwrap_or("unknown"),
                outcome,
            })
            .inc();
    }
}

pub(crate) fn operation_str(op: &Operation) -> &'static str {
    match op {
        Operation::Create => "create",
        Operation::Update => "update",
        Operation::Delete => "delete",
        Operation::Connect => "connect",
    }
}
