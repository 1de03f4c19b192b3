//! Bulk reconciliation of existing cluster resources.
//!
//! Every kind that collects labels or annotations is listed cluster-wide,
//! page by page, and each object is written through the same normalizer and
//! reconciler as admission events. Kinds are listed concurrently and a
//! failure to list one kind does not affect the others.

use crate::{
    cluster::{Cluster, PageRequest},
    metrics::{BackfillMetrics, UpsertMetrics},
    normalize::normalize,
    throttle::Throttle,
    workload::Workload,
};
use futures::{future, prelude::*};
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    batch::v1::{CronJob, Job},
    core::v1::{Namespace, Node, Pod},
};
use std::sync::Arc;
use tag_controller_core::{Reconciler, ResourceType, Settings};
use tracing::{debug, info, info_span, warn, Instrument};

#[cfg(test)]
mod tests;

pub struct Backfill<C> {
    cluster: C,
    reconciler: Reconciler,
    settings: Arc<Settings>,
    page_size: u32,
    throttle: Throttle,
    metrics: Metrics,
}

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub backfill: BackfillMetrics,
    pub upserts: UpsertMetrics,
}

/// The outcome of a backfill, per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub kinds: Vec<KindReport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindReport {
    pub resource_type: ResourceType,
    /// The number of pages fetched.
    pub pages: usize,
    pub listed: usize,
    pub recorded: usize,
    /// The number of objects that could not be written.
    pub failed: usize,
    /// Set when listing stopped early due to an API error.
    pub error: Option<String>,
    /// Set when listing stopped early due to shutdown.
    pub canceled: bool,
}

// === impl Backfill ===

impl<C: Cluster> Backfill<C> {
    pub const DEFAULT_PAGE_SIZE: u32 = 500;

    pub fn new(cluster: C, reconciler: Reconciler, settings: Arc<Settings>) -> Self {
        Self {
            cluster,
            reconciler,
            settings,
            page_size: Self::DEFAULT_PAGE_SIZE,
            throttle: Throttle::unlimited(),
            metrics: Metrics::default(),
        }
    }

    pub fn with_page_size(self, page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            ..self
        }
    }

    pub fn with_throttle(self, throttle: Throttle) -> Self {
        Self { throttle, ..self }
    }

    pub fn with_metrics(self, metrics: Metrics) -> Self {
        Self { metrics, ..self }
    }

    /// Lists and reconciles every collected kind.
    ///
    /// Once `shutdown` is signaled no further pages are requested; records
    /// already written are left in place.
    pub async fn run(&self, shutdown: drain::Watch) -> Report {
        let kinds = self.settings.collected_kinds().collect::<Vec<_>>();
        info!(?kinds, page_size = self.page_size, "Starting backfill of existing resources");

        let tasks = kinds.into_iter().map(|kind| {
            let shutdown = shutdown.clone();
            let span = info_span!("backfill", resource_type = %kind);
            let task = match kind {
                ResourceType::Namespace => self.backfill::<Namespace>(shutdown).boxed(),
                ResourceType::Node => self.backfill::<Node>(shutdown).boxed(),
                ResourceType::Pod => self.backfill::<Pod>(shutdown).boxed(),
                ResourceType::Deployment => self.backfill::<Deployment>(shutdown).boxed(),
                ResourceType::StatefulSet => self.backfill::<StatefulSet>(shutdown).boxed(),
                ResourceType::DaemonSet => self.backfill::<DaemonSet>(shutdown).boxed(),
                ResourceType::Job => self.backfill::<Job>(shutdown).boxed(),
                ResourceType::CronJob => self.backfill::<CronJob>(shutdown).boxed(),
            };
            task.instrument(span)
        });
        let report = Report {
            kinds: future::join_all(tasks).await,
        };

        info!(
            listed = report.listed(),
            recorded = report.recorded(),
            failed = report.failed(),
            "Backfill operation completed"
        );
        report
    }

    async fn backfill<K: Workload>(&self, shutdown: drain::Watch) -> KindReport {
        let resource_type = K::DESCRIPTOR.resource_type;
        let mut report = KindReport::new(resource_type);
        let mut page = PageRequest {
            limit: self.page_size,
            continue_token: None,
        };

        loop {
            // A page that has been requested is always applied.
            tokio::select! {
                biased;
                _ = shutdown.clone().signaled() => {
                    info!("Shutdown signaled; stopping");
                    report.canceled = true;
                    break;
                }
                _ = self.throttle.acquire() => {}
            }
            let res = self.cluster.list::<K>(&page).await;

            let items = match res {
                Ok(items) => items,
                Err(error) => {
                    warn!(%error, "Error listing resources");
                    self.metrics.backfill.list_error(resource_type);
                    report.error = Some(error.to_string());
                    break;
                }
            };
            report.pages += 1;
            report.listed += items.items.len();
            self.metrics.backfill.listed(resource_type, items.items.len());
            debug!(items = items.items.len(), page = report.pages, "Listed resources");

            for obj in items.items.iter() {
                let record = normalize(obj, &self.settings);
                let res = self.reconciler.upsert(record).await;
                self.metrics.upserts.observe(resource_type, &res);
                match res {
                    Ok(_) => report.recorded += 1,
                    Err(_) => report.failed += 1,
                }
            }

            match items.continue_token {
                Some(token) => page.continue_token = Some(token),
                None => break,
            }
        }

        info!(
            pages = report.pages,
            listed = report.listed,
            recorded = report.recorded,
            failed = report.failed,
            "Finished"
        );
        report
    }
}

// === impl Report ===

impl Report {
    pub fn get(&self, resource_type: ResourceType) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.resource_type == resource_type)
    }

    pub fn listed(&self) -> usize {
        self.kinds.iter().map(|k| k.listed).sum()
    }

    pub fn recorded(&self) -> usize {
        self.kinds.iter().map(|k| k.recorded).sum()
    }

    pub fn failed(&self) -> usize {
        self.kinds.iter().map(|k| k.failed).sum()
    }

    /// The kinds whose listing failed, with their errors.
    pub fn errors(&self) -> impl Iterator<Item = (ResourceType, &str)> + '_ {
        self.kinds
            .iter()
            .filter_map(|k| Some((k.resource_type, k.error.as_deref()?)))
    }

    /// Returns true if every kind was listed to completion.
    pub fn is_complete(&self) -> bool {
        self.kinds.iter().all(|k| k.error.is_none() && !k.canceled)
    }
}

// === impl KindReport ===

impl KindReport {
    fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            pages: 0,
            listed: 0,
            recorded: 0,
            failed: 0,
            error: None,
            canceled: false,
        }
    }
}
