use super::*;
use crate::cluster::{Error, Page};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use maplit::btreemap;
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use std::collections::{HashMap, HashSet};
use tag_controller_core::{
    ClassFilter, Conditions, MemoryStore, MockClock, Pattern, ResourceStore, Resources,
};

/// Serves pre-built pages of objects per kind.
#[derive(Default)]
struct FakeCluster {
    pages: HashMap<ResourceType, Vec<Vec<serde_json::Value>>>,
    failing: HashSet<ResourceType>,
    requests: Mutex<Vec<(ResourceType, PageRequest)>>,
    /// Signaled when the given page index of any kind is requested.
    shutdown_at: Mutex<Option<(usize, drain::Signal)>>,
}

#[async_trait::async_trait]
impl Cluster for FakeCluster {
    async fn list<K: Workload>(&self, page: &PageRequest) -> Result<Page<K>, Error> {
        let kind = K::DESCRIPTOR.resource_type;
        self.requests.lock().push((kind, page.clone()));
        if self.failing.contains(&kind) {
            return Err(format!("{kind}s are forbidden").into());
        }

        let idx = match page.continue_token.as_deref() {
            Some(token) => token.parse::<usize>()?,
            None => 0,
        };

        let signal = {
            let mut shutdown_at = self.shutdown_at.lock();
            match shutdown_at.take() {
                Some((at, signal)) if at == idx => Some(signal),
                other => {
                    *shutdown_at = other;
                    None
                }
            }
        };
        if let Some(signal) = signal {
            tokio::spawn(signal.drain());
            tokio::task::yield_now().await;
        }

        let pages = self.pages.get(&kind).map(Vec::as_slice).unwrap_or_default();
        let items = match pages.get(idx) {
            Some(items) => items
                .iter()
                .map(|v| serde_json::from_value(v.clone()))
                .collect::<Result<Vec<K>, _>>()?,
            None => vec![],
        };
        let continue_token = (idx + 1 < pages.len()).then(|| (idx + 1).to_string());
        Ok(Page {
            items,
            continue_token,
        })
    }
}

impl FakeCluster {
    fn with_pages(mut self, kind: ResourceType, pages: Vec<Vec<serde_json::Value>>) -> Self {
        self.pages.insert(kind, pages);
        self
    }

    fn failing(mut self, kind: ResourceType) -> Self {
        self.failing.insert(kind);
        self
    }

    fn requests_for(&self, kind: ResourceType) -> Vec<PageRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

fn meta(name: &str, ns: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: ns.map(Into::into),
        labels: Some(btreemap! {
            "app".to_string() => name.to_string(),
            "pod-template-hash".to_string() => "abc123".to_string(),
        }),
        ..Default::default()
    }
}

fn pod(name: &str) -> serde_json::Value {
    serde_json::to_value(Pod {
        metadata: meta(name, Some("default")),
        ..Default::default()
    })
    .unwrap()
}

fn namespace(name: &str) -> serde_json::Value {
    serde_json::to_value(Namespace {
        metadata: meta(name, None),
        ..Default::default()
    })
    .unwrap()
}

fn mk_settings() -> Arc<Settings> {
    Arc::new(Settings {
        labels: ClassFilter {
            enabled: true,
            patterns: vec![Pattern::Exact("app".to_string())],
            resources: Resources::default(),
        },
        annotations: ClassFilter::default(),
    })
}

fn mk_backfill(cluster: FakeCluster) -> (Backfill<FakeCluster>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(store.clone(), Arc::new(MockClock::default()));
    let backfill = Backfill::new(cluster, reconciler, mk_settings()).with_page_size(2);
    (backfill, store)
}

#[tokio::test]
async fn follows_continue_tokens() {
    let cluster = FakeCluster::default()
        .with_pages(
            ResourceType::Pod,
            vec![vec![pod("a"), pod("b")], vec![pod("c"), pod("d")], vec![pod("e")]],
        )
        .with_pages(ResourceType::Namespace, vec![vec![namespace("default")]]);
    let (backfill, store) = mk_backfill(cluster);
    let (_signal, shutdown) = drain::channel();

    let report = backfill.run(shutdown).await;
    assert!(report.is_complete());

    let pods = report.get(ResourceType::Pod).expect("pods must be listed");
    assert_eq!(pods.pages, 3);
    assert_eq!(pods.listed, 5);
    assert_eq!(pods.recorded, 5);
    assert_eq!(pods.failed, 0);
    assert_eq!(report.listed(), 6);
    assert_eq!(store.len().await, 6);

    let requests = backfill.cluster.requests_for(ResourceType::Pod);
    assert_eq!(
        requests,
        vec![
            PageRequest {
                limit: 2,
                continue_token: None
            },
            PageRequest {
                limit: 2,
                continue_token: Some("1".to_string())
            },
            PageRequest {
                limit: 2,
                continue_token: Some("2".to_string())
            },
        ]
    );

    let record = store
        .find_first_by(&Conditions {
            resource_type: ResourceType::Pod,
            name: "c".to_string(),
            namespace: Some("default".to_string()),
        })
        .await
        .unwrap()
        .expect("pod must be recorded");
    assert_eq!(record.labels, btreemap! { "app".to_string() => "c".to_string() });
}

#[tokio::test]
async fn only_collected_kinds_are_listed() {
    let cluster = FakeCluster::default()
        .with_pages(ResourceType::Pod, vec![vec![pod("a")]])
        .with_pages(ResourceType::Namespace, vec![vec![namespace("default")]]);
    let (backfill, _store) = mk_backfill(cluster);
    let (_signal, shutdown) = drain::channel();

    let report = backfill.run(shutdown).await;
    let kinds = report
        .kinds
        .iter()
        .map(|k| k.resource_type)
        .collect::<HashSet<_>>();
    assert_eq!(
        kinds,
        [ResourceType::Pod, ResourceType::Namespace].into_iter().collect()
    );
    assert!(backfill.cluster.requests_for(ResourceType::Node).is_empty());
    assert!(backfill
        .cluster
        .requests_for(ResourceType::Deployment)
        .is_empty());
}

#[tokio::test]
async fn list_failures_are_isolated_per_kind() {
    let cluster = FakeCluster::default()
        .with_pages(ResourceType::Pod, vec![vec![pod("a"), pod("b")]])
        .failing(ResourceType::Namespace);
    let (backfill, store) = mk_backfill(cluster);
    let (_signal, shutdown) = drain::channel();

    let report = backfill.run(shutdown).await;
    assert!(!report.is_complete());

    let namespaces = report.get(ResourceType::Namespace).unwrap();
    assert_eq!(namespaces.pages, 0);
    assert_eq!(
        namespaces.error.as_deref(),
        Some("namespaces are forbidden")
    );
    assert_eq!(
        report.errors().collect::<Vec<_>>(),
        vec![(ResourceType::Namespace, "namespaces are forbidden")]
    );

    let pods = report.get(ResourceType::Pod).unwrap();
    assert_eq!(pods.error, None);
    assert_eq!(pods.recorded, 2);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn rerun_updates_in_place() {
    let cluster = FakeCluster::default()
        .with_pages(ResourceType::Pod, vec![vec![pod("a"), pod("b")], vec![pod("c")]])
        .with_pages(ResourceType::Namespace, vec![vec![namespace("default")]]);
    let (backfill, store) = mk_backfill(cluster);

    let (_signal, shutdown) = drain::channel();
    let first = backfill.run(shutdown).await;
    let (_signal, shutdown) = drain::channel();
    let second = backfill.run(shutdown).await;

    assert_eq!(first.recorded(), 4);
    assert_eq!(second.recorded(), 4);
    assert_eq!(store.len().await, 4);
}

#[tokio::test]
async fn stops_when_signaled_before_start() {
    let cluster = FakeCluster::default()
        .with_pages(ResourceType::Pod, vec![vec![pod("a")]])
        .with_pages(ResourceType::Namespace, vec![vec![namespace("default")]]);
    let (backfill, store) = mk_backfill(cluster);

    let (signal, shutdown) = drain::channel();
    let drained = tokio::spawn(signal.drain());
    tokio::task::yield_now().await;

    let report = backfill.run(shutdown).await;
    drained.await.expect("drain must complete");

    assert!(!report.is_complete());
    assert!(report.kinds.iter().all(|k| k.canceled && k.pages == 0));
    assert!(backfill.cluster.requests.lock().is_empty());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn stops_requesting_pages_once_signaled() {
    let (signal, shutdown) = drain::channel();
    let cluster = FakeCluster {
        shutdown_at: Mutex::new(Some((1, signal))),
        ..FakeCluster::default()
    }
    .with_pages(
        ResourceType::Pod,
        vec![vec![pod("a"), pod("b")], vec![pod("c"), pod("d")], vec![pod("e")]],
    );
    let (backfill, store) = mk_backfill(cluster);

    let report = backfill.run(shutdown).await;

    let pods = report.get(ResourceType::Pod).unwrap();
    assert!(pods.canceled);
    assert_eq!(pods.pages, 2);
    assert_eq!(pods.recorded, 4);
    assert_eq!(backfill.cluster.requests_for(ResourceType::Pod).len(), 2);

    // Records written before shutdown are kept.
    assert_eq!(store.len().await, 4);
}

#[tokio::test]
async fn applies_page_in_flight_at_shutdown() {
    let (signal, shutdown) = drain::channel();
    let cluster = FakeCluster {
        shutdown_at: Mutex::new(Some((0, signal))),
        ..FakeCluster::default()
    }
    .with_pages(ResourceType::Pod, vec![vec![pod("a"), pod("b"), pod("c")]]);
    let store = Arc::new(MemoryStore::new());
    let reconciler = Reconciler::new(store.clone(), Arc::new(MockClock::default()));
    let settings = Arc::new(Settings {
        labels: ClassFilter {
            enabled: true,
            patterns: vec![Pattern::Exact("app".to_string())],
            resources: Resources {
                namespaces: false,
                ..Resources::default()
            },
        },
        annotations: ClassFilter::default(),
    });
    let backfill = Backfill::new(cluster, reconciler, settings);

    let report = backfill.run(shutdown).await;

    assert_eq!(report.kinds.len(), 1);
    let pods = report.get(ResourceType::Pod).unwrap();
    assert_eq!(pods.pages, 1);
    assert_eq!(pods.listed, 3);
    assert_eq!(pods.recorded, 3);
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn records_metrics() {
    let mut prom = Registry::default();
    let metrics = Metrics {
        backfill: BackfillMetrics::register(prom.sub_registry_with_prefix("backfill")),
        upserts: UpsertMetrics::register(&mut prom),
    };
    let cluster = FakeCluster::default()
        .with_pages(ResourceType::Pod, vec![vec![pod("a"), pod("b")], vec![pod("c")]])
        .failing(ResourceType::Namespace);
    let (backfill, _store) = mk_backfill(cluster);
    let backfill = backfill.with_metrics(metrics);
    let (_signal, shutdown) = drain::channel();

    backfill.run(shutdown).await;

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();
    assert!(
        text.contains(r#"backfill_listed_total{resource_type="pod"} 3"#),
        "{text}"
    );
    assert!(
        text.contains(r#"backfill_list_errors_total{resource_type="namespace"} 1"#),
        "{text}"
    );
    assert!(
        text.contains(r#"upserts_total{resource_type="pod",result="created"} 3"#),
        "{text}"
    );
}
