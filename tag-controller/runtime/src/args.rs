use crate::{
    admission::{self, Admission, Context, ErrorSink},
    metrics::Metrics,
    settings,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tag_controller_core::{MemoryStore, Reconciler, Settings, SystemClock};
use tag_controller_k8s::{Backfill, Throttle};
use tokio::time::Duration;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "tag-controller",
    about = "Catalogs the labels and annotations of cluster resources"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "tag_controller=info,warn",
        env = "TAG_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Path to a YAML file describing which tags are collected.
    ///
    /// When unset, nothing is collected until labels or annotations are
    /// enabled.
    #[clap(long, env = "TAG_CONTROLLER_SETTINGS")]
    settings: Option<PathBuf>,

    /// Lists and records all existing resources, then exits, instead of
    /// serving admission requests.
    #[clap(long)]
    backfill: bool,

    /// The number of objects requested per list call during backfill.
    #[clap(long, default_value = "500")]
    page_size: u32,

    #[clap(long, default_value = "50")]
    kube_qps: f32,

    #[clap(long, default_value = "100")]
    kube_burst: u32,

    #[clap(long, default_value = "5000")]
    store_timeout_ms: u64,

    /// The maximum number of store failures buffered for logging.
    #[clap(long, default_value = "128")]
    error_queue_capacity: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            settings,
            backfill,
            page_size,
            kube_qps,
            kube_burst,
            store_timeout_ms,
            error_queue_capacity,
        } = self;

        let settings = Arc::new(match settings {
            Some(path) => settings::load(&path)?,
            None => Settings::default(),
        });

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(&mut prom);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        // Records are kept in memory for the life of the process.
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(store, Arc::new(SystemClock))
            .with_timeout(Duration::from_millis(store_timeout_ms));

        let builder = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client);

        if backfill {
            // Backfill mode serves no admission requests.
            let runtime = builder.build().await?;
            log_settings(&settings);

            let backfill = Backfill::new(runtime.client(), reconciler, settings)
                .with_page_size(page_size)
                .with_throttle(Throttle::new(kube_qps, kube_burst))
                .with_metrics(metrics.backfill());
            let shutdown = runtime.shutdown_handle();

            // The runtime only acts on shutdown signals while it runs.
            let report = tokio::select! {
                report = backfill.run(shutdown) => report,
                res = runtime.run() => {
                    if res.is_err() {
                        bail!("Aborted");
                    }
                    return Ok(());
                }
            };

            for (kind, error) in report.errors() {
                warn!(%kind, %error, "Backfill incomplete");
            }
            if report.errors().next().is_some() {
                bail!("failed to list some resources");
            }
            return Ok(());
        }

        let runtime = builder.with_optional_server(Some(server)).build().await?;
        log_settings(&settings);

        let (errors, errors_rx) = ErrorSink::channel(error_queue_capacity);
        tokio::spawn(admission::log_errors(errors_rx).instrument(info_span!("errors")));

        let admission = Admission::new(Context::new(reconciler, settings, errors, &metrics));
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn log_settings(settings: &Settings) {
    info!(
        kinds = ?settings.collected_kinds().collect::<Vec<_>>(),
        labels = settings.labels.enabled,
        annotations = settings.annotations.enabled,
        "Loaded settings"
    );
}
