//! Metric collectors and the registry that runs them.
//!
//! Synchronous collectors do all their work when a scrape asks for it.
//! Asynchronous collectors additionally run a background task for the
//! lifetime of the process and only copy out what that task accumulated
//! when scraped.

pub mod container;
pub mod hardware;
pub mod netstat;
pub mod sensor;
pub mod sshauth;
pub mod traits;
pub mod user;

pub use container::{ContainerCollector, ContainerSource, DockerSource};
pub use hardware::HardwareCollector;
pub use netstat::ConnectionCollector;
pub use sensor::SensorCollector;
pub use sshauth::SshAuthCollector;
pub use traits::{AsyncCollector, Collector};
pub use user::UserCollector;

use crate::config::ExporterConfig;
use crate::error::Result;
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Build a gauge vector used for info-style series.
pub(crate) fn info_vec(
    namespace: &str,
    subsystem: &str,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec> {
    let vec = GaugeVec::new(
        Opts::new(name, help)
            .namespace(namespace)
            .subsystem(subsystem),
        labels,
    )?;
    Ok(vec)
}

/// Collect several vectors, dropping families that have no series.
pub(crate) fn gather_vecs(vecs: &[&GaugeVec]) -> Vec<MetricFamily> {
    vecs.iter()
        .flat_map(|vec| vec.collect())
        .filter(|family| !family.get_metric().is_empty())
        .collect()
}

enum Entry {
    Sync(Arc<dyn Collector>),
    Async(Arc<dyn AsyncCollector>),
}

impl Entry {
    fn subsystem(&self) -> &'static str {
        match self {
            Entry::Sync(collector) => collector.subsystem(),
            Entry::Async(collector) => collector.subsystem(),
        }
    }

    fn update(&self) -> Result<Vec<MetricFamily>> {
        match self {
            Entry::Sync(collector) => collector.update(),
            Entry::Async(collector) => collector.update(),
        }
    }
}

/// The set of enabled collectors for one exporter process.
pub struct CollectorRegistry {
    entries: Vec<Entry>,
    scrape_duration: GaugeVec,
    scrape_success: GaugeVec,
}

impl CollectorRegistry {
    /// Create an empty registry.
    pub fn new(namespace: &str) -> Result<Self> {
        Ok(Self {
            entries: Vec::new(),
            scrape_duration: info_vec(
                namespace,
                "scrape",
                "collector_duration_seconds",
                "Duration of a collector scrape",
                &["collector"],
            )?,
            scrape_success: info_vec(
                namespace,
                "scrape",
                "collector_success",
                "Whether a collector succeeded",
                &["collector"],
            )?,
        })
    }

    /// Build every collector enabled in `config`.
    ///
    /// A collector that fails to initialize is logged and left out.
    pub fn from_config(config: &ExporterConfig) -> Result<Self> {
        let namespace = config.namespace.as_str();
        let collectors = &config.collectors;
        let mut registry = Self::new(namespace)?;

        if collectors.hardware.enabled {
            registry.add(
                "hardware",
                HardwareCollector::new(namespace, &collectors.hardware).map(|c| Arc::new(c) as Arc<dyn Collector>),
            );
        }
        if collectors.user.enabled {
            registry.add(
                "user",
                UserCollector::new(namespace, &collectors.user).map(|c| Arc::new(c) as Arc<dyn Collector>),
            );
        }
        if collectors.sensor.enabled {
            registry.add(
                "sensor",
                SensorCollector::new(namespace, &collectors.sensor).map(|c| Arc::new(c) as Arc<dyn Collector>),
            );
        }
        if collectors.net.enabled {
            registry.add(
                "net",
                ConnectionCollector::new(namespace).map(|c| Arc::new(c) as Arc<dyn Collector>),
            );
        }
        if collectors.container.enabled {
            registry.add_async(
                "container",
                ContainerCollector::new(namespace, &collectors.container)
                    .map(|c| Arc::new(c) as Arc<dyn AsyncCollector>),
            );
        }
        if collectors.sshauth.enabled {
            registry.add_async(
                "sshauth",
                SshAuthCollector::new(namespace, collectors.sshauth.clone())
                    .map(|c| Arc::new(c) as Arc<dyn AsyncCollector>),
            );
        }

        Ok(registry)
    }

    fn add(&mut self, name: &str, built: Result<Arc<dyn Collector>>) {
        match built {
            Ok(collector) => {
                info!(collector = name, "collector enabled");
                self.register(collector);
            }
            Err(err) => warn!(collector = name, error = %err, "collector failed to initialize, skipping"),
        }
    }

    fn add_async(&mut self, name: &str, built: Result<Arc<dyn AsyncCollector>>) {
        match built {
            Ok(collector) => {
                info!(collector = name, "collector enabled");
                self.register_async(collector);
            }
            Err(err) => warn!(collector = name, error = %err, "collector failed to initialize, skipping"),
        }
    }

    /// Register a collector that only works at scrape time.
    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.entries.push(Entry::Sync(collector));
    }

    /// Register a collector that also needs a background task.
    pub fn register_async(&mut self, collector: Arc<dyn AsyncCollector>) {
        self.entries.push(Entry::Async(collector));
    }

    /// Subsystem names of every registered collector, in registration order.
    pub fn collector_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(Entry::subsystem).collect()
    }

    /// Spawn the background task of every asynchronous collector.
    ///
    /// Each task gets a child of `cancel`. A task that fails is reported once
    /// and does not affect the others.
    pub fn start(&self, cancel: &CancellationToken) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for entry in &self.entries {
            let Entry::Async(collector) = entry else {
                continue;
            };
            let collector = Arc::clone(collector);
            let token = cancel.child_token();
            tasks.spawn(async move {
                let name = collector.subsystem();
                if let Err(err) = collector.run(token).await {
                    error!(collector = name, error = %err, "background collection stopped");
                }
            });
        }
        tasks
    }

    /// Run every collector once and return all families sorted by name.
    ///
    /// A failing collector contributes no families and reports
    /// `scrape_collector_success` 0; the scrape itself never fails.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();

        for entry in &self.entries {
            let name = entry.subsystem();
            let start = Instant::now();
            let success = match entry.update() {
                Ok(collected) => {
                    families.extend(collected);
                    1.0
                }
                Err(err) => {
                    warn!(collector = name, error = %err, "collector failed");
                    0.0
                }
            };
            self.scrape_duration
                .with_label_values(&[name])
                .set(start.elapsed().as_secs_f64());
            self.scrape_success.with_label_values(&[name]).set(success);
        }

        families.extend(gather_vecs(&[&self.scrape_duration, &self.scrape_success]));
        families.retain(|family| !family.get_metric().is_empty());
        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        families
    }
}
