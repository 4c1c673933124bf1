//! Docker container counts by state.
//!
//! The Docker API is asynchronous, so listing happens in a background task
//! every poll interval and a scrape reports the latest listing:
//!
//! - `<ns>_container_total` is the number of containers, running or not.
//! - `<ns>_container_count{state}` splits that number by container state.

use crate::collector::traits::{AsyncCollector, Collector};
use crate::config::ContainerConfig;
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::Docker;
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, GaugeVec, Opts};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SUBSYSTEM: &str = "container";

/// Anything that can list the state of every container.
#[async_trait]
pub trait ContainerSource: Send + Sync {
    async fn container_states(&self) -> Result<Vec<String>>;
}

/// Lists containers through the local Docker daemon. `DOCKER_HOST` selects
/// another unix socket.
pub struct DockerSource {
    docker: Docker,
}

impl DockerSource {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ExporterError::collector_error(SUBSYSTEM, e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerSource for DockerSource {
    async fn container_states(&self) -> Result<Vec<String>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ExporterError::collector_error(SUBSYSTEM, e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|container| container.state.unwrap_or_default())
            .collect())
    }
}

enum Listing {
    Pending,
    Ready,
    Failed(String),
}

pub struct ContainerCollector {
    config: ContainerConfig,
    source: Arc<dyn ContainerSource>,
    listing: Mutex<Listing>,
    total: Gauge,
    count: GaugeVec,
}

impl ContainerCollector {
    /// Create a collector backed by the local Docker daemon.
    pub fn new(namespace: &str, config: &ContainerConfig) -> Result<Self> {
        Self::with_source(namespace, config, Arc::new(DockerSource::connect()?))
    }

    pub fn with_source(
        namespace: &str,
        config: &ContainerConfig,
        source: Arc<dyn ContainerSource>,
    ) -> Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .subsystem(SUBSYSTEM)
        };

        Ok(Self {
            config: config.clone(),
            source,
            listing: Mutex::new(Listing::Pending),
            total: Gauge::with_opts(opts("total", "Number of containers known to docker"))?,
            count: GaugeVec::new(opts("count", "Number of containers per state"), &["state"])?,
        })
    }

    /// List containers once and record the outcome for the next scrape.
    pub async fn poll(&self) {
        let listed = tokio::time::timeout(self.config.timeout, self.source.container_states()).await;
        let listed = match listed {
            Ok(result) => result,
            Err(_) => Err(ExporterError::collector_error(
                SUBSYSTEM,
                format!("listing timed out after {:?}", self.config.timeout),
            )),
        };

        let mut listing = self.listing.lock().unwrap_or_else(PoisonError::into_inner);
        match listed {
            Ok(states) => {
                self.count.reset();
                for (state, count) in count_states(&states) {
                    self.count.with_label_values(&[&state]).set(count as f64);
                }
                self.total.set(states.len() as f64);
                *listing = Listing::Ready;
            }
            Err(err) => {
                if !matches!(*listing, Listing::Failed(_)) {
                    warn!(error = %err, "listing containers failed");
                }
                *listing = Listing::Failed(err.to_string());
            }
        }
    }
}

fn count_states(states: &[String]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for state in states {
        *counts.entry(state.clone()).or_insert(0) += 1;
    }
    counts
}

impl Collector for ContainerCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }

    fn update(&self) -> Result<Vec<MetricFamily>> {
        let listing = self.listing.lock().unwrap_or_else(PoisonError::into_inner);
        match &*listing {
            Listing::Pending => Err(ExporterError::collector_error(
                SUBSYSTEM,
                "no container listing yet",
            )),
            Listing::Failed(reason) => Err(ExporterError::collector_error(SUBSYSTEM, reason.clone())),
            Listing::Ready => Ok(self
                .total
                .collect()
                .into_iter()
                .chain(self.count.collect())
                .filter(|family| !family.get_metric().is_empty())
                .collect()),
        }
    }
}

#[async_trait]
impl AsyncCollector for ContainerCollector {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        debug!(interval = ?self.config.poll_interval, "polling docker for containers");
        loop {
            self.poll().await;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}
