//! Traits implemented by every collector.

use crate::error::Result;
use async_trait::async_trait;
use prometheus::proto::MetricFamily;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A collector that produces metric families on demand.
///
/// `update` is called once per scrape, possibly from several scrapes at the
/// same time, so implementations must be safe to share between threads.
pub trait Collector: Send + Sync {
    /// Subsystem name used in metric names and in the scrape status series.
    fn subsystem(&self) -> &'static str;

    /// Produce the current metric families for this collector.
    fn update(&self) -> Result<Vec<MetricFamily>>;
}

/// A collector that also needs a long-lived background task.
///
/// The registry spawns `run` once at startup and cancels the token on
/// shutdown. An error returned from `run` ends that collector's background
/// work only; scrapes keep serving whatever it gathered so far.
#[async_trait]
pub trait AsyncCollector: Collector {
    /// Run the background work until `cancel` fires.
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()>;
}
