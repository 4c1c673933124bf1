//! SSH authentication session tracking.
//!
//! Follows the sshd auth log and reconstructs which SSH sessions are live by
//! pairing `Accepted ...` lines with the pam_unix session lines logged by the
//! same sshd process:
//!
//! - `<ns>_sshauth_count{auth_type, username}` counts session opens.
//! - `<ns>_sshauth_living{auth_type, username, remote_ip, remote_port}` is 1
//!   while a session is open and disappears when it closes.
//!
//! The result is best effort. Sessions whose lines are only in an older,
//! already rotated log, or were lost to a copy-truncate rotation, are not
//! reported.

pub mod classifier;
pub mod follower;
pub mod tracker;

pub use classifier::{classify, AuthAcceptEvent, AuthType, LineEvent, SessionEvent, SessionPhase};
pub use follower::LogFollower;
pub use tracker::{SessionRecord, SessionTracker};

use crate::collector::traits::{AsyncCollector, Collector};
use crate::config::SshAuthConfig;
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use prometheus::proto::MetricFamily;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Collector pairing the auth log follower with the session tracker.
pub struct SshAuthCollector {
    config: SshAuthConfig,
    tracker: SessionTracker,
    /// Why the follower stopped, once it has failed
    stopped: Mutex<Option<String>>,
}

impl SshAuthCollector {
    pub fn new(namespace: &str, config: SshAuthConfig) -> Result<Self> {
        Ok(Self {
            tracker: SessionTracker::new(namespace)?,
            config,
            stopped: Mutex::new(None),
        })
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }
}

impl Collector for SshAuthCollector {
    fn subsystem(&self) -> &'static str {
        tracker::SUBSYSTEM
    }

    /// Fails once the follower has stopped with an error, so a dead tracker
    /// shows up as an unsuccessful scrape.
    fn update(&self) -> Result<Vec<MetricFamily>> {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reason) = stopped.as_ref() {
            return Err(ExporterError::collector_error(
                tracker::SUBSYSTEM,
                format!("auth log follower stopped: {reason}"),
            ));
        }
        Ok(self.tracker.snapshot())
    }
}

#[async_trait]
impl AsyncCollector for SshAuthCollector {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let follower = LogFollower::new(&self.config.path, self.config.poll_interval);
        let result = follower
            .run(cancel, |line| {
                self.tracker.process_line(line);
            })
            .await;

        if let Err(err) = &result {
            *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_replays_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure");
        std::fs::write(
            &path,
            "sshd[100]: Accepted password for alice from 10.0.0.5 port 22222\n\
             sshd[100]: pam_unix(sshd:session): session opened for user alice\n",
        )
        .unwrap();

        let config = SshAuthConfig::new(&path).with_poll_interval(Duration::from_millis(10));
        let collector = Arc::new(SshAuthCollector::new("test", config).unwrap());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&collector).run(cancel.clone()));

        for _ in 0..200 {
            if collector.tracker().auth_count(AuthType::Password, "alice") == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(collector.subsystem(), "sshauth");
        assert_eq!(collector.update().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_fails_after_follower_stops() {
        let dir = tempfile::tempdir().unwrap();
        let config = SshAuthConfig::new(dir.path());
        let collector = Arc::new(SshAuthCollector::new("test", config).unwrap());
        assert!(collector.update().is_ok());

        let result = Arc::clone(&collector).run(CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(matches!(
            collector.update(),
            Err(ExporterError::Collector { name: "sshauth", .. })
        ));
    }
}
