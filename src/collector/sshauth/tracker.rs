//! SSH session registry and the aggregates derived from it.

use super::classifier::{classify, AuthAcceptEvent, AuthType, LineEvent, SessionPhase};
use crate::error::Result;
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, IntCounterVec, Opts};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

pub(crate) const SUBSYSTEM: &str = "sshauth";

const COUNT_LABELS: [&str; 2] = ["auth_type", "username"];
const LIVING_LABELS: [&str; 4] = ["auth_type", "username", "remote_ip", "remote_port"];

/// Fields remembered for an sshd process between accept and close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub auth_type: AuthType,
    pub username: String,
    pub remote_address: String,
    pub remote_port: String,
}

impl SessionRecord {
    fn count_labels(&self) -> [&str; 2] {
        [self.auth_type.as_str(), &self.username]
    }

    fn living_labels(&self) -> [&str; 4] {
        [
            self.auth_type.as_str(),
            &self.username,
            &self.remote_address,
            &self.remote_port,
        ]
    }
}

impl From<AuthAcceptEvent> for SessionRecord {
    fn from(event: AuthAcceptEvent) -> Self {
        Self {
            auth_type: event.auth_type,
            username: event.username,
            remote_address: event.remote_address,
            remote_port: event.remote_port,
        }
    }
}

/// Reconstructs SSH session state from classified auth log events.
///
/// The session table and both aggregates sit behind one lock. Every
/// transition and every snapshot holds it for the whole operation, so a
/// snapshot never sees the gauge of an `opened` transition without its
/// counter increment. The lock is only held for in-memory work.
pub struct SessionTracker {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    auth_count: IntCounterVec,
    living: GaugeVec,
}

impl SessionTracker {
    /// Create a tracker whose metrics live under `namespace`.
    pub fn new(namespace: &str) -> Result<Self> {
        let auth_count = IntCounterVec::new(
            Opts::new("count", "SSH auth count from the auth log")
                .namespace(namespace)
                .subsystem(SUBSYSTEM),
            &COUNT_LABELS,
        )?;
        let living = GaugeVec::new(
            Opts::new("living", "SSH sessions currently open according to the auth log")
                .namespace(namespace)
                .subsystem(SUBSYSTEM),
            &LIVING_LABELS,
        )?;

        Ok(Self {
            sessions: Mutex::new(HashMap::new()),
            auth_count,
            living,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify one raw line and apply it. Returns false for unrecognized lines.
    pub fn process_line(&self, line: &str) -> bool {
        match classify(line) {
            LineEvent::Unrecognized => {
                trace!(line, "ignoring unrecognized auth log line");
                false
            }
            event => {
                self.apply(event);
                true
            }
        }
    }

    /// Apply a classified event.
    pub fn apply(&self, event: LineEvent) {
        match event {
            LineEvent::Accept(accept) => self.apply_accept(accept),
            LineEvent::Session(session) => match session.phase {
                SessionPhase::Opened => self.apply_opened(&session.process_id),
                SessionPhase::Closed => self.apply_closed(&session.process_id),
            },
            LineEvent::Unrecognized => {}
        }
    }

    /// Record an accepted authentication, replacing any stale record for a
    /// reused process id.
    pub fn apply_accept(&self, event: AuthAcceptEvent) {
        let process_id = event.process_id.clone();
        self.lock().insert(process_id, SessionRecord::from(event));
    }

    /// Mark the session of `process_id` live.
    ///
    /// Repeated opens for the same record are not deduplicated: each one sets
    /// the gauge to 1 again and increments the counter again.
    pub fn apply_opened(&self, process_id: &str) {
        let sessions = self.lock();
        let Some(record) = sessions.get(process_id) else {
            return;
        };

        self.living.with_label_values(&record.living_labels()).set(1.0);
        self.auth_count
            .with_label_values(&record.count_labels())
            .inc();
    }

    /// Drop the session of `process_id` and its living series.
    pub fn apply_closed(&self, process_id: &str) {
        let mut sessions = self.lock();
        let Some(record) = sessions.remove(process_id) else {
            return;
        };

        // Absent when the close arrives without a preceding open.
        let _ = self.living.remove_label_values(&record.living_labels());
    }

    /// Copy the current aggregates out. Families without series are skipped.
    pub fn snapshot(&self) -> Vec<MetricFamily> {
        let _sessions = self.lock();
        self.auth_count
            .collect()
            .into_iter()
            .chain(self.living.collect())
            .filter(|family| !family.get_metric().is_empty())
            .collect()
    }

    /// The record currently held for `process_id`.
    pub fn session(&self, process_id: &str) -> Option<SessionRecord> {
        self.lock().get(process_id).cloned()
    }

    /// Number of records in the session table.
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Current auth count for `(auth_type, username)`, if the series exists.
    pub fn auth_count(&self, auth_type: AuthType, username: &str) -> Option<u64> {
        find_series(
            &self.snapshot(),
            "_count",
            &[auth_type.as_str(), username],
            &COUNT_LABELS,
        )
        .map(|metric| metric.get_counter().get_value() as u64)
    }

    /// Current living gauge for a full label tuple, if the series exists.
    pub fn living(
        &self,
        auth_type: AuthType,
        username: &str,
        remote_address: &str,
        remote_port: &str,
    ) -> Option<f64> {
        find_series(
            &self.snapshot(),
            "_living",
            &[auth_type.as_str(), username, remote_address, remote_port],
            &LIVING_LABELS,
        )
        .map(|metric| metric.get_gauge().get_value())
    }
}

fn find_series(
    families: &[MetricFamily],
    name_suffix: &str,
    values: &[&str],
    names: &[&str],
) -> Option<prometheus::proto::Metric> {
    families
        .iter()
        .filter(|family| family.get_name().ends_with(name_suffix))
        .flat_map(|family| family.get_metric().iter())
        .find(|metric| {
            names.iter().zip(values).all(|(name, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
            })
        })
        .cloned()
}
