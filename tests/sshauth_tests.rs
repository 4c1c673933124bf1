use server_exporter::collector::sshauth::{AuthType, SessionTracker, SshAuthCollector};
use server_exporter::collector::{AsyncCollector, Collector};
use server_exporter::SshAuthConfig;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ACCEPT_100: &str = "Jan 10 12:00:00 host sshd[100]: Accepted password for alice from 10.0.0.5 port 22222 ssh2";
const OPENED_100: &str = "Jan 10 12:00:00 host sshd[100]: pam_unix(sshd:session): session opened for user alice(uid=1000) by (uid=0)";
const CLOSED_100: &str = "Jan 10 12:30:00 host sshd[100]: pam_unix(sshd:session): session closed for user alice";

async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Feed lines one at a time and check the aggregates after each of them.
#[test]
fn test_accept_open_close_lifecycle() {
    let tracker = SessionTracker::new("server").unwrap();

    tracker.process_line(ACCEPT_100);
    assert!(tracker.snapshot().is_empty());

    tracker.process_line(OPENED_100);
    assert_eq!(tracker.auth_count(AuthType::Password, "alice"), Some(1));
    assert_eq!(
        tracker.living(AuthType::Password, "alice", "10.0.0.5", "22222"),
        Some(1.0)
    );

    tracker.process_line(CLOSED_100);
    assert_eq!(
        tracker.living(AuthType::Password, "alice", "10.0.0.5", "22222"),
        None
    );
    assert_eq!(tracker.auth_count(AuthType::Password, "alice"), Some(1));
}

#[test]
fn test_malformed_line_after_accept_is_ignored() {
    let tracker = SessionTracker::new("server").unwrap();

    assert!(tracker.process_line(
        "sshd[200]: Accepted publickey for bob from 192.0.2.7 port 40022 ssh2"
    ));
    assert!(!tracker.process_line("garbage text"));

    let record = tracker.session("200").expect("record for pid 200");
    assert_eq!(record.username, "bob");
    assert!(tracker.snapshot().is_empty());
}

#[test]
fn test_replayed_open_line_counts_twice() {
    let tracker = SessionTracker::new("server").unwrap();
    tracker.process_line(ACCEPT_100);
    tracker.process_line(OPENED_100);
    tracker.process_line(OPENED_100);

    assert_eq!(tracker.auth_count(AuthType::Password, "alice"), Some(2));
    assert_eq!(
        tracker.living(AuthType::Password, "alice", "10.0.0.5", "22222"),
        Some(1.0)
    );
}

fn label_values(
    families: &[prometheus::proto::MetricFamily],
    family_name: &str,
    label: &str,
) -> BTreeSet<String> {
    families
        .iter()
        .filter(|family| family.get_name() == family_name)
        .flat_map(|family| family.get_metric().iter())
        .flat_map(|metric| metric.get_label().iter())
        .filter(|pair| pair.get_name() == label)
        .map(|pair| pair.get_value().to_string())
        .collect()
}

/// Every snapshot must see each open transition completely or not at all.
#[test]
fn test_snapshot_never_sees_half_applied_open() {
    let tracker = Arc::new(SessionTracker::new("server").unwrap());

    let writer = {
        let tracker = Arc::clone(&tracker);
        std::thread::spawn(move || {
            for pid in 0..2000 {
                tracker.process_line(&format!(
                    "sshd[{pid}]: Accepted password for user{pid} from 10.0.0.1 port {pid}"
                ));
                tracker.process_line(&format!(
                    "sshd[{pid}]: pam_unix(sshd:session): session opened for user user{pid}"
                ));
            }
        })
    };

    while !writer.is_finished() {
        let families = tracker.snapshot();
        let counted = label_values(&families, "server_sshauth_count", "username");
        let living = label_values(&families, "server_sshauth_living", "username");
        assert_eq!(counted, living);
    }
    writer.join().unwrap();

    assert_eq!(
        label_values(&tracker.snapshot(), "server_sshauth_living", "username").len(),
        2000
    );
}

#[tokio::test]
async fn test_collector_follows_appended_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secure");
    std::fs::write(&path, format!("{ACCEPT_100}\n")).unwrap();

    let config = SshAuthConfig::new(&path).with_poll_interval(Duration::from_millis(10));
    let collector = Arc::new(SshAuthCollector::new("server", config).unwrap());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&collector).run(cancel.clone()));

    eventually(|| collector.tracker().session("100").is_some()).await;
    assert!(collector.update().unwrap().is_empty());

    let mut log = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(log, "{OPENED_100}").unwrap();
    eventually(|| collector.tracker().auth_count(AuthType::Password, "alice") == Some(1)).await;

    writeln!(log, "{CLOSED_100}").unwrap();
    eventually(|| collector.tracker().session("100").is_none()).await;
    assert_eq!(
        collector
            .tracker()
            .living(AuthType::Password, "alice", "10.0.0.5", "22222"),
        None
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("follower stops after cancellation")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_unopenable_log_is_reported_to_caller() {
    let dir = tempfile::tempdir().unwrap();
    let config = SshAuthConfig::new(dir.path());
    let collector = Arc::new(SshAuthCollector::new("server", config).unwrap());

    let result = Arc::clone(&collector).run(CancellationToken::new()).await;
    assert!(result.is_err());
    assert!(collector.update().is_err());
}
