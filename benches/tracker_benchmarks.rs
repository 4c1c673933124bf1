use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use server_exporter::collector::sshauth::{classify, SessionTracker};

const LINES: [&str; 4] = [
    "Jan 10 12:00:00 host sshd[100]: Accepted password for alice from 10.0.0.5 port 22222 ssh2",
    "Jan 10 12:00:00 host sshd[100]: pam_unix(sshd:session): session opened for user alice",
    "Jan 10 12:30:00 host sshd[100]: pam_unix(sshd:session): session closed for user alice",
    "Jan 10 12:30:01 host CRON[311]: pam_unix(cron:session): session opened for user root",
];

/// Benchmark classification of each line shape
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for (i, line) in LINES.iter().enumerate() {
        group.bench_with_input(BenchmarkId::from_parameter(i), line, |b, line| {
            b.iter(|| classify(black_box(line)))
        });
    }
    group.finish();
}

/// Benchmark a full session lifecycle through the tracker
fn bench_session_lifecycle(c: &mut Criterion) {
    let tracker = SessionTracker::new("bench").expect("Should create tracker");

    c.bench_function("session_lifecycle", |b| {
        b.iter(|| {
            for line in LINES {
                tracker.process_line(black_box(line));
            }
        })
    });
}

/// Benchmark snapshots with many live sessions
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    for sessions in [10, 100, 1000] {
        let tracker = SessionTracker::new("bench").expect("Should create tracker");
        for pid in 0..sessions {
            tracker.process_line(&format!(
                "sshd[{pid}]: Accepted publickey for user{pid} from 10.0.0.1 port {pid}"
            ));
            tracker.process_line(&format!(
                "sshd[{pid}]: pam_unix(sshd:session): session opened for user user{pid}"
            ));
        }

        group.bench_with_input(BenchmarkId::from_parameter(sessions), &tracker, |b, tracker| {
            b.iter(|| tracker.snapshot())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_classify, bench_session_lifecycle, bench_snapshot);
criterion_main!(benches);
