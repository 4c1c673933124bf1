//! Sensor state table collector.

use crate::collector::info_vec;
use crate::collector::traits::Collector;
use crate::config::SensorConfig;
use crate::error::{ExporterError, Result};
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::GaugeVec;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const SUBSYSTEM: &str = "sensor";

/// Split a `|`-separated state line into trimmed cells.
pub fn parse_state_line(line: &str) -> Vec<String> {
    line.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Parse a state table, skipping the header line when present.
pub fn parse_state_table(content: &str, has_header: bool) -> Vec<Vec<String>> {
    content
        .lines()
        .skip(usize::from(has_header))
        .filter(|line| !line.trim().is_empty())
        .map(parse_state_line)
        .collect()
}

/// Reports every row of a sensor state table as one series.
///
/// The label set (`col_0` … `col_N`) is fixed by the first table read. Rows
/// with a different column count are dropped. When the file cannot be read
/// the last table read successfully is reported again.
pub struct SensorCollector {
    namespace: String,
    path: PathBuf,
    has_header: bool,
    state: Mutex<SensorState>,
}

#[derive(Default)]
struct SensorState {
    rows: Vec<Vec<String>>,
    reading: Option<GaugeVec>,
}

impl SensorCollector {
    pub fn new(namespace: &str, config: &SensorConfig) -> Result<Self> {
        let path = config.path.clone().ok_or_else(|| {
            ExporterError::collector_error(SUBSYSTEM, "no sensor state path configured")
        })?;

        Ok(Self {
            namespace: namespace.to_string(),
            path,
            has_header: config.has_header,
            state: Mutex::new(SensorState::default()),
        })
    }

    fn reading_vec(&self, columns: usize) -> Result<GaugeVec> {
        let names: Vec<String> = (0..columns).map(|i| format!("col_{i}")).collect();
        let labels: Vec<&str> = names.iter().map(String::as_str).collect();
        info_vec(
            &self.namespace,
            SUBSYSTEM,
            "reading",
            "Sensor reading from the sensor state table",
            &labels,
        )
    }
}

impl Collector for SensorCollector {
    fn subsystem(&self) -> &'static str {
        SUBSYSTEM
    }

    fn update(&self) -> Result<Vec<MetricFamily>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let rows = parse_state_table(&content, self.has_header);
                if !rows.is_empty() {
                    state.rows = rows;
                }
            }
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "sensor state unreadable");
            }
        }

        let Some(width) = state.rows.first().map(Vec::len) else {
            return Err(ExporterError::collector_error(
                SUBSYSTEM,
                "state file does not exist or is busy",
            ));
        };

        let reading = match state.reading.clone() {
            Some(reading) => reading,
            None => {
                let reading = self.reading_vec(width)?;
                state.reading = Some(reading.clone());
                reading
            }
        };

        reading.reset();
        for row in &state.rows {
            let values: Vec<&str> = row.iter().map(String::as_str).collect();
            // Rows whose width differs from the label set are rejected here.
            if let Ok(gauge) = reading.get_metric_with_label_values(&values) {
                gauge.set(0.0);
            }
        }

        Ok(reading
            .collect()
            .into_iter()
            .filter(|family| !family.get_metric().is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector_for(path: PathBuf, has_header: bool) -> SensorCollector {
        let config = SensorConfig {
            enabled: true,
            path: Some(path),
            has_header,
        };
        SensorCollector::new("test", &config).unwrap()
    }

    #[test]
    fn test_parse_state_table() {
        let table = "name | value | status\n cpu0 | 41 | ok \n\nfan1|1200|ok\n";
        let rows = parse_state_table(table, true);
        assert_eq!(
            rows,
            vec![
                vec!["cpu0", "41", "ok"],
                vec!["fan1", "1200", "ok"],
            ]
        );
    }

    #[test]
    fn test_requires_path() {
        assert!(SensorCollector::new("test", &SensorConfig::default()).is_err());
    }

    #[test]
    fn test_rows_with_other_width_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.log");
        fs::write(&path, "a|b\nx|1\ny|2|extra\n").unwrap();

        let families = collector_for(path, true).update().unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "test_sensor_reading");
        assert_eq!(families[0].get_metric().len(), 1);
    }

    #[test]
    fn test_keeps_last_table_when_file_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.log");
        fs::write(&path, "x|1\ny|2\n").unwrap();

        let collector = collector_for(path.clone(), false);
        assert_eq!(collector.update().unwrap()[0].get_metric().len(), 2);

        fs::remove_file(&path).unwrap();
        assert_eq!(collector.update().unwrap()[0].get_metric().len(), 2);
    }

    #[test]
    fn test_fails_when_nothing_was_ever_read() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector_for(dir.path().join("missing"), true);
        assert!(collector.update().is_err());
    }
}
