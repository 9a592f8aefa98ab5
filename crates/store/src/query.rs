//! Read side of the data directory, as used by dashboards.
//!
//! Readers never fail on bad data: a missing or malformed file reads as empty.

use crate::{
    epoch_seconds, history_file_name, read_json, Result, SensorReading, HISTORY_PREFIX,
    SNAPSHOT_FILE,
};
use chrono::{DateTime, Local, NaiveDate};
use status::Status;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct HistoryReader {
    root: PathBuf,
}

impl HistoryReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_or_empty<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.root.join(name);
        match read_json::<T>(&path) {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "treating unreadable file as empty");
                T::default()
            }
        }
    }

    /// The latest batch from `current_data.json`.
    pub fn current(&self) -> Vec<SensorReading> {
        self.read_or_empty(SNAPSHOT_FILE)
    }

    pub fn latest(&self, device_id: &str) -> Option<SensorReading> {
        self.read_or_empty::<Option<SensorReading>>(&format!("{device_id}.json"))
    }

    /// Every record from the daily logs covering `since..=now`.
    fn history_between(
        &self,
        since: &DateTime<Local>,
        now: &DateTime<Local>,
    ) -> Vec<SensorReading> {
        let mut out = Vec::new();
        let last: NaiveDate = now.date_naive();
        let mut day = since.date_naive();
        while day <= last {
            out.extend(self.read_or_empty::<Vec<SensorReading>>(&history_file_name(day)));
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        out
    }

    /// One device's readings since `since`, oldest first.
    pub fn device_history(
        &self,
        device_id: &str,
        since: DateTime<Local>,
        now: DateTime<Local>,
    ) -> Vec<SensorReading> {
        let earliest = epoch_seconds(&since);
        let mut records: Vec<SensorReading> = self
            .history_between(&since, &now)
            .into_iter()
            .filter(|r| r.device_id == device_id && r.timestamp >= earliest)
            .collect();
        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        records
    }

    /// Non-normal readings since `since`, newest first.
    pub fn alerts(&self, since: DateTime<Local>, now: DateTime<Local>) -> Vec<SensorReading> {
        let earliest = epoch_seconds(&since);
        let mut records: Vec<SensorReading> = self
            .history_between(&since, &now)
            .into_iter()
            .filter(|r| r.status.is_alert() && r.timestamp >= earliest)
            .collect();
        records.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        records
    }

    /// Remove every daily history file. Returns how many were deleted.
    pub fn clear_history(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(crate::io_err(&self.root)(e)),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(crate::io_err(&self.root))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(HISTORY_PREFIX) && name.ends_with(".json") {
                let path = entry.path();
                fs::remove_file(&path).map_err(crate::io_err(&path))?;
                removed += 1;
            }
        }
        info!(removed, root = %self.root.display(), "history cleared");
        Ok(removed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation (n - 1).
    pub std_dev: f64,
    pub warnings: usize,
    pub criticals: usize,
}

impl SeriesStats {
    pub fn from_readings(readings: &[SensorReading]) -> Option<Self> {
        if readings.is_empty() {
            return None;
        }
        let n = readings.len();
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut warnings = 0;
        let mut criticals = 0;
        for r in readings {
            sum += r.value;
            min = min.min(r.value);
            max = max.max(r.value);
            match r.status {
                Status::Warning => warnings += 1,
                Status::Critical => criticals += 1,
                Status::Normal => {}
            }
        }
        let mean = sum / n as f64;
        let std_dev = if n > 1 {
            let ss: f64 = readings.iter().map(|r| (r.value - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(Self {
            count: n,
            mean,
            min,
            max,
            std_dev,
            warnings,
            criticals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Local> {
        Local.timestamp_opt(secs, 0).unwrap()
    }

    fn reading(
        device_id: &str,
        value: f64,
        when: &DateTime<Local>,
        status: Status,
    ) -> SensorReading {
        SensorReading {
            device_id: device_id.to_string(),
            sensor_type: "noise".to_string(),
            value,
            unit: "dB".to_string(),
            timestamp: epoch_seconds(when),
            status,
        }
    }

    #[test]
    fn missing_files_read_empty() {
        let dir = TempDir::new().unwrap();
        let reader = HistoryReader::new(dir.path().join("nope"));
        assert!(reader.current().is_empty());
        assert!(reader.latest("noise_01").is_none());
        assert!(reader.alerts(at(0), at(1000)).is_empty());
        assert_eq!(reader.clear_history().unwrap(), 0);
    }

    #[test]
    fn malformed_snapshot_reads_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), "not json").unwrap();
        assert!(HistoryReader::new(dir.path()).current().is_empty());
    }

    #[test]
    fn device_history_spans_days_and_filters() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), 1000).unwrap();
        let now = at(1_710_000_000);
        let yesterday = now - Duration::hours(26);
        let recent = now - Duration::minutes(30);
        let older = now - Duration::hours(3);

        let first = reading("noise_01", 70.0, &yesterday, Status::Normal);
        store.append_history(&[first], yesterday.date_naive()).unwrap();
        store
            .append_history(
                &[
                    reading("noise_01", 80.0, &recent, Status::Warning),
                    reading("noise_02", 60.0, &recent, Status::Normal),
                ],
                recent.date_naive(),
            )
            .unwrap();
        let third = reading("noise_01", 66.0, &older, Status::Normal);
        store.append_history(&[third], older.date_naive()).unwrap();

        let reader = HistoryReader::new(dir.path());
        let last_hour = reader.device_history("noise_01", now - Duration::hours(1), now);
        assert_eq!(last_hour.len(), 1);
        assert_eq!(last_hour[0].value, 80.0);

        let two_days = reader.device_history("noise_01", now - Duration::hours(48), now);
        let values: Vec<f64> = two_days.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![70.0, 66.0, 80.0]);
    }

    #[test]
    fn alerts_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), 1000).unwrap();
        let now = at(1_710_000_000);
        let a = now - Duration::minutes(10);
        let b = now - Duration::minutes(5);
        store
            .append_history(
                &[
                    reading("noise_01", 80.0, &a, Status::Warning),
                    reading("noise_02", 60.0, &a, Status::Normal),
                    reading("noise_03", 95.0, &b, Status::Critical),
                ],
                now.date_naive(),
            )
            .unwrap();
        let alerts = HistoryReader::new(dir.path()).alerts(now - Duration::hours(1), now);
        let ids: Vec<&str> = alerts.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(ids, vec!["noise_03", "noise_01"]);
    }

    #[test]
    fn clear_history_only_touches_logs() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        let now = at(1_710_000_000);
        let r = reading("noise_01", 1.0, &now, Status::Normal);
        store.append_history(&[r.clone()], now.date_naive()).unwrap();
        store.write_snapshot(&[r.clone()]).unwrap();
        store.write_device_latest(&r).unwrap();

        let reader = HistoryReader::new(dir.path());
        assert_eq!(reader.clear_history().unwrap(), 1);
        assert_eq!(reader.current().len(), 1);
        assert_eq!(reader.latest("noise_01"), Some(r));
    }

    #[test]
    fn stats_over_series() {
        let now = at(0);
        let rs = vec![
            reading("x", 2.0, &now, Status::Normal),
            reading("x", 4.0, &now, Status::Warning),
            reading("x", 6.0, &now, Status::Critical),
        ];
        let s = SeriesStats::from_readings(&rs).unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.mean, 4.0);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 6.0);
        assert!((s.std_dev - 2.0).abs() < 1e-12);
        assert_eq!((s.warnings, s.criticals), (1, 1));
        assert!(SeriesStats::from_readings(&[]).is_none());
    }
}
