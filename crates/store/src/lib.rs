//! File-based persistence for sensor readings.
//!
//! Layout under the data directory:
//!
//! ```text
//! current_data.json        latest batch, one reading per device
//! <device_id>.json         latest reading of a single device
//! history_YYYYMMDD.json    append-bounded log for one local calendar day
//! ```
//!
//! Every file is replaced by writing a sibling `.tmp` file and renaming it over
//! the target, so readers never see a half-written document.

mod query;

pub use query::{HistoryReader, SeriesStats};

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use status::Status;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const SNAPSHOT_FILE: &str = "current_data.json";
const HISTORY_PREFIX: &str = "history_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error on {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_id: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    /// Rounded to 2 decimals.
    pub value: f64,
    pub unit: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub status: Status,
}

pub fn epoch_seconds<Tz: TimeZone>(t: &DateTime<Tz>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

pub fn history_file_name(day: NaiveDate) -> String {
    format!("{HISTORY_PREFIX}{}.json", day.format("%Y%m%d"))
}

/// Records kept per daily log: one per device for every tick in `retention`.
pub fn retention_cap(retention: Duration, tick_interval: Duration, device_count: usize) -> usize {
    if tick_interval.is_zero() {
        return 0;
    }
    let ticks = (retention.as_secs_f64() / tick_interval.as_secs_f64()).floor() as usize;
    ticks * device_count
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))
}

/// Parse a JSON document, mapping a missing file to `None`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Clone, Debug)]
pub struct Store {
    root: PathBuf,
    max_records: usize,
}

impl Store {
    /// Open (creating if needed) the data directory.
    pub fn open(root: impl Into<PathBuf>, max_records: usize) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root, max_records })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn device_path(&self, device_id: &str) -> PathBuf {
        self.root.join(format!("{device_id}.json"))
    }

    pub fn history_path(&self, day: NaiveDate) -> PathBuf {
        self.root.join(history_file_name(day))
    }

    pub fn write_snapshot(&self, batch: &[SensorReading]) -> Result<()> {
        write_json_atomic(&self.snapshot_path(), batch)
    }

    pub fn write_device_latest(&self, reading: &SensorReading) -> Result<()> {
        write_json_atomic(&self.device_path(&reading.device_id), reading)
    }

    /// Load the log for `day`. A malformed file is discarded and logged.
    pub fn load_history(&self, day: NaiveDate) -> Result<Vec<SensorReading>> {
        let path = self.history_path(day);
        match read_json::<Vec<SensorReading>>(&path) {
            Ok(v) => Ok(v.unwrap_or_default()),
            Err(StoreError::Json { path, source }) => {
                warn!(
                    path = %path.display(),
                    error = %source,
                    "discarding unreadable history file"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Append `batch` to the log for `day`, keeping only the newest
    /// `max_records` entries. Returns the resulting log length.
    pub fn append_history(&self, batch: &[SensorReading], day: NaiveDate) -> Result<usize> {
        let mut history = self.load_history(day)?;
        history.extend_from_slice(batch);
        if history.len() > self.max_records {
            let excess = history.len() - self.max_records;
            history.drain(..excess);
            debug!(day = %day, dropped = excess, "history trimmed to retention cap");
        }
        write_json_atomic(&self.history_path(day), &history)?;
        Ok(history.len())
    }
}
