use crate::{GeneratorError, Result};
use parking_lot::Mutex;
use sim::round2;
use status::Status;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone, Debug, PartialEq)]
pub struct ManualAnomaly {
    pub device_id: String,
    pub value: f64,
    /// Seconds since the Unix epoch, inclusive.
    pub end_time: f64,
}

/// Externally injected overrides, at most one per device.
///
/// Cloning yields another handle to the same table, so a UI thread can inject
/// while the sampling loop consults.
#[derive(Clone, Debug, Default)]
pub struct ManualAnomalyTracker {
    table: Arc<Mutex<HashMap<String, ManualAnomaly>>>,
}

pub(crate) fn now_epoch() -> f64 {
    store::epoch_seconds(&chrono::Utc::now())
}

impl ManualAnomalyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `device_id` to report `value` as critical for `duration` from now.
    /// Unknown ids are stored and simply never match.
    pub fn set(
        &self,
        device_id: impl Into<String>,
        value: f64,
        duration: Duration,
    ) -> Result<()> {
        self.set_at(device_id, value, duration, now_epoch())
    }

    /// Rejects values that are not finite once rounded, since they cannot be
    /// written to the JSON logs.
    pub fn set_at(
        &self,
        device_id: impl Into<String>,
        value: f64,
        duration: Duration,
        now: f64,
    ) -> Result<()> {
        let device_id = device_id.into();
        if !round2(value).is_finite() {
            return Err(GeneratorError::InvalidAnomaly { device_id, value });
        }
        let end_time = now + duration.as_secs_f64();
        info!(
            device_id = %device_id,
            value,
            duration_s = duration.as_secs_f64(),
            "manual anomaly installed"
        );
        self.table.lock().insert(
            device_id.clone(),
            ManualAnomaly {
                device_id,
                value,
                end_time,
            },
        );
        Ok(())
    }

    /// Active override for `device_id` at `now`. An expired entry is removed
    /// the first time it is looked at.
    pub fn consult(&self, device_id: &str, now: f64) -> Option<(f64, Status)> {
        let mut table = self.table.lock();
        let anomaly = table.get(device_id)?;
        if now <= anomaly.end_time {
            return Some((anomaly.value, Status::Critical));
        }
        table.remove(device_id);
        info!(device_id, "manual anomaly expired");
        None
    }

    pub fn get(&self, device_id: &str) -> Option<ManualAnomaly> {
        self.table.lock().get(device_id).cloned()
    }

    pub fn clear(&self, device_id: &str) -> bool {
        self.table.lock().remove(device_id).is_some()
    }

    /// Entries currently held, including expired ones not yet consulted.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}
