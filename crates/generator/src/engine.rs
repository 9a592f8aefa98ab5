use crate::{GeneratorConfig, ManualAnomalyTracker, Result};
use chrono::{DateTime, Local, NaiveDate};
use sim::{round2, SensorCatalog, SignalModel};
use status::{classify, Status};
use store::{epoch_seconds, SensorReading, Store};
use tracing::{debug, error, warn};

/// One tick's worth of work: resolve every device, then persist the batch.
#[derive(Debug)]
pub struct Engine {
    catalog: SensorCatalog,
    model: SignalModel,
    anomalies: ManualAnomalyTracker,
    store: Store,
}

impl Engine {
    pub fn new(config: &GeneratorConfig, anomalies: ManualAnomalyTracker) -> Result<Self> {
        config.validate()?;
        let catalog = SensorCatalog::new(config.sensor_types.clone(), config.devices_per_type);
        let store = Store::open(&config.data_dir, config.max_records())?;
        Ok(Self {
            catalog,
            model: SignalModel::new(config.anomaly_probability, config.seed),
            anomalies,
            store,
        })
    }

    pub fn catalog(&self) -> &SensorCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Readings for every device at `now` (seconds since epoch). No I/O.
    pub fn tick(&mut self, now: f64) -> Vec<SensorReading> {
        let mut batch = Vec::with_capacity(self.catalog.len());
        for (device, cfg) in self.catalog.entries() {
            let (value, status) = match self.anomalies.consult(&device.device_id, now) {
                Some(hit) => hit,
                None => {
                    let v = self.model.synthesize(cfg, now);
                    (v, classify(v, cfg.normal_range, cfg.warning_range))
                }
            };
            batch.push(SensorReading {
                device_id: device.device_id.clone(),
                sensor_type: device.sensor_type.clone(),
                value: round2(value),
                unit: cfg.unit.clone(),
                timestamp: now,
                status,
            });
        }
        batch
    }

    /// Snapshot, per-device files, then the day's history. Not transactional:
    /// every write is attempted, each failure is logged and the first one is
    /// returned.
    pub fn persist(&self, batch: &[SensorReading], day: NaiveDate) -> store::Result<()> {
        let mut first = None;
        let mut note = |res: store::Result<()>| {
            if let Err(e) = res {
                error!(error = %e, "write failed");
                first.get_or_insert(e);
            }
        };
        note(self.store.write_snapshot(batch));
        for reading in batch {
            note(self.store.write_device_latest(reading));
        }
        note(self.store.append_history(batch, day).map(|_| ()));
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Tick and persist. Persistence failures are logged, never fatal.
    pub fn step(&mut self, now: DateTime<Local>) -> Vec<SensorReading> {
        let batch = self.tick(epoch_seconds(&now));
        let critical = batch.iter().filter(|r| r.status == Status::Critical).count();
        debug!(devices = batch.len(), critical, "tick");
        if self.persist(&batch, now.date_naive()).is_err() {
            warn!(devices = batch.len(), "tick persisted partially; retrying next tick");
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sim::builtin_types;
    use std::time::Duration;
    use tempfile::TempDir;

    fn flat_config(dir: &TempDir) -> GeneratorConfig {
        let temperature = sim::SensorTypeConfig {
            variance: 0.0,
            trend_amplitude: 0.0,
            ..builtin_types()[0].clone()
        };
        GeneratorConfig {
            data_dir: dir.path().to_path_buf(),
            sensor_types: vec![temperature],
            devices_per_type: 2,
            anomaly_probability: 0.0,
            seed: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn tick_covers_every_device() {
        let dir = TempDir::new().unwrap();
        let config = GeneratorConfig {
            data_dir: dir.path().to_path_buf(),
            seed: Some(9),
            ..Default::default()
        };
        let mut engine = Engine::new(&config, ManualAnomalyTracker::new()).unwrap();
        let batch = engine.tick(1_700_000_000.0);
        assert_eq!(batch.len(), 18);
        for (r, d) in batch.iter().zip(engine.catalog().devices()) {
            assert_eq!(r.device_id, d.device_id);
            let cfg = engine.catalog().config_of(d);
            assert_eq!(r.unit, cfg.unit);
            assert_eq!(r.status, classify(r.value, cfg.normal_range, cfg.warning_range));
        }
    }

    #[test]
    fn override_wins_then_expires() {
        let dir = TempDir::new().unwrap();
        let anomalies = ManualAnomalyTracker::new();
        let mut engine = Engine::new(&flat_config(&dir), anomalies.clone()).unwrap();
        let t0 = 1_700_000_000.0;
        anomalies.set_at("temperature_01", 45.0, Duration::from_secs(20), t0).unwrap();

        let during = engine.tick(t0 + 10.0);
        assert_eq!((during[0].value, during[0].status), (45.0, Status::Critical));
        assert_eq!((during[1].value, during[1].status), (22.0, Status::Normal));

        let after = engine.tick(t0 + 25.0);
        assert_eq!((after[0].value, after[0].status), (22.0, Status::Normal));
        assert!(anomalies.is_empty());
    }

    #[test]
    fn step_writes_all_artifacts() {
        let dir = TempDir::new().unwrap();
        let mut engine = Engine::new(&flat_config(&dir), ManualAnomalyTracker::new()).unwrap();
        let now = Local.timestamp_opt(1_700_000_000, 0).unwrap();
        engine.step(now);
        engine.step(now + chrono::Duration::seconds(5));

        assert!(dir.path().join("current_data.json").exists());
        assert!(dir.path().join("temperature_01.json").exists());
        assert!(dir.path().join("temperature_02.json").exists());
        let log = engine.store().load_history(now.date_naive()).unwrap();
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn history_written_even_if_a_device_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut engine = Engine::new(&flat_config(&dir), ManualAnomalyTracker::new()).unwrap();
        // A directory in place of the device file makes its rename fail.
        std::fs::create_dir(dir.path().join("temperature_01.json")).unwrap();
        std::fs::write(dir.path().join("temperature_01.json").join("keep"), b"x").unwrap();

        let now = Local.timestamp_opt(1_700_000_000, 0).unwrap();
        let batch = engine.tick(epoch_seconds(&now));
        assert!(engine.persist(&batch, now.date_naive()).is_err());

        assert!(dir.path().join("temperature_02.json").is_file());
        assert_eq!(engine.store().load_history(now.date_naive()).unwrap().len(), 2);
        assert_eq!(store::HistoryReader::new(dir.path()).current().len(), 2);
    }

    #[test]
    fn step_survives_unwritable_directory() {
        let dir = TempDir::new().unwrap();
        let mut engine = Engine::new(&flat_config(&dir), ManualAnomalyTracker::new()).unwrap();
        // Replace the data directory with a plain file so every write fails.
        std::fs::remove_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path(), b"").unwrap();
        let now = Local.timestamp_opt(1_700_000_000, 0).unwrap();
        let batch = engine.step(now);
        assert_eq!(batch.len(), 2);
        std::fs::remove_file(dir.path()).unwrap();
    }
}
