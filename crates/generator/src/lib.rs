//! Background sampling loop for the emulated sensor fleet.
//!
//! A [`Generator`] owns the loop. It goes `Idle -> Running -> Stopped`; a stopped
//! generator cannot be restarted, build a new one instead.

mod anomaly;
mod engine;

pub use anomaly::{ManualAnomaly, ManualAnomalyTracker};
pub use engine::Engine;

use chrono::Local;
use sim::{builtin_types, SensorCatalog, SensorTypeConfig, SignalModel};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use store::StoreError;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("manual anomaly for {device_id} has non-finite value {value}")]
    InvalidAnomaly { device_id: String, value: f64 },

    #[error("generator was stopped and cannot be restarted")]
    AlreadyStopped,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to spawn sampling thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, GeneratorError>;

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub devices_per_type: usize,
    /// Chance per reading of a random spike, 0..=1.
    pub anomaly_probability: f64,
    /// Window of history kept per daily log.
    pub retention: Duration,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
    pub sensor_types: Vec<SensorTypeConfig>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tick_interval: Duration::from_secs(5),
            devices_per_type: 3,
            anomaly_probability: SignalModel::DEFAULT_ANOMALY_PROBABILITY,
            retention: Duration::from_secs(24 * 60 * 60),
            seed: None,
            sensor_types: builtin_types(),
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(GeneratorError::InvalidConfig(msg)) };
        if self.tick_interval.is_zero() {
            return invalid("tick interval must be > 0".into());
        }
        if self.retention < self.tick_interval {
            return invalid("retention must cover at least one tick".into());
        }
        if self.devices_per_type == 0 {
            return invalid("devices_per_type must be > 0".into());
        }
        if self.sensor_types.is_empty() {
            return invalid("no sensor types configured".into());
        }
        if !(0.0..=1.0).contains(&self.anomaly_probability) {
            return invalid(format!(
                "anomaly probability {} outside 0..=1",
                self.anomaly_probability
            ));
        }
        for (i, t) in self.sensor_types.iter().enumerate() {
            if self.sensor_types[..i].iter().any(|o| o.name == t.name) {
                return invalid(format!("duplicate sensor type {}", t.name));
            }
            t.validate().map_err(GeneratorError::InvalidConfig)?;
        }
        Ok(())
    }

    pub fn device_count(&self) -> usize {
        self.sensor_types.len() * self.devices_per_type
    }

    pub fn max_records(&self) -> usize {
        store::retention_cap(self.retention, self.tick_interval, self.device_count())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorState {
    Idle,
    Running,
    Stopped,
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Handle to the sampling loop. Dropping a running generator stops it.
pub struct Generator {
    config: GeneratorConfig,
    catalog: SensorCatalog,
    anomalies: ManualAnomalyTracker,
    engine: Option<Engine>,
    worker: Option<Worker>,
    state: GeneratorState,
}

impl Generator {
    /// Validates `config` and prepares the data directory. Nothing runs until
    /// [`Generator::start`].
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let anomalies = ManualAnomalyTracker::new();
        let engine = Engine::new(&config, anomalies.clone())?;
        Ok(Self {
            catalog: engine.catalog().clone(),
            config,
            anomalies,
            engine: Some(engine),
            worker: None,
            state: GeneratorState::Idle,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SensorCatalog {
        &self.catalog
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Shared handle for injecting anomalies from other threads.
    pub fn anomalies(&self) -> ManualAnomalyTracker {
        self.anomalies.clone()
    }

    pub fn inject_anomaly(&self, device_id: &str, value: f64, duration: Duration) -> Result<()> {
        self.anomalies.set(device_id, value, duration)?;
        if self.catalog.device(device_id).is_none() {
            warn!(device_id, "manual anomaly for unknown device will never match");
        }
        Ok(())
    }

    /// Spawn the sampling loop. No-op while already running.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            GeneratorState::Running => return Ok(()),
            GeneratorState::Stopped => return Err(GeneratorError::AlreadyStopped),
            GeneratorState::Idle => {}
        }
        let engine = self.engine.take().ok_or(GeneratorError::AlreadyStopped)?;
        let interval = self.config.tick_interval;
        let (stop_tx, stop_rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name("sensor-sampler".into())
            .spawn(move || run_loop(engine, interval, stop_rx));
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.state = GeneratorState::Stopped;
                return Err(GeneratorError::Spawn(e));
            }
        };

        self.worker = Some(Worker { stop_tx, handle });
        self.state = GeneratorState::Running;
        info!(
            devices = self.catalog.len(),
            interval_ms = interval.as_millis() as u64,
            data_dir = %self.config.data_dir.display(),
            "generator started"
        );
        Ok(())
    }

    /// Signal the loop and wait for the in-flight tick to finish.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // The receiver only disappears if the loop already exited.
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                error!("sampling thread panicked");
            }
            info!("generator stopped");
        }
        self.engine = None;
        self.state = GeneratorState::Stopped;
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        if self.state == GeneratorState::Running {
            self.stop();
        }
    }
}

fn run_loop(mut engine: Engine, interval: Duration, stop_rx: mpsc::Receiver<()>) {
    let mut next = Instant::now();
    loop {
        engine.step(Local::now());

        next += interval;
        let now = Instant::now();
        if next < now {
            warn!(behind_ms = (now - next).as_millis() as u64, "tick overran its interval");
            next = now;
        }
        match stop_rx.recv_timeout(next - now) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
