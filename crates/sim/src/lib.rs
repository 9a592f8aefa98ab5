use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct SensorTypeConfig {
    pub name: String,
    pub base_value: f64,
    pub unit: String,
    pub normal_range: (f64, f64),
    /// Must fully contain `normal_range`.
    pub warning_range: (f64, f64),
    /// Standard deviation of the Gaussian noise.
    pub variance: f64,
    pub trend_amplitude: f64,
    /// Trend period in seconds.
    pub trend_period: f64,
}

impl SensorTypeConfig {
    pub fn validate(&self) -> Result<(), String> {
        let (n_lo, n_hi) = self.normal_range;
        let (w_lo, w_hi) = self.warning_range;
        if !(w_lo <= n_lo && n_lo <= n_hi && n_hi <= w_hi) {
            return Err(format!(
                "{}: warning range {:?} must contain normal range {:?}",
                self.name, self.warning_range, self.normal_range
            ));
        }
        let negative = |v: f64| v.is_nan() || v < 0.0;
        if negative(self.variance) || negative(self.trend_amplitude) {
            return Err(format!("{}: variance and trend amplitude must be >= 0", self.name));
        }
        if self.trend_period.is_nan() || self.trend_period <= 0.0 {
            return Err(format!("{}: trend period must be > 0", self.name));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn builtin(
    name: &str,
    base_value: f64,
    unit: &str,
    normal_range: (f64, f64),
    warning_range: (f64, f64),
    variance: f64,
    trend_amplitude: f64,
    trend_period: f64,
) -> SensorTypeConfig {
    SensorTypeConfig {
        name: name.to_string(),
        base_value,
        unit: unit.to_string(),
        normal_range,
        warning_range,
        variance,
        trend_amplitude,
        trend_period,
    }
}

/// The six sensor categories of the demo fleet.
pub fn builtin_types() -> Vec<SensorTypeConfig> {
    vec![
        builtin("temperature", 22.0, "°C", (15.0, 30.0), (10.0, 35.0), 0.5, 5.0, 3600.0),
        builtin("humidity", 45.0, "%", (30.0, 60.0), (20.0, 70.0), 2.0, 15.0, 7200.0),
        builtin("pressure", 101.3, "kPa", (99.0, 103.0), (98.0, 104.0), 0.2, 1.0, 10800.0),
        builtin("vibration", 15.0, "Hz", (5.0, 25.0), (2.0, 35.0), 1.0, 3.0, 1800.0),
        builtin("noise", 65.0, "dB", (50.0, 75.0), (45.0, 85.0), 2.0, 10.0, 900.0),
        builtin("power", 2.5, "kWh", (1.0, 4.0), (0.5, 5.0), 0.3, 1.5, 3600.0),
    ]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// `<type>_<NN>`, numbered from 01.
    pub device_id: String,
    pub sensor_type: String,
    type_idx: usize,
}

/// Fixed registry of sensor types and the devices built from them.
#[derive(Clone, Debug)]
pub struct SensorCatalog {
    types: Vec<SensorTypeConfig>,
    devices: Vec<Device>,
}

impl SensorCatalog {
    pub fn new(types: Vec<SensorTypeConfig>, devices_per_type: usize) -> Self {
        let mut devices = Vec::with_capacity(types.len() * devices_per_type);
        for (type_idx, t) in types.iter().enumerate() {
            for i in 1..=devices_per_type {
                devices.push(Device {
                    device_id: format!("{}_{:02}", t.name, i),
                    sensor_type: t.name.clone(),
                    type_idx,
                });
            }
        }
        Self { types, devices }
    }

    pub fn builtin(devices_per_type: usize) -> Self {
        Self::new(builtin_types(), devices_per_type)
    }

    pub fn types(&self) -> &[SensorTypeConfig] {
        &self.types
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn sensor_type(&self, name: &str) -> Option<&SensorTypeConfig> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn config_of(&self, device: &Device) -> &SensorTypeConfig {
        &self.types[device.type_idx]
    }

    /// Devices paired with their type parameters, in catalog order.
    pub fn entries(&self) -> impl Iterator<Item = (&Device, &SensorTypeConfig)> + '_ {
        self.devices.iter().map(move |d| (d, &self.types[d.type_idx]))
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Trend + Gaussian noise + rare spike.
#[derive(Clone, Debug)]
pub struct SignalModel {
    anomaly_probability: f64,
    rng: StdRng,
}

impl SignalModel {
    pub const DEFAULT_ANOMALY_PROBABILITY: f64 = 0.01;

    pub fn new(anomaly_probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let anomaly_probability = if anomaly_probability.is_nan() {
            0.0
        } else {
            anomaly_probability.clamp(0.0, 1.0)
        };
        Self { anomaly_probability, rng }
    }

    pub fn anomaly_probability(&self) -> f64 {
        self.anomaly_probability
    }

    pub fn trend(cfg: &SensorTypeConfig, now: f64) -> f64 {
        if cfg.trend_period <= 0.0 {
            return 0.0;
        }
        cfg.trend_amplitude * (2.0 * PI * now / cfg.trend_period).sin()
    }

    /// Value for one device at `now` (seconds since epoch), rounded to 2 decimals.
    pub fn synthesize(&mut self, cfg: &SensorTypeConfig, now: f64) -> f64 {
        let mut v = cfg.base_value + Self::trend(cfg, now);

        if cfg.variance > 0.0 {
            if let Ok(normal) = Normal::new(0.0, cfg.variance) {
                v += normal.sample(&mut self.rng);
            }
        }

        if self.rng.gen::<f64>() < self.anomaly_probability {
            let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            let span = cfg.normal_range.1 - cfg.normal_range.0;
            let magnitude = span * self.rng.gen_range(1.2..1.5);
            debug!(sensor_type = %cfg.name, offset = sign * magnitude, "injecting random anomaly");
            v += sign * magnitude;
        }

        round2(v)
    }
}

impl Default for SignalModel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ANOMALY_PROBABILITY, None)
    }
}
