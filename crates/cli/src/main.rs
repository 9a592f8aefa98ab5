use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, TimeDelta};
use clap::{Args, Parser, Subcommand};
use generator::{Generator, GeneratorConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use store::{HistoryReader, SeriesStats};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sensor-fleet",
    version,
    about = "Emulated IoT sensor fleet writing live and historical readings to disk"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Directory holding current_data.json and the daily history files
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the generator for a while
    Run(RunArgs),
    /// Print the latest snapshot, one JSON object per line
    Current,
    /// Print one device's history and summary statistics
    History {
        #[arg(long)]
        device: String,
        #[arg(long, default_value_t = 1)]
        hours: i64,
    },
    /// Print warning and critical readings, newest first
    Alerts {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Delete every daily history file
    ClearHistory,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Seconds between ticks
    #[arg(long, default_value_t = 5.0)]
    interval_secs: f64,

    /// Total run time in seconds
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,

    #[arg(long, default_value_t = 3)]
    devices_per_type: usize,

    #[arg(long, default_value_t = 0.01)]
    anomaly_probability: f64,

    /// History window kept per daily log
    #[arg(long, default_value_t = 24)]
    retention_hours: u64,

    /// RNG seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Manual anomaly as DEVICE=VALUE:SECONDS, e.g. temperature_01=45.0:20
    #[arg(long)]
    inject: Option<Injection>,

    /// Seconds after start before the manual anomaly is injected
    #[arg(long, default_value_t = 15)]
    inject_after: u64,
}

#[derive(Clone, Debug)]
struct Injection {
    device_id: String,
    value: f64,
    duration: Duration,
}

impl FromStr for Injection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (device_id, rest) = s.split_once('=').context("expected DEVICE=VALUE:SECONDS")?;
        let (value, secs) = rest.split_once(':').context("expected DEVICE=VALUE:SECONDS")?;
        if device_id.is_empty() {
            bail!("empty device id");
        }
        let value: f64 = value.parse().context("invalid anomaly value")?;
        if !value.is_finite() {
            bail!("anomaly value must be finite, got {value}");
        }
        Ok(Self {
            device_id: device_id.to_string(),
            value,
            duration: Duration::from_secs(secs.parse().context("invalid anomaly duration")?),
        })
    }
}

/// Start of a look-back window of `hours` ending at `now`.
fn window_start(now: DateTime<Local>, hours: i64) -> Result<DateTime<Local>> {
    if hours < 0 {
        bail!("--hours must not be negative");
    }
    TimeDelta::try_hours(hours)
        .and_then(|span| now.checked_sub_signed(span))
        .with_context(|| format!("--hours {hours} is out of range"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Run(args) => run(cli.data_dir, args),
        Command::Current => {
            for r in HistoryReader::new(cli.data_dir).current() {
                println!("{}", serde_json::to_string(&r)?);
            }
            Ok(())
        }
        Command::History { device, hours } => {
            let now = Local::now();
            let reader = HistoryReader::new(cli.data_dir);
            let records = reader.device_history(&device, window_start(now, hours)?, now);
            for r in &records {
                println!("{}", serde_json::to_string(r)?);
            }
            match SeriesStats::from_readings(&records) {
                Some(s) => eprintln!(
                    "{device}: n={} mean={:.2} min={:.2} max={:.2} std={:.2} \
                     warnings={} critical={}",
                    s.count, s.mean, s.min, s.max, s.std_dev, s.warnings, s.criticals
                ),
                None => eprintln!("{device}: no readings in the last {hours}h"),
            }
            Ok(())
        }
        Command::Alerts { hours } => {
            let now = Local::now();
            let alerts = HistoryReader::new(cli.data_dir).alerts(window_start(now, hours)?, now);
            for r in &alerts {
                println!("{}", serde_json::to_string(r)?);
            }
            Ok(())
        }
        Command::ClearHistory => {
            let removed = HistoryReader::new(cli.data_dir).clear_history()?;
            println!("removed {removed} history file(s)");
            Ok(())
        }
    }
}

fn run(data_dir: PathBuf, args: RunArgs) -> Result<()> {
    if args.interval_secs <= 0.0 {
        bail!("--interval-secs must be positive");
    }
    let tick_interval = Duration::try_from_secs_f64(args.interval_secs)
        .context("--interval-secs is not a representable duration")?;
    let retention_secs = args
        .retention_hours
        .checked_mul(60 * 60)
        .context("--retention-hours is out of range")?;
    let config = GeneratorConfig {
        data_dir,
        tick_interval,
        devices_per_type: args.devices_per_type,
        anomaly_probability: args.anomaly_probability,
        retention: Duration::from_secs(retention_secs),
        seed: args.seed,
        ..Default::default()
    };

    let mut sampler = Generator::new(config).context("failed to set up generator")?;
    sampler.start()?;

    let total = Duration::from_secs(args.duration_secs);
    let mut elapsed = Duration::ZERO;
    if let Some(inj) = &args.inject {
        let delay = Duration::from_secs(args.inject_after).min(total);
        thread::sleep(delay);
        elapsed = delay;
        sampler.inject_anomaly(&inj.device_id, inj.value, inj.duration)?;
    }
    thread::sleep(total.saturating_sub(elapsed));

    sampler.stop();
    info!(data_dir = %sampler.config().data_dir.display(), "run finished");
    Ok(())
}
