//! Workspace root crate.
//!
//! This crate re-exports the main building blocks so integration tests can
//! depend on a single crate.

pub use generator::{
    Engine, Generator, GeneratorConfig, GeneratorError, GeneratorState, ManualAnomaly,
    ManualAnomalyTracker,
};
pub use sim::*;
pub use status::*;
pub use store::{
    epoch_seconds, history_file_name, retention_cap, HistoryReader, SensorReading, SeriesStats,
    Store, StoreError, SNAPSHOT_FILE,
};
