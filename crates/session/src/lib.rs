//! Live GT7 lap session: turns the console's telemetry stream into laps and
//! serves lap analysis to the dashboard.
//!
//! [`Engine`] owns the UDP transport and runs the acquisition loop on a
//! tokio task. Everything the dashboard reads goes through [`EngineHandle`],
//! which hands out immutable [`LapView`]s.

pub mod config;
pub mod engine;
pub mod history;
pub mod segmenter;
pub mod view;

pub use config::{ConfigError, EngineConfig, SegmenterConfig, ValidityPolicy};
pub use engine::{Engine, EngineHandle, IngestCounters, LoopTiming, StartError};
pub use history::LapHistory;
pub use segmenter::{SegmentOutcome, Segmenter};
pub use view::{LapSelection, LapView, QueryError};
