//! fleet-core — shared types for the FleetGrid allocation engine.
//!
//! Holds the value types every other crate speaks (`JobTemplate`,
//! `JobHandle`, `TargetState`, `Node`), the `fleet.toml` config parser,
//! and the traits behind which the execution, topology, and telemetry
//! collaborators live.

pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use config::{ConfigError, FleetConfig};
pub use error::{ServiceError, ServiceResult};
pub use service::{
    Clock, ExecutionService, ProcessInfo, SystemClock, TelemetryService, TopologyService,
};
pub use types::*;
