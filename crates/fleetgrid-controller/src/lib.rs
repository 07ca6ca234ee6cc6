//! fleetgrid-controller — per-target convergence and the global loop.
//!
//! A [`ConvergenceController`] owns one target's in-flight jobs and moves
//! the target between `Converging` and `Converged` as telemetry changes.
//! The [`Supervisor`] selects targets, serializes planning over the
//! shared ledger, and publishes a [`FleetSnapshot`] after every tick.
//! In batch mode it instead fires timed three-kind batches at the
//! best-yielding target (see [`batch`]).

pub mod batch;
pub mod budget;
pub mod convergence;
pub mod error;
pub mod inflight;
pub mod services;
pub mod snapshot;
pub mod supervisor;

pub use batch::{BatchTiming, LANDING_OFFSET, plan_batch};
pub use budget::{allowed_memory, pass_budget};
pub use convergence::{Assessment, ConvergenceController, ConvergenceState};
pub use error::{ControllerError, ControllerResult};
pub use inflight::{InFlightSet, KindCounts, adopt};
pub use services::Services;
pub use snapshot::{ControllerSnapshot, FleetSnapshot, LedgerView, TickStats};
pub use supervisor::{SharedLedger, Supervisor};
