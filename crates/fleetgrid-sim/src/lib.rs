//! fleetgrid-sim — a deterministic in-memory fleet.
//!
//! `SimFleet` implements every collaborator trait from `fleet-core`
//! (execution, topology, telemetry, clock) over one mutex-guarded state.
//! Time only moves when [`SimFleet::advance`] is called; jobs whose
//! finish time has passed apply their effect to the target in finish
//! order and free their node memory.
//!
//! ```text
//! harden   security -= 0.05 * threads          (never below floor)
//! grow     funds    *= (1 + rate) ^ threads    (never above max)
//!          security += 0.004 * threads
//! extract  funds    -= funds * fraction * threads
//!          security += 0.002 * threads
//! ```
//!
//! Durations scale with the target's security at launch time. A second
//! launch argument is read as a start delay in milliseconds.

pub mod fleet;
pub mod model;
mod services;

pub use fleet::{Completion, SimFleet, SimFleetBuilder};
pub use model::{SimNode, SimTarget};
