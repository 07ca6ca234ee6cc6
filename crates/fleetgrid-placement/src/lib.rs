//! fleetgrid-placement — placing job threads onto nodes under a memory budget.
//!
//! # Components
//!
//! - **`planner`** — greedy largest-node-first packing of one template
//! - **`merge`** — folds identical `(node, job)` placements into one launch
//! - **`pass`** — a planning pass: budget, accumulated placements, rollback
//! - **`executor`** — launches merged requests and commits or releases
//!   their reservations

pub mod error;
pub mod executor;
pub mod merge;
pub mod pass;
pub mod planner;

pub use error::{PlacementError, PlacementResult};
pub use executor::{FailedLaunch, LaunchReport, execute};
pub use merge::{LaunchRequest, merge_placements};
pub use pass::PlanningPass;
pub use planner::{PlanOutcome, Placement, plan_up_to_threads};
