//! fleetgrid-ledger — memory accounting for the node fleet.
//!
//! The ledger caches each node's total and used memory (read through the
//! execution service) and adds a `reserved` column for capacity that has
//! been promised to a job which has not launched yet.
//!
//! ```text
//! free(node) = total - used - reserved
//!
//! reserve  : free -= cost         (fails without mutation if free < cost)
//! commit   : reserved -> used     (job launched)
//! release  : reserved -> free     (rollback, exactly once)
//! ```
//!
//! Reservations are opened through a [`ReservationSet`], which releases
//! everything it still holds when dropped, so no exit path (early return,
//! error, panic unwind) leaks reserved capacity.

pub mod ledger;
pub mod reservation;

pub use ledger::{CapacityLedger, LedgerSnapshot, NodeLedger, NodeUsage, Reservation, ReservationId};
pub use reservation::ReservationSet;
