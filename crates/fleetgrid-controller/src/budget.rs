//! Memory gate.

use fleet_core::Memory;
use fleetgrid_ledger::CapacityLedger;

/// `fraction * total`, rounded down.
pub fn allowed_memory(ledger: &CapacityLedger, fraction: f64) -> Memory {
    (ledger.total_capacity() as f64 * fraction.clamp(0.0, 1.0)).floor() as Memory
}

/// Budget left for one planning pass, or `None` when used + reserved
/// already meets the allowed share and allocation must be skipped.
pub fn pass_budget(ledger: &CapacityLedger, fraction: f64) -> Option<Memory> {
    let allowed = allowed_memory(ledger, fraction);
    let occupied = ledger.total_used() + ledger.total_reserved();
    if occupied >= allowed {
        None
    } else {
        Some(allowed - occupied)
    }
}
