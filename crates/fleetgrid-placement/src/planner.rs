//! Greedy thread packing.
//!
//! Nodes are visited by descending *total* capacity, so work consolidates
//! on the big nodes and small nodes stay untouched. Each node takes
//! `min(free / cost, remaining, budget_left / cost)` threads through its
//! own ledger reservation.

use tracing::{debug, warn};

use fleet_core::{JobTemplate, Memory, NodeId};
use fleetgrid_ledger::{ReservationId, ReservationSet};

use crate::error::{PlacementError, PlacementResult};

/// A template bound to a node with its reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub node: NodeId,
    pub template: JobTemplate,
    pub reservation: ReservationId,
    pub memory: Memory,
}

/// Result of planning one template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    pub placements: Vec<Placement>,
    /// Requested threads that could not be placed.
    pub shortfall: u32,
}

impl PlanOutcome {
    pub fn placed_threads(&self) -> u32 {
        self.placements.iter().map(|p| p.template.threads).sum()
    }
}

/// Place up to `requested` threads of `template`.
///
/// `budget` caps the memory held by the whole reservation set, not just
/// this call. An exhausted budget yields zero placements and a full
/// shortfall, without touching the ledger.
pub fn plan_up_to_threads(
    set: &mut ReservationSet<'_>,
    template: &JobTemplate,
    requested: u32,
    budget: Memory,
) -> PlacementResult<PlanOutcome> {
    let cost = set
        .ledger()
        .thread_cost(template.kind)
        .ok_or(PlacementError::UnknownCost(template.kind))?;
    if cost == 0 {
        return Err(PlacementError::ZeroCost(template.kind));
    }

    let mut remaining = requested;
    let mut placements = Vec::new();

    let candidates: Vec<(NodeId, Memory)> = set
        .ledger()
        .nodes_by_capacity()
        .into_iter()
        .map(|n| (n.id.clone(), n.free()))
        .collect();

    for (node, free) in candidates {
        if remaining == 0 {
            break;
        }

        let budget_left = budget.saturating_sub(set.reserved_memory());
        let by_budget = budget_left / cost;
        if by_budget == 0 {
            debug!(kind = %template.kind, target = %template.target, "plan budget exhausted");
            break;
        }

        let can_run = free / cost;
        let threads = can_run.min(by_budget).min(Memory::from(remaining)) as u32;
        if threads == 0 {
            continue;
        }

        let bound = template.clone().with_threads(threads);
        let Some(reservation) = set.reserve(&node, &bound) else {
            continue;
        };

        debug!(
            node = %node,
            kind = %template.kind,
            target = %template.target,
            threads,
            "placed threads"
        );
        placements.push(Placement {
            node,
            template: bound,
            reservation,
            memory: cost * Memory::from(threads),
        });
        remaining -= threads;
    }

    if remaining > 0 && requested > 0 {
        debug!(
            kind = %template.kind,
            target = %template.target,
            requested,
            shortfall = remaining,
            "could not place all threads"
        );
    }
    if placements.is_empty() && requested > 0 && set.ledger().nodes_by_capacity().is_empty() {
        warn!("no eligible nodes in the ledger");
    }

    Ok(PlanOutcome {
        placements,
        shortfall: remaining,
    })
}
