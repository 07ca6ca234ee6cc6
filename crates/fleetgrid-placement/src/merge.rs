//! Launch merging.
//!
//! Several planning calls in one tick can put the same job on the same
//! node (say harden for one target placed twice because demand was
//! recomputed). Those placements become a single process with the summed
//! thread count, which keeps the process table small.

use std::collections::HashMap;

use fleet_core::{JobKey, JobTemplate, NodeId};
use fleetgrid_ledger::ReservationId;

use crate::planner::Placement;

/// One process to launch: a merged template plus every reservation behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub node: NodeId,
    pub template: JobTemplate,
    pub reservations: Vec<ReservationId>,
}

/// Merge placements sharing `(node, kind, target, args)`, keeping first-seen order.
pub fn merge_placements(placements: impl IntoIterator<Item = Placement>) -> Vec<LaunchRequest> {
    let mut index: HashMap<(NodeId, JobKey), usize> = HashMap::new();
    let mut merged: Vec<LaunchRequest> = Vec::new();

    for placement in placements {
        let key = (placement.node.clone(), placement.template.key());
        match index.get(&key) {
            Some(&i) => {
                let request = &mut merged[i];
                request.template.threads += placement.template.threads;
                request.reservations.push(placement.reservation);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(LaunchRequest {
                    node: placement.node,
                    template: placement.template,
                    reservations: vec![placement.reservation],
                });
            }
        }
    }

    merged
}
