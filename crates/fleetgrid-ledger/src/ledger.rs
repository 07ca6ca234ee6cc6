//! Capacity ledger — total / used / reserved memory per node.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fleet_core::config::{ProgramsConfig, TopologyConfig};
use fleet_core::{
    ExecutionService, JobKind, JobTemplate, Memory, Node, NodeId, ServiceResult, TopologyService,
};

/// Handle for a single outstanding reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReservationId(u64);

/// Memory promised to a template on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub node: NodeId,
    pub template: JobTemplate,
    pub memory: Memory,
}

/// Cached accounting row for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLedger {
    pub id: NodeId,
    pub total: Memory,
    pub used: Memory,
    pub reserved: Memory,
}

impl NodeLedger {
    pub fn free(&self) -> Memory {
        self.total
            .saturating_sub(self.used)
            .saturating_sub(self.reserved)
    }
}

/// Per-node row in a [`LedgerSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub node: NodeId,
    pub total: Memory,
    pub used: Memory,
    pub reserved: Memory,
    pub free: Memory,
}

/// Read-only view of the ledger for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub total: Memory,
    pub used: Memory,
    pub reserved: Memory,
    pub outstanding_reservations: usize,
    pub nodes: Vec<NodeUsage>,
}

/// Bookkeeping of reservable memory across the fleet.
///
/// One ledger is shared by every controller; callers serialize planning
/// passes around it (see `fleetgrid-controller`).
#[derive(Debug, Default)]
pub struct CapacityLedger {
    nodes: BTreeMap<NodeId, NodeLedger>,
    thread_costs: HashMap<JobKind, Memory>,
    reservations: HashMap<ReservationId, Reservation>,
    next_id: u64,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a node's capacity, keeping its reservations.
    pub fn upsert_node(&mut self, node: Node) {
        let entry = self
            .nodes
            .entry(node.id.clone())
            .or_insert_with(|| NodeLedger {
                id: node.id.clone(),
                total: 0,
                used: 0,
                reserved: 0,
            });
        entry.total = node.total_memory;
        entry.used = node.used_memory;
    }

    pub fn set_thread_cost(&mut self, kind: JobKind, cost: Memory) {
        self.thread_costs.insert(kind, cost);
    }

    pub fn thread_cost(&self, kind: JobKind) -> Option<Memory> {
        self.thread_costs.get(&kind).copied()
    }

    /// `thread_cost(kind) * threads`.
    pub fn memory_cost(&self, template: &JobTemplate) -> Option<Memory> {
        self.thread_cost(template.kind)
            .map(|cost| cost * Memory::from(template.threads))
    }

    /// Re-read eligible nodes and per-thread costs from the collaborators.
    ///
    /// Nodes that left the reachable set are dropped unless they still
    /// hold reservations. Returns the number of eligible nodes.
    pub fn refresh(
        &mut self,
        exec: &dyn ExecutionService,
        topology: &dyn TopologyService,
        programs: &ProgramsConfig,
        config: &TopologyConfig,
    ) -> ServiceResult<usize> {
        let excluded: Vec<NodeId> = if config.exclude_root {
            vec![config.root.clone()]
        } else {
            Vec::new()
        };

        let mut seen = Vec::new();
        for id in topology.list_reachable_nodes(&config.root, &excluded)? {
            if !topology.has_execution_rights(&id)? {
                continue;
            }
            let node = exec.node(&id)?;
            self.upsert_node(node);
            seen.push(id);
        }

        self.nodes
            .retain(|id, entry| entry.reserved > 0 || seen.contains(id));

        for kind in JobKind::ALL {
            let cost = exec.memory_cost_per_thread(programs.program(kind))?;
            self.set_thread_cost(kind, cost);
        }

        debug!(nodes = seen.len(), "ledger refreshed");
        Ok(seen.len())
    }

    pub fn node(&self, id: &str) -> Option<&NodeLedger> {
        self.nodes.get(id)
    }

    /// Free memory on a node, net of reservations. Unknown nodes have none.
    pub fn free_capacity(&self, id: &str) -> Memory {
        self.nodes.get(id).map_or(0, NodeLedger::free)
    }

    pub fn total_capacity(&self) -> Memory {
        self.nodes.values().map(|n| n.total).sum()
    }

    pub fn total_used(&self) -> Memory {
        self.nodes.values().map(|n| n.used).sum()
    }

    pub fn total_reserved(&self) -> Memory {
        self.nodes.values().map(|n| n.reserved).sum()
    }

    pub fn outstanding(&self) -> usize {
        self.reservations.len()
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    /// Nodes ordered by descending total capacity, ties by id.
    pub fn nodes_by_capacity(&self) -> Vec<&NodeLedger> {
        let mut nodes: Vec<&NodeLedger> = self.nodes.values().collect();
        nodes.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.id.cmp(&b.id)));
        nodes
    }

    /// Reserve memory for `template` on `node`.
    ///
    /// Fails without mutating anything if the node is unknown, the kind has
    /// no known cost, or free capacity is below the template's cost.
    pub fn reserve(&mut self, node: &str, template: &JobTemplate) -> Option<ReservationId> {
        let memory = self.memory_cost(template)?;
        let entry = self.nodes.get_mut(node)?;
        if entry.free() < memory {
            return None;
        }
        entry.reserved += memory;

        let id = ReservationId(self.next_id);
        self.next_id += 1;
        self.reservations.insert(
            id,
            Reservation {
                id,
                node: node.to_string(),
                template: template.clone(),
                memory,
            },
        );
        debug!(
            node,
            kind = %template.kind,
            threads = template.threads,
            memory,
            "reserved"
        );
        Some(id)
    }

    /// Give reserved memory back. Releasing twice is a no-op returning `false`.
    pub fn release(&mut self, id: ReservationId) -> bool {
        let Some(reservation) = self.reservations.remove(&id) else {
            warn!(?id, "release of unknown or already released reservation");
            return false;
        };
        self.unreserve(&reservation);
        true
    }

    /// Move a reservation into the node's used memory once its job launched.
    ///
    /// # Panics
    ///
    /// Panics if the reservation was already committed or released.
    pub fn commit(&mut self, id: ReservationId) -> Reservation {
        let reservation = self
            .reservations
            .remove(&id)
            .unwrap_or_else(|| panic!("commit of unknown reservation {id:?}"));
        self.unreserve(&reservation);
        if let Some(entry) = self.nodes.get_mut(&reservation.node) {
            entry.used += reservation.memory;
        }
        reservation
    }

    /// Account for a terminated job until the next refresh re-reads usage.
    pub fn note_terminated(&mut self, node: &str, memory: Memory) {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.used = entry.used.saturating_sub(memory);
        }
    }

    /// `used + reserved <= total` on every node that holds reservations.
    pub fn is_consistent(&self) -> bool {
        self.nodes
            .values()
            .filter(|n| n.reserved > 0)
            .all(|n| n.used + n.reserved <= n.total)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            total: self.total_capacity(),
            used: self.total_used(),
            reserved: self.total_reserved(),
            outstanding_reservations: self.reservations.len(),
            nodes: self
                .nodes_by_capacity()
                .into_iter()
                .map(|n| NodeUsage {
                    node: n.id.clone(),
                    total: n.total,
                    used: n.used,
                    reserved: n.reserved,
                    free: n.free(),
                })
                .collect(),
        }
    }

    fn unreserve(&mut self, reservation: &Reservation) {
        let entry = self
            .nodes
            .get_mut(&reservation.node)
            .unwrap_or_else(|| panic!("reservation on untracked node {}", reservation.node));
        assert!(
            entry.reserved >= reservation.memory,
            "node {} would go below zero reserved memory",
            reservation.node
        );
        entry.reserved -= reservation.memory;
    }
}
