//! Scoped reservation set — one planning pass worth of reservations.

use tracing::debug;

use fleet_core::{JobTemplate, Memory};

use crate::ledger::{CapacityLedger, Reservation, ReservationId};

/// Reservations opened during one planning pass.
///
/// Holds the ledger mutably for the whole pass, so passes cannot
/// interleave. Whatever has not been committed or released when the set
/// is dropped is released.
pub struct ReservationSet<'a> {
    ledger: &'a mut CapacityLedger,
    held: Vec<ReservationId>,
    held_memory: Memory,
}

impl<'a> ReservationSet<'a> {
    pub fn new(ledger: &'a mut CapacityLedger) -> Self {
        Self {
            ledger,
            held: Vec::new(),
            held_memory: 0,
        }
    }

    pub fn ledger(&self) -> &CapacityLedger {
        self.ledger
    }

    /// Mutable access for bookkeeping outside the pass (terminations).
    pub fn ledger_mut(&mut self) -> &mut CapacityLedger {
        self.ledger
    }

    /// Memory reserved by this set and not yet committed or released.
    pub fn reserved_memory(&self) -> Memory {
        self.held_memory
    }

    pub fn held(&self) -> &[ReservationId] {
        &self.held
    }

    pub fn reserve(&mut self, node: &str, template: &JobTemplate) -> Option<ReservationId> {
        let id = self.ledger.reserve(node, template)?;
        if let Some(r) = self.ledger.reservation(id) {
            self.held_memory += r.memory;
        }
        self.held.push(id);
        Some(id)
    }

    pub fn release(&mut self, id: ReservationId) -> bool {
        if !self.forget(id) {
            return false;
        }
        self.ledger.release(id)
    }

    /// # Panics
    ///
    /// Panics if `id` is not held by this set.
    pub fn commit(&mut self, id: ReservationId) -> Reservation {
        assert!(self.forget(id), "commit of reservation {id:?} not held by this set");
        self.ledger.commit(id)
    }

    /// Release everything still held. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let ids: Vec<ReservationId> = self.held.drain(..).collect();
        self.held_memory = 0;
        ids.into_iter().filter(|id| self.ledger.release(*id)).count()
    }

    fn forget(&mut self, id: ReservationId) -> bool {
        let Some(pos) = self.held.iter().position(|h| *h == id) else {
            return false;
        };
        self.held.swap_remove(pos);
        if let Some(r) = self.ledger.reservation(id) {
            self.held_memory -= r.memory;
        }
        true
    }
}

impl Drop for ReservationSet<'_> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            let released = self.release_all();
            debug!(released, "released leftover reservations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{JobKind, Node};

    fn ledger() -> CapacityLedger {
        let mut ledger = CapacityLedger::new();
        ledger.upsert_node(Node::new("a", 16, 0));
        ledger.set_thread_cost(JobKind::Harden, 4);
        ledger
    }

    fn harden(threads: u32) -> JobTemplate {
        JobTemplate::new(JobKind::Harden, "alpha").with_threads(threads)
    }

    #[test]
    fn drop_releases_uncommitted() {
        let mut ledger = ledger();
        {
            let mut set = ReservationSet::new(&mut ledger);
            set.reserve("a", &harden(2)).unwrap();
            set.reserve("a", &harden(1)).unwrap();
            assert_eq!(set.reserved_memory(), 12);
        }
        assert_eq!(ledger.total_reserved(), 0);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn committed_survive_drop() {
        let mut ledger = ledger();
        {
            let mut set = ReservationSet::new(&mut ledger);
            let id = set.reserve("a", &harden(2)).unwrap();
            set.reserve("a", &harden(1)).unwrap();
            set.commit(id);
            assert_eq!(set.reserved_memory(), 4);
        }
        let node = ledger.node("a").unwrap();
        assert_eq!(node.used, 8);
        assert_eq!(node.reserved, 0);
    }

    #[test]
    fn release_twice_through_set_is_noop() {
        let mut ledger = ledger();
        let mut set = ReservationSet::new(&mut ledger);
        let id = set.reserve("a", &harden(1)).unwrap();
        assert!(set.release(id));
        assert!(!set.release(id));
        assert_eq!(set.reserved_memory(), 0);
    }

    #[test]
    fn release_on_panic_unwind() {
        let mut ledger = ledger();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut set = ReservationSet::new(&mut ledger);
            set.reserve("a", &harden(4)).unwrap();
            panic!("planning blew up");
        }));
        assert!(result.is_err());
        assert_eq!(ledger.total_reserved(), 0);
    }
}
