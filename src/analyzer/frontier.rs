use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use super::node::NodeRef;
use crate::exclusion::ExclusionStatus;
use crate::heapdump::ObjectId;

struct QueueEntry {
    status: ExclusionStatus,
    visit_order: u64,
    instance: ObjectId,
    node: NodeRef,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.status
            .cmp(&other.status)
            .then(self.visit_order.cmp(&other.visit_order))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

pub(crate) struct Popped {
    pub node: NodeRef,
    pub instance: ObjectId,
    pub status: ExclusionStatus,
}

/// Priority-ordered, deduplicated search frontier keyed by object id.
///
/// Pop order is best (lowest) status first, earliest enqueue within a status.
/// The result is a strict BFS over always-reachable edges, then a BFS over
/// paths with at least one weakly-reachable step, and so on.
///
/// `statuses` is the authoritative id-to-priority map. The heap may hold
/// entries superseded by a better enqueue of the same id; those are filtered
/// lazily on pop, so there is no decrease-key operation to pay for.
#[derive(Default)]
pub(crate) struct Frontier {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    statuses: HashMap<ObjectId, ExclusionStatus>,
}

impl Frontier {
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Whether an enqueue of `instance` at `status` would improve on the
    /// frontier's current entry for that id.
    pub fn accepts(&self, instance: ObjectId, status: ExclusionStatus) -> bool {
        !matches!(self.statuses.get(&instance), Some(&current) if current <= status)
    }

    pub fn insert(
        &mut self,
        instance: ObjectId,
        node: NodeRef,
        visit_order: u64,
        status: ExclusionStatus,
    ) {
        debug_assert!(self.accepts(instance, status));
        self.statuses.insert(instance, status);
        self.heap.push(Reverse(QueueEntry {
            status,
            visit_order,
            instance,
            node,
        }));
    }

    /// Pops the best entry and drops its id from the priority map.
    pub fn pop(&mut self) -> Option<Popped> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            match self.statuses.get(&entry.instance) {
                Some(&status) if status == entry.status => {
                    self.statuses.remove(&entry.instance);
                    return Some(Popped {
                        node: entry.node,
                        instance: entry.instance,
                        status: entry.status,
                    });
                }
                // Superseded by a better enqueue of the same id, or the id
                // was already popped through its live entry.
                _ => continue,
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.statuses.clear();
    }
}
