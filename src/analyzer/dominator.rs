use std::collections::{HashMap, HashSet};

use anyhow::{ensure, Result};
use smallvec::SmallVec;

use crate::heapdump::ObjectId;

/// Streaming approximation of the dominator relation restricted to leaking
/// candidates.
///
/// Each tracked id maps to its nearest leaking ancestor observed so far, or
/// sits in the undominated set once a path from outside every leaking subtree
/// has been seen. Ambiguity always resolves toward undominated, so retained
/// sizes computed from this map are lower bounds.
#[derive(Default)]
pub(crate) struct DominatorTracker {
    leaking: HashSet<ObjectId>,
    dominated: HashMap<ObjectId, ObjectId>,
    undominated: HashSet<ObjectId>,
}

impl DominatorTracker {
    pub fn reset(&mut self, leaking: &HashSet<ObjectId>) {
        self.clear();
        self.leaking.extend(leaking);
    }

    pub fn clear(&mut self) {
        self.leaking.clear();
        self.dominated.clear();
        self.undominated.clear();
    }

    /// `id` is reachable from outside every leaking subtree.
    pub fn undominate(&mut self, id: ObjectId) {
        self.dominated.remove(&id);
        self.undominated.insert(id);
    }

    /// Like [`DominatorTracker::undominate`], except leaking candidates stay
    /// dominators of their own subtrees.
    pub fn undominate_visited(&mut self, id: ObjectId) {
        if !self.leaking.contains(&id) {
            self.undominate(id);
        }
    }

    /// Accounts for an observed edge from a visited `parent` to `child`.
    ///
    /// Errors indicate an internal invariant violation: a non-leaking parent
    /// must be either dominated or undominated by the time its edges are
    /// walked.
    pub fn update(&mut self, parent: ObjectId, child: ObjectId) -> Result<()> {
        if parent == child || self.undominated.contains(&child) {
            return Ok(());
        }
        let next = if self.leaking.contains(&parent) {
            Some(parent)
        } else {
            self.dominated.get(&parent).copied()
        };
        let Some(next) = next else {
            ensure!(
                self.undominated.contains(&parent),
                "edge 0x{:x} -> 0x{:x}: parent is neither dominated nor undominated",
                parent,
                child
            );
            self.drop_from_domination(child);
            return Ok(());
        };
        match self.dominated.get(&child).copied() {
            None => {
                self.dominated.insert(child, next);
            }
            Some(current) => {
                // Two dominator chains reach the child; keep the nearest
                // ancestor they share, if any.
                let current_chain = self.ancestor_chain(current);
                let shared = self
                    .ancestor_chain(next)
                    .into_iter()
                    .find(|id| current_chain.contains(id));
                match shared {
                    Some(shared) => {
                        self.dominated.insert(child, shared);
                    }
                    None => self.drop_from_domination(child),
                }
            }
        }
        debug_assert!(!(self.dominated.contains_key(&child) && self.undominated.contains(&child)));
        Ok(())
    }

    fn drop_from_domination(&mut self, id: ObjectId) {
        self.dominated.remove(&id);
        if !self.leaking.contains(&id) {
            self.undominated.insert(id);
        }
    }

    /// `start` followed by each successively farther leaking ancestor. The
    /// revisit check keeps chains finite when leaking instances retain each
    /// other in a cycle.
    fn ancestor_chain(&self, start: ObjectId) -> SmallVec<[ObjectId; 4]> {
        let mut chain: SmallVec<[ObjectId; 4]> = SmallVec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            cursor = self.dominated.get(&id).copied();
        }
        chain
    }

    pub fn dominated(&self) -> impl Iterator<Item = (ObjectId, ObjectId)> + '_ {
        self.dominated.iter().map(|(&child, &dominator)| (child, dominator))
    }

    #[cfg(test)]
    fn is_disjoint(&self) -> bool {
        self.dominated
            .keys()
            .all(|id| !self.undominated.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const L1: ObjectId = 0x10;
    const L2: ObjectId = 0x11;
    const A: ObjectId = 0x20;
    const B: ObjectId = 0x21;
    const ROOT: ObjectId = 0x30;

    fn tracker() -> DominatorTracker {
        let mut tracker = DominatorTracker::default();
        tracker.reset(&HashSet::from([L1, L2]));
        tracker.undominate(ROOT);
        tracker
    }

    #[test]
    fn leaking_parent_dominates_child() {
        let mut tracker = tracker();
        tracker.update(L1, A).unwrap();
        assert_eq!(tracker.dominated.get(&A), Some(&L1));
        assert!(tracker.is_disjoint());
    }

    #[test]
    fn undominated_parent_undominates_child() {
        let mut tracker = tracker();
        tracker.update(L1, A).unwrap();
        tracker.update(ROOT, A).unwrap();
        assert!(tracker.undominated.contains(&A));
        assert!(!tracker.dominated.contains_key(&A));
        assert!(tracker.is_disjoint());
    }

    #[test]
    fn undominated_wins_regardless_of_order() {
        let mut tracker = tracker();
        tracker.update(ROOT, A).unwrap();
        tracker.update(L1, A).unwrap();
        assert!(tracker.undominated.contains(&A));
        assert!(!tracker.dominated.contains_key(&A));
    }

    #[test]
    fn disagreeing_chains_without_shared_ancestor_undominate() {
        let mut tracker = tracker();
        tracker.update(L1, A).unwrap();
        tracker.update(L2, A).unwrap();
        assert!(tracker.undominated.contains(&A));
        assert!(tracker.is_disjoint());
    }

    #[test]
    fn disagreeing_chains_merge_at_the_shared_ancestor() {
        let mut tracker = tracker();
        // L1 retains L2; two paths to B disagree between L2 and L1.
        tracker.update(L1, L2).unwrap();
        tracker.update(L2, B).unwrap();
        tracker.update(L1, B).unwrap();
        assert_eq!(tracker.dominated.get(&B), Some(&L1));
        assert!(tracker.is_disjoint());
    }

    #[test]
    fn leaking_child_is_never_marked_undominated_by_an_edge() {
        let mut tracker = tracker();
        tracker.update(ROOT, L1).unwrap();
        assert!(!tracker.undominated.contains(&L1));
        assert!(!tracker.dominated.contains_key(&L1));
    }

    #[test]
    fn unknown_parent_is_an_invariant_violation() {
        let mut tracker = tracker();
        assert!(tracker.update(B, A).is_err());
    }

    #[test]
    fn cyclic_leaking_chains_terminate() {
        let mut tracker = tracker();
        tracker.update(L1, L2).unwrap();
        tracker.update(L2, L1).unwrap();
        // Both chains now loop; a merge over them must still terminate.
        tracker.update(L1, A).unwrap();
        tracker.update(L2, A).unwrap();
        assert!(tracker.dominated.contains_key(&A) || tracker.undominated.contains(&A));
    }
}
