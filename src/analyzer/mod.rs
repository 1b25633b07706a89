mod dominator;
mod frontier;
mod node;

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Result};
use lru::LruCache;

use crate::constants::*;
use crate::exclusion::{Exclusion, ExclusionIndex, ExclusionRule, ExclusionStatus};
use crate::heapdump::{
    ClassRecord, HeapParser, HydratedInstance, InstanceRecord, ObjectArrayRecord, ObjectId,
    ObjectIdMetadata, Record, WeakRefMirror,
};

use dominator::DominatorTracker;
use frontier::Frontier;
use node::{LeakNode, NodeArena, NodeRef};

pub use node::{LeakReference, PathElement, ReferenceKind};

/// Search phases reported to the progress listener.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    FindingShortestPaths,
    FindingDominators,
    CalculatingRetainedSize,
}

/// Fire-and-forget phase notifications. Implementations must not call back
/// into the analyzer.
pub trait ProgressListener {
    fn on_progress_update(&mut self, step: Step);
}

pub struct NoopListener;

impl ProgressListener for NoopListener {
    fn on_progress_update(&mut self, _step: Step) {}
}

/// Logs each phase transition.
#[derive(Default)]
pub struct LogListener;

impl ProgressListener for LogListener {
    fn on_progress_update(&mut self, step: Step) {
        info!("Entering phase {:?}", step);
    }
}

/// Shortest retaining path found for one leaking candidate.
#[derive(Clone, Debug)]
pub struct LeakResult {
    /// Root-first path from a GC root to the leaking instance.
    pub path: Vec<PathElement>,
    /// Worst exclusion status on the path; `None` when every edge is
    /// unconditionally reachable.
    pub exclusion_status: Option<ExclusionStatus>,
    pub weak_reference: WeakRefMirror,
    pub retained_heap_size: Option<u64>,
}

impl LeakResult {
    pub fn leaking_instance(&self) -> ObjectId {
        self.path.last().map(|e| e.instance).unwrap_or(NULL_OBJECT_ID)
    }
}

/// Single-threaded retained-path search over a parsed heap snapshot.
///
/// Reusable across calls but not thread-safe: every buffer is cleared on
/// entry and exit of [`PathFinder::find_paths`].
pub struct PathFinder {
    arena: NodeArena,
    frontier: Frontier,
    visited: HashSet<ObjectId>,
    leaking: HashSet<ObjectId>,
    referents: HashMap<ObjectId, WeakRefMirror>,
    dominators: DominatorTracker,
    exclusions: ExclusionIndex,
    merged_field_exclusions: LruCache<ObjectId, Rc<HashMap<String, Exclusion>>>,
    compute_retained: bool,
}

impl Default for PathFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl PathFinder {
    pub fn new() -> PathFinder {
        PathFinder {
            arena: NodeArena::default(),
            frontier: Frontier::default(),
            visited: HashSet::new(),
            leaking: HashSet::new(),
            referents: HashMap::new(),
            dominators: DominatorTracker::default(),
            exclusions: ExclusionIndex::default(),
            merged_field_exclusions: LruCache::new(
                NonZeroUsize::new(EXCLUSION_CACHE_SIZE).unwrap(),
            ),
            compute_retained: false,
        }
    }

    /// Finds, for every weak-reference referent, the retaining path from a GC
    /// root that minimizes the worst exclusion status along the way, and
    /// optionally the retained heap size of each referent.
    ///
    /// Exclusions with `NeverReachable` status remove edges from the search;
    /// other excluded edges are only taken once the frontier holds nothing
    /// better.
    pub fn find_paths<P: HeapParser>(
        &mut self,
        parser: &P,
        exclusions: &[ExclusionRule],
        leaking_weak_refs: &[WeakRefMirror],
        gc_root_ids: &[ObjectId],
        compute_retained_heap_size: bool,
        listener: &mut dyn ProgressListener,
    ) -> Result<Vec<LeakResult>> {
        let start = Instant::now();
        listener.on_progress_update(Step::FindingShortestPaths);
        self.clear_state();
        self.compute_retained = compute_retained_heap_size;
        self.exclusions = ExclusionIndex::build(exclusions);
        for weak_ref in leaking_weak_refs {
            // Cleared references have no object left to find.
            if weak_ref.referent == NULL_OBJECT_ID {
                continue;
            }
            self.leaking.insert(weak_ref.referent);
            self.referents.insert(weak_ref.referent, weak_ref.clone());
        }
        self.dominators.reset(&self.leaking);

        for &root in gc_root_ids {
            if root == NULL_OBJECT_ID {
                continue;
            }
            if compute_retained_heap_size {
                self.dominators.undominate(root);
            }
            self.enqueue(parser, None, root, None, None);
        }
        debug!(
            "Seeded {} roots, watching {} referents",
            gc_root_ids.len(),
            self.referents.len()
        );

        let mut results: Vec<LeakResult> = vec![];
        let mut lowest_priority = ExclusionStatus::AlwaysReachable;
        let mut finding_dominators = false;
        let mut popped: u64 = 0;

        while let Some(head) = self.frontier.pop() {
            lowest_priority = lowest_priority.max(head.status);
            if !self.visited.insert(head.instance) {
                continue;
            }
            popped += 1;

            if let Some(weak_reference) = self.referents.get(&head.instance) {
                let exclusion_status = match head.status {
                    ExclusionStatus::AlwaysReachable => None,
                    status => Some(status),
                };
                results.push(LeakResult {
                    path: self.arena.path(head.node),
                    exclusion_status,
                    weak_reference: weak_reference.clone(),
                    retained_heap_size: None,
                });
            }

            if results.len() == self.referents.len() {
                if compute_retained_heap_size
                    && lowest_priority < ExclusionStatus::WeaklyReachable
                {
                    // Every candidate is located, but children found from here
                    // still tighten dominator chains. Keep visiting until the
                    // frontier degrades past always-reachable.
                    if !finding_dominators {
                        finding_dominators = true;
                        listener.on_progress_update(Step::FindingDominators);
                    }
                } else {
                    break;
                }
            }

            self.visit(parser, head.node, head.instance)?;
        }

        if compute_retained_heap_size {
            listener.on_progress_update(Step::CalculatingRetainedSize);
            self.compute_retained_sizes(parser, &mut results)?;
        }

        info!(
            "Found {} of {} retaining paths, visited {} objects in {} ms",
            results.len(),
            self.referents.len(),
            popped,
            start.elapsed().as_micros() as f64 / 1000f64
        );
        self.clear_state();
        Ok(results)
    }

    fn clear_state(&mut self) {
        self.arena.clear();
        self.frontier.clear();
        self.visited.clear();
        self.leaking.clear();
        self.referents.clear();
        self.dominators.clear();
        self.exclusions = ExclusionIndex::default();
        self.merged_field_exclusions.clear();
        self.compute_retained = false;
    }

    /// Admission control for the frontier. Nulls, visited ids, edges ruled
    /// never-reachable and uninteresting object kinds are absorbed here; a
    /// node is only materialized once all checks pass.
    fn enqueue<P: HeapParser>(
        &mut self,
        parser: &P,
        parent: Option<NodeRef>,
        instance: ObjectId,
        reference: Option<LeakReference>,
        exclusion: Option<Exclusion>,
    ) {
        if instance == NULL_OBJECT_ID {
            return;
        }
        if self.visited.contains(&instance) {
            return;
        }
        if let Some(exclusion) = &exclusion {
            if exclusion.status == ExclusionStatus::NeverReachable {
                return;
            }
        }
        let status = exclusion
            .as_ref()
            .map(|e| e.status)
            .unwrap_or(ExclusionStatus::AlwaysReachable);
        if !self.frontier.accepts(instance, status) {
            return;
        }
        if !self.leaking.contains(&instance) {
            if let Some(metadata) = parser.object_id_metadata(instance) {
                if metadata.skipped_during_search() {
                    return;
                }
            }
        }
        let node = self.arena.alloc(LeakNode {
            instance,
            parent,
            reference,
            exclusion_description: exclusion.map(|e| e.description),
        });
        self.frontier.insert(instance, node, node.visit_order(), status);
    }

    fn visit<P: HeapParser>(&mut self, parser: &P, node: NodeRef, instance: ObjectId) -> Result<()> {
        match parser.retrieve_record_by_id(instance) {
            Some(Record::Class(class)) => self.visit_class(parser, node, &class),
            Some(Record::Instance(record)) => self.visit_instance(parser, node, &record),
            Some(Record::ObjectArray(array)) => self.visit_object_array(parser, node, &array),
            // Primitive arrays and unknown ids carry no outbound references.
            _ => Ok(()),
        }
    }

    fn visit_class<P: HeapParser>(
        &mut self,
        parser: &P,
        node: NodeRef,
        class: &ClassRecord,
    ) -> Result<()> {
        let class_name = parser.class_name(class.id);
        for field in &class.static_fields {
            let Some(child) = field.value.object_ref() else {
                continue;
            };
            if child == NULL_OBJECT_ID {
                continue;
            }
            let field_name = parser
                .hprof_string_by_id(field.name_id)
                .unwrap_or_else(|| format!("field@0x{:x}", field.name_id));
            if field_name == STATIC_OVERHEAD_FIELD {
                continue;
            }
            if self.compute_retained {
                // A static field is an ancestor edge: it precludes dominance
                // by any leaking instance.
                self.dominators.undominate_visited(child);
            }
            let exclusion = class_name
                .as_deref()
                .and_then(|name| self.exclusions.static_field(name, &field_name))
                .cloned();
            let reference = LeakReference {
                kind: ReferenceKind::StaticField,
                name: field_name,
                display_value: format!("0x{:x}", child),
            };
            self.enqueue(parser, Some(node), child, Some(reference), exclusion);
        }
        Ok(())
    }

    fn visit_instance<P: HeapParser>(
        &mut self,
        parser: &P,
        node: NodeRef,
        record: &InstanceRecord,
    ) -> Result<()> {
        let hydrated = parser.hydrate_instance(record)?;
        let merged = self.merged_exclusions_for(record.class_id, &hydrated);
        let mut fields: Vec<(&str, ObjectId)> = vec![];
        for (class_info, values) in hydrated.class_hierarchy.iter().zip(&hydrated.field_values) {
            for (field_name, value) in class_info.field_names.iter().zip(values) {
                if let Some(child) = value.object_ref() {
                    if child != NULL_OBJECT_ID {
                        fields.push((field_name, child));
                    }
                }
            }
        }
        // Deterministic traversal independent of the parser's field order.
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (field_name, child) in fields {
            if self.compute_retained {
                match parser.object_id_metadata(child) {
                    Some(ObjectIdMetadata::Class) => self.dominators.undominate_visited(child),
                    _ => self.dominators.update(record.id, child)?,
                }
            }
            let exclusion = merged.get(field_name).cloned();
            let reference = LeakReference {
                kind: ReferenceKind::InstanceField,
                name: field_name.to_string(),
                display_value: format!("0x{:x}", child),
            };
            self.enqueue(parser, Some(node), child, Some(reference), exclusion);
        }
        Ok(())
    }

    fn visit_object_array<P: HeapParser>(
        &mut self,
        parser: &P,
        node: NodeRef,
        array: &ObjectArrayRecord,
    ) -> Result<()> {
        for (index, &element) in array.element_ids.iter().enumerate() {
            if element == NULL_OBJECT_ID {
                continue;
            }
            if self.compute_retained {
                match parser.object_id_metadata(element) {
                    Some(ObjectIdMetadata::Class) => self.dominators.undominate_visited(element),
                    _ => self.dominators.update(array.id, element)?,
                }
            }
            let reference = LeakReference {
                kind: ReferenceKind::ArrayEntry,
                name: index.to_string(),
                display_value: format!("0x{:x}", element),
            };
            self.enqueue(parser, Some(node), element, Some(reference), None);
        }
        Ok(())
    }

    /// Overlays the instance-field exclusions of every class in the hierarchy,
    /// memoized by the instance's direct class id.
    fn merged_exclusions_for(
        &mut self,
        class_id: ObjectId,
        hydrated: &HydratedInstance,
    ) -> Rc<HashMap<String, Exclusion>> {
        if let Some(merged) = self.merged_field_exclusions.get(&class_id) {
            return Rc::clone(merged);
        }
        let mut merged: HashMap<String, Exclusion> = HashMap::new();
        for class_info in &hydrated.class_hierarchy {
            if let Some(fields) = self.exclusions.instance_fields_of(&class_info.class_name) {
                for (field_name, exclusion) in fields {
                    merged.insert(field_name.clone(), exclusion.clone());
                }
            }
        }
        let merged = Rc::new(merged);
        self.merged_field_exclusions.put(class_id, Rc::clone(&merged));
        merged
    }

    fn compute_retained_sizes<P: HeapParser>(
        &mut self,
        parser: &P,
        results: &mut [LeakResult],
    ) -> Result<()> {
        let mut retained: HashMap<ObjectId, u64> = HashMap::new();
        for (instance, dominator) in self.dominators.dominated() {
            *retained.entry(dominator).or_default() += Self::shallow_size(parser, instance)?;
        }
        for result in results.iter_mut() {
            let leaking = result.leaking_instance();
            *retained.entry(leaking).or_default() += Self::shallow_size(parser, leaking)?;
            result.retained_heap_size = retained.get(&leaking).copied();
        }
        Ok(())
    }

    fn shallow_size<P: HeapParser>(parser: &P, instance: ObjectId) -> Result<u64> {
        match parser.retrieve_record_by_id(instance) {
            Some(Record::Instance(record)) => {
                match parser.retrieve_record_by_id(record.class_id) {
                    Some(Record::Class(class)) => Ok(class.instance_size),
                    _ => bail!(
                        "instance 0x{:x} has no class dump for class 0x{:x}",
                        instance,
                        record.class_id
                    ),
                }
            }
            Some(Record::ObjectArray(array)) => {
                Ok((array.element_ids.len() * parser.id_size()) as u64)
            }
            Some(Record::PrimitiveArray(array)) => Ok((array.length * array.kind.width()) as u64),
            Some(Record::Class(_)) => bail!(
                "class dump 0x{:x} unexpected during retained size accounting",
                instance
            ),
            None => bail!("missing record for 0x{:x} during retained size accounting", instance),
        }
    }
}
