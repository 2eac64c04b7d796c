//! Add-child / set-parent operations over a transaction's segment arena.
//!
//! Grounded in `axiom/nr_segment.c`/`nr_segment_private.h` (segment
//! add/end/reparent) and `nr_segment_tree.c` (the bounded heap eviction
//! path, §4.3). Per spec.md §9, the from-C slab+pointer graph becomes a
//! `Vec<Seg>` arena addressed by [`SegmentId`], and per-async-context parent
//! stacks are a `HashMap` keyed on the interned context name.
use crate::heap::MinMaxHeap;
use crate::segment::{Color, Seg, SegChildren, SegPriority, SegmentId};
use crate::string_pool::StringId;
use crate::trace_core_debug;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Owns every segment reachable from a transaction's root, plus the
/// per-async-context stacks of currently-open segments used to resolve
/// implicit parenting (spec.md §4.1).
pub struct SegmentTree {
    arena: Vec<Seg>,
    root: Option<SegmentId>,
    /// One LIFO stack of open segments per async context; `None` is the
    /// default (unnamed) context.
    parent_stacks: HashMap<Option<StringId>, Vec<SegmentId>>,
    max_segments: usize,
    /// Keyed on `(duration, id)` so the comparator never needs to borrow
    /// the arena back while the heap itself is mutably borrowed.
    heap: Option<MinMaxHeap<(u64, SegmentId)>>,
    segment_count: usize,
}

impl SegmentTree {
    pub fn new(max_segments: usize) -> Self {
        SegmentTree {
            arena: Vec::new(),
            root: None,
            parent_stacks: HashMap::new(),
            max_segments,
            heap: if max_segments > 0 {
                Some(MinMaxHeap::with_bound(max_segments))
            } else {
                None
            },
            segment_count: 0,
        }
    }

    pub fn get(&self, id: SegmentId) -> &Seg {
        &self.arena[id.index()]
    }

    pub fn get_mut(&mut self, id: SegmentId) -> &mut Seg {
        &mut self.arena[id.index()]
    }

    pub fn root(&self) -> Option<SegmentId> {
        self.root
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The segment currently open (top of stack) on `async_context`, if any.
    /// Used by `Txn::record_error`'s `add_to_segment` option to find the
    /// segment open at the time an error was recorded.
    pub fn current(&self, async_context: Option<StringId>) -> Option<SegmentId> {
        self.parent_stacks.get(&async_context).and_then(|s| s.last().copied())
    }

    /// Iterates every segment currently reachable in the arena, in
    /// insertion (arena) order. Includes segments that were `discard`ed
    /// from the tree but still occupy a slab slot; callers that need only
    /// live tree members should traverse from [`SegmentTree::root`] instead.
    pub fn iter_all(&self) -> impl Iterator<Item = &Seg> {
        self.arena.iter()
    }

    /// Starts a new segment. If `parent` is `None`, the parent is resolved
    /// to the current top of `async_context`'s stack, or the root if that
    /// stack is empty. The new segment is then pushed onto that same stack
    /// (spec.md §4.1).
    pub fn start(
        &mut self,
        start_time: u64,
        parent: Option<SegmentId>,
        async_context: Option<StringId>,
        name_index: StringId,
    ) -> SegmentId {
        let id = SegmentId(self.arena.len() as u32);
        let mut seg = Seg::new(id, name_index, start_time);
        seg.async_context_index = async_context;

        let stack = self.parent_stacks.entry(async_context).or_default();
        let resolved_parent = parent.or_else(|| stack.last().copied()).or(self.root);
        seg.parent = resolved_parent;
        stack.push(id);

        self.arena.push(seg);
        self.segment_count += 1;

        if let Some(parent_id) = resolved_parent {
            self.arena[parent_id.index()].children.push(id);
        } else {
            self.root = Some(id);
            self.arena[id.index()].priority |= SegPriority::ROOT;
        }

        id
    }

    /// Ends `seg`, setting `stop_time` to `now` unless an explicit
    /// `set_timing` call already populated it. Pops `seg` from its
    /// async-context stack. Returns `false` if `seg` was already ended.
    pub fn end(&mut self, seg: SegmentId, now: u64) -> bool {
        if self.arena[seg.index()].ended {
            return false;
        }
        self.arena[seg.index()].ended = true;
        if self.arena[seg.index()].stop_time.is_none() {
            self.arena[seg.index()].stop_time = Some(now);
        }

        let ctx = self.arena[seg.index()].async_context_index;
        if let Some(stack) = self.parent_stacks.get_mut(&ctx) {
            if let Some(pos) = stack.iter().rposition(|&s| s == seg) {
                stack.remove(pos);
            }
        }

        self.maybe_bound(seg);
        true
    }

    /// If `max_segments` is configured, inserts `seg` into the bounded
    /// duration heap; an eviction (by the comparator's minimum) is
    /// discarded from the tree. The root is never inserted, so it can
    /// never be evicted (spec.md §4.3).
    fn maybe_bound(&mut self, seg: SegmentId) {
        if self.heap.is_none() || self.root == Some(seg) {
            return;
        }
        let cmp = |a: &(u64, SegmentId), b: &(u64, SegmentId)| a.0.cmp(&b.0);
        let keyed = (self.arena[seg.index()].duration(), seg);
        let evicted = self.heap.as_mut().unwrap().insert(keyed, &cmp);
        if let Some((_, evicted_id)) = evicted {
            self.discard(evicted_id);
        }
    }

    /// Overrides both endpoints of `seg`'s interval.
    pub fn set_timing(&mut self, seg: SegmentId, start: u64, duration: u64) {
        let s = &mut self.arena[seg.index()];
        s.start_time = start;
        s.stop_time = Some(start + duration);
    }

    /// Reparents `seg` under `new_parent`, rejecting the operation (and
    /// returning `false`) if `new_parent` is a descendant of `seg` (which
    /// would create a cycle). Per spec.md §9, this crate rejects rather
    /// than relying solely on cycle-coloring to survive the cycle.
    pub fn set_parent(&mut self, seg: SegmentId, new_parent: SegmentId) -> bool {
        if seg == new_parent || self.is_descendant(new_parent, seg) {
            trace_core_debug!(
                name: "SegmentReparentRejected",
                segment = format!("{:?}", seg),
                new_parent = format!("{:?}", new_parent),
            );
            return false;
        }
        if let Some(old_parent) = self.arena[seg.index()].parent {
            self.arena[old_parent.index()].children.remove(seg);
        }
        self.arena[new_parent.index()].children.push(seg);
        self.arena[seg.index()].parent = Some(new_parent);
        true
    }

    /// `true` if `candidate` is `ancestor`'s descendant (searching downward
    /// from `ancestor`'s subtree), used to reject cyclic reparenting.
    fn is_descendant(&self, candidate: SegmentId, ancestor: SegmentId) -> bool {
        let mut stack = vec![ancestor];
        let mut visited = std::collections::HashSet::new();
        while let Some(node) = stack.pop() {
            if node == candidate {
                return true;
            }
            if !visited.insert(node) {
                continue; // already-cyclic tree; don't loop forever
            }
            stack.extend(self.arena[node.index()].children.iter());
        }
        false
    }

    pub fn set_name(&mut self, seg: SegmentId, name_index: StringId) {
        self.arena[seg.index()].name_index = name_index;
    }

    pub fn set_error(&mut self, seg: SegmentId, message: String, class: String) {
        self.arena[seg.index()].error = Some(crate::segment::SegError { message, class });
    }

    pub fn add_queued_metric(&mut self, seg: SegmentId, name: String, scoped: bool) {
        self.arena[seg.index()]
            .queued_metrics
            .push(crate::segment::QueuedMetric { name, scoped });
    }

    /// Detaches `seg` from the tree, promoting its children to be its
    /// former parent's children at the point of detachment (preserving
    /// insertion order across the splice). The root is never discarded.
    pub fn discard(&mut self, seg: SegmentId) {
        if self.root == Some(seg) {
            return;
        }
        let Some(parent) = self.arena[seg.index()].parent else {
            return;
        };
        let children: Vec<SegmentId> = self.arena[seg.index()].children.iter().collect();

        // Rebuild the parent's children list, splicing `seg`'s children in
        // at `seg`'s former position to preserve insertion order.
        let parent_children: Vec<SegmentId> = self.arena[parent.index()].children.iter().collect();
        let mut rebuilt = SegChildren::default();
        for child in parent_children {
            if child == seg {
                for grandchild in &children {
                    self.arena[grandchild.index()].parent = Some(parent);
                    rebuilt.push(*grandchild);
                }
            } else {
                rebuilt.push(child);
            }
        }
        self.arena[parent.index()].children = rebuilt;
        self.arena[seg.index()].parent = None;
        self.arena[seg.index()].children = SegChildren::default();
        self.segment_count = self.segment_count.saturating_sub(1);
    }

    /// Closes any still-open segment to `now` and resets every segment's
    /// traversal color to white, preparing the tree for finalization
    /// (spec.md Testable Property 2).
    pub fn close_open_segments_and_reset_colors(&mut self, now: u64) {
        for seg in &mut self.arena {
            if seg.stop_time.is_none() {
                seg.stop_time = Some(now.max(seg.start_time));
            }
            seg.color = Color::White;
        }
    }

    pub fn reset_colors(&mut self) {
        for seg in &mut self.arena {
            seg.color = Color::White;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_pool::StringPool;

    fn intern(pool: &mut StringPool, s: &str) -> StringId {
        pool.intern(s)
    }

    #[test]
    fn first_segment_becomes_root() {
        let mut pool = StringPool::new();
        let mut tree = SegmentTree::new(0);
        let name = intern(&mut pool, "ROOT");
        let root = tree.start(0, None, None, name);
        assert_eq!(tree.root(), Some(root));
        assert!(tree.get(root).priority.contains(SegPriority::ROOT));
    }

    #[test]
    fn nested_starts_without_explicit_parent_nest_under_current_top() {
        let mut pool = StringPool::new();
        let mut tree = SegmentTree::new(0);
        let root_name = intern(&mut pool, "ROOT");
        let a_name = intern(&mut pool, "A");
        let b_name = intern(&mut pool, "B");

        let root = tree.start(0, None, None, root_name);
        let a = tree.start(10, None, None, a_name);
        let b = tree.start(20, None, None, b_name);

        assert_eq!(tree.get(a).parent, Some(root));
        assert_eq!(tree.get(b).parent, Some(a));
        assert_eq!(tree.get(root).children.iter().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn end_pops_stack_lifo_and_is_idempotent() {
        let mut pool = StringPool::new();
        let mut tree = SegmentTree::new(0);
        let root_name = intern(&mut pool, "ROOT");
        let a_name = intern(&mut pool, "A");

        let _root = tree.start(0, None, None, root_name);
        let a = tree.start(10, None, None, a_name);
        assert!(tree.end(a, 50));
        assert!(!tree.end(a, 60)); // idempotent
        assert_eq!(tree.get(a).stop_time, Some(50));
    }

    #[test]
    fn discard_promotes_children_to_grandparent_preserving_order() {
        let mut pool = StringPool::new();
        let mut tree = SegmentTree::new(0);
        let root_name = intern(&mut pool, "ROOT");
        let mid_name = intern(&mut pool, "MID");
        let left_name = intern(&mut pool, "LEFT");
        let right_name = intern(&mut pool, "RIGHT");

        let root = tree.start(0, None, None, root_name);
        let mid = tree.start(0, Some(root), None, mid_name);
        let left = tree.start(0, Some(mid), None, left_name);
        let right = tree.start(0, Some(mid), None, right_name);

        tree.discard(mid);

        assert_eq!(
            tree.get(root).children.iter().collect::<Vec<_>>(),
            vec![left, right]
        );
        assert_eq!(tree.get(left).parent, Some(root));
        assert_eq!(tree.get(right).parent, Some(root));
    }

    #[test]
    fn set_parent_rejects_reparent_into_own_descendant() {
        let mut pool = StringPool::new();
        let mut tree = SegmentTree::new(0);
        let root_name = intern(&mut pool, "ROOT");
        let a_name = intern(&mut pool, "A");
        let b_name = intern(&mut pool, "B");

        let root = tree.start(0, None, None, root_name);
        let a = tree.start(0, Some(root), None, a_name);
        let b = tree.start(0, Some(a), None, b_name);

        assert!(!tree.set_parent(a, b)); // b is a's descendant: rejected
        assert_eq!(tree.get(a).parent, Some(root));
    }

    #[test]
    fn bounded_tree_evicts_shortest_duration_segment_keeping_root() {
        let mut pool = StringPool::new();
        let mut tree = SegmentTree::new(2);
        let root_name = intern(&mut pool, "ROOT");
        let a_name = intern(&mut pool, "A");
        let b_name = intern(&mut pool, "B");
        let c_name = intern(&mut pool, "C");

        let root = tree.start(0, None, None, root_name);
        let a = tree.start(0, Some(root), None, a_name);
        let b = tree.start(0, Some(root), None, b_name);
        let c = tree.start(0, Some(root), None, c_name);

        tree.end(a, 5); // duration 5
        tree.end(b, 50); // duration 50
        tree.end(c, 500); // duration 500: evicts the shortest (a)

        assert!(tree.get(a).parent.is_none());
        assert!(tree.get(b).parent.is_some());
        assert!(tree.get(c).parent.is_some());
        assert_eq!(tree.segment_count(), 3); // root + b + c (a discarded)
    }
}
