//! The segment node type: a single timed interval in a transaction's tree.
//!
//! Grounded in `axiom/nr_segment_types.h`'s `nr_segment_t`. Per spec.md §9's
//! re-architecture guidance, the from-C slab-of-pointers graph becomes a
//! `Vec<Seg>` arena (owned by [`crate::segment_tree::SegmentTree`]) addressed
//! by [`SegmentId`] indices, and the packed-array/vector children union
//! becomes [`SegChildren`], a small-vector that promotes to a heap
//! allocation past `INLINE_CHILDREN` elements. The type-specific `union` of
//! datastore/external/message fields becomes the [`TypedAttributes`] enum.
use crate::attributes::Attributes;
use crate::ids::SpanId;
use crate::string_pool::StringId;
use bitflags::bitflags;

/// An index into a transaction's segment arena. Stable for the transaction's
/// lifetime; never reused after `0`-based assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub(crate) u32);

impl SegmentId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Number of children a segment can hold inline before [`SegChildren`]
/// promotes to a heap-allocated `Vec`. Mirrors
/// `NR_SEGMENT_CHILDREN_PACKED_LIMIT`'s small-array-then-vector strategy.
const INLINE_CHILDREN: usize = 8;

/// A small-vector of child [`SegmentId`]s: inline storage for the common
/// case of a few children, promoting to `Vec` past [`INLINE_CHILDREN`].
/// Children are always kept in insertion order.
#[derive(Clone, Debug)]
pub enum SegChildren {
    Inline([SegmentId; INLINE_CHILDREN], u8),
    Spilled(Vec<SegmentId>),
}

impl Default for SegChildren {
    fn default() -> Self {
        SegChildren::Inline([SegmentId(0); INLINE_CHILDREN], 0)
    }
}

impl SegChildren {
    pub fn len(&self) -> usize {
        match self {
            SegChildren::Inline(_, n) => *n as usize,
            SegChildren::Spilled(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, child: SegmentId) {
        match self {
            SegChildren::Inline(arr, n) => {
                if (*n as usize) < INLINE_CHILDREN {
                    arr[*n as usize] = child;
                    *n += 1;
                } else {
                    let mut v: Vec<SegmentId> = arr.to_vec();
                    v.push(child);
                    *self = SegChildren::Spilled(v);
                }
            }
            SegChildren::Spilled(v) => v.push(child),
        }
    }

    pub fn remove(&mut self, child: SegmentId) {
        match self {
            SegChildren::Inline(arr, n) => {
                if let Some(pos) = arr[..*n as usize].iter().position(|&c| c == child) {
                    for i in pos..(*n as usize - 1) {
                        arr[i] = arr[i + 1];
                    }
                    *n -= 1;
                }
            }
            SegChildren::Spilled(v) => v.retain(|&c| c != child),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = SegmentId> + '_ {
        match self {
            SegChildren::Inline(arr, n) => arr[..*n as usize].iter().copied(),
            SegChildren::Spilled(v) => v[..].iter().copied(),
        }
    }
}

/// Cycle-safety coloring used during finalizer traversals (spec.md §4.1's
/// "cycle-safe traversal via node coloring").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    White,
    Grey,
}

bitflags! {
    /// Priority bitfield; higher numeric priority wins span-event reservoir
    /// contention at finalization. Mirrors `NR_SEGMENT_PRIORITY_*`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct SegPriority: u32 {
        /// This segment is the transaction's root.
        const ROOT = 1 << 16;
        /// This segment's id was emitted in an outbound DT payload.
        const DT = 1 << 15;
        /// This segment's id was emitted in a log payload.
        const LOG = 1 << 14;
        /// This segment has user attributes set on it.
        const ATTR = 1 << 13;
    }
}

/// Type-specific payload fields, discriminated by variant (spec.md §3's
/// "typed_attributes (discriminated by type)").
#[derive(Clone, Debug)]
pub enum TypedAttributes {
    Custom,
    Datastore(DatastoreAttributes),
    External(ExternalAttributes),
    Message(MessageAttributes),
}

#[derive(Clone, Debug, Default)]
pub struct DatastoreAttributes {
    pub component: Option<String>,
    pub sql: Option<String>,
    pub sql_obfuscated: Option<String>,
    pub input_query_json: Option<String>,
    pub backtrace_json: Option<String>,
    pub explain_plan_json: Option<String>,
    pub host: Option<String>,
    pub database_name: Option<String>,
    pub port_path_or_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ExternalAttributes {
    pub uri: Option<String>,
    pub library: Option<String>,
    pub procedure: Option<String>,
    pub transaction_guid: Option<String>,
    pub status: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct MessageAttributes {
    pub destination_name: Option<String>,
    pub messaging_system: Option<String>,
    pub server_address: Option<String>,
}

/// A per-segment error (spec.md §3): message and class only; the richer
/// transaction-level [`crate::error_record::ErrorRecord`] carries the stack
/// and priority.
#[derive(Clone, Debug)]
pub struct SegError {
    pub message: String,
    pub class: String,
}

/// A metric queued by a segment's type-specific `end` routine to be merged
/// into the transaction's metric table at finalization (spec.md §4.1's
/// `add_metric`).
#[derive(Clone, Debug)]
pub struct QueuedMetric {
    pub name: String,
    pub scoped: bool,
}

/// A single timed interval in the segment tree.
#[derive(Clone, Debug)]
pub struct Seg {
    pub id: SegmentId,
    pub kind_attrs: TypedAttributes,

    pub start_time: u64,
    /// `None` means the segment has not yet been ended.
    pub stop_time: Option<u64>,

    pub name_index: StringId,
    pub async_context_index: Option<StringId>,

    pub parent: Option<SegmentId>,
    pub children: SegChildren,

    /// The 16-hex span id, populated lazily the first time it is needed
    /// for an outbound DT payload or a span event (spec.md §3).
    pub span_id: Option<SpanId>,

    pub priority: SegPriority,

    pub attributes: Attributes,
    pub attributes_txn_event: Attributes,
    pub error: Option<SegError>,

    pub queued_metrics: Vec<QueuedMetric>,

    pub color: Color,
    /// Populated by the finalizer's first pass; `None` before finalization.
    pub exclusive_time: Option<u64>,
    /// `true` once `segment_end` has successfully run once, distinct from
    /// `stop_time.is_some()` so that a `set_timing` override before `end`
    /// doesn't make a later `end` call a silent no-op (spec.md §4.1).
    pub ended: bool,
}

impl Seg {
    pub fn new(id: SegmentId, name_index: StringId, start_time: u64) -> Self {
        Seg {
            id,
            kind_attrs: TypedAttributes::Custom,
            start_time,
            stop_time: None,
            name_index,
            async_context_index: None,
            parent: None,
            children: SegChildren::default(),
            span_id: None,
            priority: SegPriority::empty(),
            attributes: Attributes::new(),
            attributes_txn_event: Attributes::new(),
            error: None,
            queued_metrics: Vec::new(),
            color: Color::White,
            exclusive_time: None,
            ended: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stop_time.is_none()
    }

    /// Duration in nanoseconds, treating an unclosed segment as having
    /// zero duration (the finalizer closes any still-open segment to `now`
    /// before this is relied on; see spec.md Testable Property 2).
    pub fn duration(&self) -> u64 {
        self.stop_time.unwrap_or(self.start_time).saturating_sub(self.start_time)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self.stop_time, Some(stop) if stop < self.start_time)
    }
}
