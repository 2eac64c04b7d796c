//! The two-pass finalization pipeline: accounting, then trace JSON / span
//! event emission (spec.md §4.4).
//!
//! Grounded in spec.md §4.4's prose pipeline plus `axiom/nr_segment_tree.c`'s
//! `nr_segment_tree_get_nearest_sampled_ancestor`-style "nearest emittable
//! ancestor" hoisting (named here [`nearest_emittable`] and folded into the
//! single [`is_emittable`] predicate covering zero-duration omission,
//! malformed-segment dropping, and sample-set filtering uniformly, per
//! SPEC_FULL.md §3's supplemented-feature note). Mirrors the teacher's
//! `opentelemetry_sdk::trace::SpanProcessor::on_end` in spirit: a pure
//! function over a finished tree, never panicking per spec.md §7.
use crate::attributes::Destinations;
use crate::config::RecordSql;
use crate::exclusive_time::ExclusiveTimeCalculator;
use crate::heap::MinMaxHeap;
use crate::segment::{SegmentId, TypedAttributes};
use crate::segment_tree::SegmentTree;
use crate::string_pool::StringPool;
use crate::trace_core_debug;
use crate::txn::Txn;
use serde_json::{json, Map, Value as Json};
use std::collections::{HashMap, HashSet};

/// The category a span event's category-specific fields are drawn from
/// (spec.md §4.4's "category-specific fields").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanCategory {
    Generic,
    Datastore,
    Http,
    Message,
}

impl SpanCategory {
    fn as_str(self) -> &'static str {
        match self {
            SpanCategory::Generic => "generic",
            SpanCategory::Datastore => "datastore",
            SpanCategory::Http => "http",
            SpanCategory::Message => "message",
        }
    }
}

/// One span event: `[ { intrinsics }, { user_attrs }, { agent_attrs } ]` on
/// the wire (spec.md §6).
#[derive(Clone, Debug)]
pub struct SpanEvent {
    pub name: String,
    pub category: SpanCategory,
    pub guid: String,
    pub parent_id: Option<String>,
    pub intrinsics: Map<String, Json>,
    pub user_attributes: Map<String, Json>,
    pub agent_attributes: Map<String, Json>,
}

impl SpanEvent {
    pub fn to_json(&self) -> Json {
        json!([self.intrinsics, self.user_attributes, self.agent_attributes])
    }
}

/// The finalizer's output (spec.md §4.4's "Output collection"). The
/// duration/apdex/queue/rollup metric family recorded alongside this (spec.md
/// §2 Finalizer row) lands in the transaction's own metric tables rather than
/// here; read it back via [`crate::txn::Txn::unscoped_metrics`] /
/// [`crate::txn::Txn::scoped_metrics`] after `end` returns.
#[derive(Debug)]
pub struct FinalizeOutput {
    pub trace_json: Option<String>,
    pub span_events: Option<Vec<SpanEvent>>,
    pub total_time_ns: u64,
}

/// Every segment reachable from `root`, visited once (guarding against a
/// cycle that could only arise from a manually-rebuilt tree, since
/// `SegmentTree::set_parent` already rejects reparenting into a descendant).
fn collect_reachable(tree: &SegmentTree, root: SegmentId) -> Vec<SegmentId> {
    let mut order = Vec::new();
    let mut stack = vec![root];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        stack.extend(tree.get(id).children.iter());
    }
    order
}

/// Runs both finalization passes over `txn`'s (already-closed) segment tree
/// and returns the emitted artifacts. `now_rel` is transaction-relative
/// nanoseconds (matching segment timestamps); `now_ns` is the caller's
/// monotonic clock reading, used only to timestamp span events via
/// `txn.abs_start_us`.
pub fn finalize(txn: &mut Txn, _now_rel: u64, now_ns: u64) -> FinalizeOutput {
    let Some(root) = txn.segment_tree.root() else {
        trace_core_debug!(name: "Finalizer.NullRoot");
        return FinalizeOutput {
            trace_json: None,
            span_events: None,
            total_time_ns: 0,
        };
    };

    let reachable = collect_reachable(&txn.segment_tree, root);

    // Pass 1: per-segment exclusive time, transaction total time.
    let mut total_time: u64 = 0;
    for &id in &reachable {
        let seg = txn.segment_tree.get(id);
        let stop = seg.stop_time.unwrap_or(seg.start_time);
        let mut calc = ExclusiveTimeCalculator::new(seg.start_time, stop);
        let own_ctx = seg.async_context_index;
        for child_id in seg.children.iter() {
            let child = txn.segment_tree.get(child_id);
            if child.async_context_index == own_ctx {
                calc.add_child(child.start_time, child.stop_time.unwrap_or(child.start_time));
            }
        }
        let exclusive = calc.exclusive_time();
        txn.segment_tree.get_mut(id).exclusive_time = Some(exclusive);
        total_time += exclusive;
    }

    if txn.options.discount_main_context_blocking {
        let root_seg = txn.segment_tree.get(root);
        let root_ctx = root_seg.async_context_index;
        let root_stop = root_seg.stop_time.unwrap_or(root_seg.start_time);
        let mut calc = ExclusiveTimeCalculator::new(root_seg.start_time, root_stop);
        for &id in &reachable {
            if id == root {
                continue;
            }
            let seg = txn.segment_tree.get(id);
            if seg.async_context_index != root_ctx {
                calc.add_child(seg.start_time, seg.stop_time.unwrap_or(seg.start_time));
            }
        }
        // The time any off-root-context work covered of the root's own
        // interval is the time the main context was blocked by it.
        total_time = total_time.saturating_sub(calc.covered());
    }

    let duration_ns = txn.segment_tree.get(root).duration();

    // Caller-supplied total-time callback (spec.md §4.4), invoked once before
    // pass 2: records the duration/apdex/queue/error/rollup metric family and
    // drains each segment's queued per-segment metrics (spec.md §4.1's
    // `add_metric`) into the scoped/unscoped tables.
    record_rollup_metrics(txn, root, &reachable, duration_ns, total_time);

    let segment_count = txn.segment_tree.segment_count();
    let trace_sample = build_sample(&txn.segment_tree, &reachable, txn.options.trace_limit, segment_count, trace_cmp_key);
    let span_sample = build_sample(&txn.segment_tree, &reachable, txn.options.span_limit, segment_count, span_cmp_key);

    let trace_json = if txn.options.tt_enabled && txn.options.trace_limit > 0 && duration_ns >= txn.options.tt_threshold_ns() {
        Some(build_trace_json(txn, root, &trace_sample))
    } else {
        None
    };

    let span_events = if txn.options.distributed_tracing && txn.options.span_events && txn.dt.sampled {
        Some(build_span_events(txn, root, &span_sample, now_ns))
    } else {
        None
    };

    FinalizeOutput {
        trace_json,
        span_events,
        total_time_ns: total_time,
    }
}

/// Drains queued per-segment metrics and records the duration/apdex/queue/
/// error/rollup metric family (spec.md §2 Finalizer row, §4.4, §6's literal
/// metric-name grammar). Runs once, after total time is final and before
/// pass 2 builds the trace/span reservoirs and walks the tree for emission.
fn record_rollup_metrics(txn: &mut Txn, root: SegmentId, reachable: &[SegmentId], duration_ns: u64, total_time_ns: u64) {
    for &id in reachable {
        let (queued, seg_duration, seg_exclusive) = {
            let seg = txn.segment_tree.get(id);
            (seg.queued_metrics.clone(), seg.duration(), seg.exclusive_time.unwrap_or_else(|| seg.duration()))
        };
        for metric in queued {
            if metric.scoped {
                txn.scoped_metrics.add_ex(&metric.name, seg_duration, seg_exclusive);
            } else {
                txn.unscoped_metrics.add_ex(&metric.name, seg_duration, seg_exclusive);
            }
        }
    }

    record_datastore_external_rollups(txn, reachable);

    let background = txn.background;
    let full_name = txn
        .string_pool
        .get(txn.segment_tree.get(root).name_index)
        .unwrap_or("WebTransaction/Uri/Unknown")
        .to_owned();
    let prefix = if background { "OtherTransaction/" } else { "WebTransaction/" };
    let name_suffix = full_name.strip_prefix(prefix).unwrap_or(&full_name).to_owned();

    txn.unscoped_metrics.add(&full_name, duration_ns);
    if background {
        txn.unscoped_metrics.add("OtherTransaction/all", duration_ns);
    } else {
        txn.unscoped_metrics.add("WebTransaction", duration_ns);
        txn.unscoped_metrics.add("HttpDispatcher", duration_ns);
    }

    let total_time_root = if background { "OtherTransactionTotalTime" } else { "WebTransactionTotalTime" };
    txn.unscoped_metrics.add(total_time_root, total_time_ns);
    txn.unscoped_metrics.add(&format!("{total_time_root}/{name_suffix}"), total_time_ns);

    if !background {
        if let Some(queue_ns) = txn.queue_time_ns {
            txn.unscoped_metrics.add("WebFrontend/QueueTime", queue_ns);
        }
    }

    if !txn.options.apdex_ignore && !txn.ignore_apdex {
        let apdex_t_ns = txn.options.apdex_t.as_nanos() as u64;
        let (satisfying, tolerating, failing) = if duration_ns <= apdex_t_ns {
            (1, 0, 0)
        } else if duration_ns <= apdex_t_ns.saturating_mul(4) {
            (0, 1, 0)
        } else {
            (0, 0, 1)
        };
        txn.unscoped_metrics.add_apdex("Apdex", satisfying, tolerating, failing, duration_ns);
        txn.unscoped_metrics
            .add_apdex(&format!("Apdex/{name_suffix}"), satisfying, tolerating, failing, duration_ns);
    }

    if txn.error.is_some() {
        let suffix = if background { "allOther" } else { "allWeb" };
        txn.unscoped_metrics.add("Errors/all", 0);
        txn.unscoped_metrics.add(&format!("Errors/{suffix}"), 0);
        txn.unscoped_metrics.add(&format!("Errors/{full_name}"), 0);
    }

    record_caller_rollups(txn, duration_ns, background);
}

/// Rolls reachable datastore/external segments up into
/// `{Datastore,External}/all{,Web,Other}` and the per-vendor
/// `Datastore/<vendor>/all{,Web,Other}` metrics (spec.md §6's literal string
/// list only names vendor rollups for Datastore, not External).
fn record_datastore_external_rollups(txn: &mut Txn, reachable: &[SegmentId]) {
    let suffix = if txn.background { "allOther" } else { "allWeb" };
    for &id in reachable {
        let kind_vendor = {
            let seg = txn.segment_tree.get(id);
            match &seg.kind_attrs {
                TypedAttributes::Datastore(d) => {
                    Some(("Datastore", Some(d.component.clone().unwrap_or_else(|| "Other".to_owned()))))
                }
                TypedAttributes::External(_) => Some(("External", None)),
                _ => None,
            }
        };
        let Some((kind, vendor)) = kind_vendor else { continue };
        txn.unscoped_metrics.add(&format!("{kind}/all"), 0);
        txn.unscoped_metrics.add(&format!("{kind}/{suffix}"), 0);
        if let Some(vendor) = vendor {
            txn.unscoped_metrics.add(&format!("{kind}/{vendor}/all"), 0);
            txn.unscoped_metrics.add(&format!("{kind}/{vendor}/{suffix}"), 0);
        }
    }
}

/// Records `DurationByCaller`/`ErrorsByCaller` rollups keyed on the inbound
/// distributed-trace caller (spec.md §6), mirroring
/// [`crate::distributed_trace::DtState::record_transport_duration`]'s naming
/// shape. No-op when no inbound payload was accepted.
fn record_caller_rollups(txn: &mut Txn, duration_ns: u64, background: bool) {
    let Some(inbound) = txn.dt.inbound.clone() else { return };
    let suffix = if background { "allOther" } else { "allWeb" };
    let duration_base = format!(
        "DurationByCaller/{}/{}/{}/{}",
        inbound.ty.as_str(),
        inbound.account_id,
        inbound.app_id,
        inbound.transport_type
    );
    txn.unscoped_metrics.add(&format!("{duration_base}/all"), duration_ns);
    txn.unscoped_metrics.add(&format!("{duration_base}/{suffix}"), duration_ns);

    if txn.error.is_some() {
        let error_base = format!(
            "ErrorsByCaller/{}/{}/{}/{}",
            inbound.ty.as_str(),
            inbound.account_id,
            inbound.app_id,
            inbound.transport_type
        );
        txn.unscoped_metrics.add(&format!("{error_base}/all"), 0);
        txn.unscoped_metrics.add(&format!("{error_base}/{suffix}"), 0);
    }
}

fn trace_cmp_key(tree: &SegmentTree, id: SegmentId) -> (u64, u64) {
    (tree.get(id).duration(), 0)
}

fn span_cmp_key(tree: &SegmentTree, id: SegmentId) -> (u64, u64) {
    let seg = tree.get(id);
    (seg.priority.bits() as u64, seg.duration())
}

/// Builds a bounded reservoir over `reachable`, keyed by `key_of` (higher
/// sorts first on ties in the second element). Returns `None` if the
/// reservoir was never engaged (`limit == 0` or the tree fits within it),
/// meaning "the sample set is implicitly every segment" (spec.md §4.4).
fn build_sample(
    tree: &SegmentTree,
    reachable: &[SegmentId],
    limit: usize,
    segment_count: usize,
    key_of: impl Fn(&SegmentTree, SegmentId) -> (u64, u64),
) -> Option<HashSet<SegmentId>> {
    if limit == 0 || segment_count <= limit {
        return None;
    }
    let cmp = |a: &(u64, u64, SegmentId), b: &(u64, u64, SegmentId)| (a.0, a.1).cmp(&(b.0, b.1));
    let mut heap: MinMaxHeap<(u64, u64, SegmentId)> = MinMaxHeap::with_bound(limit);
    for &id in reachable {
        let (a, b) = key_of(tree, id);
        heap.insert((a, b, id), &cmp);
    }
    Some(heap.into_vec().into_iter().map(|(_, _, id)| id).collect())
}

/// The nearest ancestor of `seg` that is itself emittable, skipping past
/// malformed/zero-duration/unsampled segments. Named after axiom's
/// `nr_segment_tree_get_nearest_sampled_ancestor`; `None` means every
/// ancestor up to (and including) the root was skipped, so `seg` attaches
/// directly under the trace root. [`json_children`] and
/// [`collect_span_events`] compute the same result implicitly while
/// building their respective trees top-down; this walks bottom-up instead,
/// useful for ad hoc lookups and kept independently testable.
fn nearest_emittable_ancestor(tree: &SegmentTree, seg: SegmentId, sample: &Option<HashSet<SegmentId>>) -> Option<SegmentId> {
    let mut current = tree.get(seg).parent;
    while let Some(id) = current {
        if is_emittable(tree, id, sample) {
            return Some(id);
        }
        current = tree.get(id).parent;
    }
    None
}

/// `true` if `seg` should itself be emitted (into the trace JSON or the span
/// reservoir): not malformed, non-zero duration, and (if a sample set is
/// engaged) a member of it. Collapses spec.md §4.4's three separate omission
/// rules into one check so both emission passes share the same hoisting
/// logic.
fn is_emittable(tree: &SegmentTree, id: SegmentId, sample: &Option<HashSet<SegmentId>>) -> bool {
    let seg = tree.get(id);
    if seg.is_malformed() || seg.duration() == 0 {
        return false;
    }
    match sample {
        Some(set) => set.contains(&id),
        None => true,
    }
}

#[derive(Default)]
struct TraceNamePool {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl TraceNamePool {
    fn intern(&mut self, s: &str) -> usize {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.names.len();
        self.names.push(s.to_owned());
        self.index.insert(s.to_owned(), i);
        i
    }
}

fn build_trace_json(txn: &Txn, root: SegmentId, sample: &Option<HashSet<SegmentId>>) -> String {
    let mut names = TraceNamePool::default();
    let root_seg = txn.segment_tree.get(root);
    let duration_ms = root_seg.duration() / 1_000_000;
    let real_root_node = build_node_json(&txn.segment_tree, &txn.string_pool, &mut names, root, sample, txn.options.tt_recordsql);
    let root_wrapper = json!([0, duration_ms, "ROOT", {}, [real_root_node]]);
    let outer = json!([[0, {}, {}, root_wrapper, {}], names.names]);
    serde_json::to_string(&outer).unwrap_or_default()
}

fn build_node_json(
    tree: &SegmentTree,
    pool: &StringPool,
    names: &mut TraceNamePool,
    id: SegmentId,
    sample: &Option<HashSet<SegmentId>>,
    record_sql: RecordSql,
) -> Json {
    let seg = tree.get(id);
    let start_ms = seg.start_time / 1_000_000;
    let stop_ms = seg.stop_time.unwrap_or(seg.start_time) / 1_000_000;
    let name = pool.get(seg.name_index).unwrap_or("<unknown>");
    let name_ref = format!("`{}", names.intern(name));

    let mut attrs = Map::new();
    append_typed_attrs(&mut attrs, &seg.kind_attrs, record_sql);
    if let Some(ctx_id) = seg.async_context_index {
        if let Some(ctx_name) = pool.get(ctx_id) {
            attrs.insert("async_context".to_owned(), Json::String(ctx_name.to_owned()));
        }
    }
    for (k, v) in seg.attributes.for_destination(Destinations::TRACE) {
        attrs.insert(k.to_owned(), v.to_json());
    }

    let children = json_children(tree, pool, names, id, sample, record_sql);
    json!([start_ms, stop_ms, name_ref, attrs, children])
}

/// Builds the emitted-children array for `parent`: non-emittable children
/// (zero duration, malformed, or outside the sample set) are skipped but
/// their own children are hoisted up to appear at `parent`'s level, per
/// spec.md §4.4's "children still visited but the segment itself is not
/// emitted" / "nearest-sampled-ancestor" rule.
fn json_children(
    tree: &SegmentTree,
    pool: &StringPool,
    names: &mut TraceNamePool,
    parent: SegmentId,
    sample: &Option<HashSet<SegmentId>>,
    record_sql: RecordSql,
) -> Vec<Json> {
    let mut out = Vec::new();
    for child in tree.get(parent).children.iter() {
        if is_emittable(tree, child, sample) {
            out.push(build_node_json(tree, pool, names, child, sample, record_sql));
        } else {
            out.extend(json_children(tree, pool, names, child, sample, record_sql));
        }
    }
    out
}

/// Appends type-specific keys in the fixed order spec.md §4.4 requires to
/// precede user attributes (`host, database_name, sql_obfuscated, uri,
/// library, procedure, status, destination_name, messaging_system,
/// server_address, ...`). Reused for both trace-JSON node attributes and
/// span events' agent attributes.
fn append_typed_attrs(map: &mut Map<String, Json>, attrs: &TypedAttributes, record_sql: RecordSql) {
    match attrs {
        TypedAttributes::Custom => {}
        TypedAttributes::Datastore(d) => {
            if let Some(host) = &d.host {
                map.insert("host".to_owned(), Json::String(host.clone()));
            }
            if let Some(db) = &d.database_name {
                map.insert("database_name".to_owned(), Json::String(db.clone()));
            }
            match record_sql {
                RecordSql::Off => {}
                RecordSql::Raw => {
                    if let Some(sql) = &d.sql {
                        map.insert("sql".to_owned(), Json::String(sql.clone()));
                    }
                }
                RecordSql::Obfuscated => {
                    if let Some(sql) = &d.sql_obfuscated {
                        map.insert("sql_obfuscated".to_owned(), Json::String(sql.clone()));
                    }
                }
            }
            if let Some(q) = &d.input_query_json {
                map.insert("input_query".to_owned(), Json::String(q.clone()));
            }
            if let Some(b) = &d.backtrace_json {
                map.insert("backtrace".to_owned(), Json::String(b.clone()));
            }
            if let Some(e) = &d.explain_plan_json {
                map.insert("explain_plan".to_owned(), Json::String(e.clone()));
            }
            if let Some(p) = &d.port_path_or_id {
                map.insert("port_path_or_id".to_owned(), Json::String(p.clone()));
            }
            if let Some(c) = &d.component {
                map.insert("component".to_owned(), Json::String(c.clone()));
            }
        }
        TypedAttributes::External(e) => {
            if let Some(uri) = &e.uri {
                map.insert("uri".to_owned(), Json::String(uri.clone()));
            }
            if let Some(lib) = &e.library {
                map.insert("library".to_owned(), Json::String(lib.clone()));
            }
            if let Some(proc_) = &e.procedure {
                map.insert("procedure".to_owned(), Json::String(proc_.clone()));
            }
            if let Some(status) = e.status {
                map.insert("status".to_owned(), Json::from(status));
            }
            if let Some(guid) = &e.transaction_guid {
                map.insert("transaction_guid".to_owned(), Json::String(guid.clone()));
            }
        }
        TypedAttributes::Message(m) => {
            if let Some(dest) = &m.destination_name {
                map.insert("destination_name".to_owned(), Json::String(dest.clone()));
            }
            if let Some(sys) = &m.messaging_system {
                map.insert("messaging_system".to_owned(), Json::String(sys.clone()));
            }
            if let Some(addr) = &m.server_address {
                map.insert("server_address".to_owned(), Json::String(addr.clone()));
            }
        }
    }
}

fn category_of(attrs: &TypedAttributes) -> SpanCategory {
    match attrs {
        TypedAttributes::Custom => SpanCategory::Generic,
        TypedAttributes::Datastore(_) => SpanCategory::Datastore,
        TypedAttributes::External(_) => SpanCategory::Http,
        TypedAttributes::Message(_) => SpanCategory::Message,
    }
}

fn build_span_events(txn: &mut Txn, root: SegmentId, sample: &Option<HashSet<SegmentId>>, now_ns: u64) -> Vec<SpanEvent> {
    let mut out = Vec::new();
    collect_span_events(txn, root, None, sample, now_ns, &mut out);
    out
}

/// DFS walk producing span events in insertion order (spec.md §5's "Span-
/// event DFS order is stable: children appear in insertion order"), hoisting
/// `parent_id` past any non-emitted segment exactly like [`json_children`]
/// hoists trace-JSON children.
fn collect_span_events(
    txn: &mut Txn,
    id: SegmentId,
    parent_guid: Option<String>,
    sample: &Option<HashSet<SegmentId>>,
    now_ns: u64,
    out: &mut Vec<SpanEvent>,
) {
    let included = match sample {
        Some(set) => set.contains(&id),
        None => true,
    };
    let next_parent = if included {
        let guid = txn.segment_span_id(id).to_string();
        out.push(build_span_event(txn, id, parent_guid.clone(), guid.clone(), now_ns));
        Some(guid)
    } else {
        parent_guid
    };

    let children: Vec<SegmentId> = txn.segment_tree.get(id).children.iter().collect();
    for child in children {
        collect_span_events(txn, child, next_parent.clone(), sample, now_ns, out);
    }
}

fn build_span_event(txn: &Txn, id: SegmentId, parent_guid: Option<String>, guid: String, _now_ns: u64) -> SpanEvent {
    let seg = txn.segment_tree.get(id);
    let name = txn.string_pool.get(seg.name_index).unwrap_or("<unknown>").to_owned();
    let category = category_of(&seg.kind_attrs);
    let timestamp_ms = txn.abs_start_us / 1000 + seg.start_time / 1_000_000;
    let duration_s = seg.duration() as f64 / 1_000_000_000.0;

    let mut intrinsics = Map::new();
    intrinsics.insert("type".to_owned(), Json::String("Span".to_owned()));
    intrinsics.insert("name".to_owned(), Json::String(name.clone()));
    intrinsics.insert("category".to_owned(), Json::String(category.as_str().to_owned()));
    intrinsics.insert("timestamp".to_owned(), Json::from(timestamp_ms));
    intrinsics.insert(
        "duration".to_owned(),
        serde_json::Number::from_f64(duration_s).map(Json::Number).unwrap_or(Json::Null),
    );
    intrinsics.insert("guid".to_owned(), Json::String(guid.clone()));
    if let Some(parent) = &parent_guid {
        intrinsics.insert("parentId".to_owned(), Json::String(parent.clone()));
    }
    intrinsics.insert("traceId".to_owned(), Json::String(txn.dt.trace_id.to_string()));
    intrinsics.insert("transactionId".to_owned(), Json::String(txn.dt.txn_id.clone()));
    intrinsics.insert("sampled".to_owned(), Json::Bool(txn.dt.sampled));
    intrinsics.insert(
        "priority".to_owned(),
        serde_json::Number::from_f64(txn.dt.priority).map(Json::Number).unwrap_or(Json::Null),
    );

    let user_attributes = seg.attributes.to_json_map(Destinations::SPAN_EVENT);
    let mut agent_attributes = Map::new();
    append_typed_attrs(&mut agent_attributes, &seg.kind_attrs, txn.options.tt_recordsql);

    SpanEvent {
        name,
        category,
        guid,
        parent_id: parent_guid,
        intrinsics,
        user_attributes,
        agent_attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::attributes::AttributeFilterConfig;
    use crate::config::TxnOptions;

    fn begin(options: TxnOptions) -> Txn {
        let app = App::new("trust", "acct", "app");
        Txn::begin(&app, options, AttributeFilterConfig::new(), 1_000_000_000, 0, false)
    }

    #[test]
    fn basic_sync_trace_from_spec_scenario_1() {
        let mut txn = begin(TxnOptions::new().with_tt_threshold(crate::config::TtThreshold::Fixed(0)));
        let s1 = txn.segment_start(10_000_000, None, None, "Custom/S1");
        let s2 = txn.segment_start(20_000_000, None, None, "Custom/S2");
        txn.segment_end(s2, 40_000_000);
        txn.segment_end(s1, 60_000_000);
        let out = txn.end(100_000_000).unwrap();

        assert_eq!(out.total_time_ns, 100_000_000);
        let json = out.trace_json.expect("tt_threshold 0 should always emit a trace");
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let root_node = &parsed[0][3];
        assert_eq!(root_node[0], 0);
        assert_eq!(root_node[1], 100);
        let real_root = &root_node[4][0];
        assert_eq!(real_root[0], 0);
        assert_eq!(real_root[1], 100);
        let child_s1 = &real_root[4][0];
        assert_eq!(child_s1[0], 10);
        assert_eq!(child_s1[1], 60);
        let child_s2 = &child_s1[4][0];
        assert_eq!(child_s2[0], 20);
        assert_eq!(child_s2[1], 40);

        let web_txn = txn.unscoped_metrics().find("WebTransaction").unwrap();
        assert_eq!(web_txn.count(), 1);
        assert_eq!(web_txn.total(), 100_000_000);
        let apdex = txn.unscoped_metrics().find("Apdex").unwrap();
        assert_eq!(apdex.satisfying(), 1);
        assert_eq!(apdex.tolerating(), 0);
        assert_eq!(apdex.failing(), 0);
    }

    #[test]
    fn async_with_discount_matches_spec_scenario_2() {
        let mut txn = begin(TxnOptions::new().with_discount_main_context_blocking(true));
        // Root spans 0-50ms by construction (begin() starts it at t=0; we end it explicitly below).
        let a = txn.segment_start(10_000_000, None, Some("ctx1"), "A");
        let b = txn.segment_start(20_000_000, Some(a), Some("ctx1"), "B");
        let c = txn.segment_start(10_000_000, None, Some("ctx2"), "C");
        let d = txn.segment_start(30_000_000, Some(c), Some("ctx2"), "D");
        txn.segment_end(b, 40_000_000);
        txn.segment_end(a, 40_000_000);
        txn.segment_end(d, 50_000_000);
        txn.segment_end(c, 40_000_000);
        let out = txn.end(50_000_000).unwrap();
        assert_eq!(out.total_time_ns, 80_000_000);
    }

    #[test]
    fn sampling_cap_matches_spec_scenario_5() {
        let mut txn = begin(TxnOptions::new().with_trace_limit(2).with_span_limit(0));
        let a = txn.segment_start(1_000_000, None, None, "A");
        let b = txn.segment_start(2_000_000, None, None, "B");
        let c = txn.segment_start(3_000_000, None, None, "C");
        txn.segment_end(c, 4_000_000);
        txn.segment_end(b, 5_000_000);
        txn.segment_end(a, 6_000_000);
        let out = txn.end(9_000_000).unwrap();
        let json = out.trace_json.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let name_pool = parsed[1].as_array().unwrap();
        // Root's name is unresolved "WebTransaction/Uri/Unknown" since no set_path call was made.
        assert_eq!(name_pool.len(), 2);
        assert_eq!(name_pool[1], "A");
        let real_root = &parsed[0][3][4][0];
        let children = real_root[4].as_array().unwrap();
        assert_eq!(children.len(), 1); // only A survives; B and C are hoisted away (not emitted)
    }

    #[test]
    fn no_span_events_without_sampling() {
        let mut txn = begin(TxnOptions::new());
        let out = txn.end(10).unwrap();
        assert!(out.span_events.is_none());
    }

    #[test]
    fn queued_metrics_drain_into_scoped_and_unscoped_tables() {
        let mut txn = begin(TxnOptions::new());
        let seg = txn.segment_start(1_000_000, None, None, "Datastore/statement/MySQL/orders/select");
        txn.segment_add_child_metric(seg, "Datastore/statement/MySQL/orders/select", true);
        txn.segment_add_child_metric(seg, "Datastore/all", false);
        txn.segment_end(seg, 5_000_000);
        txn.end(10_000_000);

        assert_eq!(
            txn.scoped_metrics()
                .find("Datastore/statement/MySQL/orders/select")
                .unwrap()
                .count(),
            1
        );
        assert_eq!(txn.unscoped_metrics().find("Datastore/all").unwrap().count(), 1);
    }

    #[test]
    fn datastore_segment_rolls_up_into_vendor_metrics() {
        let mut txn = begin(TxnOptions::new());
        let seg = txn.segment_start(1_000_000, None, None, "Datastore/statement/MySQL/orders/select");
        txn.segment_set_datastore(
            seg,
            crate::segment::DatastoreAttributes {
                component: Some("MySQL".to_owned()),
                ..Default::default()
            },
        );
        txn.segment_end(seg, 5_000_000);
        txn.end(10_000_000);

        assert_eq!(txn.unscoped_metrics().find("Datastore/all").unwrap().count(), 1);
        assert_eq!(txn.unscoped_metrics().find("Datastore/allWeb").unwrap().count(), 1);
        assert_eq!(txn.unscoped_metrics().find("Datastore/MySQL/all").unwrap().count(), 1);
    }

    #[test]
    fn duration_by_caller_recorded_after_dt_accept() {
        let mut txn = begin(TxnOptions::new().with_tt_threshold(crate::config::TtThreshold::Fixed(0)));
        let mut headers = HashMap::new();
        headers.insert(
            "traceparent".to_owned(),
            "00-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01".to_owned(),
        );
        assert!(txn.accept_distributed_trace_payload(&headers, None, 1_000_000));
        txn.end(10_000_000);

        assert!(txn.unscoped_metrics().iter().any(|m| m.name.starts_with("DurationByCaller/")));
    }

    #[test]
    fn nearest_emittable_ancestor_skips_zero_duration_parent() {
        let mut txn = begin(TxnOptions::new());
        let root = txn.root();
        let zero_dur = txn.segment_start(5_000_000, Some(root), None, "Instant");
        txn.segment_end(zero_dur, 5_000_000); // zero duration: never emittable
        let grandchild = txn.segment_start(6_000_000, Some(zero_dur), None, "Work");
        txn.segment_end(grandchild, 9_000_000);
        txn.end(10_000_000);

        let ancestor = super::nearest_emittable_ancestor(&txn.segment_tree, grandchild, &None);
        assert_eq!(ancestor, Some(root));
    }
}
