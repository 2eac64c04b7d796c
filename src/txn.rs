//! The transaction object: root of ownership for a single request or job.
//!
//! Grounded in spec.md §3/§6. Modeled on the teacher's `opentelemetry_sdk`
//! `Span`/`SpanBuilder` split: a single owning struct exposes a flat method
//! surface mirroring the `txn_*`/`segment_*` free functions of spec.md §6,
//! each best-effort (`bool`/`Option` returns, never panicking, per spec.md
//! §7's error taxonomy) rather than `Result`-returning, since this is the
//! instrumentation-facing surface, not a library-internal helper.
use crate::app::App;
use crate::attributes::{AttributeFilterConfig, AttributeValue, Attributes, Destinations};
use crate::config::TxnOptions;
use crate::distributed_trace::{DtState, HeaderMap};
use crate::error_record::ErrorRecord;
use crate::finalizer::{self, FinalizeOutput};
use crate::ids::{IdGenerator, SpanId};
use crate::metric::MetricTable;
use crate::namer::{NameState, Namer, NameResult, PathType};
use crate::segment::{DatastoreAttributes, ExternalAttributes, MessageAttributes, SegmentId, SegPriority, TypedAttributes};
use crate::segment_tree::SegmentTree;
use crate::string_pool::StringPool;
use crate::trace_core_debug;
use serde_json::Value as Json;
use std::sync::Arc;

/// One custom event recorded via [`Txn::record_custom_event`] (spec.md §6).
#[derive(Clone, Debug)]
pub struct CustomEvent {
    pub event_type: String,
    pub params: serde_json::Map<String, Json>,
    pub timestamp_ms: u64,
}

/// One log event recorded via [`Txn::record_log_event`] (spec.md §6).
#[derive(Clone, Debug)]
pub struct LogEvent {
    pub level: String,
    pub message: String,
    pub timestamp_ns: u64,
    pub labels: serde_json::Map<String, Json>,
}

/// Root of ownership for a single transaction (spec.md §3). Owned by exactly
/// one logical execution context for its lifetime (spec.md §5); this crate
/// enforces that by *not* implementing `Sync`, matching the no-locking
/// concurrency model.
pub struct Txn {
    pub(crate) options: TxnOptions,
    pub(crate) filter_config: AttributeFilterConfig,

    pub(crate) string_pool: StringPool,
    pub(crate) unscoped_metrics: MetricTable,
    pub(crate) scoped_metrics: MetricTable,
    pub(crate) custom_events: Vec<CustomEvent>,
    pub(crate) log_events: Vec<LogEvent>,
    pub(crate) attributes: Attributes,
    pub(crate) segment_tree: SegmentTree,
    pub(crate) dt: DtState,
    pub(crate) error: Option<ErrorRecord>,

    pub(crate) namer: Namer,
    pub(crate) name_state: NameState,
    pub(crate) resolved_name: Option<String>,
    pub(crate) trusted_account_key: String,
    pub(crate) id_generator: Arc<dyn IdGenerator>,

    pub(crate) background: bool,
    pub(crate) recording: bool,
    pub(crate) ignore: bool,
    pub(crate) ignore_apdex: bool,
    pub(crate) http_status: Option<u16>,
    pub(crate) queue_time_ns: Option<u64>,

    /// Wall-clock start, microseconds since epoch (spec.md §3); used to turn
    /// transaction-relative segment times back into absolute timestamps for
    /// span events and the trace JSON.
    pub(crate) abs_start_us: u64,
    /// The first `now_ns` reading the caller supplied, treated as t=0 for
    /// every transaction-relative time recorded afterward (spec.md §3's
    /// "monotonic reference").
    pub(crate) mono_start_ns: u64,

    pub(crate) ended: bool,
}

impl Txn {
    /// `txn_begin` (spec.md §6). `mono_start_ns` is a monotonic clock
    /// reading taken by the caller at the same instant as `abs_start_us`;
    /// every later `now_ns` passed to this transaction's methods must come
    /// from the same monotonic clock.
    pub fn begin(
        app: &App,
        options: TxnOptions,
        filter_config: AttributeFilterConfig,
        abs_start_us: u64,
        mono_start_ns: u64,
        background: bool,
    ) -> Self {
        let snapshot = app.snapshot();
        let max_segments = options.max_segments;
        let max_metrics = options.max_metrics;
        let txn_guid = snapshot.id_generator.new_txn_guid();
        let dt = DtState::new(
            snapshot.trusted_account_key.clone(),
            snapshot.account_id,
            snapshot.app_id,
            txn_guid,
            0.0,
            false,
        );

        let mut string_pool = StringPool::new();
        let root_name = string_pool.intern("ROOT");
        let mut segment_tree = SegmentTree::new(max_segments);
        segment_tree.start(0, None, None, root_name);

        Txn {
            options,
            filter_config,
            string_pool,
            unscoped_metrics: MetricTable::new(max_metrics),
            scoped_metrics: MetricTable::new(max_metrics),
            custom_events: Vec::new(),
            log_events: Vec::new(),
            attributes: Attributes::new(),
            segment_tree,
            dt,
            error: None,
            namer: snapshot.namer,
            name_state: NameState::new(),
            resolved_name: None,
            trusted_account_key: snapshot.trusted_account_key,
            id_generator: snapshot.id_generator,
            background,
            recording: true,
            ignore: false,
            ignore_apdex: false,
            http_status: None,
            queue_time_ns: None,
            abs_start_us,
            mono_start_ns,
            ended: false,
        }
    }

    fn rel(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.mono_start_ns)
    }

    pub fn root(&self) -> SegmentId {
        self.segment_tree.root().expect("root always started in begin")
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    pub fn high_security(&self) -> bool {
        self.options.high_security
    }

    /// Unscoped metrics recorded so far, including the rollup/apdex/queue
    /// family [`finalizer::finalize`] records during `end` (spec.md §6).
    pub fn unscoped_metrics(&self) -> &MetricTable {
        &self.unscoped_metrics
    }

    /// Scoped (per-transaction-name) metrics recorded so far, including
    /// anything drained from segments' queued metrics during `end`.
    pub fn scoped_metrics(&self) -> &MetricTable {
        &self.scoped_metrics
    }

    // ---- transaction-level operations (spec.md §6) ----

    /// `txn_ignore`: marks the transaction so `end` produces no output.
    pub fn ignore(&mut self) {
        self.ignore = true;
    }

    pub fn set_as_background(&mut self) {
        self.background = true;
    }

    pub fn set_as_web(&mut self) {
        self.background = false;
    }

    pub fn set_http_status(&mut self, status: u16) {
        self.http_status = Some(status);
        self.attributes.set_internal("httpResponseCode", status as i64, Destinations::ALL);
    }

    pub fn set_queue_time(&mut self, queue_time_ns: u64) {
        self.queue_time_ns = Some(queue_time_ns);
    }

    pub fn set_request_uri(&mut self, uri: &str) {
        self.attributes
            .set_internal("request.uri", uri, Destinations::TRACE | Destinations::TXN_EVENT | Destinations::ERROR);
    }

    pub fn set_referer(&mut self, referer: &str) {
        self.attributes.set_internal("request.headers.referer", referer, Destinations::TRACE);
    }

    pub fn set_content_length(&mut self, len: u64) {
        self.attributes
            .set_internal("request.headers.contentLength", len as i64, Destinations::TRACE);
    }

    pub fn set_user_agent(&mut self, user_agent: &str) {
        self.attributes
            .set_internal("request.headers.userAgent", user_agent, Destinations::TRACE);
    }

    /// `txn_set_path` (spec.md §4.7/§6): names the transaction subject to
    /// [`NameState`]'s freeze latch. `freeze` mirrors the per-call
    /// "overwrite_policy" — `true` latches this naming so only a strictly
    /// higher-priority call can later replace it.
    pub fn set_path(&mut self, path: &str, path_type: PathType, freeze: bool) {
        if !self.name_state.should_overwrite(path_type, true) {
            return;
        }
        match self.namer.name(path, path_type, self.background) {
            NameResult::Named(name) => {
                self.resolved_name = Some(name);
                self.name_state.record(path_type, freeze);
            }
            NameResult::Ignore => {
                self.ignore = true;
            }
        }
    }

    /// The transaction's final name, resolved by the last successful
    /// `set_path` call, or a generic fallback if naming was never invoked.
    fn final_name(&self) -> String {
        self.resolved_name.clone().unwrap_or_else(|| {
            let prefix = if self.background { "OtherTransaction" } else { "WebTransaction" };
            format!("{prefix}/Uri/Unknown")
        })
    }

    /// `txn_record_error` (spec.md §6/§4.8): replaces the current error
    /// record only if `priority` is strictly higher (spec.md §3's "at most
    /// one surfaced"). If `add_to_segment`, attaches a lighter `SegError` to
    /// the segment open on the default async context, if any.
    pub fn record_error(
        &mut self,
        priority: i32,
        add_to_segment: bool,
        message: &str,
        class: &str,
        stack_json: Option<String>,
        timestamp_ms: u64,
    ) -> bool {
        if !self.options.error_collection || !ErrorRecord::should_replace(self.error.as_ref(), priority) {
            return false;
        }
        let mut record = ErrorRecord::new(priority, message.to_owned(), class.to_owned(), stack_json, timestamp_ms);
        if self.options.high_security {
            record.redact_for_high_security();
        }
        if add_to_segment {
            if let Some(seg) = self.segment_tree.current(None) {
                record.span_id = Some(self.segment_span_id(seg));
                self.segment_tree.set_error(seg, record.message.clone(), record.class.clone());
            }
        }
        self.error = Some(record);
        true
    }

    /// `txn_add_user_custom_parameter` (spec.md §4.8): rejected outright
    /// under high security.
    pub fn add_user_custom_parameter(&mut self, key: &str, value: impl Into<AttributeValue>) -> bool {
        let destinations = self.filter_config.resolve(key, Destinations::ALL);
        self.attributes.set(key, value, destinations, self.options.high_security)
    }

    /// `txn_add_custom_metric` (spec.md §6): `value_ms` is a caller-supplied
    /// millisecond duration, stored internally in nanoseconds like every
    /// other timing in this crate.
    pub fn add_custom_metric(&mut self, name: &str, value_ms: f64) {
        let ns = (value_ms * 1_000_000.0).max(0.0) as u64;
        self.unscoped_metrics.add(name, ns);
    }

    /// `txn_record_custom_event` (spec.md §6). Rejected if custom events are
    /// disabled or under high security (spec.md §4.8's "LASP toggles...
    /// custom-events").
    pub fn record_custom_event(&mut self, event_type: &str, params: serde_json::Map<String, Json>, timestamp_ms: u64) -> bool {
        if !self.options.custom_events || self.options.high_security {
            return false;
        }
        self.custom_events.push(CustomEvent {
            event_type: event_type.to_owned(),
            params,
            timestamp_ms,
        });
        true
    }

    /// `txn_record_log_event` (spec.md §6): records a log line and bumps the
    /// `Logging/lines`/`Logging/lines/<LEVEL>` Supportability metrics (part
    /// of the wire contract, spec.md §6).
    pub fn record_log_event(&mut self, level: &str, message: &str, timestamp_ns: u64, labels: serde_json::Map<String, Json>) {
        self.unscoped_metrics.add("Logging/lines", 0);
        self.unscoped_metrics.add(&format!("Logging/lines/{level}"), 0);
        self.log_events.push(LogEvent {
            level: level.to_owned(),
            message: message.to_owned(),
            timestamp_ns,
            labels,
        });
    }

    // ---- distributed trace (spec.md §4.5/§6) ----

    pub fn accept_distributed_trace_payload(&mut self, headers: &HeaderMap, transport_type: Option<&str>, now_ms: u64) -> bool {
        if !self.options.distributed_tracing {
            return false;
        }
        self.dt.accept(headers, transport_type, self.background, now_ms, &mut self.unscoped_metrics)
    }

    pub fn create_distributed_trace_payload(&mut self, segment: Option<SegmentId>, now_ms: u64) -> Json {
        if !self.options.distributed_tracing {
            return Json::Null;
        }
        let span_id = segment.map(|s| self.segment_span_id(s));
        let payload = self
            .dt
            .create_proprietary(span_id, self.options.analytics_events, now_ms, &mut self.unscoped_metrics);
        serde_json::to_value(payload).unwrap_or(Json::Null)
    }

    pub fn create_w3c_traceparent_header(&mut self, segment: Option<SegmentId>) -> String {
        let seg = segment.unwrap_or_else(|| self.root());
        let span_id = self.segment_span_id(seg);
        self.dt.create_w3c_traceparent(span_id, &mut self.unscoped_metrics)
    }

    pub fn create_w3c_tracestate_header(&mut self, segment: Option<SegmentId>, now_ms: u64) -> String {
        let seg = segment.unwrap_or_else(|| self.root());
        let span_id = self.segment_span_id(seg);
        self.dt.create_w3c_tracestate(span_id, now_ms)
    }

    /// Returns the segment's 16-hex span id, generating and caching one on
    /// first use (spec.md §3's "set when the segment's id is emitted").
    pub(crate) fn segment_span_id(&mut self, seg: SegmentId) -> SpanId {
        if let Some(id) = self.segment_tree.get(seg).span_id {
            return id;
        }
        let id = self.id_generator.new_span_id();
        self.segment_tree.get_mut(seg).span_id = Some(id);
        id
    }

    // ---- segments (spec.md §4.1/§6) ----

    pub fn segment_start(&mut self, now_ns: u64, parent: Option<SegmentId>, async_context: Option<&str>, name: &str) -> SegmentId {
        let async_context_id = async_context.map(|c| self.string_pool.intern(c));
        let name_id = self.string_pool.intern(name);
        self.segment_tree.start(self.rel(now_ns), parent, async_context_id, name_id)
    }

    pub fn segment_end(&mut self, seg: SegmentId, now_ns: u64) -> bool {
        if !self.recording {
            return false;
        }
        self.segment_tree.end(seg, self.rel(now_ns))
    }

    pub fn segment_set_parent(&mut self, seg: SegmentId, new_parent: SegmentId) -> bool {
        self.segment_tree.set_parent(seg, new_parent)
    }

    pub fn segment_set_timing(&mut self, seg: SegmentId, start_ns: u64, duration_ns: u64) {
        self.segment_tree.set_timing(seg, start_ns, duration_ns);
    }

    pub fn segment_set_name(&mut self, seg: SegmentId, name: &str) {
        let name_id = self.string_pool.intern(name);
        self.segment_tree.set_name(seg, name_id);
    }

    pub fn segment_set_error(&mut self, seg: SegmentId, message: &str, class: &str) {
        self.segment_tree.set_error(seg, message.to_owned(), class.to_owned());
    }

    /// `add_metric` (spec.md §4.1/§6): queues a per-segment metric, drained
    /// into the scoped or unscoped table during [`Txn::end`]'s finalization
    /// pass. Used by type-specific end routines, e.g. a datastore end
    /// queuing `Datastore/all`, `Datastore/{product}/all`, and a scoped
    /// specific metric.
    pub fn segment_add_child_metric(&mut self, seg: SegmentId, name: &str, scoped: bool) {
        self.segment_tree.add_queued_metric(seg, name.to_owned(), scoped);
    }

    pub fn segment_discard(&mut self, seg: SegmentId) {
        self.segment_tree.discard(seg);
    }

    pub fn segment_set_user_attribute(&mut self, seg: SegmentId, key: &str, value: impl Into<AttributeValue>, destinations: Destinations) {
        if self.options.high_security {
            return;
        }
        self.segment_tree.get_mut(seg).attributes.set_internal(key, value, destinations);
        self.segment_tree.get_mut(seg).priority |= SegPriority::ATTR;
    }

    pub fn segment_set_datastore(&mut self, seg: SegmentId, attrs: DatastoreAttributes) {
        self.segment_tree.get_mut(seg).kind_attrs = TypedAttributes::Datastore(attrs);
    }

    pub fn segment_set_external(&mut self, seg: SegmentId, attrs: ExternalAttributes) {
        self.segment_tree.get_mut(seg).kind_attrs = TypedAttributes::External(attrs);
    }

    pub fn segment_set_message(&mut self, seg: SegmentId, attrs: MessageAttributes) {
        self.segment_tree.get_mut(seg).kind_attrs = TypedAttributes::Message(attrs);
    }

    // ---- end / finalize ----

    /// `txn_end` (spec.md §6). Idempotent (spec.md Testable Property 8):
    /// the second and later calls are no-ops returning `None`.
    pub fn end(&mut self, now_ns: u64) -> Option<FinalizeOutput> {
        if self.ended {
            return None;
        }
        self.ended = true;
        self.recording = false;

        if self.ignore {
            trace_core_debug!(name: "Txn.End.Ignored");
            return None;
        }

        let name = self.final_name();
        let root = self.root();
        let name_id = self.string_pool.intern(&name);
        self.segment_tree.set_name(root, name_id);

        let now_rel = self.rel(now_ns);
        self.segment_tree.close_open_segments_and_reset_colors(now_rel);

        Some(finalizer::finalize(self, now_rel, now_ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TxnOptions;

    fn begin_txn() -> Txn {
        let app = App::new("trust", "acct", "app");
        Txn::begin(&app, TxnOptions::new(), AttributeFilterConfig::new(), 1_000_000_000, 0, false)
    }

    #[test]
    fn basic_sync_trace_matches_spec_scenario_1() {
        let mut txn = begin_txn();
        let s1 = txn.segment_start(10_000_000, None, None, "Custom/S1");
        let s2 = txn.segment_start(20_000_000, None, None, "Custom/S2");
        assert!(txn.segment_end(s2, 40_000_000));
        assert!(txn.segment_end(s1, 60_000_000));
        let out = txn.end(100_000_000).unwrap();
        assert_eq!(out.total_time_ns, 100_000_000);

        let web_txn = txn.unscoped_metrics().find("WebTransaction").unwrap();
        assert_eq!(web_txn.count(), 1);
        assert_eq!(web_txn.total(), 100_000_000);
        let apdex = txn.unscoped_metrics().find("Apdex").unwrap();
        assert_eq!(apdex.satisfying(), 1);
    }

    #[test]
    fn end_is_idempotent() {
        let mut txn = begin_txn();
        assert!(txn.end(10).is_some());
        assert!(txn.end(20).is_none());
    }

    #[test]
    fn ignored_transaction_produces_no_output() {
        let mut txn = begin_txn();
        txn.ignore();
        assert!(txn.end(10).is_none());
    }

    #[test]
    fn record_error_keeps_highest_priority() {
        let mut txn = begin_txn();
        assert!(txn.record_error(1, false, "boom", "Error", None, 0));
        assert!(!txn.record_error(1, false, "again", "Error", None, 0));
        assert!(txn.record_error(5, false, "worse", "Error", None, 0));
        assert_eq!(txn.error.as_ref().unwrap().message, "worse");
    }

    #[test]
    fn high_security_redacts_error_message() {
        let app = App::new("trust", "acct", "app");
        let opts = TxnOptions::new().with_high_security(true);
        let mut txn = Txn::begin(&app, opts, AttributeFilterConfig::new(), 0, 0, false);
        txn.record_error(1, false, "secret", "RuntimeError", None, 0);
        assert_eq!(txn.error.as_ref().unwrap().message, "RuntimeError");
        assert!(!txn.add_user_custom_parameter("k", "v"));
    }
}
