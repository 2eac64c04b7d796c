//! Distributed-trace state: inbound accept, outbound create, and the
//! Supportability metrics that are part of the wire contract (spec.md §4.5).
//!
//! Ties together [`w3c`] and [`proprietary`], which are grounded
//! independently in the teacher's propagator and the proprietary payload
//! format respectively. This module owns the precedence rules (traceparent
//! before `newrelic`, at most one accept, reject accept-after-create) and
//! the categorized Supportability metric recording, mirroring
//! `axiom/nr_txn_private.h`'s `nr_txn_t.distributed_trace` sub-state plus
//! the accept/create entry points described in prose by spec.md §4.5.
pub mod proprietary;
pub mod w3c;

use crate::ids::{SpanId, TraceId};
use crate::metric::MetricTable;
use crate::trace_core_debug;
use std::collections::HashMap;

/// A case-insensitive header lookup; callers pass header names already
/// lower-cased per spec.md §4.5 ("a header map keyed by lowercase header
/// name").
pub type HeaderMap = HashMap<String, String>;

/// Fixed Supportability metric name strings, part of the wire contract
/// (spec.md §6). Kept as `const`s rather than computed so a typo can't
/// silently diverge from the backend's expectations.
pub mod metrics {
    pub const ACCEPT_SUCCESS: &str = "Supportability/DistributedTrace/AcceptPayload/Success";
    pub const ACCEPT_EXCEPTION: &str = "Supportability/DistributedTrace/AcceptPayload/Exception";
    pub const ACCEPT_PARSE_EXCEPTION: &str =
        "Supportability/DistributedTrace/AcceptPayload/ParseException";
    pub const ACCEPT_IGNORED_NULL: &str = "Supportability/DistributedTrace/AcceptPayload/Ignored/Null";
    pub const ACCEPT_IGNORED_MULTIPLE: &str =
        "Supportability/DistributedTrace/AcceptPayload/Ignored/Multiple";
    pub const ACCEPT_IGNORED_MAJOR_VERSION: &str =
        "Supportability/DistributedTrace/AcceptPayload/Ignored/MajorVersion";
    pub const ACCEPT_IGNORED_UNTRUSTED_ACCOUNT: &str =
        "Supportability/DistributedTrace/AcceptPayload/Ignored/UntrustedAccount";
    pub const ACCEPT_IGNORED_CREATE_BEFORE_ACCEPT: &str =
        "Supportability/DistributedTrace/AcceptPayload/Ignored/CreateBeforeAccept";
    pub const CREATE_SUCCESS: &str = "Supportability/DistributedTrace/CreatePayload/Success";
    pub const CREATE_EXCEPTION: &str = "Supportability/DistributedTrace/CreatePayload/Exception";
    pub const TRACE_CONTEXT_ACCEPT_SUCCESS: &str = "Supportability/TraceContext/Accept/Success";
    pub const TRACE_CONTEXT_TRACEPARENT_PARSE_EXCEPTION: &str =
        "Supportability/TraceContext/TraceParent/Parse/Exception";
    pub const TRACE_CONTEXT_TRACESTATE_NO_NR_ENTRY: &str =
        "Supportability/TraceContext/TraceState/NoNrEntry";
    pub const TRACE_CONTEXT_TRACESTATE_INVALID_NR_ENTRY: &str =
        "Supportability/TraceContext/TraceState/InvalidNrEntry";
    pub const TRACE_CONTEXT_CREATE_SUCCESS: &str = "Supportability/TraceContext/Create/Success";
    pub const TRACE_CONTEXT_CREATE_EXCEPTION: &str = "Supportability/TraceContext/Create/Exception";
}

/// Type carried in an inbound payload; re-exported from [`w3c`] since both
/// wire forms share the same three-way classification.
pub use w3c::InboundType;

/// State captured from a successfully accepted inbound payload, in either
/// wire form (spec.md §3 "Inbound sub-state").
#[derive(Clone, Debug)]
pub struct Inbound {
    pub ty: InboundType,
    pub account_id: String,
    pub app_id: String,
    /// The parent span id: `traceparent`'s parent-id, or the proprietary
    /// payload's `id` field.
    pub guid: Option<String>,
    pub txn_id: Option<String>,
    pub trusted_parent_id: Option<String>,
    /// Comma-joined, sorted, bounded to 31 vendor entries (spec.md §4.5).
    pub tracing_vendors: String,
    pub transport_type: String,
    pub timestamp_ms: u64,
    pub has_timestamp: bool,
    pub set: bool,
}

/// Per-transaction distributed-trace state (spec.md §3's
/// "Distributed-trace state").
#[derive(Clone, Debug)]
pub struct DtState {
    pub trace_id: TraceId,
    pub txn_id: String,
    pub priority: f64,
    pub sampled: bool,
    pub trusted_key: String,
    pub account_id: String,
    pub app_id: String,
    pub inbound: Option<Inbound>,
    /// `true` once an accept has been attempted (successfully or not, except
    /// for the "no headers" case), rejecting any further accept attempt.
    accept_attempted: bool,
    /// `true` once an outbound payload has been created; a later accept
    /// attempt is rejected with `Ignored/CreateBeforeAccept`.
    pub outbound_set: bool,
}

impl DtState {
    pub fn new(
        trusted_key: String,
        account_id: String,
        app_id: String,
        txn_guid: String,
        priority: f64,
        sampled: bool,
    ) -> Self {
        let trace_id = TraceId::from_guid_padded(&txn_guid);
        DtState {
            trace_id,
            txn_id: txn_guid,
            priority,
            sampled,
            trusted_key,
            account_id,
            app_id,
            inbound: None,
            accept_attempted: false,
            outbound_set: false,
        }
    }

    fn default_transport_type(&self, background: bool) -> &'static str {
        if background {
            "Unknown"
        } else {
            "HTTP"
        }
    }

    /// Accepts an inbound distributed-trace payload from `headers`, per the
    /// precedence in spec.md §4.5. Records exactly one categorized
    /// Supportability metric (Testable Property 10) and returns whether the
    /// payload was accepted.
    pub fn accept(
        &mut self,
        headers: &HeaderMap,
        transport_type: Option<&str>,
        background: bool,
        now_ms: u64,
        metrics: &mut MetricTable,
    ) -> bool {
        if self.outbound_set {
            metrics.add(metrics::ACCEPT_IGNORED_CREATE_BEFORE_ACCEPT, 0);
            return false;
        }
        if self.accept_attempted {
            metrics.add(metrics::ACCEPT_IGNORED_MULTIPLE, 0);
            return false;
        }

        let transport = transport_type
            .map(str::to_owned)
            .unwrap_or_else(|| self.default_transport_type(background).to_owned());

        if let Some(tp_value) = headers.get(w3c::TRACEPARENT_HEADER) {
            self.accept_attempted = true;
            return self.accept_w3c(tp_value, headers.get(w3c::TRACESTATE_HEADER), &transport, background, now_ms, metrics);
        }

        if let Some(nr_value) = headers.get("newrelic") {
            self.accept_attempted = true;
            return self.accept_proprietary(nr_value, &transport, background, now_ms, metrics);
        }

        metrics.add(metrics::ACCEPT_IGNORED_NULL, 0);
        false
    }

    fn accept_w3c(
        &mut self,
        traceparent: &str,
        tracestate: Option<&String>,
        transport: &str,
        background: bool,
        now_ms: u64,
        metrics: &mut MetricTable,
    ) -> bool {
        let parsed = match w3c::parse_traceparent(traceparent) {
            Ok(tp) => tp,
            Err(()) => {
                trace_core_debug!(name: "DistributedTrace.TraceParent.ParseFailed");
                metrics.add(metrics::TRACE_CONTEXT_TRACEPARENT_PARSE_EXCEPTION, 0);
                return false;
            }
        };

        let mut ty = InboundType::App;
        let mut account_id = self.trusted_key.clone();
        let mut app_id = String::new();
        let mut trusted_parent_id = None;
        let mut txn_id = None;
        let mut tracing_vendors = String::new();
        let mut priority = None;
        let mut sampled = parsed.sampled();
        let mut timestamp_ms = now_ms;
        let mut has_timestamp = false;

        if let Some(ts_value) = tracestate {
            let ts = w3c::parse_tracestate(ts_value, &self.trusted_key);
            tracing_vendors = ts.other_vendors.join(",");
            match ts.nr_entry {
                Some(entry) => {
                    ty = entry.parent_type;
                    account_id = entry.account_id;
                    app_id = entry.app_id;
                    trusted_parent_id = Some(entry.span_id);
                    txn_id = Some(entry.txn_id);
                    sampled = entry.sampled;
                    priority = entry.priority;
                    if entry.timestamp_ms > 0 {
                        timestamp_ms = entry.timestamp_ms;
                        has_timestamp = true;
                    }
                }
                None if ts.nr_entry_invalid => {
                    metrics.add(metrics::TRACE_CONTEXT_TRACESTATE_INVALID_NR_ENTRY, 0);
                }
                None => {
                    metrics.add(metrics::TRACE_CONTEXT_TRACESTATE_NO_NR_ENTRY, 0);
                }
            }
        } else {
            metrics.add(metrics::TRACE_CONTEXT_TRACESTATE_NO_NR_ENTRY, 0);
        }

        self.trace_id = parsed.trace_id;
        self.sampled = sampled;
        if let Some(p) = priority {
            self.priority = p;
        }
        self.inbound = Some(Inbound {
            ty,
            account_id,
            app_id,
            guid: Some(parsed.parent_id.to_string()),
            txn_id,
            trusted_parent_id,
            tracing_vendors,
            transport_type: transport.to_owned(),
            timestamp_ms,
            has_timestamp,
            set: true,
        });

        metrics.add(metrics::TRACE_CONTEXT_ACCEPT_SUCCESS, 0);
        self.record_transport_duration(now_ms, background, metrics);
        true
    }

    fn accept_proprietary(
        &mut self,
        raw: &str,
        transport: &str,
        background: bool,
        now_ms: u64,
        metrics: &mut MetricTable,
    ) -> bool {
        let payload = match proprietary::decode(raw) {
            Ok(p) => p,
            Err(()) => {
                metrics.add(metrics::ACCEPT_PARSE_EXCEPTION, 0);
                return false;
            }
        };
        if payload.v[0] != proprietary::SUPPORTED_MAJOR_VERSION {
            metrics.add(metrics::ACCEPT_IGNORED_MAJOR_VERSION, 0);
            return false;
        }
        let trusted_candidate = payload.d.tk.as_deref().unwrap_or(payload.d.ac.as_str());
        if trusted_candidate != self.trusted_key {
            metrics.add(metrics::ACCEPT_IGNORED_UNTRUSTED_ACCOUNT, 0);
            return false;
        }

        let Ok(trace_id) = TraceId::from_hex(&payload.d.tr) else {
            metrics.add(metrics::ACCEPT_PARSE_EXCEPTION, 0);
            return false;
        };

        let ty = match payload.d.ty.as_str() {
            "Browser" => InboundType::Browser,
            "Mobile" => InboundType::Mobile,
            _ => InboundType::App,
        };

        self.trace_id = trace_id;
        if let Some(sa) = payload.d.sa {
            self.sampled = sa;
        }
        if let Some(pr) = payload.d.pr {
            self.priority = pr;
        }
        self.inbound = Some(Inbound {
            ty,
            account_id: payload.d.ac.clone(),
            app_id: payload.d.ap.clone(),
            guid: payload.d.id.clone(),
            txn_id: payload.d.tx.clone(),
            trusted_parent_id: payload.d.id.clone(),
            tracing_vendors: String::new(),
            transport_type: transport.to_owned(),
            timestamp_ms: payload.d.ti,
            has_timestamp: payload.d.ti > 0,
            set: true,
        });

        metrics.add(metrics::ACCEPT_SUCCESS, 0);
        self.record_transport_duration(now_ms, background, metrics);
        true
    }

    /// Records `TransportDuration/<type>/<account>/<app>/<transport>/{all,
    /// allWeb|allOther}` using `now - inbound.timestamp`, clamped to >= 0
    /// (spec.md §4.5's "record transport-duration metrics").
    fn record_transport_duration(&self, now_ms: u64, background: bool, metrics: &mut MetricTable) {
        let Some(inbound) = &self.inbound else { return };
        if !inbound.has_timestamp {
            return;
        }
        let duration_ms = now_ms.saturating_sub(inbound.timestamp_ms);
        let duration_ns = duration_ms.saturating_mul(1_000_000);
        let suffix = if background { "allOther" } else { "allWeb" };
        let base = format!(
            "TransportDuration/{}/{}/{}/{}",
            inbound.ty.as_str(),
            inbound.account_id,
            inbound.app_id,
            inbound.transport_type
        );
        metrics.add(&format!("{base}/all"), duration_ns);
        metrics.add(&format!("{base}/{suffix}"), duration_ns);
    }

    /// Creates an outbound proprietary payload (spec.md §4.5, "Create
    /// outbound (proprietary)"). `segment_id` is the emitting segment's id
    /// (generated by the caller if span events are enabled and none was set
    /// yet); `analytics_events_enabled` gates whether `tx` (the transaction
    /// guid) is included.
    pub fn create_proprietary(
        &mut self,
        segment_id: Option<SpanId>,
        analytics_events_enabled: bool,
        now_ms: u64,
        metrics: &mut MetricTable,
    ) -> proprietary::Payload {
        self.outbound_set = true;
        let tk = if self.trusted_key != self.account_id {
            Some(self.trusted_key.clone())
        } else {
            None
        };
        let payload = proprietary::Payload {
            v: [proprietary::SUPPORTED_MAJOR_VERSION, proprietary::MINOR_VERSION],
            d: proprietary::PayloadData {
                ty: "App".to_owned(),
                ac: self.account_id.clone(),
                ap: self.app_id.clone(),
                id: segment_id.map(|s| s.to_string()),
                tr: self.trace_id.to_string(),
                tx: if analytics_events_enabled {
                    Some(self.txn_id.clone())
                } else {
                    None
                },
                pr: Some(self.priority),
                sa: Some(self.sampled),
                ti: now_ms,
                tk,
            },
        };
        metrics.add(metrics::CREATE_SUCCESS, 0);
        payload
    }

    /// Builds the outbound `traceparent` header value (spec.md §4.5,
    /// "Create outbound (W3C)").
    pub fn create_w3c_traceparent(&mut self, segment_id: SpanId, metrics: &mut MetricTable) -> String {
        self.outbound_set = true;
        metrics.add(metrics::TRACE_CONTEXT_CREATE_SUCCESS, 0);
        w3c::format_traceparent(self.trace_id, segment_id, self.sampled)
    }

    /// Builds the outbound `tracestate` header value, preserving any
    /// inbound non-NR vendor entries.
    pub fn create_w3c_tracestate(&mut self, segment_id: SpanId, now_ms: u64) -> String {
        self.outbound_set = true;
        let preserved: Vec<String> = self
            .inbound
            .as_ref()
            .map(|i| {
                i.tracing_vendors
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        w3c::format_tracestate(
            &self.trusted_key,
            &self.account_id,
            &self.app_id,
            segment_id,
            &self.txn_id,
            self.sampled,
            self.priority,
            now_ms,
            &preserved,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn accept_w3c_from_spec_scenario_3() {
        let mut dt = DtState::new("123".into(), "acct".into(), "app".into(), "guid1234".into(), 0.5, false);
        let mut metrics = MetricTable::new(100);
        let h = headers(&[
            ("traceparent", "00-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01"),
            ("tracestate", "123@nr=0-2-account-app-span-transaction-1-1.1273-1529445826000, am=…"),
        ]);
        assert!(dt.accept(&h, None, false, 1529445826100, &mut metrics));
        let inbound = dt.inbound.as_ref().unwrap();
        assert_eq!(inbound.ty, InboundType::Mobile);
        assert_eq!(format!("{}", dt.trace_id), "74be672b84ddc4e4b28be285632bbc0a");
        assert_eq!(inbound.guid.as_deref(), Some("27ddd2d8890283b4"));
        assert_eq!(inbound.trusted_parent_id.as_deref(), Some("span"));
        assert_eq!(inbound.txn_id.as_deref(), Some("transaction"));
        assert!(dt.sampled);
        assert_eq!(dt.priority, 1.1273);
        assert_eq!(metrics.find(metrics::TRACE_CONTEXT_ACCEPT_SUCCESS).unwrap().count(), 1);
    }

    #[test]
    fn accept_proprietary_rejects_untrusted_account_from_spec_scenario_4() {
        let mut dt = DtState::new("0007".into(), "0007".into(), "app".into(), "guid".into(), 0.5, false);
        let mut metrics = MetricTable::new(100);
        let raw = r#"{"v":[0,1],"d":{"ac":"9123","ap":"51424","tr":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","ti":1482959525577,"ty":"App","id":"27856f70d3d314b7","tk":"1010"}}"#;
        let h = headers(&[("newrelic", raw)]);
        assert!(!dt.accept(&h, None, false, 1482959525600, &mut metrics));
        assert_eq!(
            metrics
                .find(metrics::ACCEPT_IGNORED_UNTRUSTED_ACCOUNT)
                .unwrap()
                .count(),
            1
        );
        assert!(dt.inbound.is_none());
    }

    #[test]
    fn no_headers_records_ignored_null() {
        let mut dt = DtState::new("k".into(), "a".into(), "p".into(), "g".into(), 0.5, false);
        let mut metrics = MetricTable::new(100);
        assert!(!dt.accept(&HeaderMap::new(), None, false, 0, &mut metrics));
        assert_eq!(metrics.find(metrics::ACCEPT_IGNORED_NULL).unwrap().count(), 1);
    }

    #[test]
    fn accept_after_create_is_rejected() {
        let mut dt = DtState::new("k".into(), "a".into(), "p".into(), "g".into(), 0.5, false);
        let mut metrics = MetricTable::new(100);
        dt.create_proprietary(None, true, 0, &mut metrics);
        let h = headers(&[("newrelic", "{}")]);
        assert!(!dt.accept(&h, None, false, 0, &mut metrics));
        assert_eq!(
            metrics
                .find(metrics::ACCEPT_IGNORED_CREATE_BEFORE_ACCEPT)
                .unwrap()
                .count(),
            1
        );
    }

    #[test]
    fn second_accept_attempt_is_ignored_multiple() {
        let mut dt = DtState::new("123".into(), "a".into(), "p".into(), "g".into(), 0.5, false);
        let mut metrics = MetricTable::new(100);
        let h = headers(&[(
            "traceparent",
            "00-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01",
        )]);
        assert!(dt.accept(&h, None, false, 0, &mut metrics));
        assert!(!dt.accept(&h, None, false, 0, &mut metrics));
        assert_eq!(metrics.find(metrics::ACCEPT_IGNORED_MULTIPLE).unwrap().count(), 1);
    }
}
