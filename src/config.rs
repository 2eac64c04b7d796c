//! The transaction's immutable-after-begin options.
//!
//! Grounded in spec.md §3's `Options` struct and modeled on the teacher's
//! `opentelemetry_sdk::trace::Config`/`SpanLimits`: a plain data struct with
//! a `Default` impl and builder-style `with_*` setters, carrying no
//! environment-variable reads of its own (env/INI loading is out of scope
//! per spec.md §1; the outer agent overrides fields before `Txn::begin`).
use std::time::Duration;

/// How SQL text is recorded on datastore segments (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RecordSql {
    Off,
    Raw,
    #[default]
    Obfuscated,
}

/// Either a fixed nanosecond transaction-trace threshold, or "4x apdex_t"
/// (spec.md §3's `tt_threshold (ns) or tt_is_apdex_f flag`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TtThreshold {
    Fixed(u64),
    ApdexFourTimes,
}

impl Default for TtThreshold {
    fn default() -> Self {
        TtThreshold::ApdexFourTimes
    }
}

/// A transaction's immutable configuration, fixed at [`crate::txn::Txn::begin`]
/// (spec.md §3).
#[derive(Clone, Debug)]
pub struct TxnOptions {
    pub distributed_tracing: bool,
    pub span_events: bool,
    pub transaction_events: bool,
    pub custom_events: bool,
    pub error_collection: bool,
    pub apdex_ignore: bool,
    pub analytics_events: bool,
    pub tt_enabled: bool,
    pub tt_threshold: TtThreshold,
    pub apdex_t: Duration,
    /// `0` means unbounded (spec.md §3).
    pub max_segments: usize,
    pub span_queue_batch_size: usize,
    pub span_queue_batch_timeout: Duration,
    pub tt_recordsql: RecordSql,
    pub discount_main_context_blocking: bool,
    /// Strips error messages and forbids custom parameters (spec.md §4.8).
    pub high_security: bool,
    /// Server-side security policy equivalent of `high_security` (spec.md §4.8).
    pub lasp: bool,
    /// Non-forced metric table capacity; `0` means unbounded.
    pub max_metrics: usize,
    /// Bound on the trace-segment reservoir built during finalization.
    pub trace_limit: usize,
    /// Bound on the span-event reservoir built during finalization.
    pub span_limit: usize,
}

impl Default for TxnOptions {
    fn default() -> Self {
        TxnOptions {
            distributed_tracing: true,
            span_events: true,
            transaction_events: true,
            custom_events: true,
            error_collection: true,
            apdex_ignore: false,
            analytics_events: true,
            tt_enabled: true,
            tt_threshold: TtThreshold::default(),
            apdex_t: Duration::from_millis(500),
            max_segments: 0,
            span_queue_batch_size: 0,
            span_queue_batch_timeout: Duration::from_millis(0),
            tt_recordsql: RecordSql::default(),
            discount_main_context_blocking: false,
            high_security: false,
            lasp: false,
            max_metrics: crate::metric::DEFAULT_LIMIT,
            trace_limit: 2000,
            span_limit: 2000,
        }
    }
}

impl TxnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_distributed_tracing(mut self, enabled: bool) -> Self {
        self.distributed_tracing = enabled;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_transaction_events(mut self, enabled: bool) -> Self {
        self.transaction_events = enabled;
        self
    }

    pub fn with_apdex_t(mut self, apdex_t: Duration) -> Self {
        self.apdex_t = apdex_t;
        self
    }

    pub fn with_tt_threshold(mut self, threshold: TtThreshold) -> Self {
        self.tt_threshold = threshold;
        self
    }

    pub fn with_tt_enabled(mut self, enabled: bool) -> Self {
        self.tt_enabled = enabled;
        self
    }

    pub fn with_max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }

    pub fn with_discount_main_context_blocking(mut self, enabled: bool) -> Self {
        self.discount_main_context_blocking = enabled;
        self
    }

    pub fn with_high_security(mut self, enabled: bool) -> Self {
        self.high_security = enabled;
        self
    }

    pub fn with_lasp(mut self, enabled: bool) -> Self {
        self.lasp = enabled;
        self
    }

    pub fn with_trace_limit(mut self, limit: usize) -> Self {
        self.trace_limit = limit;
        self
    }

    pub fn with_span_limit(mut self, limit: usize) -> Self {
        self.span_limit = limit;
        self
    }

    /// Resolves the effective transaction-trace threshold in nanoseconds
    /// (spec.md §4.4's "absolute ns or 4×apdex_t if `tt_is_apdex_f`").
    pub fn tt_threshold_ns(&self) -> u64 {
        match self.tt_threshold {
            TtThreshold::Fixed(ns) => ns,
            TtThreshold::ApdexFourTimes => self.apdex_t.as_nanos() as u64 * 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_apdex_four_times_threshold() {
        let opts = TxnOptions::default();
        assert_eq!(opts.tt_threshold_ns(), 2_000_000_000);
    }

    #[test]
    fn fixed_threshold_overrides_apdex_derivation() {
        let opts = TxnOptions::new().with_tt_threshold(TtThreshold::Fixed(10));
        assert_eq!(opts.tt_threshold_ns(), 10);
    }

    #[test]
    fn builder_setters_compose() {
        let opts = TxnOptions::new().with_max_segments(500).with_high_security(true);
        assert_eq!(opts.max_segments, 500);
        assert!(opts.high_security);
    }
}
