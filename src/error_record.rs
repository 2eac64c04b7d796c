//! The transaction-level error record.
//!
//! Grounded in spec.md §3/§6: at most one error record survives per
//! transaction (the highest-priority one recorded via
//! `txn_record_error`), carrying a message, class, stack JSON, the id of
//! the segment open at the time it was recorded (if any), a timestamp, and
//! the priority used to decide which of several recorded errors survives.
//! `high_security` transactions strip the message per spec.md §4.8.
use crate::ids::SpanId;

/// One error observed during a transaction. The core keeps only the
/// highest-priority record seen; callers select among several via
/// [`ErrorRecord::replaces`].
#[derive(Clone, Debug)]
pub struct ErrorRecord {
    pub message: String,
    pub class: String,
    /// JSON-encoded stack trace, opaque to this crate.
    pub stack_json: Option<String>,
    pub span_id: Option<SpanId>,
    /// Milliseconds since epoch.
    pub timestamp_ms: u64,
    pub priority: i32,
}

impl ErrorRecord {
    pub fn new(
        priority: i32,
        message: String,
        class: String,
        stack_json: Option<String>,
        timestamp_ms: u64,
    ) -> Self {
        ErrorRecord {
            message,
            class,
            stack_json,
            span_id: None,
            timestamp_ms,
            priority,
        }
    }

    /// Applies the high-security restriction (spec.md §4.8): the error
    /// message is replaced with the generic class name so no potentially
    /// sensitive detail leaves the process.
    pub fn redact_for_high_security(&mut self) {
        self.message = self.class.clone();
    }

    /// `true` if `other` should replace the currently-recorded error: a
    /// strictly higher priority always wins; ties keep the first recorded
    /// error (stable, matching "at most one surfaced" in spec.md §3).
    pub fn should_replace(current: Option<&ErrorRecord>, candidate_priority: i32) -> bool {
        match current {
            None => true,
            Some(c) => candidate_priority > c.priority,
        }
    }
}
