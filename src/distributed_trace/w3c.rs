//! `traceparent` / `tracestate` parsing and emission.
//!
//! Grounded in the teacher's `opentelemetry_sdk::propagation::TraceContextPropagator`
//! (`opentelemetry-sdk/src/propagation/trace_context.rs`), generalized to the
//! stricter validation spec.md §4.5 requires (version `ff` rejected, unknown
//! non-`00` versions accepted with flags forced to `00`, extra fields allowed
//! only when version != `00`) and to the one-reserved-vendor `tracestate`
//! entry format this crate's DT layer needs instead of the teacher's opaque
//! `TraceState`.
use crate::ids::{SpanId, TraceId};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// A parsed `traceparent` header (spec.md §4.5, point 1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceParent {
    pub version: u8,
    pub trace_id: TraceId,
    pub parent_id: SpanId,
    /// Flags as transmitted; callers should treat unknown-version flags as
    /// `00` per spec.md §9's resolution of the source's inconsistent
    /// version handling.
    pub flags: u8,
}

impl TraceParent {
    pub fn sampled(&self) -> bool {
        if self.version == 0 {
            self.flags & 0x01 != 0
        } else {
            false
        }
    }
}

/// Parses a `traceparent` header value. Rejects version `ff` outright;
/// accepts any other version byte, but for version `00` requires exactly 4
/// fields, and for unknown versions requires at least 4 (extra fields are
/// tolerated for forward compatibility, per spec.md §4.5/§9).
pub fn parse_traceparent(value: &str) -> Result<TraceParent, ()> {
    let value = value.trim();
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() < 4 {
        return Err(());
    }
    if parts[0].len() != 2 || parts[0].chars().any(|c| c.is_ascii_uppercase()) {
        return Err(());
    }
    let version = u8::from_str_radix(parts[0], 16).map_err(|_| ())?;
    if version == 0xff {
        return Err(());
    }
    if version == 0 && parts.len() != 4 {
        return Err(());
    }

    if parts[1].len() != 32 || parts[1].chars().any(|c| c.is_ascii_uppercase()) {
        return Err(());
    }
    let trace_id = TraceId::from_hex(parts[1]).map_err(|_| ())?;
    if !trace_id.is_valid() {
        return Err(());
    }

    if parts[2].len() != 16 || parts[2].chars().any(|c| c.is_ascii_uppercase()) {
        return Err(());
    }
    let parent_id = SpanId::from_hex(parts[2]).map_err(|_| ())?;
    if !parent_id.is_valid() {
        return Err(());
    }

    if parts[3].len() != 2 || parts[3].chars().any(|c| c.is_ascii_uppercase()) {
        return Err(());
    }
    let raw_flags = u8::from_str_radix(parts[3], 16).map_err(|_| ())?;
    // Unknown versions' flags are treated as 00 (spec.md §9).
    let flags = if version == 0 { raw_flags } else { 0 };

    Ok(TraceParent {
        version,
        trace_id,
        parent_id,
        flags,
    })
}

pub fn format_traceparent(trace_id: TraceId, parent_id: SpanId, sampled: bool) -> String {
    format!(
        "00-{trace_id}-{parent_id}-{:02x}",
        if sampled { 1u8 } else { 0u8 }
    )
}

/// Type carried by the reserved `tracestate` vendor entry (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundType {
    App,
    Browser,
    Mobile,
}

impl InboundType {
    fn from_tracestate_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(InboundType::App),
            "1" => Some(InboundType::Browser),
            "2" => Some(InboundType::Mobile),
            _ => None,
        }
    }

    pub fn tracestate_code(self) -> u8 {
        match self {
            InboundType::App => 0,
            InboundType::Browser => 1,
            InboundType::Mobile => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InboundType::App => "App",
            InboundType::Browser => "Browser",
            InboundType::Mobile => "Mobile",
        }
    }
}

/// The parsed content of the `"<trusted_key>@nr"` vendor entry: `version-
/// parentType-account-app-spanId-txnId-sampled-priority-timestamp` (spec.md
/// §4.5, point 2). Every field may be empty in the wire format; empty
/// numeric/bool fields parse to `None`/`false`.
#[derive(Clone, Debug, PartialEq)]
pub struct NrTraceStateEntry {
    pub parent_type: InboundType,
    pub account_id: String,
    pub app_id: String,
    pub span_id: String,
    pub txn_id: String,
    pub sampled: bool,
    pub priority: Option<f64>,
    pub timestamp_ms: u64,
}

fn parse_nr_entry(value: &str) -> Option<NrTraceStateEntry> {
    let fields: Vec<&str> = value.split('-').collect();
    if fields.len() < 9 {
        return None;
    }
    let parent_type = InboundType::from_tracestate_code(fields[1])?;
    let sampled = match fields[6] {
        "" => false,
        "0" => false,
        "1" => true,
        _ => return None,
    };
    let priority = if fields[7].is_empty() {
        None
    } else {
        fields[7].parse::<f64>().ok()
    };
    let timestamp_ms = fields[8].parse::<u64>().unwrap_or(0);

    Some(NrTraceStateEntry {
        parent_type,
        account_id: fields[2].to_owned(),
        app_id: fields[3].to_owned(),
        span_id: fields[4].to_owned(),
        txn_id: fields[5].to_owned(),
        sampled,
        priority,
        timestamp_ms,
    })
}

/// Outcome of parsing a `tracestate` header: either a found-and-valid NR
/// entry, a found-but-invalid one, or no NR entry at all, plus the other
/// vendors' entries preserved verbatim (bounded to 31, sorted, excluding
/// the NR entry itself — spec.md §4.5, point 2).
pub struct ParsedTraceState {
    pub nr_entry: Option<NrTraceStateEntry>,
    pub nr_entry_invalid: bool,
    pub other_vendors: Vec<String>,
}

const MAX_OTHER_VENDORS: usize = 31;

pub fn parse_tracestate(value: &str, trusted_key: &str) -> ParsedTraceState {
    let nr_key = format!("{trusted_key}@nr");
    let mut nr_entry = None;
    let mut nr_entry_invalid = false;
    let mut others = Vec::new();

    for entry in value.split(',') {
        let entry = entry.trim();
        let Some((key, val)) = entry.split_once('=') else {
            continue;
        };
        if key == nr_key {
            match parse_nr_entry(val) {
                Some(parsed) => nr_entry = Some(parsed),
                None => nr_entry_invalid = true,
            }
        } else if !entry.is_empty() {
            others.push(entry.to_owned());
        }
    }

    others.sort();
    others.truncate(MAX_OTHER_VENDORS);

    ParsedTraceState {
        nr_entry,
        nr_entry_invalid,
        other_vendors: others,
    }
}

/// Builds the outbound `tracestate` value: this account's NR entry,
/// followed by any preserved inbound vendor entries, comma-joined (spec.md
/// §4.5, "Create outbound (W3C)").
#[allow(clippy::too_many_arguments)]
pub fn format_tracestate(
    trusted_key: &str,
    account_id: &str,
    app_id: &str,
    span_id: SpanId,
    txn_guid: &str,
    sampled: bool,
    priority: f64,
    now_ms: u64,
    preserved_vendors: &[String],
) -> String {
    let nr_entry = format!(
        "{trusted_key}@nr=0-0-{account_id}-{app_id}-{span_id}-{txn_guid}-{}-{priority:.6}-{now_ms}",
        if sampled { 1 } else { 0 }
    );
    if preserved_vendors.is_empty() {
        nr_entry
    } else {
        format!("{nr_entry},{}", preserved_vendors.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_traceparent() {
        let tp = parse_traceparent(
            "00-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01",
        )
        .unwrap();
        assert_eq!(tp.version, 0);
        assert!(tp.sampled());
        assert_eq!(format!("{}", tp.trace_id), "74be672b84ddc4e4b28be285632bbc0a");
        assert_eq!(format!("{}", tp.parent_id), "27ddd2d8890283b4");
    }

    #[test]
    fn rejects_version_ff() {
        assert!(parse_traceparent(
            "ff-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01"
        )
        .is_err());
    }

    #[test]
    fn unknown_version_flags_forced_to_zero() {
        let tp = parse_traceparent(
            "01-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-09-extra",
        )
        .unwrap();
        assert_eq!(tp.version, 1);
        assert!(!tp.sampled());
    }

    #[test]
    fn version_00_rejects_extra_fields() {
        assert!(parse_traceparent(
            "00-74be672b84ddc4e4b28be285632bbc0a-27ddd2d8890283b4-01-extra"
        )
        .is_err());
    }

    #[test]
    fn rejects_uppercase_hex() {
        assert!(parse_traceparent(
            "00-74BE672B84DDC4E4B28BE285632BBC0A-27ddd2d8890283b4-01"
        )
        .is_err());
    }

    #[test]
    fn parses_nr_tracestate_entry_from_spec_scenario() {
        let parsed = parse_tracestate(
            "123@nr=0-2-account-app-span-transaction-1-1.1273-1529445826000, am=…",
            "123",
        );
        let nr = parsed.nr_entry.unwrap();
        assert_eq!(nr.parent_type, InboundType::Mobile);
        assert_eq!(nr.account_id, "account");
        assert_eq!(nr.app_id, "app");
        assert_eq!(nr.span_id, "span");
        assert_eq!(nr.txn_id, "transaction");
        assert!(nr.sampled);
        assert_eq!(nr.priority, Some(1.1273));
        assert_eq!(parsed.other_vendors, vec!["am=…".to_string()]);
    }

    #[test]
    fn missing_nr_entry_reports_no_entry_not_invalid() {
        let parsed = parse_tracestate("other=1,another=2", "123");
        assert!(parsed.nr_entry.is_none());
        assert!(!parsed.nr_entry_invalid);
        assert_eq!(parsed.other_vendors, vec!["another=2", "other=1"]);
    }

    #[test]
    fn malformed_nr_entry_reports_invalid() {
        let parsed = parse_tracestate("123@nr=garbage", "123");
        assert!(parsed.nr_entry.is_none());
        assert!(parsed.nr_entry_invalid);
    }

    #[test]
    fn other_vendors_bounded_to_31_sorted() {
        let many: Vec<String> = (0..40).map(|i| format!("v{i:02}=x")).collect();
        let parsed = parse_tracestate(&many.join(","), "123");
        assert_eq!(parsed.other_vendors.len(), 31);
        assert_eq!(parsed.other_vendors[0], "v00=x");
    }
}
