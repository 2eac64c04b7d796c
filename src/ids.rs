//! Trace and span identifiers.
//!
//! Modeled on the teacher's `opentelemetry::trace::{TraceId, SpanId}`: fixed
//! width integers with lower-hex `Display`/`Debug` and fallible hex parsing.
use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;
use std::num::ParseIntError;

/// A 16-byte value identifying a single transaction's distributed trace.
///
/// Valid trace ids contain at least one non-zero byte; [`TraceId::INVALID`]
/// is the all-zero id used when no distributed trace has been established.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    pub const INVALID: TraceId = TraceId(0);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(u128::from_be_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Parses a 32-hex-character (or shorter) lowercase trace id.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u128::from_str_radix(hex, 16).map(TraceId)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Left-pads a 16-hex transaction guid to the 32-hex trace-id form used
    /// when no inbound distributed trace was accepted (spec.md §4.5).
    pub fn from_guid_padded(guid: &str) -> Self {
        Self::from_hex(&format!("{guid:0>32}")).unwrap_or(Self::INVALID)
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// An 8-byte value identifying a single segment (span).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    pub const INVALID: SpanId = SpanId(0);

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(u64::from_be_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex, 16).map(SpanId)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Generates random trace/span/guid identifiers.
///
/// Mirrors `opentelemetry_sdk::trace::RandomIdGenerator`: a thread-local
/// `SmallRng` seeded from the OS, avoiding a global lock on the hot path of
/// `segment_start`.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn new_trace_id(&self) -> TraceId;
    fn new_span_id(&self) -> SpanId;
    /// A 16-hex transaction guid; shares representation with [`SpanId`] but
    /// is semantically the transaction's own identifier, not a segment's.
    fn new_txn_guid(&self) -> String {
        self.new_span_id().to_string()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_rng(&mut rand::rng()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_round_trips_hex() {
        let id = TraceId::from_hex("74be672b84ddc4e4b28be285632bbc0a").unwrap();
        assert_eq!(format!("{id}"), "74be672b84ddc4e4b28be285632bbc0a");
    }

    #[test]
    fn span_id_invalid_is_zero() {
        assert!(!SpanId::INVALID.is_valid());
        assert!(SpanId::from_hex("27ddd2d8890283b4").unwrap().is_valid());
    }

    #[test]
    fn guid_padded_to_32_hex() {
        let t = TraceId::from_guid_padded("27ddd2d8890283b4");
        assert_eq!(format!("{t}"), "0000000000000000".to_owned() + "27ddd2d8890283b4");
    }

    #[test]
    fn random_generator_produces_distinct_ids() {
        let gen = RandomIdGenerator::default();
        let a = gen.new_trace_id();
        let b = gen.new_trace_id();
        assert_ne!(format!("{a}"), format!("{b}"));
        assert!(gen.new_span_id().is_valid());
    }
}
