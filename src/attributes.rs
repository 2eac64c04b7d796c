//! Key→value attribute store with per-attribute destination bitmask and
//! configurable include/exclude filters.
//!
//! Grounded in spec.md §4.8; the destination bitmask follows the same
//! `bitflags`-driven approach as [`crate::metric::MetricFlags`]. Filters are
//! modeled on the agent's common "attribute include/exclude" configuration
//! surface: a prefix pattern (optionally `*`-suffixed) paired with the
//! destinations it adds or removes, applied most-specific-match-wins so a
//! narrower include can re-admit a key an earlier broad exclude removed.
use bitflags::bitflags;
use serde_json::Value as Json;
use std::collections::BTreeMap;

bitflags! {
    /// Destinations an attribute may be forwarded to. Named after spec.md
    /// §3/§4.8's five destinations.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Destinations: u8 {
        const TRACE       = 0b0000_0001;
        const ERROR       = 0b0000_0010;
        const TXN_EVENT   = 0b0000_0100;
        const SPAN_EVENT  = 0b0000_1000;
        const BROWSER     = 0b0001_0000;
        const ALL = Self::TRACE.bits() | Self::ERROR.bits() | Self::TXN_EVENT.bits()
            | Self::SPAN_EVENT.bits() | Self::BROWSER.bits();
    }
}

/// An attribute's value. Mirrors the small set of JSON-representable scalar
/// types the wire formats in spec.md §6 need.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn to_json(&self) -> Json {
        match self {
            AttributeValue::String(s) => Json::String(s.clone()),
            AttributeValue::Int(i) => Json::from(*i),
            AttributeValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            AttributeValue::Bool(b) => Json::Bool(*b),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_owned())
    }
}
impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}
impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}
impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}
impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// A single include/exclude filter rule. `pattern` is either an exact key or
/// a `*`-suffixed prefix (`"request.parameters.*"`).
#[derive(Clone, Debug)]
struct FilterRule {
    pattern: String,
    destinations: Destinations,
    include: bool,
}

impl FilterRule {
    fn matches(&self, key: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == self.pattern,
        }
    }

    /// Longer (more specific) patterns win ties; an exact match is always
    /// more specific than any wildcard.
    fn specificity(&self) -> usize {
        self.pattern.len()
    }
}

/// Precomputed include/exclude configuration, applied when an attribute is
/// added to resolve its effective destination mask.
#[derive(Clone, Debug, Default)]
pub struct AttributeFilterConfig {
    rules: Vec<FilterRule>,
}

impl AttributeFilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule removing `destinations` from keys matching `pattern`.
    pub fn exclude(&mut self, pattern: impl Into<String>, destinations: Destinations) -> &mut Self {
        self.rules.push(FilterRule {
            pattern: pattern.into(),
            destinations,
            include: false,
        });
        self
    }

    /// Adds a rule adding `destinations` to keys matching `pattern`,
    /// overriding a broader exclude for the same destinations.
    pub fn include(&mut self, pattern: impl Into<String>, destinations: Destinations) -> &mut Self {
        self.rules.push(FilterRule {
            pattern: pattern.into(),
            destinations,
            include: true,
        });
        self
    }

    /// Resolves the effective destination mask for `key`, starting from
    /// `default_mask` and applying every matching rule in increasing order
    /// of specificity so the most specific rule has the final word for the
    /// destination bits it names.
    pub fn resolve(&self, key: &str, default_mask: Destinations) -> Destinations {
        let mut matches: Vec<&FilterRule> = self.rules.iter().filter(|r| r.matches(key)).collect();
        matches.sort_by_key(|r| r.specificity());
        let mut mask = default_mask;
        for rule in matches {
            if rule.include {
                mask |= rule.destinations;
            } else {
                mask &= !rule.destinations;
            }
        }
        mask
    }
}

/// A key→(value, destinations) store. High-security transactions refuse all
/// user-custom additions (spec.md §4.8); LASP policy is applied by the
/// caller before constructing the filter config, not inside this type.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    values: BTreeMap<String, (AttributeValue, Destinations)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or overwrites `key` with `value`, restricted to `destinations`.
    /// Returns `false` (and does nothing) if `high_security` is set, per
    /// spec.md §4.8's prohibition on user-custom attributes in that mode.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
        destinations: Destinations,
        high_security: bool,
    ) -> bool {
        if high_security {
            return false;
        }
        self.values.insert(key.into(), (value.into(), destinations));
        true
    }

    /// Adds an attribute whose destination mask is already resolved (used
    /// internally by segment/typed-attribute emission, which is never
    /// subject to the high-security user-custom restriction).
    pub fn set_internal(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
        destinations: Destinations,
    ) {
        self.values.insert(key.into(), (value.into(), destinations));
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key).map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates key-sorted `(key, value)` pairs whose mask includes
    /// `destination`, matching the trace JSON's key-sorted attribute maps
    /// (spec.md §4.4).
    pub fn for_destination(&self, destination: Destinations) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.values
            .iter()
            .filter(move |(_, (_, mask))| mask.contains(destination))
            .map(|(k, (v, _))| (k.as_str(), v))
    }

    /// Builds a `serde_json::Map` (insertion order already key-sorted, since
    /// the backing store is a `BTreeMap`) of the attributes visible to
    /// `destination`.
    pub fn to_json_map(&self, destination: Destinations) -> serde_json::Map<String, Json> {
        self.for_destination(destination)
            .map(|(k, v)| (k.to_owned(), v.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_security_rejects_user_attributes() {
        let mut attrs = Attributes::new();
        assert!(!attrs.set("key", "value", Destinations::ALL, true));
        assert!(attrs.is_empty());
    }

    #[test]
    fn destination_filter_selects_matching_attributes() {
        let mut attrs = Attributes::new();
        attrs.set("a", "1", Destinations::TRACE | Destinations::ERROR, false);
        attrs.set("b", "2", Destinations::ERROR, false);

        let trace: Vec<_> = attrs.for_destination(Destinations::TRACE).collect();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].0, "a");
    }

    #[test]
    fn more_specific_include_overrides_broad_exclude() {
        let mut cfg = AttributeFilterConfig::new();
        cfg.exclude("request.headers.*", Destinations::BROWSER);
        cfg.include("request.headers.referer", Destinations::BROWSER);

        let broad = cfg.resolve("request.headers.cookie", Destinations::ALL);
        assert!(!broad.contains(Destinations::BROWSER));

        let narrow = cfg.resolve("request.headers.referer", Destinations::ALL);
        assert!(narrow.contains(Destinations::BROWSER));
    }

    #[test]
    fn json_map_is_key_sorted() {
        let mut attrs = Attributes::new();
        attrs.set("zeta", "z", Destinations::TRACE, false);
        attrs.set("alpha", "a", Destinations::TRACE, false);
        let map = attrs.to_json_map(Destinations::TRACE);
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }
}
