//! Applies path-type priority, URL rules, transaction rules, and
//! segment-term whitelists to produce the final transaction name (spec.md
//! §4.7).
//!
//! Grounded in spec.md §4.7's prose contract; the regex-driven rule chain
//! follows the teacher's own (optional, `trace`-feature-gated) dependency on
//! `regex` (`opentelemetry/Cargo.toml`'s `regex = { version = "1.3", ... }`
//! under `features = ["trace"]`), generalized here from a feature-gated
//! extra into a direct dependency since naming is a required part of this
//! crate's surface. [`crate::matcher::Matcher`] resolves which segment-term
//! whitelist, if any, applies to a given name.
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Path-type priority order (spec.md §4.7): higher variants may overwrite a
/// name set by a lower one, subject to [`Namer::path_is_frozen`] latching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathType {
    Unknown = 0,
    Uri = 1,
    StatusCode = 2,
    Function = 3,
    Action = 4,
    Custom = 5,
}

impl PathType {
    fn kind_label(self) -> &'static str {
        match self {
            PathType::Unknown => "Uri",
            PathType::Uri => "Uri",
            PathType::StatusCode => "StatusCode",
            PathType::Function => "Function",
            PathType::Action => "Action",
            PathType::Custom => "Custom",
        }
    }
}

/// A single URL or transaction naming rule: a regex match against the
/// working name, with an optional replacement, an `ignore` short-circuit
/// (the transaction should not be recorded at all), and `terminate_chain`
/// (stop applying further rules in this rule set once this one matches).
#[derive(Clone, Debug)]
pub struct Rule {
    pub pattern: Regex,
    pub replacement: String,
    pub ignore: bool,
    pub terminate_chain: bool,
    /// Apply repeatedly until the pattern no longer matches, rather than
    /// once. Mirrors the agent's "each segment" rule flag.
    pub repeat: bool,
}

impl Rule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Rule {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
            ignore: false,
            terminate_chain: false,
            repeat: false,
        })
    }

    pub fn ignore(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Rule {
            pattern: Regex::new(pattern)?,
            replacement: String::new(),
            ignore: true,
            terminate_chain: true,
            repeat: false,
        })
    }
}

/// An ordered chain of [`Rule`]s, applied in sequence. Returns `None` if any
/// matched rule is an `ignore` rule.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Applies every matching rule in order, returning the transformed
    /// string, or `None` if an `ignore` rule matched.
    pub fn apply(&self, input: &str) -> Option<String> {
        let mut current = input.to_owned();
        for rule in &self.rules {
            if !rule.pattern.is_match(&current) {
                continue;
            }
            if rule.ignore {
                return None;
            }
            current = if rule.repeat {
                let mut prev = current.clone();
                loop {
                    let next = rule.pattern.replace_all(&prev, rule.replacement.as_str()).into_owned();
                    if next == prev {
                        break next;
                    }
                    prev = next;
                }
            } else {
                rule.pattern.replace_all(&current, rule.replacement.as_str()).into_owned()
            };
            if rule.terminate_chain {
                break;
            }
        }
        Some(current)
    }
}

/// Per-prefix segment-term whitelists (spec.md §4.7, point 3): any path
/// segment after a matched prefix that is not on that prefix's whitelist is
/// replaced with `*`; consecutive `*`s collapse to one.
#[derive(Clone, Debug, Default)]
pub struct SegmentTerms {
    /// Insertion-ordered so first-registered prefix wins ties, matching
    /// [`crate::matcher::Matcher`]'s first-match semantics.
    prefixes: Vec<(String, HashSet<String>)>,
}

impl SegmentTerms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prefix: impl Into<String>, whitelist: impl IntoIterator<Item = String>) {
        self.prefixes.push((prefix.into(), whitelist.into_iter().collect()));
    }

    /// Applies the first matching prefix's whitelist to `input`; returns
    /// `input` unchanged if no prefix matches. A prefix "matches" if it
    /// (slash-delimited on both sides) appears anywhere in `input`,
    /// mirroring [`crate::matcher::Matcher`]'s first-match-anywhere search.
    pub fn apply(&self, input: &str) -> String {
        for (prefix, whitelist) in &self.prefixes {
            let needle = format!("/{}/", prefix.trim_matches('/'));
            let Some(idx) = input.find(&needle) else {
                continue;
            };
            let head_end = idx + needle.len();
            let rest = &input[head_end..];
            if rest.is_empty() {
                return input.to_owned();
            }
            let mut out_segments: Vec<&str> = Vec::new();
            let mut last_was_star = false;
            for segment in rest.split('/') {
                if whitelist.contains(segment) {
                    out_segments.push(segment);
                    last_was_star = false;
                } else if !last_was_star {
                    out_segments.push("*");
                    last_was_star = true;
                }
            }
            return format!("{}{}", &input[..head_end], out_segments.join("/"));
        }
        input.to_owned()
    }
}

/// Applies path-type priority, URL rules, transaction rules and segment
/// terms to produce a final `WebTransaction/<kind>/<name>` or
/// `OtherTransaction/<kind>/<name>` name (spec.md §4.7).
#[derive(Clone, Debug, Default)]
pub struct Namer {
    pub url_rules: RuleSet,
    pub txn_rules: RuleSet,
    pub segment_terms: SegmentTerms,
}

/// Outcome of naming: either a name, or a signal that this transaction
/// should not be recorded (an `ignore` rule fired).
pub enum NameResult {
    Named(String),
    Ignore,
}

impl Namer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names a transaction. `path` is the raw request URI (or the output
    /// of a user-supplied naming function for non-URI path types).
    /// `background` transactions never have URL rules applied (spec.md
    /// §4.7, point 1).
    pub fn name(&self, path: &str, path_type: PathType, background: bool) -> NameResult {
        let mut working = path.to_owned();

        if matches!(path_type, PathType::Uri | PathType::Custom) && !background {
            match self.url_rules.apply(&working) {
                Some(out) => working = out,
                None => return NameResult::Ignore,
            }
        }

        match self.txn_rules.apply(&working) {
            Some(out) => working = out,
            None => return NameResult::Ignore,
        }

        working = self.segment_terms.apply(&working);

        let prefix = if background { "OtherTransaction" } else { "WebTransaction" };
        NameResult::Named(format!("{prefix}/{}/{working}", path_type.kind_label()))
    }
}

/// Tracks whether a transaction's name has latched (spec.md §4.7:
/// "`path_is_frozen` latches the first successful naming; later
/// higher-priority naming replaces the name until end"). Not itself part of
/// [`Namer`] since it is per-transaction mutable state, not naming
/// configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct NameState {
    pub path_type: Option<PathType>,
    pub frozen: bool,
}

impl NameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if a call at `new_type` should be allowed to overwrite the
    /// current name: unset, a strictly higher priority, or the existing
    /// name isn't frozen yet.
    pub fn should_overwrite(&self, new_type: PathType, overwrite_if_unfrozen: bool) -> bool {
        match self.path_type {
            None => true,
            Some(current) => {
                if new_type > current {
                    true
                } else {
                    !self.frozen && overwrite_if_unfrozen
                }
            }
        }
    }

    pub fn record(&mut self, path_type: PathType, freeze: bool) {
        self.path_type = Some(path_type);
        if freeze {
            self.frozen = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_uri_gets_web_transaction_prefix() {
        let namer = Namer::new();
        match namer.name("/orders/42", PathType::Uri, false) {
            NameResult::Named(n) => assert_eq!(n, "WebTransaction/Uri//orders/42"),
            NameResult::Ignore => panic!("should not ignore"),
        }
    }

    #[test]
    fn background_transactions_skip_url_rules_but_not_txn_rules() {
        let mut namer = Namer::new();
        namer.url_rules.push(Rule::ignore(r"^/health$").unwrap());
        namer.txn_rules.push(Rule::new(r"\d+", "*").unwrap());

        // url_rules skipped for background, so the ignore rule never fires.
        match namer.name("/health", PathType::Uri, true) {
            NameResult::Named(n) => assert_eq!(n, "OtherTransaction/Uri//health"),
            NameResult::Ignore => panic!("background should skip url rules"),
        }
    }

    #[test]
    fn ignore_rule_signals_ignore() {
        let mut namer = Namer::new();
        namer.url_rules.push(Rule::ignore(r"^/favicon\.ico$").unwrap());
        assert!(matches!(namer.name("/favicon.ico", PathType::Uri, false), NameResult::Ignore));
    }

    #[test]
    fn segment_terms_collapse_non_whitelisted_segments() {
        let mut terms = SegmentTerms::new();
        terms.add("/api/", ["orders".to_string(), "users".to_string()]);
        assert_eq!(terms.apply("/api/orders/42/items/7"), "/api/orders/*");
    }

    #[test]
    fn name_state_latches_after_freeze() {
        let mut state = NameState::new();
        state.record(PathType::Uri, true);
        assert!(!state.should_overwrite(PathType::Uri, true));
        assert!(state.should_overwrite(PathType::Action, true)); // higher priority still wins
    }

    #[test]
    fn unfrozen_state_can_be_overwritten_at_same_priority() {
        let mut state = NameState::new();
        state.record(PathType::Uri, false);
        assert!(state.should_overwrite(PathType::Uri, true));
    }
}
