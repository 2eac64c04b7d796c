//! Ordered list of path-prefix patterns with first-match extraction.
//!
//! Grounded in `axiom/util_matcher.c`/`util_matcher_private.h`: prefixes are
//! normalized at insert time (trailing slashes trimmed, a single trailing
//! slash appended), and matching searches case-insensitively but returns a
//! slice of the original-case input, per spec.md §9's resolution of the
//! matcher's documented case-folding quirk. Used by the request-URI namer
//! (spec.md §4.7) to extract the first path segment after a configured
//! prefix (e.g. `/api/` → the route name following it).

/// A single normalized prefix: lower-case for searching, stored with its
/// length so the match site can be computed without re-scanning.
struct Prefix {
    lower: String,
}

/// An ordered list of prefixes; [`Matcher::match_str`] tries each in
/// insertion order and returns the first hit.
#[derive(Default)]
pub struct Matcher {
    prefixes: Vec<Prefix>,
}

impl Matcher {
    pub fn new() -> Self {
        Matcher::default()
    }

    /// Adds `prefix` to the end of the match list. Trailing slashes are
    /// trimmed and a single trailing slash is appended, so `"/foo"`,
    /// `"/foo/"`, and `"/foo//"` all normalize to the same `"/foo/"` prefix.
    pub fn add_prefix(&mut self, prefix: &str) {
        let trimmed = prefix.trim_end_matches('/');
        let mut lower = trimmed.to_ascii_lowercase();
        lower.push('/');
        self.prefixes.push(Prefix { lower });
    }

    /// Matches `input` against the first prefix that appears (case
    /// insensitively) anywhere in it, then returns the first path segment
    /// following the match site, in the input's original case.
    pub fn match_str(&self, input: &str) -> Option<String> {
        self.match_internal(input, false)
    }

    /// Like [`Matcher::match_str`], but returns the *last* path segment of
    /// the remainder instead of the first (`nr_matcher_match_core`).
    pub fn match_core(&self, input: &str) -> Option<String> {
        self.match_internal(input, true)
    }

    fn match_internal(&self, input: &str, core: bool) -> Option<String> {
        if input.is_empty() {
            return None;
        }
        let input_lc = input.to_ascii_lowercase();
        for prefix in &self.prefixes {
            let Some(byte_pos) = input_lc.find(prefix.lower.as_str()) else {
                continue;
            };
            let after = byte_pos + prefix.lower.len();
            let remainder = &input[after..];
            return Some(if core {
                match remainder.rfind('/') {
                    Some(slash) => remainder[slash + 1..].to_owned(),
                    None => remainder.to_owned(),
                }
            } else {
                match remainder.find('/') {
                    Some(slash) => remainder[..slash].to_owned(),
                    None => remainder.to_owned(),
                }
            });
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_match_on_empty_or_missing_prefix() {
        let mut m = Matcher::new();
        m.add_prefix("/foo");
        m.add_prefix("/bar//");
        assert_eq!(m.match_str(""), None);
        assert_eq!(m.match_str("foo"), None);
        assert_eq!(m.match_str("/bar"), None);
    }

    #[test]
    fn first_match_wins_and_trailing_slashes_normalize() {
        let mut m = Matcher::new();
        m.add_prefix("/foo");
        m.add_prefix("/bar//");

        assert_eq!(
            m.match_str("/foo/baz/quux").as_deref(),
            Some("baz")
        );
        assert_eq!(
            m.match_str("/foo/baz//quux").as_deref(),
            Some("baz")
        );
        assert_eq!(m.match_str("/bar/xxx").as_deref(), Some("xxx"));
    }

    #[test]
    fn match_returns_first_segment_after_prefix() {
        let mut m = Matcher::new();
        m.add_prefix("/foo/bar");

        assert_eq!(m.match_str("/foo/bar/quux").as_deref(), Some("quux"));
        assert_eq!(m.match_str("/foo/bar//quux").as_deref(), Some(""));
        assert_eq!(
            m.match_str("/foo/bar/quux/baz").as_deref(),
            Some("quux")
        );
    }

    #[test]
    fn match_core_returns_last_segment_of_remainder() {
        let mut m = Matcher::new();
        m.add_prefix("/foo/bar");

        assert_eq!(m.match_core("/foo/bar/quux").as_deref(), Some("quux"));
        assert_eq!(
            m.match_core("/foo/bar/quux/baz").as_deref(),
            Some("baz")
        );
    }

    #[test]
    fn search_is_case_insensitive_but_returns_original_case() {
        let mut m = Matcher::new();
        m.add_prefix("/API");
        assert_eq!(m.match_str("/api/Orders").as_deref(), Some("Orders"));
    }
}
