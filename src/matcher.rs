//! Decides which rules an inbound data unit fires.
//!
//! Inbound bytes are rendered once, the same way the log shows them:
//! printable text stays text, hex-like text is canonicalised to upper case
//! pairs (`AA 55`) and anything else is hex encoded.
//! Conditions are held against that single rendering.
//! A hex-like condition value is compared in canonical form, but only against
//! a hex rendering, so `0xAA 0x55` matches bytes `[0xAA, 0x55]` and the text
//! `aa:55` while `20` does not match a space.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::{
    encoding,
    error::Error,
    rule::{Condition, ConditionKind, Rule, RuleId},
};

/// Inbound data in the form conditions are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Printable text which does not look like hex.
    Text(String),

    /// Upper case hex pairs.
    Hex(String),
}

impl Rendered {
    /// Render inbound data.
    ///
    /// Text which already looks like hex (as the simulated transports tend to deliver)
    /// is canonicalised instead of hex encoded a second time.
    pub fn new(data: &[u8]) -> Self {
        if !encoding::is_printable(data) {
            return Rendered::Hex(encoding::hex_pairs(data));
        }

        let text = String::from_utf8_lossy(data);

        match encoding::canonical_hex(&text) {
            Some(hex) => Rendered::Hex(hex),
            None => Rendered::Text(text.into_owned()),
        }
    }

    /// The rendering as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Rendered::Text(s) | Rendered::Hex(s) => s,
        }
    }

    /// Check if the data was rendered as hex pairs.
    pub fn is_hex(&self) -> bool {
        matches!(self, Rendered::Hex(_))
    }
}

#[derive(Debug)]
struct CompiledPattern {
    source: String,
    compiled: Result<Regex, String>,
}

/// The outcome of evaluating one inbound data unit.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Every matching rule, in active set order.
    pub matches: Vec<Rule>,

    /// Regex conditions which failed to compile during this evaluation.
    /// A pattern is only reported the first time it is seen.
    pub malformed: Vec<Error>,
}

impl Evaluation {
    /// The rule which gets to respond: the first match.
    pub fn winner(&self) -> Option<&Rule> {
        self.matches.first()
    }

    /// Check if nothing matched.
    pub fn is_miss(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Matches inbound data against rules.
///
/// Keeps compiled regexes around per rule, recompiling only when the pattern changes.
#[derive(Debug, Default)]
pub struct Matcher {
    patterns: HashMap<RuleId, CompiledPattern>,
}

impl Matcher {
    /// A matcher with an empty regex cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate data against the given rules.
    ///
    /// Paused rules are skipped.
    /// The caller is responsible for not calling this while the engine is stopped.
    pub fn evaluate(&mut self, data: &[u8], rules: &[Rule]) -> Evaluation {
        let rendered = Rendered::new(data);
        let mut evaluation = Evaluation::default();

        for rule in rules.iter().filter(|rule| rule.is_active()) {
            let hit = match rule.condition.kind {
                ConditionKind::Contains | ConditionKind::Equals => {
                    literal_match(&rule.condition, &rendered)
                }
                ConditionKind::Regex => {
                    let (regex, newly_failed) = self.regex_for(&rule.id, &rule.condition.value);
                    if let Some(error) = newly_failed {
                        evaluation.malformed.push(error);
                    }
                    regex.map_or(false, |re| re.is_match(rendered.as_str()))
                }
            };

            if hit {
                debug!(rule = %rule.id, "Rule matched");
                evaluation.matches.push(rule.clone());
            }
        }

        evaluation
    }

    /// Drop the cached pattern of a rule which no longer exists.
    pub fn forget(&mut self, id: &RuleId) {
        self.patterns.remove(id);
    }

    fn regex_for(&mut self, id: &RuleId, source: &str) -> (Option<&Regex>, Option<Error>) {
        let stale = self
            .patterns
            .get(id)
            .map_or(true, |pattern| pattern.source != source);

        let mut newly_failed = None;

        if stale {
            let compiled = Regex::new(source).map_err(|e| e.to_string());

            if let Err(problem) = &compiled {
                warn!(rule = %id, %problem, "Malformed regex condition");
                newly_failed = Some(Error::MalformedRegex {
                    rule: id.clone(),
                    problem: problem.clone(),
                });
            }

            self.patterns.insert(
                id.clone(),
                CompiledPattern {
                    source: source.to_owned(),
                    compiled,
                },
            );
        }

        let regex = self
            .patterns
            .get(id)
            .and_then(|pattern| pattern.compiled.as_ref().ok());

        (regex, newly_failed)
    }
}

fn literal_match(condition: &Condition, rendered: &Rendered) -> bool {
    // An empty condition would match everything.
    if condition.value.is_empty() {
        return false;
    }

    let haystack = rendered.as_str();
    let canonical = if rendered.is_hex() {
        encoding::canonical_hex(&condition.value)
    } else {
        None
    };
    let needle = canonical.as_deref().unwrap_or(condition.value.as_str());

    match condition.kind {
        ConditionKind::Contains => haystack.contains(needle),
        ConditionKind::Equals => haystack == needle,
        ConditionKind::Regex => unreachable!("Regex conditions are compiled"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rule::{Action, ActionKind, RuleStatus};

    fn rule(id: &str, kind: ConditionKind, value: &str) -> Rule {
        Rule::new(
            Condition::new(kind, value),
            Action::new(ActionKind::Log, "hit"),
        )
        .with_id(id)
    }

    fn ids(evaluation: &Evaluation) -> Vec<&str> {
        evaluation.matches.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn hex_condition_matches_raw_bytes() {
        let mut matcher = Matcher::new();
        let rules = [rule("r1", ConditionKind::Contains, "0xAA 0x55")];

        let evaluation = matcher.evaluate(&[0x01, 0xAA, 0x55, 0x02], &rules);
        assert_eq!(ids(&evaluation), vec!["r1"]);

        let evaluation = matcher.evaluate(&[0xAA, 0x56], &rules);
        assert!(evaluation.is_miss());
    }

    #[test]
    fn hex_condition_matches_hex_text() {
        let mut matcher = Matcher::new();
        let rules = [rule("r1", ConditionKind::Contains, "0xAA 0x55")];

        let evaluation = matcher.evaluate(b"aa 55 01", &rules);
        assert_eq!(ids(&evaluation), vec!["r1"]);
    }

    #[test]
    fn hex_matching_is_byte_aligned() {
        let mut matcher = Matcher::new();
        let rules = [rule("r1", ConditionKind::Contains, "A5")];

        // Renders as "FA 5B", which does not hold the byte A5.
        let evaluation = matcher.evaluate(&[0xFA, 0x5B], &rules);
        assert!(evaluation.is_miss());
    }

    #[test]
    fn text_contains_and_equals() {
        let mut matcher = Matcher::new();
        let rules = [
            rule("contains", ConditionKind::Contains, "OK"),
            rule("equals", ConditionKind::Equals, "READY"),
        ];

        assert_eq!(ids(&matcher.evaluate(b"+OK\r\n", &rules)), vec!["contains"]);
        assert_eq!(ids(&matcher.evaluate(b"READY", &rules)), vec!["equals"]);
        assert!(matcher.evaluate(b"READY!", &rules).is_miss());
    }

    #[test]
    fn equals_hex() {
        let mut matcher = Matcher::new();
        let rules = [rule("r2", ConditionKind::Equals, "0xFF")];

        assert_eq!(ids(&matcher.evaluate(&[0xFF], &rules)), vec!["r2"]);
        assert!(matcher.evaluate(&[0xFF, 0x00], &rules).is_miss());
    }

    #[test]
    fn first_match_wins_but_all_are_reported() {
        let mut matcher = Matcher::new();
        let rules = [
            rule("first", ConditionKind::Contains, "temp"),
            rule("second", ConditionKind::Regex, r"temp=\d+"),
        ];

        let evaluation = matcher.evaluate(b"temp=21", &rules);

        assert_eq!(ids(&evaluation), vec!["first", "second"]);
        assert_eq!(evaluation.winner().unwrap().id.as_str(), "first");
    }

    #[test]
    fn paused_rules_are_skipped() {
        let mut matcher = Matcher::new();
        let rules = [rule("p", ConditionKind::Contains, "x").with_status(RuleStatus::Paused)];

        assert!(matcher.evaluate(b"x", &rules).is_miss());
    }

    #[test]
    fn empty_condition_never_matches() {
        let mut matcher = Matcher::new();
        let rules = [rule("empty", ConditionKind::Contains, "")];

        assert!(matcher.evaluate(b"anything", &rules).is_miss());
    }

    #[test]
    fn regex_matches_hex_rendering_too() {
        let mut matcher = Matcher::new();
        let rules = [rule("re", ConditionKind::Regex, r"^AA 55")];

        assert_eq!(ids(&matcher.evaluate(&[0xAA, 0x55, 0x10], &rules)), vec!["re"]);
    }

    #[test]
    fn regex_only_sees_text_of_text_data() {
        let mut matcher = Matcher::new();
        let rules = [rule("digit", ConditionKind::Regex, r"\d")];

        // Hex encoded, "hello" would contain digits.
        assert!(matcher.evaluate(b"hello", &rules).is_miss());
        assert_eq!(ids(&matcher.evaluate(b"hello 1", &rules)), vec!["digit"]);
    }

    #[test]
    fn hex_condition_does_not_match_encoded_text() {
        let mut matcher = Matcher::new();
        let rules = [
            rule("space", ConditionKind::Contains, "20"),
            rule("g", ConditionKind::Equals, "47"),
        ];

        assert!(matcher.evaluate(b"hello world", &rules).is_miss());
        assert!(matcher.evaluate(b"G", &rules).is_miss());

        // As bytes they are found.
        assert_eq!(ids(&matcher.evaluate(&[0x01, 0x20], &rules)), vec!["space"]);
    }

    #[test]
    fn hex_like_condition_in_plain_text() {
        let mut matcher = Matcher::new();
        let rules = [rule("word", ConditionKind::Contains, "cafe")];

        // Compared as hex pairs, "CA FE".
        assert_eq!(ids(&matcher.evaluate(b"cafe", &rules)), vec!["word"]);
        // Compared as written.
        assert_eq!(ids(&matcher.evaluate(b"the cafe", &rules)), vec!["word"]);
        assert!(matcher.evaluate(b"the ca fe", &rules).is_miss());
    }

    #[test]
    fn rendering_follows_the_log() {
        assert_eq!(Rendered::new(b"hello"), Rendered::Text("hello".into()));
        assert_eq!(Rendered::new(b"aa:55"), Rendered::Hex("AA 55".into()));
        assert_eq!(Rendered::new(&[0xAA, 0x55]), Rendered::Hex("AA 55".into()));
    }

    #[test]
    fn malformed_regex_is_reported_once() {
        let mut matcher = Matcher::new();
        let rules = [rule("bad", ConditionKind::Regex, "(unclosed")];

        let first = matcher.evaluate(b"(unclosed", &rules);
        assert!(first.is_miss());
        assert_eq!(first.malformed.len(), 1);
        assert!(matches!(
            &first.malformed[0],
            Error::MalformedRegex { rule, .. } if rule.as_str() == "bad"
        ));

        for _ in 0..5 {
            let again = matcher.evaluate(b"(unclosed", &rules);
            assert!(again.is_miss());
            assert!(again.malformed.is_empty());
        }
    }

    #[test]
    fn edited_pattern_is_recompiled() {
        let mut matcher = Matcher::new();

        let bad = [rule("re", ConditionKind::Regex, "[")];
        assert_eq!(matcher.evaluate(b"[", &bad).malformed.len(), 1);

        let fixed = [rule("re", ConditionKind::Regex, r"\[")];
        let evaluation = matcher.evaluate(b"[", &fixed);
        assert!(evaluation.malformed.is_empty());
        assert_eq!(ids(&evaluation), vec!["re"]);
    }
}
