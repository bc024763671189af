//! Wildcard matching for subjects and client topics.
//!
//! Internal subjects are `.`-delimited (`graph.node.created`); client-facing
//! topics are `:`-delimited (`entity:created:1`). Both share one dialect:
//!
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens and is only valid as the last token
//! - a bare `*` or `>` pattern matches anything
//!
//! Matching runs on the hot path for every bus message against every distinct
//! subscribed pattern, so it allocates nothing.

use thiserror::Error;

pub const SUBJECT_DELIMITER: char = '.';
pub const TOPIC_DELIMITER: char = ':';
pub const SINGLE_WILDCARD: &str = "*";
pub const TAIL_WILDCARD: &str = ">";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    #[error("must not be empty")]
    Empty,

    #[error("empty token at position {0}")]
    EmptyToken(usize),

    #[error("'>' is only valid as the final token")]
    MisplacedTail,

    #[error("wildcard token '{0}' is not allowed here")]
    Wildcard(String),
}

/// Match a `.`-delimited subject against a pattern.
pub fn matches(subject: &str, pattern: &str) -> bool {
    matches_with(subject, pattern, SUBJECT_DELIMITER)
}

/// Match a `:`-delimited client topic against a pattern.
pub fn matches_topic(topic: &str, pattern: &str) -> bool {
    matches_with(topic, pattern, TOPIC_DELIMITER)
}

/// Positional token walk shared by subjects and topics.
pub fn matches_with(subject: &str, pattern: &str, delimiter: char) -> bool {
    // Convenience shortcut: a bare wildcard accepts everything, including
    // multi-token subjects. Strict single-token matching needs `*` plus context.
    if pattern == SINGLE_WILDCARD || pattern == TAIL_WILDCARD {
        return true;
    }

    let mut tokens = subject.split(delimiter);
    for expected in pattern.split(delimiter) {
        match expected {
            TAIL_WILDCARD => return tokens.next().is_some(),
            SINGLE_WILDCARD => {
                if tokens.next().is_none() {
                    return false;
                }
            }
            literal => {
                if tokens.next() != Some(literal) {
                    return false;
                }
            }
        }
    }

    // No implicit prefix match.
    tokens.next().is_none()
}

/// Validate a concrete subject: non-empty tokens, no wildcards.
pub fn validate_subject(subject: &str) -> Result<(), SubjectError> {
    if subject.is_empty() {
        return Err(SubjectError::Empty);
    }
    for (idx, token) in subject.split(SUBJECT_DELIMITER).enumerate() {
        if token.is_empty() {
            return Err(SubjectError::EmptyToken(idx));
        }
        if token == SINGLE_WILDCARD || token == TAIL_WILDCARD {
            return Err(SubjectError::Wildcard(token.to_string()));
        }
    }
    Ok(())
}

/// Validate a subscription pattern for the given delimiter.
pub fn validate_pattern(pattern: &str, delimiter: char) -> Result<(), SubjectError> {
    if pattern.is_empty() {
        return Err(SubjectError::Empty);
    }
    let tokens: Vec<&str> = pattern.split(delimiter).collect();
    let last = tokens.len() - 1;
    for (idx, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(SubjectError::EmptyToken(idx));
        }
        if *token == TAIL_WILDCARD && idx != last {
            return Err(SubjectError::MisplacedTail);
        }
    }
    Ok(())
}

/// True if the pattern contains any wildcard token.
pub fn has_wildcards(pattern: &str, delimiter: char) -> bool {
    pattern
        .split(delimiter)
        .any(|t| t == SINGLE_WILDCARD || t == TAIL_WILDCARD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_wildcard_consumes_one_token() {
        assert!(matches("a.b.c", "a.*.c"));
        assert!(!matches("a.b", "a.*.c"));
        assert!(!matches("a.b.x.c", "a.*.c"));
    }

    #[test]
    fn tail_wildcard_needs_at_least_one_token() {
        assert!(matches("a.b", "a.>"));
        assert!(matches("a.b.c.d", "a.>"));
        assert!(!matches("a", "a.>"));
        assert!(!matches("b.c", "a.>"));
    }

    #[test]
    fn bare_wildcards_match_everything() {
        for pattern in ["*", ">"] {
            assert!(matches("a", pattern));
            assert!(matches("a.b.c", pattern));
            assert!(matches_topic("entity:created:1", pattern));
        }
    }

    #[test]
    fn no_implicit_prefix_match() {
        assert!(!matches("a.b.c", "a.b"));
        assert!(!matches("a.b", "a.b.c"));
    }

    #[test]
    fn topics_use_colon_tokens() {
        assert!(matches_topic("entity:created:1", "entity:*:1"));
        assert!(!matches_topic("entity:created:1", "entity:*:2"));
        assert!(!matches_topic("entity:created", "entity:*:1"));
        assert!(matches_topic("entity:created", "entity:>"));
        assert!(matches_topic("entity:created:1", "entity:>"));
        // Dots are literal characters inside a topic token.
        assert!(!matches_topic("entity.created.1", "entity:*:1"));
    }

    #[test]
    fn validate_subject_rejects_bad_shapes() {
        assert_eq!(validate_subject(""), Err(SubjectError::Empty));
        assert_eq!(validate_subject("a..b"), Err(SubjectError::EmptyToken(1)));
        assert_eq!(validate_subject("a.b."), Err(SubjectError::EmptyToken(2)));
        assert!(matches!(validate_subject("a.*"), Err(SubjectError::Wildcard(_))));
        assert!(validate_subject("hub.h1.graph.created").is_ok());
    }

    #[test]
    fn validate_pattern_rejects_misplaced_tail() {
        assert_eq!(validate_pattern("a.>.b", '.'), Err(SubjectError::MisplacedTail));
        assert_eq!(validate_pattern("entity::1", ':'), Err(SubjectError::EmptyToken(1)));
        assert!(validate_pattern("entity:*:1", ':').is_ok());
        assert!(validate_pattern(">", '.').is_ok());
    }

    fn token() -> impl Strategy<Value = String> {
        "[a-z0-9_]{1,6}"
    }

    fn subject() -> impl Strategy<Value = String> {
        prop::collection::vec(token(), 1..6).prop_map(|tokens| tokens.join("."))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: without wildcards, matching is string equality.
        #[test]
        fn literal_patterns_match_only_themselves(s in subject(), p in subject()) {
            prop_assert_eq!(matches(&s, &p), s == p);
            prop_assert!(matches(&s, &s));
        }

        /// Property: `a.>` matches exactly the multi-token subjects under `a.`.
        #[test]
        fn tail_wildcard_is_prefix_match(rest in prop::collection::vec(token(), 0..5), head in token()) {
            let mut tokens = vec![head];
            tokens.extend(rest);
            let s = tokens.join(".");
            let expected = s.starts_with("a.") && tokens.len() >= 2;
            prop_assert_eq!(matches(&s, "a.>"), expected);
        }

        /// Property: replacing any one token with `*` still matches.
        #[test]
        fn star_substitution_still_matches(tokens in prop::collection::vec(token(), 1..6), pick in any::<prop::sample::Index>()) {
            let idx = pick.index(tokens.len());
            let s = tokens.join(".");
            let mut pattern = tokens.clone();
            pattern[idx] = "*".to_string();
            prop_assert!(matches(&s, &pattern.join(".")));
        }
    }
}
