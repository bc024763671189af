//! Query filters for the event log.
//!
//! Store-level subject filtering deliberately uses a coarser dialect than the
//! live Subject Matcher: wildcard tokens become SQL `LIKE` `%`, which also spans
//! `.` boundaries. Queries run against the persisted log, so an over-broad
//! match costs a few extra rows rather than a misdelivered live message.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use hubcast_core::CorrelationId;
use hubcast_events::subject::{self, SUBJECT_DELIMITER, SINGLE_WILDCARD, SubjectError, TAIL_WILDCARD};

/// Largest page a single query may request.
pub const MAX_LIMIT: u32 = 1000;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_LIMIT: u32 = 100;

/// Escape character used in generated `LIKE` patterns.
pub const LIKE_ESCAPE: char = '\\';

/// Rejected before the store is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("limit must be between 1 and {MAX_LIMIT}, got {0}")]
    LimitOutOfRange(i64),

    #[error("'since' must not be after 'until'")]
    InvertedRange,

    #[error("invalid subject pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: SubjectError,
    },
}

/// Hard cap on the number of returned events (1..=1000).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QueryLimit(u32);

impl QueryLimit {
    /// Out-of-range values are rejected, never clamped.
    pub fn new(limit: i64) -> Result<Self, QueryError> {
        if limit < 1 || limit > i64::from(MAX_LIMIT) {
            return Err(QueryError::LimitOutOfRange(limit));
        }
        Ok(Self(limit as u32))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for QueryLimit {
    fn default() -> Self {
        Self(DEFAULT_LIMIT)
    }
}

/// Subject filter in the store's `LIKE` dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilter {
    like: String,
}

impl SubjectFilter {
    /// Translate a client wildcard pattern (`graph.*.created`, `graph.>`).
    ///
    /// Returns `None` for the match-everything patterns `*` and `>`.
    pub fn from_wildcard(pattern: &str) -> Result<Option<Self>, QueryError> {
        subject::validate_pattern(pattern, SUBJECT_DELIMITER).map_err(|source| {
            QueryError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        if pattern == SINGLE_WILDCARD || pattern == TAIL_WILDCARD {
            return Ok(None);
        }

        let like = pattern
            .split(SUBJECT_DELIMITER)
            .map(|token| match token {
                SINGLE_WILDCARD | TAIL_WILDCARD => "%".to_string(),
                literal => escape_like(literal),
            })
            .collect::<Vec<_>>()
            .join(".");

        Ok(Some(Self { like }))
    }

    /// The raw `LIKE` pattern (escape character: `\`).
    pub fn as_like(&self) -> &str {
        &self.like
    }

    /// Evaluate the `LIKE` pattern in-process.
    pub fn matches(&self, subject: &str) -> bool {
        like_matches(&parse_like(&self.like), subject)
    }
}

/// Filter criteria for event queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub subject: Option<SubjectFilter>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub correlation_id: Option<CorrelationId>,
    pub limit: QueryLimit,
}

impl EventFilter {
    pub fn accepts(&self, subject: &str, timestamp: DateTime<Utc>, correlation_id: &CorrelationId) -> bool {
        if let Some(f) = &self.subject {
            if !f.matches(subject) {
                return false;
            }
        }
        if self.since.is_some_and(|since| timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| timestamp > until) {
            return false;
        }
        if let Some(expected) = &self.correlation_id {
            if expected != correlation_id {
                return false;
            }
        }
        true
    }
}

fn escape_like(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LikeToken {
    AnySeq,
    AnyChar,
    Lit(char),
}

fn parse_like(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        let token = match c {
            LIKE_ESCAPE => LikeToken::Lit(chars.next().unwrap_or(LIKE_ESCAPE)),
            '%' => LikeToken::AnySeq,
            '_' => LikeToken::AnyChar,
            other => LikeToken::Lit(other),
        };
        tokens.push(token);
    }
    tokens
}

fn like_matches(pattern: &[LikeToken], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let (mut ti, mut pi) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some(LikeToken::AnySeq) => {
                backtrack = Some((pi, ti));
                pi += 1;
            }
            Some(LikeToken::AnyChar) => {
                pi += 1;
                ti += 1;
            }
            Some(LikeToken::Lit(c)) if *c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    pi = star + 1;
                    ti = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|t| *t == LikeToken::AnySeq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_bounds_are_enforced_not_clamped() {
        assert!(matches!(QueryLimit::new(0), Err(QueryError::LimitOutOfRange(0))));
        assert!(matches!(QueryLimit::new(1001), Err(QueryError::LimitOutOfRange(1001))));
        assert!(matches!(QueryLimit::new(-3), Err(QueryError::LimitOutOfRange(-3))));
        assert_eq!(QueryLimit::new(1).unwrap().get(), 1);
        assert_eq!(QueryLimit::new(1000).unwrap().get(), 1000);
        assert_eq!(QueryLimit::default().get(), DEFAULT_LIMIT);
    }

    #[test]
    fn wildcards_translate_to_like() {
        let f = SubjectFilter::from_wildcard("graph.*.created").unwrap().unwrap();
        assert_eq!(f.as_like(), "graph.%.created");

        let f = SubjectFilter::from_wildcard("graph.>").unwrap().unwrap();
        assert_eq!(f.as_like(), "graph.%");

        assert!(SubjectFilter::from_wildcard(">").unwrap().is_none());
        assert!(SubjectFilter::from_wildcard("*").unwrap().is_none());
        assert!(SubjectFilter::from_wildcard("a.>.b").is_err());
    }

    #[test]
    fn like_percent_spans_dots() {
        let f = SubjectFilter::from_wildcard("graph.*.created").unwrap().unwrap();
        assert!(f.matches("graph.node.created"));
        // Coarser than the live matcher on purpose.
        assert!(f.matches("graph.node.child.created"));
        assert!(!f.matches("graph.node.deleted"));
    }

    #[test]
    fn literal_like_metacharacters_are_escaped() {
        let f = SubjectFilter::from_wildcard("job_queue.100%").unwrap().unwrap();
        assert_eq!(f.as_like(), "job\\_queue.100\\%");
        assert!(f.matches("job_queue.100%"));
        assert!(!f.matches("jobXqueue.100%"));
        assert!(!f.matches("job_queue.1000"));
    }

    #[test]
    fn backtracking_handles_repeated_prefixes() {
        let tokens = parse_like("a%ab");
        assert!(like_matches(&tokens, "aaab"));
        assert!(like_matches(&tokens, "aab"));
        assert!(!like_matches(&tokens, "aba"));
        assert!(like_matches(&parse_like("%"), ""));
        assert!(!like_matches(&parse_like("_"), ""));
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let t = Utc::now();
        let cid = CorrelationId::generate();
        let filter = EventFilter {
            since: Some(t),
            until: Some(t),
            ..Default::default()
        };
        assert!(filter.accepts("a.b", t, &cid));
        assert!(!filter.accepts("a.b", t + chrono::Duration::milliseconds(1), &cid));
        assert!(!filter.accepts("a.b", t - chrono::Duration::milliseconds(1), &cid));
    }
}
