use std::fmt;
use std::sync::Arc;

use hubcast_events::subject::{SUBJECT_DELIMITER, TOPIC_DELIMITER};

type TopicBuilder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Maps subjects starting with `prefix` to a client topic.
///
/// The builder receives the full subject and may decline (`None`).
#[derive(Clone)]
pub struct TopicRule {
    prefix: String,
    builder: TopicBuilder,
}

impl TopicRule {
    pub fn new<F>(prefix: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            prefix: prefix.into(),
            builder: Arc::new(builder),
        }
    }

    /// `<family>:<event type>`, where the event type is the last subject token.
    pub fn event_type(prefix: impl Into<String>, family: impl Into<String>) -> Self {
        let family = family.into();
        Self::new(prefix, move |subject| {
            let event_type = subject.rsplit(SUBJECT_DELIMITER).next().filter(|t| !t.is_empty())?;
            Some(format!("{family}{TOPIC_DELIMITER}{event_type}"))
        })
    }

    /// Always the same topic.
    pub fn fixed(prefix: impl Into<String>, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self::new(prefix, move |_| Some(topic.clone()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn apply(&self, subject: &str) -> Option<String> {
        if !self.covers(subject) {
            return None;
        }
        (self.builder)(subject)
    }

    /// Prefixes match whole tokens: `graph.invalidated` covers itself and
    /// `graph.invalidated.<...>`, never `graph.invalidatedX`.
    fn covers(&self, subject: &str) -> bool {
        match subject.strip_prefix(self.prefix.as_str()) {
            None => false,
            Some(rest) => {
                self.prefix.is_empty()
                    || self.prefix.ends_with(SUBJECT_DELIMITER)
                    || rest.is_empty()
                    || rest.starts_with(SUBJECT_DELIMITER)
            }
        }
    }
}

impl fmt::Debug for TopicRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRule").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

/// Graph change notifications.
pub fn default_rules() -> Vec<TopicRule> {
    vec![
        TopicRule::event_type("graph.node.", "entity"),
        TopicRule::event_type("graph.edge.", "edge"),
        TopicRule::fixed("graph.invalidated", "graph:invalidated"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match(subject: &str) -> Option<String> {
        default_rules().iter().find_map(|r| r.apply(subject))
    }

    #[test]
    fn default_rules_map_graph_subjects() {
        assert_eq!(first_match("graph.node.created").as_deref(), Some("entity:created"));
        assert_eq!(first_match("graph.edge.deleted").as_deref(), Some("edge:deleted"));
        assert_eq!(first_match("graph.invalidated").as_deref(), Some("graph:invalidated"));
        assert_eq!(first_match("billing.invoice.paid"), None);
    }

    #[test]
    fn prefix_must_match_from_the_start() {
        assert_eq!(first_match("hub.graph.node.created"), None);
    }

    #[test]
    fn prefixes_match_whole_tokens() {
        assert_eq!(first_match("graph.invalidated.subtree").as_deref(), Some("graph:invalidated"));
        assert_eq!(first_match("graph.invalidatedX"), None);
        assert_eq!(first_match("graph.nodes.created"), None);
    }

    #[test]
    fn custom_builders_may_decline() {
        let rule = TopicRule::new("jobs.", |s| s.ends_with(".done").then(|| "jobs:done".to_string()));
        assert_eq!(rule.apply("jobs.42.done").as_deref(), Some("jobs:done"));
        assert_eq!(rule.apply("jobs.42.started"), None);
    }
}
