//! Bus-to-client fan-out.
//!
//! Internal subjects (`graph.node.created`) are translated into client topics
//! (`entity:created:<tenant>`) and pushed to every registered [`TopicSink`].

pub mod bridge;
pub mod rules;

pub use bridge::{FanoutBridge, TopicSink};
pub use rules::{TopicRule, default_rules};
