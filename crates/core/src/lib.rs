//! `hubcast-core`: foundation building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::MonotonicClock;
pub use error::{DomainError, DomainResult};
pub use id::{ConnectionId, CorrelationId, EventId, TenantId};
