//! Append-only event store boundary.
//!
//! The store is the durable half of the hub: every published event lands here
//! before anything is announced on the bus.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::{DEFAULT_LIMIT, EventFilter, MAX_LIMIT, QueryError, QueryLimit, SubjectFilter};
pub use r#trait::{EventStore, EventStoreError};
