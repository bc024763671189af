//! Event model and publish/subscribe mechanics.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod subject;
pub mod tenant;

pub use bus::{BusError, BusMessage, BusStatus, BusSubscription, BusSubscriptionId, EventBus};
pub use event::{Event, Origin};
pub use in_memory_bus::InMemoryEventBus;
pub use subject::{SubjectError, matches, matches_topic};
pub use tenant::{DEFAULT_TENANT_KEYS, PayloadTenant, TenantScoped, tenant_from_payload};
