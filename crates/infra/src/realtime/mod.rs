//! Live client transports.
//!
//! Both transports sit on one generic [`ConnectionRegistry`]; they differ only
//! in frame type and in how patterns are chosen.

pub mod catch_up;
pub mod frames;
pub mod registry;
pub mod socket;
pub mod stream;

pub use catch_up::{CATCH_UP_TRUNCATED, catch_up};
pub use frames::{ClientAction, ClientFrame, ProtocolError, ServerFrame, StreamFrame};
pub use registry::{ConnectionRegistry, ConnectionSnapshot, TransportKind};
pub use socket::SocketRegistry;
pub use stream::{BUS_UNAVAILABLE_WARNING, StreamRegistry, StreamSession};
