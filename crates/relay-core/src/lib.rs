//! # relay-core
//!
//! Transport-agnostic core of the chat relay.
//!
//! - [`registry`]: identity ↔ connection bindings behind the
//!   [`ConnectionRegistry`](registry::ConnectionRegistry) trait
//! - [`dispatcher`]: connect / register / message / disconnect handling and
//!   best-effort forwarding
//! - [`protocol`]: JSON frame decoding and encoding
//! - [`ids`]: connection handle and user identity newtypes
//! - [`logging`]: `tracing` subscriber setup and test capture

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod registry;

pub use dispatcher::{ConnectionSink, DeliveryResult, RelayDispatcher};
pub use errors::{ProtocolError, SinkError};
pub use ids::{ConnectionId, UserId};
pub use protocol::{ChatMessage, InboundEvent, OutboundEvent, ReceivedMessage};
pub use registry::{ConnectionRegistry, InMemoryRegistry};
