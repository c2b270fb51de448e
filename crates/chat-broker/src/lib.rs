//! Broker transports for agent chat.
//!
//! - [`JetStreamConnector`] / [`JetStreamBroker`]: NATS JetStream
//! - [`MemoryBroker`] / [`MemoryConnection`]: in-process store with the same
//!   stream and consumer semantics
//! - [`ConnectionManager`]: lazily established, reusable connection

mod connection;
mod memory;
mod nats;

pub use connection::{Connection, ConnectionManager, ConnectionStatus};
pub use memory::{MemoryBroker, MemoryConnection, MemoryFaults};
pub use nats::{JetStreamBroker, JetStreamConnector};
