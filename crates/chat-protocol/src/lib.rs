//! # chat-protocol: Agent Chat Contract
//!
//! This crate defines the shared types, error taxonomy, and broker ports that
//! the agent chat core, its transports, and its tool surface depend on.
//!
//! It is intentionally dependency-light (no tokio, no NATS client) so it can
//! be used as a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`channel`]: `Channel` sum type and the static channel registry
//! - [`envelope`]: `MessageEnvelope`, the persisted wire form of a message
//! - [`names`]: Typed stream, subject, and consumer names
//! - [`ports`]: Transport boundary (`BrokerPort`, `BrokerConnector`)
//! - [`tool`]: `ToolCall`, `ToolOutcome`
//! - [`error`]: `ChatError`, `BrokerError`

pub mod channel;
pub mod envelope;
pub mod error;
pub mod names;
pub mod ports;
pub mod tool;

// Re-export the most commonly used types at the crate root.
pub use channel::{Channel, ChannelInfo};
pub use envelope::{DecodeError, MessageEnvelope};
pub use error::{BrokerError, BrokerResult, ChatError, ChatResult};
pub use names::{ConsumerName, StreamName, SubjectName};
pub use ports::{
    BrokerConnector, BrokerPort, ConsumerSpec, DeliverFrom, FetchRequest, PublishReceipt,
    RetentionLimits, StoredMessage, StreamSpec, StreamState,
};
pub use tool::{ToolCall, ToolOutcome};
