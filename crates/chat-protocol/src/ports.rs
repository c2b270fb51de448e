//! Transport boundary between the chat core and a durable pub/sub store.
//!
//! Object-safety note:
//! - Traits use `async-trait` for async dyn-dispatch.
//! - Connections are handed out as `Arc<dyn BrokerPort>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BrokerResult;
use crate::names::{ConsumerName, StreamName, SubjectName};

/// Count and age bounds; the oldest entries are evicted once either is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionLimits {
    pub max_messages: u64,
    pub max_age: Duration,
}

impl Default for RetentionLimits {
    fn default() -> Self {
        Self {
            max_messages: 10_000,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Requested configuration of a file-backed, limits-retention stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub name: StreamName,
    pub subject: SubjectName,
    pub retention: RetentionLimits,
}

/// Point-in-time view of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub name: StreamName,
    pub messages: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
}

/// Where an ephemeral consumer starts delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliverFrom {
    /// Every retained entry, oldest first.
    All,
    /// Entries with a stream sequence at or after the given one.
    StartSequence(u64),
}

/// A pull consumer with no acknowledgment tracking and a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    pub name: ConsumerName,
    pub deliver: DeliverFrom,
    pub max_deliver: i64,
    /// Server-side reaping of the consumer if it is left behind.
    pub inactive_threshold: Duration,
}

impl ConsumerSpec {
    pub fn ephemeral(name: ConsumerName, deliver: DeliverFrom) -> Self {
        Self {
            name,
            deliver,
            max_deliver: 1,
            inactive_threshold: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub max_messages: usize,
    /// Upper bound on waiting for entries to arrive when the stream is sparse.
    pub expires: Duration,
}

/// A raw stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

/// The store's acknowledgment of a durable publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub stream: StreamName,
    pub sequence: u64,
    pub duplicate: bool,
}

#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Whether the underlying connection still reports itself usable.
    fn is_open(&self) -> bool;

    /// Create a stream. An existing stream with a differing configuration
    /// yields [`BrokerError::StreamExists`](crate::BrokerError::StreamExists).
    async fn create_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamState>;

    async fn stream_state(&self, name: &StreamName) -> BrokerResult<StreamState>;

    /// Append a payload and wait for the store's acknowledgment.
    async fn publish(&self, subject: &SubjectName, payload: Vec<u8>)
    -> BrokerResult<PublishReceipt>;

    async fn create_consumer(&self, stream: &StreamName, spec: &ConsumerSpec) -> BrokerResult<()>;

    /// Pull up to `max_messages`, returning whatever arrived once `expires` elapses.
    async fn fetch(
        &self,
        stream: &StreamName,
        consumer: &ConsumerName,
        request: FetchRequest,
    ) -> BrokerResult<Vec<StoredMessage>>;

    async fn delete_consumer(&self, stream: &StreamName, consumer: &ConsumerName)
    -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, address: &str) -> BrokerResult<Arc<dyn BrokerPort>>;
}
