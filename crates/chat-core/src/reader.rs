use std::time::Duration;

use chat_broker::Connection;
use chat_protocol::{
    BrokerError, Channel, ChatError, ChatResult, ConsumerName, ConsumerSpec, DeliverFrom,
    FetchRequest, MessageEnvelope, StoredMessage, StreamName,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::ChatConfig;

/// Which end of the retained history a read starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFrom {
    /// Replay from the earliest retained entry; the oldest `limit` are returned.
    #[default]
    Oldest,
    /// Start `limit` entries before the end; the newest `limit` are returned.
    Newest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub limit: usize,
    pub from: ReadFrom,
}

impl ReadRequest {
    pub fn oldest(limit: usize) -> Self {
        Self {
            limit,
            from: ReadFrom::Oldest,
        }
    }

    pub fn newest(limit: usize) -> Self {
        Self {
            limit,
            from: ReadFrom::Newest,
        }
    }
}

/// A stored entry that could not be decoded and was left out of the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub sequence: u64,
    pub reason: String,
}

/// What happened to the ephemeral consumer after the fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CleanupStatus {
    /// No consumer was created.
    #[default]
    NotNeeded,
    Deleted,
    /// Deletion failed; the server reaps the consumer after its inactivity threshold.
    Failed(String),
}

/// Result of one read: decoded messages oldest-first, plus what was dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub messages: Vec<MessageEnvelope>,
    pub skipped: Vec<SkippedEntry>,
    pub cleanup: CleanupStatus,
}

/// Reads channel history through a disposable consumer per call, so reads
/// never share or move a persistent checkpoint.
#[derive(Debug, Clone)]
pub struct ChannelReader {
    fetch_expiry: Duration,
    inactive_threshold: Duration,
    consumer_prefix: String,
}

impl ChannelReader {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            fetch_expiry: config.fetch_expiry,
            inactive_threshold: config.consumer_inactive_threshold,
            consumer_prefix: ConsumerName::READER_PREFIX.to_owned(),
        }
    }

    #[instrument(skip(self, connection), fields(channel = %channel, limit = request.limit, from = ?request.from))]
    pub async fn read(
        &self,
        connection: &Connection,
        channel: Channel,
        request: ReadRequest,
    ) -> ChatResult<ReadOutcome> {
        if request.limit == 0 {
            return Ok(ReadOutcome::default());
        }

        let stream = channel.stream_name();
        let read_failed = |error: BrokerError| {
            ChatError::from_broker(error, |error| ChatError::ReadFailed {
                stream: stream.to_string(),
                reason: error.to_string(),
            })
        };

        let deliver = match self.start_position(connection, &stream, request).await {
            Ok(deliver) => deliver,
            Err(BrokerError::StreamNotFound(_)) => {
                debug!("channel has no stream yet");
                return Ok(ReadOutcome::default());
            }
            Err(error) => return Err(read_failed(error)),
        };

        let consumer = ConsumerName::generate(&self.consumer_prefix);
        let spec = ConsumerSpec {
            inactive_threshold: self.inactive_threshold,
            ..ConsumerSpec::ephemeral(consumer.clone(), deliver)
        };
        match connection.broker.create_consumer(&stream, &spec).await {
            Ok(()) => {}
            Err(BrokerError::StreamNotFound(_)) => {
                debug!("channel has no stream yet");
                return Ok(ReadOutcome::default());
            }
            Err(error) => {
                self.cleanup(connection, &stream, &consumer).await;
                return Err(read_failed(error));
            }
        }

        let fetched = connection
            .broker
            .fetch(
                &stream,
                &consumer,
                FetchRequest {
                    max_messages: request.limit,
                    expires: self.fetch_expiry,
                },
            )
            .await;
        let cleanup = self.cleanup(connection, &stream, &consumer).await;
        let entries = fetched.map_err(read_failed)?;

        let (messages, skipped) = decode_entries(entries);
        debug!(
            returned = messages.len(),
            skipped = skipped.len(),
            "channel read complete"
        );
        Ok(ReadOutcome {
            messages,
            skipped,
            cleanup,
        })
    }

    async fn start_position(
        &self,
        connection: &Connection,
        stream: &StreamName,
        request: ReadRequest,
    ) -> Result<DeliverFrom, BrokerError> {
        match request.from {
            ReadFrom::Oldest => Ok(DeliverFrom::All),
            ReadFrom::Newest => {
                let state = connection.broker.stream_state(stream).await?;
                let limit = request.limit as u64;
                if state.messages <= limit || state.last_sequence < limit {
                    return Ok(DeliverFrom::All);
                }
                let start = (state.last_sequence - limit + 1).max(state.first_sequence);
                Ok(DeliverFrom::StartSequence(start))
            }
        }
    }

    /// Best-effort consumer deletion; failures are logged and reported, never raised.
    async fn cleanup(
        &self,
        connection: &Connection,
        stream: &StreamName,
        consumer: &ConsumerName,
    ) -> CleanupStatus {
        match connection.broker.delete_consumer(stream, consumer).await {
            Ok(()) => CleanupStatus::Deleted,
            Err(error) => {
                warn!(%error, consumer = %consumer, "ephemeral consumer cleanup failed");
                CleanupStatus::Failed(error.to_string())
            }
        }
    }
}

/// Decode every entry, collecting malformed ones instead of failing the batch.
fn decode_entries(entries: Vec<StoredMessage>) -> (Vec<MessageEnvelope>, Vec<SkippedEntry>) {
    let mut messages = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();
    for entry in entries {
        match MessageEnvelope::decode(&entry.payload) {
            Ok(envelope) => messages.push(envelope),
            Err(error) => {
                warn!(sequence = entry.sequence, %error, "skipping malformed entry");
                skipped.push(SkippedEntry {
                    sequence: entry.sequence,
                    reason: error.to_string(),
                });
            }
        }
    }
    (messages, skipped)
}
