use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_nats::connection::State;
use async_nats::jetstream::{
    self, ErrorCode,
    consumer::{AckPolicy, DeliverPolicy, pull},
    context::{CreateStreamErrorKind, GetStreamErrorKind},
    stream::{self, RetentionPolicy, StorageType},
};
use async_trait::async_trait;
use chat_protocol::{
    BrokerConnector, BrokerError, BrokerPort, BrokerResult, ConsumerName, ConsumerSpec,
    DeliverFrom, FetchRequest, PublishReceipt, StoredMessage, StreamName, StreamSpec, StreamState,
    SubjectName,
};
use futures_util::StreamExt;
use tracing::{debug, info, instrument, warn};

/// Opens [`JetStreamBroker`] connections to a NATS server.
#[derive(Debug, Clone)]
pub struct JetStreamConnector {
    client_name: String,
}

impl JetStreamConnector {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl Default for JetStreamConnector {
    fn default() -> Self {
        Self::new("agent-chat")
    }
}

#[async_trait]
impl BrokerConnector for JetStreamConnector {
    #[instrument(skip(self), fields(client = %self.client_name))]
    async fn connect(&self, address: &str) -> BrokerResult<Arc<dyn BrokerPort>> {
        let client = async_nats::ConnectOptions::new()
            .name(&self.client_name)
            .connect(address)
            .await
            .map_err(|err| BrokerError::Connect(err.to_string()))?;
        info!("connected to NATS");
        Ok(Arc::new(JetStreamBroker::new(client)))
    }
}

/// A NATS connection with both admin (stream/consumer management) and
/// data-plane (publish/fetch) JetStream access.
#[derive(Debug)]
pub struct JetStreamBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    closed: AtomicBool,
}

impl JetStreamBroker {
    pub fn new(client: async_nats::Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            closed: AtomicBool::new(false),
        }
    }

    /// `Closed` once the client is closed or has lost its server.
    fn live(&self) -> BrokerResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::Closed)
        }
    }

    async fn stream(&self, name: &StreamName) -> BrokerResult<jetstream::stream::Stream> {
        self.live()?;
        self.jetstream
            .get_stream(name.as_str())
            .await
            .map_err(|err| match err.kind() {
                GetStreamErrorKind::JetStream(js_err)
                    if js_err.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    BrokerError::StreamNotFound(name.to_string())
                }
                _ => request_error(err),
            })
    }
}

fn request_error(err: impl std::fmt::Display) -> BrokerError {
    BrokerError::Request(err.to_string())
}

fn stream_state(info: &stream::Info) -> StreamState {
    StreamState {
        name: StreamName::from_string(info.config.name.clone()),
        messages: info.state.messages,
        first_sequence: info.state.first_sequence,
        last_sequence: info.state.last_sequence,
    }
}

#[async_trait]
impl BrokerPort for JetStreamBroker {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && !matches!(self.client.connection_state(), State::Disconnected)
    }

    #[instrument(skip(self, spec), fields(stream = %spec.name, subject = %spec.subject))]
    async fn create_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamState> {
        let config = stream::Config {
            name: spec.name.to_string(),
            subjects: vec![spec.subject.to_string()],
            retention: RetentionPolicy::Limits,
            max_messages: i64::try_from(spec.retention.max_messages).unwrap_or(i64::MAX),
            max_age: spec.retention.max_age,
            storage: StorageType::File,
            ..Default::default()
        };
        self.live()?;

        match self.jetstream.create_stream(config).await {
            Ok(stream) => {
                debug!("stream created");
                Ok(stream_state(stream.cached_info()))
            }
            Err(err) => match err.kind() {
                CreateStreamErrorKind::JetStream(js_err)
                    if js_err.error_code() == ErrorCode::STREAM_NAME_EXIST =>
                {
                    Err(BrokerError::StreamExists(spec.name.to_string()))
                }
                _ => Err(request_error(err)),
            },
        }
    }

    async fn stream_state(&self, name: &StreamName) -> BrokerResult<StreamState> {
        let stream = self.stream(name).await?;
        Ok(stream_state(stream.cached_info()))
    }

    #[instrument(skip(self, payload), fields(subject = %subject, bytes = payload.len()))]
    async fn publish(
        &self,
        subject: &SubjectName,
        payload: Vec<u8>,
    ) -> BrokerResult<PublishReceipt> {
        self.live()?;
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(request_error)?
            .await
            .map_err(request_error)?;
        debug!(sequence = ack.sequence, "publish acknowledged");
        Ok(PublishReceipt {
            stream: StreamName::from_string(ack.stream),
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    #[instrument(skip(self, spec), fields(stream = %stream_name, consumer = %spec.name))]
    async fn create_consumer(
        &self,
        stream_name: &StreamName,
        spec: &ConsumerSpec,
    ) -> BrokerResult<()> {
        let stream = self.stream(stream_name).await?;
        let deliver_policy = match spec.deliver {
            DeliverFrom::All => DeliverPolicy::All,
            DeliverFrom::StartSequence(start_sequence) => {
                DeliverPolicy::ByStartSequence { start_sequence }
            }
        };
        stream
            .create_consumer(pull::Config {
                name: Some(spec.name.to_string()),
                deliver_policy,
                ack_policy: AckPolicy::None,
                max_deliver: spec.max_deliver,
                inactive_threshold: spec.inactive_threshold,
                ..Default::default()
            })
            .await
            .map_err(request_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(stream = %stream_name, consumer = %consumer_name, max = request.max_messages))]
    async fn fetch(
        &self,
        stream_name: &StreamName,
        consumer_name: &ConsumerName,
        request: FetchRequest,
    ) -> BrokerResult<Vec<StoredMessage>> {
        let stream = self.stream(stream_name).await?;
        let consumer = stream
            .get_consumer::<pull::Config>(consumer_name.as_str())
            .await
            .map_err(request_error)?;
        let mut batch = consumer
            .batch()
            .max_messages(request.max_messages)
            .expires(request.expires)
            .messages()
            .await
            .map_err(request_error)?;

        let mut out = Vec::new();
        while let Some(next) = batch.next().await {
            match next {
                Ok(message) => {
                    let sequence = message
                        .info()
                        .map(|info| info.stream_sequence)
                        .unwrap_or_default();
                    out.push(StoredMessage {
                        sequence,
                        payload: message.payload.to_vec(),
                    });
                }
                Err(error) => {
                    warn!(%error, "batch ended early");
                    break;
                }
            }
        }
        debug!(count = out.len(), "batch fetched");
        Ok(out)
    }

    async fn delete_consumer(
        &self,
        stream_name: &StreamName,
        consumer_name: &ConsumerName,
    ) -> BrokerResult<()> {
        let stream = self.stream(stream_name).await?;
        stream
            .delete_consumer(consumer_name.as_str())
            .await
            .map_err(request_error)?;
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.client.flush().await.map_err(request_error)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use chat_protocol::RetentionLimits;

    use super::*;

    fn nats_url() -> String {
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_owned())
    }

    #[tokio::test]
    async fn connect_to_unreachable_server_fails() {
        let err = JetStreamConnector::default()
            .connect("nats://127.0.0.1:1")
            .await
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.starts_with("connect failed"));
    }

    #[tokio::test]
    #[ignore = "requires a NATS server with JetStream enabled (NATS_URL)"]
    async fn jetstream_roundtrip_with_ephemeral_consumer() -> Result<()> {
        let broker = JetStreamConnector::default().connect(&nats_url()).await?;
        let suffix = ConsumerName::generate("T").to_string().replace('-', "_");
        let spec = StreamSpec {
            name: StreamName::from_string(format!("AGENT_CHAT_TEST_{suffix}")),
            subject: SubjectName::from_string(format!("agent.chat.test.{suffix}")),
            retention: RetentionLimits::default(),
        };

        broker.create_stream(&spec).await?;
        broker.create_stream(&spec).await?;
        let drifted = StreamSpec {
            retention: RetentionLimits {
                max_messages: 5,
                ..spec.retention
            },
            ..spec.clone()
        };
        assert!(matches!(
            broker.create_stream(&drifted).await,
            Err(BrokerError::StreamExists(_))
        ));

        broker.publish(&spec.subject, b"one".to_vec()).await?;
        broker.publish(&spec.subject, b"two".to_vec()).await?;

        let consumer = ConsumerName::generate(ConsumerName::READER_PREFIX);
        broker
            .create_consumer(
                &spec.name,
                &ConsumerSpec::ephemeral(consumer.clone(), DeliverFrom::All),
            )
            .await?;
        let batch = broker
            .fetch(
                &spec.name,
                &consumer,
                FetchRequest {
                    max_messages: 10,
                    expires: Duration::from_secs(1),
                },
            )
            .await?;
        broker.delete_consumer(&spec.name, &consumer).await?;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, b"one");
        assert!(batch[0].sequence < batch[1].sequence);

        let missing = broker
            .stream_state(&StreamName::from("AGENT_CHAT_DOES_NOT_EXIST"))
            .await;
        assert!(matches!(missing, Err(BrokerError::StreamNotFound(_))));
        Ok(())
    }
}
