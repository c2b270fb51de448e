use std::sync::Arc;

use chat_broker::{
    Connection, ConnectionManager, ConnectionStatus, JetStreamConnector, MemoryBroker,
};
use chat_protocol::{BrokerConnector, Channel, ChannelInfo, ChatResult, MessageEnvelope};
use tracing::{info, instrument};

use crate::config::ChatConfig;
use crate::provisioner::StreamProvisioner;
use crate::publisher::{publish_envelope, require_handle};
use crate::reader::{ChannelReader, ReadOutcome, ReadRequest};
use crate::session::SessionState;

#[derive(Clone)]
pub struct ChatContextBuilder {
    config: ChatConfig,
    connector: Option<Arc<dyn BrokerConnector>>,
}

impl ChatContextBuilder {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            connector: None,
        }
    }

    pub fn connector(mut self, connector: Arc<dyn BrokerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Serve from an in-process broker instead of NATS.
    pub fn in_memory(self, broker: MemoryBroker) -> Self {
        self.connector(Arc::new(broker))
    }

    pub fn build(self) -> ChatContext {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(JetStreamConnector::default()));
        let connection = ConnectionManager::new(self.config.broker_url.clone(), connector);
        let provisioner = StreamProvisioner::new(self.config.retention);
        let reader = ChannelReader::new(&self.config);

        ChatContext {
            inner: Arc::new(ChatContextInner {
                config: self.config,
                connection,
                provisioner,
                reader,
                session: SessionState::new(),
            }),
        }
    }
}

struct ChatContextInner {
    config: ChatConfig,
    connection: ConnectionManager,
    provisioner: StreamProvisioner,
    reader: ChannelReader,
    session: SessionState,
}

/// Everything one agent process needs to talk on the channels: the shared
/// connection, the provisioning cache, and the session handle.
#[derive(Clone)]
pub struct ChatContext {
    inner: Arc<ChatContextInner>,
}

impl ChatContext {
    pub fn builder(config: ChatConfig) -> ChatContextBuilder {
        ChatContextBuilder::new(config)
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn set_handle(&self, handle: impl Into<String>) {
        self.inner.session.set_handle(handle);
    }

    pub fn handle(&self) -> Option<String> {
        self.inner.session.handle()
    }

    /// The static channel registry. No broker interaction.
    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        Channel::registry()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub async fn ensure_connected(&self) -> ChatResult<Connection> {
        self.inner.connection.ensure().await
    }

    pub async fn ensure_channel_stream(&self, channel: Channel) -> ChatResult<()> {
        let connection = self.ensure_connected().await?;
        self.inner
            .provisioner
            .ensure_channel_stream(&connection, channel)
            .await
    }

    /// Connect and provision every registered channel.
    #[instrument(skip(self))]
    pub async fn provision_all(&self) -> ChatResult<()> {
        let connection = self.ensure_connected().await?;
        for channel in Channel::ALL {
            self.inner
                .provisioner
                .ensure_channel_stream(&connection, channel)
                .await?;
        }
        info!(channels = Channel::ALL.len(), "channel streams provisioned");
        Ok(())
    }

    /// Publish `text` on `channel` as the current handle and return the
    /// envelope exactly as sent.
    #[instrument(skip(self, text), fields(channel = %channel, bytes = text.len()))]
    pub async fn publish(&self, channel: Channel, text: &str) -> ChatResult<MessageEnvelope> {
        let handle = require_handle(self.handle())?;
        let connection = self.ensure_connected().await?;
        self.inner
            .provisioner
            .ensure_channel_stream(&connection, channel)
            .await?;

        let envelope = MessageEnvelope::new(handle, text, channel);
        publish_envelope(&connection, &envelope).await?;
        Ok(envelope)
    }

    /// Up to `limit` (default from config) messages, oldest first.
    pub async fn read_messages(
        &self,
        channel: Channel,
        limit: Option<usize>,
    ) -> ChatResult<Vec<MessageEnvelope>> {
        let limit = limit.unwrap_or(self.inner.config.default_read_limit);
        let outcome = self.read(channel, ReadRequest::oldest(limit)).await?;
        Ok(outcome.messages)
    }

    pub async fn read(&self, channel: Channel, request: ReadRequest) -> ChatResult<ReadOutcome> {
        let connection = self.ensure_connected().await?;
        self.inner
            .provisioner
            .ensure_channel_stream(&connection, channel)
            .await?;
        self.inner.reader.read(&connection, channel, request).await
    }

    pub async fn shutdown(&self) {
        self.inner.connection.shutdown().await;
        info!("chat context shut down");
    }
}
