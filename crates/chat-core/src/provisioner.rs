use std::collections::HashMap;

use chat_broker::Connection;
use chat_protocol::{
    BrokerError, Channel, ChatError, ChatResult, RetentionLimits, StreamSpec, StreamState,
};
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Ensures, idempotently, that each channel has its durable stream.
///
/// Successful provisioning is remembered per connection generation, so calls
/// after the first are free until the connection is re-established.
#[derive(Debug)]
pub struct StreamProvisioner {
    retention: RetentionLimits,
    provisioned: Mutex<HashMap<Channel, u64>>,
}

impl StreamProvisioner {
    pub fn new(retention: RetentionLimits) -> Self {
        Self {
            retention,
            provisioned: Mutex::new(HashMap::new()),
        }
    }

    pub fn spec_for(&self, channel: Channel) -> StreamSpec {
        StreamSpec {
            name: channel.stream_name(),
            subject: channel.subject(),
            retention: self.retention,
        }
    }

    pub fn is_provisioned(&self, channel: Channel, generation: u64) -> bool {
        self.provisioned.lock().get(&channel) == Some(&generation)
    }

    #[instrument(skip(self, connection), fields(channel = %channel, generation = connection.generation))]
    pub async fn ensure_channel_stream(
        &self,
        connection: &Connection,
        channel: Channel,
    ) -> ChatResult<()> {
        if self.is_provisioned(channel, connection.generation) {
            return Ok(());
        }

        let spec = self.spec_for(channel);
        let state = self.create_or_confirm(connection, &spec).await?;
        debug!(
            stream = %state.name,
            messages = state.messages,
            "channel stream ready"
        );
        self.provisioned.lock().insert(channel, connection.generation);
        Ok(())
    }

    async fn create_or_confirm(
        &self,
        connection: &Connection,
        spec: &StreamSpec,
    ) -> ChatResult<StreamState> {
        let failed = |error: BrokerError| {
            ChatError::from_broker(error, |error| ChatError::ProvisioningFailed {
                stream: spec.name.to_string(),
                reason: error.to_string(),
            })
        };

        match connection.broker.create_stream(spec).await {
            Ok(state) => Ok(state),
            // Existing config is reachable but not re-validated against ours.
            Err(BrokerError::StreamExists(_)) => {
                debug!(stream = %spec.name, "stream already exists");
                connection
                    .broker
                    .stream_state(&spec.name)
                    .await
                    .map_err(failed)
            }
            Err(error) => Err(failed(error)),
        }
    }

    /// Forget every cached result; the next call per channel hits the broker.
    pub fn reset(&self) {
        self.provisioned.lock().clear();
    }
}
