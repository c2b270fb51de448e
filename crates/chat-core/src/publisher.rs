use chat_broker::Connection;
use chat_protocol::{ChatError, ChatResult, MessageEnvelope, PublishReceipt};
use tracing::{debug, instrument};

/// Append an envelope to the channel's subject and wait for the store's ack.
///
/// At-least-once: a failed ack surfaces as `PublishFailed` and a retry may
/// store a duplicate. A connection lost mid-publish is `TransportUnavailable`.
#[instrument(skip(connection, envelope), fields(channel = %envelope.channel, handle = %envelope.handle))]
pub(crate) async fn publish_envelope(
    connection: &Connection,
    envelope: &MessageEnvelope,
) -> ChatResult<PublishReceipt> {
    let subject = envelope.channel.subject();
    let payload = envelope
        .encode()
        .map_err(|err| ChatError::Serialization(err.to_string()))?;

    let receipt = connection
        .broker
        .publish(&subject, payload)
        .await
        .map_err(|err| {
            ChatError::from_broker(err, |err| ChatError::PublishFailed {
                subject: subject.to_string(),
                reason: err.to_string(),
            })
        })?;
    debug!(
        stream = %receipt.stream,
        sequence = receipt.sequence,
        duplicate = receipt.duplicate,
        "message published"
    );
    Ok(receipt)
}

/// The handle a publish is stamped with. An empty handle counts as unset.
pub(crate) fn require_handle(handle: Option<String>) -> ChatResult<String> {
    match handle {
        Some(handle) if !handle.is_empty() => Ok(handle),
        _ => Err(ChatError::NoHandleSet),
    }
}
