//! Error types for agent chat.

use thiserror::Error;

/// Errors surfaced to callers of the chat core.
///
/// Every variant renders as a single line naming the failing operation and
/// the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("provisioning stream {stream} failed: {reason}")]
    ProvisioningFailed { stream: String, reason: String },
    #[error("no handle set; use set_handle first")]
    NoHandleSet,
    #[error("publish to {subject} failed: {reason}")]
    PublishFailed { subject: String, reason: String },
    #[error("read from {stream} failed: {reason}")]
    ReadFailed { stream: String, reason: String },
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ChatError {
    /// Classify a broker failure from an operation in flight. Losing the
    /// connection is `TransportUnavailable` whichever operation saw it;
    /// everything else goes through `otherwise`.
    pub fn from_broker(error: BrokerError, otherwise: impl FnOnce(BrokerError) -> Self) -> Self {
        if error.is_connection_loss() {
            Self::TransportUnavailable(error.to_string())
        } else {
            otherwise(error)
        }
    }
}

/// Convenience result type for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Signals returned by a broker transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection closed")]
    Closed,
    #[error("stream already exists: {0}")]
    StreamExists(String),
    #[error("stream not found: {0}")]
    StreamNotFound(String),
    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),
    #[error("no stream accepts subject {0}")]
    NoStreamForSubject(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl BrokerError {
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Closed)
    }
}

/// Convenience result type for broker port calls.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_operation_and_cause() {
        let err = ChatError::PublishFailed {
            subject: "agent.chat.roadmap".into(),
            reason: "timed out".into(),
        };
        assert_eq!(
            err.to_string(),
            "publish to agent.chat.roadmap failed: timed out"
        );
        assert!(!err.to_string().contains('\n'));

        let err = ChatError::TransportUnavailable(BrokerError::Connect("refused".into()).to_string());
        assert_eq!(
            err.to_string(),
            "transport unavailable: connect failed: refused"
        );
    }

    #[test]
    fn lost_connection_is_transport_unavailable() {
        let publish_failed = |error: BrokerError| ChatError::PublishFailed {
            subject: "agent.chat.errors".into(),
            reason: error.to_string(),
        };
        assert_eq!(
            ChatError::from_broker(BrokerError::Closed, publish_failed),
            ChatError::TransportUnavailable("connection closed".into())
        );
        assert!(matches!(
            ChatError::from_broker(BrokerError::Request("timed out".into()), publish_failed),
            ChatError::PublishFailed { .. }
        ));
    }
}
