use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chat_protocol::{BrokerConnector, BrokerPort, ChatError, ChatResult};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready { generation: u64 },
    Failed(String),
}

enum ConnectionState {
    Disconnected,
    Connecting,
    Ready {
        broker: Arc<dyn BrokerPort>,
        generation: u64,
    },
    Failed(String),
}

/// A live broker handle. `generation` changes on every (re)connect.
#[derive(Clone)]
pub struct Connection {
    pub broker: Arc<dyn BrokerPort>,
    pub generation: u64,
}

/// Owns the single, lazily established broker connection.
///
/// [`ensure`](Self::ensure) is safe to call from any state: it reuses a
/// ready connection while it reports itself open and reconnects otherwise.
/// Connect failures are not retried here.
pub struct ConnectionManager {
    address: String,
    connector: Arc<dyn BrokerConnector>,
    state: Mutex<ConnectionState>,
    connect_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(address: impl Into<String>, connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            address: address.into(),
            connector,
            state: Mutex::new(ConnectionState::Disconnected),
            connect_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> ConnectionStatus {
        match &*self.state.lock() {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Ready { broker, generation } => {
                if broker.is_open() {
                    ConnectionStatus::Ready {
                        generation: *generation,
                    }
                } else {
                    ConnectionStatus::Disconnected
                }
            }
            ConnectionState::Failed(reason) => ConnectionStatus::Failed(reason.clone()),
        }
    }

    fn ready(&self) -> Option<Connection> {
        match &*self.state.lock() {
            ConnectionState::Ready { broker, generation } if broker.is_open() => Some(Connection {
                broker: broker.clone(),
                generation: *generation,
            }),
            _ => None,
        }
    }

    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn ensure(&self) -> ChatResult<Connection> {
        if let Some(connection) = self.ready() {
            return Ok(connection);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(connection) = self.ready() {
            return Ok(connection);
        }

        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Connecting);
        if matches!(previous, ConnectionState::Ready { .. }) {
            warn!("broker connection closed, reconnecting");
        }

        match self.connector.connect(&self.address).await {
            Ok(broker) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *self.state.lock() = ConnectionState::Ready {
                    broker: broker.clone(),
                    generation,
                };
                info!(generation, "broker connection ready");
                Ok(Connection { broker, generation })
            }
            Err(error) => {
                warn!(%error, "broker connection failed");
                *self.state.lock() = ConnectionState::Failed(error.to_string());
                Err(ChatError::TransportUnavailable(error.to_string()))
            }
        }
    }

    /// Close the current connection, if any, and return to `Disconnected`.
    pub async fn shutdown(&self) {
        let _guard = self.connect_lock.lock().await;
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);
        if let ConnectionState::Ready { broker, .. } = previous {
            if let Err(error) = broker.close().await {
                warn!(%error, "broker close failed");
            }
            debug!("broker connection closed");
        }
    }
}
