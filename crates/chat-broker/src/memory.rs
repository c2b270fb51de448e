use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chat_protocol::{
    BrokerConnector, BrokerError, BrokerPort, BrokerResult, ConsumerName, ConsumerSpec,
    DeliverFrom, FetchRequest, PublishReceipt, StoredMessage, StreamName, StreamSpec, StreamState,
    SubjectName,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, instrument};

/// Fault toggles for exercising failure paths without a real broker.
#[derive(Debug, Default)]
pub struct MemoryFaults {
    pub refuse_connects: AtomicBool,
    pub reject_publishes: AtomicBool,
    pub reject_consumer_deletes: AtomicBool,
}

#[derive(Debug)]
struct MemoryEntry {
    sequence: u64,
    payload: Vec<u8>,
    stored_at: Instant,
}

#[derive(Debug)]
struct MemoryStream {
    spec: StreamSpec,
    entries: VecDeque<MemoryEntry>,
    last_sequence: u64,
    consumers: HashMap<ConsumerName, u64>,
}

impl MemoryStream {
    fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            entries: VecDeque::new(),
            last_sequence: 0,
            consumers: HashMap::new(),
        }
    }

    fn evict(&mut self, now: Instant) {
        let max_messages = usize::try_from(self.spec.retention.max_messages).unwrap_or(usize::MAX);
        while self.entries.len() > max_messages {
            self.entries.pop_front();
        }
        while let Some(front) = self.entries.front()
            && now.duration_since(front.stored_at) > self.spec.retention.max_age
        {
            self.entries.pop_front();
        }
    }

    fn state(&self) -> StreamState {
        StreamState {
            name: self.spec.name.clone(),
            messages: self.entries.len() as u64,
            first_sequence: self
                .entries
                .front()
                .map(|entry| entry.sequence)
                .unwrap_or(self.last_sequence + 1),
            last_sequence: self.last_sequence,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    streams: Mutex<HashMap<StreamName, MemoryStream>>,
    appended: Notify,
    faults: MemoryFaults,
    connects: AtomicU64,
}

/// Shared in-process store. Every [`MemoryConnection`] opened from it sees
/// the same streams, so a reconnect keeps history the way a file-backed
/// JetStream stream survives a client restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &MemoryFaults {
        &self.inner.faults
    }

    /// Number of successful connects handed out so far.
    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> MemoryConnection {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        MemoryConnection {
            broker: self.clone(),
            open: AtomicBool::new(true),
        }
    }

    pub fn stream_names(&self) -> Vec<StreamName> {
        let mut names: Vec<_> = self.inner.streams.lock().keys().cloned().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    pub fn consumer_count(&self, stream: &StreamName) -> usize {
        self.inner
            .streams
            .lock()
            .get(stream)
            .map(|stream| stream.consumers.len())
            .unwrap_or(0)
    }

    pub fn retained(&self, stream: &StreamName) -> usize {
        let mut streams = self.inner.streams.lock();
        match streams.get_mut(stream) {
            Some(stream) => {
                stream.evict(Instant::now());
                stream.entries.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, address: &str) -> BrokerResult<Arc<dyn BrokerPort>> {
        if self.inner.faults.refuse_connects.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect(format!("connection refused: {address}")));
        }
        Ok(Arc::new(self.open()))
    }
}

/// One client connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    open: AtomicBool,
}

impl MemoryConnection {
    fn inner(&self) -> BrokerResult<&MemoryInner> {
        if self.open.load(Ordering::SeqCst) {
            Ok(&self.broker.inner)
        } else {
            Err(BrokerError::Closed)
        }
    }

    /// Drain deliverable entries for a consumer, advancing its cursor.
    fn take_batch(
        &self,
        stream: &StreamName,
        consumer: &ConsumerName,
        wanted: usize,
        out: &mut Vec<StoredMessage>,
    ) -> BrokerResult<()> {
        let mut streams = self.inner()?.streams.lock();
        let stream = streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        stream.evict(Instant::now());
        let cursor = stream
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| BrokerError::ConsumerNotFound(consumer.to_string()))?;

        let start = *cursor;
        for entry in stream.entries.iter().filter(|entry| entry.sequence >= start) {
            if out.len() >= wanted {
                break;
            }
            out.push(StoredMessage {
                sequence: entry.sequence,
                payload: entry.payload.clone(),
            });
            *cursor = entry.sequence + 1;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerPort for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    #[instrument(skip(self, spec), fields(stream = %spec.name, subject = %spec.subject))]
    async fn create_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamState> {
        let mut streams = self.inner()?.streams.lock();
        if let Some(existing) = streams.get(&spec.name) {
            if existing.spec == *spec {
                return Ok(existing.state());
            }
            return Err(BrokerError::StreamExists(spec.name.to_string()));
        }
        if let Some(overlap) = streams
            .values()
            .find(|stream| stream.spec.subject == spec.subject)
        {
            return Err(BrokerError::Request(format!(
                "subjects overlap with stream {}",
                overlap.spec.name
            )));
        }

        let stream = MemoryStream::new(spec.clone());
        let state = stream.state();
        streams.insert(spec.name.clone(), stream);
        debug!("stream created");
        Ok(state)
    }

    async fn stream_state(&self, name: &StreamName) -> BrokerResult<StreamState> {
        let mut streams = self.inner()?.streams.lock();
        let stream = streams
            .get_mut(name)
            .ok_or_else(|| BrokerError::StreamNotFound(name.to_string()))?;
        stream.evict(Instant::now());
        Ok(stream.state())
    }

    #[instrument(skip(self, payload), fields(subject = %subject, bytes = payload.len()))]
    async fn publish(
        &self,
        subject: &SubjectName,
        payload: Vec<u8>,
    ) -> BrokerResult<PublishReceipt> {
        let inner = self.inner()?;
        if inner.faults.reject_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Request("publish was not acknowledged".to_owned()));
        }

        let receipt = {
            let mut streams = inner.streams.lock();
            let stream = streams
                .values_mut()
                .find(|stream| stream.spec.subject == *subject)
                .ok_or_else(|| BrokerError::NoStreamForSubject(subject.to_string()))?;
            stream.last_sequence += 1;
            stream.entries.push_back(MemoryEntry {
                sequence: stream.last_sequence,
                payload,
                stored_at: Instant::now(),
            });
            stream.evict(Instant::now());
            PublishReceipt {
                stream: stream.spec.name.clone(),
                sequence: stream.last_sequence,
                duplicate: false,
            }
        };
        inner.appended.notify_waiters();
        debug!(sequence = receipt.sequence, "publish acknowledged");
        Ok(receipt)
    }

    #[instrument(skip(self, spec), fields(stream = %stream, consumer = %spec.name))]
    async fn create_consumer(&self, stream: &StreamName, spec: &ConsumerSpec) -> BrokerResult<()> {
        let mut streams = self.inner()?.streams.lock();
        let stream = streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        if stream.consumers.contains_key(&spec.name) {
            return Err(BrokerError::Request(format!(
                "consumer {} already exists",
                spec.name
            )));
        }
        let start = match spec.deliver {
            DeliverFrom::All => 0,
            DeliverFrom::StartSequence(sequence) => sequence,
        };
        stream.consumers.insert(spec.name.clone(), start);
        Ok(())
    }

    #[instrument(skip(self), fields(stream = %stream, consumer = %consumer, max = request.max_messages))]
    async fn fetch(
        &self,
        stream: &StreamName,
        consumer: &ConsumerName,
        request: FetchRequest,
    ) -> BrokerResult<Vec<StoredMessage>> {
        let deadline = tokio::time::Instant::now() + request.expires;
        let mut out = Vec::new();

        loop {
            // Registered before draining so a publish in between still wakes us.
            let appended = self.inner()?.appended.notified();
            self.take_batch(stream, consumer, request.max_messages, &mut out)?;
            if out.len() >= request.max_messages {
                break;
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                break;
            }
        }
        debug!(count = out.len(), "batch fetched");
        Ok(out)
    }

    async fn delete_consumer(
        &self,
        stream: &StreamName,
        consumer: &ConsumerName,
    ) -> BrokerResult<()> {
        let inner = self.inner()?;
        if inner.faults.reject_consumer_deletes.load(Ordering::SeqCst) {
            return Err(BrokerError::Request("consumer delete timed out".to_owned()));
        }
        let mut streams = inner.streams.lock();
        let stream = streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        stream
            .consumers
            .remove(consumer)
            .map(|_| ())
            .ok_or_else(|| BrokerError::ConsumerNotFound(consumer.to_string()))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
