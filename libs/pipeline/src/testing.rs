//! Test doubles for the backend traits.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use pixel_api::{
    BackendError, BroadcastBus, QueueMessage, QueueTransport, ReceiptHandle, StateRecord,
    StateStore,
};
use storage_memory::MemoryStateStore;

pub fn message(id: &str, body: &[u8]) -> QueueMessage {
    QueueMessage {
        message_id: id.into(),
        body: body.to_vec(),
        receipt: ReceiptHandle::new(format!("{id}-r")),
        receive_count: 1,
    }
}

/// Store that rejects the first `fail_first` upserts, then delegates.
pub struct FlakyStore {
    inner: MemoryStateStore,
    fail_first: usize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            inner: MemoryStateStore::new(),
            fail_first,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

impl StateStore for FlakyStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.inner.init()
    }

    fn upsert(
        &self,
        record: StateRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Box::pin(async { Err(BackendError::io("store unreachable")) });
        }
        self.inner.upsert(record)
    }

    fn get(
        &self,
        coordinate: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StateRecord>, BackendError>> + Send + '_>> {
        self.inner.get(coordinate)
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.inner.flush()
    }
}

/// Bus that records every publish, or fails every publish.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    unreachable: bool,
}

impl RecordingBus {
    pub fn unreachable() -> Self {
        Self { published: Mutex::new(Vec::new()), unreachable: true }
    }

    pub async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().await.clone()
    }
}

impl BroadcastBus for RecordingBus {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let entry = (channel.to_string(), payload.to_vec());
        Box::pin(async move {
            if self.unreachable {
                return Err(BackendError::io("bus unreachable"));
            }
            self.published.lock().await.push(entry);
            Ok(())
        })
    }
}

/// Queue whose poll always fails; remembers when each poll happened.
#[derive(Default)]
pub struct UnreachableQueue {
    polls: Mutex<Vec<Instant>>,
}

impl UnreachableQueue {
    pub async fn poll_times(&self) -> Vec<Instant> {
        self.polls.lock().await.clone()
    }
}

impl QueueTransport for UnreachableQueue {
    fn ensure_queue(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn poll(
        &self,
        _max_batch: usize,
        _wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueMessage>, BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.polls.lock().await.push(Instant::now());
            Err(BackendError::io("connection refused"))
        })
    }

    fn delete(
        &self,
        _receipt: &ReceiptHandle,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Err(BackendError::io("connection refused")) })
    }
}

/// In-memory queue whose delete always fails; messages stay in flight.
pub struct AckFailingQueue {
    pub inner: queue_memory::MemoryQueue,
}

impl QueueTransport for AckFailingQueue {
    fn ensure_queue(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.inner.ensure_queue()
    }

    fn poll(
        &self,
        max_batch: usize,
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueMessage>, BackendError>> + Send + '_>> {
        self.inner.poll(max_batch, wait)
    }

    fn delete(
        &self,
        _receipt: &ReceiptHandle,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Err(BackendError::io("connection reset")) })
    }
}
