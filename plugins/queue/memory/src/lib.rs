use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use pixel_api::{BackendError, QueueMessage, QueueTransport, ReceiptHandle};

/// Максимальный размер batch'а за один poll (как у SQS).
pub const MAX_BATCH: usize = 10;

// ═══════════════════════════════════════════════════════════════
//  MemoryQueueConfig
// ═══════════════════════════════════════════════════════════════

fn default_queue_name() -> String {
    "pixel-queue".into()
}
fn default_visibility_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryQueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    /// Сколько полученное, но не удалённое сообщение скрыто от consumer'ов.
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryQueue
// ═══════════════════════════════════════════════════════════════

struct Entry {
    id: u64,
    body: Vec<u8>,
    visible_at: Instant,
    receive_count: u32,
    /// Токен последней выдачи. None — сообщение ещё не получали.
    receipt: Option<String>,
}

#[derive(Default)]
struct State {
    exists: bool,
    entries: VecDeque<Entry>,
    next_id: u64,
    next_receipt: u64,
}

/// In-process очередь с семантикой SQS: at-least-once, visibility
/// timeout, подтверждение через receipt handle.
///
/// Очередь не существует до `ensure_queue()`; send/poll/delete до
/// этого завершаются ошибкой kind `Config`.
pub struct MemoryQueue {
    name: String,
    visibility_timeout: Duration,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(config: &MemoryQueueConfig) -> Self {
        Self {
            name: config.name.clone(),
            visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn missing(&self) -> BackendError {
        BackendError::config(format!("queue '{}' does not exist", self.name))
    }

    /// Поставить сообщение в очередь. Возвращает message id.
    pub async fn send(&self, body: Vec<u8>) -> Result<String, BackendError> {
        let mut state = self.state.lock().await;
        if !state.exists {
            return Err(self.missing());
        }
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push_back(Entry {
            id,
            body,
            visible_at: Instant::now(),
            receive_count: 0,
            receipt: None,
        });
        drop(state);
        self.notify.notify_waiters();
        Ok(id.to_string())
    }

    /// Количество неподтверждённых сообщений (видимых и in-flight).
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Количество сообщений, скрытых visibility timeout'ом.
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state.entries.iter().filter(|e| e.visible_at > now).count()
    }

    /// Выдать видимые сообщения, скрыв их на visibility timeout.
    /// Возвращает также момент, когда станет видимым ближайшее скрытое.
    fn take_visible(
        &self,
        state: &mut State,
        max_batch: usize,
        now: Instant,
    ) -> (Vec<QueueMessage>, Option<Instant>) {
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;
        let hidden_until = now + self.visibility_timeout;

        for i in 0..state.entries.len() {
            let entry = &state.entries[i];
            if entry.visible_at > now {
                next_visible = Some(next_visible.map_or(entry.visible_at, |t| t.min(entry.visible_at)));
                continue;
            }
            if batch.len() >= max_batch {
                break;
            }

            let token = format!("{}-{}", entry.id, state.next_receipt);
            state.next_receipt += 1;

            let entry = &mut state.entries[i];
            entry.visible_at = hidden_until;
            entry.receive_count += 1;
            entry.receipt = Some(token.clone());

            batch.push(QueueMessage {
                message_id: entry.id.to_string(),
                body: entry.body.clone(),
                receipt: ReceiptHandle::new(token),
                receive_count: entry.receive_count,
            });
        }

        (batch, next_visible)
    }
}

impl QueueTransport for MemoryQueue {
    fn ensure_queue(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.exists {
                tracing::info!(queue = %self.name, "queue already exists");
            } else {
                state.exists = true;
                tracing::info!(queue = %self.name, "queue created");
            }
            Ok(())
        })
    }

    fn poll(
        &self,
        max_batch: usize,
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueMessage>, BackendError>> + Send + '_>> {
        Box::pin(async move {
            if max_batch == 0 || max_batch > MAX_BATCH {
                return Err(BackendError::config(format!(
                    "max_batch must be in 1..={MAX_BATCH}, got {max_batch}"
                )));
            }
            let deadline = Instant::now() + wait;

            loop {
                // Регистрируемся до проверки, чтобы не потерять send() между ними.
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let now = Instant::now();
                let next_visible = {
                    let mut state = self.state.lock().await;
                    if !state.exists {
                        return Err(self.missing());
                    }
                    let (batch, next_visible) = self.take_visible(&mut state, max_batch, now);
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                    next_visible
                };

                if now >= deadline {
                    return Ok(Vec::new());
                }

                let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(wake_at) => {}
                }
            }
        })
    }

    fn delete(
        &self,
        receipt: &ReceiptHandle,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let receipt = receipt.as_str().to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.exists {
                return Err(self.missing());
            }
            let pos = state
                .entries
                .iter()
                .position(|e| e.receipt.as_deref() == Some(receipt.as_str()));
            match pos {
                Some(pos) => {
                    state.entries.remove(pos);
                    Ok(())
                }
                None => Err(BackendError::new(format!(
                    "receipt '{receipt}' is stale or unknown"
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixel_api::ErrorKind;

    async fn queue(visibility_ms: u64) -> MemoryQueue {
        let q = MemoryQueue::new(&MemoryQueueConfig {
            name: "test-queue".into(),
            visibility_timeout_ms: visibility_ms,
        });
        q.ensure_queue().await.unwrap();
        q
    }

    #[tokio::test]
    async fn missing_queue_is_config_error() {
        let q = MemoryQueue::new(&MemoryQueueConfig::default());
        let err = q.poll(10, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(q.send(b"x".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn ensure_queue_is_idempotent() {
        let q = queue(1000).await;
        q.send(b"kept".to_vec()).await.unwrap();
        q.ensure_queue().await.unwrap();
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn poll_respects_batch_limit_and_order() {
        let q = queue(30_000).await;
        for i in 0..12u8 {
            q.send(vec![i]).await.unwrap();
        }
        let first = q.poll(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first[0].body, vec![0]);
        assert_eq!(first[9].body, vec![9]);

        let rest = q.poll(10, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(q.in_flight().await, 12);
    }

    #[tokio::test]
    async fn invalid_batch_size_is_rejected() {
        let q = queue(1000).await;
        assert!(q.poll(0, Duration::ZERO).await.is_err());
        assert!(q.poll(11, Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn deleted_message_is_not_redelivered() {
        let q = queue(1000).await;
        q.send(b"a".to_vec()).await.unwrap();
        let msgs = q.poll(10, Duration::ZERO).await.unwrap();
        q.delete(&msgs[0].receipt).await.unwrap();
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn undeleted_message_reappears_after_visibility_timeout() {
        let q = queue(1000).await;
        q.send(b"a".to_vec()).await.unwrap();

        let first = q.poll(10, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].receive_count, 1);
        assert!(q.poll(10, Duration::ZERO).await.unwrap().is_empty());

        let started = Instant::now();
        let second = q.poll(10, Duration::from_secs(20)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(999));
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt, first[0].receipt);

        // Старый receipt больше не действителен.
        let err = q.delete(&first[0].receipt).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        q.delete(&second[0].receipt).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_empty_after_wait() {
        let q = queue(1000).await;
        let started = Instant::now();
        let msgs = q.poll(10, Duration::from_secs(20)).await.unwrap();
        assert!(msgs.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn long_poll_wakes_on_send() {
        let q = std::sync::Arc::new(queue(1000).await);
        let poller = {
            let q = q.clone();
            tokio::spawn(async move { q.poll(10, Duration::from_secs(20)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.send(b"late".to_vec()).await.unwrap();

        let msgs = tokio::time::timeout(Duration::from_secs(5), poller)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msgs[0].body, b"late".to_vec());
    }

    #[test]
    fn config_defaults() {
        let cfg: MemoryQueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.name, "pixel-queue");
        assert_eq!(cfg.visibility_timeout_ms, 30_000);
    }
}
