pub mod error;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, RwLock};

use pixel_api::{BackendError, BroadcastBus, OverflowPolicy};

pub use error::BroadcastError;

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

struct Subscriber {
    tx: mpsc::Sender<Vec<u8>>,
    overflow: OverflowPolicy,
}

/// Подписка на канал — поток payload'ов в порядке публикации.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Subscription {
    /// Следующий payload. None = hub закрыт и буфер пуст.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Неблокирующее чтение (для тестов и drain'а).
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

// ═══════════════════════════════════════════════════════════════
//  BroadcastHub
// ═══════════════════════════════════════════════════════════════

/// In-process fan-out: именованные каналы, у каждого подписчика —
/// свой bounded mpsc с overflow policy.
///
/// Payload'ы не хранятся для тех, кто подпишется позже. Порядок доставки
/// каждому подписчику совпадает с порядком вызовов `deliver`.
pub struct BroadcastHub {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
    closed: AtomicBool,
    buffer: usize,
    overflow: OverflowPolicy,
}

impl BroadcastHub {
    /// `buffer` и `overflow` — значения по умолчанию для `subscribe`.
    pub fn new(buffer: usize, overflow: OverflowPolicy) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            buffer: buffer.max(1),
            overflow,
        }
    }

    /// Подписаться с настройками hub'а по умолчанию.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, BroadcastError> {
        self.subscribe_with(channel, self.buffer, self.overflow).await
    }

    pub async fn subscribe_with(
        &self,
        channel: &str,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Result<Subscription, BroadcastError> {
        if channel.is_empty() {
            return Err(BroadcastError::EmptyChannel);
        }
        if self.is_closed() {
            return Err(BroadcastError::Closed);
        }
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { tx, overflow });
        Ok(Subscription { channel: channel.to_string(), rx })
    }

    /// Закрыть hub: все подписки завершаются, publish возвращает ошибку.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.write().await.clear();
        tracing::info!("broadcast hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Количество живых подписчиков канала.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(channel)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Разослать payload всем подписчикам канала. Возвращает число
    /// подписчиков, которым payload был передан.
    ///
    /// Drop-подписчику payload отдаётся через `try_send`, при полном буфере
    /// он теряется. BackPressure-подписчику `deliver` ждёт свободного места,
    /// так что publisher замедляется до скорости самого медленного из них.
    pub async fn deliver(&self, channel: &str, payload: &[u8]) -> Result<usize, BroadcastError> {
        if channel.is_empty() {
            return Err(BroadcastError::EmptyChannel);
        }
        if self.is_closed() {
            return Err(BroadcastError::Closed);
        }

        // Снимок отправителей: write lock не держим через await.
        let targets: Vec<(mpsc::Sender<Vec<u8>>, OverflowPolicy)> = {
            let mut channels = self.channels.write().await;
            let Some(subs) = channels.get_mut(channel) else {
                return Ok(0);
            };
            subs.retain(|s| !s.tx.is_closed());
            if subs.is_empty() {
                channels.remove(channel);
                return Ok(0);
            }
            subs.iter().map(|s| (s.tx.clone(), s.overflow)).collect()
        };

        let mut delivered = 0;
        for (tx, overflow) in targets {
            match overflow {
                OverflowPolicy::Drop => match tx.try_send(payload.to_vec()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(channel = %channel, "subscriber channel full, dropping");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                },
                OverflowPolicy::BackPressure => {
                    if tx.send(payload.to_vec()).await.is_ok() {
                        delivered += 1;
                    } else {
                        tracing::debug!(channel = %channel, "subscriber closed during backpressure send");
                    }
                }
            }
        }

        Ok(delivered)
    }
}

impl BroadcastBus for BroadcastHub {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let channel = channel.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            let delivered = self
                .deliver(&channel, &payload)
                .await
                .map_err(BroadcastError::into_backend_error)?;
            tracing::trace!(channel = %channel, subscribers = delivered, "broadcast");
            Ok(())
        })
    }
}
