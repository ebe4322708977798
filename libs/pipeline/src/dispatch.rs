use std::sync::Arc;

use pixel_api::{BroadcastBus, QueueMessage, StateRecord, StateStore, now_ms};

use crate::codec;
use crate::error::DispatchError;

/// Итог обработки одного сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Состояние записано и опубликовано.
    Applied,
    /// Состояние записано, публикация не удалась.
    AppliedPublishFailed,
    /// Тело не декодируется — сообщение выбрасывается.
    Discarded,
    /// Store недоступен — сообщение остаётся для повторной доставки.
    Retained,
}

impl DispatchOutcome {
    /// Нужно ли удалить сообщение из очереди.
    pub fn should_ack(self) -> bool {
        !matches!(self, DispatchOutcome::Retained)
    }
}

/// decode → upsert → publish для одного сообщения.
///
/// Store и bus — разделяемые reentrant handle'ы; один Dispatcher
/// можно вызывать из нескольких задач одновременно.
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    bus: Arc<dyn BroadcastBus>,
    channel: String,
    clock: fn() -> i64,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn StateStore>, bus: Arc<dyn BroadcastBus>, channel: impl Into<String>) -> Self {
        Self {
            store,
            bus,
            channel: channel.into(),
            clock: now_ms,
        }
    }

    /// Заменить источник серверного времени (`lastUpdated`).
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Обработать сообщение и отобразить ошибку в её стратегию восстановления.
    pub async fn dispatch(&self, message: &QueueMessage) -> DispatchOutcome {
        match self.apply(&message.body).await {
            Ok(()) => DispatchOutcome::Applied,
            Err(e @ DispatchError::Decode(_)) => {
                tracing::warn!(message_id = %message.message_id, error = %e, "undecodable message, discarding");
                DispatchOutcome::Discarded
            }
            Err(e @ DispatchError::Store { .. }) => {
                tracing::error!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    error = %e,
                    "store error, leaving message for redelivery"
                );
                DispatchOutcome::Retained
            }
            Err(e @ DispatchError::Publish { .. }) => {
                tracing::warn!(message_id = %message.message_id, error = %e, "broadcast failed, state already stored");
                DispatchOutcome::AppliedPublishFailed
            }
        }
    }

    /// decode → upsert → publish; возвращает первую ошибку.
    ///
    /// В канал уходит исходное тело байт-в-байт, а не пересериализованный
    /// `PixelUpdate`.
    pub async fn apply(&self, body: &[u8]) -> Result<(), DispatchError> {
        let update = codec::decode(body)?;
        let record = StateRecord::from_update(&update, (self.clock)());
        let coordinate = record.coordinate.clone();

        tracing::debug!(
            coordinate = %coordinate,
            color = update.color.as_deref().unwrap_or("-"),
            "processing pixel"
        );

        self.store
            .upsert(record)
            .await
            .map_err(|source| DispatchError::Store { coordinate, source })?;

        self.bus
            .publish(&self.channel, body)
            .await
            .map_err(|source| DispatchError::Publish { channel: self.channel.clone(), source })?;

        Ok(())
    }
}
