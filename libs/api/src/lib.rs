mod error;
mod types;
mod util;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub use error::{BackendError, ErrorKind};
pub use types::{OverflowPolicy, PixelUpdate, QueueMessage, ReceiptHandle, StateRecord};
pub use util::{coordinate_key, now_ms};

/// Boxed future, возвращаемый методами backend-трейтов.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  Queue Transport
// ════════════════════════════════════════════════════════════════

/// Очередь с at-least-once доставкой, visibility timeout и явным
/// подтверждением (delete).
pub trait QueueTransport: Send + Sync {
    /// Создать очередь, если её нет. Идемпотентно; вызывается один раз
    /// перед запуском consumer'а.
    fn ensure_queue(&self) -> BackendFuture<'_, ()>;

    /// Long-poll: вернуть до `max_batch` сообщений, ожидая не дольше `wait`.
    /// Пустой результат — не ошибка.
    fn poll(&self, max_batch: usize, wait: Duration) -> BackendFuture<'_, Vec<QueueMessage>>;

    /// Подтвердить обработку — сообщение больше не будет доставлено.
    fn delete(&self, receipt: &ReceiptHandle) -> BackendFuture<'_, ()>;
}

// ════════════════════════════════════════════════════════════════
//  State Store
// ════════════════════════════════════════════════════════════════

/// Key-value store состояния пикселей. Ключ — `StateRecord::coordinate`.
pub trait StateStore: Send + Sync {
    /// Инициализация (создание директорий, replay журнала и т.д.)
    fn init(&self) -> BackendFuture<'_, ()>;

    /// Полная замена записи по ключу (upsert). Одна атомарная запись;
    /// конкурентные upsert'ы в один ключ решаются порядком прихода.
    fn upsert(&self, record: StateRecord) -> BackendFuture<'_, ()>;

    /// Прочитать текущую запись по ключу.
    fn get(&self, coordinate: &str) -> BackendFuture<'_, Option<StateRecord>>;

    /// Flush буферов на диск.
    fn flush(&self) -> BackendFuture<'_, ()>;
}

// ════════════════════════════════════════════════════════════════
//  Broadcast Bus
// ════════════════════════════════════════════════════════════════

/// Fire-and-forget fan-out. Отсутствие подписчиков — не ошибка;
/// ошибка возвращается только при сбое транспорта.
pub trait BroadcastBus: Send + Sync {
    fn publish(&self, channel: &str, payload: &[u8]) -> BackendFuture<'_, ()>;
}
