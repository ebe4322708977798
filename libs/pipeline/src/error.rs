use pixel_api::BackendError;

/// Тело сообщения не является pixel update.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Ошибки обработки одного сообщения. Каждый вариант имеет свою
/// стратегию восстановления в consumer loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Сообщение удаляется без повтора.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// Сообщение остаётся в очереди до повторной доставки.
    #[error("store upsert ({coordinate}): {source}")]
    Store { coordinate: String, source: BackendError },

    /// Состояние уже записано — сообщение удаляется.
    #[error("publish ({channel}): {source}")]
    Publish { channel: String, source: BackendError },
}

/// Удаление из очереди не удалось: сообщение будет доставлено
/// повторно и применено ещё раз.
#[derive(Debug, thiserror::Error)]
#[error("ack ({message_id}): {source}")]
pub struct AckError {
    pub message_id: String,
    pub source: BackendError,
}

#[derive(Debug, thiserror::Error)]
#[error("poll: {0}")]
pub struct PollError(#[from] pub BackendError);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("consumer.{field}: {detail}")]
    Invalid { field: &'static str, detail: String },
}
