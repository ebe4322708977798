use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Верхняя граница batch'а за один poll.
pub const MAX_BATCH_LIMIT: usize = 10;

// ═══════════════════════════════════════════════════════════════
//  Consumer Config
// ═══════════════════════════════════════════════════════════════

/// Параметры consumer loop.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Сколько сообщений запрашивать за один poll (1..=10).
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Максимальное ожидание long-poll.
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,
    /// Пауза после ошибки poll'а.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Сколько сообщений batch'а обрабатываются одновременно. 1 = последовательно.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Канал, в который публикуются принятые обновления.
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_max_batch() -> usize {
    10
}
fn default_wait_time_ms() -> u64 {
    20_000
}
fn default_backoff_ms() -> u64 {
    5_000
}
fn default_concurrency() -> usize {
    1
}
fn default_channel() -> String {
    "pixel-updates".into()
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            wait_time_ms: default_wait_time_ms(),
            backoff_ms: default_backoff_ms(),
            concurrency: default_concurrency(),
            channel: default_channel(),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch == 0 || self.max_batch > MAX_BATCH_LIMIT {
            return Err(ConfigError::Invalid {
                field: "max_batch",
                detail: format!("must be in 1..={MAX_BATCH_LIMIT}, got {}", self.max_batch),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                detail: "must be at least 1".into(),
            });
        }
        if self.channel.is_empty() {
            return Err(ConfigError::Invalid {
                field: "channel",
                detail: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
