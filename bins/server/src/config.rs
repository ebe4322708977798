use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use pixel_api::OverflowPolicy;
pub use pipeline::ConsumerConfig;
pub use queue_memory::MemoryQueueConfig;
pub use storage_file::FileStoreConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "pixel-worker", about = "Consumer очереди pixel update'ов")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить worker
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub queue: MemoryQueueConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// TCP ingress: строки из сокета кладутся в очередь как есть.
    #[serde(default)]
    pub ingress: Option<IngressConfig>,
}

/// Backend state store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    File(FileStoreConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Размер буфера каждого подписчика.
    #[serde(default = "default_broadcast_buffer")]
    pub buffer: usize,
    #[serde(default = "default_broadcast_overflow")]
    pub overflow: OverflowPolicy,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            buffer: default_broadcast_buffer(),
            overflow: default_broadcast_overflow(),
        }
    }
}

fn default_broadcast_buffer() -> usize {
    4096
}
fn default_broadcast_overflow() -> OverflowPolicy {
    OverflowPolicy::Drop
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    pub listen: String,
    /// Максимальная длина строки (0 = без ограничения).
    #[serde(default = "default_max_line")]
    pub max_line: usize,
}

fn default_max_line() -> usize {
    64 * 1024
}

impl WorkerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
