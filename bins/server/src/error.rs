#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Consumer(#[from] pipeline::ConfigError),

    #[error("backend: {0}")]
    Backend(#[from] pixel_api::BackendError),

    #[error("ingress bind {addr}: {source}")]
    Ingress { addr: String, source: std::io::Error },

    #[error("broadcast: {0}")]
    Broadcast(#[from] broadcast_engine::BroadcastError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
