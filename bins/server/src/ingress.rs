//! TCP ingress: newline-delimited тела сообщений → очередь.
//!
//! Тела кладутся в очередь без разбора; валидирует их consumer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use framing_lines::LinesFraming;
use queue_memory::MemoryQueue;

use crate::config::IngressConfig;
use crate::error::ServerError;

pub struct Ingress {
    listener: TcpListener,
    framing: LinesFraming,
}

impl Ingress {
    pub async fn bind(config: &IngressConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|source| ServerError::Ingress { addr: config.listen.clone(), source })?;
        Ok(Self {
            listener,
            framing: LinesFraming::new(config.max_line),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accept loop до отмены токена. Каждое соединение читается в своей задаче.
    pub fn spawn(self, queue: Arc<MemoryQueue>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Some(addr) = self.local_addr() {
                tracing::info!(%addr, "ingress listening");
            }
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::info!(%peer, "ingress connection");
                            let queue = queue.clone();
                            let framing = self.framing;
                            let conn_token = token.clone();
                            tokio::spawn(async move {
                                tokio::select! {
                                    _ = handle_connection(stream, framing, &queue) => {}
                                    _ = conn_token.cancelled() => {}
                                }
                                tracing::info!(%peer, "ingress connection closed");
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ingress accept error");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    },
                    _ = token.cancelled() => break,
                }
            }
            tracing::info!("ingress stopped");
        })
    }
}

async fn handle_connection(mut stream: TcpStream, framing: LinesFraming, queue: &MemoryQueue) {
    let mut buf = Vec::with_capacity(8192);
    let mut tmp = [0u8; 4096];

    loop {
        loop {
            match framing.decode(&buf) {
                Ok(Some((line, consumed))) => {
                    buf.drain(..consumed);
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    if let Err(e) = queue.send(line).await {
                        tracing::error!(error = %e, "enqueue failed, disconnecting");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "framing error, disconnecting");
                    return;
                }
            }
        }

        match stream.read(&mut tmp).await {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(e) => {
                tracing::error!(error = %e, "ingress read error");
                return;
            }
        }
    }
}
