use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use broadcast_engine::BroadcastHub;
use pipeline::Consumer;
use pixel_api::{QueueTransport, StateStore};
use queue_memory::MemoryQueue;
use storage_file::FileStateStore;
use storage_memory::MemoryStateStore;

use crate::config::{ServeArgs, StoreConfig, WorkerConfig};
use crate::error::ServerError;
use crate::ingress::Ingress;

/// Сколько ждать завершения задач после Ctrl+C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("pixel-worker starting");

    // --- Load config ---
    let config = WorkerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- State store ---
    let store: Arc<dyn StateStore> = match &config.store {
        StoreConfig::Memory => Arc::new(MemoryStateStore::new()),
        StoreConfig::File(file_cfg) => Arc::new(FileStateStore::new(file_cfg)),
    };
    store.init().await?;
    tracing::info!(store = ?config.store, "state store ready");

    // --- Queue (bootstrap: создать, если нет) ---
    let queue = Arc::new(MemoryQueue::new(&config.queue));
    queue.ensure_queue().await?;

    // --- Broadcast bus ---
    let hub = Arc::new(BroadcastHub::new(config.broadcast.buffer, config.broadcast.overflow));

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    handles.push(spawn_tap(&hub, &config.consumer.channel, token.clone()).await?);

    // --- Ingress ---
    if let Some(ingress_cfg) = &config.ingress {
        let ingress = Ingress::bind(ingress_cfg).await?;
        handles.push(ingress.spawn(queue.clone(), token.clone()));
    }

    // --- Consumer ---
    let consumer = Consumer::new(queue.clone(), store.clone(), hub.clone(), config.consumer.clone())?;
    let stats = consumer.stats();
    let consumer_handle = consumer.spawn(token.clone());

    tracing::info!(queue = %queue.name(), "worker ready");

    // --- Ожидание Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();

    // Consumer дообрабатывает текущий batch
    drain(consumer_handle, DRAIN_TIMEOUT).await;

    for h in &handles {
        if !h.is_finished() {
            h.abort();
        }
    }
    for h in handles {
        let _ = h.await;
    }

    hub.close().await;

    if let Err(e) = store.flush().await {
        tracing::error!(error = ?e, "store flush error");
    }

    let s = stats.snapshot();
    tracing::info!(
        polls = s.polls,
        empty_polls = s.empty_polls,
        applied = s.applied,
        discarded = s.discarded,
        retained = s.retained,
        publish_failures = s.publish_failures,
        poll_failures = s.poll_failures,
        acked = s.acked,
        ack_failures = s.ack_failures,
        pending = queue.len().await,
        "shutdown complete"
    );
    Ok(())
}

/// Дождаться завершения задачи; по таймауту — abort и ждать отмены.
/// Возвращает false, если задачу пришлось прервать.
async fn drain(mut handle: JoinHandle<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "consumer task failed");
            true
        }
        Err(_) => {
            handle.abort();
            let _ = handle.await;
            tracing::warn!("consumer did not stop in time, aborted; unacked messages will be redelivered");
            false
        }
    }
}

/// Подписчик, логирующий весь трафик канала на уровне debug.
async fn spawn_tap(
    hub: &Arc<BroadcastHub>,
    channel: &str,
    token: CancellationToken,
) -> Result<JoinHandle<()>, ServerError> {
    let mut sub = hub.subscribe(channel).await?;
    let channel = sub.channel().to_string();
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                payload = sub.recv() => match payload {
                    Some(payload) => {
                        tracing::debug!(
                            channel = %channel,
                            payload = %String::from_utf8_lossy(&payload),
                            "broadcast"
                        );
                    }
                    None => break,
                },
                _ = token.cancelled() => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn drain_aborts_task_that_ignores_cancellation() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        assert!(!drain(handle, Duration::from_millis(20)).await);
        assert!(dropped.load(Ordering::SeqCst), "task must be stopped, not detached");
    }

    #[tokio::test]
    async fn drain_waits_for_finished_task() {
        let handle = tokio::spawn(async {});
        assert!(drain(handle, Duration::from_secs(1)).await);
    }
}
