use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use pixel_api::{BroadcastBus, QueueMessage, QueueTransport, StateStore};

use crate::config::ConsumerConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{AckError, ConfigError, PollError};

// ═══════════════════════════════════════════════════════════════
//  State & stats
// ═══════════════════════════════════════════════════════════════

/// Текущая фаза consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Polling,
    Dispatching,
    Acknowledging,
    Backoff,
    Stopped,
}

/// Счётчики consumer loop. Обновляются из всех dispatch-задач.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    polls: AtomicU64,
    empty_polls: AtomicU64,
    poll_failures: AtomicU64,
    applied: AtomicU64,
    publish_failures: AtomicU64,
    discarded: AtomicU64,
    retained: AtomicU64,
    acked: AtomicU64,
    ack_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub polls: u64,
    pub empty_polls: u64,
    pub poll_failures: u64,
    /// Записано в store (включая сообщения с неудачной публикацией).
    pub applied: u64,
    pub publish_failures: u64,
    pub discarded: u64,
    pub retained: u64,
    pub acked: u64,
    pub ack_failures: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Applied => &self.applied,
            DispatchOutcome::AppliedPublishFailed => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                &self.applied
            }
            DispatchOutcome::Discarded => &self.discarded,
            DispatchOutcome::Retained => &self.retained,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Worker — dispatch + ack одного сообщения
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Worker {
    queue: Arc<dyn QueueTransport>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<ConsumerStats>,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl Worker {
    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    async fn handle(&self, message: QueueMessage) -> DispatchOutcome {
        self.set_state(ConsumerState::Dispatching);
        let outcome = self.dispatcher.dispatch(&message).await;
        self.stats.record(outcome);

        if outcome.should_ack() {
            self.set_state(ConsumerState::Acknowledging);
            match self.queue.delete(&message.receipt).await {
                Ok(()) => {
                    self.stats.acked.fetch_add(1, Ordering::Relaxed);
                }
                Err(source) => {
                    self.stats.ack_failures.fetch_add(1, Ordering::Relaxed);
                    let e = AckError { message_id: message.message_id.clone(), source };
                    tracing::error!(error = %e, "failed to delete message, it will be redelivered");
                }
            }
        }
        outcome
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer
// ═══════════════════════════════════════════════════════════════

/// Consumer loop: poll → dispatch → ack, бесконечно до отмены токена.
///
/// Ошибки никогда не завершают loop: ошибка poll'а — пауза `backoff`,
/// ошибки сообщений разбираются в `Dispatcher::dispatch`.
pub struct Consumer {
    worker: Worker,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        store: Arc<dyn StateStore>,
        bus: Arc<dyn BroadcastBus>,
        config: ConsumerConfig,
    ) -> Result<Self, ConfigError> {
        let dispatcher = Dispatcher::new(store, bus, config.channel.clone());
        Self::with_dispatcher(queue, dispatcher, config)
    }

    /// Собрать consumer вокруг готового Dispatcher'а. Канал берётся из
    /// Dispatcher'а, `config.channel` игнорируется.
    pub fn with_dispatcher(
        queue: Arc<dyn QueueTransport>,
        dispatcher: Dispatcher,
        config: ConsumerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(ConsumerState::Idle);
        Ok(Self {
            worker: Worker {
                queue,
                dispatcher: Arc::new(dispatcher),
                stats: Arc::new(ConsumerStats::default()),
                state: Arc::new(state),
            },
            config,
        })
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.worker.stats.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.worker.state.subscribe()
    }

    /// Запустить loop в отдельной задаче.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    /// Крутить loop до отмены `token`.
    ///
    /// Отмена прерывает long-poll и backoff; начатый batch
    /// дообрабатывается до конца.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            max_batch = self.config.max_batch,
            wait_ms = self.config.wait_time_ms,
            concurrency = self.config.concurrency,
            channel = %self.worker.dispatcher.channel(),
            "consumer started"
        );

        loop {
            if token.is_cancelled() {
                break;
            }
            self.worker.set_state(ConsumerState::Polling);

            let polled = tokio::select! {
                polled = self.poll() => polled,
                _ = token.cancelled() => break,
            };

            match polled {
                Ok(batch) if batch.is_empty() => {
                    self.worker.stats.empty_polls.fetch_add(1, Ordering::Relaxed);
                }
                Ok(batch) => {
                    tracing::debug!(messages = batch.len(), "received batch");
                    self.process_batch(batch).await;
                }
                Err(e) => {
                    self.worker.stats.poll_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        error = %e,
                        backoff_ms = self.config.backoff_ms,
                        "poll failed, backing off"
                    );
                    self.worker.set_state(ConsumerState::Backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.backoff()) => {}
                        _ = token.cancelled() => break,
                    }
                }
            }
        }

        self.worker.set_state(ConsumerState::Stopped);
        tracing::info!("consumer stopped");
    }

    async fn poll(&self) -> Result<Vec<QueueMessage>, PollError> {
        self.worker.stats.polls.fetch_add(1, Ordering::Relaxed);
        let batch = self
            .worker
            .queue
            .poll(self.config.max_batch, self.config.wait_time())
            .await?;
        Ok(batch)
    }

    /// Обработать batch: последовательно при `concurrency == 1`,
    /// иначе не более `concurrency` сообщений одновременно.
    ///
    /// Каждое сообщение подтверждается независимо от остальных.
    pub async fn process_batch(&self, batch: Vec<QueueMessage>) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());

        if self.config.concurrency <= 1 {
            for message in batch {
                outcomes.push(self.worker.handle(message).await);
            }
            return outcomes;
        }

        let mut tasks = JoinSet::new();
        for message in batch {
            while tasks.len() >= self.config.concurrency {
                if let Some(joined) = tasks.join_next().await {
                    collect(joined, &mut outcomes);
                }
            }
            let worker = self.worker.clone();
            tasks.spawn(async move { worker.handle(message).await });
        }
        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut outcomes);
        }
        outcomes
    }
}

fn collect(
    joined: Result<DispatchOutcome, tokio::task::JoinError>,
    outcomes: &mut Vec<DispatchOutcome>,
) {
    match joined {
        Ok(outcome) => outcomes.push(outcome),
        // Сообщение не подтверждено — очередь доставит его снова.
        Err(e) => tracing::error!(error = %e, "dispatch task failed"),
    }
}
