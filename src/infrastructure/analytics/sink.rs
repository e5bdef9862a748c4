//! Buffered analytics sink and its background writer

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::AnalyticsSettings;
use crate::domain::analytics::{AnalyticsSink, VerificationEventRepository};
use crate::domain::verification::VerificationEvent;
use crate::infrastructure::observability::{record_analytics_batch, record_analytics_dropped};

/// Hands events to a bounded queue; a full queue drops the event
#[derive(Debug, Clone)]
pub struct BufferedAnalyticsSink {
    sender: mpsc::Sender<VerificationEvent>,
}

impl AnalyticsSink for BufferedAnalyticsSink {
    fn record(&self, event: VerificationEvent) {
        if let Err(e) = self.sender.try_send(event) {
            record_analytics_dropped();
            debug!("Dropped verification event: {}", e);
        }
    }
}

/// Sink used when analytics are disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyticsSink;

impl AnalyticsSink for NoopAnalyticsSink {
    fn record(&self, _event: VerificationEvent) {}
}

/// Handle to the background writer
///
/// Dropping it also stops the writer after the queue is drained.
#[derive(Debug)]
pub struct AnalyticsWorker {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl AnalyticsWorker {
    /// Stop accepting events, write what is queued and wait for the writer
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());

        if let Err(e) = self.handle.await {
            warn!("Analytics worker terminated abnormally: {}", e);
        }
    }
}

/// Start the writer task and return the sink feeding it
pub fn spawn_analytics(
    repository: Arc<dyn VerificationEventRepository>,
    settings: &AnalyticsSettings,
) -> (BufferedAnalyticsSink, AnalyticsWorker) {
    let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let batch_size = settings.batch_size.max(1);
    let flush_interval = Duration::from_millis(settings.flush_interval_ms.max(1));

    let handle = tokio::spawn(run_worker(
        receiver,
        repository,
        batch_size,
        flush_interval,
        shutdown_rx,
    ));

    (
        BufferedAnalyticsSink { sender },
        AnalyticsWorker {
            handle,
            shutdown: shutdown_tx,
        },
    )
}

async fn run_worker(
    mut receiver: mpsc::Receiver<VerificationEvent>,
    repository: Arc<dyn VerificationEventRepository>,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut buffer = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(event) => {
                    buffer.push(event);
                    if buffer.len() >= batch_size {
                        flush(repository.as_ref(), &mut buffer).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(repository.as_ref(), &mut buffer).await;
                }
            }
            _ = &mut shutdown => {
                receiver.close();
                while let Some(event) = receiver.recv().await {
                    buffer.push(event);
                    if buffer.len() >= batch_size {
                        flush(repository.as_ref(), &mut buffer).await;
                    }
                }
                break;
            }
        }
    }

    if !buffer.is_empty() {
        flush(repository.as_ref(), &mut buffer).await;
    }

    info!("Analytics worker stopped");
}

async fn flush(repository: &dyn VerificationEventRepository, buffer: &mut Vec<VerificationEvent>) {
    let batch = std::mem::take(buffer);
    let size = batch.len();

    match repository.write_batch(batch).await {
        Ok(()) => {
            record_analytics_batch(size);
            debug!(events = size, "Wrote verification events");
        }
        Err(e) => warn!(events = size, "Failed to write verification events: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::analytics::MockVerificationEventRepository;
    use crate::domain::verification::VerificationCode;
    use crate::domain::DomainError;
    use crate::infrastructure::analytics::InMemoryVerificationEventRepository;

    fn event(outcome: VerificationCode) -> VerificationEvent {
        VerificationEvent {
            key_id: None,
            api_id: None,
            identity_id: None,
            outcome,
            cost: 1,
            time: Utc::now(),
        }
    }

    fn settings(queue_capacity: usize, batch_size: usize, flush_interval_ms: u64) -> AnalyticsSettings {
        AnalyticsSettings {
            enabled: true,
            queue_capacity,
            batch_size,
            flush_interval_ms,
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_events() {
        let repository = Arc::new(InMemoryVerificationEventRepository::new());
        let (sink, worker) = spawn_analytics(repository.clone(), &settings(100, 50, 60_000));

        for _ in 0..5 {
            sink.record(event(VerificationCode::Valid));
        }
        worker.shutdown().await;

        assert_eq!(repository.len().await, 5);
    }

    #[tokio::test]
    async fn test_full_batch_is_written_without_waiting_for_interval() {
        let repository = Arc::new(InMemoryVerificationEventRepository::new());
        let (sink, worker) = spawn_analytics(repository.clone(), &settings(100, 2, 60_000));

        sink.record(event(VerificationCode::Valid));
        sink.record(event(VerificationCode::NotFound));

        for _ in 0..50 {
            if repository.len().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repository.len().await, 2);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_interval_flushes_partial_batch() {
        let repository = Arc::new(InMemoryVerificationEventRepository::new());
        let (sink, worker) = spawn_analytics(repository.clone(), &settings(100, 100, 20));

        sink.record(event(VerificationCode::Valid));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(repository.len().await, 1);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_overflow_drops_without_blocking() {
        let (sender, mut receiver) = mpsc::channel(2);
        let sink = BufferedAnalyticsSink { sender };

        for _ in 0..10 {
            sink.record(event(VerificationCode::Valid));
        }

        let mut received = 0;
        while receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let mut repository = MockVerificationEventRepository::new();
        repository
            .expect_write_batch()
            .times(1)
            .returning(|_| Err(DomainError::storage("database down")));

        let (sink, worker) = spawn_analytics(Arc::new(repository), &settings(10, 10, 60_000));
        sink.record(event(VerificationCode::Valid));

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_exits_when_senders_are_gone() {
        let repository = Arc::new(InMemoryVerificationEventRepository::new());
        let (sink, worker) = spawn_analytics(repository.clone(), &settings(10, 10, 60_000));

        sink.record(event(VerificationCode::Valid));
        drop(sink);

        tokio::time::timeout(Duration::from_secs(1), worker.handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repository.len().await, 1);
    }
}
