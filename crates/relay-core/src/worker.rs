//! Fixed-size pool of delivery workers draining an [`EventQueue`].

use crate::{ChangeEvent, EventQueue};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Delivery of a single change event to its destination.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> anyhow::Result<()>;
}

/// Symmetric, stateless workers that pop events and deliver them one at a
/// time. Event-to-worker assignment is arbitrary, so events handled by
/// different workers may be delivered out of order.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime. They run until
    /// `cancel` fires.
    pub fn start(
        size: usize,
        queue: EventQueue,
        notifier: Arc<dyn Notify>,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..size)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    queue.clone(),
                    Arc::clone(&notifier),
                    cancel.clone(),
                ))
            })
            .collect();
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit, aborting those still busy with a
    /// delivery after `grace`. Call after cancelling the pool's token.
    pub async fn shutdown(self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        for (id, mut handle) in self.handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Worker {id} terminated abnormally: {e}"),
                Err(_) => {
                    warn!("Worker {id} still delivering after {grace:?}, aborting");
                    handle.abort();
                }
            }
        }
    }
}

async fn run_worker(
    id: usize,
    queue: EventQueue,
    notifier: Arc<dyn Notify>,
    cancel: CancellationToken,
) {
    debug!("Worker {id} started");
    while let Some(event) = queue.pop(&cancel).await {
        if let Err(e) = notifier.notify(&event).await {
            error!("Worker {id}: notification failed: {e:#}");
        }
    }
    debug!("Worker {id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Operation;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<ChangeEvent>>,
    }

    #[async_trait]
    impl Notify for RecordingNotifier {
        async fn notify(&self, event: &ChangeEvent) -> anyhow::Result<()> {
            self.delivered.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Notify for FailingNotifier {
        async fn notify(&self, _event: &ChangeEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("webhook returned HTTP 500")
        }
    }

    fn event(id: i64) -> ChangeEvent {
        let mut data = serde_json::Map::new();
        data.insert("id".to_string(), id.into());
        ChangeEvent::new(Operation::Insert, "orders", Utc::now(), data, None)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_pool_delivers_every_event_once() {
        let queue = EventQueue::new(32);
        let notifier = Arc::new(RecordingNotifier::default());
        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(4, queue.clone(), notifier.clone(), cancel.clone());
        assert_eq!(pool.size(), 4);

        for id in 0..20 {
            queue.try_push(event(id)).unwrap();
        }
        wait_for(|| notifier.delivered.lock().unwrap().len() == 20).await;

        cancel.cancel();
        pool.shutdown(Duration::from_secs(1)).await;

        let mut ids: Vec<i64> = notifier
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.data()["id"].as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_delivery_errors_do_not_stop_workers() {
        let queue = EventQueue::new(8);
        let notifier = Arc::new(FailingNotifier {
            calls: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(1, queue.clone(), notifier.clone(), cancel.clone());

        for id in 0..5 {
            queue.try_push(event(id)).unwrap();
        }
        wait_for(|| notifier.calls.load(Ordering::SeqCst) == 5).await;

        cancel.cancel();
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_idle_workers_stop_on_cancellation() {
        let queue = EventQueue::new(8);
        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(
            3,
            queue,
            Arc::new(RecordingNotifier::default()),
            cancel.clone(),
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), pool.shutdown(Duration::from_secs(5)))
            .await
            .expect("idle workers should exit promptly");
    }
}
