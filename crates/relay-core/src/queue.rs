//! Bounded, lossy hand-off buffer between a capture loop and the worker pool.

use crate::ChangeEvent;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Returned by [`EventQueue::try_push`] when the buffer is full. Carries the
/// rejected event back so the caller can decide what dropping means.
#[derive(Debug, Error)]
#[error("event queue is full")]
pub struct QueueFull(pub ChangeEvent);

/// Fixed-capacity multi-consumer queue of pending change events.
///
/// Producers never wait: [`try_push`](Self::try_push) either accepts the
/// event immediately or hands it back. Consumers block in
/// [`pop`](Self::pop) until an event arrives or cancellation is observed.
/// Cloning shares the same buffer.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::Sender<ChangeEvent>,
    receiver: Arc<Mutex<mpsc::Receiver<ChangeEvent>>>,
}

impl EventQueue {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn try_push(&self, event: ChangeEvent) -> Result<(), QueueFull> {
        // The receiver lives as long as any clone of the queue, so `Closed`
        // cannot be observed by a caller holding `&self`.
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) | mpsc::error::TrySendError::Closed(event) => {
                QueueFull(event)
            }
        })
    }

    /// Wait for the next event. Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<ChangeEvent> {
        let mut receiver = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            guard = self.receiver.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            event = receiver.recv() => event,
        }
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
