//! Bounded FIFO queues between pipeline components.
//!
//! A stage queue has any number of senders and one pool of receivers. All
//! receivers share the same underlying channel, so each item is taken by
//! exactly one worker. The queue closes when every [`QueueSender`] has been
//! dropped; workers then drain what is left and see `None`.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

/// Returned by [`QueueSender::push`] once no receiver is left.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Stage queue is closed")]
pub struct QueueClosed;

/// Create a bounded queue holding at most `capacity` items (minimum one).
#[must_use]
pub fn stage_queue<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender { inner: tx },
        QueueReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producing half of a stage queue.
#[derive(Debug)]
pub struct QueueSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue `item`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if every receiver has been dropped.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed> {
        self.inner.send(item).await.map_err(|_| QueueClosed)
    }

    /// Items currently waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    /// Whether every receiver has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Consuming half of a stage queue, shared by a worker pool.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Take the next item, or `None` once the queue is closed and drained.
    ///
    /// Cancel safe.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}
