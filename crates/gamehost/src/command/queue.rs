//! Serialized operator command pipeline.
//!
//! A bounded FIFO with a single consumer task. Commands are delivered to the
//! sole subscriber in submission order, one at a time; the next command is
//! not dequeued until the current delivery has returned.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Maximum number of commands awaiting delivery.
pub const QUEUE_CAPACITY: usize = 64;

/// The queue has been shut down and accepts no further commands.
#[derive(Debug, Error)]
#[error("command queue is shut down")]
pub struct QueueClosed;

/// Multi-producer, single-consumer ordered command pipeline.
pub struct CommandQueue {
    tx: mpsc::Sender<String>,
    pending: Arc<AtomicUsize>,
    consumer: JoinHandle<()>,
}

impl CommandQueue {
    /// Create a queue delivering to `subscriber`, the one and only consumer.
    pub fn new<S, Fut>(mut subscriber: S) -> Self
    where
        S: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let pending = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&pending);
        let consumer = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                // Dequeued: the command is in flight, no longer pending.
                count.fetch_sub(1, Ordering::SeqCst);
                subscriber(command).await;
            }
            debug!("command queue drained");
        });

        Self {
            tx,
            pending,
            consumer,
        }
    }

    /// Enqueue a raw command line for delivery.
    pub async fn push(&self, command: impl Into<String>) -> Result<(), QueueClosed> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(command.into()).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueClosed);
        }
        Ok(())
    }

    /// Whether no commands are awaiting delivery. A command currently being
    /// delivered does not count as pending.
    pub fn is_empty(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Stop accepting commands and wait until every already-accepted command
    /// has finished delivery.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.consumer.await;
    }
}
