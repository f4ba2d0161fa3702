//! Unbounded multi-producer, multi-consumer FIFO of dispatch messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

use super::message::DispatchMessage;
use crate::{Error, Result};

/// Shared work queue.
///
/// `put` never waits. Consumers share one receiver behind an async mutex, so
/// each message goes to exactly one consumer and messages leave in the order
/// they were put.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<DispatchMessage>,
    consumer: WorkQueueConsumer,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            consumer: WorkQueueConsumer {
                rx: Arc::new(Mutex::new(rx)),
                depth: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    /// Append a message to the back of the queue.
    pub fn put(&self, message: DispatchMessage) -> Result<()> {
        // Count before sending so a fast consumer never underflows the depth.
        let depth = &self.consumer.depth;
        depth.fetch_add(1, Ordering::SeqCst);
        self.tx.send(message).map_err(|_| {
            depth.fetch_sub(1, Ordering::SeqCst);
            Error::QueueClosed
        })
    }

    /// Take the message at the front of the queue, waiting until one is available.
    ///
    /// Returns `None` once every sender is gone and the backlog is drained.
    pub async fn get(&self) -> Option<DispatchMessage> {
        self.consumer.get().await
    }

    /// Number of messages put but not yet taken.
    pub fn len(&self) -> usize {
        self.consumer.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A consumer-only handle that does not keep the channel open.
    pub(crate) fn consumer(&self) -> WorkQueueConsumer {
        self.consumer.clone()
    }
}

/// Receiving side of a [`WorkQueue`], held by workers.
///
/// Unlike a full `WorkQueue` clone it holds no sender, so once the owning
/// queue is dropped, `get` drains the backlog and then returns `None`.
#[derive(Debug, Clone)]
pub(crate) struct WorkQueueConsumer {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<DispatchMessage>>>,
    depth: Arc<AtomicUsize>,
}

impl WorkQueueConsumer {
    pub(crate) async fn get(&self) -> Option<DispatchMessage> {
        let message = self.rx.lock().await.recv().await;
        if message.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }
}
