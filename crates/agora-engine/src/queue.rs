//! Bounded FIFO with a single consumer task.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::error::EngineError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Consumer side of a [`MessageQueue`]. Owned by the consumer task, so it
/// may hold mutable state without locking.
#[async_trait]
pub trait QueueDispatcher<T: Send + 'static>: Send + 'static {
    async fn dispatch(&mut self, item: T) -> Result<(), EngineError>;
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    processed: AtomicU64,
    idle: Notify,
}

impl Counters {
    fn pending(&self) -> u64 {
        let processed = self.processed.load(Ordering::Acquire);
        self.enqueued.load(Ordering::Acquire).saturating_sub(processed)
    }

    fn done(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
        if self.pending() == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// Items are dispatched strictly in arrival order. A failed or panicking
/// dispatch is logged and the consumer moves on.
pub struct MessageQueue<T> {
    tx: mpsc::Sender<T>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> MessageQueue<T> {
    pub fn spawn<D>(capacity: usize, dispatcher: D, label: impl Into<String>) -> Self
    where
        D: QueueDispatcher<T>,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();
        let label: String = label.into();
        let span = info_span!("queue", label = %label);
        let consumer = consume(rx, dispatcher, counters.clone(), cancel.clone());
        let task = tokio::spawn(consumer.instrument(span));

        Self {
            tx,
            counters,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Wait for space, then append. Fails only once the queue is shut down.
    pub async fn enqueue(&self, item: T) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::QueueClosed);
        }
        self.counters.enqueued.fetch_add(1, Ordering::AcqRel);
        let sent = tokio::select! {
            sent = self.tx.send(item) => sent.is_ok(),
            () = self.cancel.cancelled() => false,
        };
        if sent {
            Ok(())
        } else {
            self.counters.done();
            Err(EngineError::QueueClosed)
        }
    }

    /// Items accepted but not yet fully dispatched (including one in flight).
    pub fn pending(&self) -> u64 {
        self.counters.pending()
    }

    /// Resolve once every accepted item has been dispatched or skipped.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            if self.counters.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting items. The consumer finishes the item in flight and
    /// skips everything still queued.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the consumer task to exit. Only meaningful after `shutdown`.
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "queue consumer ended abnormally");
            }
        }
    }
}

impl<T> Drop for MessageQueue<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn consume<T, D>(
    mut rx: mpsc::Receiver<T>,
    mut dispatcher: D,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) where
    T: Send + 'static,
    D: QueueDispatcher<T>,
{
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        match AssertUnwindSafe(dispatcher.dispatch(item)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let failure = EngineError::QueueItemFailure(e.to_string());
                error!(category = e.category(), error = %failure, "queue item failed");
            }
            Err(_) => {
                let failure = EngineError::QueueItemFailure("dispatch panicked".into());
                error!(error = %failure, "queue item failed");
            }
        }
        counters.done();
    }

    rx.close();
    let mut skipped = 0u64;
    while rx.try_recv().is_ok() {
        skipped += 1;
        counters.done();
    }
    if skipped > 0 {
        warn!(skipped, "queue shut down with items pending");
    }
    debug!("queue consumer exited");
}
