// src/system/queue.rs

//! # Background Queue
//!
//! A fixed set of worker tasks pulling zero-argument async work items from one
//! shared channel. Any number of producers may enqueue concurrently.
//!
//! The queue is fail-fast: once a dequeued item fails (error or panic) every
//! later `enqueue` is refused with the accumulated failures until they are
//! collected with [`BackgroundQueue::take_failures`].

use crate::core::command_executor::catch_failure;
use futures::{FutureExt, future::BoxFuture};
use log::{debug, warn};
use std::{
    fmt,
    future::Future,
    pin::pin,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, Notify, mpsc, watch},
    task::JoinHandle,
};

/// A unit of background work.
pub type WorkItem = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Why the queue refused to start or to accept work.
#[derive(Error, Debug)]
pub enum QueueError {
    /// An earlier item failed; carries the rendered failures.
    #[error("The queue refuses new work: {} earlier item(s) failed: {}", .failures.len(), .failures.join("; "))]
    Faulted { failures: Vec<String> },
    /// The receiving side is gone.
    #[error("The queue is closed.")]
    Closed,
    /// `start` was called outside a tokio runtime.
    #[error("Workers can only be started from within a tokio runtime.")]
    NoRuntime,
    /// `start` was asked for zero workers.
    #[error("The queue needs at least one worker.")]
    NoWorkers,
}

struct Shared {
    receiver: AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>,
    failures: Mutex<Vec<anyhow::Error>>,
    pending: AtomicUsize,
    /// Signalled when `pending` drops to zero or the queue stops.
    idle: Notify,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn failure_messages(&self) -> Vec<String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| format!("{:#}", e))
            .collect()
    }
}

struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// A fixed-size pool of async workers draining one shared channel.
pub struct BackgroundQueue {
    sender: mpsc::UnboundedSender<WorkItem>,
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl Default for BackgroundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundQueue {
    /// Creates a stopped queue. Items enqueued before [`start`](Self::start) wait for the workers.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            shared: Arc::new(Shared {
                receiver: AsyncMutex::new(receiver),
                failures: Mutex::new(Vec::new()),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            workers: Mutex::new(None),
        }
    }

    /// Spawns `count` workers on the current runtime. Returns `Ok(false)` if
    /// the queue was already running.
    ///
    /// # Errors
    /// `NoWorkers` when `count` is zero, `NoRuntime` outside a tokio runtime.
    pub fn start(&self, count: usize) -> Result<bool, QueueError> {
        if count == 0 {
            return Err(QueueError::NoWorkers);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.is_some() {
            return Ok(false);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = (0..count)
            .map(|id| {
                let shared = Arc::clone(&self.shared);
                runtime.spawn(worker_loop(id, shared, shutdown_rx.clone()))
            })
            .collect();
        *workers = Some(Workers { shutdown, handles });
        debug!("Background queue started with {} worker(s).", count);
        Ok(true)
    }

    /// Stops the workers. Items already running finish; items still queued are
    /// dropped. Returns the number of dropped items.
    pub async fn stop(&self) -> usize {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(workers) = workers else {
            return 0;
        };

        // Fails only when every worker already exited.
        let _ = workers.shutdown.send(true);
        for handle in workers.handles {
            if let Err(e) = handle.await {
                warn!("Queue worker ended abnormally: {}", e);
            }
        }

        let mut receiver = self.shared.receiver.lock().await;
        let mut abandoned = 0;
        while receiver.try_recv().is_ok() {
            abandoned += 1;
            self.shared.finish_one();
        }
        self.shared.idle.notify_waiters();
        debug!("Background queue stopped; {} queued item(s) abandoned.", abandoned);
        abandoned
    }

    /// Submits a work item.
    ///
    /// # Errors
    /// `Faulted` if an earlier item failed and its failure was not taken yet.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        let failures = self.shared.failure_messages();
        if !failures.is_empty() {
            return Err(QueueError::Faulted { failures });
        }
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.sender.send(item).map_err(|_| {
            self.shared.finish_one();
            QueueError::Closed
        })
    }

    /// Submits an async closure.
    pub fn enqueue_fn<F, Fut>(&self, work: F) -> Result<(), QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.enqueue(Box::new(move || work().boxed()))
    }

    /// True between a successful `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of workers started, zero when stopped.
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |workers| workers.handles.len())
    }

    /// Removes and returns the recorded failures, clearing the fault.
    pub fn take_failures(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut *self.shared.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// True while failures are waiting to be taken.
    pub fn is_faulted(&self) -> bool {
        !self
            .shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Items enqueued and not yet finished or dropped.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Waits until every enqueued item has finished. Returns immediately when
    /// the queue is not running.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a wake-up in between is not lost.
            let mut notified = pin!(self.shared.idle.notified());
            notified.as_mut().enable();
            if !self.is_running() || self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for BackgroundQueue {
    fn drop(&mut self) {
        let workers = self.workers.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(workers) = workers.take() {
            let _ = workers.shutdown.send(true);
        }
    }
}

impl fmt::Debug for BackgroundQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundQueue")
            .field("workers", &self.worker_count())
            .field("pending", &self.pending())
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    debug!("Queue worker {} started.", id);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            item = async { shared.receiver.lock().await.recv().await } => item,
        };
        let Some(item) = next else {
            break;
        };

        if let Err(e) = catch_failure(item()).await {
            warn!("Queue worker {}: work item failed: {:#}", id, e);
            shared
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(e);
        }
        shared.finish_one();
    }
    debug!("Queue worker {} stopped.", id);
}

// MARK: --- UNIT TESTS ---
