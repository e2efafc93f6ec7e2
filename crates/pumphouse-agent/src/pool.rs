//! Bounded worker pools with an adjustable worker count.
//!
//! Each pool instance is parameterized over its own task and result types
//! (CSV-caching tasks, batch-backup tasks, ...) instead of one polymorphic
//! job type. Tasks queue on a bounded channel, so a paused or saturated
//! pool applies backpressure to producers instead of buffering without
//! limit.
//!
//! Resizing is how the throttle controller pauses work: workers are gated
//! on a broadcast target size, and a worker whose index is at or above the
//! target parks before executing its next task. In-flight tasks always run
//! to completion; pausing never cancels work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{AgentError, Result};

type TaskFn<T, R> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = R> + Send>> + Send + Sync>;

struct Job<T, R> {
    task: T,
    reply: Option<oneshot::Sender<R>>,
}

/// Handle the throttle controller uses to observe and resize a pool.
///
/// Deliberately holds nothing but the label, the configured size, and the
/// size channel: the controller decides from the pool's *current* size each
/// tick, which makes pause/resume idempotent.
#[derive(Clone)]
pub struct PoolController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    label: String,
    configured: usize,
    size_tx: watch::Sender<usize>,
}

impl PoolController {
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn configured_size(&self) -> usize {
        self.inner.configured
    }

    pub fn current_size(&self) -> usize {
        *self.inner.size_tx.borrow()
    }

    /// Broadcast a new target size. Resizing to zero parks every worker
    /// before its next task; resizing back up releases them.
    pub fn resize(&self, size: usize) {
        if self.inner.size_tx.send(size).is_err() {
            tracing::debug!(pool = %self.inner.label, "resize on stopped pool ignored");
        }
    }
}

/// A bounded pool of workers executing tasks of type `T` into results `R`.
pub struct WorkerPool<T, R> {
    tx: mpsc::Sender<Job<T, R>>,
    controller: PoolController,
    workers: Vec<JoinHandle<()>>,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Spawn `size` workers executing `handler` on queued tasks.
    pub fn new<F, Fut>(label: &str, size: usize, queue_capacity: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let handler: TaskFn<T, R> = Arc::new(move |task| Box::pin(handler(task)));
        let (tx, rx) = mpsc::channel::<Job<T, R>>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (size_tx, _) = watch::channel(size);

        let controller = PoolController {
            inner: Arc::new(ControllerInner {
                label: label.to_string(),
                configured: size,
                size_tx,
            }),
        };

        let workers = (0..size)
            .map(|index| {
                let queue = Arc::clone(&rx);
                let size_rx = controller.inner.size_tx.subscribe();
                let handler = Arc::clone(&handler);
                let label = controller.inner.label.clone();
                tokio::spawn(worker_loop(label, index, queue, size_rx, handler))
            })
            .collect();

        Self {
            tx,
            controller,
            workers,
        }
    }

    /// Queue a task without waiting for its result. Blocks only on queue
    /// capacity, so producers keep making progress while workers are
    /// paused, up to the queue bound.
    pub async fn submit(&self, task: T) -> Result<()> {
        self.tx
            .send(Job { task, reply: None })
            .await
            .map_err(|_| AgentError::Pool(format!("{} queue closed", self.controller.label())))
    }

    /// Queue a task and wait for its result.
    pub async fn process(&self, task: T) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job {
                task,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| AgentError::Pool(format!("{} queue closed", self.controller.label())))?;
        reply_rx
            .await
            .map_err(|_| AgentError::Pool(format!("{} dropped a task", self.controller.label())))
    }

    pub fn controller(&self) -> PoolController {
        self.controller.clone()
    }

    /// Stop accepting tasks, let queued work drain, and wait for workers.
    pub async fn shutdown(self) {
        // Unpark any gated worker so draining can finish.
        self.controller.resize(self.controller.configured_size());
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop<T, R>(
    label: String,
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<Job<T, R>>>>,
    mut size_rx: watch::Receiver<usize>,
    handler: TaskFn<T, R>,
) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => return,
            }
        };

        // Gate after dequeue, before execution: a pool resized to zero
        // holds its next task here until the target size rises again.
        loop {
            let target = *size_rx.borrow();
            if target > index {
                break;
            }
            tracing::debug!(pool = %label, worker = index, "worker parked");
            if size_rx.changed().await.is_err() {
                // Controller gone; run what we hold and keep draining.
                break;
            }
        }

        let result = handler(job.task).await;
        if let Some(reply) = job.reply {
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_pool(size: usize) -> (WorkerPool<u32, u32>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let pool = WorkerPool::new("test-pool", size, 16, move |task: u32| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                task * 2
            }
        });
        (pool, counter)
    }

    #[tokio::test]
    async fn process_returns_the_handler_result() {
        let (pool, _) = counting_pool(2);
        assert_eq!(pool.process(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn submit_executes_without_reply() {
        let (pool, counter) = counting_pool(1);
        pool.submit(1).await.unwrap();
        pool.submit(2).await.unwrap();
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resize_to_zero_parks_new_tasks() {
        let (pool, counter) = counting_pool(1);
        let controller = pool.controller();

        controller.resize(0);
        assert_eq!(controller.current_size(), 0);
        pool.submit(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0, "paused pool must not run tasks");

        controller.resize(controller.configured_size());
        tokio::time::timeout(Duration::from_secs(2), async {
            while counter.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should run after resume");
    }

    #[tokio::test]
    async fn paused_pool_still_accepts_submissions() {
        let (pool, _) = counting_pool(1);
        pool.controller().resize(0);
        for task in 0..8 {
            pool.submit(task).await.unwrap();
        }
    }

    #[tokio::test]
    async fn controller_reports_configured_and_current_size() {
        let (pool, _) = counting_pool(3);
        let controller = pool.controller();
        assert_eq!(controller.configured_size(), 3);
        assert_eq!(controller.current_size(), 3);
        controller.resize(0);
        assert_eq!(controller.current_size(), 0);
        assert_eq!(controller.configured_size(), 3);
    }

    #[tokio::test]
    async fn results_preserve_submission_order_single_worker() {
        let (pool, _) = counting_pool(1);
        let mut results = Vec::new();
        for task in 0..5 {
            results.push(pool.process(task).await.unwrap());
        }
        assert_eq!(results, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_tasks() {
        let (pool, counter) = counting_pool(2);
        for task in 0..10 {
            pool.submit(task).await.unwrap();
        }
        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
