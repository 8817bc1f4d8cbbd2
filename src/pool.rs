//! Bounded worker pool over a shared task queue
//!
//! A fixed number of workers pull tasks from one queue, so at most `workers`
//! tasks are ever in flight. A fatal error stops every worker from taking
//! new tasks; retryable errors that survived the caller's retry policy are
//! recorded and the pool moves on.

use crate::error::{Error, RetryClass};
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

/// Outcome of a pool run
#[derive(Debug)]
pub struct PoolReport<R> {
    pub completed: Vec<R>,
    /// Tasks that failed with a retryable error after exhausting retries
    pub failed: Vec<Error>,
    /// The error that stopped the pool, if any
    pub fatal: Option<Error>,
    /// Tasks never started because the pool stopped
    pub skipped: usize,
}

impl<R> Default for PoolReport<R> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
            fatal: None,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `handler` over every task with bounded concurrency
    pub async fn run<T, R, F, Fut>(
        &self,
        tasks: impl IntoIterator<Item = T>,
        handler: F,
    ) -> PoolReport<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, Error>>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut queued = 0usize;
        for task in tasks {
            // The receiver is alive until this function returns
            if tx.send(task).is_ok() {
                queued += 1;
            }
        }
        drop(tx);
        debug!(tasks = queued, workers = self.workers, "Starting worker pool");

        let queue = Arc::new(Mutex::new(rx));
        let stop = AtomicBool::new(false);
        let report = Mutex::new(PoolReport::default());

        let workers = (0..self.workers).map(|worker| {
            let queue = Arc::clone(&queue);
            let handler = &handler;
            let stop = &stop;
            let report = &report;
            async move {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Some(task) = queue.lock().await.recv().await else {
                        break;
                    };

                    match handler(task).await {
                        Ok(value) => report.lock().await.completed.push(value),
                        Err(e) if e.retry_class() == RetryClass::Fatal => {
                            error!(worker, error = %e, "Fatal error, stopping pool");
                            stop.store(true, Ordering::SeqCst);
                            let mut report = report.lock().await;
                            if report.fatal.is_none() {
                                report.fatal = Some(e);
                            } else {
                                report.failed.push(e);
                            }
                        }
                        Err(e) => report.lock().await.failed.push(e),
                    }
                }
            }
        });
        join_all(workers).await;

        let mut report = report.into_inner();
        let mut rx = queue.lock().await;
        while rx.try_recv().is_ok() {
            report.skipped += 1;
        }
        report
    }
}
