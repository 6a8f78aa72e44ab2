// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded batch runner — runs one operation per item with at most
// `worker_limit` in flight, capturing every failure (panics included) per item.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tabwerk_core::types::BatchResult;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

/// Why one item did not produce a result.
#[derive(Debug)]
pub enum BatchFailure<E> {
    /// The operation returned an error.
    Failed { index: usize, error: E },
    /// The operation panicked or its task was lost.
    Panicked { index: usize, message: String },
}

impl<E> BatchFailure<E> {
    /// Position of the item in the input.
    pub fn index(&self) -> usize {
        match self {
            BatchFailure::Failed { index, .. } | BatchFailure::Panicked { index, .. } => *index,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BatchFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchFailure::Failed { error, .. } => write!(f, "{error}"),
            BatchFailure::Panicked { message, .. } => write!(f, "worker panicked: {message}"),
        }
    }
}

/// Everything a batch produced, ordered by input index.
#[derive(Debug)]
pub struct BatchOutcome<R, E> {
    pub successes: Vec<(usize, R)>,
    pub failures: Vec<BatchFailure<E>>,
}

impl<R, E> BatchOutcome<R, E> {
    pub fn summary(&self) -> BatchResult {
        BatchResult {
            attempted: self.successes.len() + self.failures.len(),
            succeeded: self.successes.len(),
            failed: self.failures.len(),
        }
    }
}

type Joined<R, E> = (usize, Result<Result<R, E>, JoinError>);

/// Executes a batch under a fixed concurrency limit.
#[derive(Debug, Clone, Copy)]
pub struct BoundedBatchRunner {
    worker_limit: usize,
}

impl BoundedBatchRunner {
    /// A limit of 0 is treated as 1.
    pub fn new(worker_limit: usize) -> Self {
        Self {
            worker_limit: worker_limit.max(1),
        }
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    /// Run an async `op` on every item.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, op: F) -> BatchOutcome<R, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let op = Arc::new(op);
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let total = items.len();
        let mut tasks: JoinSet<Joined<R, E>> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let op = Arc::clone(&op);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                // The inner task isolates a panic so its index is still known.
                let result = tokio::spawn((*op)(item)).await;
                (index, result)
            });
        }

        collect(tasks, total).await
    }

    /// Run a blocking `op` on every item, each on the blocking thread pool.
    pub async fn run_blocking<T, R, E, F>(&self, items: Vec<T>, op: F) -> BatchOutcome<R, E>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let total = items.len();
        let mut tasks: JoinSet<Joined<R, E>> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let op = Arc::clone(&op);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = tokio::task::spawn_blocking(move || (*op)(item)).await;
                (index, result)
            });
        }

        collect(tasks, total).await
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".into();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

async fn collect<R, E>(mut tasks: JoinSet<Joined<R, E>>, total: usize) -> BatchOutcome<R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    let mut successes = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut seen = vec![false; total];

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(Ok(value)))) => {
                seen[index] = true;
                successes.push((index, value));
            }
            Ok((index, Ok(Err(error)))) => {
                seen[index] = true;
                failures.push(BatchFailure::Failed { index, error });
            }
            Ok((index, Err(join_err))) => {
                seen[index] = true;
                let message = panic_message(join_err);
                warn!(index, %message, "Batch worker panicked");
                failures.push(BatchFailure::Panicked { index, message });
            }
            Err(join_err) => {
                warn!(error = %join_err, "Batch task lost");
            }
        }
    }

    for (index, _) in seen.iter().enumerate().filter(|(_, done)| !**done) {
        failures.push(BatchFailure::Panicked {
            index,
            message: "worker task lost before reporting".into(),
        });
    }

    successes.sort_by_key(|(index, _)| *index);
    failures.sort_by_key(BatchFailure::index);
    debug!(
        succeeded = successes.len(),
        failed = failures.len(),
        "Batch complete"
    );
    BatchOutcome {
        successes,
        failures,
    }
}
