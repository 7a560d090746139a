//! Execution strategies for per-item tasks
//!
//! CPU-bound kernels run on a rayon pool (or sequentially); I/O-bound tasks
//! run as futures with a bounded number in flight. Either way results come
//! back in item order, independent of completion order.

use crate::config::{BatchConfig, Parallelism};
use crate::error::{BatchError, Result, TaskFailure};
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Dispatches one task per item using the configured strategy
#[derive(Clone)]
pub struct Executor {
    pool: Option<Arc<rayon::ThreadPool>>,
    sequential: bool,
    io_concurrency: usize,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("dedicated_pool", &self.pool.is_some())
            .field("sequential", &self.sequential)
            .field("io_concurrency", &self.io_concurrency)
            .finish()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            pool: None,
            sequential: false,
            io_concurrency: BatchConfig::default().io_concurrency,
        }
    }
}

impl Executor {
    /// Build an executor for the given configuration.
    ///
    /// `Threads { workers: Some(n) }` gets a dedicated pool; `None` shares
    /// rayon's global pool sized to the available cores.
    pub fn new(config: &BatchConfig) -> Result<Self> {
        let (pool, sequential) = match config.parallelism {
            Parallelism::Sequential => (None, true),
            Parallelism::Threads { workers: None } => (None, false),
            Parallelism::Threads { workers: Some(0) } => {
                return Err(BatchError::InvalidConfig(
                    "worker count must be positive".to_string(),
                ))
            }
            Parallelism::Threads {
                workers: Some(workers),
            } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("ct-batch-worker-{}", i))
                    .build()
                    .map_err(|e| BatchError::InvalidConfig(e.to_string()))?;
                (Some(Arc::new(pool)), false)
            }
        };
        Ok(Self {
            pool,
            sequential,
            io_concurrency: config.io_concurrency.max(1),
        })
    }

    pub fn sequential() -> Self {
        Self {
            sequential: true,
            ..Self::default()
        }
    }

    /// Maximum number of concurrent I/O tasks
    pub fn io_concurrency(&self) -> usize {
        self.io_concurrency
    }

    /// Run `task` over every element of `inputs` on the CPU strategy.
    ///
    /// Panics inside a task are caught and reported as that task's failure.
    pub fn map_cpu<I, T, F>(&self, inputs: Vec<I>, task: F) -> Vec<Result<T>>
    where
        I: Send,
        T: Send,
        F: Fn(I) -> Result<T> + Sync,
    {
        let guarded = |input: I| guard(|| task(input));
        if self.sequential {
            return inputs.into_iter().map(guarded).collect();
        }
        match &self.pool {
            Some(pool) => pool.install(|| inputs.into_par_iter().map(guarded).collect()),
            None => inputs.into_par_iter().map(guarded).collect(),
        }
    }

    /// Run `task` over every element of `inputs` as futures, keeping at most
    /// `io_concurrency` in flight
    pub async fn map_io<I, T, F, Fut>(&self, inputs: Vec<I>, task: F) -> Vec<Result<T>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        stream::iter(inputs.into_iter().map(task))
            .buffered(self.io_concurrency)
            .collect()
            .await
    }
}

fn guard<T>(task: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            Err(BatchError::Panicked(message))
        }
    }
}

/// Split per-item outcomes into values, or a `ParallelTaskFailure` naming
/// every item that failed
pub fn collect_outcomes<T>(ids: &[String], outcomes: Vec<Result<T>>) -> Result<Vec<T>> {
    let total = outcomes.len();
    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for (position, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => values.push(value),
            Err(err) => failures.push(TaskFailure {
                position,
                id: ids.get(position).cloned().unwrap_or_default(),
                reason: err.to_string(),
            }),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        tracing::warn!(
            failed = failures.len(),
            total,
            "per-item tasks failed; discarding results"
        );
        Err(BatchError::ParallelTaskFailure { total, failures })
    }
}
