//! Structured fan-out/fan-in over a bounded worker pool.
//!
//! Every parallel phase of a build (fetch pre-resolution, page rendering,
//! static file processing) has the same shape: run one job per item, stop
//! early on the first failure, wait for everything already running, and
//! report that first failure. [`TaskGroup`] packages that shape on top of a
//! dedicated rayon pool so the parallelism limit is explicit.
//!
//! Jobs receive a [`CancelToken`] scoped to the fan-out. The first failing
//! job cancels it: items that have not started yet are skipped, and jobs
//! that are blocked on a subprocess or an HTTP request see the token and
//! give up. Side effects of jobs that already finished are kept.

use crate::cancel::{CancelToken, Interrupted};
use rayon::prelude::*;
use std::sync::{Mutex, PoisonError};

pub struct TaskGroup {
    pool: rayon::ThreadPool,
}

impl TaskGroup {
    /// A group running at most `parallelism` jobs at once (minimum one).
    pub fn new(parallelism: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .thread_name(|i| format!("pagewright-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` over every item and collect the results in input order.
    ///
    /// Returns the first error any job reported. If the parent token stops
    /// the group before any job fails, the interruption is returned instead.
    pub fn try_map<T, R, E, F>(&self, parent: &CancelToken, items: &[T], job: F) -> Result<Vec<R>, E>
    where
        T: Sync,
        R: Send,
        E: Send + From<Interrupted>,
        F: Fn(&T, &CancelToken) -> Result<R, E> + Sync + Send,
    {
        let scope = parent.child();
        let first_error: Mutex<Option<E>> = Mutex::new(None);

        let results: Vec<Option<R>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    if scope.is_stopped() {
                        return None;
                    }
                    match job(item, &scope) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            scope.cancel();
                            None
                        }
                    }
                })
                .collect()
        });

        if let Some(err) = first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(err);
        }

        let mut collected = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Some(value) => collected.push(value),
                None => return Err(E::from(parent.check().err().unwrap_or(Interrupted::Cancelled))),
            }
        }
        Ok(collected)
    }

    /// [`TaskGroup::try_map`] for jobs that produce nothing.
    pub fn try_for_each<T, E, F>(&self, parent: &CancelToken, items: &[T], job: F) -> Result<(), E>
    where
        T: Sync,
        E: Send + From<Interrupted>,
        F: Fn(&T, &CancelToken) -> Result<(), E> + Sync + Send,
    {
        self.try_map(parent, items, job).map(|_| ())
    }
}
