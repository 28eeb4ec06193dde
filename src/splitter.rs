//! Bounded-concurrency fan-out with a completion barrier.
//!
//! A [`ThreadSplitter`] owns a dedicated `rayon` pool of `K` threads. Each call
//! to [`execute`](ThreadSplitter::execute) pushes the indices `0..size` through
//! a shared queue that `K` long-lived jobs drain, so:
//!
//! - indices are handed out in ascending order,
//! - a new unit starts as soon as any worker is free,
//! - at most `K` units are in flight at once,
//! - the call returns only after every unit has finished.
//!
//! Completion order is unspecified. Units communicate only through the items
//! they are handed; [`execute_each`](ThreadSplitter::execute_each) passes each
//! unit exclusive access to its own element, which is how the kernels write
//! disjoint slices of a layer without locks.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Worker count used when none is configured: half of the available
/// hardware parallelism, at least one.
pub fn default_workers() -> usize {
    let available = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    (available / 2).max(1)
}

/// A fixed-size pool that runs indexed units of work.
pub struct ThreadSplitter {
    pool: ThreadPool,
    workers: usize,
}

impl core::fmt::Debug for ThreadSplitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadSplitter")
            .field("workers", &self.workers)
            .finish()
    }
}

impl ThreadSplitter {
    /// Builds a splitter backed by `workers` threads (clamped to at least one).
    ///
    /// # Errors
    /// Fails if the operating system refuses to spawn the pool threads.
    pub fn new(workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("splitter-{i}"))
            .build()?;
        tracing::trace!(workers, "thread splitter started");
        Ok(Self { pool, workers })
    }

    /// Builds a splitter sized by [`default_workers`].
    ///
    /// # Errors
    /// Fails if the operating system refuses to spawn the pool threads.
    pub fn with_default_workers() -> Result<Self, ThreadPoolBuildError> {
        Self::new(default_workers())
    }

    /// Maximum number of units that run concurrently.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `run(index)` for every index in `0..size` and waits for all of them.
    ///
    /// # Example
    /// ```
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use backprop_kernels::splitter::ThreadSplitter;
    ///
    /// let splitter = ThreadSplitter::new(2).unwrap();
    /// let sum = AtomicUsize::new(0);
    /// splitter.execute(10, |i| {
    ///     sum.fetch_add(i, Ordering::Relaxed);
    /// });
    /// assert_eq!(sum.into_inner(), 45);
    /// ```
    pub fn execute<F>(&self, size: usize, run: F)
    where
        F: Fn(usize) + Sync,
    {
        self.execute_each(0..size, |index, _| run(index));
    }

    /// Runs `run(index, item)` for every item of `items`, where `index` is the
    /// item's position, and waits for all of them.
    ///
    /// Items are pulled from the iterator one at a time in order, so an
    /// iterator of `&mut` elements or disjoint `chunks_mut` gives every unit
    /// sole ownership of what it writes.
    pub fn execute_each<I, F>(&self, items: I, run: F)
    where
        I: Iterator + Send,
        I::Item: Send,
        F: Fn(usize, I::Item) + Sync,
    {
        let queue = Mutex::new(items.enumerate());
        let queue = &queue;
        let run = &run;

        self.pool.scope(|scope| {
            for _ in 0..self.workers {
                scope.spawn(move |_| {
                    loop {
                        // the guard is released before the unit runs
                        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                        match next {
                            Some((index, item)) => run(index, item),
                            None => break,
                        }
                    }
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_workers_clamps_to_one() {
        let splitter = ThreadSplitter::new(0).unwrap();
        assert_eq!(splitter.workers(), 1);
    }

    #[test]
    fn default_workers_is_positive() {
        assert!(default_workers() >= 1);
    }

    #[test]
    fn empty_execute_returns() {
        let splitter = ThreadSplitter::new(3).unwrap();
        let calls = AtomicUsize::new(0);
        splitter.execute(0, |_| {
            calls.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn dispatch_order_is_ascending_with_one_worker() {
        let splitter = ThreadSplitter::new(1).unwrap();
        let seen = Mutex::new(Vec::new());
        splitter.execute(16, |i| seen.lock().unwrap().push(i));
        assert_eq!(seen.into_inner().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn each_item_is_written_once() {
        let splitter = ThreadSplitter::new(4).unwrap();
        let mut data = vec![0usize; 37];
        splitter.execute_each(data.chunks_mut(5), |i, chunk| {
            for slot in chunk {
                *slot += i + 1;
            }
        });
        for (pos, v) in data.iter().enumerate() {
            assert_eq!(*v, pos / 5 + 1);
        }
    }
}
