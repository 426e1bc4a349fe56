//! Bounded worker pool
//!
//! Splits a list of work items into near-equal partitions and runs one OS
//! thread per partition. Each worker processes its partition sequentially and
//! sends one result over a channel; the pool waits for every partition and
//! returns the summed results and the per-partition errors. A failing item
//! never cancels its siblings.

use crate::crawler::RunReport;
use crate::{HarvestError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

/// Per-item results the pool knows how to sum
pub trait Tally: Default + Send {
    fn absorb(&mut self, other: Self);
}

impl Tally for RunReport {
    fn absorb(&mut self, other: Self) {
        RunReport::absorb(self, other)
    }
}

impl Tally for usize {
    fn absorb(&mut self, other: Self) {
        *self += other;
    }
}

/// What one partition reports back
#[derive(Debug)]
pub struct PartitionResult<R> {
    pub partition: usize,
    pub total: R,
    pub succeeded: usize,
    pub failed: usize,
    /// The first error the partition hit, if any
    pub first_error: Option<HarvestError>,
}

/// Summed results across all partitions
#[derive(Debug, Default)]
pub struct PoolOutcome<R> {
    pub total: R,
    pub succeeded: usize,
    pub failed: usize,
    /// First error of each failing partition, by partition index
    pub errors: Vec<(usize, HarvestError)>,
}

impl<R: Tally> PoolOutcome<R> {
    pub fn absorb(&mut self, other: PoolOutcome<R>) {
        self.total.absorb(other.total);
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    /// True if any partition ran out of credentials
    pub fn credentials_exhausted(&self) -> bool {
        self.errors
            .iter()
            .any(|(_, e)| matches!(e, HarvestError::CredentialsExhausted { .. }))
    }
}

/// Splits `items` into `n` near-equal slices
///
/// The remainder goes to the first partitions, so sizes differ by at most one.
/// Always returns `n` slices; trailing ones are empty when `items.len() < n`.
pub fn partition<T>(items: &[T], n: usize) -> Vec<&[T]> {
    let n = n.max(1);
    let base = items.len() / n;
    let remainder = items.len() % n;

    let mut slices = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = base + usize::from(i < remainder);
        slices.push(&items[start..start + len]);
        start += len;
    }
    slices
}

/// Fixed-size pool of worker threads
#[derive(Debug)]
pub struct WorkerPool {
    concurrency: usize,
    active: AtomicUsize,
}

/// Decrements the active counter when a worker exits, even by panic
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            active: AtomicUsize::new(0),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Workers currently running; for observability only
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Runs `unit` over every item across the pool's workers
    ///
    /// # Arguments
    ///
    /// * `items` - Work items; each is processed exactly once
    /// * `unit` - Unit of work, called sequentially within a partition
    ///
    /// # Returns
    ///
    /// Summed results of the successful items, and the first error of each
    /// partition that had one. A worker that panics is reported as
    /// `WorkerPanicked` for its partition.
    pub fn run<I, R, F>(&self, items: &[I], unit: F) -> PoolOutcome<R>
    where
        I: Sync,
        R: Tally,
        F: Fn(&I) -> Result<R> + Sync,
    {
        let partitions = partition(items, self.concurrency);
        let (tx, rx) = mpsc::channel::<PartitionResult<R>>();
        let unit = &unit;
        let mut outcome = PoolOutcome::<R>::default();

        tracing::debug!(
            items = items.len(),
            workers = self.concurrency,
            "Starting worker pool"
        );

        thread::scope(|scope| {
            let mut handles = Vec::new();
            for (index, slice) in partitions.into_iter().enumerate() {
                if slice.is_empty() {
                    continue;
                }
                let tx = tx.clone();
                let active = &self.active;
                let handle = thread::Builder::new()
                    .name(format!("harvest-worker-{}", index))
                    .spawn_scoped(scope, move || {
                        let _guard = ActiveGuard::enter(active);
                        let result = run_partition(index, slice, unit);
                        // The receiver outlives every worker
                        let _ = tx.send(result);
                    });
                match handle {
                    Ok(handle) => handles.push((index, handle)),
                    Err(e) => outcome.errors.push((index, HarvestError::Io(e))),
                }
            }

            for (index, handle) in handles {
                if handle.join().is_err() {
                    tracing::error!(partition = index, "Worker panicked");
                    outcome
                        .errors
                        .push((index, HarvestError::WorkerPanicked { partition: index }));
                }
            }
        });
        drop(tx);

        for result in rx {
            outcome.total.absorb(result.total);
            outcome.succeeded += result.succeeded;
            outcome.failed += result.failed;
            if let Some(error) = result.first_error {
                outcome.errors.push((result.partition, error));
            }
        }
        outcome.errors.sort_by_key(|(partition, _)| *partition);

        tracing::debug!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            partitions_with_errors = outcome.errors.len(),
            "Worker pool finished"
        );
        outcome
    }
}

fn run_partition<I, R, F>(index: usize, items: &[I], unit: &F) -> PartitionResult<R>
where
    R: Tally,
    F: Fn(&I) -> Result<R>,
{
    let mut result = PartitionResult {
        partition: index,
        total: R::default(),
        succeeded: 0,
        failed: 0,
        first_error: None,
    };

    for item in items {
        match unit(item) {
            Ok(value) => {
                result.total.absorb(value);
                result.succeeded += 1;
            }
            Err(e) => {
                tracing::warn!(partition = index, error = %e, "Unit of work failed");
                result.failed += 1;
                if result.first_error.is_none() {
                    result.first_error = Some(e);
                }
            }
        }
    }
    result
}
