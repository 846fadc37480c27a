//! Data-parallel scheduling over the output iteration space
//!
//! `run()` splits the output rows into disjoint contiguous slices, one per
//! worker; each worker fully reduces the K dimension for its own rows, so the
//! parallel section needs no synchronization at all. Correctness relies purely
//! on the disjoint write regions. Worker failures are collected and the first
//! one is surfaced only after every slice has joined.
//!
//! Small problems skip the pool entirely: fork/join overhead dominates below a
//! row-count threshold, so those run sequentially on the calling thread.

use rayon::prelude::*;

use crate::error::{CuantizarError, Result};

/// Row range `[start, end)` of the output assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First row (inclusive)
    pub start: usize,
    /// Last row (exclusive)
    pub end: usize,
}

impl Window {
    /// Number of rows in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the window covers no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Minimum number of output rows before the pool is engaged
const PARALLEL_THRESHOLD: usize = 32;

/// Fixed-size worker pool executing kernels over row windows
pub struct Scheduler {
    pool: rayon::ThreadPool,
    num_threads: usize,
}

impl Scheduler {
    /// Build a scheduler with a fixed number of worker threads
    ///
    /// # Errors
    ///
    /// Returns an error if the thread pool cannot be created.
    pub fn new(num_threads: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| CuantizarError::InvalidConfiguration {
                reason: format!("Failed to build worker pool: {e}"),
            })?;
        Ok(Self { pool, num_threads })
    }

    /// Build a scheduler sized to the available hardware parallelism
    ///
    /// # Errors
    ///
    /// Returns an error if the thread pool cannot be created.
    pub fn with_default_threads() -> Result<Self> {
        let n = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(n)
    }

    /// Number of workers in the pool
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Execute `task` over `rows` output rows stored in `dst`
    ///
    /// `dst` is `rows * row_width` elements in row-major order. The rows are
    /// partitioned into disjoint contiguous slices; `task` is invoked once per
    /// slice with the window it owns and a mutable view of exactly those rows.
    /// All slices complete before any error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first task error, or an error if `dst` does not hold
    /// `rows * row_width` elements.
    pub fn run_rows<T, F>(&self, dst: &mut [T], row_width: usize, rows: usize, task: F) -> Result<()>
    where
        T: Send,
        F: Fn(Window, &mut [T]) -> Result<()> + Sync,
    {
        if dst.len() != rows * row_width {
            return Err(CuantizarError::InvalidShape {
                reason: format!(
                    "Destination holds {} elements, expected {} ({} rows x {})",
                    dst.len(),
                    rows * row_width,
                    rows,
                    row_width
                ),
            });
        }
        if rows == 0 {
            return Ok(());
        }

        let workers = self.num_threads.min(rows);
        if workers == 1 || rows < PARALLEL_THRESHOLD || row_width == 0 {
            return task(Window { start: 0, end: rows }, dst);
        }

        let rows_per_slice = rows.div_ceil(workers);
        let results: Vec<Result<()>> = self.pool.install(|| {
            dst.par_chunks_mut(rows_per_slice * row_width)
                .enumerate()
                .map(|(i, chunk)| {
                    let start = i * rows_per_slice;
                    let end = start + chunk.len() / row_width;
                    task(Window { start, end }, chunk)
                })
                .collect()
        });

        // Every slice has joined at this point; report the first failure.
        results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
    }
}
