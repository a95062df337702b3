//! Loader worker pool.
//!
//! Each worker pulls one job at a time off the manager's queue, runs the
//! data source on it and reports completion back through
//! [`TileManager::job_completed`]. Workers never touch cache structures or
//! locks themselves.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::tiles::manager::TileManager;
use crate::tiles::source::{QueryResult, TileDataSource};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A pool of loader worker threads bound to one manager and data source.
pub struct TileLoaderPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl TileLoaderPool {
    /// Starts `num_workers` loader threads (at least one).
    pub fn spawn(
        manager: Arc<TileManager>,
        source: Arc<dyn TileDataSource>,
        num_workers: usize,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers = (0..num_workers.max(1))
            .map(|i| {
                let manager = manager.clone();
                let source = source.clone();
                let shutdown = shutdown.clone();
                std::thread::Builder::new()
                    .name(format!("tile-loader-{}", i))
                    .spawn(move || worker_loop(manager, source, shutdown))
                    .expect("failed to spawn tile loader thread")
            })
            .collect();

        Self { workers, shutdown }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stops the workers and waits for them to finish their in-flight jobs.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for TileLoaderPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    manager: Arc<TileManager>,
    source: Arc<dyn TileDataSource>,
    shutdown: Arc<AtomicBool>,
) {
    log::debug!("tile loader starting");

    while !shutdown.load(Ordering::Acquire) {
        let Some(tile) = manager.poll_tile_job_timeout(POLL_INTERVAL) else {
            continue;
        };

        // a panicking data source must not kill the worker; treat it as a
        // plain load failure
        let result = catch_unwind(AssertUnwindSafe(|| source.load(&tile))).unwrap_or_else(|_| {
            log::error!("data source panicked loading {}", tile.coord);
            QueryResult::Failed
        });

        manager.job_completed(&tile, result);
    }

    log::debug!("tile loader exiting");
}
