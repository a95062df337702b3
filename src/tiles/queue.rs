//! Prioritized batch of pending tile-load jobs.
//!
//! The manager replaces the whole batch on every scan; loader workers poll
//! single jobs off it, nearest tiles first. Sorting happens once, lazily, on
//! the first poll after a batch is set; callers only ever observe a
//! globally sorted queue.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::tiles::tile::{MapTile, TileState};

struct Batch {
    jobs: Vec<Arc<MapTile>>,
    cursor: usize,
    sorted: bool,
}

impl Batch {
    fn pending(&self) -> usize {
        self.jobs.len() - self.cursor
    }

    /// Un-claims everything not yet polled, returning those tiles to
    /// `None` so no worker ever processes an abandoned job.
    fn reset_pending(&mut self) {
        for tile in &self.jobs[self.cursor..] {
            if tile.state() == TileState::Loading {
                tile.advance(TileState::None);
            }
        }
        self.jobs.clear();
        self.cursor = 0;
        self.sorted = false;
    }

    fn take_next(&mut self) -> Option<Arc<MapTile>> {
        if !self.sorted {
            self.jobs[self.cursor..].sort_by(|a, b| a.distance().total_cmp(&b.distance()));
            self.sorted = true;
        }

        while self.cursor < self.jobs.len() {
            let tile = self.jobs[self.cursor].clone();
            self.cursor += 1;

            // a job may have been canceled or invalidated since it was
            // queued; such tiles are no longer claimable
            if tile.state() == TileState::Loading {
                return Some(tile);
            }
            log::debug!("skipping stale job {} ({:?})", tile.coord, tile.state());
        }
        None
    }
}

pub struct JobQueue {
    batch: Mutex<Batch>,
    available: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            batch: Mutex::new(Batch {
                jobs: Vec::new(),
                cursor: 0,
                sorted: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Replaces the pending batch. Tiles still pending from the previous
    /// batch revert to `None`; the new jobs are marked `Loading` and
    /// waiting workers are woken.
    pub fn set_jobs(&self, jobs: Vec<Arc<MapTile>>) {
        let Ok(mut batch) = self.batch.lock() else {
            return;
        };
        batch.reset_pending();

        for tile in &jobs {
            if tile.state() == TileState::None {
                tile.advance(TileState::Loading);
            }
        }

        batch.jobs = jobs;
        drop(batch);
        self.available.notify_all();
    }

    /// Returns the nearest unclaimed job, or `None` when exhausted.
    pub fn poll(&self) -> Option<Arc<MapTile>> {
        self.batch.lock().ok()?.take_next()
    }

    /// Blocks up to `timeout` for a job to become available.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Arc<MapTile>> {
        let mut batch = self.batch.lock().ok()?;
        if batch.pending() == 0 {
            let (guard, result) = self.available.wait_timeout(batch, timeout).ok()?;
            batch = guard;
            if result.timed_out() && batch.pending() == 0 {
                return None;
            }
        }
        batch.take_next()
    }

    /// Drops the pending batch, returning its tiles to `None`.
    pub fn clear(&self) {
        if let Ok(mut batch) = self.batch.lock() {
            batch.reset_pending();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batch
            .lock()
            .map(|batch| batch.pending() == 0)
            .unwrap_or(true)
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::TileCoord;
    use crate::tiles::index::QuadIndex;

    fn tile_at_distance(index: &mut QuadIndex, x: u32, distance: f32) -> Arc<MapTile> {
        let coord = TileCoord::new(x, 0, 5);
        let node = index.add(coord);
        let tile = Arc::new(MapTile::new(coord, node));
        index.set_item(node, tile.clone());
        tile.set_distance(distance);
        tile
    }

    #[test]
    fn test_poll_returns_nearest_first() {
        let mut index = QuadIndex::new();
        let queue = JobQueue::new();

        let far = tile_at_distance(&mut index, 0, 9.0);
        let near = tile_at_distance(&mut index, 1, 1.0);
        let mid = tile_at_distance(&mut index, 2, 4.0);

        queue.set_jobs(vec![far.clone(), near.clone(), mid.clone()]);
        assert!(!queue.is_empty());

        assert!(Arc::ptr_eq(&queue.poll().unwrap(), &near));
        assert!(Arc::ptr_eq(&queue.poll().unwrap(), &mid));
        assert!(Arc::ptr_eq(&queue.poll().unwrap(), &far));
        assert!(queue.poll().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_set_jobs_marks_loading() {
        let mut index = QuadIndex::new();
        let queue = JobQueue::new();
        let tile = tile_at_distance(&mut index, 3, 0.0);

        assert_eq!(tile.state(), TileState::None);
        queue.set_jobs(vec![tile.clone()]);
        assert_eq!(tile.state(), TileState::Loading);
    }

    #[test]
    fn test_clear_returns_pending_to_none() {
        let mut index = QuadIndex::new();
        let queue = JobQueue::new();

        let a = tile_at_distance(&mut index, 0, 1.0);
        let b = tile_at_distance(&mut index, 1, 2.0);
        queue.set_jobs(vec![a.clone(), b.clone()]);

        // claim one; it stays with its worker
        let claimed = queue.poll().unwrap();
        assert!(Arc::ptr_eq(&claimed, &a));

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(a.state(), TileState::Loading);
        assert_eq!(b.state(), TileState::None);
    }

    #[test]
    fn test_replacing_batch_unclaims_previous() {
        let mut index = QuadIndex::new();
        let queue = JobQueue::new();

        let old = tile_at_distance(&mut index, 0, 1.0);
        queue.set_jobs(vec![old.clone()]);
        assert_eq!(old.state(), TileState::Loading);

        let new = tile_at_distance(&mut index, 1, 1.0);
        queue.set_jobs(vec![new.clone()]);
        assert_eq!(old.state(), TileState::None);
        assert_eq!(new.state(), TileState::Loading);
        assert!(Arc::ptr_eq(&queue.poll().unwrap(), &new));
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_canceled_job_not_claimable() {
        let mut index = QuadIndex::new();
        let queue = JobQueue::new();

        let tile = tile_at_distance(&mut index, 0, 1.0);
        queue.set_jobs(vec![tile.clone()]);
        tile.advance(TileState::Cancel);

        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_poll_timeout_expires_on_empty_queue() {
        let queue = JobQueue::new();
        let start = std::time::Instant::now();
        assert!(queue.poll_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
