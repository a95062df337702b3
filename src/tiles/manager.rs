//! The tile orchestrator.
//!
//! `TileManager` owns every mutable cache structure behind one lock: the
//! quad index, the bounded tile cache, and the current/candidate tile sets.
//! Loader workers and the render consumer never touch those structures
//! directly; all mutation funnels through the handful of entry points here,
//! which keeps tile state single-writer even though calls arrive from
//! several threads. The lock is only ever held for pointer and counter
//! work, never across I/O.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::core::config::TileManagerOptions;
use crate::core::constants::DISTANCE_FP_ZOOM;
use crate::core::geo::{MapPosition, TileCoord};
use crate::core::viewport::Viewport;
use crate::prelude::HashSet;
use crate::tiles::index::QuadIndex;
use crate::tiles::queue::JobQueue;
use crate::tiles::scan::scan_quad;
use crate::tiles::set::TileSet;
use crate::tiles::source::QueryResult;
use crate::tiles::tile::{MapTile, TileState};

/// Notifications emitted by the manager. The channel is bounded; a full
/// channel drops the event, which is fine since consumers re-sync through
/// `get_active_tiles` anyway.
#[derive(Debug, Clone)]
pub enum TileEvent {
    /// A tile finished loading and awaits consumption.
    Loaded(Arc<MapTile>),
    /// A tile holding data was evicted from the cache.
    Removed(Arc<MapTile>),
}

struct TileStore {
    index: QuadIndex,
    /// All cached tiles; the bounded cache that eviction trims.
    tiles: Vec<Arc<MapTile>>,
    current: TileSet,
    /// Scratch set rebuilt by every scan, swapped into `current` on change.
    candidate: TileSet,
    /// Tiles collected during the scan that need loading.
    jobs: Vec<Arc<MapTile>>,
    serial: u64,
    /// Tiles holding data the consumer has not picked up yet.
    tiles_for_upload: usize,
    /// Cache budget backoff under sustained upload backlog.
    cache_reduce: usize,
    /// Working zoom level, kept across updates for hysteresis.
    tile_zoom: Option<u8>,
    viewport: Viewport,
}

pub struct TileManager {
    options: TileManagerOptions,
    store: Mutex<TileStore>,
    job_queue: JobQueue,
    events_tx: Sender<TileEvent>,
    events_rx: Receiver<TileEvent>,
}

impl TileManager {
    pub fn new(options: TileManagerOptions) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(options.event_capacity);
        let store = TileStore {
            index: QuadIndex::new(),
            tiles: Vec::with_capacity(options.cache_limit),
            current: TileSet::new(),
            candidate: TileSet::new(),
            jobs: Vec::new(),
            serial: 0,
            tiles_for_upload: 0,
            cache_reduce: 0,
            tile_zoom: None,
            viewport: Viewport::new(options.viewport_width, options.viewport_height),
        };
        Self {
            options,
            store: Mutex::new(store),
            job_queue: JobQueue::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn options(&self) -> &TileManagerOptions {
        &self.options
    }

    /// Receiver for load/removal notifications; clone it per consumer.
    pub fn events(&self) -> Receiver<TileEvent> {
        self.events_rx.clone()
    }

    pub fn set_viewport_size(&self, width: u32, height: u32) {
        if let Ok(mut store) = self.store.lock() {
            store.viewport.set_size(width, height);
        }
    }

    /// Number of tiles currently cached.
    pub fn tile_count(&self) -> usize {
        self.store.lock().map(|s| s.tiles.len()).unwrap_or(0)
    }

    /// Recomputes the visible tile set for `pos`.
    ///
    /// Scans the viewport into a candidate set, creates or re-queues tiles
    /// as needed, publishes the candidate as the current set if it differs,
    /// refills the job queue and trims the cache. Returns whether the
    /// visible set changed, so the caller knows to redraw.
    pub fn update(&self, pos: MapPosition) -> bool {
        // Drop pending jobs before computing new ones; workers should not
        // burn time on tiles the new scan may no longer want.
        self.job_queue.clear();

        let Ok(mut guard) = self.store.lock() else {
            return false;
        };
        let store = &mut *guard;

        if pos.zoom_level() < self.options.min_zoom {
            // far below the usable range nothing close to the current set
            // can come back; let it go
            if !store.current.is_empty() && pos.zoom_level() + 4 < self.options.min_zoom {
                store.current.release_tiles();
                store.serial += 1;
                let serial = store.serial;
                store.current.set_serial(serial);
            }
            return false;
        }

        let Some(tile_zoom) = select_tile_zoom(&self.options, &mut store.tile_zoom, pos) else {
            return false;
        };

        let extents = store
            .viewport
            .map_extents(pos.rotation, self.options.extent_buffer);

        store.candidate.clear_items();
        store.jobs.clear();

        let mut seen: HashSet<TileCoord> = HashSet::default();
        {
            let options = &self.options;
            scan_quad(pos.x, pos.y, pos.scale, tile_zoom, &extents, |y, x1, x2| {
                store.scan_row(y, x1, x2, tile_zoom, options, &mut seen);
            });
        }

        store.candidate.sort_by_coord();
        let changed = !store.candidate.same_tiles(&store.current);

        if changed {
            {
                let TileStore {
                    current,
                    candidate,
                    index,
                    ..
                } = store;
                // lock the incoming set before releasing the outgoing one
                // so shared tiles never transiently hit zero locks
                candidate.lock_tiles(index);
                current.release_tiles();
                std::mem::swap(current, candidate);
            }
            store.serial += 1;
            let serial = store.serial;
            store.current.set_serial(serial);
        }

        if !store.jobs.is_empty() {
            update_distances(&store.jobs, &pos);
            let jobs = std::mem::take(&mut store.jobs);
            self.job_queue.set_jobs(jobs);
        }

        // sustained upload backlog shrinks the effective cache budget
        if store.cache_reduce < self.options.cache_limit / 2 {
            if store.tiles_for_upload > self.options.max_pending_upload {
                store.cache_reduce += 10;
                log::debug!(
                    "reduce cache {}",
                    self.options.cache_limit - store.cache_reduce
                );
            } else {
                store.cache_reduce = 0;
            }
        }

        let budget = self.options.cache_limit.saturating_sub(store.cache_reduce);
        let excess = store.tiles.len() as isize - budget as isize;
        if excess > self.options.cache_threshold as isize
            || store.tiles_for_upload > self.options.max_pending_upload
        {
            self.limit_cache(store, &pos, excess);
        }

        changed
    }

    pub fn has_tile_jobs(&self) -> bool {
        !self.job_queue.is_empty()
    }

    /// Hands the nearest pending job to a loader. Loader threads call this.
    pub fn get_tile_job(&self) -> Option<Arc<MapTile>> {
        self.job_queue.poll()
    }

    /// Blocking variant of [`TileManager::get_tile_job`] used by the worker
    /// pool.
    pub fn poll_tile_job_timeout(&self, timeout: Duration) -> Option<Arc<MapTile>> {
        self.job_queue.poll_timeout(timeout)
    }

    /// Completion callback for loader workers; the only path that moves a
    /// tile out of `Loading`.
    ///
    /// Tolerates tiles that were canceled, invalidated or evicted while the
    /// job was in flight.
    pub fn job_completed(&self, tile: &Arc<MapTile>, result: QueryResult) {
        let Ok(mut guard) = self.store.lock() else {
            return;
        };
        let store = &mut *guard;

        match tile.state() {
            TileState::Loading => match result {
                QueryResult::Success => {
                    if tile.payload().is_none() {
                        log::warn!("{} load succeeded without payload", tile.coord);
                        tile.reset();
                        return;
                    }
                    tile.advance(TileState::NewData);
                    store.tiles_for_upload += 1;
                    let _ = self.events_tx.try_send(TileEvent::Loaded(tile.clone()));
                }
                QueryResult::Failed => {
                    log::debug!("loading failed: {}", tile.coord);
                    tile.reset();
                }
                QueryResult::Delayed => {
                    // not an error; leave the tile loadable for a later scan
                    tile.reset();
                }
            },
            TileState::Cancel => {
                log::debug!("loading canceled: {}", tile.coord);
                tile.reset();
            }
            TileState::Dead => {
                if !tile.is_locked() {
                    tile.clear_data();
                }
            }
            state => {
                log::debug!("stale completion for {} ({:?})", tile.coord, state);
            }
        }
    }

    /// Copies the current tile set into `out` if it changed since `out` was
    /// last filled, locking the copied tiles. Returns whether a copy
    /// happened. This is the only cross-thread handoff to the render
    /// consumer; the lock window covers pointer copying only.
    pub fn get_active_tiles(&self, out: &mut TileSet) -> bool {
        let Ok(guard) = self.store.lock() else {
            return false;
        };
        if guard.current.serial() == out.serial() {
            return false;
        }
        out.set_from(&guard.current, &guard.index);
        true
    }

    /// Unlocks and empties a set previously filled by
    /// [`TileManager::get_active_tiles`].
    pub fn release_tiles(&self, set: &mut TileSet) {
        // counter mutation stays serialized behind the store lock
        if let Ok(_guard) = self.store.lock() {
            set.release_tiles();
        }
    }

    /// Read-only cache probe.
    pub fn get_tile(&self, coord: TileCoord) -> Option<Arc<MapTile>> {
        self.store.lock().ok()?.index.get_item(coord)
    }

    /// The tile one zoom level up from `tile`, if cached. Consumers use
    /// this to draw a proxy they hold through `PROXY_PARENT`.
    pub fn parent_tile(&self, tile: &MapTile) -> Option<Arc<MapTile>> {
        self.store.lock().ok()?.index.parent_item(tile.node)
    }

    /// The tile two zoom levels up from `tile`, if cached.
    pub fn grandparent_tile(&self, tile: &MapTile) -> Option<Arc<MapTile>> {
        self.store.lock().ok()?.index.grandparent_item(tile.node)
    }

    /// One of the four tiles below `tile`, if cached.
    pub fn child_tile(&self, tile: &MapTile, quadrant: usize) -> Option<Arc<MapTile>> {
        self.store.lock().ok()?.index.child_item(tile.node, quadrant)
    }

    /// Full cache reset: every cached tile is invalidated and dropped from
    /// the index. Tiles still locked by a consumer set keep their data
    /// until that set is released.
    pub fn clear_all(&self) {
        self.job_queue.clear();

        let Ok(mut guard) = self.store.lock() else {
            return;
        };
        let store = &mut *guard;

        store.current.release_tiles();
        for tile in std::mem::take(&mut store.tiles) {
            remove_tile(&mut store.index, &self.events_tx, &tile);
        }
        store.candidate.clear_items();
        store.serial += 1;
        let serial = store.serial;
        store.current.set_serial(serial);
        store.tiles_for_upload = 0;
        store.cache_reduce = 0;
        store.tile_zoom = None;
    }

    /// Trims the cache toward its budget. Tiles that are locked or
    /// referenced as proxies are never removed; in-flight tiles are
    /// canceled cooperatively and reaped once their worker reports back.
    fn limit_cache(&self, store: &mut TileStore, pos: &MapPosition, mut remove: isize) {
        let mut new_data = 0usize;

        // first pass: free tiles that never got data, no ordering needed
        let tiles = std::mem::take(&mut store.tiles);
        let mut kept = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let state = tile.state();
            if matches!(state, TileState::None | TileState::Dead) && !tile.is_locked() {
                remove_tile(&mut store.index, &self.events_tx, &tile);
                remove -= 1;
            } else {
                if state == TileState::NewData {
                    new_data += 1;
                }
                kept.push(tile);
            }
        }
        store.tiles = kept;

        if remove < self.options.cache_clear_threshold as isize
            && new_data < self.options.max_pending_upload
        {
            store.tiles_for_upload = new_data;
            return;
        }

        update_distances(&store.tiles, pos);
        store
            .tiles
            .sort_by(|a, b| a.distance().total_cmp(&b.distance()));

        // second pass: drop from the far end
        let mut i = store.tiles.len();
        while i > 0 && remove > 0 {
            i -= 1;
            let tile = store.tiles[i].clone();

            if tile.is_locked() {
                log::debug!(
                    "{} locked (state={:?}, d={})",
                    tile.coord,
                    tile.state(),
                    tile.distance()
                );
                continue;
            }

            match tile.state() {
                TileState::Loading => {
                    // still owned by a loader; cancel and let its
                    // completion callback clean up
                    tile.advance(TileState::Cancel);
                    log::debug!("{} canceled (d={})", tile.coord, tile.distance());
                    continue;
                }
                TileState::Cancel => continue,
                TileState::NewData => new_data -= 1,
                _ => {}
            }

            remove_tile(&mut store.index, &self.events_tx, &tile);
            store.tiles.remove(i);
            remove -= 1;
        }

        // third pass: bound the upload backlog even when the removal quota
        // is satisfied
        let mut excess_new = new_data as isize - self.options.max_pending_upload as isize + 10;
        if excess_new > 0 {
            let mut i = store.tiles.len();
            while i > 0 && excess_new > 0 {
                i -= 1;
                let tile = store.tiles[i].clone();
                if tile.state() == TileState::NewData && !tile.is_locked() {
                    new_data -= 1;
                    remove_tile(&mut store.index, &self.events_tx, &tile);
                    store.tiles.remove(i);
                    excess_new -= 1;
                }
            }
        }

        store.tiles_for_upload = new_data;
        log::debug!(
            "cleanup: {} tiles, {} awaiting upload",
            store.tiles.len(),
            new_data
        );
    }
}

impl TileStore {
    fn scan_row(
        &mut self,
        y: i32,
        x1: i32,
        x2: i32,
        zoom: u8,
        options: &TileManagerOptions,
        seen: &mut HashSet<TileCoord>,
    ) {
        let max = 1i64 << zoom;
        let y = y as i64;
        if y < 0 || y >= max {
            return;
        }

        for x in x1 as i64..x2 as i64 {
            // flip columns around the date line
            let mut xx = x;
            if xx < 0 || xx >= max {
                xx = if xx < 0 { xx + max } else { xx - max };
                if xx < 0 || xx >= max {
                    continue;
                }
            }

            let coord = TileCoord::new(xx as u32, y as u32, zoom);
            if !seen.insert(coord) {
                continue;
            }
            let tile = self.add_tile(coord, options);
            self.candidate.push(tile);
        }
    }

    /// Looks up or creates the tile for `coord`, queueing it for loading
    /// when it has no data yet, and optionally pre-queues its parent.
    fn add_tile(&mut self, coord: TileCoord, options: &TileManagerOptions) -> Arc<MapTile> {
        let tile = match self.index.get_item(coord) {
            Some(tile) => {
                if !tile.is_active() {
                    self.jobs.push(tile.clone());
                }
                tile
            }
            None => {
                let node = self.index.add(coord);
                let tile = Arc::new(MapTile::new(coord, node));
                self.index.set_item(node, tile.clone());
                self.jobs.push(tile.clone());
                self.tiles.push(tile.clone());
                tile
            }
        };

        if options.parent_prefetch && coord.z > options.min_zoom && options.zoom_table.is_none() {
            if let Some(parent_coord) = coord.parent() {
                match self.index.get_item(parent_coord) {
                    Some(parent) => {
                        if !parent.is_active() {
                            // mark before queueing so siblings do not queue
                            // the same parent again
                            parent.advance(TileState::Loading);
                            self.jobs.push(parent);
                        }
                    }
                    None => {
                        let node = self.index.add(parent_coord);
                        let parent = Arc::new(MapTile::new(parent_coord, node));
                        self.index.set_item(node, parent.clone());
                        self.tiles.push(parent.clone());
                        parent.advance(TileState::Loading);
                        self.jobs.push(parent);
                    }
                }
            }
        }

        tile
    }
}

fn remove_tile(index: &mut QuadIndex, events: &Sender<TileEvent>, tile: &Arc<MapTile>) {
    if matches!(tile.state(), TileState::NewData | TileState::Ready) {
        let _ = events.try_send(TileEvent::Removed(tile.clone()));
    }

    // invalidate before detaching so anything still holding the tile
    // observes it as dead rather than reusable
    tile.advance(TileState::Dead);
    if !tile.is_locked() {
        tile.clear_data();
    }
    index.remove_item(tile);
}

/// Picks the working zoom level for tile selection.
///
/// With a zoom table only listed levels are eligible and the nearest level
/// at or below the clamped request wins. Otherwise the previous working
/// zoom sticks until the scale ratio leaves the hysteresis band, which
/// stops flicker between adjacent levels during smooth zoom gestures.
fn select_tile_zoom(
    options: &TileManagerOptions,
    tile_zoom: &mut Option<u8>,
    pos: MapPosition,
) -> Option<u8> {
    let clamped = pos
        .zoom_level()
        .clamp(options.min_zoom, options.max_zoom);

    if let Some(table) = &options.zoom_table {
        let mut best: Option<u8> = None;
        for &z in table {
            if z <= clamped && best.map_or(true, |b| z > b) {
                best = Some(z);
            }
        }
        *tile_zoom = best;
        return best;
    }

    let zoom = match *tile_zoom {
        None => clamped,
        Some(current) => {
            let mut zoom = current as i32;
            let mut ratio = pos.scale / (1u64 << current) as f64;
            while ratio >= options.scale_up_threshold && zoom < options.max_zoom as i32 {
                zoom += 1;
                ratio /= 2.0;
            }
            while ratio * options.scale_down_threshold < 1.0 && zoom > options.min_zoom as i32 {
                zoom -= 1;
                ratio *= 2.0;
            }
            zoom.clamp(options.min_zoom as i32, options.max_zoom as i32) as u8
        }
    };

    *tile_zoom = Some(zoom);
    Some(zoom)
}

/// Recomputes the priority/eviction metric: squared grid distance from the
/// viewport center on a fixed-point zoom-20 grid, weighted by the zoom
/// delta so coarser tiles decay slower when zooming out.
fn update_distances(tiles: &[Arc<MapTile>], pos: &MapPosition) {
    let scale = (1i64 << DISTANCE_FP_ZOOM) as f64;
    let x = (pos.x * scale) as i64;
    let y = (pos.y * scale) as i64;
    let pos_zoom = pos.zoom_level() as i32;

    for tile in tiles {
        let diff = DISTANCE_FP_ZOOM - tile.coord.z as i32;
        let (dx, dy) = if diff >= 0 {
            (
                tile.coord.x as i64 - (x >> diff),
                tile.coord.y as i64 - (y >> diff),
            )
        } else {
            (
                (tile.coord.x as i64 >> -diff) - x,
                (tile.coord.y as i64 >> -diff) - y,
            )
        };

        let dz = pos_zoom - tile.coord.z as i32;
        let weight = if dz == 0 {
            1.0
        } else if dz < -1 {
            dz as f32 * 0.75
        } else {
            dz as f32
        };

        tile.set_distance((dx * dx + dy * dy) as f32 * weight * weight);
    }
}
