//! The cached tile entity and its state machine.
//!
//! A `MapTile` is shared between the orchestrator, the loader workers and
//! the render consumer. Its counters and state live in atomics so readers
//! never block, but every mutation is funneled through the manager's entry
//! points (or the queue acting for it), which serialize writes behind the
//! manager lock.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use instant::Instant;

use crate::core::geo::TileCoord;
use crate::tiles::index::{NodeId, QuadIndex};
use crate::{Error, Result};

/// Opaque render payload produced by a data source. The core never looks
/// inside; dropping the last reference releases it.
pub type TilePayload = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TileState {
    /// No data, not requested. The starting state and the result of any
    /// hard clear.
    None = 0,
    /// Queued for loading or owned by a loader worker.
    Loading,
    /// Load finished; payload waits for the consumer to pick it up.
    NewData,
    /// Payload consumed and ready to draw.
    Ready,
    /// Evicted while a worker still holds the job; the worker cleans up on
    /// completion.
    Cancel,
    /// Forcibly invalidated and detached from the index. Terminal except
    /// for a hard clear.
    Dead,
}

impl TileState {
    fn from_u8(v: u8) -> TileState {
        match v {
            0 => TileState::None,
            1 => TileState::Loading,
            2 => TileState::NewData,
            3 => TileState::Ready,
            4 => TileState::Cancel,
            _ => TileState::Dead,
        }
    }

    /// The legal-transition graph. Anything not listed here is a logic
    /// error, never silently applied.
    fn allows(self, to: TileState) -> bool {
        use TileState::*;
        if self == to || to == Dead || to == None {
            return true;
        }
        matches!(
            (self, to),
            (None, Loading) | (Loading, NewData) | (NewData, Ready) | (Loading, Cancel)
        )
    }
}

/// Bit in the proxy mask for the parent tile.
pub const PROXY_PARENT: u8 = 1 << 4;
/// Bit in the proxy mask for the grandparent tile.
pub const PROXY_GRANDPARENT: u8 = 1 << 5;

/// Bit in the proxy mask for child `quadrant` (0..4).
pub const fn proxy_child(quadrant: usize) -> u8 {
    1 << quadrant
}

/// A cached map tile.
///
/// Used concurrently by the TileManager (orchestrator thread), the loader
/// workers and the render consumer.
pub struct MapTile {
    pub coord: TileCoord,

    /// Handle into the quad index; stale once the tile is removed.
    pub(crate) node: NodeId,

    state: AtomicU8,

    /// Independent holders requiring the tile stay cached.
    locked: AtomicU16,

    /// Tiles currently using this tile as a rendering proxy.
    refs: AtomicU16,

    /// Which proxy relations this tile holds ref-counts on while locked.
    proxies: AtomicU8,

    /// The proxied tiles themselves, held so unlock releases exactly what
    /// lock acquired even if the index changed in between.
    proxy_refs: Mutex<Vec<Arc<MapTile>>>,

    /// Current priority/eviction metric, squared grid distance from the
    /// viewport center (f32 bits).
    distance: AtomicU32,

    /// In view region. Set by the render consumer, ignored by the core.
    visible: AtomicBool,

    payload: Mutex<Option<TilePayload>>,

    /// Used for fade effects by the consumer; the core only stores it.
    fade_time: Mutex<Option<Instant>>,
}

impl MapTile {
    pub(crate) fn new(coord: TileCoord, node: NodeId) -> Self {
        Self {
            coord,
            node,
            state: AtomicU8::new(TileState::None as u8),
            locked: AtomicU16::new(0),
            refs: AtomicU16::new(0),
            proxies: AtomicU8::new(0),
            proxy_refs: Mutex::new(Vec::new()),
            distance: AtomicU32::new(0f32.to_bits()),
            visible: AtomicBool::new(false),
            payload: Mutex::new(None),
            fade_time: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TileState {
        TileState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Applies a state transition, rejecting anything outside the legal
    /// graph.
    pub(crate) fn set_state(&self, to: TileState) -> Result<()> {
        let from = self.state();
        if !from.allows(to) {
            return Err(Error::IllegalTransition { from, to });
        }
        self.state.store(to as u8, Ordering::Release);
        Ok(())
    }

    /// Transition that must succeed; a rejection here is a logic error in
    /// the caller, so fail loudly.
    pub(crate) fn advance(&self, to: TileState) {
        if let Err(e) = self.set_state(to) {
            panic!("tile {}: {}", self.coord, e);
        }
    }

    /// Promotes consumed data from `NewData` to `Ready`. Called by the
    /// render consumer once it has taken over the payload; races against
    /// invalidation, so the swap is atomic.
    pub fn mark_ready(&self) -> Result<()> {
        match self.state.compare_exchange(
            TileState::NewData as u8,
            TileState::Ready as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(actual) => Err(Error::IllegalTransition {
                from: TileState::from_u8(actual),
                to: TileState::Ready,
            }),
        }
    }

    /// True while the tile is loading, has data or is ready; such tiles are
    /// not re-queued by the scan.
    pub fn is_active(&self) -> bool {
        !matches!(self.state(), TileState::None | TileState::Dead)
    }

    /// True when the tile may be referenced by the render consumer, either
    /// directly or as a proxy for another tile. Locked tiles are never
    /// evicted.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire) > 0 || self.refs.load(Ordering::Acquire) > 0
    }

    pub fn lock_count(&self) -> u16 {
        self.locked.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> u16 {
        self.refs.load(Ordering::Acquire)
    }

    /// Test whether a proxy relation is currently held, i.e. whether it is
    /// safe to navigate to that relative and draw it in this tile's place.
    pub fn has_proxy(&self, mask: u8) -> bool {
        self.proxies.load(Ordering::Acquire) & mask != 0
    }

    /// Locks the tile against eviction and takes proxy references on every
    /// relative that could draw in its place. Only the TileManager may call
    /// this.
    pub(crate) fn lock(&self, index: &QuadIndex) {
        if self.locked.fetch_add(1, Ordering::AcqRel) > 0 {
            return;
        }

        let mut proxies = 0u8;
        let mut held = Vec::new();

        if let Some(p) = index.parent_item(self.node) {
            if p.state() != TileState::None {
                proxies |= PROXY_PARENT;
                p.refs.fetch_add(1, Ordering::AcqRel);
                held.push(p);
            }
        }

        if let Some(p) = index.grandparent_item(self.node) {
            if p.state() != TileState::None {
                proxies |= PROXY_GRANDPARENT;
                p.refs.fetch_add(1, Ordering::AcqRel);
                held.push(p);
            }
        }

        for quadrant in 0..4 {
            if let Some(c) = index.child_item(self.node, quadrant) {
                if c.state() != TileState::None {
                    proxies |= proxy_child(quadrant);
                    c.refs.fetch_add(1, Ordering::AcqRel);
                    held.push(c);
                }
            }
        }

        self.proxies.store(proxies, Ordering::Release);
        if let Ok(mut slot) = self.proxy_refs.lock() {
            *slot = held;
        }
    }

    /// Symmetric to [`MapTile::lock`]: the final unlock releases exactly the
    /// proxy references taken at lock time, whatever happened to the index
    /// in between.
    pub(crate) fn unlock(&self) {
        let prev = self.locked.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unlock of unlocked tile {}", self.coord);
        if prev != 1 {
            return;
        }

        self.proxies.store(0, Ordering::Release);
        let held = match self.proxy_refs.lock() {
            Ok(mut slot) => std::mem::take(&mut *slot),
            Err(_) => Vec::new(),
        };
        for proxy in held {
            proxy.release_ref();
        }

        // an invalidated tile defers its data clear until unlocked
        if self.state() == TileState::Dead && !self.is_locked() {
            self.clear_data();
        }
    }

    fn release_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "ref underflow on tile {}", self.coord);
        if prev == 1 && self.state() == TileState::Dead && !self.is_locked() {
            self.clear_data();
        }
    }

    /// Attaches the render payload. Called by the data source during
    /// `load`; the payload becomes visible to consumers once the manager
    /// promotes the tile to `NewData`.
    pub fn set_payload(&self, payload: TilePayload) {
        if let Ok(mut slot) = self.payload.lock() {
            *slot = Some(payload);
        }
    }

    pub fn payload(&self) -> Option<TilePayload> {
        self.payload.lock().ok()?.clone()
    }

    /// Drops the payload without touching state.
    pub(crate) fn clear_data(&self) {
        if let Ok(mut slot) = self.payload.lock() {
            *slot = None;
        }
    }

    /// Hard clear: drop the payload and return to `None`.
    pub(crate) fn reset(&self) {
        self.clear_data();
        self.advance(TileState::None);
    }

    pub fn distance(&self) -> f32 {
        f32::from_bits(self.distance.load(Ordering::Relaxed))
    }

    pub(crate) fn set_distance(&self, distance: f32) {
        self.distance.store(distance.to_bits(), Ordering::Relaxed);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    pub fn fade_time(&self) -> Option<Instant> {
        *self.fade_time.lock().ok()?
    }

    pub fn set_fade_time(&self, time: Option<Instant>) {
        if let Ok(mut slot) = self.fade_time.lock() {
            *slot = time;
        }
    }
}

impl std::fmt::Debug for MapTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapTile")
            .field("coord", &self.coord)
            .field("state", &self.state())
            .field("locked", &self.lock_count())
            .field("refs", &self.ref_count())
            .field("distance", &self.distance())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::index::QuadIndex;

    fn tile_in(index: &mut QuadIndex, x: u32, y: u32, z: u8) -> Arc<MapTile> {
        let node = index.add(TileCoord::new(x, y, z));
        let tile = Arc::new(MapTile::new(TileCoord::new(x, y, z), node));
        index.set_item(node, tile.clone());
        tile
    }

    #[test]
    fn test_legal_transitions() {
        let mut index = QuadIndex::new();
        let tile = tile_in(&mut index, 0, 0, 1);

        assert_eq!(tile.state(), TileState::None);
        assert!(tile.set_state(TileState::Loading).is_ok());
        assert!(tile.set_state(TileState::NewData).is_ok());
        assert!(tile.set_state(TileState::Ready).is_ok());
        assert!(tile.set_state(TileState::None).is_ok());
        assert!(tile.set_state(TileState::Loading).is_ok());
        assert!(tile.set_state(TileState::Cancel).is_ok());
        assert!(tile.set_state(TileState::Dead).is_ok());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut index = QuadIndex::new();
        let tile = tile_in(&mut index, 0, 0, 1);

        // None -> NewData skips Loading
        let err = tile.set_state(TileState::NewData).unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
        assert_eq!(tile.state(), TileState::None);

        // None -> Ready
        assert!(tile.set_state(TileState::Ready).is_err());
        // None -> Cancel
        assert!(tile.set_state(TileState::Cancel).is_err());

        tile.advance(TileState::Loading);
        // Loading -> Ready skips NewData
        assert!(tile.set_state(TileState::Ready).is_err());
        assert_eq!(tile.state(), TileState::Loading);
    }

    #[test]
    fn test_mark_ready_requires_new_data() {
        let mut index = QuadIndex::new();
        let tile = tile_in(&mut index, 0, 0, 1);

        assert!(tile.mark_ready().is_err());
        tile.advance(TileState::Loading);
        tile.advance(TileState::NewData);
        assert!(tile.mark_ready().is_ok());
        assert_eq!(tile.state(), TileState::Ready);
    }

    #[test]
    fn test_lock_takes_parent_proxy() {
        let mut index = QuadIndex::new();
        let parent = tile_in(&mut index, 1, 1, 3);
        let child = tile_in(&mut index, 2, 2, 4);

        parent.advance(TileState::Loading);
        parent.advance(TileState::NewData);
        parent.advance(TileState::Ready);

        child.lock(&index);
        assert_eq!(child.lock_count(), 1);
        assert!(child.has_proxy(PROXY_PARENT));
        assert_eq!(parent.ref_count(), 1);

        child.unlock();
        assert_eq!(child.lock_count(), 0);
        assert!(!child.has_proxy(PROXY_PARENT));
        assert_eq!(parent.ref_count(), 0);
    }

    #[test]
    fn test_lock_skips_empty_relatives() {
        let mut index = QuadIndex::new();
        let parent = tile_in(&mut index, 1, 1, 3);
        let child = tile_in(&mut index, 2, 2, 4);

        // parent exists but has no data at all
        child.lock(&index);
        assert!(!child.has_proxy(PROXY_PARENT));
        assert_eq!(parent.ref_count(), 0);
        child.unlock();
    }

    #[test]
    fn test_nested_locks_take_proxies_once() {
        let mut index = QuadIndex::new();
        let parent = tile_in(&mut index, 0, 0, 2);
        let child = tile_in(&mut index, 0, 0, 3);
        parent.advance(TileState::Loading);

        child.lock(&index);
        child.lock(&index);
        assert_eq!(parent.ref_count(), 1);

        child.unlock();
        assert_eq!(parent.ref_count(), 1);
        child.unlock();
        assert_eq!(parent.ref_count(), 0);
    }

    #[test]
    fn test_child_proxies() {
        let mut index = QuadIndex::new();
        let tile = tile_in(&mut index, 1, 1, 2);
        let child = tile_in(&mut index, 3, 2, 3);
        child.advance(TileState::Loading);

        tile.lock(&index);
        // (3, 2) inside (1, 1): x odd, y even -> quadrant 1
        assert!(tile.has_proxy(proxy_child(1)));
        assert_eq!(child.ref_count(), 1);
        tile.unlock();
        assert_eq!(child.ref_count(), 0);
    }

    #[test]
    fn test_consumer_fields_round_trip() {
        let mut index = QuadIndex::new();
        let tile = tile_in(&mut index, 0, 0, 1);

        assert!(!tile.is_visible());
        tile.set_visible(true);
        assert!(tile.is_visible());

        assert!(tile.fade_time().is_none());
        let now = instant::Instant::now();
        tile.set_fade_time(Some(now));
        assert_eq!(tile.fade_time(), Some(now));
        tile.set_fade_time(None);
        assert!(tile.fade_time().is_none());
    }

    #[test]
    fn test_dead_tile_defers_clear_until_unlock() {
        let mut index = QuadIndex::new();
        let tile = tile_in(&mut index, 0, 0, 1);
        tile.set_payload(Arc::new(vec![1u8, 2, 3]));

        tile.lock(&index);
        tile.advance(TileState::Dead);
        assert!(tile.payload().is_some());

        tile.unlock();
        assert!(tile.payload().is_none());
    }
}
