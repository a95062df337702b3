//! Versioned snapshots of the visible tile set.
//!
//! A `TileSet` is how tiles cross the thread boundary to the render
//! consumer: the manager copies the current set into the consumer's set
//! under its lock, locking every copied tile so nothing in the snapshot can
//! be evicted until the consumer lets go.

use std::sync::Arc;

use crate::tiles::index::QuadIndex;
use crate::tiles::tile::MapTile;

/// Serial of a set that holds no published snapshot.
pub const SERIAL_NONE: u64 = u64::MAX;

/// An ordered, duplicate-free collection of tile references plus the serial
/// of the snapshot it was copied from.
pub struct TileSet {
    tiles: Vec<Arc<MapTile>>,
    serial: u64,
}

impl TileSet {
    pub fn new() -> Self {
        Self {
            tiles: Vec::new(),
            serial: SERIAL_NONE,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tiles: Vec::with_capacity(capacity),
            serial: SERIAL_NONE,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<MapTile>> {
        self.tiles.iter()
    }

    pub fn tiles(&self) -> &[Arc<MapTile>] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn set_serial(&mut self, serial: u64) {
        self.serial = serial;
    }

    pub(crate) fn push(&mut self, tile: Arc<MapTile>) {
        self.tiles.push(tile);
    }

    /// Empties the set without touching tile locks; used on the candidate
    /// buffer whose tiles were never locked, or after locks moved elsewhere.
    pub(crate) fn clear_items(&mut self) {
        self.tiles.clear();
    }

    pub(crate) fn sort_by_coord(&mut self) {
        self.tiles.sort_unstable_by_key(|t| t.coord);
    }

    /// Element-wise identity comparison against another coord-sorted set.
    pub(crate) fn same_tiles(&self, other: &TileSet) -> bool {
        self.tiles.len() == other.tiles.len()
            && self
                .tiles
                .iter()
                .zip(other.tiles.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    /// Locks every tile in the set against eviction.
    pub(crate) fn lock_tiles(&self, index: &QuadIndex) {
        for tile in &self.tiles {
            tile.lock(index);
        }
    }

    /// Unlocks and drops all tile references, resetting the serial so the
    /// next snapshot copy repopulates this set.
    pub(crate) fn release_tiles(&mut self) {
        for tile in &self.tiles {
            tile.unlock();
        }
        self.tiles.clear();
        self.serial = SERIAL_NONE;
    }

    /// Replaces this set's contents with `source`'s. New tiles are locked
    /// before old ones are released, so a tile present in both sets never
    /// transiently drops to zero locks.
    pub(crate) fn set_from(&mut self, source: &TileSet, index: &QuadIndex) {
        source.lock_tiles(index);

        for tile in &self.tiles {
            tile.unlock();
        }
        self.tiles.clear();
        self.tiles.extend(source.tiles.iter().cloned());
        self.serial = source.serial;
    }
}

impl Default for TileSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSet")
            .field("serial", &self.serial)
            .field("tiles", &self.tiles.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::TileCoord;

    fn tile_in(index: &mut QuadIndex, x: u32, y: u32, z: u8) -> Arc<MapTile> {
        let coord = TileCoord::new(x, y, z);
        let node = index.add(coord);
        let tile = Arc::new(MapTile::new(coord, node));
        index.set_item(node, tile.clone());
        tile
    }

    #[test]
    fn test_lock_release_round_trip() {
        let mut index = QuadIndex::new();
        let a = tile_in(&mut index, 0, 0, 2);
        let b = tile_in(&mut index, 1, 0, 2);

        let mut set = TileSet::new();
        set.push(a.clone());
        set.push(b.clone());
        set.set_serial(1);

        set.lock_tiles(&index);
        assert_eq!(a.lock_count(), 1);
        assert_eq!(b.lock_count(), 1);

        set.release_tiles();
        assert_eq!(a.lock_count(), 0);
        assert_eq!(b.lock_count(), 0);
        assert!(set.is_empty());
        assert_eq!(set.serial(), SERIAL_NONE);
    }

    #[test]
    fn test_set_from_keeps_shared_tile_locked() {
        let mut index = QuadIndex::new();
        let shared = tile_in(&mut index, 0, 0, 2);
        let old_only = tile_in(&mut index, 1, 0, 2);
        let new_only = tile_in(&mut index, 2, 0, 2);

        let mut source = TileSet::new();
        source.push(shared.clone());
        source.push(new_only.clone());
        source.set_serial(2);

        let mut dest = TileSet::new();
        dest.push(shared.clone());
        dest.push(old_only.clone());
        dest.set_serial(1);
        dest.lock_tiles(&index);

        dest.set_from(&source, &index);

        assert_eq!(shared.lock_count(), 1);
        assert_eq!(old_only.lock_count(), 0);
        assert_eq!(new_only.lock_count(), 1);
        assert_eq!(dest.serial(), 2);
        assert_eq!(dest.len(), 2);
    }

    #[test]
    fn test_same_tiles_compares_identity() {
        let mut index = QuadIndex::new();
        let a = tile_in(&mut index, 0, 0, 3);
        let b = tile_in(&mut index, 1, 1, 3);

        let mut left = TileSet::new();
        let mut right = TileSet::new();
        left.push(b.clone());
        left.push(a.clone());
        right.push(a.clone());
        right.push(b.clone());

        left.sort_by_coord();
        right.sort_by_coord();
        assert!(left.same_tiles(&right));

        right.push(a);
        assert!(!left.same_tiles(&right));
    }
}
