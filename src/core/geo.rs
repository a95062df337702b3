use serde::{Deserialize, Serialize};

use crate::core::constants::MAX_ZOOM_LEVEL;

/// Represents a point in screen or map-pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Represents a tile coordinate in the slippy map tile system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Gets the parent tile at the next-lower zoom level
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            None
        } else {
            Some(TileCoord::new(self.x / 2, self.y / 2, self.z - 1))
        }
    }

    /// Gets the grandparent tile two zoom levels up
    pub fn grandparent(&self) -> Option<TileCoord> {
        self.parent().and_then(|p| p.parent())
    }

    /// Gets one of the four child tiles at the next-higher zoom level.
    ///
    /// `quadrant` selects the child: bit 0 is the x offset, bit 1 the y
    /// offset, matching the quad-index node numbering.
    pub fn child(&self, quadrant: usize) -> Option<TileCoord> {
        if self.z >= MAX_ZOOM_LEVEL || quadrant >= 4 {
            None
        } else {
            Some(TileCoord::new(
                self.x * 2 + (quadrant as u32 & 1),
                self.y * 2 + (quadrant as u32 >> 1),
                self.z + 1,
            ))
        }
    }

    /// Gets all child tiles at the next-higher zoom level
    pub fn children(&self) -> Vec<TileCoord> {
        (0..4).filter_map(|i| self.child(i)).collect()
    }

    /// Checks if the tile is valid for its zoom level
    pub fn is_valid(&self) -> bool {
        let max_coord = 1u32 << self.z.min(MAX_ZOOM_LEVEL);
        self.z <= MAX_ZOOM_LEVEL && self.x < max_coord && self.y < max_coord
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A map view position: the projected map coordinate under the viewport
/// center plus the current scale.
///
/// `x` and `y` are normalized map coordinates in `[0, 1]` (the whole world
/// maps to the unit square). `scale` is the number of tiles along one axis
/// at the current magnification, so `scale == 2^z` shows zoom level `z`
/// exactly. `rotation` is the view rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPosition {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f32,
}

impl MapPosition {
    pub fn new(x: f64, y: f64, scale: f64) -> Self {
        Self {
            x,
            y,
            scale,
            rotation: 0.0,
        }
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    /// Integer zoom level implied by the current scale.
    pub fn zoom_level(&self) -> u8 {
        if self.scale < 1.0 {
            return 0;
        }
        (self.scale.log2().floor() as u32).min(MAX_ZOOM_LEVEL as u32) as u8
    }
}

impl Default for MapPosition {
    fn default() -> Self {
        Self::new(0.5, 0.5, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_coord_parent_child() {
        let tile = TileCoord::new(5, 3, 4);
        let parent = tile.parent().unwrap();
        assert_eq!(parent, TileCoord::new(2, 1, 3));

        // quadrant of (5, 3) inside (2, 1): x odd, y odd -> 3
        assert_eq!(parent.child(3), Some(tile));

        let children = tile.children();
        assert_eq!(children.len(), 4);
        for child in children {
            assert_eq!(child.parent(), Some(tile));
        }
    }

    #[test]
    fn test_tile_coord_root_has_no_parent() {
        assert_eq!(TileCoord::new(0, 0, 0).parent(), None);
        assert_eq!(TileCoord::new(1, 0, 1).grandparent(), None);
    }

    #[test]
    fn test_tile_coord_validity() {
        assert!(TileCoord::new(0, 0, 0).is_valid());
        assert!(TileCoord::new(1023, 1023, 10).is_valid());
        assert!(!TileCoord::new(1024, 0, 10).is_valid());
    }

    #[test]
    fn test_zoom_level_from_scale() {
        assert_eq!(MapPosition::new(0.5, 0.5, 1.0).zoom_level(), 0);
        assert_eq!(MapPosition::new(0.5, 0.5, 1024.0).zoom_level(), 10);
        assert_eq!(MapPosition::new(0.5, 0.5, 1500.0).zoom_level(), 10);
        assert_eq!(MapPosition::new(0.5, 0.5, 2048.0).zoom_level(), 11);
        assert_eq!(MapPosition::new(0.5, 0.5, 0.25).zoom_level(), 0);
    }
}
