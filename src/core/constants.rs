//! Engine-wide magic numbers, kept in a single place so they are easy to tweak.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Deepest zoom level the tile grid supports (2^30 tiles per axis fits in i32
/// arithmetic used by the scanline fill and the distance metric).
pub const MAX_ZOOM_LEVEL: u8 = 30;

/// Fixed-point zoom level used for the distance metric; positions are scaled
/// to this grid so tiles of different zoom levels compare on one axis.
pub const DISTANCE_FP_ZOOM: i32 = 20;
