//! Configuration for cache sizing, loading and zoom selection.
//!
//! All engine-wide tunables live here so behavior can be adjusted through
//! presets or custom values instead of scattered constants.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileManagerOptions {
    /// Soft bound on the number of cached tiles. Eviction keeps the cache
    /// near this size but never drops locked or referenced tiles.
    pub cache_limit: usize,
    /// Eviction only runs once the excess over `cache_limit` passes this
    /// threshold, so a handful of stragglers does not trigger a sort.
    pub cache_threshold: usize,
    /// Below this excess the distance-ordered eviction pass is skipped and
    /// only the cheap state-based pass runs.
    pub cache_clear_threshold: usize,
    /// Bound on tiles holding loaded-but-not-yet-consumed data. Crossing it
    /// forces eviction to trim the upload backlog.
    pub max_pending_upload: usize,
    /// Lowest zoom level tiles are requested for.
    pub min_zoom: u8,
    /// Highest zoom level tiles are requested for.
    pub max_zoom: u8,
    /// Number of loader worker threads.
    pub num_loaders: usize,
    /// Eagerly request a tile's parent along with the tile itself, so a
    /// coarser fallback is available while the exact tile loads.
    pub parent_prefetch: bool,
    /// When set, only the listed zoom levels have data; tile selection picks
    /// the nearest supported level at or below the requested one.
    pub zoom_table: Option<Vec<u8>>,
    /// Scale ratio (relative to the working zoom level) above which the
    /// working zoom switches up. Must be >= 1.
    pub scale_up_threshold: f64,
    /// Reciprocal hysteresis bound: the working zoom switches down once the
    /// scale ratio falls below `1 / scale_down_threshold`. Must be >= 1.
    pub scale_down_threshold: f64,
    /// Extra margin, in map pixels, added around the viewport before the
    /// scan. Zero scans the exact visible area.
    pub extent_buffer: f32,
    /// Initial viewport size in pixels.
    pub viewport_width: u32,
    /// Initial viewport size in pixels.
    pub viewport_height: u32,
    /// Capacity of the tile event channel; events beyond it are dropped.
    pub event_capacity: usize,
}

impl Default for TileManagerOptions {
    fn default() -> Self {
        Self {
            cache_limit: 100,
            cache_threshold: 30,
            cache_clear_threshold: 10,
            max_pending_upload: 40,
            min_zoom: 0,
            max_zoom: 17,
            num_loaders: 4,
            parent_prefetch: true,
            zoom_table: None,
            scale_up_threshold: 1.5,
            scale_down_threshold: 1.5,
            extent_buffer: 0.0,
            viewport_width: 1024,
            viewport_height: 768,
            event_capacity: 256,
        }
    }
}

/// Unified configuration presets for TileManagerOptions
impl TileManagerOptions {
    pub fn low_resource() -> Self {
        Self {
            cache_limit: 48,
            cache_threshold: 10,
            max_pending_upload: 16,
            num_loaders: 2,
            parent_prefetch: false,
            ..Self::default()
        }
    }

    pub fn high_performance() -> Self {
        Self {
            cache_limit: 512,
            cache_threshold: 60,
            max_pending_upload: 80,
            num_loaders: 8,
            ..Self::default()
        }
    }

    pub fn for_testing() -> Self {
        Self {
            cache_limit: 16,
            cache_threshold: 0,
            cache_clear_threshold: 0,
            num_loaders: 1,
            parent_prefetch: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = TileManagerOptions::default();
        assert_eq!(opts.cache_limit, 100);
        assert_eq!(opts.max_pending_upload, 40);
        assert!(opts.scale_up_threshold >= 1.0);
        assert!(opts.scale_down_threshold >= 1.0);
    }

    #[test]
    fn test_presets_stay_within_sane_bounds() {
        for opts in [
            TileManagerOptions::low_resource(),
            TileManagerOptions::high_performance(),
            TileManagerOptions::for_testing(),
        ] {
            assert!(opts.num_loaders >= 1);
            assert!(opts.min_zoom <= opts.max_zoom);
            assert!(opts.cache_limit > 0);
        }
    }
}
