//! Prelude module for common tilekit types and traits
//!
//! Re-exports the most commonly used types for easy importing with
//! `use tilekit::prelude::*;`

pub use crate::core::{
    config::TileManagerOptions,
    constants::TILE_SIZE,
    geo::{MapPosition, Point, TileCoord},
    viewport::Viewport,
};

pub use crate::tiles::{
    index::QuadIndex,
    loader::TileLoaderPool,
    manager::{TileEvent, TileManager},
    queue::JobQueue,
    set::TileSet,
    source::{QueryResult, TileDataSource},
    tile::{proxy_child, MapTile, TilePayload, TileState, PROXY_GRANDPARENT, PROXY_PARENT},
};

pub use crate::{Error, Result};

pub use std::sync::Arc;
pub use std::time::Duration;

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
