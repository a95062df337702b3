//! # Tilekit
//!
//! A cache, scheduling and loading engine for slippy-map tiles.
//!
//! Given a viewport position and zoom level, the engine decides which map
//! tiles are needed, fetches missing ones through background workers,
//! keeps a bounded in-memory cache of fetched tiles, and hands a
//! consistent, race-free snapshot of the visible tile set to a render
//! consumer every frame. While the exact tile is still loading, coarser or
//! finer cached relatives are tracked as substitutes through per-tile
//! proxy references.
//!
//! The engine is renderer- and source-agnostic: tile payloads are opaque,
//! and data arrives through the [`TileDataSource`] trait.

pub mod core;
pub mod prelude;
pub mod tiles;

// Re-export public API
pub use crate::core::{
    config::TileManagerOptions,
    geo::{MapPosition, Point, TileCoord},
    viewport::Viewport,
};

pub use crate::tiles::{
    loader::TileLoaderPool,
    manager::{TileEvent, TileManager},
    set::TileSet,
    source::{QueryResult, TileDataSource},
    tile::{MapTile, TilePayload, TileState},
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tile state transition outside the legal graph was attempted.
    /// This is a correctness tripwire for concurrency bugs, not a
    /// recoverable condition.
    #[error("illegal tile state transition {from:?} -> {to:?}")]
    IllegalTransition { from: TileState, to: TileState },
}
