use crate::tiles::tile::MapTile;

/// Outcome of a single data-source query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Tile data was produced and attached to the tile.
    Success,
    /// The query failed; the tile may be re-requested on a later scan.
    Failed,
    /// The source cannot answer right now; try again later, no penalty.
    Delayed,
}

/// Trait representing anything that can produce render data for a tile:
/// a map-file decoder, a network fetcher, a test fixture.
///
/// `load` is called from loader worker threads, at most once per claimed
/// job. On `Success` the implementation must have attached the payload via
/// [`MapTile::set_payload`] before returning. Implementations may block on
/// I/O; the engine never calls this while holding its locks.
pub trait TileDataSource: Send + Sync {
    fn load(&self, tile: &MapTile) -> QueryResult;
}
