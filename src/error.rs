use crate::placement::CrossTileId;
use crate::placement::tile::OverscaledTileId;
use thiserror::Error;

/// Problems in placement input, caught before placement runs.
///
/// Invariants placement itself relies on (non-zero ids reaching the
/// collision index) are asserted rather than reported.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("fade duration must be finite and non-negative, got {0}")]
    InvalidFadeDuration(f64),
    #[error("grid cell size must be positive, got {0}")]
    InvalidGridCellSize(f32),
    #[error("tile {tile}: bucket instance id 0 is reserved")]
    ZeroBucketInstanceId { tile: OverscaledTileId },
    #[error("bucket instance id {0} is used more than once")]
    DuplicateBucketInstanceId(u32),
    #[error("tile {tile}: bucket {bucket} symbol {symbol} has cross-tile id 0")]
    ZeroCrossTileId {
        tile: OverscaledTileId,
        bucket: u32,
        symbol: usize,
    },
    #[error("tile {tile}: bucket {bucket} has no layers")]
    BucketWithoutLayers { tile: OverscaledTileId, bucket: u32 },
    #[error("tile {tile}: bucket {bucket} references unknown layer `{layer}`")]
    UnknownLayer {
        tile: OverscaledTileId,
        bucket: u32,
        layer: String,
    },
    #[error(
        "tile {tile}: bucket {bucket} symbol {symbol} collision range {start}..{end} exceeds {len} records"
    )]
    CollisionRangeOutOfBounds {
        tile: OverscaledTileId,
        bucket: u32,
        symbol: usize,
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("tile {tile}: bucket {bucket} symbol {symbol} references missing placed symbol {index}")]
    PlacedSymbolOutOfBounds {
        tile: OverscaledTileId,
        bucket: u32,
        symbol: usize,
        index: usize,
    },
    #[error("label {0} appears twice in the same bucket")]
    DuplicateCrossTileId(CrossTileId),
}
