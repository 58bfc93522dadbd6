//! Overlapping tile grid for oversized micrographs.
//!
//! The detector only accepts fixed-size inputs, so large images are cut into
//! square tiles that overlap by a fraction of their side. After detection,
//! [`TileGrid::reunify`] keeps each detection only from the tile whose
//! *confidence region* (the central part of the tile) contains its center:
//! near a tile edge the object is truncated, while an overlapping neighbor
//! sees it whole.

mod grid;
mod tile;

pub use grid::{TileGrid, TileParams, TilingError};
pub use tile::{Detection, Tile};
