use bacnet_core::BoundingBox;
use image::{imageops, GrayImage};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::tile::{Detection, Tile};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilingError {
    #[error("tile size must be positive")]
    ZeroTileSize,
    #[error("overlap factor must be at least 2 (got {0})")]
    OverlapFactorTooSmall(u32),
    #[error("tile size {tile_size} is too small for overlap factor {overlap_factor}")]
    ZeroStride { tile_size: u32, overlap_factor: u32 },
}

/// Tiling parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileParams {
    /// Side of the square detector input, in pixels.
    pub tile_size: u32,
    /// `k` means consecutive tiles share `1/k` of their side
    /// (2 -> 50 % overlap, 3 -> 33 %).
    pub overlap_factor: u32,
}

impl Default for TileParams {
    fn default() -> Self {
        Self {
            tile_size: 416,
            overlap_factor: 3,
        }
    }
}

/// Validated tiling scheme.
#[derive(Clone, Copy, Debug)]
pub struct TileGrid {
    params: TileParams,
    stride: u32,
}

impl TileGrid {
    pub fn new(params: TileParams) -> Result<Self, TilingError> {
        if params.tile_size == 0 {
            return Err(TilingError::ZeroTileSize);
        }
        if params.overlap_factor < 2 {
            return Err(TilingError::OverlapFactorTooSmall(params.overlap_factor));
        }
        let stride = params.tile_size * (params.overlap_factor - 1) / params.overlap_factor;
        if stride == 0 {
            return Err(TilingError::ZeroStride {
                tile_size: params.tile_size,
                overlap_factor: params.overlap_factor,
            });
        }
        Ok(Self { params, stride })
    }

    #[inline]
    pub fn params(&self) -> &TileParams {
        &self.params
    }

    /// Distance between the origins of consecutive tiles.
    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Images no larger than one tile go to the detector whole.
    pub fn needs_split(&self, width: u32, height: u32) -> bool {
        width > self.params.tile_size || height > self.params.tile_size
    }

    /// Tile-local confidence interval `[lo, hi)` on both axes.
    ///
    /// Starts at `tile_size / (2k)` and spans exactly one stride, so the
    /// regions of neighboring tiles tile the plane without gaps or overlap.
    pub fn confidence_region(&self) -> (u32, u32) {
        let lo = self.params.tile_size / (2 * self.params.overlap_factor);
        (lo, lo + self.stride)
    }

    /// Whether a tile-local point lies in the confidence region.
    pub fn in_confidence_region(&self, p: Point2<f32>) -> bool {
        let (lo, hi) = self.confidence_region();
        let (lo, hi) = (lo as f32, hi as f32);
        lo <= p.x && p.x < hi && lo <= p.y && p.y < hi
    }

    /// Tile windows for a `width x height` image in row-major order.
    pub fn tile_rects(&self, width: u32, height: u32) -> Vec<BoundingBox> {
        let size = self.params.tile_size as i32;
        let mut rects = Vec::new();
        for y in (0..height).step_by(self.stride as usize) {
            for x in (0..width).step_by(self.stride as usize) {
                let (x, y) = (x as i32, y as i32);
                rects.push(BoundingBox {
                    x1: x,
                    y1: y,
                    x2: x + size,
                    y2: y + size,
                });
            }
        }
        rects
    }

    /// Cut `image` into overlapping tiles. Tiles hanging over the right or
    /// bottom edge are zero-padded to full size.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image), fields(width = image.width(), height = image.height()))
    )]
    pub fn split(&self, image: &GrayImage) -> Vec<Tile> {
        let size = self.params.tile_size;
        let tiles: Vec<Tile> = self
            .tile_rects(image.width(), image.height())
            .into_iter()
            .map(|rect| {
                let (x, y) = (rect.x1 as u32, rect.y1 as u32);
                let w = size.min(image.width() - x);
                let h = size.min(image.height() - y);
                let mut pixels = GrayImage::new(size, size);
                let crop = imageops::crop_imm(image, x, y, w, h).to_image();
                imageops::replace(&mut pixels, &crop, 0, 0);
                Tile {
                    rect,
                    image: pixels,
                    detections: Vec::new(),
                }
            })
            .collect();
        debug!(
            "split {}x{} image into {} tiles (size {}, stride {})",
            image.width(),
            image.height(),
            tiles.len(),
            size,
            self.stride
        );
        tiles
    }

    /// Merge per-tile detections into image coordinates.
    ///
    /// A detection survives only if its center lies in its tile's confidence
    /// region; survivors are translated by the tile origin and clipped to the
    /// image. Objects whose center never lands in any confidence region (a
    /// thin band along the image border) are lost.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, tiles), fields(tiles = tiles.len()))
    )]
    pub fn reunify(&self, tiles: &[Tile], width: u32, height: u32) -> Vec<Detection> {
        let mut merged = Vec::new();
        let mut dropped = 0usize;
        for tile in tiles {
            let (ox, oy) = tile.origin();
            for det in &tile.detections {
                if !self.in_confidence_region(det.bbox.center()) {
                    dropped += 1;
                    continue;
                }
                match det.bbox.translate(ox, oy).clamp_to(width, height) {
                    Some(bbox) => merged.push(Detection { bbox, ..*det }),
                    None => dropped += 1,
                }
            }
        }
        debug!(
            "reunified {} detections from {} tiles ({} outside confidence regions)",
            merged.len(),
            tiles.len(),
            dropped
        );
        merged
    }
}
