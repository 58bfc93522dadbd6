use bacnet_core::{BoundingBox, ObjectClass};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// One classified box, in whatever frame its owner uses (tile-local while
/// attached to a [`Tile`], image-global after reunification).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Square window of the source image handed to the detector.
#[derive(Clone, Debug)]
pub struct Tile {
    /// Window in image coordinates. May extend past the image on the right
    /// and bottom edges.
    pub rect: BoundingBox,
    /// Pixels of `rect`, zero where the window leaves the image.
    pub image: GrayImage,
    /// Detections in tile-local coordinates.
    pub detections: Vec<Detection>,
}

impl Tile {
    #[inline]
    pub fn origin(&self) -> (i32, i32) {
        (self.rect.x1, self.rect.y1)
    }

    /// File stem used when the tile is written out for the detector:
    /// `<image_stem>_<x1>_<y1>`.
    pub fn file_stem(&self, image_stem: &str) -> String {
        format!("{}_{}_{}", image_stem, self.rect.x1, self.rect.y1)
    }

    /// Recover the tile origin from a stem produced by [`file_stem`](Self::file_stem).
    pub fn origin_from_stem(stem: &str) -> Option<(i32, i32)> {
        let mut parts = stem.rsplitn(3, '_');
        let y = parts.next()?.parse().ok()?;
        let x = parts.next()?.parse().ok()?;
        parts.next()?;
        Some((x, y))
    }
}
