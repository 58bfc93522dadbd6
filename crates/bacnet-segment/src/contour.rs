//! Per-object region segmentation inside a bounding box.
//!
//! The crop of one object usually also shows parts of its neighbors. Boxes
//! listed in the object's overlap list are blanked before labelling so the
//! selected component belongs to this object. The stored contour is then
//! grown back to the full unmasked component: masking only removes pixels,
//! and the region shared with a neighbor is exactly where contacts show up.

use bacnet_core::{
    BoundingBox, CancelToken, Cancelled, ContourMask, ObjectClass, ObjectId, ObjectSet,
};
use image::{imageops, GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{debug, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::threshold::{binarize, li_threshold};

#[cfg(feature = "tracing")]
use tracing::instrument;

type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContourError {
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),
    #[error("the surface has no contour")]
    Surface,
    #[error("bounding box {bbox} of {id} lies outside the image")]
    OutsideImage { id: ObjectId, bbox: BoundingBox },
    #[error("image is {image_width}x{image_height} but objects were registered for {set_width}x{set_height}")]
    SizeMismatch {
        image_width: u32,
        image_height: u32,
        set_width: u32,
        set_height: u32,
    },
    #[error("no foreground in the crop of {0}")]
    EmptyForeground(ObjectId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourParams {
    /// Erode then dilate cell crops once (3x3 cross) to detach thin debris.
    pub open_cells: bool,
    /// Blank the boxes of overlapping objects before labelling.
    pub mask_overlaps: bool,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            open_cells: true,
            mask_overlaps: true,
        }
    }
}

/// Component selection rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    /// Most pixels. Used for cells.
    LargestArea,
    /// Largest bounding rectangle. A nanowire is thin, so its pixel count is
    /// small compared with the extent it spans.
    LargestExtent,
}

impl SelectionMode {
    pub fn for_class(class: ObjectClass) -> Self {
        match class {
            ObjectClass::Nanowire => Self::LargestExtent,
            _ => Self::LargestArea,
        }
    }
}

/// Summary of one labelled component, in label-image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentStats {
    pub label: u32,
    pub area: usize,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    sum_x: u64,
    sum_y: u64,
}

impl ComponentStats {
    fn new(label: u32, x: u32, y: u32) -> Self {
        Self {
            label,
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0,
            sum_y: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.area += 1;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.sum_x += x as u64;
        self.sum_y += y as u64;
    }

    pub fn extent_area(&self) -> u64 {
        (self.max_x - self.min_x + 1) as u64 * (self.max_y - self.min_y + 1) as u64
    }

    /// Pixel centroid, rounded.
    pub fn centroid(&self) -> Point2<i32> {
        let n = self.area.max(1) as f64;
        Point2::new(
            (self.sum_x as f64 / n).round() as i32,
            (self.sum_y as f64 / n).round() as i32,
        )
    }
}

/// Pick one component of a label image. Ties go to the lowest label.
pub fn select_component(labels: &LabelImage, mode: SelectionMode) -> Option<ComponentStats> {
    let mut stats: Vec<Option<ComponentStats>> = Vec::new();
    for (x, y, p) in labels.enumerate_pixels() {
        let label = p.0[0];
        if label == 0 {
            continue;
        }
        let idx = label as usize;
        if stats.len() <= idx {
            stats.resize(idx + 1, None);
        }
        stats[idx]
            .get_or_insert_with(|| ComponentStats::new(label, x, y))
            .add(x, y);
    }

    let mut best: Option<ComponentStats> = None;
    for s in stats.into_iter().flatten() {
        let better = match (&best, mode) {
            (None, _) => true,
            (Some(b), SelectionMode::LargestArea) => s.area > b.area,
            (Some(b), SelectionMode::LargestExtent) => s.extent_area() > b.extent_area(),
        };
        if better {
            best = Some(s);
        }
    }
    best
}

/// Result of segmenting one object.
#[derive(Clone, Debug)]
pub struct Extraction {
    /// Image coordinates.
    pub centroid: Point2<i32>,
    pub mask: ContourMask,
    /// Masking removed all foreground and the unmasked crop was used.
    pub unmasked_fallback: bool,
}

/// Counts gathered by [`ContourExtractor::compute_centroids`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub segmented: usize,
    pub failed: usize,
    pub fallbacks: usize,
}

/// Segments objects of one grayscale image.
pub struct ContourExtractor<'a> {
    image: &'a GrayImage,
    params: ContourParams,
}

impl<'a> ContourExtractor<'a> {
    pub fn new(image: &'a GrayImage, params: ContourParams) -> Self {
        Self { image, params }
    }

    /// Segment object `id`. Does not modify `objects`.
    pub fn extract(&self, objects: &ObjectSet, id: ObjectId) -> Result<Extraction, ContourError> {
        let (iw, ih) = self.image.dimensions();
        let (sw, sh) = objects.image_size();
        if (iw, ih) != (sw, sh) {
            return Err(ContourError::SizeMismatch {
                image_width: iw,
                image_height: ih,
                set_width: sw,
                set_height: sh,
            });
        }
        let obj = objects.get(id).ok_or(ContourError::UnknownObject(id))?;
        if obj.is_surface() {
            return Err(ContourError::Surface);
        }

        // Inclusive crop window, clipped to the image.
        let bbox = obj.bbox;
        let x0 = bbox.x1.max(0);
        let y0 = bbox.y1.max(0);
        let x_end = bbox.x2.min(iw as i32 - 1);
        let y_end = bbox.y2.min(ih as i32 - 1);
        if x0 > x_end || y0 > y_end {
            return Err(ContourError::OutsideImage { id, bbox });
        }
        let (cw, ch) = ((x_end - x0 + 1) as u32, (y_end - y0 + 1) as u32);
        let crop = imageops::crop_imm(self.image, x0 as u32, y0 as u32, cw, ch).to_image();

        let threshold = li_threshold(crop.as_raw()).ok_or(ContourError::EmptyForeground(id))?;
        let mut binary = binarize(&crop, threshold);
        if obj.is_cell() && self.params.open_cells {
            binary = dilate(&erode(&binary, Norm::L1, 1), Norm::L1, 1);
        }

        let mut masked = binary.clone();
        if self.params.mask_overlaps {
            for other in obj.overlaps.iter().filter_map(|&o| objects.get(o)) {
                blank_box(&mut masked, &other.bbox, x0, y0);
            }
        }

        let has_foreground = |img: &GrayImage| img.as_raw().iter().any(|&v| v > 0);
        let unmasked_fallback = !has_foreground(&masked);
        let source = if unmasked_fallback {
            if !has_foreground(&binary) {
                return Err(ContourError::EmptyForeground(id));
            }
            &binary
        } else {
            &masked
        };

        let labels = connected_components(source, Connectivity::Eight, Luma([0u8]));
        let selected = select_component(&labels, SelectionMode::for_class(obj.class))
            .ok_or(ContourError::EmptyForeground(id))?;
        let local = selected.centroid();
        let centroid = Point2::new(local.x + x0, local.y + y0);

        let seed = (selected.min_x..=selected.max_x)
            .flat_map(|x| (selected.min_y..=selected.max_y).map(move |y| (x, y)))
            .find(|&(x, y)| labels.get_pixel(x, y).0[0] == selected.label)
            .ok_or(ContourError::EmptyForeground(id))?;

        // Grow back to the full component of the unmasked binary crop.
        let (region, label) = if unmasked_fallback {
            (labels, selected.label)
        } else {
            let full = connected_components(&binary, Connectivity::Eight, Luma([0u8]));
            let label = full.get_pixel(seed.0, seed.1).0[0];
            (full, label)
        };
        let pixels: Vec<(usize, usize)> = region
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] == label)
            .map(|(x, y, _)| (x as usize + x0 as usize, y as usize + y0 as usize))
            .collect();
        let mask = ContourMask::from_pixels(iw as usize, ih as usize, &pixels)
            .ok_or(ContourError::EmptyForeground(id))?;

        Ok(Extraction {
            centroid,
            mask,
            unmasked_fallback,
        })
    }

    /// Segment every cell, storing its centroid, and its contour when the
    /// cell overlaps another one.
    ///
    /// Cells that cannot be segmented keep `centroid = None` and are skipped
    /// by edge inference.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, objects, cancel), fields(objects = objects.len()))
    )]
    pub fn compute_centroids(
        &self,
        objects: &mut ObjectSet,
        cancel: &CancelToken,
    ) -> Result<ExtractionStats, Cancelled> {
        let mut stats = ExtractionStats::default();
        for id in objects.ids_of(ObjectClass::Cell) {
            cancel.check()?;
            match self.extract(objects, id) {
                Ok(ex) => {
                    if let Some(obj) = objects.get_mut(id) {
                        obj.centroid = Some(ex.centroid);
                        if !obj.overlaps.is_empty() {
                            obj.contour = Some(ex.mask);
                        }
                    }
                    stats.segmented += 1;
                    if ex.unmasked_fallback {
                        stats.fallbacks += 1;
                    }
                }
                Err(e) => {
                    warn!("cell {id}: {e}; excluded from the network");
                    if let Some(obj) = objects.get_mut(id) {
                        obj.centroid = None;
                        obj.contour = None;
                    }
                    stats.failed += 1;
                }
            }
        }
        debug!(
            "segmented {} cells ({} failed, {} via unmasked fallback)",
            stats.segmented, stats.failed, stats.fallbacks
        );
        Ok(stats)
    }

    /// Compute and store the contour of `id` if it is missing.
    pub fn ensure_contour(&self, objects: &mut ObjectSet, id: ObjectId) -> Result<(), ContourError> {
        let obj = objects.get(id).ok_or(ContourError::UnknownObject(id))?;
        if obj.has_contour() {
            return Ok(());
        }
        let ex = self.extract(objects, id)?;
        if let Some(obj) = objects.get_mut(id) {
            obj.centroid.get_or_insert(ex.centroid);
            obj.contour = Some(ex.mask);
        }
        Ok(())
    }
}

/// Zero the part of `bbox` (inclusive, image coordinates) that falls inside
/// a crop whose origin is `(x0, y0)`.
fn blank_box(crop: &mut GrayImage, bbox: &BoundingBox, x0: i32, y0: i32) {
    let (w, h) = (crop.width() as i32, crop.height() as i32);
    let xa = (bbox.x1 - x0).max(0);
    let ya = (bbox.y1 - y0).max(0);
    let xb = (bbox.x2 - x0).min(w - 1);
    let yb = (bbox.y2 - y0).min(h - 1);
    for y in ya..=yb {
        for x in xa..=xb {
            crop.put_pixel(x as u32, y as u32, Luma([0]));
        }
    }
}
