//! Overlap resolution and per-object segmentation.
//!
//! - [`OverlapResolver`] relates bounding boxes with a pixel tolerance. The
//!   relation is asymmetric for containment: an inner box is listed on the
//!   outer object so it can be masked out, never the reverse.
//! - [`ContourExtractor`] segments one object's own region from its crop
//!   (Li threshold, light morphology for cells, neighbor masking, 8-connected
//!   labelling) and yields a centroid and a [`bacnet_core::ContourMask`].

mod contour;
mod overlap;
mod threshold;

pub use contour::{
    select_component, ComponentStats, ContourError, ContourExtractor, ContourParams,
    ExtractionStats, Extraction, SelectionMode,
};
pub use overlap::{classify_pair, OverlapParams, OverlapRelation, OverlapResolver, OverlapStats};
pub use threshold::{binarize, li_threshold};
