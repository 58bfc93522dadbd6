//! Core types for bacterial nanowire network extraction.
//!
//! This crate is intentionally small. It holds the per-image data model
//! shared by the tiling, segmentation and network crates and does *not*
//! depend on any concrete image type or detector.
//!
//! Objects live in an id-indexed arena ([`ObjectSet`]); every cross-object
//! reference (overlap lists, edge endpoints, bridging nanowires) is an
//! [`ObjectId`], never a handle.

mod bbox;
mod logger;
mod mask;
mod object;
mod progress;

pub use bbox::{BoundingBox, BoxError};
pub use mask::ContourMask;
pub use object::{
    DetectedObject, EdgeKind, NetworkEdge, ObjectClass, ObjectError, ObjectId, ObjectSet,
    SURFACE_ID,
};
pub use progress::{CancelToken, Cancelled, Progress, Stage};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
