//! High-level facade crate for the `bacnet-*` workspace.
//!
//! This crate provides:
//! - re-exports of the tiling, segmentation and network crates
//! - the detector seam ([`Detector`]) with a darknet/YOLO implementation
//! - end-to-end helpers from an image file (or an image plus YOLO labels) to
//!   a cell network graph
//!
//! ## Quickstart
//!
//! ```no_run
//! use bacnet::{process_with_labels, CancelToken, PipelineConfig, Progress};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let result = process_with_labels(
//!     "biofilm.tif",
//!     "biofilm.txt",
//!     None,
//!     &config,
//!     &mut Progress::none(),
//!     &CancelToken::new(),
//! )?;
//! println!("{} cells", result.graph.cell_count());
//! result.graph.write_json("biofilm.json")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `bacnet::core`: boxes, objects, contour masks, progress and cancellation.
//! - `bacnet::tiling`: overlapping tile grid for oversized images.
//! - `bacnet::segment`: overlap resolution and contour extraction.
//! - `bacnet::network`: edge inference, the exported graph, hand editing.
//! - [`ImagePipeline`]: detector-driven processing of files and directories.

pub use bacnet_core as core;
pub use bacnet_network as network;
pub use bacnet_segment as segment;
pub use bacnet_tiling as tiling;

pub use bacnet_core::{
    BoundingBox, CancelToken, Cancelled, EdgeKind, ObjectClass, ObjectId, ObjectSet, Progress,
    Stage,
};
pub use bacnet_network::{CellSubtype, InteractiveGraphStore, NetworkGraph};

mod config;
mod detector;
mod labels;
mod pipeline;

pub use config::{ConfigError, PipelineConfig};
pub use detector::{
    is_image_path, parse_darknet_output, DarknetConfig, DarknetDetector, DarknetOutputParser,
    Detector, DetectorError, RawDetection,
};
pub use labels::{
    load_labels, objects_from_labels, parse_class_names, parse_labels, LabelError, LabeledObject,
};
pub use pipeline::{
    build_network, process_with_labels, strip_info_bar, ImagePipeline, NetworkResult,
    PipelineError,
};
