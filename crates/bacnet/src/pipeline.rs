//! Image -> detections -> segmented objects -> network graph.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bacnet_core::{
    BoundingBox, BoxError, CancelToken, Cancelled, ObjectClass, ObjectError, ObjectSet, Progress,
    Stage,
};
use bacnet_network::{BuildError, BuildReport, GraphIoError, NetworkBuilder, NetworkGraph};
use bacnet_segment::{ContourExtractor, ExtractionStats, OverlapResolver, OverlapStats};
use bacnet_tiling::{Detection, Tile, TileGrid, TilingError};
use image::{imageops, GrayImage};
use log::{debug, info, warn};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::PipelineConfig,
    detector::{is_image_path, Detector, DetectorError, RawDetection},
    labels::{self, LabelError},
};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to read image {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {} is empty", path.display())]
    EmptyImage { path: PathBuf },
    #[error("failed to write detector crop {}", path.display())]
    Crop {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Geometry(#[from] BoxError),
    #[error(transparent)]
    Tiling(#[from] TilingError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Labels(#[from] LabelError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    GraphIo(#[from] GraphIoError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl PipelineError {
    /// Whether the run stopped because of a cancellation request, at any
    /// stage.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled(_)
                | Self::Build(BuildError::Cancelled(_))
                | Self::Detector(DetectorError::Cancelled(_))
        )
    }
}

/// Everything extracted from one image.
#[derive(Clone, Debug)]
pub struct NetworkResult {
    pub objects: ObjectSet,
    pub graph: NetworkGraph,
    pub overlaps: OverlapStats,
    pub extraction: ExtractionStats,
    pub report: BuildReport,
}

/// Drop the instrument info bar: the block of bottom rows whose sampled
/// pixels are all pure black or pure white.
///
/// Returns `None` when there is nothing to strip, or when every row would
/// go.
pub fn strip_info_bar(image: &GrayImage) -> Option<GrayImage> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let step = (w / 10).max(1) as usize;
    let is_bar_row = |y: u32| {
        (0..w)
            .step_by(step)
            .all(|x| matches!(image.get_pixel(x, y)[0], 0 | 255))
    };
    let bar = (0..h).rev().take_while(|&y| is_bar_row(y)).count() as u32;
    if bar == 0 || bar == h {
        return None;
    }
    debug!("stripping {} info bar rows from {}x{} image", bar, w, h);
    Some(imageops::crop_imm(image, 0, 0, w, h - bar).to_image())
}

/// Contour, contact and nanowire inference over detected objects.
///
/// Resolves overlaps, segments every cell, then builds the edges. Progress
/// covers the edge-building stage.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(objects = objects.len()))
)]
pub fn build_network(
    image: &GrayImage,
    mut objects: ObjectSet,
    config: &PipelineConfig,
    progress: &mut Progress<'_>,
    cancel: &CancelToken,
) -> Result<NetworkResult, PipelineError> {
    let overlaps = OverlapResolver::new(config.overlap).resolve(&mut objects, cancel)?;
    let extraction =
        ContourExtractor::new(image, config.contour).compute_centroids(&mut objects, cancel)?;
    let report = NetworkBuilder::new(image, config.contour).build(&mut objects, progress, cancel)?;
    let graph = NetworkGraph::from_objects(&objects);
    info!(
        "network: {} cells, {} edges ({} contact, {} cell-cell, {} cell-surface)",
        graph.cell_count(),
        graph.edge_count(),
        report.contact_edges,
        report.cell_to_cell_edges,
        report.cell_to_surface_edges
    );
    if extraction.failed > 0 {
        warn!("{} cells could not be segmented", extraction.failed);
    }
    Ok(NetworkResult {
        objects,
        graph,
        overlaps,
        extraction,
        report,
    })
}

fn load_gray(path: &Path) -> Result<GrayImage, PipelineError> {
    let image = image::open(path)
        .map_err(|source| PipelineError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EmptyImage {
            path: path.to_path_buf(),
        });
    }
    Ok(image)
}

/// Keeps the crop directory alive for the duration of one detector run.
enum CropDir {
    Configured(PathBuf),
    Temporary(tempfile::TempDir),
}

impl CropDir {
    fn path(&self) -> &Path {
        match self {
            Self::Configured(p) => p,
            Self::Temporary(t) => t.path(),
        }
    }
}

fn to_detection(raw: &RawDetection) -> Option<Detection> {
    let class = match ObjectClass::from_label(&raw.label) {
        Some(c @ (ObjectClass::Cell | ObjectClass::Nanowire)) => c,
        _ => {
            warn!("ignoring detection with unknown label {:?}", raw.label);
            return None;
        }
    };
    match raw.bbox() {
        Ok(bbox) => Some(Detection {
            class,
            bbox,
            confidence: raw.confidence,
        }),
        Err(e) => {
            warn!("ignoring {} detection: {}", raw.label, e);
            None
        }
    }
}

/// Detector-driven pipeline for whole images.
pub struct ImagePipeline<D> {
    detector: D,
    grid: TileGrid,
    config: PipelineConfig,
}

impl<D: Detector> ImagePipeline<D> {
    pub fn new(detector: D, config: PipelineConfig) -> Result<Self, PipelineError> {
        let grid = TileGrid::new(config.tiling)?;
        Ok(Self {
            detector,
            grid,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Grayscale image as the pipeline sees it, info bar removed if enabled.
    pub fn load_image(&self, path: impl AsRef<Path>) -> Result<GrayImage, PipelineError> {
        let image = load_gray(path.as_ref())?;
        if self.config.strip_info_bar {
            if let Some(stripped) = strip_info_bar(&image) {
                return Ok(stripped);
            }
        }
        Ok(image)
    }

    fn crop_dir(&self) -> Result<CropDir, PipelineError> {
        match &self.config.crop_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Ok(CropDir::Configured(dir.clone()))
            }
            None => Ok(CropDir::Temporary(
                tempfile::Builder::new().prefix("bacnet-crops").tempdir()?,
            )),
        }
    }

    /// Run the detector over `image` and return detections in image
    /// coordinates.
    ///
    /// Images larger than one detector input are tiled and the per-tile
    /// results stitched back together. Crops are written as
    /// `<stem>_<x>_<y>.png`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image, progress, cancel), fields(width = image.width(), height = image.height()))
    )]
    pub fn detect(
        &self,
        image: &GrayImage,
        stem: &str,
        progress: &mut Progress<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<Detection>, PipelineError> {
        let (w, h) = image.dimensions();
        let split = self.grid.needs_split(w, h);
        let mut tiles = if split {
            self.grid.split(image)
        } else {
            vec![Tile {
                rect: BoundingBox::new(0, 0, w as i32, h as i32)?,
                image: image.clone(),
                detections: Vec::new(),
            }]
        };

        let dir = self.crop_dir()?;
        let mut paths = Vec::with_capacity(tiles.len());
        for tile in &tiles {
            cancel.check()?;
            let path = dir.path().join(format!("{}.png", tile.file_stem(stem)));
            tile.image
                .save(&path)
                .map_err(|source| PipelineError::Crop {
                    path: path.clone(),
                    source,
                })?;
            paths.push(path);
        }
        debug!("wrote {} crops to {}", paths.len(), dir.path().display());

        let blocks = self.detector.detect(&paths, progress, cancel)?;
        if blocks.len() != tiles.len() {
            return Err(DetectorError::ImageCountMismatch {
                expected: tiles.len(),
                found: blocks.len(),
            }
            .into());
        }
        for (tile, block) in tiles.iter_mut().zip(&blocks) {
            tile.detections = block.iter().filter_map(to_detection).collect();
        }

        let detections = if split {
            self.grid.reunify(&tiles, w, h)
        } else {
            tiles
                .into_iter()
                .flat_map(|t| t.detections)
                .filter_map(|d| {
                    d.bbox
                        .clamp_to(w, h)
                        .map(|bbox| Detection { bbox, ..d })
                })
                .collect()
        };
        Ok(detections)
    }

    /// Full pipeline for one image file.
    ///
    /// `on_progress` receives `(stage, percent)`; each stage runs up to 100.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))
    )]
    pub fn process_image(
        &self,
        path: impl AsRef<Path>,
        on_progress: &mut dyn FnMut(Stage, u8),
        cancel: &CancelToken,
    ) -> Result<NetworkResult, PipelineError> {
        let path = path.as_ref();
        let image = self.load_image(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let detections = {
            let mut sink = |p: u8| on_progress(Stage::Detection, p);
            let mut progress = Progress::new(&mut sink);
            self.detect(&image, &stem, &mut progress, cancel)?
        };

        let mut objects = ObjectSet::new(image.width(), image.height());
        for d in &detections {
            objects.push_detection(d.class, d.bbox, d.confidence)?;
        }
        info!(
            "{}: {} cells, {} nanowires detected",
            path.display(),
            objects.cell_count(),
            objects.ids_of(ObjectClass::Nanowire).len()
        );

        let mut sink = |p: u8| on_progress(Stage::EdgeBuilding, p);
        let mut progress = Progress::new(&mut sink);
        build_network(&image, objects, &self.config, &mut progress, cancel)
    }

    /// Process every image file directly inside `dir`, in name order.
    ///
    /// A failing image does not stop the batch; cancellation does.
    pub fn process_directory(
        &self,
        dir: impl AsRef<Path>,
        on_progress: &mut dyn FnMut(&Path, Stage, u8),
        cancel: &CancelToken,
    ) -> Result<Vec<(PathBuf, Result<NetworkResult, PipelineError>)>, PipelineError> {
        let mut images = Vec::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_file() && is_image_path(&path) {
                images.push(path);
            }
        }
        images.sort();
        info!("{} images in {}", images.len(), dir.as_ref().display());

        let mut results = Vec::with_capacity(images.len());
        for path in images {
            cancel.check()?;
            let result = self.process_image(&path, &mut |s, p| on_progress(&path, s, p), cancel);
            match &result {
                Err(e) if e.is_cancelled() => return Err(Cancelled.into()),
                Err(e) => warn!("{}: {}", path.display(), e),
                Ok(_) => {}
            }
            results.push((path, result));
        }
        Ok(results)
    }
}

/// Pipeline for images that already have YOLO label files.
///
/// The image is used as-is: label coordinates refer to the full frame.
pub fn process_with_labels(
    image_path: impl AsRef<Path>,
    labels_path: impl AsRef<Path>,
    classes_path: Option<&Path>,
    config: &PipelineConfig,
    progress: &mut Progress<'_>,
    cancel: &CancelToken,
) -> Result<NetworkResult, PipelineError> {
    let image = load_gray(image_path.as_ref())?;
    let labelled = labels::load_labels(labels_path, classes_path, image.width(), image.height())?;
    let mut objects = ObjectSet::new(image.width(), image.height());
    for l in &labelled {
        match l.bbox.clamp_to(image.width(), image.height()) {
            Some(bbox) => {
                objects.push(l.class, bbox)?;
            }
            None => warn!("label box {} lies outside the image", l.bbox),
        }
    }
    build_network(&image, objects, config, progress, cancel)
}
