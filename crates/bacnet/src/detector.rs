//! Object detector collaborator.
//!
//! The pipeline only needs "paths in, boxes out", expressed by the
//! [`Detector`] trait. [`DarknetDetector`] drives a YOLO model through the
//! darknet command line tool and parses its `-ext_output` report while it
//! streams in.

use std::{
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
};

use bacnet_core::{BoundingBox, BoxError, CancelToken, Cancelled, Progress};
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("detector {what} not found at {}", path.display())]
    MissingArtifact { what: &'static str, path: PathBuf },
    #[error("failed to start {}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("detector exited with {0}")]
    Failed(ExitStatus),
    #[error("unparseable detector output at line {line}: {content:?}")]
    UnparseableLine { line: usize, content: String },
    #[error("detector reported {found} images for {expected} inputs")]
    ImageCountMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// One detection in absolute pixels of its input image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub xmin: i32,
    pub ymin: i32,
    pub width: i32,
    pub height: i32,
}

impl RawDetection {
    /// Negative geometry is clamped to zero.
    pub fn new(
        label: impl Into<String>,
        confidence: f32,
        xmin: i32,
        ymin: i32,
        width: i32,
        height: i32,
    ) -> Self {
        Self {
            label: label.into(),
            confidence,
            xmin: xmin.max(0),
            ymin: ymin.max(0),
            width: width.max(0),
            height: height.max(0),
        }
    }

    pub fn bbox(&self) -> Result<BoundingBox, BoxError> {
        BoundingBox::from_xywh(self.xmin, self.ymin, self.width, self.height)
    }
}

/// Runs a batch of images through an object detector.
pub trait Detector {
    /// Detections per input image, in input order.
    ///
    /// Implementations report progress as images complete and stop early
    /// with [`DetectorError::Cancelled`] once `cancel` is set.
    fn detect(
        &self,
        images: &[PathBuf],
        progress: &mut Progress<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<RawDetection>>, DetectorError>;
}

/// Paths of the darknet executable and the model files it loads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DarknetConfig {
    pub binary: PathBuf,
    pub data: PathBuf,
    pub cfg: PathBuf,
    pub weights: PathBuf,
}

impl Default for DarknetConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("darknet/darknet"),
            data: PathBuf::from("models/obj.data"),
            cfg: PathBuf::from("models/test.cfg"),
            weights: PathBuf::from("models/model.weights"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DarknetDetector {
    config: DarknetConfig,
}

impl DarknetDetector {
    /// Fails fast if the executable or any model file is missing.
    pub fn new(config: DarknetConfig) -> Result<Self, DetectorError> {
        for (what, path) in [
            ("binary", &config.binary),
            ("data file", &config.data),
            ("network config", &config.cfg),
            ("weights", &config.weights),
        ] {
            if !path.exists() {
                return Err(DetectorError::MissingArtifact {
                    what,
                    path: path.clone(),
                });
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &DarknetConfig {
        &self.config
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("detector")
            .arg("test")
            .arg(&self.config.data)
            .arg(&self.config.cfg)
            .arg(&self.config.weights)
            .args(["-ext_output", "-dont_show"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }
}

fn abort(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl Detector for DarknetDetector {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(images = images.len()))
    )]
    fn detect(
        &self,
        images: &[PathBuf],
        progress: &mut Progress<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<RawDetection>>, DetectorError> {
        cancel.check()?;
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = self.command();
        debug!("running {:?}", cmd);
        let mut child = cmd.spawn().map_err(|source| DetectorError::Spawn {
            binary: self.config.binary.clone(),
            source,
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("detector stdin is not piped"))?;
        let input: String = images
            .iter()
            .map(|p| format!("{}\n", p.display()))
            .collect();
        // Fed from a thread so a full stdout pipe cannot deadlock us.
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));

        let Some(stdout) = child.stdout.take() else {
            abort(&mut child);
            return Err(io::Error::other("detector stdout is not piped").into());
        };

        let mut parser = DarknetOutputParser::new();
        for line in BufReader::new(stdout).lines() {
            if cancel.is_cancelled() {
                abort(&mut child);
                info!("detector run cancelled");
                return Err(Cancelled.into());
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    abort(&mut child);
                    return Err(e.into());
                }
            };
            if let Err(e) = parser.feed(&line) {
                abort(&mut child);
                return Err(e);
            }
            // An image is finished once the next one starts.
            progress.fraction(parser.images_started().saturating_sub(1), images.len());
        }

        let status = child.wait()?;
        match writer.join() {
            Ok(Ok(())) => {}
            // The detector may stop reading early; its exit status tells.
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(io::Error::other("detector stdin writer panicked").into()),
        }
        if !status.success() {
            return Err(DetectorError::Failed(status));
        }

        let blocks = parser.finish(images.len())?;
        progress.finish();
        debug!(
            "detector returned {} boxes for {} images",
            blocks.iter().map(Vec::len).sum::<usize>(),
            images.len()
        );
        Ok(blocks)
    }
}

/// Incremental parser for darknet `-ext_output` reports.
///
/// A line ending in `milli-seconds.` opens the block of the next image; a
/// line starting with `Enter Image Path:` (the prompt for more input) closes
/// it. Lines inside a block look like
/// `cell: 97%	(left_x:  120   top_y:   33   width:   41   height:   28)`.
#[derive(Debug, Default)]
pub struct DarknetOutputParser {
    blocks: Vec<Vec<RawDetection>>,
    in_block: bool,
    line_no: usize,
}

impl DarknetOutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Result<(), DetectorError> {
        self.line_no += 1;
        let trimmed = line.trim_end();
        if trimmed.ends_with("milli-seconds.") {
            self.blocks.push(Vec::new());
            self.in_block = true;
        } else if trimmed.starts_with("Enter Image Path:") {
            self.in_block = false;
        } else if self.in_block && !trimmed.trim().is_empty() {
            let det = parse_detection_line(trimmed).ok_or_else(|| DetectorError::UnparseableLine {
                line: self.line_no,
                content: line.to_string(),
            })?;
            if let Some(block) = self.blocks.last_mut() {
                block.push(det);
            }
        }
        Ok(())
    }

    /// Number of image blocks opened so far.
    pub fn images_started(&self) -> usize {
        self.blocks.len()
    }

    /// Per-image detections; the block count must match `expected`.
    pub fn finish(mut self, expected: usize) -> Result<Vec<Vec<RawDetection>>, DetectorError> {
        // A trailing empty block can come from the final prompt line.
        if self.blocks.len() > expected && self.blocks.last().is_some_and(Vec::is_empty) {
            self.blocks.pop();
        }
        if self.blocks.len() != expected {
            return Err(DetectorError::ImageCountMismatch {
                expected,
                found: self.blocks.len(),
            });
        }
        Ok(self.blocks)
    }
}

/// Parse a complete darknet report for `expected` input images.
pub fn parse_darknet_output(
    output: &str,
    expected: usize,
) -> Result<Vec<Vec<RawDetection>>, DetectorError> {
    let mut parser = DarknetOutputParser::new();
    for line in output.lines() {
        parser.feed(line)?;
    }
    parser.finish(expected)
}

fn parse_detection_line(line: &str) -> Option<RawDetection> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 10 {
        return None;
    }
    let label = tokens[0].strip_suffix(':')?;
    let confidence: f32 = tokens[1].strip_suffix('%')?.parse().ok()?;
    let xmin = tokens[3].parse().ok()?;
    let ymin = tokens[5].parse().ok()?;
    let width = tokens[7].parse().ok()?;
    let height = tokens[9].trim_end_matches(')').parse().ok()?;
    Some(RawDetection::new(
        label,
        confidence / 100.0,
        xmin,
        ymin,
        width,
        height,
    ))
}

/// Whether `path` has one of the image extensions the pipeline reads.
pub fn is_image_path(path: &Path) -> bool {
    const IMAGE_EXTENSIONS: [&str; 7] = ["tiff", "tif", "png", "jpg", "jpeg", "gif", "bmp"];
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}
