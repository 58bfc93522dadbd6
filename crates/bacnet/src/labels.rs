//! YOLO-format label files.
//!
//! One object per line: `class x_center y_center width height`, geometry as
//! fractions of the image size. `#` starts a comment. The class column
//! indexes an optional class-name file; without one every object is a cell.

use std::{fs, path::Path};

use bacnet_core::{BoundingBox, BoxError, ObjectClass, ObjectError, ObjectSet};
use log::debug;

#[derive(thiserror::Error, Debug)]
pub enum LabelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected `class x_center y_center width height`, got {content:?}")]
    Malformed { line: usize, content: String },
    #[error("line {line}: class index {index} is not in the class file")]
    UnknownClassIndex { line: usize, index: usize },
    #[error("line {line}: unsupported class {name:?}")]
    UnknownClass { line: usize, name: String },
    #[error("line {line}: {field} = {value} is outside [0, 1]")]
    OutOfRange {
        line: usize,
        field: &'static str,
        value: f64,
    },
    #[error("line {line}: {source}")]
    Degenerate { line: usize, source: BoxError },
}

/// One labelled object in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabeledObject {
    pub class: ObjectClass,
    pub bbox: BoundingBox,
}

/// Class names of a `classes.txt`, one per line, by index.
pub fn parse_class_names(text: &str) -> Vec<String> {
    text.lines().map(|l| l.trim().to_string()).collect()
}

fn parse_line(line: &str, line_no: usize) -> Result<(usize, [f64; 4]), LabelError> {
    let malformed = || LabelError::Malformed {
        line: line_no,
        content: line.to_string(),
    };
    let values = line
        .split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|_| malformed()))
        .collect::<Result<Vec<_>, _>>()?;
    let [cls, xc, yc, w, h] = values[..] else {
        return Err(malformed());
    };
    if !(cls >= 0.0 && cls.is_finite()) {
        return Err(malformed());
    }
    for (field, value) in [("x_center", xc), ("y_center", yc), ("width", w), ("height", h)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(LabelError::OutOfRange {
                line: line_no,
                field,
                value,
            });
        }
    }
    Ok((cls as usize, [xc, yc, w, h]))
}

/// Parse a label file for a `width x height` image.
///
/// Geometry outside `[0, 1]` is rejected. Box corners are truncated toward
/// zero.
pub fn parse_labels(
    text: &str,
    classes: Option<&[String]>,
    width: u32,
    height: u32,
) -> Result<Vec<LabeledObject>, LabelError> {
    let (w_img, h_img) = (f64::from(width), f64::from(height));
    let mut objects = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let (index, [xc, yc, w, h]) = parse_line(line, line_no)?;

        let class = match classes.filter(|c| !c.is_empty()) {
            None => ObjectClass::Cell,
            Some(names) => {
                let name = names.get(index).ok_or(LabelError::UnknownClassIndex {
                    line: line_no,
                    index,
                })?;
                match ObjectClass::from_label(name) {
                    Some(c @ (ObjectClass::Cell | ObjectClass::Nanowire)) => c,
                    _ => {
                        return Err(LabelError::UnknownClass {
                            line: line_no,
                            name: name.clone(),
                        })
                    }
                }
            }
        };

        let (xc, yc, w, h) = (xc * w_img, yc * h_img, w * w_img, h * h_img);
        let bbox = BoundingBox::new(
            (xc - w / 2.0) as i32,
            (yc - h / 2.0) as i32,
            (xc + w / 2.0) as i32,
            (yc + h / 2.0) as i32,
        )
        .map_err(|source| LabelError::Degenerate {
            line: line_no,
            source,
        })?;
        objects.push(LabeledObject { class, bbox });
    }
    debug!("parsed {} labelled objects", objects.len());
    Ok(objects)
}

/// Read a label file and an optional class-name file.
pub fn load_labels(
    path: impl AsRef<Path>,
    classes_path: Option<&Path>,
    width: u32,
    height: u32,
) -> Result<Vec<LabeledObject>, LabelError> {
    let text = fs::read_to_string(path)?;
    let classes = classes_path
        .map(fs::read_to_string)
        .transpose()?
        .map(|t| parse_class_names(&t));
    parse_labels(&text, classes.as_deref(), width, height)
}

/// Object set of a `width x height` image holding `labels` in order, with
/// ids starting at 1.
pub fn objects_from_labels(
    labels: &[LabeledObject],
    width: u32,
    height: u32,
) -> Result<ObjectSet, ObjectError> {
    let mut objects = ObjectSet::new(width, height);
    for l in labels {
        objects.push(l.class, l.bbox)?;
    }
    Ok(objects)
}
