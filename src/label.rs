//! Normalized bounding boxes and the YOLO label-line format.
//!
//! A label file carries one line per box:
//! `"<class_id> <x_center> <y_center> <width> <height>"`, all geometry in
//! image-fraction coordinates, six decimal places, newline-terminated.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::PrepError;

/// Label files use the image basename with this extension.
pub const LABEL_EXTENSION: &str = "txt";

/// A single normalized bounding box.
///
/// Geometry fields are fractions of the image dimensions. The type does NOT
/// enforce that `x_center ± width/2` stays within `[0, 1]`; malformed boxes
/// are representable so that bad input can be reported rather than panicked
/// on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub class_id: u32,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Builds a box from a pixel-space corner pair (`xmin, ymin, xmax, ymax`)
    /// and image dimensions.
    pub fn from_corners(
        class_id: u32,
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
        image_width: f64,
        image_height: f64,
    ) -> Self {
        Self {
            class_id,
            x_center: (xmin + xmax) / 2.0 / image_width,
            y_center: (ymin + ymax) / 2.0 / image_height,
            width: (xmax - xmin) / image_width,
            height: (ymax - ymin) / image_height,
        }
    }

    /// Builds a box from COCO's top-left `[x, y, width, height]` form.
    pub fn from_xywh(
        class_id: u32,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        image_width: f64,
        image_height: f64,
    ) -> Self {
        Self {
            class_id,
            x_center: (x + w / 2.0) / image_width,
            y_center: (y + h / 2.0) / image_height,
            width: w / image_width,
            height: h / image_height,
        }
    }

    /// Mirrors the box across the vertical image axis.
    ///
    /// Only `x_center` changes. The mirror is taken in the six-decimal grid
    /// the label format emits: `x_center` is rounded to micro-units and
    /// subtracted from 1_000_000, so applying the flip twice returns any
    /// six-decimal coordinate exactly.
    pub fn flipped_horizontal(&self) -> Self {
        let micro = (self.x_center * 1_000_000.0).round();
        Self {
            x_center: (1_000_000.0 - micro) / 1_000_000.0,
            ..*self
        }
    }

    /// Reconstructs the pixel-space corner pair for a given image size.
    pub fn to_corners(&self, image_width: f64, image_height: f64) -> (f64, f64, f64, f64) {
        let half_w = self.width * image_width / 2.0;
        let half_h = self.height * image_height / 2.0;
        let cx = self.x_center * image_width;
        let cy = self.y_center * image_height;
        (cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.x_center, self.y_center, self.width, self.height
        )
    }
}

/// Parses one label line into a box.
///
/// Returns `Ok(None)` for blank lines. Lines with more than five tokens are
/// rejected (segmentation/pose rows are not supported).
pub fn parse_label_line(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<BoundingBox>, PrepError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // Take at most 6 tokens so pathological inputs do not allocate unbounded memory.
    let tokens: Vec<&str> = trimmed.split_whitespace().take(6).collect();

    if tokens.len() != 5 {
        return Err(PrepError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("expected 5 tokens, found {}", tokens.len()),
        });
    }

    let class_id = tokens[0]
        .parse::<u32>()
        .map_err(|_| PrepError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "invalid class_id '{}'; expected non-negative integer",
                tokens[0]
            ),
        })?;

    let x_center = parse_f64_token(tokens[1], "x_center", file_path, line_num)?;
    let y_center = parse_f64_token(tokens[2], "y_center", file_path, line_num)?;
    let width = parse_f64_token(tokens[3], "width", file_path, line_num)?;
    let height = parse_f64_token(tokens[4], "height", file_path, line_num)?;

    Ok(Some(BoundingBox {
        class_id,
        x_center,
        y_center,
        width,
        height,
    }))
}

/// Reads every box in a label file, in line order.
pub fn read_label_file(path: &Path) -> Result<Vec<BoundingBox>, PrepError> {
    let content = fs::read_to_string(path).map_err(PrepError::Io)?;
    let mut boxes = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if let Some(parsed) = parse_label_line(line, path, line_idx + 1)? {
            boxes.push(parsed);
        }
    }
    Ok(boxes)
}

/// Writes a complete label file, one line per box, in slice order.
///
/// The file content is built in memory first: either the whole file is
/// written or nothing is.
pub fn write_label_file(path: &Path, boxes: &[BoundingBox]) -> Result<(), PrepError> {
    let mut content = String::new();
    for bbox in boxes {
        content.push_str(&bbox.to_string());
        content.push('\n');
    }
    fs::write(path, content).map_err(PrepError::Io)
}

/// Returns the class id of the first token of a label line, if the line has
/// one. Used by the balancing passes, which only care about class membership.
pub fn line_class_id(line: &str) -> Option<u32> {
    line.split_whitespace().next()?.parse::<u32>().ok()
}

fn parse_f64_token(
    raw: &str,
    field_name: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<f64, PrepError> {
    raw.parse::<f64>().map_err(|_| PrepError::LabelParse {
        path: file_path.to_path_buf(),
        line: line_num,
        message: format!("invalid {field_name} '{raw}'; expected floating-point number"),
    })
}
