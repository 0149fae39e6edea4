//! Input-format converters.
//!
//! Every supported annotation format implements [`AnnotationSource`]: given
//! the global [`ClassRegistry`](crate::registry::ClassRegistry) and a
//! [`CorpusSink`], a source walks its own input files, normalizes each
//! annotation into [`BoundingBox`](crate::label::BoundingBox) lines, and
//! writes prefixed (image, label) pairs into the shared output tree. A
//! single merger drives any set of implementations uniformly.
//!
//! Failure policy, shared by all implementations: a malformed or missing
//! input unit is logged and skipped; the batch always continues.

pub mod coco;
pub mod gtsrb;
pub mod lisa;
pub mod voc;
pub mod yolo;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PrepError;
use crate::label::{self, BoundingBox, LABEL_EXTENSION};
use crate::registry::ClassRegistry;

/// Image file extensions recognized across all sources.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "png", "jpeg", "bmp", "webp"];

/// One converter per input format, all producing the same normalized output.
pub trait AnnotationSource {
    /// Short format name for logs and summaries (e.g. `"voc"`).
    fn format_name(&self) -> &'static str;

    /// Filename prefix applied to every output of this source.
    fn prefix(&self) -> &str;

    /// Returns the input paths that must exist for this source to run. The
    /// merger skips the whole source (with a warning) if any is missing.
    fn required_paths(&self) -> Vec<PathBuf>;

    /// Converts the whole source into the sink. Per-unit failures are logged
    /// and skipped inside; an `Err` here means the source could not run at
    /// all.
    fn convert(
        &self,
        registry: &ClassRegistry,
        sink: &CorpusSink,
    ) -> Result<SourceSummary, PrepError>;
}

/// Shared output tree: one `images/` + `labels/` pair all sources write into.
#[derive(Clone, Debug)]
pub struct CorpusSink {
    images_dir: PathBuf,
    labels_dir: PathBuf,
}

impl CorpusSink {
    /// Creates the `images/` and `labels/` directories under `output_root`
    /// (idempotent) and returns the sink.
    pub fn create(output_root: &Path) -> Result<Self, PrepError> {
        let images_dir = output_root.join("images");
        let labels_dir = output_root.join("labels");
        fs::create_dir_all(&images_dir).map_err(PrepError::Io)?;
        fs::create_dir_all(&labels_dir).map_err(PrepError::Io)?;
        Ok(Self {
            images_dir,
            labels_dir,
        })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn labels_dir(&self) -> &Path {
        &self.labels_dir
    }

    /// Copies `src_image` into the image tree as `{prefix}_{basename}` and
    /// returns the new basename.
    pub fn copy_image(&self, src_image: &Path, prefix: &str) -> Result<String, PrepError> {
        let new_name = prefixed_name(src_image, prefix)?;
        fs::copy(src_image, self.images_dir.join(&new_name)).map_err(PrepError::Io)?;
        Ok(new_name)
    }

    /// Like [`copy_image`](Self::copy_image), but skips the copy when the
    /// destination already exists. Returns the new basename either way.
    pub fn copy_image_once(&self, src_image: &Path, prefix: &str) -> Result<String, PrepError> {
        let new_name = prefixed_name(src_image, prefix)?;
        let dst = self.images_dir.join(&new_name);
        if !dst.exists() {
            fs::copy(src_image, dst).map_err(PrepError::Io)?;
        }
        Ok(new_name)
    }

    /// Writes the label file paired with `image_name` (basename inside the
    /// image tree), replacing the extension with `.txt`.
    pub fn write_labels(&self, image_name: &str, boxes: &[BoundingBox]) -> Result<(), PrepError> {
        let label_name = Path::new(image_name).with_extension(LABEL_EXTENSION);
        label::write_label_file(&self.labels_dir.join(label_name), boxes)
    }

    /// Copies an existing label file verbatim under `{prefix}_{basename}`.
    pub fn copy_labels(&self, src_label: &Path, image_name: &str) -> Result<(), PrepError> {
        let label_name = Path::new(image_name).with_extension(LABEL_EXTENSION);
        fs::copy(src_label, self.labels_dir.join(label_name)).map_err(PrepError::Io)?;
        Ok(())
    }
}

/// Per-source conversion counters, aggregated by the merger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceSummary {
    /// (image, label) pairs written.
    pub images_converted: usize,
    /// Label lines written.
    pub boxes_written: usize,
    /// Single objects dropped because their label was not in the registry.
    pub objects_unmapped: usize,
    /// Whole input units skipped (parse failure, missing image, ...).
    pub units_skipped: usize,
}

impl SourceSummary {
    pub fn merge(&mut self, other: &SourceSummary) {
        self.images_converted += other.images_converted;
        self.boxes_written += other.boxes_written;
        self.objects_unmapped += other.objects_unmapped;
        self.units_skipped += other.units_skipped;
    }
}

/// `{prefix}_{basename}` — the sole collision-avoidance mechanism when
/// merging sources. Assumes basenames are unique within one source.
pub fn prefixed_name(path: &Path, prefix: &str) -> Result<String, PrepError> {
    let base = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PrepError::LayoutInvalid {
            path: path.to_path_buf(),
            message: "file has no usable basename".to_string(),
        })?;
    Ok(format!("{prefix}_{base}"))
}

/// True when `path` has one of the given extensions (case-insensitive).
pub fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}
