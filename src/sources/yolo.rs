//! Pass-through for datasets that are already in YOLO layout.
//!
//! Nothing is converted. Images and their sibling label files are copied into
//! the merged tree under the source prefix. Label class ids are assumed to
//! already match the global registry, which is the caller's responsibility
//! when writing the merge plan.

use std::path::PathBuf;

use tracing::warn;
use walkdir::WalkDir;

use super::{AnnotationSource, CorpusSink, SourceSummary, IMAGE_EXTENSIONS};
use crate::error::PrepError;
use crate::label::LABEL_EXTENSION;
use crate::registry::ClassRegistry;

/// An already-converted YOLO `images/` + `labels/` pair.
#[derive(Clone, Debug)]
pub struct YoloSource {
    pub images_dir: PathBuf,
    pub labels_dir: PathBuf,
    pub prefix: String,
}

impl AnnotationSource for YoloSource {
    fn format_name(&self) -> &'static str {
        "yolo"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn required_paths(&self) -> Vec<PathBuf> {
        vec![self.images_dir.clone(), self.labels_dir.clone()]
    }

    fn convert(
        &self,
        _registry: &ClassRegistry,
        sink: &CorpusSink,
    ) -> Result<SourceSummary, PrepError> {
        let mut image_paths: Vec<PathBuf> = WalkDir::new(&self.images_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| super::has_extension(path, &IMAGE_EXTENSIONS))
            .collect();
        image_paths.sort();

        let mut summary = SourceSummary::default();
        for image_path in image_paths {
            let label_path = self
                .labels_dir
                .join(image_path.file_stem().unwrap_or_default())
                .with_extension(LABEL_EXTENSION);
            if !label_path.is_file() {
                warn!(image = %image_path.display(), "image has no label file; skipping");
                summary.units_skipped += 1;
                continue;
            }

            match self.copy_pair(&image_path, &label_path, sink) {
                Ok(box_count) => {
                    summary.images_converted += 1;
                    summary.boxes_written += box_count;
                }
                Err(err) => {
                    warn!(image = %image_path.display(), error = %err, "skipping image");
                    summary.units_skipped += 1;
                }
            }
        }

        Ok(summary)
    }
}

impl YoloSource {
    fn copy_pair(
        &self,
        image_path: &std::path::Path,
        label_path: &std::path::Path,
        sink: &CorpusSink,
    ) -> Result<usize, PrepError> {
        let boxes = crate::label::read_label_file(label_path)?;
        let new_name = sink.copy_image(image_path, &self.prefix)?;
        sink.copy_labels(label_path, &new_name)?;
        Ok(boxes.len())
    }
}
