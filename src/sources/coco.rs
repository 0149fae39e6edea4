//! COCO JSON converter.
//!
//! COCO bounding boxes use `[x, y, width, height]` where `(x, y)` is the
//! top-left corner in absolute pixel coordinates. Image dimensions come from
//! the `images` array, so no pixel decoding is needed.
//!
//! Boxes are grouped per `image_id` in annotation-array order. An image whose
//! annotations all fail to map produces no output files at all.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use super::{AnnotationSource, CorpusSink, SourceSummary};
use crate::error::PrepError;
use crate::label::BoundingBox;
use crate::registry::ClassRegistry;

/// A COCO detection source.
#[derive(Clone, Debug)]
pub struct CocoJsonSource {
    pub annotations_json: PathBuf,
    pub images_root: PathBuf,
    pub prefix: String,
    /// COCO category name -> canonical registry class name. Categories not
    /// present fall back to their own name.
    pub name_map: BTreeMap<String, String>,
    /// Rescue `person` annotations whose name-map/registry lookup fails.
    /// Purely additive: a `person` category that already resolves through
    /// the registry converts whether or not this is set.
    pub include_person: bool,
}

// ============================================================================
// COCO Schema Types (internal to this module)
// ============================================================================

#[derive(Debug, Deserialize)]
struct CocoDataset {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Deserialize)]
struct CocoImage {
    id: u64,
    width: u32,
    height: u32,
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CocoAnnotation {
    image_id: u64,
    category_id: u64,

    /// COCO bbox format: [x, y, width, height] with (x,y) as top-left corner
    bbox: [f64; 4],
}

impl AnnotationSource for CocoJsonSource {
    fn format_name(&self) -> &'static str {
        "coco"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn required_paths(&self) -> Vec<PathBuf> {
        vec![self.annotations_json.clone(), self.images_root.clone()]
    }

    fn convert(
        &self,
        registry: &ClassRegistry,
        sink: &CorpusSink,
    ) -> Result<SourceSummary, PrepError> {
        let file = File::open(&self.annotations_json).map_err(PrepError::Io)?;
        let dataset: CocoDataset =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                PrepError::CocoJsonParse {
                    path: self.annotations_json.clone(),
                    source,
                }
            })?;

        let categories: BTreeMap<u64, &str> = dataset
            .categories
            .iter()
            .map(|cat| (cat.id, cat.name.as_str()))
            .collect();
        let images: BTreeMap<u64, &CocoImage> =
            dataset.images.iter().map(|img| (img.id, img)).collect();

        let mut summary = SourceSummary::default();
        // image_id -> boxes, filled in annotation-array order.
        let mut boxes_by_image: BTreeMap<u64, Vec<BoundingBox>> = BTreeMap::new();

        for ann in &dataset.annotations {
            let Some(&category_name) = categories.get(&ann.category_id) else {
                warn!(
                    category_id = ann.category_id,
                    "annotation references unknown category; object dropped"
                );
                summary.objects_unmapped += 1;
                continue;
            };

            let canonical = self
                .name_map
                .get(category_name)
                .map(String::as_str)
                .unwrap_or(category_name);
            // Mapped categories always convert. The person allowance is
            // purely additive: it only rescues a `person` category whose
            // regular lookup failed.
            let resolved = registry.id_of(canonical).or_else(|| {
                (self.include_person && category_name == "person")
                    .then(|| registry.id_of("person"))
                    .flatten()
            });
            let Some(class_id) = resolved else {
                warn!(
                    category = %category_name,
                    "category not mapped to the registry; object dropped"
                );
                summary.objects_unmapped += 1;
                continue;
            };

            let Some(image) = images.get(&ann.image_id) else {
                warn!(
                    image_id = ann.image_id,
                    "annotation references unknown image; object dropped"
                );
                summary.objects_unmapped += 1;
                continue;
            };

            let [x, y, w, h] = ann.bbox;
            boxes_by_image
                .entry(ann.image_id)
                .or_default()
                .push(BoundingBox::from_xywh(
                    class_id,
                    x,
                    y,
                    w,
                    h,
                    image.width as f64,
                    image.height as f64,
                ));
        }

        for (image_id, boxes) in boxes_by_image {
            // Only images that still have mapped boxes reach this point.
            let image = images[&image_id];
            let source_path = self.images_root.join(&image.file_name);
            if !source_path.is_file() {
                warn!(image = %image.file_name, "image file missing; skipping image");
                summary.units_skipped += 1;
                continue;
            }

            match self.write_image(&source_path, &boxes, sink) {
                Ok(()) => {
                    summary.images_converted += 1;
                    summary.boxes_written += boxes.len();
                }
                Err(err) => {
                    warn!(image = %image.file_name, error = %err, "skipping image");
                    summary.units_skipped += 1;
                }
            }
        }

        Ok(summary)
    }
}

impl CocoJsonSource {
    fn write_image(
        &self,
        source_path: &std::path::Path,
        boxes: &[BoundingBox],
        sink: &CorpusSink,
    ) -> Result<(), PrepError> {
        let new_name = sink.copy_image(source_path, &self.prefix)?;
        sink.write_labels(&new_name, boxes)
    }
}
