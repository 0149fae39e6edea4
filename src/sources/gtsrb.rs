//! GTSRB-style CSV converter.
//!
//! Comma-delimited with header
//! `Width,Height,Roi.X1,Roi.Y1,Roi.X2,Roi.Y2,ClassId,Path`; one row is one
//! image with exactly one box. The numeric `ClassId` is remapped onto the
//! registry through an explicit per-source table; rows with an unmapped id
//! are dropped (no label, no image copy).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use super::{AnnotationSource, CorpusSink, SourceSummary};
use crate::error::PrepError;
use crate::label::BoundingBox;
use crate::registry::ClassRegistry;

/// A GTSRB-style CSV source.
#[derive(Clone, Debug)]
pub struct GtsrbCsvSource {
    pub annotations_csv: PathBuf,
    /// Base directory the per-row `Path` column is resolved against.
    pub images_root: PathBuf,
    pub prefix: String,
    /// Local numeric class id -> canonical registry class name.
    pub class_map: BTreeMap<u32, String>,
}

/// One row of the annotation CSV.
#[derive(Debug, Deserialize)]
struct GtsrbRow {
    #[serde(rename = "Width")]
    width: u32,
    #[serde(rename = "Height")]
    height: u32,
    #[serde(rename = "Roi.X1")]
    roi_x1: f64,
    #[serde(rename = "Roi.Y1")]
    roi_y1: f64,
    #[serde(rename = "Roi.X2")]
    roi_x2: f64,
    #[serde(rename = "Roi.Y2")]
    roi_y2: f64,
    #[serde(rename = "ClassId")]
    class_id: u32,
    #[serde(rename = "Path")]
    path: String,
}

impl AnnotationSource for GtsrbCsvSource {
    fn format_name(&self) -> &'static str {
        "gtsrb"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn required_paths(&self) -> Vec<PathBuf> {
        vec![self.annotations_csv.clone(), self.images_root.clone()]
    }

    fn convert(
        &self,
        registry: &ClassRegistry,
        sink: &CorpusSink,
    ) -> Result<SourceSummary, PrepError> {
        let file = File::open(&self.annotations_csv).map_err(PrepError::Io)?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));

        let mut summary = SourceSummary::default();
        for result in reader.deserialize() {
            let row: GtsrbRow = match result {
                Ok(row) => row,
                Err(source) => {
                    let err = PrepError::CsvParse {
                        path: self.annotations_csv.clone(),
                        source,
                    };
                    warn!(error = %err, "skipping malformed CSV row");
                    summary.units_skipped += 1;
                    continue;
                }
            };

            match self.convert_row(&row, registry, sink) {
                Ok(RowOutcome::Converted) => {
                    summary.images_converted += 1;
                    summary.boxes_written += 1;
                }
                Ok(RowOutcome::Unmapped) => summary.objects_unmapped += 1,
                Err(err) => {
                    warn!(
                        image = %row.path,
                        error = %err,
                        "skipping CSV row"
                    );
                    summary.units_skipped += 1;
                }
            }
        }
        Ok(summary)
    }
}

enum RowOutcome {
    Converted,
    Unmapped,
}

impl GtsrbCsvSource {
    fn convert_row(
        &self,
        row: &GtsrbRow,
        registry: &ClassRegistry,
        sink: &CorpusSink,
    ) -> Result<RowOutcome, PrepError> {
        let class_id = match self
            .class_map
            .get(&row.class_id)
            .and_then(|name| registry.id_of(name))
        {
            Some(id) => id,
            None => {
                warn!(
                    class_id = row.class_id,
                    image = %row.path,
                    "ClassId not mapped to the registry; row dropped"
                );
                return Ok(RowOutcome::Unmapped);
            }
        };

        let image_path = self.images_root.join(&row.path);
        if !image_path.is_file() {
            return Err(PrepError::missing(image_path));
        }

        let bbox = BoundingBox::from_corners(
            class_id,
            row.roi_x1,
            row.roi_y1,
            row.roi_x2,
            row.roi_y2,
            row.width as f64,
            row.height as f64,
        );

        let new_name = sink.copy_image(&image_path, &self.prefix)?;
        sink.write_labels(&new_name, &[bbox])?;
        Ok(RowOutcome::Converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HEADER: &str = "Width,Height,Roi.X1,Roi.Y1,Roi.X2,Roi.Y2,ClassId,Path\n";

    fn setup(csv_body: &str) -> (tempfile::TempDir, GtsrbCsvSource, CorpusSink, ClassRegistry) {
        let temp = tempfile::tempdir().expect("create temp dir");
        let csv_path = temp.path().join("Train.csv");
        fs::write(&csv_path, format!("{HEADER}{csv_body}")).expect("write csv");

        let sink = CorpusSink::create(&temp.path().join("out")).expect("create sink");
        let registry = ClassRegistry::new(vec![
            "speed_limit_20".to_string(),
            "speed_limit_30".to_string(),
        ]);
        let source = GtsrbCsvSource {
            annotations_csv: csv_path,
            images_root: temp.path().to_path_buf(),
            prefix: "gtsrb".to_string(),
            class_map: BTreeMap::from([
                (0, "speed_limit_20".to_string()),
                (1, "speed_limit_30".to_string()),
            ]),
        };
        (temp, source, sink, registry)
    }

    #[test]
    fn row_converts_to_one_label_line_and_copy() {
        let (temp, source, sink, registry) = setup("60,60,5,5,55,55,1,Train/1/a.png\n");
        fs::create_dir_all(temp.path().join("Train/1")).expect("create image dir");
        fs::write(temp.path().join("Train/1/a.png"), b"dummy").expect("write image");

        let summary = source.convert(&registry, &sink).expect("convert");
        assert_eq!(summary.images_converted, 1);
        assert_eq!(summary.boxes_written, 1);

        let labels =
            fs::read_to_string(sink.labels_dir().join("gtsrb_a.txt")).expect("read labels");
        assert_eq!(labels, "1 0.500000 0.500000 0.833333 0.833333\n");
        assert!(sink.images_dir().join("gtsrb_a.png").is_file());
    }

    #[test]
    fn unmapped_class_id_drops_row_entirely() {
        let (temp, source, sink, registry) = setup("60,60,5,5,55,55,42,Train/1/a.png\n");
        fs::create_dir_all(temp.path().join("Train/1")).expect("create image dir");
        fs::write(temp.path().join("Train/1/a.png"), b"dummy").expect("write image");

        let summary = source.convert(&registry, &sink).expect("convert");
        assert_eq!(summary.images_converted, 0);
        assert_eq!(summary.objects_unmapped, 1);
        assert!(!sink.images_dir().join("gtsrb_a.png").exists());
        assert!(!sink.labels_dir().join("gtsrb_a.txt").exists());
    }

    #[test]
    fn missing_image_skips_row_and_continues() {
        let (temp, source, sink, registry) = setup(
            "60,60,5,5,55,55,0,Train/1/gone.png\n60,60,5,5,55,55,0,Train/1/here.png\n",
        );
        fs::create_dir_all(temp.path().join("Train/1")).expect("create image dir");
        fs::write(temp.path().join("Train/1/here.png"), b"dummy").expect("write image");

        let summary = source.convert(&registry, &sink).expect("convert");
        assert_eq!(summary.units_skipped, 1);
        assert_eq!(summary.images_converted, 1);
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let (temp, source, sink, registry) =
            setup("not-a-number,60,5,5,55,55,0,Train/1/a.png\n60,60,5,5,55,55,0,Train/1/b.png\n");
        fs::create_dir_all(temp.path().join("Train/1")).expect("create image dir");
        fs::write(temp.path().join("Train/1/b.png"), b"dummy").expect("write image");

        let summary = source.convert(&registry, &sink).expect("convert");
        assert_eq!(summary.units_skipped, 1);
        assert_eq!(summary.images_converted, 1);
    }
}
