//! LISA-style CSV converter.
//!
//! Semicolon-delimited with header `Filename;Annotation tag;Upper left corner
//! X;Upper left corner Y;Lower right corner X;Lower right corner Y`. Multiple
//! rows may reference the same image (one row per object). Box geometry is
//! normalized against the image's actual decoded dimensions; the CSV carries
//! none.
//!
//! Boxes accumulate in memory per image and each label file is written once,
//! after the whole CSV has been read. Line order within a file is CSV row
//! order. Images are copied once regardless of how many rows reference them,
//! so rerunning the conversion is idempotent.

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

/// A LISA-style CSV source.
#[derive(Clone, Debug)]
pub struct LisaCsvSource {
    pub annotations_csv: PathBuf,
    /// Base directory the per-row `Filename` column is resolved against.
    /// Only the basename of the column is used.
    pub images_root: PathBuf,
    pub prefix: String,
    /// Annotation tag -> canonical registry class name.
    pub tag_map: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LisaRow {
    #[serde(rename = "Filename")]
    filename: String,
    #[serde(rename = "Annotation tag")]
    tag: String,
    #[serde(rename = "Upper left corner X")]
    x_min: f64,
    #[serde(rename = "Upper left corner Y")]
    y_min: f64,
    #[serde(rename = "Lower right corner X")]
    x_max: f64,
    #[serde(rename = "Lower right corner Y")]
    y_max: f64,
}

impl AnnotationSource for LisaCsvSource {
    fn format_name(&self) -> &'static str {
        "lisa"
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
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .from_reader(BufReader::new(file));

        let mut summary = SourceSummary::default();
        // Accumulates all boxes per image basename, in CSV row order, so
        // each label file gets exactly one terminal write.
        let mut pending: BTreeMap<String, PendingImage> = BTreeMap::new();

        for result in reader.deserialize() {
            let row: LisaRow = match result {
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

            if let Err(err) = self.accumulate_row(&row, registry, &mut pending, &mut summary) {
                warn!(image = %row.filename, error = %err, "skipping CSV row");
                summary.units_skipped += 1;
            }
        }

        for (basename, image) in pending {
            if image.boxes.is_empty() {
                continue;
            }
            match self.write_image(&image, sink) {
                Ok(box_count) => {
                    summary.images_converted += 1;
                    summary.boxes_written += box_count;
                }
                Err(err) => {
                    warn!(image = %basename, error = %err, "failed to write converted image");
                    summary.units_skipped += 1;
                }
            }
        }

        Ok(summary)
    }
}

struct PendingImage {
    source_path: PathBuf,
    boxes: Vec<BoundingBox>,
}

impl LisaCsvSource {
    fn accumulate_row(
        &self,
        row: &LisaRow,
        registry: &ClassRegistry,
        pending: &mut BTreeMap<String, PendingImage>,
        summary: &mut SourceSummary,
    ) -> Result<(), PrepError> {
        // The Filename column carries a path; only its basename matters.
        let basename = row
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(row.filename.as_str())
            .to_string();

        let class_id = match self
            .tag_map
            .get(&row.tag)
            .and_then(|name| registry.id_of(name))
        {
            Some(id) => id,
            None => {
                warn!(
                    tag = %row.tag,
                    image = %basename,
                    "annotation tag not mapped to the registry; object dropped"
                );
                summary.objects_unmapped += 1;
                return Ok(());
            }
        };

        let source_path = self.images_root.join(&basename);
        if !pending.contains_key(&basename) && !source_path.is_file() {
            return Err(PrepError::missing(source_path));
        }

        let entry = pending.entry(basename).or_insert_with(|| PendingImage {
            source_path: source_path.clone(),
            boxes: Vec::new(),
        });

        let (width, height) = read_dimensions(&entry.source_path)?;
        entry.boxes.push(BoundingBox::from_corners(
            class_id,
            row.x_min,
            row.y_min,
            row.x_max,
            row.y_max,
            width as f64,
            height as f64,
        ));
        Ok(())
    }

    fn write_image(&self, image: &PendingImage, sink: &CorpusSink) -> Result<usize, PrepError> {
        let new_name = sink.copy_image_once(&image.source_path, &self.prefix)?;
        sink.write_labels(&new_name, &image.boxes)?;
        Ok(image.boxes.len())
    }
}

fn read_dimensions(path: &Path) -> Result<(u32, u32), PrepError> {
    let size = imagesize::size(path).map_err(|source| PrepError::ImageDimensions {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((size.width as u32, size.height as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HEADER: &str = "Filename;Annotation tag;Upper left corner X;Upper left corner Y;Lower right corner X;Lower right corner Y\n";

    fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
        let row_stride = (width * 3).div_ceil(4) * 4;
        let pixel_array_size = row_stride * height;
        let file_size = 54 + pixel_array_size;

        let mut bytes = Vec::with_capacity(file_size as usize);
        bytes.extend_from_slice(b"BM");
        bytes.extend_from_slice(&file_size.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&54u32.to_le_bytes());

        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(&(width as i32).to_le_bytes());
        bytes.extend_from_slice(&(height as i32).to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&24u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
        bytes.extend_from_slice(&2835u32.to_le_bytes());
        bytes.extend_from_slice(&2835u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        bytes.resize(file_size as usize, 0);
        bytes
    }

    fn setup(csv_body: &str) -> (tempfile::TempDir, LisaCsvSource, CorpusSink, ClassRegistry) {
        let temp = tempfile::tempdir().expect("create temp dir");
        let csv_path = temp.path().join("frameAnnotationsBOX.csv");
        fs::write(&csv_path, format!("{HEADER}{csv_body}")).expect("write csv");

        let frames = temp.path().join("frames");
        fs::create_dir_all(&frames).expect("create frames dir");

        let sink = CorpusSink::create(&temp.path().join("out")).expect("create sink");
        let registry = ClassRegistry::new(vec![
            "traffic_light_red".to_string(),
            "traffic_light_green".to_string(),
        ]);
        let source = LisaCsvSource {
            annotations_csv: csv_path,
            images_root: frames,
            prefix: "lisa".to_string(),
            tag_map: BTreeMap::from([
                ("stop".to_string(), "traffic_light_red".to_string()),
                ("go".to_string(), "traffic_light_green".to_string()),
            ]),
        };
        (temp, source, sink, registry)
    }

    #[test]
    fn multiple_rows_accumulate_into_one_label_file() {
        let (temp, source, sink, registry) = setup(
            "dayTraining/frame0.bmp;stop;10;10;30;30\n\
             dayTraining/frame0.bmp;go;50;20;70;40\n",
        );
        fs::write(
            temp.path().join("frames/frame0.bmp"),
            bmp_bytes(100, 100),
        )
        .expect("write image");

        let summary = source.convert(&registry, &sink).expect("convert");
        assert_eq!(summary.images_converted, 1);
        assert_eq!(summary.boxes_written, 2);

        let labels =
            fs::read_to_string(sink.labels_dir().join("lisa_frame0.txt")).expect("read labels");
        let lines: Vec<&str> = labels.lines().collect();
        assert_eq!(lines.len(), 2);
        // CSV row order is preserved.
        assert_eq!(lines[0], "0 0.200000 0.200000 0.200000 0.200000");
        assert_eq!(lines[1], "1 0.600000 0.300000 0.200000 0.200000");

        assert!(sink.images_dir().join("lisa_frame0.bmp").is_file());
    }

    #[test]
    fn rerun_is_idempotent() {
        let (temp, source, sink, registry) = setup("dayTraining/frame0.bmp;stop;10;10;30;30\n");
        fs::write(
            temp.path().join("frames/frame0.bmp"),
            bmp_bytes(100, 100),
        )
        .expect("write image");

        source.convert(&registry, &sink).expect("first run");
        source.convert(&registry, &sink).expect("second run");

        let labels =
            fs::read_to_string(sink.labels_dir().join("lisa_frame0.txt")).expect("read labels");
        assert_eq!(labels.lines().count(), 1);
    }

    #[test]
    fn unmapped_tag_drops_object_only() {
        let (temp, source, sink, registry) = setup(
            "dayTraining/frame0.bmp;warning;10;10;30;30\n\
             dayTraining/frame0.bmp;stop;10;10;30;30\n",
        );
        fs::write(
            temp.path().join("frames/frame0.bmp"),
            bmp_bytes(100, 100),
        )
        .expect("write image");

        let summary = source.convert(&registry, &sink).expect("convert");
        assert_eq!(summary.objects_unmapped, 1);
        assert_eq!(summary.boxes_written, 1);

        let labels =
            fs::read_to_string(sink.labels_dir().join("lisa_frame0.txt")).expect("read labels");
        assert_eq!(labels.lines().count(), 1);
    }

    #[test]
    fn missing_image_skips_rows_for_that_image() {
        let (temp, source, sink, registry) = setup(
            "dayTraining/gone.bmp;stop;10;10;30;30\n\
             dayTraining/frame0.bmp;stop;10;10;30;30\n",
        );
        fs::write(
            temp.path().join("frames/frame0.bmp"),
            bmp_bytes(100, 100),
        )
        .expect("write image");

        let summary = source.convert(&registry, &sink).expect("convert");
        assert_eq!(summary.units_skipped, 1);
        assert_eq!(summary.images_converted, 1);
    }
}
