//! Merge plan deserialization.
//!
//! A plan is a YAML document naming the output directory, the global class
//! registry, and the ordered list of sources to convert:
//!
//! ```yaml
//! output: merged
//! classes:
//!   - stop
//!   - yield
//! sources:
//!   - format: voc
//!     prefix: gtsdb
//!     annotations: gtsdb/Annotations
//!     images: gtsdb/JPEGImages
//!   - format: gtsrb
//!     prefix: gtsrb
//!     csv: gtsrb/Train.csv
//!     images: gtsrb
//!     class_map:
//!       14: stop
//! ```
//!
//! `classes` and `class_file` are mutually exclusive; exactly one must be
//! present.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PrepError;
use crate::registry::ClassRegistry;
use crate::sources::coco::CocoJsonSource;
use crate::sources::gtsrb::GtsrbCsvSource;
use crate::sources::lisa::LisaCsvSource;
use crate::sources::voc::VocSource;
use crate::sources::yolo::YoloSource;
use crate::sources::AnnotationSource;

/// A fully parsed merge plan.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergePlan {
    /// Output root; an `images/` and `labels/` pair is created under it.
    pub output: PathBuf,

    /// Inline class registry, in id order.
    #[serde(default)]
    pub classes: Option<Vec<String>>,

    /// Path to an external registry file (plain text or `data.yaml` style).
    #[serde(default)]
    pub class_file: Option<PathBuf>,

    pub sources: Vec<SourceSpec>,
}

/// One source entry in a merge plan.
#[derive(Debug, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum SourceSpec {
    Voc {
        prefix: String,
        annotations: PathBuf,
        images: PathBuf,
    },
    Gtsrb {
        prefix: String,
        csv: PathBuf,
        images: PathBuf,
        class_map: BTreeMap<u32, String>,
    },
    Lisa {
        prefix: String,
        csv: PathBuf,
        images: PathBuf,
        tag_map: BTreeMap<String, String>,
    },
    Coco {
        prefix: String,
        json: PathBuf,
        images: PathBuf,
        #[serde(default)]
        name_map: BTreeMap<String, String>,
        #[serde(default)]
        include_person: bool,
    },
    Yolo {
        prefix: String,
        images: PathBuf,
        labels: PathBuf,
    },
}

impl MergePlan {
    /// Loads and validates a plan file. Relative paths inside the plan are
    /// resolved against the plan file's parent directory.
    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let content = fs::read_to_string(path).map_err(PrepError::Io)?;
        let mut plan: MergePlan =
            serde_yaml::from_str(&content).map_err(|source| PrepError::PlanParse {
                path: path.to_path_buf(),
                source,
            })?;

        match (&plan.classes, &plan.class_file) {
            (Some(_), Some(_)) => {
                return Err(PrepError::LayoutInvalid {
                    path: path.to_path_buf(),
                    message: "plan sets both 'classes' and 'class_file'; pick one".to_string(),
                })
            }
            (None, None) => {
                return Err(PrepError::LayoutInvalid {
                    path: path.to_path_buf(),
                    message: "plan sets neither 'classes' nor 'class_file'".to_string(),
                })
            }
            _ => {}
        }
        if plan.sources.is_empty() {
            return Err(PrepError::LayoutInvalid {
                path: path.to_path_buf(),
                message: "plan lists no sources".to_string(),
            });
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        plan.resolve_paths(base);
        Ok(plan)
    }

    /// Builds the class registry the plan describes.
    pub fn registry(&self) -> Result<ClassRegistry, PrepError> {
        match (&self.classes, &self.class_file) {
            (Some(names), None) => Ok(ClassRegistry::new(names.clone())),
            (None, Some(file)) => ClassRegistry::load(file),
            // load() has already rejected the other combinations.
            _ => unreachable!("plan validation enforces classes xor class_file"),
        }
    }

    /// Instantiates the converters, in plan order.
    pub fn build_sources(&self) -> Vec<Box<dyn AnnotationSource>> {
        self.sources
            .iter()
            .map(|spec| match spec {
                SourceSpec::Voc {
                    prefix,
                    annotations,
                    images,
                } => Box::new(VocSource {
                    annotations_dir: annotations.clone(),
                    images_dir: images.clone(),
                    prefix: prefix.clone(),
                }) as Box<dyn AnnotationSource>,
                SourceSpec::Gtsrb {
                    prefix,
                    csv,
                    images,
                    class_map,
                } => Box::new(GtsrbCsvSource {
                    annotations_csv: csv.clone(),
                    images_root: images.clone(),
                    prefix: prefix.clone(),
                    class_map: class_map.clone(),
                }),
                SourceSpec::Lisa {
                    prefix,
                    csv,
                    images,
                    tag_map,
                } => Box::new(LisaCsvSource {
                    annotations_csv: csv.clone(),
                    images_root: images.clone(),
                    prefix: prefix.clone(),
                    tag_map: tag_map.clone(),
                }),
                SourceSpec::Coco {
                    prefix,
                    json,
                    images,
                    name_map,
                    include_person,
                } => Box::new(CocoJsonSource {
                    annotations_json: json.clone(),
                    images_root: images.clone(),
                    prefix: prefix.clone(),
                    name_map: name_map.clone(),
                    include_person: *include_person,
                }),
                SourceSpec::Yolo {
                    prefix,
                    images,
                    labels,
                } => Box::new(YoloSource {
                    images_dir: images.clone(),
                    labels_dir: labels.clone(),
                    prefix: prefix.clone(),
                }),
            })
            .collect()
    }

    fn resolve_paths(&mut self, base: &Path) {
        self.output = resolve(base, &self.output);
        if let Some(file) = &self.class_file {
            self.class_file = Some(resolve(base, file));
        }
        for spec in &mut self.sources {
            match spec {
                SourceSpec::Voc {
                    annotations, images, ..
                } => {
                    *annotations = resolve(base, annotations);
                    *images = resolve(base, images);
                }
                SourceSpec::Gtsrb { csv, images, .. } | SourceSpec::Lisa { csv, images, .. } => {
                    *csv = resolve(base, csv);
                    *images = resolve(base, images);
                }
                SourceSpec::Coco { json, images, .. } => {
                    *json = resolve(base, json);
                    *images = resolve(base, images);
                }
                SourceSpec::Yolo { images, labels, .. } => {
                    *images = resolve(base, images);
                    *labels = resolve(base, labels);
                }
            }
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
