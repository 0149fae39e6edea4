//! Pascal VOC XML converter.
//!
//! Walks a directory tree for `*.xml` annotation files. Each file carries the
//! image size and a list of `<object>` elements; objects whose `<name>` is
//! not in the registry are dropped with a warning while the rest of the file
//! still converts. A file whose referenced image is missing, or that fails to
//! parse, is logged and skipped without aborting the batch.

use std::path::{Path, PathBuf};
use std::fs;

use roxmltree::Node;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{AnnotationSource, CorpusSink, SourceSummary};
use crate::error::PrepError;
use crate::label::BoundingBox;
use crate::registry::ClassRegistry;

const VOC_XML_EXTENSION: &str = "xml";

/// A VOC-format source directory.
#[derive(Clone, Debug)]
pub struct VocSource {
    /// Directory scanned (recursively) for annotation XML files.
    pub annotations_dir: PathBuf,
    /// Directory the `<filename>` entries are resolved against.
    pub images_dir: PathBuf,
    pub prefix: String,
}

impl AnnotationSource for VocSource {
    fn format_name(&self) -> &'static str {
        "voc"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn required_paths(&self) -> Vec<PathBuf> {
        vec![self.annotations_dir.clone(), self.images_dir.clone()]
    }

    fn convert(
        &self,
        registry: &ClassRegistry,
        sink: &CorpusSink,
    ) -> Result<SourceSummary, PrepError> {
        let mut xml_files = Vec::new();
        for entry in WalkDir::new(&self.annotations_dir).follow_links(true) {
            let entry = entry.map_err(|source| PrepError::LayoutInvalid {
                path: self.annotations_dir.clone(),
                message: format!("failed while traversing annotations directory: {source}"),
            })?;
            if entry.file_type().is_file() && super::has_extension(entry.path(), &[VOC_XML_EXTENSION])
            {
                xml_files.push(entry.path().to_path_buf());
            }
        }
        xml_files.sort();

        let mut summary = SourceSummary::default();
        for xml_path in xml_files {
            match self.convert_file(&xml_path, registry, sink) {
                Ok(outcome) => summary.merge(&outcome),
                Err(err) => {
                    warn!(path = %xml_path.display(), error = %err, "skipping VOC annotation");
                    summary.units_skipped += 1;
                }
            }
        }
        Ok(summary)
    }
}

impl VocSource {
    fn convert_file(
        &self,
        xml_path: &Path,
        registry: &ClassRegistry,
        sink: &CorpusSink,
    ) -> Result<SourceSummary, PrepError> {
        let parsed = parse_voc_xml(xml_path)?;

        let image_path = self.images_dir.join(&parsed.filename);
        if !image_path.is_file() {
            return Err(PrepError::missing(image_path));
        }

        let mut summary = SourceSummary::default();
        let mut boxes = Vec::with_capacity(parsed.objects.len());

        for object in &parsed.objects {
            let Some(class_id) = registry.id_of(&object.name) else {
                warn!(
                    class = %object.name,
                    path = %xml_path.display(),
                    "class not in registry; object dropped"
                );
                summary.objects_unmapped += 1;
                continue;
            };
            boxes.push(BoundingBox::from_corners(
                class_id,
                object.xmin,
                object.ymin,
                object.xmax,
                object.ymax,
                parsed.width as f64,
                parsed.height as f64,
            ));
        }

        // Files with no mapped object produce no output at all.
        if boxes.is_empty() {
            debug!(path = %xml_path.display(), "no mapped objects; nothing written");
            return Ok(summary);
        }

        let new_name = sink.copy_image(&image_path, &self.prefix)?;
        sink.write_labels(&new_name, &boxes)?;

        summary.images_converted += 1;
        summary.boxes_written += boxes.len();
        Ok(summary)
    }
}

#[derive(Debug)]
struct ParsedVocAnnotation {
    filename: String,
    width: u32,
    height: u32,
    objects: Vec<ParsedVocObject>,
}

#[derive(Debug)]
struct ParsedVocObject {
    name: String,
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

fn parse_voc_xml(path: &Path) -> Result<ParsedVocAnnotation, PrepError> {
    let xml = fs::read_to_string(path).map_err(PrepError::Io)?;
    parse_voc_xml_str(&xml, path)
}

fn parse_voc_xml_str(xml: &str, path: &Path) -> Result<ParsedVocAnnotation, PrepError> {
    let document = roxmltree::Document::parse(xml).map_err(|source| PrepError::VocXmlParse {
        path: path.to_path_buf(),
        message: source.to_string(),
    })?;

    let annotation = document.root_element();
    if annotation.tag_name().name() != "annotation" {
        return Err(PrepError::VocXmlParse {
            path: path.to_path_buf(),
            message: "missing <annotation> root element".to_string(),
        });
    }

    let filename = required_child_text(annotation, "filename", path, "<annotation>")?;

    let size = required_child_element(annotation, "size", path, "<annotation>")?;
    let width = parse_required_u32(size, "width", path, "<size>")?;
    let height = parse_required_u32(size, "height", path, "<size>")?;

    let mut objects = Vec::new();
    for object in annotation
        .children()
        .filter(|node| node.is_element() && node.tag_name().name() == "object")
    {
        let name = required_child_text(object, "name", path, "<object>")?;
        let bndbox = required_child_element(object, "bndbox", path, "<object>")?;

        let xmin = parse_required_f64(bndbox, "xmin", path, "<bndbox>")?;
        let ymin = parse_required_f64(bndbox, "ymin", path, "<bndbox>")?;
        let xmax = parse_required_f64(bndbox, "xmax", path, "<bndbox>")?;
        let ymax = parse_required_f64(bndbox, "ymax", path, "<bndbox>")?;

        objects.push(ParsedVocObject {
            name,
            xmin,
            ymin,
            xmax,
            ymax,
        });
    }

    Ok(ParsedVocAnnotation {
        filename,
        width,
        height,
        objects,
    })
}

fn required_child_element<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<Node<'a, 'input>, PrepError> {
    child_element(node, tag).ok_or_else(|| PrepError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn required_child_text(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<String, PrepError> {
    optional_child_text(node, tag).ok_or_else(|| PrepError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn parse_required_u32(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<u32, PrepError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<u32>().map_err(|_| PrepError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("invalid <{tag}> value '{raw}' in {context}; expected u32"),
    })
}

fn parse_required_f64(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<f64, PrepError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<f64>().map_err(|_| PrepError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!(
            "invalid <{tag}> value '{raw}' in {context}; expected floating-point number"
        ),
    })
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == tag)
}

fn optional_child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child_element(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}
