//! Merge driver: runs each plan source in order into one shared output tree.
//!
//! Sources are independent. A source whose required inputs are missing is
//! skipped with a warning; only a run that produces nothing at all is an
//! error. Prefixes keep file names from colliding across sources, so the
//! order in which sources run never changes the final tree contents.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::PrepError;
use crate::plan::MergePlan;
use crate::registry::ClassRegistry;
use crate::sources::{CorpusSink, SourceSummary};

/// Aggregated result of a merge run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub sources_converted: usize,
    pub sources_skipped: usize,
    pub totals: SourceSummary,
}

/// Executes a merge plan.
///
/// Creates `<output>/images` and `<output>/labels`, converts each source into
/// them, and writes `<output>/data.yaml` describing the registry. Returns
/// [`PrepError::NoWorkDone`] when every source was skipped or no image was
/// produced.
pub fn run_merge(plan: &MergePlan) -> Result<MergeSummary, PrepError> {
    let registry = plan.registry()?;
    let sink = CorpusSink::create(&plan.output)?;

    let mut summary = MergeSummary::default();
    for source in plan.build_sources() {
        let missing: Vec<_> = source
            .required_paths()
            .into_iter()
            .filter(|path| !path.exists())
            .collect();
        if !missing.is_empty() {
            for path in &missing {
                warn!(
                    format = source.format_name(),
                    prefix = source.prefix(),
                    path = %path.display(),
                    "required input missing; skipping source"
                );
            }
            summary.sources_skipped += 1;
            continue;
        }

        info!(
            format = source.format_name(),
            prefix = source.prefix(),
            "converting source"
        );
        // A source that cannot run at all must not take the batch down with
        // it; the remaining sources still convert.
        let source_summary = match source.convert(&registry, &sink) {
            Ok(source_summary) => source_summary,
            Err(err) => {
                warn!(
                    format = source.format_name(),
                    prefix = source.prefix(),
                    error = %err,
                    "source failed; skipping"
                );
                summary.sources_skipped += 1;
                continue;
            }
        };
        info!(
            format = source.format_name(),
            prefix = source.prefix(),
            images = source_summary.images_converted,
            boxes = source_summary.boxes_written,
            unmapped = source_summary.objects_unmapped,
            skipped = source_summary.units_skipped,
            "source converted"
        );
        summary.totals.merge(&source_summary);
        summary.sources_converted += 1;
    }

    if summary.sources_converted == 0 {
        return Err(PrepError::NoWorkDone(
            "every source in the plan was skipped".to_string(),
        ));
    }
    if summary.totals.images_converted == 0 {
        return Err(PrepError::NoWorkDone(
            "no source produced any images".to_string(),
        ));
    }

    write_data_yaml(&plan.output, &registry)?;
    info!(
        sources = summary.sources_converted,
        images = summary.totals.images_converted,
        boxes = summary.totals.boxes_written,
        "merge complete"
    );
    Ok(summary)
}

fn write_data_yaml(output_root: &Path, registry: &ClassRegistry) -> Result<(), PrepError> {
    let mut yaml = String::from("names:\n");
    for (idx, name) in registry.names().iter().enumerate() {
        yaml.push_str(&format!("  {}: {}\n", idx, yaml_single_quoted(name)));
    }

    fs::write(output_root.join("data.yaml"), yaml).map_err(PrepError::Io)
}

fn yaml_single_quoted(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}
