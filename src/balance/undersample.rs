//! Deterministic deletion passes for overrepresented sequences.
//!
//! Both policies work on flat directories and are applied by the caller to
//! the image tree and the label tree separately; keeping the two trees
//! consistent is the caller's job. Deletion is direct and irreversible.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::PrepError;
use crate::label::LABEL_EXTENSION;
use crate::sources::{has_extension, IMAGE_EXTENSIONS};

/// Which files to delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UndersamplePolicy {
    /// Split the file name on `_`, take the first five characters of the
    /// second segment, delete when that key exceeds the threshold. Files
    /// without a second segment are left alone.
    SuffixThreshold(ThresholdKey),
    /// Match `<sequence>--<number>.<ext>`, sort matches by the number, and
    /// delete every entry at an odd 0-indexed position.
    EveryOther { sequence: String },
}

/// Threshold comparison mode for the suffix policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThresholdKey {
    /// Keys and threshold compared as integers; non-numeric keys are skipped
    /// with a warning.
    Numeric(u64),
    /// Legacy byte-wise string comparison.
    Lexicographic(String),
}

/// Counters for one undersampling run across all directories.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UndersampleSummary {
    pub files_scanned: usize,
    pub files_deleted: usize,
    /// Files that should have been considered but could not be (non-numeric
    /// key in numeric mode, deletion failure).
    pub files_skipped: usize,
}

/// Applies one policy to each directory in turn.
pub fn run_undersample(
    policy: &UndersamplePolicy,
    dirs: &[PathBuf],
) -> Result<UndersampleSummary, PrepError> {
    let mut summary = UndersampleSummary::default();
    for dir in dirs {
        match policy {
            UndersamplePolicy::SuffixThreshold(key) => {
                suffix_threshold_pass(dir, key, &mut summary)?
            }
            UndersamplePolicy::EveryOther { sequence } => {
                every_other_pass(dir, sequence, &mut summary)?
            }
        }
    }

    info!(
        scanned = summary.files_scanned,
        deleted = summary.files_deleted,
        skipped = summary.files_skipped,
        "undersampling complete"
    );
    Ok(summary)
}

fn suffix_threshold_pass(
    dir: &Path,
    key: &ThresholdKey,
    summary: &mut UndersampleSummary,
) -> Result<(), PrepError> {
    for path in list_files(dir)? {
        summary.files_scanned += 1;
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(file_key) = suffix_key(file_name) else {
            debug!(file = %file_name, "no second underscore segment; keeping");
            continue;
        };

        let over = match key {
            ThresholdKey::Numeric(threshold) => match file_key.parse::<u64>() {
                Ok(numeric) => numeric > *threshold,
                Err(_) => {
                    warn!(file = %file_name, key = %file_key, "non-numeric key; keeping file");
                    summary.files_skipped += 1;
                    continue;
                }
            },
            ThresholdKey::Lexicographic(threshold) => file_key > threshold.as_str(),
        };

        if over {
            delete(&path, summary);
        }
    }
    Ok(())
}

fn every_other_pass(
    dir: &Path,
    sequence: &str,
    summary: &mut UndersampleSummary,
) -> Result<(), PrepError> {
    let mut matches: Vec<(u64, PathBuf)> = Vec::new();
    for path in list_files(dir)? {
        summary.files_scanned += 1;
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some(number) = sequence_number(file_name, sequence) {
            matches.push((number, path));
        }
    }

    matches.sort();
    for (idx, (_, path)) in matches.iter().enumerate() {
        if idx % 2 == 1 {
            delete(path, summary);
        }
    }
    Ok(())
}

/// First five characters of the second `_`-separated segment.
fn suffix_key(file_name: &str) -> Option<&str> {
    let mut segments = file_name.split('_');
    segments.next()?;
    let second = segments.next()?;
    let end = second
        .char_indices()
        .nth(5)
        .map_or(second.len(), |(idx, _)| idx);
    Some(&second[..end])
}

/// Frame number of a `<sequence>--<number>.<ext>` file name.
fn sequence_number(file_name: &str, sequence: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(sequence)?.strip_prefix("--")?;
    let digits = rest.split('.').next()?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn delete(path: &Path, summary: &mut UndersampleSummary) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(file = %path.display(), "deleted");
            summary.files_deleted += 1;
        }
        Err(err) => {
            warn!(file = %path.display(), error = %err, "failed to delete; continuing");
            summary.files_skipped += 1;
        }
    }
}

/// Corpus files only: images and label files. Stray files (notes, data.yaml
/// copied into the tree, editor droppings) are never deletion candidates.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>, PrepError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(PrepError::Io)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ty| ty.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            has_extension(path, &IMAGE_EXTENSIONS) || has_extension(path, &[LABEL_EXTENSION])
        })
        .collect();
    paths.sort();
    Ok(paths)
}
