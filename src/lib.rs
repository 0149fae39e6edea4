//! Yoloprep: object-detection dataset preparation.
//!
//! Yoloprep normalizes annotation formats (PASCAL VOC XML, GTSRB CSV,
//! LISA CSV, COCO JSON, plain YOLO) into one YOLO-format corpus with a
//! shared class registry, then rebalances the corpus by oversampling
//! rare classes through image augmentation and undersampling
//! overrepresented sequences through deterministic deletion.
//!
//! # Modules
//!
//! - [`label`]: Normalized bounding boxes and the YOLO label-line format
//! - [`registry`]: Global class registry (canonical names → ids)
//! - [`plan`]: YAML merge-plan configuration
//! - [`sources`]: One converter per input format
//! - [`merge`]: Runs plan sources into one shared output tree
//! - [`balance`]: Oversampling and undersampling passes
//! - [`error`]: Error types for yoloprep operations

pub mod balance;
pub mod error;
pub mod label;
pub mod merge;
pub mod plan;
pub mod registry;
pub mod sources;

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

use balance::oversample::{Augmentation, OversamplePass};
use balance::undersample::{run_undersample, ThresholdKey, UndersamplePolicy};
pub use error::PrepError;

/// The yoloprep CLI application.
#[derive(Parser)]
#[command(name = "yoloprep")]
#[command(version, author, about)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Merge annotation sources into one YOLO corpus.
    Merge(MergeArgs),
    /// Augment images whose labels mention a rare class.
    Oversample(OversampleArgs),
    /// Delete overrepresented files from corpus directories.
    Undersample(UndersampleArgs),
}

/// Arguments for the merge subcommand.
#[derive(clap::Args)]
struct MergeArgs {
    /// Merge plan file (YAML).
    #[arg(long)]
    plan: PathBuf,

    /// Override the plan's output directory.
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Arguments for the oversample subcommand.
#[derive(clap::Args)]
struct OversampleArgs {
    /// Corpus images directory.
    #[arg(long)]
    images: PathBuf,

    /// Corpus labels directory.
    #[arg(long)]
    labels: PathBuf,

    /// Rare class ids (comma-separated or repeated).
    #[arg(long, required = true, value_delimiter = ',')]
    rare: Vec<u32>,

    /// Brightness factor range 'lo:hi'; may be repeated for several variants.
    #[arg(long, value_name = "LO:HI", value_parser = parse_brightness)]
    brightness: Vec<(f64, f64)>,

    /// Gaussian blur kernel size (odd); may be repeated.
    #[arg(long, value_name = "KERNEL", value_parser = parse_kernel)]
    blur: Vec<u32>,

    /// Add a horizontally flipped variant.
    #[arg(long)]
    flip: bool,

    /// Fixed seed for the brightness draw.
    #[arg(long)]
    seed: Option<u64>,
}

/// Arguments for the undersample subcommand.
#[derive(clap::Args)]
#[command(group = ArgGroup::new("policy").required(true).args(["suffix_threshold", "every_other"]))]
struct UndersampleArgs {
    /// Delete files whose underscore-segment key exceeds this threshold.
    #[arg(long, value_name = "KEY")]
    suffix_threshold: Option<String>,

    /// Compare threshold keys as strings instead of integers.
    #[arg(long, requires = "suffix_threshold")]
    lexicographic: bool,

    /// Delete every other frame of this `<sequence>--<number>` series.
    #[arg(long, value_name = "SEQUENCE")]
    every_other: Option<String>,

    /// Directories to thin (typically an images and a labels directory).
    #[arg(required = true)]
    dirs: Vec<PathBuf>,
}

/// Run the yoloprep CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), PrepError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Merge(args) => run_merge_command(args),
        Commands::Oversample(args) => run_oversample_command(args),
        Commands::Undersample(args) => run_undersample_command(args),
    }
}

fn run_merge_command(args: MergeArgs) -> Result<(), PrepError> {
    let mut plan = plan::MergePlan::load(&args.plan)?;
    if let Some(output) = args.output {
        plan.output = output;
    }

    let summary = merge::run_merge(&plan)?;
    println!(
        "merged {} source(s) ({} skipped): {} images, {} boxes, {} objects unmapped, {} units skipped",
        summary.sources_converted,
        summary.sources_skipped,
        summary.totals.images_converted,
        summary.totals.boxes_written,
        summary.totals.objects_unmapped,
        summary.totals.units_skipped,
    );
    Ok(())
}

fn run_oversample_command(args: OversampleArgs) -> Result<(), PrepError> {
    let mut augmentations: Vec<Augmentation> = args
        .brightness
        .iter()
        .map(|(lo, hi)| Augmentation::Brightness { lo: *lo, hi: *hi })
        .collect();
    augmentations.extend(args.blur.iter().map(|kernel| Augmentation::Blur {
        kernel: *kernel,
    }));
    if args.flip {
        augmentations.push(Augmentation::HorizontalFlip);
    }

    let pass = OversamplePass {
        images_dir: args.images,
        labels_dir: args.labels,
        rare_classes: BTreeSet::from_iter(args.rare),
        augmentations,
        seed: args.seed,
    };
    let summary = pass.run()?;
    println!(
        "oversampled {} of {} label file(s): {} variants written, {} skipped",
        summary.files_matched,
        summary.files_scanned,
        summary.variants_written,
        summary.files_skipped,
    );
    Ok(())
}

fn run_undersample_command(args: UndersampleArgs) -> Result<(), PrepError> {
    let policy = match (args.suffix_threshold, args.every_other) {
        (Some(threshold), None) => {
            let key = if args.lexicographic {
                ThresholdKey::Lexicographic(threshold)
            } else {
                let numeric = threshold.parse::<u64>().map_err(|_| {
                    PrepError::InvalidArgument(format!(
                        "threshold '{threshold}' is not an integer; \
                         pass --lexicographic for string comparison"
                    ))
                })?;
                ThresholdKey::Numeric(numeric)
            };
            UndersamplePolicy::SuffixThreshold(key)
        }
        (None, Some(sequence)) => UndersamplePolicy::EveryOther { sequence },
        // clap's arg group guarantees exactly one policy flag.
        _ => unreachable!("argument group enforces exactly one policy"),
    };

    let summary = run_undersample(&policy, &args.dirs)?;
    println!(
        "scanned {} file(s): {} deleted, {} skipped",
        summary.files_scanned, summary.files_deleted, summary.files_skipped,
    );
    Ok(())
}

fn parse_brightness(raw: &str) -> Result<(f64, f64), String> {
    let (lo, hi) = raw
        .split_once(':')
        .ok_or_else(|| format!("'{raw}' is not of the form LO:HI"))?;
    let lo: f64 = lo.parse().map_err(|_| format!("'{lo}' is not a number"))?;
    let hi: f64 = hi.parse().map_err(|_| format!("'{hi}' is not a number"))?;
    if !(lo > 0.0 && hi >= lo) {
        return Err(format!("range {lo}:{hi} must satisfy 0 < LO <= HI"));
    }
    Ok((lo, hi))
}

fn parse_kernel(raw: &str) -> Result<u32, String> {
    let kernel: u32 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not an integer"))?;
    if kernel < 3 || kernel % 2 == 0 {
        return Err(format!("kernel {kernel} must be odd and at least 3"));
    }
    Ok(kernel)
}
