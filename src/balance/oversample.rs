//! Rare-class oversampling through image augmentation.
//!
//! Scans a corpus `labels/` directory; every label file that mentions at
//! least one rare class gets one derived (image, label) pair per configured
//! augmentation, written next to the originals under a suffixed name
//! (`frame_bright.jpg`, `frame_blur3.jpg`, `frame_flip.jpg`). Originals are
//! never touched.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use image::{imageops, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::PrepError;
use crate::label::{self, BoundingBox, LABEL_EXTENSION};
use crate::sources::IMAGE_EXTENSIONS;

/// One augmentation to apply per qualifying image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Augmentation {
    /// Scale every channel by a factor drawn uniformly from `[lo, hi]`.
    /// Until a channel saturates at 255 this matches scaling the HSV value
    /// channel; once one clips, hue and saturation shift slightly.
    Brightness { lo: f64, hi: f64 },
    /// Gaussian blur with an odd kernel size; sigma is derived from the
    /// kernel the way OpenCV derives it (`0.3*((k-1)*0.5 - 1) + 0.8`).
    Blur { kernel: u32 },
    /// Mirror across the vertical axis; box `x_center` becomes `1 - x_center`.
    HorizontalFlip,
}

/// An oversampling pass over one corpus tree.
#[derive(Clone, Debug)]
pub struct OversamplePass {
    pub images_dir: PathBuf,
    pub labels_dir: PathBuf,
    pub rare_classes: BTreeSet<u32>,
    pub augmentations: Vec<Augmentation>,
    /// Fixed seed for the brightness draw; `None` uses OS entropy.
    pub seed: Option<u64>,
}

/// Counters for one oversampling run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OversampleSummary {
    /// Label files examined.
    pub files_scanned: usize,
    /// Label files that mentioned a rare class.
    pub files_matched: usize,
    /// Derived (image, label) pairs written.
    pub variants_written: usize,
    /// Qualifying files skipped (missing or unreadable image, write failure).
    pub files_skipped: usize,
}

impl OversamplePass {
    pub fn run(&self) -> Result<OversampleSummary, PrepError> {
        if self.augmentations.is_empty() {
            return Err(PrepError::NoWorkDone(
                "no augmentations configured".to_string(),
            ));
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let mut label_paths: Vec<PathBuf> = std::fs::read_dir(&self.labels_dir)
            .map_err(PrepError::Io)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(LABEL_EXTENSION))
            })
            .collect();
        label_paths.sort();

        let suffixes = variant_suffixes(&self.augmentations);

        let mut summary = OversampleSummary::default();
        for label_path in label_paths {
            summary.files_scanned += 1;

            let boxes = match label::read_label_file(&label_path) {
                Ok(boxes) => boxes,
                Err(err) => {
                    warn!(label = %label_path.display(), error = %err, "unreadable label file");
                    summary.files_skipped += 1;
                    continue;
                }
            };
            if !boxes
                .iter()
                .any(|bbox| self.rare_classes.contains(&bbox.class_id))
            {
                continue;
            }
            summary.files_matched += 1;

            match self.augment_file(&label_path, &boxes, &suffixes, &mut rng) {
                Ok(written) => summary.variants_written += written,
                Err(err) => {
                    warn!(label = %label_path.display(), error = %err, "skipping rare-class image");
                    summary.files_skipped += 1;
                }
            }
        }

        info!(
            scanned = summary.files_scanned,
            matched = summary.files_matched,
            written = summary.variants_written,
            skipped = summary.files_skipped,
            "oversampling complete"
        );
        Ok(summary)
    }

    fn augment_file(
        &self,
        label_path: &Path,
        boxes: &[BoundingBox],
        suffixes: &[String],
        rng: &mut StdRng,
    ) -> Result<usize, PrepError> {
        let stem = label_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| PrepError::LayoutInvalid {
                path: label_path.to_path_buf(),
                message: "label file name is not valid UTF-8".to_string(),
            })?;

        let image_path = find_image(&self.images_dir, stem)
            .ok_or_else(|| PrepError::missing(self.images_dir.join(stem)))?;
        let image = image::open(&image_path)
            .map_err(|source| PrepError::ImageRead {
                path: image_path.clone(),
                source,
            })?
            .to_rgb8();
        let image_ext = image_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("png");

        let mut written = 0;
        for (augmentation, suffix) in self.augmentations.iter().zip(suffixes) {
            let (variant, variant_boxes) = apply(augmentation, &image, boxes, rng);

            let variant_image = self
                .images_dir
                .join(format!("{stem}_{suffix}.{image_ext}"));
            variant
                .save(&variant_image)
                .map_err(|source| PrepError::ImageWrite {
                    path: variant_image.clone(),
                    source,
                })?;
            label::write_label_file(
                &self
                    .labels_dir
                    .join(format!("{stem}_{suffix}.{LABEL_EXTENSION}")),
                &variant_boxes,
            )?;

            debug!(variant = %variant_image.display(), "wrote augmented pair");
            written += 1;
        }
        Ok(written)
    }
}

/// Per-variant name suffixes, in augmentation order. A lone brightness
/// variant is called `bright`; several are numbered `bright1..brightN`. Blur
/// always carries its kernel size.
fn variant_suffixes(augmentations: &[Augmentation]) -> Vec<String> {
    let brightness_total = augmentations
        .iter()
        .filter(|aug| matches!(aug, Augmentation::Brightness { .. }))
        .count();

    let mut brightness_seen = 0;
    augmentations
        .iter()
        .map(|aug| match aug {
            Augmentation::Brightness { .. } => {
                brightness_seen += 1;
                if brightness_total > 1 {
                    format!("bright{brightness_seen}")
                } else {
                    "bright".to_string()
                }
            }
            Augmentation::Blur { kernel } => format!("blur{kernel}"),
            Augmentation::HorizontalFlip => "flip".to_string(),
        })
        .collect()
}

fn apply(
    augmentation: &Augmentation,
    image: &RgbImage,
    boxes: &[BoundingBox],
    rng: &mut StdRng,
) -> (RgbImage, Vec<BoundingBox>) {
    match augmentation {
        Augmentation::Brightness { lo, hi } => {
            let factor = rng.random_range(*lo..=*hi);
            (scale_brightness(image, factor), boxes.to_vec())
        }
        Augmentation::Blur { kernel } => {
            (imageops::blur(image, sigma_for_kernel(*kernel)), boxes.to_vec())
        }
        Augmentation::HorizontalFlip => (
            imageops::flip_horizontal(image),
            boxes.iter().map(BoundingBox::flipped_horizontal).collect(),
        ),
    }
}

fn scale_brightness(image: &RgbImage, factor: f64) -> RgbImage {
    let mut scaled = image.clone();
    for pixel in scaled.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = (f64::from(*channel) * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    scaled
}

fn sigma_for_kernel(kernel: u32) -> f32 {
    (0.3 * ((f64::from(kernel) - 1.0) * 0.5 - 1.0) + 0.8) as f32
}

/// Locates the image paired with `stem`. Tries the lowercase extensions
/// directly, then falls back to a directory scan so `frame.JPG` pairs up too.
fn find_image(images_dir: &Path, stem: &str) -> Option<PathBuf> {
    let direct = IMAGE_EXTENSIONS.iter().find_map(|ext| {
        let candidate = images_dir.join(format!("{stem}.{ext}"));
        candidate.is_file().then_some(candidate)
    });
    if direct.is_some() {
        return direct;
    }

    std::fs::read_dir(images_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.file_stem().and_then(|s| s.to_str()) == Some(stem)
                && crate::sources::has_extension(path, &IMAGE_EXTENSIONS)
                && path.is_file()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn checker_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([200, 100, 50])
            } else {
                image::Rgb([10, 20, 30])
            }
        })
    }

    fn setup(label_body: &str) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let temp = tempfile::tempdir().expect("create temp dir");
        let images = temp.path().join("images");
        let labels = temp.path().join("labels");
        fs::create_dir_all(&images).expect("create images dir");
        fs::create_dir_all(&labels).expect("create labels dir");

        checker_image(8, 8)
            .save(images.join("frame.png"))
            .expect("write image");
        fs::write(labels.join("frame.txt"), label_body).expect("write label");
        (temp, images, labels)
    }

    #[test]
    fn writes_one_pair_per_augmentation() {
        let (_temp, images, labels) = setup("3 0.250000 0.500000 0.100000 0.100000\n");
        let pass = OversamplePass {
            images_dir: images.clone(),
            labels_dir: labels.clone(),
            rare_classes: BTreeSet::from([3]),
            augmentations: vec![
                Augmentation::Brightness { lo: 0.6, hi: 1.4 },
                Augmentation::Blur { kernel: 3 },
                Augmentation::HorizontalFlip,
            ],
            seed: Some(7),
        };

        let summary = pass.run().expect("oversample");
        assert_eq!(summary.files_matched, 1);
        assert_eq!(summary.variants_written, 3);

        assert!(images.join("frame_bright.png").is_file());
        assert!(images.join("frame_blur3.png").is_file());
        assert!(images.join("frame_flip.png").is_file());
        assert!(labels.join("frame_bright.txt").is_file());
        assert!(labels.join("frame_blur3.txt").is_file());
        assert!(labels.join("frame_flip.txt").is_file());
    }

    #[test]
    fn flip_mirrors_the_label_and_the_pixels() {
        let (_temp, images, labels) = setup("3 0.250000 0.500000 0.100000 0.100000\n");
        let pass = OversamplePass {
            images_dir: images.clone(),
            labels_dir: labels.clone(),
            rare_classes: BTreeSet::from([3]),
            augmentations: vec![Augmentation::HorizontalFlip],
            seed: None,
        };
        pass.run().expect("oversample");

        let flipped_label =
            fs::read_to_string(labels.join("frame_flip.txt")).expect("read label");
        assert_eq!(flipped_label, "3 0.750000 0.500000 0.100000 0.100000\n");

        let original = checker_image(8, 8);
        let flipped = image::open(images.join("frame_flip.png"))
            .expect("read image")
            .to_rgb8();
        assert_eq!(flipped.get_pixel(0, 0), original.get_pixel(7, 0));
    }

    #[test]
    fn brightness_copies_the_label_unchanged() {
        let (_temp, images, labels) = setup("3 0.250000 0.500000 0.100000 0.100000\n");
        let pass = OversamplePass {
            images_dir: images,
            labels_dir: labels.clone(),
            rare_classes: BTreeSet::from([3]),
            augmentations: vec![Augmentation::Brightness { lo: 0.6, hi: 1.4 }],
            seed: Some(42),
        };
        pass.run().expect("oversample");

        let original = fs::read_to_string(labels.join("frame.txt")).expect("read original");
        let variant = fs::read_to_string(labels.join("frame_bright.txt")).expect("read variant");
        assert_eq!(original, variant);
    }

    #[test]
    fn several_brightness_variants_are_numbered() {
        let augs = vec![
            Augmentation::Brightness { lo: 0.6, hi: 0.8 },
            Augmentation::Blur { kernel: 7 },
            Augmentation::Brightness { lo: 1.2, hi: 1.4 },
        ];
        assert_eq!(variant_suffixes(&augs), vec!["bright1", "blur7", "bright2"]);
    }

    #[test]
    fn files_without_rare_classes_are_untouched() {
        let (_temp, images, labels) = setup("0 0.500000 0.500000 0.100000 0.100000\n");
        let pass = OversamplePass {
            images_dir: images.clone(),
            labels_dir: labels,
            rare_classes: BTreeSet::from([3]),
            augmentations: vec![Augmentation::HorizontalFlip],
            seed: None,
        };

        let summary = pass.run().expect("oversample");
        assert_eq!(summary.files_matched, 0);
        assert_eq!(summary.variants_written, 0);
        assert!(!images.join("frame_flip.png").exists());
    }

    #[test]
    fn uppercase_image_extension_still_pairs_up() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let images = temp.path().join("images");
        let labels = temp.path().join("labels");
        fs::create_dir_all(&images).expect("create images dir");
        fs::create_dir_all(&labels).expect("create labels dir");
        checker_image(8, 8)
            .save(images.join("frame.JPG"))
            .expect("write image");
        fs::write(labels.join("frame.txt"), "3 0.250000 0.500000 0.100000 0.100000\n")
            .expect("write label");

        let pass = OversamplePass {
            images_dir: images.clone(),
            labels_dir: labels.clone(),
            rare_classes: BTreeSet::from([3]),
            augmentations: vec![Augmentation::HorizontalFlip],
            seed: None,
        };
        let summary = pass.run().expect("oversample");

        assert_eq!(summary.variants_written, 1);
        assert_eq!(summary.files_skipped, 0);
        // The variant keeps the original's extension as-is.
        assert!(images.join("frame_flip.JPG").is_file());
        assert!(labels.join("frame_flip.txt").is_file());
    }

    #[test]
    fn missing_image_skips_the_file() {
        let (temp, images, labels) = setup("3 0.250000 0.500000 0.100000 0.100000\n");
        fs::remove_file(temp.path().join("images/frame.png")).expect("remove image");

        let pass = OversamplePass {
            images_dir: images,
            labels_dir: labels,
            rare_classes: BTreeSet::from([3]),
            augmentations: vec![Augmentation::HorizontalFlip],
            seed: None,
        };
        let summary = pass.run().expect("oversample");
        assert_eq!(summary.files_matched, 1);
        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.variants_written, 0);
    }

    #[test]
    fn brightness_scaling_clamps_channels() {
        let image = RgbImage::from_pixel(2, 2, image::Rgb([200, 128, 0]));
        let scaled = scale_brightness(&image, 1.5);
        assert_eq!(*scaled.get_pixel(0, 0), image::Rgb([255, 192, 0]));
    }
}
