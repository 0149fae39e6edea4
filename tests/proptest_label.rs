//! Property tests for the label-line format and box geometry.

use std::path::Path;

use proptest::prelude::*;

use yoloprep::label::{parse_label_line, BoundingBox};

/// Pixel-space corner boxes with integer coordinates inside the image.
fn voc_case() -> impl Strategy<Value = (f64, f64, f64, f64, f64, f64)> {
    (2u32..=4000, 2u32..=4000)
        .prop_flat_map(|(width, height)| {
            (0..width - 1, 0..height - 1, Just(width), Just(height))
        })
        .prop_flat_map(|(xmin, ymin, width, height)| {
            (
                Just(xmin),
                Just(ymin),
                (xmin + 1)..=width,
                (ymin + 1)..=height,
                Just(width),
                Just(height),
            )
        })
        .prop_map(|(xmin, ymin, xmax, ymax, width, height)| {
            (
                xmin as f64,
                ymin as f64,
                xmax as f64,
                ymax as f64,
                width as f64,
                height as f64,
            )
        })
}

fn unit_fraction() -> impl Strategy<Value = f64> {
    (0u32..=1_000_000).prop_map(|n| f64::from(n) / 1_000_000.0)
}

proptest! {
    /// Flipping twice returns the original box exactly, not approximately,
    /// for every coordinate the six-decimal label format can carry.
    #[test]
    fn horizontal_flip_is_an_exact_involution(
        x_center in unit_fraction(),
        y_center in 0.0f64..=1.0,
        width in 0.0f64..=1.0,
        height in 0.0f64..=1.0,
        class_id in 0u32..50,
    ) {
        let bbox = BoundingBox { class_id, x_center, y_center, width, height };
        prop_assert_eq!(bbox.flipped_horizontal().flipped_horizontal(), bbox);
    }

    /// Every formatted line parses back with at most half-ULP-of-six-decimals
    /// error per field.
    #[test]
    fn formatted_lines_parse_back(
        x_center in unit_fraction(),
        y_center in unit_fraction(),
        width in unit_fraction(),
        height in unit_fraction(),
        class_id in 0u32..50,
    ) {
        let bbox = BoundingBox { class_id, x_center, y_center, width, height };
        let line = bbox.to_string();

        let parsed = parse_label_line(&line, Path::new("prop.txt"), 1)
            .expect("formatted line must parse")
            .expect("formatted line is not blank");

        prop_assert_eq!(parsed.class_id, class_id);
        prop_assert!((parsed.x_center - x_center).abs() <= 5e-7);
        prop_assert!((parsed.y_center - y_center).abs() <= 5e-7);
        prop_assert!((parsed.width - width).abs() <= 5e-7);
        prop_assert!((parsed.height - height).abs() <= 5e-7);
    }

    /// Integer pixel corners survive normalization, six-decimal formatting
    /// and denormalization to within one pixel.
    #[test]
    fn voc_corners_round_trip_within_one_pixel(
        (xmin, ymin, xmax, ymax, width, height) in voc_case(),
    ) {
        let bbox = BoundingBox::from_corners(7, xmin, ymin, xmax, ymax, width, height);
        let line = bbox.to_string();
        let parsed = parse_label_line(&line, Path::new("prop.txt"), 1)
            .expect("formatted line must parse")
            .expect("formatted line is not blank");

        let (rx_min, ry_min, rx_max, ry_max) = parsed.to_corners(width, height);
        prop_assert!((rx_min - xmin).abs() < 1.0);
        prop_assert!((ry_min - ymin).abs() < 1.0);
        prop_assert!((rx_max - xmax).abs() < 1.0);
        prop_assert!((ry_max - ymax).abs() < 1.0);
    }
}
