//! Pixel preprocessing: RGBA to binary black/white, plus optional edge
//! perturbation.
//!
//! The output is always a fresh buffer. The source buffer of a trace
//! request is shared by every attempt of the retry ladder, so nothing
//! here may touch it.

use image::Rgba;
use rand::Rng;

use crate::types::PixelBuffer;

/// Binary value for black pixels.
pub const BLACK: u8 = 0;
/// Binary value for white pixels.
pub const WHITE: u8 = 255;

/// Pixels with alpha below this are background.
pub const ALPHA_CUTOFF: u8 = 128;

/// Edge sets smaller than this are left alone.
pub const MIN_EDGE_PIXELS: usize = 10;

/// Edge sets covering more than this fraction of all pixels are left
/// alone (the image is already noisy or degenerate).
pub const MAX_EDGE_FRACTION: f64 = 0.5;

/// Fraction of edge pixels flipped by perturbation.
pub const PERTURB_FRACTION: f64 = 0.01;

/// Weighted luminance of one pixel in thousandths:
/// `299*R + 587*G + 114*B`.
///
/// Integer weights keep the threshold comparison exact. Pixels with
/// alpha below [`ALPHA_CUTOFF`] count as white background.
#[must_use]
pub fn luminance_millis(pixel: Rgba<u8>) -> u32 {
    let [r, g, b, a] = pixel.0;
    if a < ALPHA_CUTOFF {
        return u32::from(WHITE) * 1000;
    }
    299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)
}

/// Weighted luminance of one pixel: `0.299*R + 0.587*G + 0.114*B`.
#[must_use]
pub fn luminance(pixel: Rgba<u8>) -> f64 {
    f64::from(luminance_millis(pixel)) / 1000.0
}

/// Threshold every pixel to pure black or white, fully opaque.
///
/// A pixel is black iff its [`luminance`] is below `threshold`.
/// `invert` swaps the two output values for every pixel.
#[must_use = "returns a new binary buffer"]
pub fn binarize(source: &PixelBuffer, threshold: u8, invert: bool) -> PixelBuffer {
    let cutoff = u32::from(threshold) * 1000;
    PixelBuffer::from_fn(source.width(), source.height(), |x, y| {
        let dark = luminance_millis(*source.get_pixel(x, y)) < cutoff;
        let value = if dark != invert { BLACK } else { WHITE };
        Rgba([value, value, value, 255])
    })
}

/// Whether the pixel at `(x, y)` is black.
#[must_use]
pub fn is_black(buffer: &PixelBuffer, x: u32, y: u32) -> bool {
    buffer.get_pixel(x, y).0[0] == BLACK
}

/// Interior pixels with at least one 4-connected neighbor of a
/// different value, in row-major order.
///
/// The outer 1-pixel border is never reported.
#[must_use]
pub fn edge_pixels(buffer: &PixelBuffer) -> Vec<(u32, u32)> {
    let (width, height) = buffer.dimensions();
    let mut edges = Vec::new();
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let here = buffer.get_pixel(x, y).0[0];
            let differs = [(x, y - 1), (x, y + 1), (x - 1, y), (x + 1, y)]
                .into_iter()
                .any(|(nx, ny)| buffer.get_pixel(nx, ny).0[0] != here);
            if differs {
                edges.push((x, y));
            }
        }
    }
    edges
}

/// Number of edge pixels perturbation would flip, or `None` when the
/// edge set is outside the accepted range.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn perturb_count(edge_count: usize, total_pixels: u64) -> Option<usize> {
    if edge_count < MIN_EDGE_PIXELS || edge_count as f64 > total_pixels as f64 * MAX_EDGE_FRACTION {
        return None;
    }
    Some(((edge_count as f64 * PERTURB_FRACTION).floor() as usize).max(1))
}

/// Flip roughly 1% of the edge pixels (at least one) to the opposite
/// binary value, in place.
///
/// Pixels are sampled without replacement, so exactly the returned
/// number of pixels change. Returns 0 and leaves the buffer untouched
/// when the edge set has fewer than [`MIN_EDGE_PIXELS`] pixels or more
/// than [`MAX_EDGE_FRACTION`] of all pixels.
pub fn perturb_edges<R: Rng + ?Sized>(buffer: &mut PixelBuffer, rng: &mut R) -> usize {
    let edges = edge_pixels(buffer);
    let total = u64::from(buffer.width()) * u64::from(buffer.height());
    let Some(count) = perturb_count(edges.len(), total) else {
        return 0;
    };

    for index in rand::seq::index::sample(rng, edges.len(), count) {
        let (x, y) = edges[index];
        let flipped = if is_black(buffer, x, y) { WHITE } else { BLACK };
        buffer.put_pixel(x, y, Rgba([flipped, flipped, flipped, 255]));
    }
    count
}

/// Produce the binary buffer one attempt traces.
///
/// Thresholds `source` into a fresh buffer and, when `perturb` is set,
/// perturbs its edges using `rng`.
#[must_use = "returns a new binary buffer"]
pub fn preprocess<R: Rng + ?Sized>(
    source: &PixelBuffer,
    threshold: u8,
    invert: bool,
    perturb: bool,
    rng: &mut R,
) -> PixelBuffer {
    let mut binary = binarize(source, threshold, invert);
    if perturb {
        let flipped = perturb_edges(&mut binary, rng);
        log::debug!("perturbed {flipped} edge pixels");
    }
    binary
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn gray(value: u8) -> Rgba<u8> {
        Rgba([value, value, value, 255])
    }

    /// Black square on white, `side` pixels wide, inset by `inset`.
    fn square_image(size: u32, inset: u32) -> PixelBuffer {
        PixelBuffer::from_fn(size, size, |x, y| {
            let inside = (inset..size - inset).contains(&x) && (inset..size - inset).contains(&y);
            if inside { gray(0) } else { gray(255) }
        })
    }

    #[test]
    fn threshold_is_strict_less_than() {
        let source = PixelBuffer::from_fn(3, 1, |x, _| gray([99, 100, 101][x as usize]));
        let out = binarize(&source, 100, false);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(2, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn black_iff_luminance_below_threshold_for_all_levels() {
        let source = PixelBuffer::from_fn(256, 1, |x, _| gray(u8::try_from(x).unwrap()));
        for threshold in [0u8, 1, 64, 128, 200, 255] {
            let out = binarize(&source, threshold, false);
            for x in 0..256 {
                let level = u8::try_from(x).unwrap();
                assert_eq!(
                    is_black(&out, x, 0),
                    level < threshold,
                    "level {level} threshold {threshold}"
                );
            }
        }
    }

    #[test]
    fn invert_swaps_every_pixel() {
        let source = PixelBuffer::from_fn(16, 16, |x, y| {
            Rgba([
                u8::try_from(x * 16).unwrap(),
                u8::try_from(y * 16).unwrap(),
                90,
                if (x + y) % 3 == 0 { 40 } else { 255 },
            ])
        });
        let plain = binarize(&source, 120, false);
        let inverted = binarize(&source, 120, true);
        for (a, b) in plain.pixels().zip(inverted.pixels()) {
            assert_eq!(a.0[0], 255 - b.0[0]);
            assert_eq!(b.0[3], 255);
        }
    }

    #[test]
    fn luminance_weights_green_highest() {
        assert!((luminance(Rgba([255, 0, 0, 255])) - 76.245).abs() < 1e-9);
        assert!((luminance(Rgba([0, 255, 0, 255])) - 149.685).abs() < 1e-9);
        assert!((luminance(Rgba([0, 0, 255, 255])) - 29.07).abs() < 1e-9);
        assert!((luminance(gray(100)) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn transparent_pixels_are_white() {
        let source = PixelBuffer::from_fn(4, 1, |x, _| Rgba([0, 0, 0, [0, 64, 127, 128][x as usize]]));
        let out = binarize(&source, 255, false);
        assert!(!is_black(&out, 0, 0));
        assert!(!is_black(&out, 1, 0));
        assert!(!is_black(&out, 2, 0));
        assert!(is_black(&out, 3, 0));
    }

    #[test]
    fn output_is_opaque_and_source_untouched() {
        let source = PixelBuffer::from_fn(5, 5, |x, _| Rgba([10, 20, 30, u8::try_from(x * 60).unwrap()]));
        let before = source.clone();
        let out = preprocess(&source, 128, false, true, &mut StdRng::seed_from_u64(1));
        assert!(out.pixels().all(|p| p.0[3] == 255));
        assert_eq!(source, before);
    }

    #[test]
    fn preprocessing_without_perturbation_is_deterministic() {
        let source = square_image(20, 5);
        let a = preprocess(&source, 128, false, false, &mut StdRng::seed_from_u64(1));
        let b = preprocess(&source, 128, false, false, &mut StdRng::seed_from_u64(2));
        assert_eq!(a, b);
    }

    #[test]
    fn edges_exclude_outer_border() {
        // A single black pixel in the top-left corner has no interior edges
        // except its interior neighbour.
        let mut buffer = PixelBuffer::from_pixel(4, 4, gray(255));
        buffer.put_pixel(0, 0, gray(0));
        assert!(edge_pixels(&buffer).is_empty());

        buffer.put_pixel(1, 1, gray(0));
        let edges = edge_pixels(&buffer);
        assert!(edges.contains(&(1, 1)));
        assert!(edges.iter().all(|&(x, y)| (1..3).contains(&x) && (1..3).contains(&y)));
    }

    #[test]
    fn perturbation_flips_one_percent_of_edges() {
        let mut buffer = binarize(&square_image(100, 20), 128, false);
        let edges = edge_pixels(&buffer).len();
        assert!(edges >= 100);
        let before = buffer.clone();

        let flipped = perturb_edges(&mut buffer, &mut StdRng::seed_from_u64(7));
        assert_eq!(flipped, edges / 100);

        let changed = before
            .pixels()
            .zip(buffer.pixels())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(changed, flipped);
        assert!(changed <= edges.div_ceil(100));
    }

    #[test]
    fn perturbation_flips_at_least_one() {
        // 4x4 black square inside 8x8: 12 edge pixels on the inside ring
        // plus the white ring around it.
        let mut buffer = binarize(&square_image(8, 2), 128, false);
        let edges = edge_pixels(&buffer).len();
        assert!((MIN_EDGE_PIXELS..100).contains(&edges));
        assert_eq!(perturb_edges(&mut buffer, &mut StdRng::seed_from_u64(3)), 1);
    }

    #[test]
    fn perturbation_skips_small_edge_sets() {
        let mut buffer = PixelBuffer::from_pixel(10, 10, gray(255));
        buffer.put_pixel(5, 5, gray(0));
        assert!(edge_pixels(&buffer).len() < MIN_EDGE_PIXELS);
        let before = buffer.clone();
        assert_eq!(perturb_edges(&mut buffer, &mut StdRng::seed_from_u64(0)), 0);
        assert_eq!(buffer, before);
    }

    #[test]
    fn perturbation_skips_noisy_images() {
        let checker = PixelBuffer::from_fn(10, 10, |x, y| gray(if (x + y) % 2 == 0 { 0 } else { 255 }));
        let mut buffer = binarize(&checker, 128, false);
        // Every one of the 64 interior pixels is an edge: 64 > 50.
        assert_eq!(edge_pixels(&buffer).len(), 64);
        let before = buffer.clone();
        assert_eq!(perturb_edges(&mut buffer, &mut StdRng::seed_from_u64(0)), 0);
        assert_eq!(buffer, before);
    }

    #[test]
    fn perturb_count_bounds() {
        assert_eq!(perturb_count(9, 10_000), None);
        assert_eq!(perturb_count(10, 10_000), Some(1));
        assert_eq!(perturb_count(250, 10_000), Some(2));
        assert_eq!(perturb_count(50, 100), Some(1));
        assert_eq!(perturb_count(51, 100), None);
    }
}
