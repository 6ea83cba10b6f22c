//! Fallback engine: single-call crack-edge outline tracer.
//!
//! Outlines run along pixel borders rather than through pixel centers.
//! Every border between a black pixel and a white one (or the image
//! edge) is a directed unit edge with black on its right, so outer
//! borders run clockwise and holes counter-clockwise on screen. Edges
//! are chained into closed loops; where two black pixels touch only at
//! a corner the [`TurnPolicy`] decides whether the loop joins them.
//!
//! Loops enclosing fewer than `min_feature_size` pixels are dropped,
//! the pixel staircase is simplified away, and every vertex turning
//! less than `alpha_max × 90°` is smoothed into a curve. All loops are
//! emitted as one even-odd filled path.

use pixtrace_core::engine::{EngineError, FallbackEngine, FallbackOptions, TurnPolicy};
use pixtrace_core::PixelBuffer;
use pixtrace_core::preprocess::is_black;
use pixtrace_export::{PathPoint, RenderStyle, Shape, to_svg};

use crate::geometry;

/// Simplification slack that removes single-pixel stair steps, added to
/// the configured curve tolerance.
pub const STAIRCASE_TOLERANCE: f64 = 0.5;

/// Decimal places kept in fallback coordinates.
pub const PRECISION: u32 = 3;

/// The bundled fallback engine.
#[derive(Debug, Default)]
pub struct OutlineEngine {
    initialized: bool,
}

impl OutlineEngine {
    /// An engine that initializes on first use.
    #[must_use]
    pub const fn new() -> Self {
        Self { initialized: false }
    }
}

impl FallbackEngine for OutlineEngine {
    fn init(&mut self) -> Result<(), EngineError> {
        if !self.initialized {
            log::debug!("outline engine initialized");
            self.initialized = true;
        }
        Ok(())
    }

    fn trace(&mut self, image: &PixelBuffer, options: &FallbackOptions) -> Result<String, EngineError> {
        if !self.initialized {
            return Err(EngineError::Unavailable(String::from(
                "outline engine used before init",
            )));
        }
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::Failed(format!(
                "cannot trace an empty {width}x{height} image"
            )));
        }

        let corner_degrees = options.alpha_max * 90.0;
        let tolerance = STAIRCASE_TOLERANCE + options.curve_tolerance;
        let loops = trace_loops(image, options.turn_policy);
        let subpaths: Vec<_> = loops
            .iter()
            .filter(|l| geometry::signed_area(l).abs() >= f64::from(options.min_feature_size))
            .filter_map(|l| {
                let simplified = geometry::simplify_closed(&geometry::drop_collinear(l), tolerance);
                geometry::smooth(&simplified, corner_degrees)
            })
            .collect();
        log::debug!(
            "outline engine: {} of {} loop(s) kept in {width}x{height}",
            subpaths.len(),
            loops.len()
        );

        // Binary input only has one ink color, so output is monochrome
        // whatever `options.monochrome` says.
        let style = RenderStyle {
            precision: PRECISION,
            ..RenderStyle::default()
        };
        let shapes = if subpaths.is_empty() {
            Vec::new()
        } else {
            vec![Shape { subpaths }]
        };
        Ok(to_svg(&shapes, width, height, &style))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    East,
    South,
    West,
    North,
}

impl Dir {
    const ALL: [Self; 4] = [Self::East, Self::South, Self::West, Self::North];

    const fn bit(self) -> u8 {
        match self {
            Self::East => 1,
            Self::South => 2,
            Self::West => 4,
            Self::North => 8,
        }
    }

    /// Right turn on screen.
    const fn clockwise(self) -> Self {
        match self {
            Self::East => Self::South,
            Self::South => Self::West,
            Self::West => Self::North,
            Self::North => Self::East,
        }
    }

    /// Left turn on screen.
    const fn counter_clockwise(self) -> Self {
        match self {
            Self::East => Self::North,
            Self::North => Self::West,
            Self::West => Self::South,
            Self::South => Self::East,
        }
    }

    const fn step(self, (x, y): (usize, usize)) -> (usize, usize) {
        match self {
            Self::East => (x + 1, y),
            Self::South => (x, y + 1),
            Self::West => (x.wrapping_sub(1), y),
            Self::North => (x, y.wrapping_sub(1)),
        }
    }
}

/// Directed border edges, indexed by their start vertex on the
/// `(width + 1) × (height + 1)` pixel-corner grid.
struct EdgeGrid<'a> {
    image: &'a PixelBuffer,
    stride: usize,
    outgoing: Vec<u8>,
    visited: Vec<u8>,
    policy: TurnPolicy,
}

impl<'a> EdgeGrid<'a> {
    fn new(image: &'a PixelBuffer, policy: TurnPolicy) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut outgoing = vec![0u8; stride * (height as usize + 1)];
        let mut grid = Self {
            image,
            stride,
            outgoing: Vec::new(),
            visited: vec![0u8; outgoing.len()],
            policy,
        };
        for y in 0..height as usize {
            for x in 0..width as usize {
                if !grid.black(x, y) {
                    continue;
                }
                if !grid.black_offset(x, y, 0, -1) {
                    outgoing[y * stride + x] |= Dir::East.bit();
                }
                if !grid.black_offset(x, y, 1, 0) {
                    outgoing[y * stride + x + 1] |= Dir::South.bit();
                }
                if !grid.black_offset(x, y, 0, 1) {
                    outgoing[(y + 1) * stride + x + 1] |= Dir::West.bit();
                }
                if !grid.black_offset(x, y, -1, 0) {
                    outgoing[(y + 1) * stride + x] |= Dir::North.bit();
                }
            }
        }
        grid.outgoing = outgoing;
        grid
    }

    fn black(&self, x: usize, y: usize) -> bool {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) if x < self.image.width() && y < self.image.height() => {
                is_black(self.image, x, y)
            }
            _ => false,
        }
    }

    fn black_offset(&self, x: usize, y: usize, dx: isize, dy: isize) -> bool {
        match (x.checked_add_signed(dx), y.checked_add_signed(dy)) {
            (Some(x), Some(y)) => self.black(x, y),
            _ => false,
        }
    }

    const fn index(&self, (x, y): (usize, usize)) -> usize {
        y * self.stride + x
    }

    /// Outgoing direction after arriving at `vertex` heading `incoming`.
    fn next(&self, vertex: (usize, usize), incoming: Dir) -> Option<Dir> {
        let outgoing = self.outgoing[self.index(vertex)];
        if outgoing.count_ones() == 1 {
            return Dir::ALL.into_iter().find(|d| outgoing & d.bit() != 0);
        }
        let turn = if self.connects_black(vertex) {
            incoming.counter_clockwise()
        } else {
            incoming.clockwise()
        };
        (outgoing & turn.bit() != 0).then_some(turn)
    }

    /// Whether a saddle at `vertex` joins its two diagonal black pixels.
    fn connects_black(&self, vertex: (usize, usize)) -> bool {
        match self.policy {
            TurnPolicy::Black => true,
            TurnPolicy::White => false,
            TurnPolicy::Majority => self.black_is_majority(vertex),
            TurnPolicy::Minority => !self.black_is_majority(vertex),
        }
    }

    /// Compare black and white pixels in growing squares around a
    /// pixel corner; ties at every radius count as white majority.
    fn black_is_majority(&self, (vx, vy): (usize, usize)) -> bool {
        for radius in 2..=4_isize {
            let mut balance = 0_i32;
            for dy in -radius..radius {
                for dx in -radius..radius {
                    if self.black_offset(vx, vy, dx, dy) {
                        balance += 1;
                    } else {
                        balance -= 1;
                    }
                }
            }
            if balance != 0 {
                return balance > 0;
            }
        }
        false
    }

    fn take_loop(&mut self, start: (usize, usize), first: Dir) -> Vec<PathPoint> {
        let mut points = Vec::new();
        let (mut vertex, mut dir) = (start, first);
        loop {
            let index = self.index(vertex);
            self.visited[index] |= dir.bit();
            points.push(corner(vertex));
            vertex = dir.step(vertex);
            match self.next(vertex, dir) {
                Some(next) if self.visited[self.index(vertex)] & next.bit() == 0 => dir = next,
                _ => return points,
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn corner((x, y): (usize, usize)) -> PathPoint {
    PathPoint::new(x as f64, y as f64)
}

/// Every closed border loop of the black pixels, as pixel-corner
/// vertices.
fn trace_loops(image: &PixelBuffer, policy: TurnPolicy) -> Vec<Vec<PathPoint>> {
    let mut grid = EdgeGrid::new(image, policy);
    let mut loops = Vec::new();
    for index in 0..grid.outgoing.len() {
        for dir in Dir::ALL {
            let pending = grid.outgoing[index] & !grid.visited[index];
            if pending & dir.bit() != 0 {
                let vertex = (index % grid.stride, index / grid.stride);
                loops.push(grid.take_loop(vertex, dir));
            }
        }
    }
    loops
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use pixtrace_core::TraceOptions;

    fn canvas(width: u32, height: u32, black: &[(u32, u32)]) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if black.contains(&(x, y)) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    fn block(x0: u32, y0: u32, side: u32) -> Vec<(u32, u32)> {
        (y0..y0 + side)
            .flat_map(|y| (x0..x0 + side).map(move |x| (x, y)))
            .collect()
    }

    fn trace(image: &RgbaImage, options: &FallbackOptions) -> String {
        let mut engine = OutlineEngine::new();
        engine.init().unwrap();
        engine.trace(image, options).unwrap()
    }

    fn options(min_feature_size: u32, turn_policy: TurnPolicy) -> FallbackOptions {
        FallbackOptions {
            min_feature_size,
            turn_policy,
            ..FallbackOptions::new(&TraceOptions::default())
        }
    }

    #[test]
    fn square_keeps_exact_corners() {
        let image = canvas(20, 20, &block(5, 5, 10));
        let markup = trace(&image, &options(0, TurnPolicy::Minority));
        assert!(markup.contains(r#"d="M5,5 L15,5 L15,15 L5,15 z""#), "{markup}");
        assert!(markup.contains(r#"viewBox="0 0 20 20""#));
    }

    #[test]
    fn loop_area_counts_enclosed_pixels() {
        let image = canvas(8, 8, &block(1, 1, 3));
        let loops = trace_loops(&image, TurnPolicy::Minority);
        assert_eq!(loops.len(), 1);
        assert!((geometry::signed_area(&loops[0]) - 9.0).abs() < 1e-9);
    }

    #[test]
    fn holes_run_the_other_way() {
        let mut black = block(2, 2, 10);
        black.retain(|&(x, y)| !(5..9).contains(&x) || !(5..9).contains(&y));
        let image = canvas(14, 14, &black);
        let loops = trace_loops(&image, TurnPolicy::Minority);
        assert_eq!(loops.len(), 2);
        let mut areas: Vec<f64> = loops.iter().map(|l| geometry::signed_area(l)).collect();
        areas.sort_by(f64::total_cmp);
        assert!((areas[0] + 16.0).abs() < 1e-9);
        assert!((areas[1] - 100.0).abs() < 1e-9);

        let markup = trace(&image, &options(0, TurnPolicy::Minority));
        assert_eq!(markup.matches("<path").count(), 1);
        assert!(markup.contains(r#"fill-rule="evenodd""#));
    }

    #[test]
    fn small_features_are_dropped() {
        let mut black = block(1, 1, 6);
        black.extend(block(12, 12, 2));
        let image = canvas(16, 16, &black);
        let kept = trace(&image, &options(0, TurnPolicy::Minority));
        let filtered = trace(&image, &options(5, TurnPolicy::Minority));
        assert_eq!(kept.matches('M').count(), 2);
        assert_eq!(filtered.matches('M').count(), 1);
    }

    #[test]
    fn turn_policy_decides_diagonal_contact() {
        let image = canvas(8, 8, &[(3, 3), (4, 4)]);
        assert_eq!(trace_loops(&image, TurnPolicy::Black).len(), 1);
        assert_eq!(trace_loops(&image, TurnPolicy::White).len(), 2);
        // Black is the local minority on a white canvas.
        assert_eq!(trace_loops(&image, TurnPolicy::Minority).len(), 1);
        assert_eq!(trace_loops(&image, TurnPolicy::Majority).len(), 2);
    }

    #[test]
    fn blank_image_has_no_paths() {
        let markup = trace(&canvas(6, 6, &[]), &options(0, TurnPolicy::Minority));
        assert!(markup.contains("<svg"));
        assert!(!markup.contains("<path"));
    }

    #[test]
    fn trace_requires_init() {
        let result = OutlineEngine::new().trace(&canvas(4, 4, &[]), &options(0, TurnPolicy::Black));
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }
}
