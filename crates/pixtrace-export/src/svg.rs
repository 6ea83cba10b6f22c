//! SVG rendering of traced outlines.
//!
//! Converts closed outlines into an SVG string using the [`svg`] crate
//! for document construction and path data formatting. Each [`Shape`]
//! becomes one `<path>` element whose subpaths are filled with the
//! `evenodd` rule, so holes nested inside an outer border cut through
//! the fill.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Path, Rectangle};
use svg::node::Value;

/// A point in traced pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl PathPoint {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One drawing command following the current point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    /// Straight line to a point.
    Line(PathPoint),
    /// Quadratic Bézier curve.
    Quadratic {
        /// Control point.
        control: PathPoint,
        /// End point.
        to: PathPoint,
    },
    /// Cubic Bézier curve.
    Cubic {
        /// First control point.
        control1: PathPoint,
        /// Second control point.
        control2: PathPoint,
        /// End point.
        to: PathPoint,
    },
}

/// A closed outline: a start point followed by segments, implicitly
/// closed back to the start.
#[derive(Debug, Clone, PartialEq)]
pub struct Subpath {
    /// Where the outline begins.
    pub start: PathPoint,
    /// Drawing commands in order.
    pub segments: Vec<Segment>,
}

/// A filled region: one outer outline plus any holes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shape {
    /// Outlines of this region, outer border first.
    pub subpaths: Vec<Subpath>,
}

/// Render settings shared by every shape in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStyle {
    /// Fill color for every path.
    pub fill: String,
    /// Optional full-document background fill. `None` leaves the
    /// background transparent.
    pub background: Option<String>,
    /// Uniform scale applied to every coordinate and to the document size.
    pub scale: f64,
    /// Number of decimal places kept in path coordinates.
    pub precision: u32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            fill: String::from("#000000"),
            background: None,
            scale: 1.0,
            precision: 8,
        }
    }
}

/// Round a coordinate to `precision` decimal places after scaling.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn quantize(value: f64, scale: f64, precision: u32) -> f32 {
    let factor = 10f64.powi(precision.min(10) as i32);
    ((value * scale * factor).round() / factor) as f32
}

/// Build the SVG `d` attribute for a shape.
///
/// Each subpath is emitted as `M`, then `L`/`Q`/`C` commands, then `Z`.
/// Subpaths without segments are skipped.
///
/// # Examples
///
/// ```
/// use pixtrace_export::{PathPoint, Segment, Shape, Subpath};
/// use pixtrace_export::svg::build_path_data;
///
/// let shape = Shape {
///     subpaths: vec![Subpath {
///         start: PathPoint::new(0.0, 0.0),
///         segments: vec![
///             Segment::Line(PathPoint::new(4.0, 0.0)),
///             Segment::Line(PathPoint::new(4.0, 3.0)),
///         ],
///     }],
/// };
/// assert_eq!(build_path_data(&shape, 1.0, 2), "M0,0 L4,0 L4,3 z");
/// ```
#[must_use]
pub fn build_path_data(shape: &Shape, scale: f64, precision: u32) -> String {
    let q = |p: PathPoint| vec![quantize(p.x, scale, precision), quantize(p.y, scale, precision)];

    let mut data = Data::new();
    for subpath in shape.subpaths.iter().filter(|s| !s.segments.is_empty()) {
        data = data.move_to(q(subpath.start));
        for segment in &subpath.segments {
            data = match *segment {
                Segment::Line(to) => data.line_to(q(to)),
                Segment::Quadratic { control, to } => {
                    data.quadratic_curve_to([q(control), q(to)].concat())
                }
                Segment::Cubic {
                    control1,
                    control2,
                    to,
                } => data.cubic_curve_to([q(control1), q(control2), q(to)].concat()),
            };
        }
        data = data.close();
    }
    String::from(Value::from(data))
}

/// Serialize shapes to a complete SVG document.
///
/// The document size and `viewBox` are the traced pixel dimensions
/// multiplied by `style.scale`. Shapes whose path data is empty are
/// omitted.
#[must_use]
pub fn to_svg(shapes: &[Shape], width: u32, height: u32, style: &RenderStyle) -> String {
    let w = f64::from(width) * style.scale;
    let h = f64::from(height) * style.scale;
    let mut doc = Document::new()
        .set("width", w.to_string())
        .set("height", h.to_string())
        .set("viewBox", format!("0 0 {w} {h}"));

    if let Some(background) = &style.background {
        doc = doc.add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", w.to_string())
                .set("height", h.to_string())
                .set("fill", background.as_str()),
        );
    }

    for shape in shapes {
        let d = build_path_data(shape, style.scale, style.precision);
        if d.is_empty() {
            continue;
        }
        doc = doc.add(
            Path::new()
                .set("d", d)
                .set("fill", style.fill.as_str())
                .set("fill-rule", "evenodd"),
        );
    }

    doc.to_string()
}
