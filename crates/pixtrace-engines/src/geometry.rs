//! Outline geometry shared by both engines: closed-loop simplification,
//! corner detection and curve construction.

use pixtrace_export::{PathPoint, Segment, Subpath};

/// Slack for comparing angles computed through `atan2`.
const ANGLE_EPSILON: f64 = 1e-9;

/// Signed area of a closed polygon (shoelace). Positive for loops that
/// run clockwise on screen (y pointing down).
#[must_use]
pub fn signed_area(points: &[PathPoint]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        twice += a.x.mul_add(b.y, -(b.x * a.y));
    }
    twice / 2.0
}

/// Drop vertices that continue straight along the previous edge.
#[must_use]
pub fn drop_collinear(points: &[PathPoint]) -> Vec<PathPoint> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let kept: Vec<PathPoint> = (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            cross(prev, points[i], next).abs() > f64::EPSILON
        })
        .map(|i| points[i])
        .collect();
    if kept.len() < 3 { points.to_vec() } else { kept }
}

/// Simplify a closed loop with Ramer-Douglas-Peucker.
///
/// The loop is split at the vertex farthest from the first one and each
/// half is simplified as an open polyline, so the result never loses
/// the loop's extent. Loops that would collapse below a triangle are
/// returned unchanged.
#[must_use]
pub fn simplify_closed(points: &[PathPoint], tolerance: f64) -> Vec<PathPoint> {
    let n = points.len();
    if n < 4 {
        return points.to_vec();
    }
    let far = (1..n)
        .max_by(|&a, &b| {
            distance_sq(points[0], points[a]).total_cmp(&distance_sq(points[0], points[b]))
        })
        .unwrap_or(n / 2);

    let mut kept = vec![false; n + 1];
    kept[0] = true;
    kept[far] = true;
    kept[n] = true;
    let mut ring = points.to_vec();
    ring.push(points[0]);
    rdp(&ring, 0, far, tolerance, &mut kept);
    rdp(&ring, far, n, tolerance, &mut kept);

    let simplified: Vec<PathPoint> = ring
        .iter()
        .zip(&kept)
        .take(n)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect();
    if simplified.len() < 3 { points.to_vec() } else { simplified }
}

fn rdp(points: &[PathPoint], start: usize, end: usize, tolerance: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }
    let mut max_dist = 0.0;
    let mut max_idx = start;
    for i in (start + 1)..end {
        let d = perpendicular_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }
    if max_dist > tolerance {
        kept[max_idx] = true;
        rdp(points, start, max_idx, tolerance, kept);
        rdp(points, max_idx, end, tolerance, kept);
    }
}

fn perpendicular_distance(p: PathPoint, a: PathPoint, b: PathPoint) -> f64 {
    let length_sq = distance_sq(a, b);
    if length_sq == 0.0 {
        return distance_sq(p, a).sqrt();
    }
    cross(a, b, p).abs() / length_sq.sqrt()
}

fn distance_sq(a: PathPoint, b: PathPoint) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    dx.mul_add(dx, dy * dy)
}

/// z-component of `(b - a) × (c - b)`.
fn cross(a: PathPoint, b: PathPoint, c: PathPoint) -> f64 {
    (b.x - a.x).mul_add(c.y - b.y, -((b.y - a.y) * (c.x - b.x)))
}

/// Absolute turning angle at `vertex` in degrees: 0 for straight on,
/// 180 for a full reversal.
#[must_use]
pub fn turn_degrees(prev: PathPoint, vertex: PathPoint, next: PathPoint) -> f64 {
    let (ax, ay) = (vertex.x - prev.x, vertex.y - prev.y);
    let (bx, by) = (next.x - vertex.x, next.y - vertex.y);
    let dot = ax.mul_add(bx, ay * by);
    let det = ax.mul_add(by, -(ay * bx));
    det.atan2(dot).abs().to_degrees()
}

/// Merge vertices closer than `min_length` to the previously kept one,
/// as long as at least three vertices remain.
#[must_use]
pub fn merge_short_edges(points: &[PathPoint], min_length: f64) -> Vec<PathPoint> {
    let Some(&first) = points.first() else {
        return Vec::new();
    };
    let min_sq = min_length * min_length;
    let mut merged = vec![first];
    for &p in &points[1..] {
        if merged.last().is_some_and(|&last| distance_sq(last, p) >= min_sq) {
            merged.push(p);
        }
    }
    if merged.len() < 3 { points.to_vec() } else { merged }
}

/// Straight-edged subpath through `points`.
#[must_use]
pub fn polygon(points: &[PathPoint]) -> Option<Subpath> {
    let (&start, rest) = points.split_first()?;
    if rest.is_empty() {
        return None;
    }
    Some(Subpath {
        start,
        segments: rest.iter().map(|&p| Segment::Line(p)).collect(),
    })
}

/// Smooth a closed polygon: vertices turning at least `corner_degrees`
/// stay sharp, every other vertex becomes the control point of a
/// quadratic curve between the midpoints of its two edges.
#[must_use]
pub fn smooth(points: &[PathPoint], corner_degrees: f64) -> Option<Subpath> {
    let n = points.len();
    if n < 3 {
        return polygon(points);
    }
    let at = |i: usize| points[i % n];
    let mid = |a: PathPoint, b: PathPoint| PathPoint::new(f64::midpoint(a.x, b.x), f64::midpoint(a.y, b.y));
    let corner = sharp_vertices(points, corner_degrees);

    let (start, first) = corner
        .iter()
        .position(|&c| c)
        .map_or_else(|| (mid(at(0), at(1)), 1), |i| (at(i), i + 1));
    let last = if corner[first - 1] { first - 1 + n } else { first + n };

    let segments = (first..last)
        .map(|i| {
            if corner[i % n] {
                Segment::Line(at(i))
            } else {
                Segment::Quadratic {
                    control: at(i),
                    to: mid(at(i), at(i + 1)),
                }
            }
        })
        .collect();
    Some(Subpath { start, segments })
}

/// Which vertices of a closed polygon turn at least `degrees`.
#[must_use]
pub fn sharp_vertices(points: &[PathPoint], degrees: f64) -> Vec<bool> {
    let n = points.len();
    (0..n)
        .map(|i| {
            let turn = turn_degrees(points[(i + n - 1) % n], points[i], points[(i + 1) % n]);
            turn + ANGLE_EPSILON >= degrees
        })
        .collect()
}

/// Largest vertex movement at which relaxation is considered settled.
const RELAX_SETTLED: f64 = 0.05;

/// Laplacian relaxation: up to `iterations` passes, each moving every
/// unpinned vertex halfway toward the midpoint of its neighbours.
/// Stops early once no vertex moves more than a twentieth of a pixel.
#[must_use]
pub fn relax(points: &[PathPoint], pinned: &[bool], iterations: u32) -> Vec<PathPoint> {
    let n = points.len();
    let mut current = points.to_vec();
    if n < 4 {
        return current;
    }
    for _ in 0..iterations {
        let previous = current.clone();
        let mut moved: f64 = 0.0;
        for i in (0..n).filter(|&i| !pinned.get(i).copied().unwrap_or(true)) {
            let prev = previous[(i + n - 1) % n];
            let next = previous[(i + 1) % n];
            let target = PathPoint::new(
                f64::midpoint(previous[i].x, f64::midpoint(prev.x, next.x)),
                f64::midpoint(previous[i].y, f64::midpoint(prev.y, next.y)),
            );
            moved = moved.max(distance_sq(previous[i], target).sqrt());
            current[i] = target;
        }
        if moved < RELAX_SETTLED {
            break;
        }
    }
    current
}

/// Closed Catmull-Rom spline through `points` as cubic Béziers.
///
/// Edges between two `corners` stay straight; at a single corner the
/// tangent follows the edge so the corner stays sharp.
#[must_use]
pub fn catmull_rom(points: &[PathPoint], corners: &[bool]) -> Option<Subpath> {
    let n = points.len();
    if n < 3 {
        return polygon(points);
    }
    let at = |i: usize| points[i % n];
    let is_corner = |i: usize| corners.get(i % n).copied().unwrap_or(true);
    let offset = |p: PathPoint, from: PathPoint, to: PathPoint, k: f64| {
        PathPoint::new((to.x - from.x).mul_add(k, p.x), (to.y - from.y).mul_add(k, p.y))
    };

    let segments = (0..n)
        .map(|i| {
            let (p0, p1, p2, p3) = (at(i + n - 1), at(i), at(i + 1), at(i + 2));
            match (is_corner(i), is_corner(i + 1)) {
                (true, true) => Segment::Line(p2),
                (start_sharp, end_sharp) => Segment::Cubic {
                    control1: if start_sharp {
                        offset(p1, p1, p2, 1.0 / 3.0)
                    } else {
                        offset(p1, p0, p2, 1.0 / 6.0)
                    },
                    control2: if end_sharp {
                        offset(p2, p2, p1, 1.0 / 3.0)
                    } else {
                        offset(p2, p3, p1, 1.0 / 6.0)
                    },
                    to: p2,
                },
            }
        })
        .collect();
    Some(Subpath {
        start: at(0),
        segments,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn square(side: f64) -> Vec<PathPoint> {
        vec![
            PathPoint::new(0.0, 0.0),
            PathPoint::new(side, 0.0),
            PathPoint::new(side, side),
            PathPoint::new(0.0, side),
        ]
    }

    #[test]
    fn clockwise_square_has_positive_area() {
        assert!((signed_area(&square(3.0)) - 9.0).abs() < 1e-9);
        let mut ccw = square(3.0);
        ccw.reverse();
        assert!((signed_area(&ccw) + 9.0).abs() < 1e-9);
    }

    #[test]
    fn collinear_vertices_are_dropped() {
        let points = vec![
            PathPoint::new(0.0, 0.0),
            PathPoint::new(1.0, 0.0),
            PathPoint::new(2.0, 0.0),
            PathPoint::new(2.0, 2.0),
            PathPoint::new(0.0, 2.0),
        ];
        assert_eq!(drop_collinear(&points).len(), 4);
    }

    #[test]
    fn simplification_keeps_square_corners() {
        let mut points = Vec::new();
        for i in 0..10 {
            points.push(PathPoint::new(f64::from(i), 0.0));
        }
        for i in 0..10 {
            points.push(PathPoint::new(10.0, f64::from(i)));
        }
        for i in 0..10 {
            points.push(PathPoint::new(10.0 - f64::from(i), 10.0));
        }
        for i in 0..10 {
            points.push(PathPoint::new(0.0, 10.0 - f64::from(i)));
        }
        let simplified = simplify_closed(&points, 0.5);
        assert_eq!(simplified.len(), 4);
        assert!((signed_area(&simplified) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn right_angle_turns_ninety_degrees() {
        let p = square(1.0);
        assert!((turn_degrees(p[0], p[1], p[2]) - 90.0).abs() < 1e-9);
        let straight = turn_degrees(
            PathPoint::new(0.0, 0.0),
            PathPoint::new(1.0, 0.0),
            PathPoint::new(2.0, 0.0),
        );
        assert!(straight.abs() < 1e-9);
    }

    #[test]
    fn sharp_polygon_stays_straight() {
        let subpath = smooth(&square(4.0), 60.0).unwrap();
        assert_eq!(subpath.start, PathPoint::new(0.0, 0.0));
        assert_eq!(subpath.segments.len(), 3);
        assert!(subpath.segments.iter().all(|s| matches!(s, Segment::Line(_))));
    }

    #[test]
    fn gentle_polygon_becomes_curves() {
        // 90 degree turns are below a 120 degree corner threshold.
        let subpath = smooth(&square(4.0), 120.0).unwrap();
        assert_eq!(subpath.start, PathPoint::new(2.0, 0.0));
        assert_eq!(subpath.segments.len(), 4);
        assert_eq!(
            subpath.segments.last(),
            Some(&Segment::Quadratic {
                control: PathPoint::new(0.0, 0.0),
                to: PathPoint::new(2.0, 0.0),
            })
        );
    }

    #[test]
    fn relaxation_leaves_pinned_vertices_alone() {
        let points = vec![
            PathPoint::new(0.0, 0.0),
            PathPoint::new(5.0, 3.0),
            PathPoint::new(10.0, 0.0),
            PathPoint::new(10.0, 10.0),
            PathPoint::new(0.0, 10.0),
        ];
        let pinned = [true, false, true, true, true];
        let relaxed = relax(&points, &pinned, 10);
        assert_eq!(relaxed[0], points[0]);
        assert_eq!(relaxed[2..], points[2..]);
        // The bump flattens toward the edge it interrupts.
        assert!(relaxed[1].y < 1.0);
        assert!((relaxed[1].x - 5.0).abs() < 1e-9);

        let untouched = relax(&points, &pinned, 0);
        assert_eq!(untouched, points);
    }

    #[test]
    fn catmull_rom_keeps_corner_edges_straight() {
        let corners = sharp_vertices(&square(4.0), 60.0);
        assert_eq!(corners, vec![true; 4]);
        let subpath = catmull_rom(&square(4.0), &corners).unwrap();
        assert!(subpath.segments.iter().all(|s| matches!(s, Segment::Line(_))));

        let smooth = catmull_rom(&square(4.0), &[false; 4]).unwrap();
        assert_eq!(smooth.segments.len(), 4);
        let Segment::Cubic {
            control1,
            control2,
            to,
        } = smooth.segments[0]
        else {
            panic!("expected a cubic, got {:?}", smooth.segments[0]);
        };
        let near = |p: PathPoint, x: f64, y: f64| (p.x - x).abs() < 1e-9 && (p.y - y).abs() < 1e-9;
        assert!(near(control1, 2.0 / 3.0, -2.0 / 3.0), "{control1:?}");
        assert!(near(control2, 4.0 - 2.0 / 3.0, -2.0 / 3.0), "{control2:?}");
        assert_eq!(to, PathPoint::new(4.0, 0.0));
    }

    #[test]
    fn short_edges_merge_but_keep_a_triangle() {
        let points = vec![
            PathPoint::new(0.0, 0.0),
            PathPoint::new(0.5, 0.0),
            PathPoint::new(10.0, 0.0),
            PathPoint::new(10.0, 10.0),
        ];
        assert_eq!(merge_short_edges(&points, 4.0).len(), 3);
        assert_eq!(merge_short_edges(&points[..3], 40.0).len(), 3);
    }
}
