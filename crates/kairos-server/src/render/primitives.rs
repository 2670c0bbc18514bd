//! Primitive tessellation: plain shapes into textured-triangle geometry.
//!
//! Everything the batcher submits is indexed triangles sampling a texture;
//! plain primitives sample the 1×1 white texture at UV (0,0) so they batch
//! with each other. Outlines tessellate as thickness-parameterized ribbons
//! rather than GL line primitives, which keeps the GPU interface down to a
//! single draw path.

use kairos_proto::types::{Color, Point, TexturedVertex};

pub struct Mesh {
    pub vertices: Vec<TexturedVertex>,
    pub indices: Vec<u16>,
}

impl Mesh {
    fn with_capacity(vertices: usize, indices: usize) -> Self {
        Self { vertices: Vec::with_capacity(vertices), indices: Vec::with_capacity(indices) }
    }

    fn push_quad(&mut self, corners: [Point; 4], color: u32) {
        let base = self.vertices.len() as u16;
        for c in corners {
            self.vertices.push(TexturedVertex::new(c.x, c.y, 0.0, 0.0, color));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// A point renders as a small size-parameterized quad.
pub fn tessellate_point(position: Point, size: f32, color: Color) -> Mesh {
    let h = size.max(1.0) * 0.5;
    let mut mesh = Mesh::with_capacity(4, 6);
    mesh.push_quad(
        [
            Point::new(position.x - h, position.y - h),
            Point::new(position.x + h, position.y - h),
            Point::new(position.x + h, position.y + h),
            Point::new(position.x - h, position.y + h),
        ],
        color.packed(),
    );
    mesh
}

/// A line renders as a thickness-parameterized ribbon (two triangles).
/// Zero-length lines degrade to a point quad instead of degenerate
/// geometry.
pub fn tessellate_line(start: Point, end: Point, thickness: f32, color: Color) -> Mesh {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length = (dx * dx + dy * dy).sqrt();

    if length < 0.001 {
        return tessellate_point(start, thickness, color);
    }

    let half = thickness.max(1.0) * 0.5;
    let nx = -dy / length * half;
    let ny = dx / length * half;

    let mut mesh = Mesh::with_capacity(4, 6);
    mesh.push_quad(
        [
            Point::new(start.x - nx, start.y - ny),
            Point::new(start.x + nx, start.y + ny),
            Point::new(end.x + nx, end.y + ny),
            Point::new(end.x - nx, end.y - ny),
        ],
        color.packed(),
    );
    mesh
}

pub fn tessellate_rectangle(
    position: Point,
    width: f32,
    height: f32,
    color: Color,
    filled: bool,
) -> Mesh {
    if filled {
        let mut mesh = Mesh::with_capacity(4, 6);
        mesh.push_quad(
            [
                position,
                Point::new(position.x + width, position.y),
                Point::new(position.x + width, position.y + height),
                Point::new(position.x, position.y + height),
            ],
            color.packed(),
        );
        mesh
    } else {
        let corners = [
            position,
            Point::new(position.x + width, position.y),
            Point::new(position.x + width, position.y + height),
            Point::new(position.x, position.y + height),
        ];
        ribbon_strip(&corners, 1.0, color, true)
    }
}

fn circle_segments(radius: f32) -> usize {
    (radius * 0.5).max(12.0) as usize
}

fn arc_segments(range_rad: f32) -> usize {
    ((range_rad * 16.0 / std::f32::consts::TAU) as usize).max(4)
}

pub fn tessellate_circle(center: Point, radius: f32, color: Color, filled: bool) -> Mesh {
    let segments = circle_segments(radius);
    let ring: Vec<Point> = (0..segments)
        .map(|i| {
            let angle = std::f32::consts::TAU * i as f32 / segments as f32;
            Point::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect();

    if filled {
        fan_from_center(center, &ring, color, true)
    } else {
        ribbon_strip(&ring, 1.0, color, true)
    }
}

/// Elliptical arc. Angles in degrees; the sweep is normalized positive.
pub fn tessellate_arc(
    center: Point,
    radius_x: f32,
    radius_y: f32,
    start_deg: f32,
    end_deg: f32,
    color: Color,
    filled: bool,
) -> Mesh {
    let start = start_deg.to_radians();
    let mut end = end_deg.to_radians();
    while end < start {
        end += std::f32::consts::TAU;
    }
    let range = end - start;
    let segments = arc_segments(range);

    let pts: Vec<Point> = (0..=segments)
        .map(|i| {
            let angle = start + range * i as f32 / segments as f32;
            Point::new(center.x + radius_x * angle.cos(), center.y + radius_y * angle.sin())
        })
        .collect();

    if filled {
        fan_from_center(center, &pts, color, false)
    } else {
        ribbon_strip(&pts, 1.0, color, false)
    }
}

/// Convex polygon. Filled polygons fan-triangulate from the first vertex;
/// concave input produces overlap artifacts rather than an error, matching
/// immediate-mode expectations.
pub fn tessellate_polygon(points: &[Point], color: Color, filled: bool) -> Mesh {
    if points.len() < 3 {
        return Mesh::with_capacity(0, 0);
    }

    if !filled {
        return ribbon_strip(points, 1.0, color, true);
    }

    let packed = color.packed();
    let mut mesh = Mesh::with_capacity(points.len(), (points.len() - 2) * 3);
    for p in points {
        mesh.vertices.push(TexturedVertex::new(p.x, p.y, 0.0, 0.0, packed));
    }
    for i in 1..points.len() - 1 {
        mesh.indices.extend_from_slice(&[0, i as u16, i as u16 + 1]);
    }
    mesh
}

/// Quadratic Bézier sampled into a ribbon strip.
pub fn tessellate_bezier_quadratic(
    start: Point,
    control: Point,
    end: Point,
    thickness: f32,
    color: Color,
    segments: usize,
) -> Mesh {
    let pts = sample_bezier_quadratic(start, control, end, segments);
    ribbon_strip(&pts, thickness, color, false)
}

/// Cubic Bézier sampled into a ribbon strip.
pub fn tessellate_bezier_cubic(
    start: Point,
    control1: Point,
    control2: Point,
    end: Point,
    thickness: f32,
    color: Color,
    segments: usize,
) -> Mesh {
    let pts = sample_bezier_cubic(start, control1, control2, end, segments);
    ribbon_strip(&pts, thickness, color, false)
}

/// Catmull-Rom spline through `points`, sampled piecewise.
pub fn tessellate_spline(
    points: &[Point],
    thickness: f32,
    color: Color,
    samples_per_span: usize,
) -> Mesh {
    let pts = sample_catmull_rom(points, samples_per_span);
    ribbon_strip(&pts, thickness, color, false)
}

pub fn sample_bezier_quadratic(p0: Point, p1: Point, p2: Point, segments: usize) -> Vec<Point> {
    let n = segments.max(1);
    (0..=n)
        .map(|i| {
            let t = i as f32 / n as f32;
            let mt = 1.0 - t;
            Point::new(
                mt * mt * p0.x + 2.0 * mt * t * p1.x + t * t * p2.x,
                mt * mt * p0.y + 2.0 * mt * t * p1.y + t * t * p2.y,
            )
        })
        .collect()
}

pub fn sample_bezier_cubic(p0: Point, p1: Point, p2: Point, p3: Point, segments: usize) -> Vec<Point> {
    let n = segments.max(1);
    (0..=n)
        .map(|i| {
            let t = i as f32 / n as f32;
            let mt = 1.0 - t;
            let a = mt * mt * mt;
            let b = 3.0 * mt * mt * t;
            let c = 3.0 * mt * t * t;
            let d = t * t * t;
            Point::new(
                a * p0.x + b * p1.x + c * p2.x + d * p3.x,
                a * p0.y + b * p1.y + c * p2.y + d * p3.y,
            )
        })
        .collect()
}

/// Piecewise Catmull-Rom through the control points, endpoints doubled.
pub fn sample_catmull_rom(points: &[Point], samples_per_span: usize) -> Vec<Point> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let n = samples_per_span.max(1);
    let mut out = Vec::with_capacity((points.len() - 1) * n + 1);

    let at = |i: isize| -> Point {
        let idx = i.clamp(0, points.len() as isize - 1) as usize;
        points[idx]
    };

    out.push(points[0]);
    for span in 0..points.len() - 1 {
        let p0 = at(span as isize - 1);
        let p1 = at(span as isize);
        let p2 = at(span as isize + 1);
        let p3 = at(span as isize + 2);

        for i in 1..=n {
            let t = i as f32 / n as f32;
            let t2 = t * t;
            let t3 = t2 * t;
            out.push(Point::new(
                0.5 * ((2.0 * p1.x)
                    + (-p0.x + p2.x) * t
                    + (2.0 * p0.x - 5.0 * p1.x + 4.0 * p2.x - p3.x) * t2
                    + (-p0.x + 3.0 * p1.x - 3.0 * p2.x + p3.x) * t3),
                0.5 * ((2.0 * p1.y)
                    + (-p0.y + p2.y) * t
                    + (2.0 * p0.y - 5.0 * p1.y + 4.0 * p2.y - p3.y) * t2
                    + (-p0.y + 3.0 * p1.y - 3.0 * p2.y + p3.y) * t3),
            ));
        }
    }
    out
}

/// Center-fan triangulation for filled circles and arcs.
fn fan_from_center(center: Point, rim: &[Point], color: Color, closed: bool) -> Mesh {
    let packed = color.packed();
    let mut mesh = Mesh::with_capacity(rim.len() + 1, rim.len() * 3);
    mesh.vertices.push(TexturedVertex::new(center.x, center.y, 0.0, 0.0, packed));
    for p in rim {
        mesh.vertices.push(TexturedVertex::new(p.x, p.y, 0.0, 0.0, packed));
    }
    let rim_len = rim.len() as u16;
    for i in 1..rim_len {
        mesh.indices.extend_from_slice(&[0, i, i + 1]);
    }
    if closed {
        mesh.indices.extend_from_slice(&[0, rim_len, 1]);
    }
    mesh
}

/// Chain of line ribbons through `points`; `closed` joins last to first.
fn ribbon_strip(points: &[Point], thickness: f32, color: Color, closed: bool) -> Mesh {
    let spans = if closed { points.len() } else { points.len().saturating_sub(1) };
    let mut mesh = Mesh::with_capacity(spans * 4, spans * 6);
    for i in 0..spans {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        let segment = tessellate_line(a, b, thickness, color);
        let base = mesh.vertices.len() as u16;
        mesh.vertices.extend_from_slice(&segment.vertices);
        mesh.indices.extend(segment.indices.iter().map(|&ix| base + ix));
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::rgba(255, 0, 0, 255);

    #[test]
    fn point_is_one_quad() {
        let mesh = tessellate_point(Point::new(10.0, 10.0), 2.0, RED);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn zero_length_line_degrades_to_point_quad() {
        let p = Point::new(5.0, 5.0);
        let mesh = tessellate_line(p, p, 3.0, RED);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn line_ribbon_width_matches_thickness() {
        let mesh = tessellate_line(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 4.0, RED);
        // Horizontal line: ribbon extends ±2 in y.
        let ys: Vec<f32> = mesh.vertices.iter().map(|v| v.y).collect();
        assert!(ys.contains(&2.0) && ys.contains(&-2.0));
    }

    #[test]
    fn filled_rect_two_triangles() {
        let mesh = tessellate_rectangle(Point::new(0.0, 0.0), 4.0, 3.0, RED, true);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn outline_rect_four_ribbons() {
        let mesh = tessellate_rectangle(Point::new(0.0, 0.0), 4.0, 3.0, RED, false);
        assert_eq!(mesh.vertices.len(), 16);
        assert_eq!(mesh.indices.len(), 24);
    }

    #[test]
    fn circle_segment_count_scales_with_radius() {
        // Small circles floor at 12 segments.
        let small = tessellate_circle(Point::new(0.0, 0.0), 4.0, RED, true);
        assert_eq!(small.vertices.len(), 12 + 1);
        // radius 100 → 50 segments.
        let big = tessellate_circle(Point::new(0.0, 0.0), 100.0, RED, true);
        assert_eq!(big.vertices.len(), 50 + 1);
    }

    #[test]
    fn filled_circle_fan_is_closed() {
        let mesh = tessellate_circle(Point::new(0.0, 0.0), 10.0, RED, true);
        let segments = mesh.vertices.len() - 1;
        assert_eq!(mesh.indices.len(), segments * 3);
    }

    #[test]
    fn arc_quarter_turn_segment_floor() {
        let mesh = tessellate_arc(Point::new(0.0, 0.0), 10.0, 10.0, 0.0, 90.0, RED, false);
        // range·16/2π = 4 for a quarter turn; floor keeps it at 4 spans.
        assert!(!mesh.vertices.is_empty());
    }

    #[test]
    fn polygon_fan_triangulation() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let mesh = tessellate_polygon(&square, RED, true);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn degenerate_polygon_empty() {
        let mesh = tessellate_polygon(&[Point::new(0.0, 0.0)], RED, true);
        assert!(mesh.vertices.is_empty());
    }

    #[test]
    fn bezier_endpoints_exact() {
        let pts = sample_bezier_quadratic(
            Point::new(0.0, 0.0),
            Point::new(5.0, 10.0),
            Point::new(10.0, 0.0),
            20,
        );
        assert_eq!(pts.len(), 21);
        assert_eq!(pts[0], Point::new(0.0, 0.0));
        assert_eq!(pts[20], Point::new(10.0, 0.0));
    }

    #[test]
    fn catmull_rom_passes_through_controls() {
        let controls =
            vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0), Point::new(20.0, 0.0)];
        let pts = sample_catmull_rom(&controls, 10);
        assert_eq!(pts[0], controls[0]);
        assert_eq!(pts[10], controls[1]);
        assert_eq!(pts[20], controls[2]);
    }

    #[test]
    fn white_uv_everywhere() {
        let mesh = tessellate_circle(Point::new(0.0, 0.0), 5.0, RED, true);
        assert!(mesh.vertices.iter().all(|v| v.u == 0.0 && v.v == 0.0));
    }
}
