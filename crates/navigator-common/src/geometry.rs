//! Geometry operations on the XZ plane
//!
//! Navigation surfaces live on the XZ plane (Y-up coordinate system). These
//! helpers are used to classify triangles by slope and to cut polygons down
//! to tile rectangles.

use glam::Vec3;

/// Twice the signed area of a triangle projected on the XZ plane.
///
/// Positive: clockwise when looking down the Y axis. Negative: counter-clockwise.
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Unit normal of a triangle, `None` for degenerate triangles.
#[inline]
pub fn triangle_normal(a: Vec3, b: Vec3, c: Vec3) -> Option<Vec3> {
    (b - a).cross(c - a).try_normalize()
}

/// Absolute area of a polygon projected on the XZ plane.
pub fn polygon_area_xz(vertices: &[Vec3]) -> f32 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        twice_area += a.x * b.z - b.x * a.z;
    }
    twice_area.abs() * 0.5
}

/// Axis-aligned rectangle on the XZ plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectXz {
    pub min_x: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_z: f32,
}

impl RectXz {
    pub fn new(min_x: f32, min_z: f32, max_x: f32, max_z: f32) -> Self {
        Self {
            min_x,
            min_z,
            max_x,
            max_z,
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.z >= self.min_z && point.z <= self.max_z
    }

    pub fn intersection(&self, other: &RectXz) -> Option<RectXz> {
        let rect = RectXz::new(
            self.min_x.max(other.min_x),
            self.min_z.max(other.min_z),
            self.max_x.min(other.max_x),
            self.max_z.min(other.max_z),
        );
        (rect.min_x < rect.max_x && rect.min_z < rect.max_z).then_some(rect)
    }
}

#[derive(Clone, Copy)]
enum ClipEdge {
    MinX(f32),
    MaxX(f32),
    MinZ(f32),
    MaxZ(f32),
}

impl ClipEdge {
    fn inside(self, p: Vec3) -> bool {
        match self {
            ClipEdge::MinX(v) => p.x >= v,
            ClipEdge::MaxX(v) => p.x <= v,
            ClipEdge::MinZ(v) => p.z >= v,
            ClipEdge::MaxZ(v) => p.z <= v,
        }
    }

    fn intersect(self, a: Vec3, b: Vec3) -> Vec3 {
        let t = match self {
            ClipEdge::MinX(v) | ClipEdge::MaxX(v) => (v - a.x) / (b.x - a.x),
            ClipEdge::MinZ(v) | ClipEdge::MaxZ(v) => (v - a.z) / (b.z - a.z),
        };
        a.lerp(b, t)
    }
}

/// Clips a convex polygon against a rectangle on the XZ plane.
///
/// Heights are interpolated along clipped edges. Returns an empty vector when
/// nothing with positive area remains.
pub fn clip_polygon_xz(polygon: &[Vec3], rect: &RectXz) -> Vec<Vec3> {
    let mut output: Vec<Vec3> = polygon.to_vec();
    for edge in [
        ClipEdge::MinX(rect.min_x),
        ClipEdge::MaxX(rect.max_x),
        ClipEdge::MinZ(rect.min_z),
        ClipEdge::MaxZ(rect.max_z),
    ] {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &current in &input {
            match (edge.inside(prev), edge.inside(current)) {
                (true, true) => output.push(current),
                (true, false) => output.push(edge.intersect(prev, current)),
                (false, true) => {
                    output.push(edge.intersect(prev, current));
                    output.push(current);
                }
                (false, false) => {}
            }
            prev = current;
        }
    }

    if output.len() < 3 || polygon_area_xz(&output) <= f32::EPSILON {
        return Vec::new();
    }
    output
}
