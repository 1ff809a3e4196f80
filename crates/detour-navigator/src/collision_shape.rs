//! Collision shapes consumed from the physics side
//!
//! Shapes are copied into the geometry cache; the navigator only needs their
//! world-space triangles and bounds. Compound shapes are flattened by walking
//! the child hierarchy with an explicit stack of accumulated transforms.

use glam::{Affine3A, Vec3};
use navigator_common::{Aabb, Error, Result};
use serde::{Deserialize, Serialize};

pub type Triangle = [Vec3; 3];

/// A child of a compound shape, positioned relative to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundChild {
    pub transform: Affine3A,
    pub shape: CollisionShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollisionShape {
    /// Box centred on the local origin
    Box { half_extents: Vec3 },
    /// Indexed triangle soup in local coordinates
    TriangleMesh {
        vertices: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
    },
    Compound { children: Vec<CompoundChild> },
}

impl CollisionShape {
    pub fn new_box(half_extents: Vec3) -> Self {
        CollisionShape::Box { half_extents }
    }

    pub fn new_compound(children: Vec<(Affine3A, CollisionShape)>) -> Self {
        CollisionShape::Compound {
            children: children
                .into_iter()
                .map(|(transform, shape)| CompoundChild { transform, shape })
                .collect(),
        }
    }

    /// Short name used in log messages
    pub fn kind(&self) -> &'static str {
        match self {
            CollisionShape::Box { .. } => "box",
            CollisionShape::TriangleMesh { .. } => "triangle mesh",
            CollisionShape::Compound { .. } => "compound",
        }
    }

    /// Triangles of the shape placed by `transform`, outward facing.
    pub fn world_triangles(&self, transform: &Affine3A) -> Result<Vec<Triangle>> {
        let mut triangles = Vec::new();
        let mut stack: Vec<(Affine3A, &CollisionShape)> = vec![(*transform, self)];

        while let Some((world, shape)) = stack.pop() {
            match shape {
                CollisionShape::Box { half_extents } => {
                    if half_extents.cmplt(Vec3::ZERO).any() {
                        return Err(Error::InvalidMesh(format!(
                            "box with negative half extents {half_extents}"
                        )));
                    }
                    triangles.extend(
                        box_triangles(*half_extents)
                            .into_iter()
                            .map(|t| t.map(|v| world.transform_point3(v))),
                    );
                }
                CollisionShape::TriangleMesh { vertices, indices } => {
                    for (n, tri) in indices.iter().enumerate() {
                        let mut points = [Vec3::ZERO; 3];
                        for (point, &index) in points.iter_mut().zip(tri.iter()) {
                            let vertex = vertices.get(index as usize).ok_or_else(|| {
                                Error::InvalidMesh(format!(
                                    "triangle {n} references vertex {index} of {}",
                                    vertices.len()
                                ))
                            })?;
                            *point = world.transform_point3(*vertex);
                        }
                        triangles.push(points);
                    }
                }
                CollisionShape::Compound { children } => {
                    for child in children.iter().rev() {
                        stack.push((world * child.transform, &child.shape));
                    }
                }
            }
        }

        Ok(triangles)
    }

    /// World-space bounds of the placed shape, `None` if it has no triangles.
    pub fn bounds(&self, transform: &Affine3A) -> Result<Option<Aabb>> {
        let triangles = self.world_triangles(transform)?;
        Ok(Aabb::from_points(triangles.into_iter().flatten()))
    }
}

fn box_triangles(h: Vec3) -> Vec<Triangle> {
    let corner = |sx: f32, sy: f32, sz: f32| Vec3::new(sx * h.x, sy * h.y, sz * h.z);
    // Quads wound counter-clockwise when seen from outside
    let faces = [
        // +Y
        [
            corner(-1.0, 1.0, -1.0),
            corner(-1.0, 1.0, 1.0),
            corner(1.0, 1.0, 1.0),
            corner(1.0, 1.0, -1.0),
        ],
        // -Y
        [
            corner(-1.0, -1.0, -1.0),
            corner(1.0, -1.0, -1.0),
            corner(1.0, -1.0, 1.0),
            corner(-1.0, -1.0, 1.0),
        ],
        // +X
        [
            corner(1.0, -1.0, -1.0),
            corner(1.0, 1.0, -1.0),
            corner(1.0, 1.0, 1.0),
            corner(1.0, -1.0, 1.0),
        ],
        // -X
        [
            corner(-1.0, -1.0, -1.0),
            corner(-1.0, -1.0, 1.0),
            corner(-1.0, 1.0, 1.0),
            corner(-1.0, 1.0, -1.0),
        ],
        // +Z
        [
            corner(-1.0, -1.0, 1.0),
            corner(1.0, -1.0, 1.0),
            corner(1.0, 1.0, 1.0),
            corner(-1.0, 1.0, 1.0),
        ],
        // -Z
        [
            corner(-1.0, -1.0, -1.0),
            corner(-1.0, 1.0, -1.0),
            corner(1.0, 1.0, -1.0),
            corner(1.0, -1.0, -1.0),
        ],
    ];

    faces
        .iter()
        .flat_map(|q| [[q[0], q[1], q[2]], [q[0], q[2], q[3]]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use navigator_common::triangle_normal;

    #[test]
    fn test_box_triangles_face_outward() {
        let shape = CollisionShape::new_box(Vec3::new(1.0, 2.0, 3.0));
        let triangles = shape.world_triangles(&Affine3A::IDENTITY).unwrap();
        assert_eq!(triangles.len(), 12);

        for tri in &triangles {
            let normal = triangle_normal(tri[0], tri[1], tri[2]).unwrap();
            let centroid = (tri[0] + tri[1] + tri[2]) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "inward face {tri:?}");
        }

        let up = triangles
            .iter()
            .filter(|t| triangle_normal(t[0], t[1], t[2]).unwrap().y > 0.99)
            .count();
        assert_eq!(up, 2);
    }

    #[test]
    fn test_box_bounds_with_translation() {
        let shape = CollisionShape::new_box(Vec3::ONE);
        let bounds = shape
            .bounds(&Affine3A::from_translation(Vec3::new(4.0, 0.0, 4.0)))
            .unwrap()
            .unwrap();
        assert_eq!(bounds.min, Vec3::new(3.0, -1.0, 3.0));
        assert_eq!(bounds.max, Vec3::new(5.0, 1.0, 5.0));
    }

    #[test]
    fn test_compound_accumulates_transforms() {
        let inner = CollisionShape::new_compound(vec![(
            Affine3A::from_translation(Vec3::new(0.0, 0.0, 10.0)),
            CollisionShape::new_box(Vec3::splat(0.5)),
        )]);
        let shape = CollisionShape::new_compound(vec![
            (Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0)), inner),
            (Affine3A::IDENTITY, CollisionShape::new_box(Vec3::splat(0.5))),
        ]);

        let bounds = shape.bounds(&Affine3A::IDENTITY).unwrap().unwrap();
        assert_eq!(bounds.min, Vec3::new(-0.5, -0.5, -0.5));
        assert_eq!(bounds.max, Vec3::new(10.5, 0.5, 10.5));
        assert_eq!(shape.world_triangles(&Affine3A::IDENTITY).unwrap().len(), 24);
    }

    #[test]
    fn test_rotated_box_bounds() {
        let shape = CollisionShape::new_box(Vec3::new(2.0, 1.0, 1.0));
        let rotation = Affine3A::from_quat(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let bounds = shape.bounds(&rotation).unwrap().unwrap();
        assert!((bounds.max.z - 2.0).abs() < 1e-5);
        assert!((bounds.max.x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_triangle_mesh_index_out_of_range() {
        let shape = CollisionShape::TriangleMesh {
            vertices: vec![Vec3::ZERO, Vec3::X],
            indices: vec![[0, 1, 2]],
        };
        let result = shape.world_triangles(&Affine3A::IDENTITY);
        assert!(matches!(result, Err(Error::InvalidMesh(_))));
    }

    #[test]
    fn test_empty_mesh_has_no_bounds() {
        let shape = CollisionShape::TriangleMesh {
            vertices: Vec::new(),
            indices: Vec::new(),
        };
        assert!(shape.bounds(&Affine3A::IDENTITY).unwrap().is_none());
    }
}
