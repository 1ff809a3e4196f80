//! Landscape cells: terrain heightfields and water planes

use crate::collision_shape::Triangle;
use crate::tile_position::cell_bounds;
use glam::{IVec2, Vec3};
use navigator_common::{Aabb, Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeightfieldShape {
    /// Flat terrain at a constant height
    Plane { height: f32 },
    /// `size x size` samples laid over the cell, row-major along X then Z
    Surface {
        heights: Vec<f32>,
        size: usize,
        min_height: f32,
        max_height: f32,
    },
}

impl HeightfieldShape {
    pub fn surface(heights: Vec<f32>, size: usize) -> Result<Self> {
        if size < 2 {
            return Err(Error::InvalidMesh(format!(
                "heightfield needs at least 2x2 samples, got {size}"
            )));
        }
        if heights.len() != size * size {
            return Err(Error::InvalidMesh(format!(
                "heightfield of size {size} expects {} samples, got {}",
                size * size,
                heights.len()
            )));
        }
        let min_height = heights.iter().copied().fold(f32::INFINITY, f32::min);
        let max_height = heights.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Ok(HeightfieldShape::Surface {
            heights,
            size,
            min_height,
            max_height,
        })
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            HeightfieldShape::Plane { height } if !height.is_finite() => Err(
                Error::InvalidMesh(format!("heightfield plane at non-finite height {height}")),
            ),
            HeightfieldShape::Plane { .. } => Ok(()),
            HeightfieldShape::Surface { heights, size, .. } => {
                if *size < 2 || heights.len() != size * size {
                    return Err(Error::InvalidMesh(format!(
                        "heightfield of size {size} has {} samples",
                        heights.len()
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn height_range(&self) -> (f32, f32) {
        match self {
            HeightfieldShape::Plane { height } => (*height, *height),
            HeightfieldShape::Surface {
                min_height,
                max_height,
                ..
            } => (*min_height, *max_height),
        }
    }

    /// World-space bounds when laid over `cell_position`.
    pub fn bounds(&self, cell_position: IVec2, cell_size: i32) -> Aabb {
        let (min_y, max_y) = self.height_range();
        cell_bounds(cell_position, cell_size, min_y, max_y)
    }

    /// Upward-facing triangles of the terrain surface over the cell.
    pub fn world_triangles(&self, cell_position: IVec2, cell_size: i32) -> Vec<Triangle> {
        let origin = Vec3::new(
            (cell_position.x * cell_size) as f32,
            0.0,
            (cell_position.y * cell_size) as f32,
        );
        match self {
            HeightfieldShape::Plane { height } => {
                let size = cell_size as f32;
                let p = |x: f32, z: f32| origin + Vec3::new(x, *height, z);
                vec![
                    [p(0.0, 0.0), p(0.0, size), p(size, size)],
                    [p(0.0, 0.0), p(size, size), p(size, 0.0)],
                ]
            }
            HeightfieldShape::Surface { heights, size, .. } => {
                let step = cell_size as f32 / (*size - 1) as f32;
                let p = |x: usize, z: usize| {
                    origin + Vec3::new(x as f32 * step, heights[z * size + x], z as f32 * step)
                };
                let mut triangles = Vec::with_capacity((size - 1) * (size - 1) * 2);
                for z in 0..size - 1 {
                    for x in 0..size - 1 {
                        triangles.push([p(x, z), p(x, z + 1), p(x + 1, z + 1)]);
                        triangles.push([p(x, z), p(x + 1, z + 1), p(x + 1, z)]);
                    }
                }
                triangles
            }
        }
    }
}

/// Water plane covering one landscape cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Water {
    pub cell_position: IVec2,
    pub cell_size: i32,
    pub level: f32,
}

impl Water {
    pub fn bounds(&self) -> Aabb {
        cell_bounds(self.cell_position, self.cell_size, self.level, self.level)
    }
}

/// Heightfield placed over a landscape cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Heightfield {
    pub cell_position: IVec2,
    pub cell_size: i32,
    pub shape: HeightfieldShape,
}

impl Heightfield {
    pub fn bounds(&self) -> Aabb {
        self.shape.bounds(self.cell_position, self.cell_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navigator_common::triangle_normal;

    #[test]
    fn test_surface_validation() {
        assert!(HeightfieldShape::surface(vec![0.0; 4], 2).is_ok());
        assert!(HeightfieldShape::surface(vec![0.0; 5], 2).is_err());
        assert!(HeightfieldShape::surface(vec![0.0], 1).is_err());
        assert!(HeightfieldShape::Plane { height: f32::NAN }.validate().is_err());
    }

    #[test]
    fn test_surface_triangles_face_up() {
        let shape = HeightfieldShape::surface(vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0], 3)
            .unwrap();
        let triangles = shape.world_triangles(IVec2::new(1, 1), 8);
        assert_eq!(triangles.len(), 8);
        for tri in &triangles {
            assert!(triangle_normal(tri[0], tri[1], tri[2]).unwrap().y > 0.0);
            for v in tri {
                assert!(v.x >= 8.0 && v.x <= 16.0 && v.z >= 8.0 && v.z <= 16.0);
            }
        }
        assert_eq!(shape.height_range(), (0.0, 2.0));
    }

    #[test]
    fn test_plane_bounds() {
        let shape = HeightfieldShape::Plane { height: -3.0 };
        let bounds = shape.bounds(IVec2::new(-1, 0), 16);
        assert_eq!(bounds.min, Vec3::new(-16.0, -3.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(0.0, -3.0, 16.0));
    }
}
