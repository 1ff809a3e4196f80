//! Tile mesh building
//!
//! [`TileBuilder`] is the seam to the mesh-building algorithm: it turns a
//! geometry snapshot into walkable polygons. [`WalkableSurfaceBuilder`] is the
//! default implementation; it keeps upward-facing triangles within the slope
//! limit, clips them to the tile and adds water and terrain surfaces.

use crate::collision_shape::Triangle;
use crate::nav_mesh_tile::{NavMeshTile, NavPolygon};
use crate::offmesh_connections::OffMeshConnection;
use crate::recast_mesh::RecastMesh;
use crate::settings::NavigatorSettings;
use crate::tile_position::TilePosition;
use crate::types::{AreaType, ObjectId};
use glam::Vec3;
use navigator_common::{clip_polygon_xz, triangle_normal, Error, RectXz, Result};
use std::collections::BTreeSet;

/// Everything a builder needs for one tile.
#[derive(Debug, Clone, Copy)]
pub struct TileBuildInput<'a> {
    pub worldspace: &'a str,
    pub tile: TilePosition,
    pub tile_bounds: RectXz,
    pub agent_half_extents: Vec3,
    pub recast_mesh: &'a RecastMesh,
    pub off_mesh_connections: &'a [OffMeshConnection],
}

pub trait TileBuilder: Send + Sync {
    /// Builds the tile, `Ok(None)` when nothing in it is walkable.
    fn build(&self, input: &TileBuildInput<'_>) -> Result<Option<NavMeshTile>>;
}

#[derive(Debug, Clone)]
pub struct WalkableSurfaceBuilder {
    min_normal_y: f32,
}

impl WalkableSurfaceBuilder {
    pub fn new(settings: &NavigatorSettings) -> Self {
        WalkableSurfaceBuilder {
            min_normal_y: settings.max_slope_degrees.to_radians().cos(),
        }
    }

    fn walkable_polygon(&self, triangle: &Triangle, bounds: &RectXz) -> Result<Option<Vec<Vec3>>> {
        if triangle.iter().any(|v| !v.is_finite()) {
            return Err(Error::NavMeshGeneration(format!(
                "non-finite vertex in triangle {triangle:?}"
            )));
        }
        let Some(normal) = triangle_normal(triangle[0], triangle[1], triangle[2]) else {
            return Ok(None);
        };
        if normal.y < self.min_normal_y {
            return Ok(None);
        }
        let clipped = clip_polygon_xz(triangle, bounds);
        Ok((!clipped.is_empty()).then_some(clipped))
    }

    fn flat_quad(rect: &RectXz, height: f32) -> Vec<Vec3> {
        vec![
            Vec3::new(rect.min_x, height, rect.min_z),
            Vec3::new(rect.min_x, height, rect.max_z),
            Vec3::new(rect.max_x, height, rect.max_z),
            Vec3::new(rect.max_x, height, rect.min_z),
        ]
    }
}

impl TileBuilder for WalkableSurfaceBuilder {
    fn build(&self, input: &TileBuildInput<'_>) -> Result<Option<NavMeshTile>> {
        let bounds = &input.tile_bounds;
        let mut polygons = Vec::new();
        let mut source_objects = BTreeSet::<ObjectId>::new();

        for mesh in &input.recast_mesh.meshes {
            if mesh.area_type == AreaType::Null {
                continue;
            }
            for triangle in mesh.triangles.iter() {
                if let Some(vertices) = self.walkable_polygon(triangle, bounds)? {
                    polygons.push(NavPolygon {
                        vertices,
                        area_type: mesh.area_type,
                    });
                    source_objects.insert(mesh.object_id);
                }
            }
        }

        for water in &input.recast_mesh.water {
            let cell = water.bounds();
            let cell_rect = RectXz::new(cell.min.x, cell.min.z, cell.max.x, cell.max.z);
            if let Some(rect) = cell_rect.intersection(bounds) {
                polygons.push(NavPolygon {
                    vertices: Self::flat_quad(&rect, water.level),
                    area_type: AreaType::Water,
                });
            }
        }

        for heightfield in &input.recast_mesh.heightfields {
            for triangle in heightfield
                .shape
                .world_triangles(heightfield.cell_position, heightfield.cell_size)
            {
                if let Some(vertices) = self.walkable_polygon(&triangle, bounds)? {
                    polygons.push(NavPolygon {
                        vertices,
                        area_type: AreaType::Ground,
                    });
                }
            }
        }

        let off_mesh_connections: Vec<OffMeshConnection> = input
            .off_mesh_connections
            .iter()
            .filter(|connection| bounds.contains(connection.start))
            .copied()
            .collect();

        if polygons.is_empty() && off_mesh_connections.is_empty() {
            return Ok(None);
        }

        Ok(Some(NavMeshTile {
            tile: input.tile,
            polygons,
            off_mesh_connections,
            source_objects: source_objects.into_iter().collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision_shape::CollisionShape;
    use crate::heightfield::{Heightfield, HeightfieldShape, Water};
    use crate::recast_mesh::MeshSource;
    use crate::tile_position::tile_bounds;
    use glam::{Affine3A, IVec2};
    use navigator_common::{polygon_area_xz, Aabb};
    use std::sync::Arc;

    fn settings() -> NavigatorSettings {
        NavigatorSettings::new(0.25, 64)
    }

    fn source(id: u64, shape: CollisionShape, at: Vec3, area_type: AreaType) -> Arc<MeshSource> {
        let triangles = shape
            .world_triangles(&Affine3A::from_translation(at))
            .unwrap();
        let bounds = Aabb::from_points(triangles.iter().flatten().copied()).unwrap();
        Arc::new(MeshSource {
            object_id: ObjectId(id),
            area_type,
            triangles: triangles.into(),
            bounds,
        })
    }

    fn build(mesh: &RecastMesh, connections: &[OffMeshConnection]) -> Result<Option<NavMeshTile>> {
        let settings = settings();
        let input = TileBuildInput {
            worldspace: "sys::default",
            tile: mesh.tile,
            tile_bounds: tile_bounds(&settings, mesh.tile),
            agent_half_extents: Vec3::new(0.3, 0.9, 0.3),
            recast_mesh: mesh,
            off_mesh_connections: connections,
        };
        WalkableSurfaceBuilder::new(&settings).build(&input)
    }

    #[test]
    fn test_box_top_is_walkable() {
        let mut mesh = RecastMesh::empty(TilePosition::new(0, 0), 1);
        mesh.meshes.push(source(
            1,
            CollisionShape::new_box(Vec3::ONE),
            Vec3::new(4.0, 0.0, 4.0),
            AreaType::Ground,
        ));

        let tile = build(&mesh, &[]).unwrap().unwrap();
        assert_eq!(tile.polygon_count(), 2);
        assert_eq!(tile.source_objects, vec![ObjectId(1)]);
        let area: f32 = tile.polygons.iter().map(|p| polygon_area_xz(&p.vertices)).sum();
        assert!((area - 4.0).abs() < 1e-4);
        for polygon in &tile.polygons {
            for v in &polygon.vertices {
                assert_eq!(v.y, 1.0);
            }
        }
    }

    #[test]
    fn test_geometry_is_clipped_to_tile() {
        let mut mesh = RecastMesh::empty(TilePosition::new(1, 0), 1);
        mesh.meshes.push(source(
            1,
            CollisionShape::new_box(Vec3::new(4.0, 1.0, 1.0)),
            Vec3::new(16.0, 0.0, 4.0),
            AreaType::Ground,
        ));

        let tile = build(&mesh, &[]).unwrap().unwrap();
        let area: f32 = tile.polygons.iter().map(|p| polygon_area_xz(&p.vertices)).sum();
        // Half of the 8x2 top lies in tile (1, 0)
        assert!((area - 8.0).abs() < 1e-4);
        for polygon in &tile.polygons {
            for v in &polygon.vertices {
                assert!(v.x >= 16.0);
            }
        }
    }

    #[test]
    fn test_steep_and_null_geometry_is_ignored() {
        let mut mesh = RecastMesh::empty(TilePosition::new(0, 0), 1);
        let wall = CollisionShape::TriangleMesh {
            vertices: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 4.0, 0.0),
                Vec3::new(4.0, 0.0, 0.0),
            ],
            indices: vec![[0, 1, 2]],
        };
        mesh.meshes.push(source(1, wall, Vec3::new(2.0, 0.0, 2.0), AreaType::Ground));
        mesh.meshes.push(source(
            2,
            CollisionShape::new_box(Vec3::ONE),
            Vec3::new(8.0, 0.0, 8.0),
            AreaType::Null,
        ));

        assert!(build(&mesh, &[]).unwrap().is_none());
    }

    #[test]
    fn test_water_and_heightfield_surfaces() {
        let mut mesh = RecastMesh::empty(TilePosition::new(0, 0), 1);
        mesh.water.push(Water {
            cell_position: IVec2::new(0, 0),
            cell_size: 8,
            level: -1.0,
        });
        mesh.heightfields.push(Arc::new(Heightfield {
            cell_position: IVec2::new(1, 1),
            cell_size: 8,
            shape: HeightfieldShape::Plane { height: 2.0 },
        }));

        let tile = build(&mesh, &[]).unwrap().unwrap();
        let water: Vec<_> = tile
            .polygons
            .iter()
            .filter(|p| p.area_type == AreaType::Water)
            .collect();
        assert_eq!(water.len(), 1);
        assert!((polygon_area_xz(&water[0].vertices) - 64.0).abs() < 1e-4);
        assert_eq!(
            tile.polygons
                .iter()
                .filter(|p| p.area_type == AreaType::Ground)
                .count(),
            2
        );
        assert!(tile.source_objects.is_empty());
    }

    #[test]
    fn test_off_mesh_connections_start_in_tile() {
        let mesh = RecastMesh::empty(TilePosition::new(0, 0), 1);
        let connections = [
            OffMeshConnection {
                start: Vec3::new(1.0, 0.0, 1.0),
                end: Vec3::new(20.0, 0.0, 1.0),
                area_type: AreaType::Ground,
            },
            OffMeshConnection {
                start: Vec3::new(20.0, 0.0, 1.0),
                end: Vec3::new(1.0, 0.0, 1.0),
                area_type: AreaType::Ground,
            },
        ];
        let tile = build(&mesh, &connections).unwrap().unwrap();
        assert!(tile.polygons.is_empty());
        assert_eq!(tile.off_mesh_connections, vec![connections[0]]);
    }

    #[test]
    fn test_non_finite_geometry_fails() {
        let mut mesh = RecastMesh::empty(TilePosition::new(0, 0), 1);
        let triangle = [Vec3::new(f32::NAN, 0.0, 0.0), Vec3::Z, Vec3::X];
        mesh.meshes.push(Arc::new(MeshSource {
            object_id: ObjectId(1),
            area_type: AreaType::Ground,
            triangles: vec![triangle].into(),
            bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
        }));
        assert!(matches!(
            build(&mesh, &[]),
            Err(Error::NavMeshGeneration(_))
        ));
    }
}
