//! Per-tile geometry snapshots handed to the tile builder

use crate::collision_shape::Triangle;
use crate::heightfield::{Heightfield, HeightfieldShape, Water};
use crate::tile_position::TilePosition;
use crate::types::{AreaType, ObjectId};
use byteorder::{LittleEndian, WriteBytesExt};
use navigator_common::Aabb;
use std::sync::Arc;

/// World-space triangles of one object, shared between every tile it touches.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSource {
    pub object_id: ObjectId,
    pub area_type: AreaType,
    pub triangles: Arc<[Triangle]>,
    pub bounds: Aabb,
}

/// Immutable geometry of one tile at a given revision.
///
/// Snapshots are never mutated after creation; a change to the tile produces a
/// new snapshot with a higher revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RecastMesh {
    pub tile: TilePosition,
    pub revision: u64,
    /// Sorted by object id
    pub meshes: Vec<Arc<MeshSource>>,
    pub water: Vec<Water>,
    pub heightfields: Vec<Arc<Heightfield>>,
}

impl RecastMesh {
    pub fn empty(tile: TilePosition, revision: u64) -> Self {
        RecastMesh {
            tile,
            revision,
            meshes: Vec::new(),
            water: Vec::new(),
            heightfields: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.water.is_empty() && self.heightfields.is_empty()
    }

    /// Canonical little-endian encoding of the geometry, independent of revision.
    ///
    /// Two snapshots with equal content produce identical bytes, which makes the
    /// encoding usable as input to a content hash.
    pub fn write_content(&self, out: &mut Vec<u8>) {
        // Writes into a Vec<u8> cannot fail
        let _ = self.write_content_inner(out);
    }

    fn write_content_inner(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_i32::<LittleEndian>(self.tile.x)?;
        out.write_i32::<LittleEndian>(self.tile.y)?;

        out.write_u32::<LittleEndian>(self.meshes.len() as u32)?;
        for mesh in &self.meshes {
            out.write_u64::<LittleEndian>(mesh.object_id.0)?;
            out.write_u8(mesh.area_type as u8)?;
            out.write_u32::<LittleEndian>(mesh.triangles.len() as u32)?;
            for vertex in mesh.triangles.iter().flatten() {
                out.write_f32::<LittleEndian>(vertex.x)?;
                out.write_f32::<LittleEndian>(vertex.y)?;
                out.write_f32::<LittleEndian>(vertex.z)?;
            }
        }

        out.write_u32::<LittleEndian>(self.water.len() as u32)?;
        for water in &self.water {
            out.write_i32::<LittleEndian>(water.cell_position.x)?;
            out.write_i32::<LittleEndian>(water.cell_position.y)?;
            out.write_i32::<LittleEndian>(water.cell_size)?;
            out.write_f32::<LittleEndian>(water.level)?;
        }

        out.write_u32::<LittleEndian>(self.heightfields.len() as u32)?;
        for heightfield in &self.heightfields {
            out.write_i32::<LittleEndian>(heightfield.cell_position.x)?;
            out.write_i32::<LittleEndian>(heightfield.cell_position.y)?;
            out.write_i32::<LittleEndian>(heightfield.cell_size)?;
            match &heightfield.shape {
                HeightfieldShape::Plane { height } => {
                    out.write_u8(0)?;
                    out.write_f32::<LittleEndian>(*height)?;
                }
                HeightfieldShape::Surface { heights, size, .. } => {
                    out.write_u8(1)?;
                    out.write_u32::<LittleEndian>(*size as u32)?;
                    for height in heights.iter() {
                        out.write_f32::<LittleEndian>(*height)?;
                    }
                }
            }
        }
        Ok(())
    }
}
