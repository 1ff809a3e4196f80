//! Built navigation mesh tiles and their binary encoding

use crate::offmesh_connections::OffMeshConnection;
use crate::tile_position::TilePosition;
use crate::types::{AreaType, ObjectId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use navigator_common::{Error, Result};
use std::io::{Read, Write};

/// Magic number for encoded tiles
pub const NAV_MESH_TILE_MAGIC: u32 = 0x4E_4D_54_4C; // "NMTL"

/// Version of the tile encoding
pub const NAV_MESH_TILE_VERSION: u32 = 1;

const MAX_POLYGON_VERTICES: u32 = 1 << 16;

/// Convex walkable polygon, wound counter-clockwise seen from above.
#[derive(Debug, Clone, PartialEq)]
pub struct NavPolygon {
    pub vertices: Vec<Vec3>,
    pub area_type: AreaType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavMeshTile {
    pub tile: TilePosition,
    pub polygons: Vec<NavPolygon>,
    pub off_mesh_connections: Vec<OffMeshConnection>,
    /// Objects whose geometry contributed at least one polygon, sorted
    pub source_objects: Vec<ObjectId>,
}

impl NavMeshTile {
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.polygons.iter().map(|p| p.vertices.len()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.vertex_count() * std::mem::size_of::<Vec3>()
            + self.polygons.len() * std::mem::size_of::<NavPolygon>()
            + self.off_mesh_connections.len() * std::mem::size_of::<OffMeshConnection>()
            + self.source_objects.len() * std::mem::size_of::<ObjectId>()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64 + self.vertex_count() * 12);
        self.write(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        Self::read(&mut reader)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(NAV_MESH_TILE_MAGIC)?;
        writer.write_u32::<LittleEndian>(NAV_MESH_TILE_VERSION)?;
        writer.write_i32::<LittleEndian>(self.tile.x)?;
        writer.write_i32::<LittleEndian>(self.tile.y)?;

        writer.write_u32::<LittleEndian>(self.polygons.len() as u32)?;
        for polygon in &self.polygons {
            writer.write_u8(polygon.area_type as u8)?;
            writer.write_u32::<LittleEndian>(polygon.vertices.len() as u32)?;
            for vertex in &polygon.vertices {
                write_vec3(writer, *vertex)?;
            }
        }

        writer.write_u32::<LittleEndian>(self.off_mesh_connections.len() as u32)?;
        for connection in &self.off_mesh_connections {
            write_vec3(writer, connection.start)?;
            write_vec3(writer, connection.end)?;
            writer.write_u8(connection.area_type as u8)?;
        }

        writer.write_u32::<LittleEndian>(self.source_objects.len() as u32)?;
        for id in &self.source_objects {
            writer.write_u64::<LittleEndian>(id.0)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != NAV_MESH_TILE_MAGIC {
            return Err(Error::Serialization(format!(
                "invalid nav mesh tile magic 0x{magic:08x}"
            )));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != NAV_MESH_TILE_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported nav mesh tile version {version}"
            )));
        }
        let tile = TilePosition::new(
            reader.read_i32::<LittleEndian>()?,
            reader.read_i32::<LittleEndian>()?,
        );

        let polygon_count = reader.read_u32::<LittleEndian>()?;
        let mut polygons = Vec::new();
        for _ in 0..polygon_count {
            let area_type = read_area_type(reader)?;
            let vertex_count = reader.read_u32::<LittleEndian>()?;
            if vertex_count > MAX_POLYGON_VERTICES {
                return Err(Error::Serialization(format!(
                    "polygon with {vertex_count} vertices"
                )));
            }
            let mut vertices = Vec::with_capacity(vertex_count as usize);
            for _ in 0..vertex_count {
                vertices.push(read_vec3(reader)?);
            }
            polygons.push(NavPolygon {
                vertices,
                area_type,
            });
        }

        let connection_count = reader.read_u32::<LittleEndian>()?;
        let mut off_mesh_connections = Vec::new();
        for _ in 0..connection_count {
            let start = read_vec3(reader)?;
            let end = read_vec3(reader)?;
            let area_type = read_area_type(reader)?;
            off_mesh_connections.push(OffMeshConnection {
                start,
                end,
                area_type,
            });
        }

        let source_count = reader.read_u32::<LittleEndian>()?;
        let mut source_objects = Vec::new();
        for _ in 0..source_count {
            source_objects.push(ObjectId(reader.read_u64::<LittleEndian>()?));
        }

        Ok(NavMeshTile {
            tile,
            polygons,
            off_mesh_connections,
            source_objects,
        })
    }
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> std::io::Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)
}

fn read_vec3<R: Read>(reader: &mut R) -> std::io::Result<Vec3> {
    Ok(Vec3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn read_area_type<R: Read>(reader: &mut R) -> Result<AreaType> {
    let value = reader.read_u8()?;
    AreaType::from_u8(value)
        .ok_or_else(|| Error::Serialization(format!("unknown area type {value}")))
}
