//! Persistent store of built tiles keyed by their build input
//!
//! A tile is looked up by worldspace, position, agent size and a sha1 hash of
//! everything its build reads. Equal input means an equal build, so a hit can
//! be published without running the builder, also across process restarts.

use crate::nav_mesh_tile::NavMeshTile;
use crate::offmesh_connections::OffMeshConnection;
use crate::recast_mesh::RecastMesh;
use crate::settings::NavigatorSettings;
use crate::tile_position::TilePosition;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use navigator_common::{Error, Result};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub type InputHash = [u8; 20];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavMeshTileKey {
    pub worldspace: String,
    pub tile: TilePosition,
    /// Bit patterns of the agent half extents
    pub agent_half_extents: [u32; 3],
    pub input_hash: InputHash,
}

impl NavMeshTileKey {
    pub fn new(
        worldspace: &str,
        tile: TilePosition,
        agent_half_extents: Vec3,
        input_hash: InputHash,
    ) -> Self {
        NavMeshTileKey {
            worldspace: worldspace.to_string(),
            tile,
            agent_half_extents: agent_half_extents.to_array().map(f32::to_bits),
            input_hash,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.worldspace.len() + 48);
        out.extend_from_slice(&(self.worldspace.len() as u32).to_le_bytes());
        out.extend_from_slice(self.worldspace.as_bytes());
        out.extend_from_slice(&self.tile.x.to_le_bytes());
        out.extend_from_slice(&self.tile.y.to_le_bytes());
        for bits in self.agent_half_extents {
            out.extend_from_slice(&bits.to_le_bytes());
        }
        out.extend_from_slice(&self.input_hash);
        out
    }

    /// File name of the key, hex encoded sha1 of its bytes.
    pub fn file_name(&self) -> String {
        let digest = Sha1::digest(self.to_bytes());
        let mut name = String::with_capacity(digest.len() * 2 + 4);
        for byte in digest.iter() {
            name.push_str(&format!("{byte:02x}"));
        }
        name.push_str(".nmt");
        name
    }
}

/// Hashes everything a tile build reads.
pub fn compute_input_hash(
    recast_mesh: &RecastMesh,
    off_mesh_connections: &[OffMeshConnection],
    agent_half_extents: Vec3,
    settings: &NavigatorSettings,
) -> InputHash {
    let mut content = Vec::new();
    recast_mesh.write_content(&mut content);
    for connection in off_mesh_connections {
        for value in connection.start.to_array().into_iter().chain(connection.end.to_array()) {
            content.extend_from_slice(&value.to_le_bytes());
        }
        content.push(connection.area_type as u8);
    }
    for value in agent_half_extents.to_array() {
        content.extend_from_slice(&value.to_le_bytes());
    }
    content.extend_from_slice(&settings.cell_size.to_le_bytes());
    content.extend_from_slice(&settings.tile_size.to_le_bytes());
    content.extend_from_slice(&settings.max_slope_degrees.to_le_bytes());

    let mut hasher = Sha1::new();
    hasher.update(&content);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

pub trait NavMeshDb: Send + Sync {
    fn load_tile(&self, key: &NavMeshTileKey) -> Result<Option<NavMeshTile>>;

    fn store_tile(&self, key: &NavMeshTileKey, tile: &NavMeshTile) -> Result<()>;
}

/// In-memory database, keeps tiles encoded.
#[derive(Debug, Default)]
pub struct MemoryNavMeshDb {
    tiles: Mutex<HashMap<NavMeshTileKey, Vec<u8>>>,
}

impl MemoryNavMeshDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.lock().is_empty()
    }
}

impl NavMeshDb for MemoryNavMeshDb {
    fn load_tile(&self, key: &NavMeshTileKey) -> Result<Option<NavMeshTile>> {
        let tiles = self.tiles.lock();
        tiles
            .get(key)
            .map(|bytes| NavMeshTile::from_bytes(bytes))
            .transpose()
    }

    fn store_tile(&self, key: &NavMeshTileKey, tile: &NavMeshTile) -> Result<()> {
        let bytes = tile.to_bytes()?;
        self.tiles.lock().insert(key.clone(), bytes);
        Ok(())
    }
}

/// One lz4 compressed file per tile under a directory.
///
/// Each file starts with the full key so that a file name collision reads as
/// a miss rather than as the wrong tile.
#[derive(Debug)]
pub struct FileNavMeshDb {
    dir: PathBuf,
}

impl FileNavMeshDb {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileNavMeshDb { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &NavMeshTileKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl NavMeshDb for FileNavMeshDb {
    fn load_tile(&self, key: &NavMeshTileKey) -> Result<Option<NavMeshTile>> {
        let compressed = match fs::read(self.path(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| Error::Serialization(format!("corrupt tile file: {e}")))?;

        let mut reader = data.as_slice();
        let key_len = reader.read_u32::<LittleEndian>()? as usize;
        if key_len > reader.len() {
            return Err(Error::Serialization("truncated tile key".to_string()));
        }
        let (stored_key, mut reader) = reader.split_at(key_len);
        if stored_key != key.to_bytes().as_slice() {
            return Ok(None);
        }
        NavMeshTile::read(&mut reader).map(Some)
    }

    fn store_tile(&self, key: &NavMeshTileKey, tile: &NavMeshTile) -> Result<()> {
        let key_bytes = key.to_bytes();
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(key_bytes.len() as u32)?;
        data.extend_from_slice(&key_bytes);
        tile.write(&mut data)?;

        let path = self.path(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, lz4_flex::compress_prepend_size(&data))?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav_mesh_tile::NavPolygon;
    use crate::recast_mesh::MeshSource;
    use crate::types::{AreaType, ObjectId};
    use navigator_common::Aabb;
    use std::sync::Arc;

    fn tile() -> NavMeshTile {
        NavMeshTile {
            tile: TilePosition::new(1, 2),
            polygons: vec![NavPolygon {
                vertices: vec![Vec3::ZERO, Vec3::Z, Vec3::X],
                area_type: AreaType::Ground,
            }],
            off_mesh_connections: Vec::new(),
            source_objects: vec![ObjectId(3)],
        }
    }

    fn key(hash_byte: u8) -> NavMeshTileKey {
        NavMeshTileKey::new(
            "sys::default",
            TilePosition::new(1, 2),
            Vec3::new(0.3, 0.9, 0.3),
            [hash_byte; 20],
        )
    }

    fn mesh_with(level: f32) -> RecastMesh {
        let triangle = [Vec3::new(0.0, level, 0.0), Vec3::Z, Vec3::X];
        let mut mesh = RecastMesh::empty(TilePosition::new(0, 0), 1);
        mesh.meshes.push(Arc::new(MeshSource {
            object_id: ObjectId(1),
            area_type: AreaType::Ground,
            triangles: vec![triangle].into(),
            bounds: Aabb::from_points(triangle).unwrap(),
        }));
        mesh
    }

    #[test]
    fn test_input_hash_tracks_content() {
        let settings = NavigatorSettings::default();
        let half_extents = Vec3::new(0.3, 0.9, 0.3);
        let a = compute_input_hash(&mesh_with(0.0), &[], half_extents, &settings);

        let mut same = mesh_with(0.0);
        same.revision = 42;
        assert_eq!(a, compute_input_hash(&same, &[], half_extents, &settings));

        assert_ne!(a, compute_input_hash(&mesh_with(1.0), &[], half_extents, &settings));
        assert_ne!(
            a,
            compute_input_hash(&mesh_with(0.0), &[], Vec3::new(0.5, 0.9, 0.5), &settings)
        );
        assert_ne!(
            a,
            compute_input_hash(
                &mesh_with(0.0),
                &[],
                half_extents,
                &settings.clone().with_max_slope_degrees(30.0)
            )
        );
    }

    #[test]
    fn test_memory_db() {
        let db = MemoryNavMeshDb::new();
        assert!(db.load_tile(&key(1)).unwrap().is_none());
        db.store_tile(&key(1), &tile()).unwrap();
        assert_eq!(db.load_tile(&key(1)).unwrap(), Some(tile()));
        assert!(db.load_tile(&key(2)).unwrap().is_none());
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_file_db_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = FileNavMeshDb::open(dir.path()).unwrap();
            assert!(db.load_tile(&key(1)).unwrap().is_none());
            db.store_tile(&key(1), &tile()).unwrap();
        }
        let db = FileNavMeshDb::open(dir.path()).unwrap();
        assert_eq!(db.load_tile(&key(1)).unwrap(), Some(tile()));
        assert!(db.load_tile(&key(2)).unwrap().is_none());
    }

    #[test]
    fn test_file_db_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = FileNavMeshDb::open(dir.path()).unwrap();
        fs::write(dir.path().join(key(1).file_name()), [4, 0, 0, 0, 0xff, 0xff]).unwrap();
        assert!(db.load_tile(&key(1)).is_err());
    }
}
