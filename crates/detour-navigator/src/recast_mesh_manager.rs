//! Tile-keyed, versioned store of raw world geometry
//!
//! Geometry here is agent-agnostic. Every mutation draws one new value from a
//! global revision counter and stamps it on each tile it touches, so tile
//! revisions strictly increase and are never reused, even across worldspace
//! switches. Readers receive immutable [`RecastMesh`] snapshots that are
//! cached per tile until the next change to that tile.
//!
//! Only tiles inside the current [`TilesRange`] are indexed. Objects, water
//! and heightfields keep their full bounds and are re-indexed when the range
//! moves, so a huge or far-away shape costs at most the tiles of the range.

use crate::collision_shape::CollisionShape;
use crate::heightfield::{Heightfield, HeightfieldShape, Water};
use crate::recast_mesh::{MeshSource, RecastMesh};
use crate::settings::NavigatorSettings;
use crate::tile_position::{tiles_for_aabb, tiles_for_cell, TilePosition, TilesRange, TilesWindow};
use crate::types::{AreaType, ObjectId};
use glam::{Affine3A, IVec2};
use navigator_common::{Aabb, Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub type SharedRecastMeshManager = Arc<Mutex<TileCachedRecastMeshManager>>;

/// Snapshot of every known tile, keyed by position.
pub type RecastMeshTiles = BTreeMap<TilePosition, Arc<RecastMesh>>;

/// Geometry registered for one object.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub shape: CollisionShape,
    pub transform: Affine3A,
    pub area_type: AreaType,
    pub source: Arc<MeshSource>,
    /// Indexed tiles covered by the object's bounds
    pub tiles: Vec<TilePosition>,
}

/// Tiles touched by an object update, before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpdate {
    pub old_tiles: Vec<TilePosition>,
    pub new_tiles: Vec<TilePosition>,
}

/// Tiles that entered and left the index when the range moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeUpdate {
    pub added: Vec<TilePosition>,
    pub removed: Vec<TilePosition>,
}

#[derive(Debug, Default)]
struct CachedTile {
    revision: u64,
    objects: BTreeSet<ObjectId>,
    water: BTreeSet<(i32, i32)>,
    heightfields: BTreeSet<(i32, i32)>,
    snapshot: Option<Arc<RecastMesh>>,
}

impl CachedTile {
    fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.water.is_empty() && self.heightfields.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecastMeshManagerStats {
    pub revision: u64,
    pub tiles: usize,
    pub objects: usize,
    pub water: usize,
    pub heightfields: usize,
}

fn cell_key(cell_position: IVec2) -> (i32, i32) {
    (cell_position.x, cell_position.y)
}

pub struct TileCachedRecastMeshManager {
    settings: NavigatorSettings,
    worldspace: String,
    revision: u64,
    range: TilesRange,
    objects: HashMap<ObjectId, ObjectEntry>,
    water: HashMap<(i32, i32), (Water, Vec<TilePosition>)>,
    heightfields: HashMap<(i32, i32), (Arc<Heightfield>, Vec<TilePosition>)>,
    tiles: BTreeMap<TilePosition, CachedTile>,
}

impl TileCachedRecastMeshManager {
    /// Starts with the range of the player window around the origin.
    pub fn new(settings: NavigatorSettings) -> Self {
        let range = TilesWindow::new(TilePosition::new(0, 0), settings.max_tiles_radius).range();
        TileCachedRecastMeshManager {
            settings,
            worldspace: String::new(),
            revision: 0,
            range,
            objects: HashMap::new(),
            water: HashMap::new(),
            heightfields: HashMap::new(),
            tiles: BTreeMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedRecastMeshManager {
        Arc::new(Mutex::new(self))
    }

    pub fn worldspace(&self) -> &str {
        &self.worldspace
    }

    /// Current global revision; changes whenever any tile changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Switches the active worldspace, dropping all geometry. Returns false when
    /// `worldspace` is already active.
    pub fn set_worldspace(&mut self, worldspace: &str) -> bool {
        if self.worldspace == worldspace {
            return false;
        }
        self.worldspace = worldspace.to_string();
        self.objects.clear();
        self.water.clear();
        self.heightfields.clear();
        self.tiles.clear();
        self.revision += 1;
        true
    }

    pub fn range(&self) -> TilesRange {
        self.range
    }

    /// Moves the indexed range. Tiles leaving it are dropped from the index,
    /// tiles entering it are indexed from the stored geometry under one new
    /// revision.
    pub fn set_range(&mut self, range: TilesRange) -> RangeUpdate {
        if range == self.range {
            return RangeUpdate::default();
        }
        let old = std::mem::replace(&mut self.range, range);

        let removed: Vec<TilePosition> = self
            .tiles
            .keys()
            .filter(|tile| !range.contains(tile))
            .copied()
            .collect();
        for tile in &removed {
            self.tiles.remove(tile);
        }

        let mut added = BTreeSet::new();
        for entry in self.objects.values_mut() {
            entry.tiles = tiles_for_aabb(&self.settings, &entry.source.bounds, &range);
            added.extend(entry.tiles.iter().filter(|tile| !old.contains(tile)));
        }
        for (water, tiles) in self.water.values_mut() {
            *tiles = tiles_for_cell(&self.settings, water.cell_position, water.cell_size, &range);
            added.extend(tiles.iter().filter(|tile| !old.contains(tile)));
        }
        for (heightfield, tiles) in self.heightfields.values_mut() {
            *tiles = tiles_for_aabb(&self.settings, &heightfield.bounds(), &range);
            added.extend(tiles.iter().filter(|tile| !old.contains(tile)));
        }

        if !added.is_empty() || !removed.is_empty() {
            self.revision += 1;
        }
        for tile in &added {
            self.tiles.insert(
                *tile,
                CachedTile {
                    revision: self.revision,
                    ..CachedTile::default()
                },
            );
        }
        for (id, entry) in &self.objects {
            for tile in entry.tiles.iter().filter(|tile| added.contains(tile)) {
                if let Some(cached) = self.tiles.get_mut(tile) {
                    cached.objects.insert(*id);
                }
            }
        }
        for (key, (_, tiles)) in &self.water {
            for tile in tiles.iter().filter(|tile| added.contains(tile)) {
                if let Some(cached) = self.tiles.get_mut(tile) {
                    cached.water.insert(*key);
                }
            }
        }
        for (key, (_, tiles)) in &self.heightfields {
            for tile in tiles.iter().filter(|tile| added.contains(tile)) {
                if let Some(cached) = self.tiles.get_mut(tile) {
                    cached.heightfields.insert(*key);
                }
            }
        }

        log::debug!(
            "Recast mesh range moved to {}..={} ({} tiles): {} added, {} removed",
            range.min,
            range.max,
            range.area(),
            added.len(),
            removed.len()
        );
        RangeUpdate {
            added: added.into_iter().collect(),
            removed,
        }
    }

    /// Starts a mutation batch: one new revision stamped on every touched tile.
    /// Nothing changes when no tile is touched.
    fn touch<'a, I>(&mut self, tiles: I)
    where
        I: IntoIterator<Item = &'a TilePosition>,
    {
        let mut tiles = tiles.into_iter().peekable();
        if tiles.peek().is_none() {
            return;
        }
        self.revision += 1;
        for tile in tiles {
            let cached = self.tiles.entry(*tile).or_default();
            cached.revision = self.revision;
            cached.snapshot = None;
        }
    }

    fn make_entry(
        &self,
        id: ObjectId,
        shape: &CollisionShape,
        transform: &Affine3A,
        area_type: AreaType,
    ) -> Result<Option<ObjectEntry>> {
        let triangles = shape.world_triangles(transform)?;
        let Some(bounds) = Aabb::from_points(triangles.iter().flatten().copied())
        else {
            return Ok(None);
        };
        if !bounds.is_finite() {
            return Ok(None);
        }
        let tiles = tiles_for_aabb(&self.settings, &bounds, &self.range);
        Ok(Some(ObjectEntry {
            shape: shape.clone(),
            transform: *transform,
            area_type,
            source: Arc::new(MeshSource {
                object_id: id,
                area_type,
                triangles: triangles.into(),
                bounds,
            }),
            tiles,
        }))
    }

    /// Registers a new object and returns the indexed tiles it covers, possibly
    /// none when it lies outside the range. `Ok(None)` if the id is taken or the
    /// shape has no finite triangles.
    pub fn add_object(
        &mut self,
        id: ObjectId,
        shape: &CollisionShape,
        transform: &Affine3A,
        area_type: AreaType,
    ) -> Result<Option<Vec<TilePosition>>> {
        if self.objects.contains_key(&id) {
            return Ok(None);
        }
        let Some(entry) = self.make_entry(id, shape, transform, area_type)? else {
            return Ok(None);
        };
        let tiles = entry.tiles.clone();
        self.touch(&tiles);
        for tile in &tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.objects.insert(id);
            }
        }
        self.objects.insert(id, entry);
        Ok(Some(tiles))
    }

    /// Replaces an object's geometry. `Ok(None)` if the id is unknown or nothing changed.
    pub fn update_object(
        &mut self,
        id: ObjectId,
        shape: &CollisionShape,
        transform: &Affine3A,
        area_type: AreaType,
    ) -> Result<Option<ObjectUpdate>> {
        let Some(current) = self.objects.get(&id) else {
            return Ok(None);
        };
        if current.shape == *shape && current.transform == *transform && current.area_type == area_type
        {
            return Ok(None);
        }
        let old_tiles = current.tiles.clone();
        let new_entry = self.make_entry(id, shape, transform, area_type)?;
        let new_tiles = new_entry
            .as_ref()
            .map(|entry| entry.tiles.clone())
            .unwrap_or_default();

        let touched: BTreeSet<TilePosition> =
            old_tiles.iter().chain(new_tiles.iter()).copied().collect();
        self.touch(&touched);
        for tile in &old_tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.objects.remove(&id);
            }
        }
        for tile in &new_tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.objects.insert(id);
            }
        }
        match new_entry {
            Some(entry) => {
                self.objects.insert(id, entry);
            }
            None => {
                self.objects.remove(&id);
            }
        }
        Ok(Some(ObjectUpdate {
            old_tiles,
            new_tiles,
        }))
    }

    /// Removes an object, returning the tiles it covered when it was stored.
    pub fn remove_object(&mut self, id: ObjectId) -> Option<Vec<TilePosition>> {
        let entry = self.objects.remove(&id)?;
        self.touch(&entry.tiles);
        for tile in &entry.tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.objects.remove(&id);
            }
        }
        Some(entry.tiles)
    }

    pub fn add_water(
        &mut self,
        cell_position: IVec2,
        cell_size: i32,
        level: f32,
    ) -> Option<Vec<TilePosition>> {
        let key = cell_key(cell_position);
        if self.water.contains_key(&key) || cell_size <= 0 || !level.is_finite() {
            return None;
        }
        let water = Water {
            cell_position,
            cell_size,
            level,
        };
        let tiles = tiles_for_cell(&self.settings, cell_position, cell_size, &self.range);
        self.touch(&tiles);
        for tile in &tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.water.insert(key);
            }
        }
        self.water.insert(key, (water, tiles.clone()));
        Some(tiles)
    }

    pub fn remove_water(&mut self, cell_position: IVec2) -> Option<Vec<TilePosition>> {
        let key = cell_key(cell_position);
        let (_, tiles) = self.water.remove(&key)?;
        self.touch(&tiles);
        for tile in &tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.water.remove(&key);
            }
        }
        Some(tiles)
    }

    pub fn add_heightfield(
        &mut self,
        cell_position: IVec2,
        cell_size: i32,
        shape: &HeightfieldShape,
    ) -> Result<Option<Vec<TilePosition>>> {
        shape.validate()?;
        let key = cell_key(cell_position);
        if self.heightfields.contains_key(&key) || cell_size <= 0 {
            return Ok(None);
        }
        let heightfield = Heightfield {
            cell_position,
            cell_size,
            shape: shape.clone(),
        };
        let tiles = tiles_for_aabb(&self.settings, &heightfield.bounds(), &self.range);
        self.touch(&tiles);
        for tile in &tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.heightfields.insert(key);
            }
        }
        self.heightfields
            .insert(key, (Arc::new(heightfield), tiles.clone()));
        Ok(Some(tiles))
    }

    pub fn remove_heightfield(&mut self, cell_position: IVec2) -> Option<Vec<TilePosition>> {
        let key = cell_key(cell_position);
        let (_, tiles) = self.heightfields.remove(&key)?;
        self.touch(&tiles);
        for tile in &tiles {
            if let Some(cached) = self.tiles.get_mut(tile) {
                cached.heightfields.remove(&key);
            }
        }
        Some(tiles)
    }

    /// Bumps the revision of tiles whose build input changed outside this store
    /// (off-mesh connection endpoints). Unknown tiles inside the range become
    /// empty placeholders; tiles outside it are ignored. Returns the touched tiles.
    pub fn invalidate_tiles(&mut self, tiles: &[TilePosition]) -> Vec<TilePosition> {
        let range = self.range;
        let tiles: Vec<TilePosition> = tiles
            .iter()
            .filter(|tile| range.contains(tile))
            .copied()
            .collect();
        self.touch(&tiles);
        tiles
    }

    /// Raw lookup of a registered object. A miss is a caller bug and is reported as an error.
    pub fn object(&self, id: ObjectId) -> Result<&ObjectEntry> {
        self.objects
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("{id} is not registered")))
    }

    /// Revision of a known tile; `None` for a tile never touched.
    pub fn tile_revision(&self, tile: &TilePosition) -> Option<u64> {
        self.tiles.get(tile).map(|cached| cached.revision)
    }

    /// True if the tile is unknown or holds no geometry.
    pub fn is_empty_tile(&self, tile: &TilePosition) -> bool {
        self.tiles.get(tile).map_or(true, CachedTile::is_empty)
    }

    /// Geometry snapshot of a tile in `worldspace`. `None` for another worldspace or an unknown tile.
    pub fn get_mesh(&mut self, worldspace: &str, tile: &TilePosition) -> Option<Arc<RecastMesh>> {
        if self.worldspace != worldspace {
            return None;
        }
        let cached = self.tiles.get(tile)?;
        if let Some(snapshot) = &cached.snapshot {
            return Some(Arc::clone(snapshot));
        }
        let snapshot = Arc::new(self.make_snapshot(*tile, cached));
        if let Some(cached) = self.tiles.get_mut(tile) {
            cached.snapshot = Some(Arc::clone(&snapshot));
        }
        Some(snapshot)
    }

    fn make_snapshot(&self, tile: TilePosition, cached: &CachedTile) -> RecastMesh {
        let mut mesh = RecastMesh::empty(tile, cached.revision);
        mesh.meshes = cached
            .objects
            .iter()
            .filter_map(|id| self.objects.get(id))
            .map(|entry| Arc::clone(&entry.source))
            .collect();
        mesh.water = cached
            .water
            .iter()
            .filter_map(|key| self.water.get(key))
            .map(|(water, _)| *water)
            .collect();
        mesh.heightfields = cached
            .heightfields
            .iter()
            .filter_map(|key| self.heightfields.get(key))
            .map(|(heightfield, _)| Arc::clone(heightfield))
            .collect();
        mesh
    }

    /// Visits every known tile with its revision, empty placeholders included.
    pub fn for_each_tile<F>(&self, mut f: F)
    where
        F: FnMut(&TilePosition, u64),
    {
        for (tile, cached) in &self.tiles {
            f(tile, cached.revision);
        }
    }

    /// Snapshots of every known tile in the active worldspace.
    pub fn recast_mesh_tiles(&mut self) -> RecastMeshTiles {
        let worldspace = self.worldspace.clone();
        let tiles: Vec<TilePosition> = self.tiles.keys().copied().collect();
        tiles
            .into_iter()
            .filter_map(|tile| self.get_mesh(&worldspace, &tile).map(|mesh| (tile, mesh)))
            .collect()
    }

    pub fn stats(&self) -> RecastMeshManagerStats {
        RecastMeshManagerStats {
            revision: self.revision,
            tiles: self.tiles.len(),
            objects: self.objects.len(),
            water: self.water.len(),
            heightfields: self.heightfields.len(),
        }
    }
}
