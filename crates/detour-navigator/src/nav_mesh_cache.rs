//! Published navigation meshes, one per agent size
//!
//! A [`NavMeshCacheItem`] holds the latest built tile for every tile position
//! together with the geometry revision it was built from. Publication is
//! monotonic: a result for an equal or older revision than the one stored is
//! ignored. Readers take the read lock and see a consistent set of tiles while
//! workers publish under the write lock.

use crate::nav_mesh_tile::NavMeshTile;
use crate::tile_position::TilePosition;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Outcome of publishing a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateNavMeshStatus {
    /// Result was stale or for a tile that was not there
    Ignored,
    Added,
    Replaced,
    /// Tile had a mesh and now has none
    Removed,
    /// Tile has no walkable surface and had none before
    Empty,
}

impl UpdateNavMeshStatus {
    pub fn is_change(self) -> bool {
        !matches!(self, UpdateNavMeshStatus::Ignored | UpdateNavMeshStatus::Empty)
    }
}

#[derive(Debug, Clone)]
struct PublishedTile {
    /// Geometry revision the tile was built from
    revision: u64,
    mesh: Option<Arc<NavMeshTile>>,
}

#[derive(Debug)]
pub struct NavMeshCacheItem {
    generation: u64,
    nav_mesh_revision: u64,
    tiles: HashMap<TilePosition, PublishedTile>,
    failed_tiles: BTreeMap<TilePosition, u64>,
}

impl NavMeshCacheItem {
    pub fn new(generation: u64) -> Self {
        NavMeshCacheItem {
            generation,
            nav_mesh_revision: 0,
            tiles: HashMap::new(),
            failed_tiles: BTreeMap::new(),
        }
    }

    /// Generation the item was created for. Jobs carrying another generation
    /// must not publish into it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drops every tile and moves the item to `generation`, so results of
    /// jobs posted for the old generation are discarded on arrival.
    pub fn invalidate(&mut self, generation: u64) {
        self.generation = generation;
        self.tiles.clear();
        self.failed_tiles.clear();
        self.nav_mesh_revision += 1;
    }

    /// Increases on every published change.
    pub fn nav_mesh_revision(&self) -> u64 {
        self.nav_mesh_revision
    }

    pub fn published_revision(&self, tile: &TilePosition) -> Option<u64> {
        self.tiles.get(tile).map(|published| published.revision)
    }

    pub fn tile(&self, tile: &TilePosition) -> Option<&Arc<NavMeshTile>> {
        self.tiles.get(tile).and_then(|published| published.mesh.as_ref())
    }

    /// Built tiles with a walkable surface, in no particular order.
    pub fn tiles(&self) -> impl Iterator<Item = (&TilePosition, &Arc<NavMeshTile>)> + '_ {
        self.tiles
            .iter()
            .filter_map(|(position, published)| published.mesh.as_ref().map(|mesh| (position, mesh)))
    }

    /// Positions with a recorded result, empty ones included.
    pub fn published_positions(&self) -> impl Iterator<Item = &TilePosition> + '_ {
        self.tiles.keys()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles().count()
    }

    pub fn polygon_count(&self) -> usize {
        self.tiles().map(|(_, mesh)| mesh.polygon_count()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        self.tiles().map(|(_, mesh)| mesh.memory_usage()).sum()
    }

    /// Publishes the result of building `tile` from geometry at `revision`.
    pub fn set_tile(
        &mut self,
        tile: TilePosition,
        revision: u64,
        mesh: Option<Arc<NavMeshTile>>,
    ) -> UpdateNavMeshStatus {
        if self
            .published_revision(&tile)
            .is_some_and(|published| published >= revision)
        {
            return UpdateNavMeshStatus::Ignored;
        }
        if self
            .failed_tiles
            .get(&tile)
            .is_some_and(|failed| *failed <= revision)
        {
            self.failed_tiles.remove(&tile);
        }

        let had_mesh = self.tile(&tile).is_some();
        let status = match (had_mesh, mesh.is_some()) {
            (false, true) => UpdateNavMeshStatus::Added,
            (true, true) => UpdateNavMeshStatus::Replaced,
            (true, false) => UpdateNavMeshStatus::Removed,
            (false, false) => UpdateNavMeshStatus::Empty,
        };
        self.tiles.insert(tile, PublishedTile { revision, mesh });
        if status.is_change() {
            self.nav_mesh_revision += 1;
        }
        status
    }

    /// Forgets a tile that left the player window.
    pub fn remove_tile(&mut self, tile: &TilePosition) -> UpdateNavMeshStatus {
        self.failed_tiles.remove(tile);
        match self.tiles.remove(tile) {
            Some(PublishedTile { mesh: Some(_), .. }) => {
                self.nav_mesh_revision += 1;
                UpdateNavMeshStatus::Removed
            }
            Some(PublishedTile { mesh: None, .. }) => UpdateNavMeshStatus::Empty,
            None => UpdateNavMeshStatus::Ignored,
        }
    }

    /// Records a failed build. The previously published state is kept.
    pub fn mark_failed(&mut self, tile: TilePosition, revision: u64) {
        let entry = self.failed_tiles.entry(tile).or_insert(revision);
        *entry = (*entry).max(revision);
    }

    pub fn has_failed_tiles(&self) -> bool {
        !self.failed_tiles.is_empty()
    }
}

/// [`NavMeshCacheItem`] behind a read-write lock.
#[derive(Debug)]
pub struct GuardedNavMeshCacheItem {
    item: RwLock<NavMeshCacheItem>,
}

pub type SharedNavMeshCacheItem = Arc<GuardedNavMeshCacheItem>;

impl GuardedNavMeshCacheItem {
    pub fn new(generation: u64) -> Self {
        GuardedNavMeshCacheItem {
            item: RwLock::new(NavMeshCacheItem::new(generation)),
        }
    }

    pub fn shared(generation: u64) -> SharedNavMeshCacheItem {
        Arc::new(Self::new(generation))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, NavMeshCacheItem> {
        self.item.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, NavMeshCacheItem> {
        self.item.write()
    }
}
