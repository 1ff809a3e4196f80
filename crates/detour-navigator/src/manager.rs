//! Top-level navigation mesh manager
//!
//! Turns world mutations into geometry cache updates, tracks which tiles each
//! agent size has to rebuild and hands them to the background updater once per
//! [`NavMeshManager::update`]. Readers get the per-agent cache item, which may
//! lag behind the latest geometry until [`NavMeshManager::wait`] returns.

use crate::agent::{AgentHandle, AgentRegistry};
use crate::async_updater::AsyncNavMeshUpdater;
use crate::collision_shape::CollisionShape;
use crate::heightfield::HeightfieldShape;
use crate::nav_mesh_cache::{GuardedNavMeshCacheItem, SharedNavMeshCacheItem};
use crate::nav_mesh_db::NavMeshDb;
use crate::offmesh_connections::{
    OffMeshConnection, OffMeshConnectionsManager, SharedOffMeshConnections,
};
use crate::progress::{Listener, WaitConditionType};
use crate::recast_mesh_manager::{
    RecastMeshTiles, SharedRecastMeshManager, TileCachedRecastMeshManager,
};
use crate::settings::NavigatorSettings;
use crate::stats::{NavMeshCacheStats, NavMeshManagerStats, StatsSink};
use crate::tile_builder::{TileBuilder, WalkableSurfaceBuilder};
use crate::tile_position::{tile_position, TilePosition, TilesWindow};
use crate::types::{AreaType, ChangeType, ObjectId};
use glam::{Affine3A, IVec2, Vec3};
use navigator_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug)]
struct AgentCache {
    half_extents: Vec3,
    item: SharedNavMeshCacheItem,
    generation: u64,
    changed_tiles: BTreeMap<TilePosition, ChangeType>,
    player_tile: Option<TilePosition>,
    last_recast_mesh_manager_revision: Option<u64>,
}

impl AgentCache {
    fn new(half_extents: Vec3, generation: u64) -> Self {
        AgentCache {
            half_extents,
            item: GuardedNavMeshCacheItem::shared(generation),
            generation,
            changed_tiles: BTreeMap::new(),
            player_tile: None,
            last_recast_mesh_manager_revision: None,
        }
    }
}

pub struct NavMeshManager {
    settings: NavigatorSettings,
    worldspace: String,
    recast_mesh_manager: SharedRecastMeshManager,
    off_mesh_connections: SharedOffMeshConnections,
    agents: AgentRegistry,
    cache: HashMap<AgentHandle, AgentCache>,
    generation_counter: u64,
    async_updater: AsyncNavMeshUpdater,
}

impl NavMeshManager {
    /// Manager building tiles with [`WalkableSurfaceBuilder`] and no tile database.
    pub fn new(settings: NavigatorSettings) -> Result<Self> {
        let builder = Arc::new(WalkableSurfaceBuilder::new(&settings));
        Self::with_builder(settings, builder, None)
    }

    pub fn with_builder(
        settings: NavigatorSettings,
        builder: Arc<dyn TileBuilder>,
        db: Option<Arc<dyn NavMeshDb>>,
    ) -> Result<Self> {
        settings.validate().map_err(Error::InvalidSettings)?;
        let recast_mesh_manager = TileCachedRecastMeshManager::new(settings.clone()).into_shared();
        let off_mesh_connections = OffMeshConnectionsManager::new(settings.clone()).into_shared();
        let async_updater = AsyncNavMeshUpdater::new(
            settings.clone(),
            Arc::clone(&recast_mesh_manager),
            Arc::clone(&off_mesh_connections),
            builder,
            db,
        )?;
        Ok(NavMeshManager {
            settings,
            worldspace: String::new(),
            recast_mesh_manager,
            off_mesh_connections,
            agents: AgentRegistry::new(),
            cache: HashMap::new(),
            generation_counter: 0,
            async_updater,
        })
    }

    pub fn settings(&self) -> &NavigatorSettings {
        &self.settings
    }

    pub fn worldspace(&self) -> &str {
        &self.worldspace
    }

    fn next_generation(&mut self) -> u64 {
        self.generation_counter += 1;
        self.generation_counter
    }

    /// Switches to another worldspace. Geometry and off-mesh connections of the
    /// previous one are dropped and every agent starts over with an empty mesh.
    pub fn set_worldspace(&mut self, worldspace: &str) {
        if !self.recast_mesh_manager.lock().set_worldspace(worldspace) {
            return;
        }
        log::info!("Switching nav mesh worldspace to \"{worldspace}\"");
        self.worldspace = worldspace.to_string();
        self.off_mesh_connections.lock().clear();
        let handles: Vec<AgentHandle> = self.cache.keys().copied().collect();
        for handle in handles {
            let generation = self.next_generation();
            if let Some(agent) = self.cache.get_mut(&handle) {
                *agent = AgentCache::new(agent.half_extents, generation);
            }
        }
    }

    fn add_changed_tiles<'a, I>(&mut self, tiles: I, change_type: ChangeType)
    where
        I: IntoIterator<Item = &'a TilePosition>,
    {
        let tiles: Vec<TilePosition> = tiles.into_iter().copied().collect();
        for agent in self.cache.values_mut() {
            for tile in &tiles {
                agent
                    .changed_tiles
                    .entry(*tile)
                    .and_modify(|current| *current = current.merge(change_type))
                    .or_insert(change_type);
            }
        }
    }

    /// Adds an object. `Ok(false)` if the id is taken or the shape has no finite triangles.
    pub fn add_object(
        &mut self,
        id: ObjectId,
        shape: &CollisionShape,
        transform: &Affine3A,
        area_type: AreaType,
    ) -> Result<bool> {
        let tiles = self
            .recast_mesh_manager
            .lock()
            .add_object(id, shape, transform, area_type)?;
        let Some(tiles) = tiles else {
            return Ok(false);
        };
        self.add_changed_tiles(&tiles, ChangeType::Add);
        Ok(true)
    }

    /// Replaces an object's geometry. `Ok(false)` if the id is unknown or nothing changed.
    pub fn update_object(
        &mut self,
        id: ObjectId,
        shape: &CollisionShape,
        transform: &Affine3A,
        area_type: AreaType,
    ) -> Result<bool> {
        let update = self
            .recast_mesh_manager
            .lock()
            .update_object(id, shape, transform, area_type)?;
        let Some(update) = update else {
            return Ok(false);
        };
        let old: BTreeSet<TilePosition> = update.old_tiles.into_iter().collect();
        let new: BTreeSet<TilePosition> = update.new_tiles.into_iter().collect();
        self.add_changed_tiles(old.difference(&new), ChangeType::Remove);
        self.add_changed_tiles(new.difference(&old), ChangeType::Add);
        self.add_changed_tiles(old.intersection(&new), ChangeType::Update);
        Ok(true)
    }

    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        let tiles = self.recast_mesh_manager.lock().remove_object(id);
        let Some(tiles) = tiles else {
            return false;
        };
        self.add_changed_tiles(&tiles, ChangeType::Remove);
        true
    }

    pub fn add_water(&mut self, cell_position: IVec2, cell_size: i32, level: f32) -> bool {
        let tiles = self
            .recast_mesh_manager
            .lock()
            .add_water(cell_position, cell_size, level);
        let Some(tiles) = tiles else {
            return false;
        };
        self.add_changed_tiles(&tiles, ChangeType::Add);
        true
    }

    pub fn remove_water(&mut self, cell_position: IVec2) -> bool {
        let tiles = self.recast_mesh_manager.lock().remove_water(cell_position);
        let Some(tiles) = tiles else {
            return false;
        };
        self.add_changed_tiles(&tiles, ChangeType::Remove);
        true
    }

    pub fn add_heightfield(
        &mut self,
        cell_position: IVec2,
        cell_size: i32,
        shape: &HeightfieldShape,
    ) -> Result<bool> {
        let tiles = self
            .recast_mesh_manager
            .lock()
            .add_heightfield(cell_position, cell_size, shape)?;
        let Some(tiles) = tiles else {
            return Ok(false);
        };
        self.add_changed_tiles(&tiles, ChangeType::Add);
        Ok(true)
    }

    pub fn remove_heightfield(&mut self, cell_position: IVec2) -> bool {
        let tiles = self
            .recast_mesh_manager
            .lock()
            .remove_heightfield(cell_position);
        let Some(tiles) = tiles else {
            return false;
        };
        self.add_changed_tiles(&tiles, ChangeType::Remove);
        true
    }

    /// Registers an agent size. Calling it again for the same size is a no-op.
    pub fn add_agent(&mut self, half_extents: Vec3) -> AgentHandle {
        let handle = self.agents.intern(half_extents);
        if !self.cache.contains_key(&handle) {
            let generation = self.next_generation();
            log::info!("Adding nav mesh agent {handle} with half extents {half_extents}");
            self.cache
                .insert(handle, AgentCache::new(half_extents, generation));
        }
        handle
    }

    /// Drops the mesh of an agent size. Jobs already posted for it are
    /// discarded when they finish; the agent has to be added again.
    pub fn reset(&mut self, half_extents: Vec3) -> bool {
        let Some(handle) = self.agents.get(half_extents) else {
            return false;
        };
        let Some(agent) = self.cache.remove(&handle) else {
            return false;
        };
        let generation = self.next_generation();
        agent.item.write().invalidate(generation);
        log::debug!("Reset nav mesh agent {handle}");
        true
    }

    pub fn add_off_mesh_connection(
        &mut self,
        id: ObjectId,
        start: Vec3,
        end: Vec3,
        area_type: AreaType,
    ) {
        let connection = OffMeshConnection {
            start,
            end,
            area_type,
        };
        let tiles = self.off_mesh_connections.lock().add(id, connection);
        let tiles = self.recast_mesh_manager.lock().invalidate_tiles(&tiles);
        self.add_changed_tiles(&tiles, ChangeType::Add);
    }

    pub fn remove_off_mesh_connections(&mut self, id: ObjectId) {
        let tiles: Vec<TilePosition> = self
            .off_mesh_connections
            .lock()
            .remove(id)
            .into_iter()
            .collect();
        let tiles = self.recast_mesh_manager.lock().invalidate_tiles(&tiles);
        self.add_changed_tiles(&tiles, ChangeType::Remove);
    }

    /// Moves the range of tiles indexed by the geometry cache to the player
    /// window around `player_position`. Tiles entering the range are marked for
    /// every agent; tiles leaving it are removed by the next `update`.
    pub fn update_bounds(&mut self, player_position: Vec3) {
        let player_tile = tile_position(&self.settings, player_position);
        let range = TilesWindow::new(player_tile, self.settings.max_tiles_radius).range();
        let connection_tiles: Vec<TilePosition> = self
            .off_mesh_connections
            .lock()
            .tiles()
            .filter(|tile| range.contains(tile))
            .copied()
            .collect();

        let added = {
            let mut recast = self.recast_mesh_manager.lock();
            let old = recast.range();
            if old == range {
                return;
            }
            let update = recast.set_range(range);
            let entered: Vec<TilePosition> = connection_tiles
                .into_iter()
                .filter(|tile| !old.contains(tile))
                .collect();
            let mut added = update.added;
            added.extend(recast.invalidate_tiles(&entered));
            added
        };
        self.add_changed_tiles(&added, ChangeType::Add);
    }

    /// Posts build jobs for one agent size around `player_position`, moving the
    /// indexed range first.
    ///
    /// Does nothing when neither the geometry nor the player tile changed since
    /// the last call and no failed tile awaits a retry.
    pub fn update(&mut self, player_position: Vec3, agent_half_extents: Vec3) {
        self.update_bounds(player_position);
        let Some(handle) = self.agents.get(agent_half_extents) else {
            return;
        };
        let Some(agent) = self.cache.get_mut(&handle) else {
            return;
        };

        let player_tile = tile_position(&self.settings, player_position);
        // The cache item lock is never taken while holding the geometry lock
        let has_failed_tiles = agent.item.read().has_failed_tiles();
        let (revision, geometry) = {
            let recast = self.recast_mesh_manager.lock();
            let revision = recast.revision();
            if agent.changed_tiles.is_empty()
                && agent.player_tile == Some(player_tile)
                && agent.last_recast_mesh_manager_revision == Some(revision)
                && !has_failed_tiles
            {
                return;
            }
            let window = TilesWindow::new(player_tile, self.settings.max_tiles_radius);
            let mut geometry = HashMap::new();
            recast.for_each_tile(|tile, tile_revision| {
                if window.contains(tile) {
                    geometry.insert(*tile, (tile_revision, recast.is_empty_tile(tile)));
                }
            });
            (revision, geometry)
        };
        let window = TilesWindow::new(player_tile, self.settings.max_tiles_radius);

        let mut changed = std::mem::take(&mut agent.changed_tiles);
        {
            let off_mesh_connections = self.off_mesh_connections.lock();
            let mut item = agent.item.write();
            for (tile, (tile_revision, _)) in &geometry {
                let behind = item
                    .published_revision(tile)
                    .map_or(true, |published| published < *tile_revision);
                if behind {
                    changed.entry(*tile).or_insert(ChangeType::Update);
                }
            }
            let outside: Vec<TilePosition> = item
                .published_positions()
                .filter(|tile| !window.contains(tile))
                .copied()
                .collect();
            for tile in outside {
                changed.entry(tile).or_insert(ChangeType::Remove);
            }

            changed.retain(|tile, _| {
                if !window.contains(tile) {
                    return item.published_revision(tile).is_some();
                }
                let Some((tile_revision, empty)) = geometry.get(tile) else {
                    return false;
                };
                let has_mesh = item.tile(tile).is_some();
                if *empty && !has_mesh && off_mesh_connections.get(tile).is_empty() {
                    item.set_tile(*tile, *tile_revision, None);
                    return false;
                }
                true
            });
        }

        agent.player_tile = Some(player_tile);
        agent.last_recast_mesh_manager_revision = Some(revision);
        if changed.is_empty() {
            return;
        }
        log::debug!(
            "Posting {} nav mesh jobs for {handle} around tile {player_tile}",
            changed.len()
        );
        self.async_updater.post(
            handle,
            agent.half_extents,
            &agent.item,
            agent.generation,
            player_tile,
            &self.worldspace,
            &changed,
        );
    }

    /// Blocks until the jobs selected by `condition` are done.
    pub fn wait(&self, listener: &mut dyn Listener, condition: WaitConditionType) {
        self.async_updater.wait(listener, condition);
    }

    /// Current mesh of an agent size; never blocks on pending builds.
    pub fn get_nav_mesh(&self, agent_half_extents: Vec3) -> Option<SharedNavMeshCacheItem> {
        let handle = self.agents.get(agent_half_extents)?;
        self.cache.get(&handle).map(|agent| Arc::clone(&agent.item))
    }

    pub fn get_nav_meshes(&self) -> Vec<(Vec3, SharedNavMeshCacheItem)> {
        let mut meshes: Vec<(AgentHandle, Vec3, SharedNavMeshCacheItem)> = self
            .cache
            .iter()
            .map(|(handle, agent)| (*handle, agent.half_extents, Arc::clone(&agent.item)))
            .collect();
        meshes.sort_by_key(|(handle, _, _)| *handle);
        meshes
            .into_iter()
            .map(|(_, half_extents, item)| (half_extents, item))
            .collect()
    }

    pub fn get_recast_mesh_tiles(&self) -> RecastMeshTiles {
        self.recast_mesh_manager.lock().recast_mesh_tiles()
    }

    pub fn stats(&self) -> NavMeshManagerStats {
        let mut cache = NavMeshCacheStats {
            agents: self.cache.len(),
            ..Default::default()
        };
        for agent in self.cache.values() {
            let item = agent.item.read();
            cache.tiles += item.tile_count();
            cache.polygons += item.polygon_count();
            cache.memory_usage += item.memory_usage();
        }
        NavMeshManagerStats {
            updater: self.async_updater.stats(),
            recast: self.recast_mesh_manager.lock().stats(),
            cache,
            changed_tiles: self.cache.values().map(|agent| agent.changed_tiles.len()).sum(),
        }
    }

    pub fn report_stats(&self, frame: u64, sink: &mut dyn StatsSink) {
        self.stats().report(frame, sink);
    }
}
