//! Navigation mesh management over a dynamic world
//!
//! This crate keeps one tiled navigation mesh per agent size up to date while
//! collision geometry, water and terrain are added, moved and removed. Tiles are
//! rebuilt incrementally on a pool of background threads; readers always get the
//! latest published mesh without blocking.
//!
//! # Features
//!
//! - **Tile-keyed geometry cache**: versioned per-tile snapshots of world geometry
//! - **Per-agent meshes**: agent sizes are interned into handles
//! - **Background updates**: prioritized, de-duplicated tile jobs with generation checks
//! - **Off-mesh connections**: explicit links between points, attached to tiles
//! - **Tile database**: built tiles keyed by a hash of their input, in memory or on disk
//!
//! # Example
//!
//! ```rust,no_run
//! use detour_navigator::{
//!     AreaType, CollisionShape, NavMeshManager, NavigatorSettings, NullListener, ObjectId,
//!     TilePosition, WaitConditionType,
//! };
//! use glam::{Affine3A, Vec3};
//!
//! # fn example() -> navigator_common::Result<()> {
//! let settings = NavigatorSettings::new(0.25, 64).with_max_tiles_radius(4);
//! let mut manager = NavMeshManager::new(settings)?;
//! manager.set_worldspace("sys::default");
//!
//! let agent = Vec3::new(0.3, 0.9, 0.3);
//! manager.add_agent(agent);
//!
//! // A crate standing in the first tile
//! manager.add_object(
//!     ObjectId(1),
//!     &CollisionShape::new_box(Vec3::ONE),
//!     &Affine3A::from_translation(Vec3::new(4.0, 0.0, 4.0)),
//!     AreaType::Ground,
//! )?;
//!
//! manager.update(Vec3::ZERO, agent);
//! manager.wait(&mut NullListener, WaitConditionType::RequiredTilesPresent);
//!
//! if let Some(nav_mesh) = manager.get_nav_mesh(agent) {
//!     let nav_mesh = nav_mesh.read();
//!     if let Some(tile) = nav_mesh.tile(&TilePosition::new(0, 0)) {
//!         println!("Tile has {} polygons", tile.polygon_count());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod async_updater;
pub mod collision_shape;
pub mod heightfield;
pub mod manager;
pub mod nav_mesh_cache;
pub mod nav_mesh_db;
pub mod nav_mesh_tile;
pub mod offmesh_connections;
pub mod progress;
pub mod recast_mesh;
pub mod recast_mesh_manager;
pub mod settings;
pub mod stats;
pub mod tile_builder;
pub mod tile_position;
pub mod types;

pub use agent::{AgentHandle, AgentRegistry};
pub use async_updater::AsyncNavMeshUpdater;
pub use collision_shape::{CollisionShape, CompoundChild, Triangle};
pub use heightfield::{Heightfield, HeightfieldShape, Water};
pub use manager::NavMeshManager;
pub use nav_mesh_cache::{
    GuardedNavMeshCacheItem, NavMeshCacheItem, SharedNavMeshCacheItem,
    UpdateNavMeshStatus,
};
pub use nav_mesh_db::{
    compute_input_hash, FileNavMeshDb, MemoryNavMeshDb, NavMeshDb, NavMeshTileKey,
};
pub use nav_mesh_tile::{NavMeshTile, NavPolygon};
pub use offmesh_connections::{OffMeshConnection, OffMeshConnectionsManager};
pub use progress::{Listener, NullListener, WaitConditionType};
pub use recast_mesh::{MeshSource, RecastMesh};
pub use recast_mesh_manager::{RecastMeshTiles, TileCachedRecastMeshManager};
pub use settings::NavigatorSettings;
pub use stats::{NavMeshManagerStats, StatsSink, UpdaterStats};
pub use tile_builder::{TileBuildInput, TileBuilder, WalkableSurfaceBuilder};
pub use tile_position::{TilePosition, TilesWindow};
pub use types::{AreaType, ChangeType, ObjectId};

#[cfg(test)]
mod navigator_scenario_tests;
