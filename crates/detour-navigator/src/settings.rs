use serde::{Deserialize, Serialize};

/// Settings shared by the geometry cache, the scheduler and the tile builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorSettings {
    /// Horizontal voxel size in world units
    pub cell_size: f32,
    /// Number of cells along one tile edge
    pub tile_size: i32,
    /// Chebyshev radius, in tiles, of the window kept around the player
    pub max_tiles_radius: i32,
    /// Radius, in tiles, that `WaitConditionType::RequiredTilesPresent` waits for
    pub wait_until_min_distance_to_player: i32,
    /// Number of background worker threads building tiles
    pub async_updater_threads: usize,
    /// Steepest walkable slope in degrees
    pub max_slope_degrees: f32,
    /// Look up built tiles in the tile database before building
    pub enable_nav_mesh_disk_cache: bool,
    /// Store freshly built tiles in the tile database
    pub write_to_nav_mesh_db: bool,
}

impl NavigatorSettings {
    pub fn new(cell_size: f32, tile_size: i32) -> Self {
        NavigatorSettings {
            cell_size,
            tile_size,
            max_tiles_radius: 8,
            wait_until_min_distance_to_player: 5,
            async_updater_threads: 1,
            max_slope_degrees: 46.0,
            enable_nav_mesh_disk_cache: true,
            write_to_nav_mesh_db: true,
        }
    }

    pub fn with_max_tiles_radius(mut self, max_tiles_radius: i32) -> Self {
        self.max_tiles_radius = max_tiles_radius;
        self
    }

    pub fn with_wait_until_min_distance_to_player(mut self, distance: i32) -> Self {
        self.wait_until_min_distance_to_player = distance;
        self
    }

    pub fn with_async_updater_threads(mut self, threads: usize) -> Self {
        self.async_updater_threads = threads;
        self
    }

    pub fn with_max_slope_degrees(mut self, max_slope_degrees: f32) -> Self {
        self.max_slope_degrees = max_slope_degrees;
        self
    }

    pub fn with_nav_mesh_disk_cache(mut self, enable: bool, write: bool) -> Self {
        self.enable_nav_mesh_disk_cache = enable;
        self.write_to_nav_mesh_db = write;
        self
    }

    /// World-space length of a tile edge
    pub fn tile_world_size(&self) -> f32 {
        self.cell_size * self.tile_size as f32
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.cell_size > 0.0) {
            return Err("Cell size must be positive".to_string());
        }
        if self.tile_size <= 0 {
            return Err("Tile size must be positive".to_string());
        }
        if self.max_tiles_radius < 0 {
            return Err("Max tiles radius cannot be negative".to_string());
        }
        if self.wait_until_min_distance_to_player < 0 {
            return Err("Wait distance cannot be negative".to_string());
        }
        if self.async_updater_threads == 0 {
            return Err("At least one async updater thread is required".to_string());
        }
        if !(0.0..=90.0).contains(&self.max_slope_degrees) {
            return Err("Max slope must be within [0, 90] degrees".to_string());
        }
        Ok(())
    }
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self::new(0.25, 64)
    }
}
