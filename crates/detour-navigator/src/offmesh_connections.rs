//! Registry of user-defined off-mesh connections
//!
//! Pure data store. Connections are indexed by owning object and by the tiles
//! of their endpoints so the tile builder can fetch the ones relevant to a tile.

use crate::settings::NavigatorSettings;
use crate::tile_position::{tile_position, TilePosition};
use crate::types::{AreaType, ObjectId};
use glam::Vec3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    pub area_type: AreaType,
}

pub type SharedOffMeshConnections = Arc<Mutex<OffMeshConnectionsManager>>;

#[derive(Debug)]
pub struct OffMeshConnectionsManager {
    settings: NavigatorSettings,
    values: HashMap<ObjectId, Vec<OffMeshConnection>>,
    tiles: BTreeMap<TilePosition, BTreeSet<ObjectId>>,
}

impl OffMeshConnectionsManager {
    pub fn new(settings: NavigatorSettings) -> Self {
        OffMeshConnectionsManager {
            settings,
            values: HashMap::new(),
            tiles: BTreeMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedOffMeshConnections {
        Arc::new(Mutex::new(self))
    }

    fn endpoint_tiles(&self, connection: &OffMeshConnection) -> [TilePosition; 2] {
        [
            tile_position(&self.settings, connection.start),
            tile_position(&self.settings, connection.end),
        ]
    }

    /// Adds a connection and returns the tiles of both endpoints.
    pub fn add(&mut self, id: ObjectId, connection: OffMeshConnection) -> Vec<TilePosition> {
        let tiles = self.endpoint_tiles(&connection);
        for tile in tiles {
            self.tiles.entry(tile).or_default().insert(id);
        }
        self.values.entry(id).or_default().push(connection);

        let mut result = tiles.to_vec();
        result.dedup();
        result
    }

    /// Removes every connection owned by `id` and returns the tiles they touched.
    pub fn remove(&mut self, id: ObjectId) -> BTreeSet<TilePosition> {
        let Some(connections) = self.values.remove(&id) else {
            return BTreeSet::new();
        };
        let mut removed = BTreeSet::new();
        for connection in &connections {
            removed.extend(self.endpoint_tiles(connection));
        }
        for tile in &removed {
            if let Some(ids) = self.tiles.get_mut(tile) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.tiles.remove(tile);
                }
            }
        }
        removed
    }

    /// Connections with at least one endpoint in `tile`.
    pub fn get(&self, tile: &TilePosition) -> Vec<OffMeshConnection> {
        let Some(ids) = self.tiles.get(tile) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.values.get(id))
            .flatten()
            .filter(|connection| self.endpoint_tiles(connection).contains(tile))
            .copied()
            .collect()
    }

    /// Tiles holding at least one endpoint.
    pub fn tiles(&self) -> impl Iterator<Item = &TilePosition> + '_ {
        self.tiles.keys()
    }

    pub fn connections_of(&self, id: ObjectId) -> &[OffMeshConnection] {
        self.values.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.tiles.clear();
    }

    pub fn len(&self) -> usize {
        self.values.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
