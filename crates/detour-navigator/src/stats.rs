//! Counters pushed to an external metrics sink

use crate::recast_mesh_manager::RecastMeshManagerStats;
use std::collections::BTreeMap;

/// Per-frame metrics collaborator.
pub trait StatsSink {
    fn set_attribute(&mut self, frame: u64, name: &str, value: f64);
}

impl StatsSink for BTreeMap<String, f64> {
    fn set_attribute(&mut self, _frame: u64, name: &str, value: f64) {
        self.insert(name.to_string(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdaterStats {
    /// Jobs waiting in the queue
    pub jobs: usize,
    /// Jobs being built right now
    pub in_flight: usize,
    pub built: u64,
    pub loaded_from_db: u64,
    pub stored_to_db: u64,
    pub failed: u64,
    /// Results dropped because of a generation or revision mismatch
    pub discarded: u64,
    pub removed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavMeshCacheStats {
    pub agents: usize,
    pub tiles: usize,
    pub polygons: usize,
    pub memory_usage: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavMeshManagerStats {
    pub updater: UpdaterStats,
    pub recast: RecastMeshManagerStats,
    pub cache: NavMeshCacheStats,
    pub changed_tiles: usize,
}

impl NavMeshManagerStats {
    pub fn report(&self, frame: u64, sink: &mut dyn StatsSink) {
        let values = [
            ("NavMesh Jobs", self.updater.jobs as f64),
            ("NavMesh InFlight", self.updater.in_flight as f64),
            ("NavMesh Built", self.updater.built as f64),
            ("NavMesh DbLoaded", self.updater.loaded_from_db as f64),
            ("NavMesh DbStored", self.updater.stored_to_db as f64),
            ("NavMesh Failed", self.updater.failed as f64),
            ("NavMesh Discarded", self.updater.discarded as f64),
            ("NavMesh Removed", self.updater.removed as f64),
            ("NavMesh Tiles", self.cache.tiles as f64),
            ("NavMesh Polygons", self.cache.polygons as f64),
            ("NavMesh Memory", self.cache.memory_usage as f64),
            ("NavMesh Agents", self.cache.agents as f64),
            ("NavMesh ChangedTiles", self.changed_tiles as f64),
            ("Recast Revision", self.recast.revision as f64),
            ("Recast Tiles", self.recast.tiles as f64),
            ("Recast Objects", self.recast.objects as f64),
            ("Recast Water", self.recast.water as f64),
            ("Recast Heightfields", self.recast.heightfields as f64),
        ];
        for (name, value) in values {
            sink.set_attribute(frame, name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_into_map() {
        let stats = NavMeshManagerStats {
            updater: UpdaterStats {
                jobs: 3,
                built: 7,
                ..Default::default()
            },
            changed_tiles: 2,
            ..Default::default()
        };
        let mut sink = BTreeMap::new();
        stats.report(1, &mut sink);
        assert_eq!(sink["NavMesh Jobs"], 3.0);
        assert_eq!(sink["NavMesh Built"], 7.0);
        assert_eq!(sink["NavMesh ChangedTiles"], 2.0);
        assert_eq!(sink["Recast Objects"], 0.0);
    }
}
