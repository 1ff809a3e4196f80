//! End-to-end scenarios for the navigation mesh manager
//!
//! These tests drive the manager the way a simulation loop does: mutate the
//! world, call `update`, wait, then read the published meshes.

#[cfg(test)]
mod tests {
    use crate::nav_mesh_db::{MemoryNavMeshDb, NavMeshDb};
    use crate::nav_mesh_tile::NavMeshTile;
    use crate::progress::tests::RecordingListener;
    use crate::tile_builder::{TileBuildInput, TileBuilder, WalkableSurfaceBuilder};
    use crate::{
        AreaType, CollisionShape, HeightfieldShape, NavMeshManager, NavigatorSettings,
        NullListener, ObjectId, TilePosition, WaitConditionType,
    };
    use glam::{Affine3A, IVec2, Vec3};
    use navigator_common::{Error, Result};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    const WORLDSPACE: &str = "sys::default";
    const AGENT: Vec3 = Vec3::new(0.3, 0.9, 0.3);

    fn settings() -> NavigatorSettings {
        NavigatorSettings::new(0.25, 64)
            .with_max_tiles_radius(3)
            .with_wait_until_min_distance_to_player(2)
            .with_async_updater_threads(2)
    }

    fn manager() -> Result<NavMeshManager> {
        let mut manager = NavMeshManager::new(settings())?;
        manager.set_worldspace(WORLDSPACE);
        manager.add_agent(AGENT);
        Ok(manager)
    }

    fn crate_at(x: f32, z: f32) -> (CollisionShape, Affine3A) {
        (
            CollisionShape::new_box(Vec3::ONE),
            Affine3A::from_translation(Vec3::new(x, 0.0, z)),
        )
    }

    fn update_and_wait(manager: &mut NavMeshManager, player: Vec3) {
        manager.update(player, AGENT);
        manager.wait(&mut NullListener, WaitConditionType::AllJobsDone);
    }

    /// Blocks inside `build` until released, optionally failing.
    struct GateBuilder {
        inner: WalkableSurfaceBuilder,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl TileBuilder for GateBuilder {
        fn build(&self, input: &TileBuildInput<'_>) -> Result<Option<NavMeshTile>> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            self.inner.build(input)
        }
    }

    /// Fails while `broken` is set.
    struct FlakyBuilder {
        inner: WalkableSurfaceBuilder,
        broken: AtomicBool,
    }

    impl TileBuilder for FlakyBuilder {
        fn build(&self, input: &TileBuildInput<'_>) -> Result<Option<NavMeshTile>> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::NavMeshGeneration("builder unavailable".to_string()));
            }
            self.inner.build(input)
        }
    }

    #[test]
    fn test_single_box_builds_tile_from_one_shape() -> Result<()> {
        let mut manager = manager()?;
        let (shape, transform) = crate_at(8.0, 8.0);
        assert!(manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?);

        update_and_wait(&mut manager, Vec3::new(8.0, 0.0, 8.0));

        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent was added");
        let nav_mesh = nav_mesh.read();
        let tile = nav_mesh.tile(&TilePosition::new(0, 0)).expect("tile (0, 0) is built");
        assert!(tile.polygon_count() > 0);
        assert_eq!(tile.source_objects, vec![ObjectId(1)]);
        assert_eq!(nav_mesh.tile_count(), 1);
        Ok(())
    }

    #[test]
    fn test_add_then_remove_before_update_builds_nothing() -> Result<()> {
        let mut manager = manager()?;
        let (shape, transform) = crate_at(8.0, 8.0);
        manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;
        assert!(manager.remove_object(ObjectId(1)));

        update_and_wait(&mut manager, Vec3::ZERO);

        let stats = manager.stats();
        assert_eq!(stats.updater.built, 0);
        assert_eq!(stats.updater.failed, 0);
        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent was added");
        let nav_mesh = nav_mesh.read();
        let tile = TilePosition::new(0, 0);
        assert!(nav_mesh.tile(&tile).is_none());
        let recast_tiles = manager.get_recast_mesh_tiles();
        assert_eq!(
            nav_mesh.published_revision(&tile),
            Some(recast_tiles[&tile].revision)
        );
        Ok(())
    }

    #[test]
    fn test_removed_object_clears_tile() -> Result<()> {
        let mut manager = manager()?;
        let (shape, transform) = crate_at(8.0, 8.0);
        manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;
        update_and_wait(&mut manager, Vec3::ZERO);
        assert_eq!(manager.get_nav_mesh(AGENT).expect("agent").read().tile_count(), 1);

        manager.remove_object(ObjectId(1));
        update_and_wait(&mut manager, Vec3::ZERO);

        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent");
        let nav_mesh = nav_mesh.read();
        assert_eq!(nav_mesh.tile_count(), 0);
        assert!(nav_mesh.published_revision(&TilePosition::new(0, 0)).is_some());
        Ok(())
    }

    #[test]
    fn test_moved_object_follows_tiles() -> Result<()> {
        let mut manager = manager()?;
        let (shape, transform) = crate_at(8.0, 8.0);
        manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;
        update_and_wait(&mut manager, Vec3::ZERO);

        let (shape, transform) = crate_at(24.0, 8.0);
        assert!(manager.update_object(ObjectId(1), &shape, &transform, AreaType::Ground)?);
        update_and_wait(&mut manager, Vec3::ZERO);

        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent");
        let nav_mesh = nav_mesh.read();
        assert!(nav_mesh.tile(&TilePosition::new(0, 0)).is_none());
        let tile = nav_mesh.tile(&TilePosition::new(1, 0)).expect("tile (1, 0) is built");
        assert_eq!(tile.source_objects, vec![ObjectId(1)]);
        Ok(())
    }

    #[test]
    fn test_wait_covers_required_tiles() -> Result<()> {
        let mut manager = manager()?;
        for (id, x) in [(1, 8.0), (2, 24.0), (3, 40.0)] {
            let (shape, transform) = crate_at(x, 8.0);
            manager.add_object(ObjectId(id), &shape, &transform, AreaType::Ground)?;
        }
        let recorded: Vec<(TilePosition, u64)> = manager
            .get_recast_mesh_tiles()
            .iter()
            .map(|(tile, mesh)| (*tile, mesh.revision))
            .collect();

        manager.update(Vec3::new(8.0, 0.0, 8.0), AGENT);
        let mut listener = RecordingListener::default();
        manager.wait(&mut listener, WaitConditionType::RequiredTilesPresent);

        let player_tile = TilePosition::new(0, 0);
        let required = manager.settings().wait_until_min_distance_to_player;
        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent");
        let nav_mesh = nav_mesh.read();
        for (tile, revision) in recorded {
            if tile.chebyshev_distance(&player_tile) <= required {
                let published = nav_mesh.published_revision(&tile);
                assert!(published >= Some(revision), "tile {tile} is behind");
            }
        }
        Ok(())
    }

    #[test]
    fn test_reset_discards_in_flight_job() -> Result<()> {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let settings = settings().with_async_updater_threads(1);
        let builder = Arc::new(GateBuilder {
            inner: WalkableSurfaceBuilder::new(&settings),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let mut manager = NavMeshManager::with_builder(settings, builder, None)?;
        manager.set_worldspace(WORLDSPACE);
        manager.add_agent(AGENT);

        let (shape, transform) = crate_at(8.0, 8.0);
        manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;
        let old = manager.get_nav_mesh(AGENT).expect("agent");
        manager.update(Vec3::ZERO, AGENT);
        entered_rx.recv().expect("job started");

        assert!(manager.reset(AGENT));
        assert!(manager.get_nav_mesh(AGENT).is_none());
        manager.add_agent(AGENT);
        let fresh = manager.get_nav_mesh(AGENT).expect("agent was added again");

        release_tx.send(()).expect("worker waits");
        manager.wait(&mut NullListener, WaitConditionType::AllJobsDone);

        assert_eq!(old.read().tile_count(), 0);
        assert_eq!(old.read().published_positions().count(), 0);
        assert_eq!(fresh.read().tile_count(), 0);
        assert_eq!(manager.stats().updater.discarded, 1);
        Ok(())
    }

    #[test]
    fn test_failed_tile_is_retried_on_next_update() -> Result<()> {
        let settings = settings();
        let builder = Arc::new(FlakyBuilder {
            inner: WalkableSurfaceBuilder::new(&settings),
            broken: AtomicBool::new(true),
        });
        let mut manager = NavMeshManager::with_builder(settings, builder.clone(), None)?;
        manager.set_worldspace(WORLDSPACE);
        manager.add_agent(AGENT);
        let (shape, transform) = crate_at(8.0, 8.0);
        manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;

        update_and_wait(&mut manager, Vec3::ZERO);
        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent");
        assert_eq!(nav_mesh.read().tile_count(), 0);
        assert!(nav_mesh.read().has_failed_tiles());
        assert_eq!(manager.stats().updater.failed, 1);

        builder.broken.store(false, Ordering::SeqCst);
        update_and_wait(&mut manager, Vec3::ZERO);
        assert_eq!(nav_mesh.read().tile_count(), 1);
        assert!(!nav_mesh.read().has_failed_tiles());
        Ok(())
    }

    #[test]
    fn test_tiles_leaving_window_are_removed() -> Result<()> {
        let mut manager = manager()?;
        let (shape, transform) = crate_at(8.0, 8.0);
        manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;
        update_and_wait(&mut manager, Vec3::ZERO);
        assert_eq!(manager.get_nav_mesh(AGENT).expect("agent").read().tile_count(), 1);

        // Ten tiles east, well past the window radius
        update_and_wait(&mut manager, Vec3::new(168.0, 0.0, 8.0));
        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent");
        assert_eq!(nav_mesh.read().tile_count(), 0);
        assert_eq!(manager.stats().updater.removed, 1);

        // Coming back rebuilds it
        update_and_wait(&mut manager, Vec3::ZERO);
        assert_eq!(nav_mesh.read().tile_count(), 1);
        Ok(())
    }

    #[test]
    fn test_agents_have_separate_meshes() -> Result<()> {
        let mut manager = manager()?;
        let large = Vec3::new(0.6, 1.2, 0.6);
        manager.add_agent(large);
        let (shape, transform) = crate_at(8.0, 8.0);
        manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;

        update_and_wait(&mut manager, Vec3::ZERO);
        let small = manager.get_nav_mesh(AGENT).expect("agent");
        assert_eq!(small.read().tile_count(), 1);
        assert_eq!(
            manager.get_nav_mesh(large).expect("large agent").read().tile_count(),
            0
        );

        manager.update(Vec3::ZERO, large);
        manager.wait(&mut NullListener, WaitConditionType::AllJobsDone);
        assert_eq!(manager.get_nav_meshes().len(), 2);
        assert_eq!(
            manager.get_nav_mesh(large).expect("large agent").read().tile_count(),
            1
        );
        Ok(())
    }

    #[test]
    fn test_water_heightfield_and_off_mesh_connection() -> Result<()> {
        let mut manager = manager()?;
        assert!(manager.add_water(IVec2::new(1, 1), 8, -2.0));
        assert!(manager.add_heightfield(
            IVec2::new(0, 0),
            8,
            &HeightfieldShape::surface(vec![0.0, 0.5, 0.5, 1.0], 2)?
        )?);
        manager.add_off_mesh_connection(
            ObjectId(7),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(20.0, 0.0, 4.0),
            AreaType::Ground,
        );
        update_and_wait(&mut manager, Vec3::ZERO);

        let nav_mesh = manager.get_nav_mesh(AGENT).expect("agent");
        let nav_mesh = nav_mesh.read();
        let tile = nav_mesh.tile(&TilePosition::new(0, 0)).expect("tile (0, 0)");
        assert!(tile.polygons.iter().any(|p| p.area_type == AreaType::Water));
        assert!(tile.polygons.iter().any(|p| p.area_type == AreaType::Ground));
        assert_eq!(tile.off_mesh_connections.len(), 1);
        // Only the end point lies in tile (1, 0)
        let neighbour = nav_mesh.tile(&TilePosition::new(1, 0));
        assert!(neighbour.map_or(true, |tile| tile.off_mesh_connections.is_empty()));
        Ok(())
    }

    #[test]
    fn test_db_is_used_across_managers() -> Result<()> {
        let db: Arc<dyn NavMeshDb> = Arc::new(MemoryNavMeshDb::new());
        let (shape, transform) = crate_at(8.0, 8.0);

        for round in 0..2 {
            let settings = settings();
            let builder = Arc::new(WalkableSurfaceBuilder::new(&settings));
            let mut manager = NavMeshManager::with_builder(settings, builder, Some(Arc::clone(&db)))?;
            manager.set_worldspace(WORLDSPACE);
            manager.add_agent(AGENT);
            manager.add_object(ObjectId(1), &shape, &transform, AreaType::Ground)?;
            update_and_wait(&mut manager, Vec3::ZERO);

            let stats = manager.stats().updater;
            if round == 0 {
                assert_eq!((stats.built, stats.loaded_from_db), (1, 0));
            } else {
                assert_eq!((stats.built, stats.loaded_from_db), (0, 1));
            }
            assert_eq!(manager.get_nav_mesh(AGENT).expect("agent").read().tile_count(), 1);
        }
        Ok(())
    }
}
