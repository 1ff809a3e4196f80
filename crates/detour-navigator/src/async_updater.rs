//! Background tile building
//!
//! [`AsyncNavMeshUpdater`] owns a fixed pool of worker threads sharing one job
//! queue. Jobs are keyed by `(agent, tile)`:
//!
//! - a job posted for a key that is already queued replaces the queued one and
//!   merges its change type,
//! - a key that is being built is never handed to a second worker; a request
//!   arriving meanwhile waits and is queued when the running build finishes,
//! - the queue is ordered by distance to the player tile, then by posting order.
//!
//! A worker copies the tile's geometry snapshot under the geometry lock,
//! releases it and builds without holding any lock. The result is published
//! only if the cache item still has the job's generation and the tile's
//! geometry revision is still the one that was built.

use crate::agent::AgentHandle;
use crate::nav_mesh_cache::{SharedNavMeshCacheItem, UpdateNavMeshStatus};
use crate::nav_mesh_db::{compute_input_hash, NavMeshDb, NavMeshTileKey};
use crate::nav_mesh_tile::NavMeshTile;
use crate::offmesh_connections::{OffMeshConnection, SharedOffMeshConnections};
use crate::progress::{Listener, WaitConditionType};
use crate::recast_mesh::RecastMesh;
use crate::recast_mesh_manager::SharedRecastMeshManager;
use crate::settings::NavigatorSettings;
use crate::stats::UpdaterStats;
use crate::tile_builder::{TileBuildInput, TileBuilder};
use crate::tile_position::{tile_bounds, TilePosition, TilesWindow};
use crate::types::ChangeType;
use glam::Vec3;
use navigator_common::Result;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type JobKey = (AgentHandle, TilePosition);

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[derive(Debug, Clone)]
struct Job {
    agent: AgentHandle,
    agent_half_extents: Vec3,
    tile: TilePosition,
    change_type: ChangeType,
    generation: u64,
    worldspace: Arc<str>,
    item: SharedNavMeshCacheItem,
    distance: i32,
    stamp: u64,
}

impl Job {
    fn key(&self) -> JobKey {
        (self.agent, self.tile)
    }
}

enum JobOutcome {
    Published {
        status: UpdateNavMeshStatus,
        from_db: bool,
        stored: bool,
    },
    Removed,
    Discarded,
    Failed,
}

struct BuiltTile {
    mesh: Option<NavMeshTile>,
    from_db: bool,
    stored: bool,
}

#[derive(Debug)]
struct State {
    queue: BinaryHeap<Reverse<(i32, u64, JobKey)>>,
    pending: HashMap<JobKey, Job>,
    in_flight: HashSet<JobKey>,
    player_tile: TilePosition,
    next_stamp: u64,
    stats: UpdaterStats,
    stop: bool,
}

impl State {
    fn new() -> Self {
        State {
            queue: BinaryHeap::new(),
            pending: HashMap::new(),
            in_flight: HashSet::new(),
            player_tile: TilePosition::new(0, 0),
            next_stamp: 0,
            stats: UpdaterStats::default(),
            stop: false,
        }
    }

    /// Queues the pending job of `key` unless that key is being built.
    fn schedule(&mut self, key: JobKey) {
        if self.in_flight.contains(&key) {
            return;
        }
        if let Some(job) = self.pending.get(&key) {
            self.queue.push(Reverse((job.distance, job.stamp, key)));
        }
    }

    fn pop(&mut self) -> Option<Job> {
        while let Some(Reverse((_, stamp, key))) = self.queue.pop() {
            let current = self.pending.get(&key).is_some_and(|job| job.stamp == stamp);
            if !current || self.in_flight.contains(&key) {
                continue;
            }
            if let Some(job) = self.pending.remove(&key) {
                self.in_flight.insert(key);
                return Some(job);
            }
        }
        None
    }

    /// Jobs not finished yet whose tile is within `max_distance` of the player.
    fn remaining(&self, max_distance: Option<i32>) -> usize {
        let near = |(_, tile): &JobKey| {
            max_distance.map_or(true, |distance| {
                tile.chebyshev_distance(&self.player_tile) <= distance
            })
        };
        let queued = self
            .pending
            .keys()
            .filter(|key| !self.in_flight.contains(key) && near(key))
            .count();
        queued + self.in_flight.iter().filter(|key| near(key)).count()
    }
}

struct Shared {
    settings: NavigatorSettings,
    recast_mesh_manager: SharedRecastMeshManager,
    off_mesh_connections: SharedOffMeshConnections,
    builder: Arc<dyn TileBuilder>,
    db: Option<Arc<dyn NavMeshDb>>,
    state: Mutex<State>,
    has_job: Condvar,
    done: Condvar,
}

impl Shared {
    fn next_job(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.stop {
                return None;
            }
            if let Some(job) = state.pop() {
                return Some(job);
            }
            self.has_job.wait(&mut state);
        }
    }

    fn process_job(&self, job: &Job) -> JobOutcome {
        if job.item.read().generation() != job.generation {
            return JobOutcome::Discarded;
        }

        let player_tile = self.state.lock().player_tile;
        if !TilesWindow::new(player_tile, self.settings.max_tiles_radius).contains(&job.tile) {
            let mut item = job.item.write();
            if item.generation() != job.generation {
                return JobOutcome::Discarded;
            }
            return match item.remove_tile(&job.tile) {
                UpdateNavMeshStatus::Removed => JobOutcome::Removed,
                _ => JobOutcome::Discarded,
            };
        }

        let Some(recast_mesh) = self
            .recast_mesh_manager
            .lock()
            .get_mesh(&job.worldspace, &job.tile)
        else {
            return JobOutcome::Discarded;
        };
        if job
            .item
            .read()
            .published_revision(&job.tile)
            .is_some_and(|published| published >= recast_mesh.revision)
        {
            return JobOutcome::Discarded;
        }
        let off_mesh_connections = self.off_mesh_connections.lock().get(&job.tile);

        let built = if recast_mesh.is_empty() && off_mesh_connections.is_empty() {
            BuiltTile {
                mesh: None,
                from_db: false,
                stored: false,
            }
        } else {
            // A panicking builder fails the job instead of the worker thread
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.build(job, &recast_mesh, &off_mesh_connections)
            }));
            let result = match result {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(payload) => Err(format!("builder panicked: {}", panic_message(&*payload))),
            };
            match result {
                Ok(built) => built,
                Err(e) => {
                    log::warn!(
                        "Failed to build nav mesh tile {} for {} at revision {}: {e}",
                        job.tile,
                        job.agent,
                        recast_mesh.revision
                    );
                    job.item
                        .write()
                        .mark_failed(job.tile, recast_mesh.revision);
                    return JobOutcome::Failed;
                }
            }
        };

        let mut item = job.item.write();
        if item.generation() != job.generation {
            return JobOutcome::Discarded;
        }
        let current_revision = self.recast_mesh_manager.lock().tile_revision(&job.tile);
        if current_revision != Some(recast_mesh.revision) {
            return JobOutcome::Discarded;
        }
        let status = item.set_tile(job.tile, recast_mesh.revision, built.mesh.map(Arc::new));
        JobOutcome::Published {
            status,
            from_db: built.from_db,
            stored: built.stored,
        }
    }

    fn build(
        &self,
        job: &Job,
        recast_mesh: &RecastMesh,
        off_mesh_connections: &[OffMeshConnection],
    ) -> Result<BuiltTile> {
        let db_entry = match &self.db {
            Some(db) if self.settings.enable_nav_mesh_disk_cache => {
                let input_hash = compute_input_hash(
                    recast_mesh,
                    off_mesh_connections,
                    job.agent_half_extents,
                    &self.settings,
                );
                let key = NavMeshTileKey::new(
                    &job.worldspace,
                    job.tile,
                    job.agent_half_extents,
                    input_hash,
                );
                Some((db, key))
            }
            _ => None,
        };

        if let Some((db, key)) = &db_entry {
            match db.load_tile(key) {
                Ok(Some(mesh)) => {
                    return Ok(BuiltTile {
                        mesh: Some(mesh),
                        from_db: true,
                        stored: false,
                    })
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to load nav mesh tile {} from db: {e}", job.tile),
            }
        }

        let input = TileBuildInput {
            worldspace: &job.worldspace,
            tile: job.tile,
            tile_bounds: tile_bounds(&self.settings, job.tile),
            agent_half_extents: job.agent_half_extents,
            recast_mesh,
            off_mesh_connections,
        };
        let mesh = self.builder.build(&input)?;

        let mut stored = false;
        if let (Some((db, key)), Some(mesh)) = (&db_entry, &mesh) {
            if self.settings.write_to_nav_mesh_db {
                match db.store_tile(key, mesh) {
                    Ok(()) => stored = true,
                    Err(e) => log::warn!("Failed to store nav mesh tile {} to db: {e}", job.tile),
                }
            }
        }

        Ok(BuiltTile {
            mesh,
            from_db: false,
            stored,
        })
    }

    fn finish_job(&self, job: &Job, outcome: JobOutcome) {
        log::debug!(
            "Nav mesh job {} {} ({:?}) finished",
            job.agent,
            job.tile,
            job.change_type
        );
        let key = job.key();
        let mut state = self.state.lock();
        state.in_flight.remove(&key);
        let stats = &mut state.stats;
        match outcome {
            JobOutcome::Published {
                status,
                from_db,
                stored,
            } => {
                log::trace!("Published nav mesh tile {} for {}: {status:?}", job.tile, job.agent);
                if from_db {
                    stats.loaded_from_db += 1;
                } else {
                    stats.built += 1;
                }
                if stored {
                    stats.stored_to_db += 1;
                }
            }
            JobOutcome::Removed => stats.removed += 1,
            JobOutcome::Discarded => stats.discarded += 1,
            JobOutcome::Failed => stats.failed += 1,
        }
        state.schedule(key);
        drop(state);
        self.has_job.notify_one();
        self.done.notify_all();
    }
}

fn run(shared: Arc<Shared>) {
    while let Some(job) = shared.next_job() {
        let outcome = shared.process_job(&job);
        shared.finish_job(&job, outcome);
    }
}

pub struct AsyncNavMeshUpdater {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl AsyncNavMeshUpdater {
    pub fn new(
        settings: NavigatorSettings,
        recast_mesh_manager: SharedRecastMeshManager,
        off_mesh_connections: SharedOffMeshConnections,
        builder: Arc<dyn TileBuilder>,
        db: Option<Arc<dyn NavMeshDb>>,
    ) -> Result<Self> {
        let thread_count = settings.async_updater_threads.max(1);
        let shared = Arc::new(Shared {
            settings,
            recast_mesh_manager,
            off_mesh_connections,
            builder,
            db,
            state: Mutex::new(State::new()),
            has_job: Condvar::new(),
            done: Condvar::new(),
        });

        let mut updater = AsyncNavMeshUpdater {
            shared,
            threads: Vec::with_capacity(thread_count),
        };
        for i in 0..thread_count {
            let shared = Arc::clone(&updater.shared);
            let thread = thread::Builder::new()
                .name(format!("nav-mesh-updater-{i}"))
                .spawn(move || run(shared))?;
            updater.threads.push(thread);
        }
        log::debug!("Started {thread_count} nav mesh updater threads");
        Ok(updater)
    }

    /// Queues builds of `changed_tiles` for one agent.
    #[allow(clippy::too_many_arguments)]
    pub fn post(
        &self,
        agent: AgentHandle,
        agent_half_extents: Vec3,
        item: &SharedNavMeshCacheItem,
        generation: u64,
        player_tile: TilePosition,
        worldspace: &str,
        changed_tiles: &BTreeMap<TilePosition, ChangeType>,
    ) {
        let worldspace: Arc<str> = Arc::from(worldspace);
        let mut state = self.shared.state.lock();
        state.player_tile = player_tile;
        for (tile, change_type) in changed_tiles {
            let key = (agent, *tile);
            let change_type = match state.pending.get(&key) {
                Some(pending) => pending.change_type.merge(*change_type),
                None => *change_type,
            };
            let stamp = state.next_stamp;
            state.next_stamp += 1;
            state.pending.insert(
                key,
                Job {
                    agent,
                    agent_half_extents,
                    tile: *tile,
                    change_type,
                    generation,
                    worldspace: Arc::clone(&worldspace),
                    item: Arc::clone(item),
                    distance: tile.manhattan_distance(&player_tile),
                    stamp,
                },
            );
            state.schedule(key);
        }
        drop(state);
        if !changed_tiles.is_empty() {
            self.shared.has_job.notify_all();
        }
    }

    /// Blocks until the jobs selected by `condition` are done.
    pub fn wait(&self, listener: &mut dyn Listener, condition: WaitConditionType) {
        let max_distance = match condition {
            WaitConditionType::RequiredTilesPresent => Some(
                self.shared
                    .settings
                    .wait_until_min_distance_to_player
                    .min(self.shared.settings.max_tiles_radius),
            ),
            WaitConditionType::AllJobsDone => None,
        };

        let mut state = self.shared.state.lock();
        let initial = state.remaining(max_distance);
        if initial == 0 {
            return;
        }
        MutexGuard::unlocked(&mut state, || {
            listener.set_label("Building navigation mesh");
            listener.set_progress_range(initial);
        });

        let mut reported = None;
        loop {
            let left = state.remaining(max_distance);
            if reported != Some(left) {
                reported = Some(left);
                let progress = initial.saturating_sub(left);
                MutexGuard::unlocked(&mut state, || listener.set_progress(progress));
                continue;
            }
            if left == 0 || state.stop {
                break;
            }
            self.shared.done.wait(&mut state);
        }
    }

    /// Jobs queued or being built.
    pub fn jobs_count(&self) -> usize {
        self.shared.state.lock().remaining(None)
    }

    pub fn stats(&self) -> UpdaterStats {
        let state = self.shared.state.lock();
        UpdaterStats {
            jobs: state.remaining(None),
            in_flight: state.in_flight.len(),
            ..state.stats
        }
    }
}

impl Drop for AsyncNavMeshUpdater {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.has_job.notify_all();
        self.shared.done.notify_all();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::warn!("Nav mesh updater thread panicked");
            }
        }
    }
}
