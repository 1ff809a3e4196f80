//! CLI utility for driving the navigation mesh manager over a JSON scene

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use glam::{Affine3A, IVec2, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use detour_navigator::{
    AreaType, CollisionShape, FileNavMeshDb, HeightfieldShape, Listener, NavMeshDb,
    NavMeshManager, NavigatorSettings, ObjectId, TileBuilder, WaitConditionType,
    WalkableSurfaceBuilder,
};

/// A CLI utility for building per-agent navigation meshes around a player
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build navigation mesh tiles for every agent of a scene
    Build {
        /// Scene description (JSON)
        #[clap(long, value_parser)]
        scene: PathBuf,

        /// Navigator settings (JSON); defaults are used when omitted
        #[clap(long, value_parser)]
        settings: Option<PathBuf>,

        /// Directory of the tile database
        #[clap(long, value_parser)]
        db: Option<PathBuf>,

        /// Player position (x,y,z), overrides the scene
        #[clap(long, value_parser = parse_vector)]
        player: Option<Vec3>,

        /// Number of background threads, overrides the settings
        #[clap(long)]
        threads: Option<usize>,

        /// Wait for every job instead of the tiles near the player
        #[clap(long)]
        all: bool,

        /// Output summary file (JSON)
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Print the default settings as JSON
    Settings,
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();

    if parts.len() != 3 {
        return Err(format!(
            "Vector must have 3 components, got {}",
            parts.len()
        ));
    }

    let x = parts[0].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let y = parts[1].trim().parse::<f32>().map_err(|e| e.to_string())?;
    let z = parts[2].trim().parse::<f32>().map_err(|e| e.to_string())?;

    Ok(Vec3::new(x, y, z))
}

#[derive(Debug, Deserialize)]
struct Scene {
    #[serde(default = "default_worldspace")]
    worldspace: String,
    #[serde(default)]
    player: Vec3,
    agents: Vec<Vec3>,
    #[serde(default)]
    objects: Vec<SceneObject>,
    #[serde(default)]
    water: Vec<SceneWater>,
    #[serde(default)]
    heightfields: Vec<SceneHeightfield>,
    #[serde(default)]
    off_mesh_connections: Vec<SceneOffMeshConnection>,
}

fn default_worldspace() -> String {
    "sys::default".to_string()
}

#[derive(Debug, Deserialize)]
struct SceneObject {
    id: u64,
    shape: CollisionShape,
    #[serde(default)]
    translation: Vec3,
    /// Rotation around the up axis
    #[serde(default)]
    yaw_degrees: f32,
    #[serde(default)]
    area_type: AreaType,
}

impl SceneObject {
    fn transform(&self) -> Affine3A {
        Affine3A::from_rotation_translation(
            Quat::from_rotation_y(self.yaw_degrees.to_radians()),
            self.translation,
        )
    }
}

#[derive(Debug, Deserialize)]
struct SceneWater {
    cell_position: IVec2,
    cell_size: i32,
    level: f32,
}

#[derive(Debug, Deserialize)]
struct SceneHeightfield {
    cell_position: IVec2,
    cell_size: i32,
    shape: HeightfieldShape,
}

#[derive(Debug, Deserialize)]
struct SceneOffMeshConnection {
    id: u64,
    start: Vec3,
    end: Vec3,
    #[serde(default)]
    area_type: AreaType,
}

#[derive(Debug, Serialize)]
struct TileSummary {
    x: i32,
    y: i32,
    polygons: usize,
    off_mesh_connections: usize,
    source_objects: Vec<u64>,
}

#[derive(Debug, Serialize)]
struct AgentSummary {
    half_extents: Vec3,
    tiles: Vec<TileSummary>,
}

#[derive(Debug, Serialize)]
struct BuildSummary {
    worldspace: String,
    agents: Vec<AgentSummary>,
    stats: BTreeMap<String, f64>,
}

/// Prints wait progress on a single line
struct ConsoleListener {
    range: usize,
}

impl Listener for ConsoleListener {
    fn set_label(&mut self, label: &str) {
        println!("{}...", label);
    }

    fn set_progress_range(&mut self, range: usize) {
        self.range = range;
    }

    fn set_progress(&mut self, value: usize) {
        print!("\r  {}/{} jobs", value, self.range);
        let _ = std::io::stdout().flush();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Build {
            scene,
            settings,
            db,
            player,
            threads,
            all,
            output,
        } => build_scene(
            &scene,
            settings.as_deref(),
            db.as_deref(),
            player,
            threads,
            all,
            output.as_deref(),
        ),
        Commands::Settings => {
            let settings = NavigatorSettings::default();
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON: {}", path.display()))
}

/// Feed the scene's geometry to the manager, returning what was rejected
fn add_scene(manager: &mut NavMeshManager, scene: &Scene) -> Result<Vec<String>> {
    let mut skipped = Vec::new();

    for object in &scene.objects {
        let added = manager
            .add_object(
                ObjectId(object.id),
                &object.shape,
                &object.transform(),
                object.area_type,
            )
            .with_context(|| format!("Failed to add object {}", object.id))?;
        if !added {
            skipped.push(format!("object {} ({})", object.id, object.shape.kind()));
        }
    }

    for water in &scene.water {
        if !manager.add_water(water.cell_position, water.cell_size, water.level) {
            skipped.push(format!(
                "water cell {} (size {}, level {})",
                water.cell_position, water.cell_size, water.level
            ));
        }
    }

    for heightfield in &scene.heightfields {
        let added = manager
            .add_heightfield(heightfield.cell_position, heightfield.cell_size, &heightfield.shape)
            .with_context(|| {
                format!("Failed to add heightfield at {}", heightfield.cell_position)
            })?;
        if !added {
            skipped.push(format!("heightfield cell {}", heightfield.cell_position));
        }
    }

    for connection in &scene.off_mesh_connections {
        manager.add_off_mesh_connection(
            ObjectId(connection.id),
            connection.start,
            connection.end,
            connection.area_type,
        );
    }

    Ok(skipped)
}

/// Load a scene, build its tiles and report the result
fn build_scene(
    scene_path: &Path,
    settings_path: Option<&Path>,
    db_path: Option<&Path>,
    player: Option<Vec3>,
    threads: Option<usize>,
    all: bool,
    output: Option<&Path>,
) -> Result<()> {
    let mut settings = match settings_path {
        Some(path) => read_json::<NavigatorSettings>(path)?,
        None => NavigatorSettings::default(),
    };
    if let Some(threads) = threads {
        settings.async_updater_threads = threads;
    }

    println!("Loading scene from {}...", scene_path.display());
    let scene: Scene = read_json(scene_path)?;
    if scene.agents.is_empty() {
        return Err(anyhow!("Scene has no agents"));
    }

    let builder: Arc<dyn TileBuilder> = Arc::new(WalkableSurfaceBuilder::new(&settings));
    let db = match db_path {
        Some(path) => {
            let db = FileNavMeshDb::open(path)
                .with_context(|| format!("Failed to open tile database: {}", path.display()))?;
            Some(Arc::new(db) as Arc<dyn NavMeshDb>)
        }
        None => None,
    };

    let mut manager = NavMeshManager::with_builder(settings, builder, db)
        .map_err(|e| anyhow!("Failed to create navigator: {}", e))?;
    manager.set_worldspace(&scene.worldspace);
    let player = player.unwrap_or(scene.player);
    manager.update_bounds(player);

    for half_extents in &scene.agents {
        manager.add_agent(*half_extents);
    }

    for skipped in add_scene(&mut manager, &scene)? {
        println!("Skipped {}", skipped);
    }

    println!(
        "Building tiles for {} agent(s) around {:?}...",
        scene.agents.len(),
        player
    );

    let condition = if all {
        WaitConditionType::AllJobsDone
    } else {
        WaitConditionType::RequiredTilesPresent
    };
    let mut listener = ConsoleListener { range: 0 };
    for half_extents in &scene.agents {
        manager.update(player, *half_extents);
    }
    manager.wait(&mut listener, condition);
    println!();

    let mut agents = Vec::new();
    for (half_extents, nav_mesh) in manager.get_nav_meshes() {
        let nav_mesh = nav_mesh.read();
        let mut tiles: Vec<TileSummary> = nav_mesh
            .tiles()
            .map(|(position, tile)| TileSummary {
                x: position.x,
                y: position.y,
                polygons: tile.polygon_count(),
                off_mesh_connections: tile.off_mesh_connections.len(),
                source_objects: tile.source_objects.iter().map(|id| id.0).collect(),
            })
            .collect();
        tiles.sort_by_key(|tile| (tile.x, tile.y));

        println!("Agent {:?}: {} tile(s)", half_extents, tiles.len());
        for tile in &tiles {
            println!(
                "  ({}, {}): {} polygons, {} off-mesh connections",
                tile.x, tile.y, tile.polygons, tile.off_mesh_connections
            );
        }
        agents.push(AgentSummary {
            half_extents,
            tiles,
        });
    }

    let mut stats = BTreeMap::new();
    manager.report_stats(0, &mut stats);
    println!("Statistics:");
    for (name, value) in &stats {
        println!("  {}: {}", name, value);
    }

    if let Some(output_path) = output {
        println!("Saving summary to {}...", output_path.display());

        let file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
        let summary = BuildSummary {
            worldspace: scene.worldspace,
            agents,
            stats,
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &summary)?;
        writer.flush()?;
    }

    Ok(())
}
