//! Tile grid arithmetic
//!
//! The navigable world plane is XZ. Tile `(x, y)` covers the closed rectangle
//! `[x * s, (x + 1) * s] x [y * s, (y + 1) * s]` where `s` is
//! [`NavigatorSettings::tile_world_size`].

use crate::settings::NavigatorSettings;
use glam::{IVec2, Vec3};
use navigator_common::{Aabb, RectXz};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePosition {
    pub x: i32,
    pub y: i32,
}

impl TilePosition {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn chebyshev_distance(&self, other: &TilePosition) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn manhattan_distance(&self, other: &TilePosition) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

impl From<IVec2> for TilePosition {
    fn from(v: IVec2) -> Self {
        TilePosition::new(v.x, v.y)
    }
}

impl fmt::Display for TilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Tile containing a world-space point.
pub fn tile_position(settings: &NavigatorSettings, point: Vec3) -> TilePosition {
    let size = settings.tile_world_size();
    TilePosition::new(
        (point.x / size).floor() as i32,
        (point.z / size).floor() as i32,
    )
}

/// World-space rectangle covered by a tile.
pub fn tile_bounds(settings: &NavigatorSettings, tile: TilePosition) -> RectXz {
    let size = settings.tile_world_size();
    RectXz::new(
        tile.x as f32 * size,
        tile.y as f32 * size,
        (tile.x + 1) as f32 * size,
        (tile.y + 1) as f32 * size,
    )
}

/// Inclusive rectangle of tile positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilesRange {
    pub min: TilePosition,
    pub max: TilePosition,
}

impl TilesRange {
    pub fn new(min: TilePosition, max: TilePosition) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, tile: &TilePosition) -> bool {
        (self.min.x..=self.max.x).contains(&tile.x) && (self.min.y..=self.max.y).contains(&tile.y)
    }

    /// Overlap of two ranges, `None` when they are disjoint.
    pub fn intersection(&self, other: &TilesRange) -> Option<TilesRange> {
        let min = TilePosition::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y));
        let max = TilePosition::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y));
        (min.x <= max.x && min.y <= max.y).then_some(TilesRange { min, max })
    }

    /// Number of tiles, computed without enumerating them.
    pub fn area(&self) -> u64 {
        let width = (i64::from(self.max.x) - i64::from(self.min.x) + 1).max(0) as u64;
        let height = (i64::from(self.max.y) - i64::from(self.min.y) + 1).max(0) as u64;
        width * height
    }

    fn positions(&self) -> Vec<TilePosition> {
        let mut tiles = Vec::new();
        for y in self.min.y..=self.max.y {
            for x in self.min.x..=self.max.x {
                tiles.push(TilePosition::new(x, y));
            }
        }
        tiles
    }
}

/// Inclusive range of tiles on one axis touched by `[min, max]`.
///
/// A bound lying exactly on a grid line touches the tiles on both sides of it.
/// Casts saturate, so far-away bounds clamp to the ends of the grid.
fn axis_range(min: f32, max: f32, size: f32) -> (i32, i32) {
    let first = ((min / size).ceil() as i32).saturating_sub(1);
    let last = (max / size).floor() as i32;
    (first, last)
}

/// Range of tiles whose closed rectangle intersects the XZ projection of
/// `bounds`, `None` for non-finite bounds.
pub fn aabb_tiles_range(settings: &NavigatorSettings, bounds: &Aabb) -> Option<TilesRange> {
    if !bounds.is_finite() {
        return None;
    }
    let size = settings.tile_world_size();
    let (min_x, max_x) = axis_range(bounds.min.x, bounds.max.x, size);
    let (min_y, max_y) = axis_range(bounds.min.z, bounds.max.z, size);
    Some(TilesRange::new(
        TilePosition::new(min_x, min_y),
        TilePosition::new(max_x, max_y),
    ))
}

/// Tiles within `range` whose closed rectangle intersects the XZ projection of
/// `bounds`. Only the clipped part is enumerated.
pub fn tiles_for_aabb(
    settings: &NavigatorSettings,
    bounds: &Aabb,
    range: &TilesRange,
) -> Vec<TilePosition> {
    aabb_tiles_range(settings, bounds)
        .and_then(|covered| covered.intersection(range))
        .map(|clipped| clipped.positions())
        .unwrap_or_default()
}

/// World-space bounds of a landscape cell; heights are unbounded.
pub fn cell_bounds(cell_position: IVec2, cell_size: i32, min_y: f32, max_y: f32) -> Aabb {
    let size = cell_size as f32;
    Aabb::new(
        Vec3::new(cell_position.x as f32 * size, min_y, cell_position.y as f32 * size),
        Vec3::new(
            (cell_position.x + 1) as f32 * size,
            max_y,
            (cell_position.y + 1) as f32 * size,
        ),
    )
}

/// Tiles within `range` covered by a landscape cell.
pub fn tiles_for_cell(
    settings: &NavigatorSettings,
    cell_position: IVec2,
    cell_size: i32,
    range: &TilesRange,
) -> Vec<TilePosition> {
    tiles_for_aabb(settings, &cell_bounds(cell_position, cell_size, 0.0, 0.0), range)
}

/// Square window of tiles kept around the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilesWindow {
    pub center: TilePosition,
    pub radius: i32,
}

impl TilesWindow {
    pub fn new(center: TilePosition, radius: i32) -> Self {
        Self { center, radius }
    }

    pub fn contains(&self, tile: &TilePosition) -> bool {
        self.center.chebyshev_distance(tile) <= self.radius
    }

    pub fn range(&self) -> TilesRange {
        TilesRange::new(
            TilePosition::new(
                self.center.x.saturating_sub(self.radius),
                self.center.y.saturating_sub(self.radius),
            ),
            TilePosition::new(
                self.center.x.saturating_add(self.radius),
                self.center.y.saturating_add(self.radius),
            ),
        )
    }
}
