//! Identifiers and small enums shared across the navigator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a piece of world geometry, unique within a worldspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Walkability cost class applied to geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum AreaType {
    Null = 0,
    Water = 1,
    Door = 2,
    Pathgrid = 3,
    #[default]
    Ground = 4,
}

impl AreaType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AreaType::Null),
            1 => Some(AreaType::Water),
            2 => Some(AreaType::Door),
            3 => Some(AreaType::Pathgrid),
            4 => Some(AreaType::Ground),
            _ => None,
        }
    }
}

/// Why a tile was marked dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Remove,
    Mixed,
    Add,
    Update,
}

impl ChangeType {
    /// Combines two changes to the same tile. Equal kinds stay, anything else is `Mixed`.
    pub fn merge(self, other: ChangeType) -> ChangeType {
        if self == other {
            self
        } else {
            ChangeType::Mixed
        }
    }
}
