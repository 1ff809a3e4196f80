//! Common utilities and data structures used by the navigation mesh manager

mod bounds;
mod geometry;

pub use bounds::*;
pub use geometry::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for navigator operations
pub type Result<T> = std::result::Result<T, Error>;
