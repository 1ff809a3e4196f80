//! Interning of agent half-extents
//!
//! Each distinct agent size gets its own navigation mesh. Sizes are matched
//! exactly (bitwise on the three components) and mapped once to a small
//! integer handle so that per-agent maps never hash floats.

use glam::Vec3;
use std::collections::HashMap;
use std::fmt;

/// Handle of an interned agent size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentHandle(pub u32);

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

fn key(half_extents: Vec3) -> [u32; 3] {
    [
        half_extents.x.to_bits(),
        half_extents.y.to_bits(),
        half_extents.z.to_bits(),
    ]
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    handles: HashMap<[u32; 3], AgentHandle>,
    half_extents: Vec<Vec3>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `half_extents`, creating it on first use.
    pub fn intern(&mut self, half_extents: Vec3) -> AgentHandle {
        if let Some(handle) = self.handles.get(&key(half_extents)) {
            return *handle;
        }
        let handle = AgentHandle(self.half_extents.len() as u32);
        self.half_extents.push(half_extents);
        self.handles.insert(key(half_extents), handle);
        handle
    }

    pub fn get(&self, half_extents: Vec3) -> Option<AgentHandle> {
        self.handles.get(&key(half_extents)).copied()
    }

    pub fn half_extents(&self, handle: AgentHandle) -> Option<Vec3> {
        self.half_extents.get(handle.0 as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.half_extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.half_extents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut registry = AgentRegistry::new();
        let a = registry.intern(Vec3::new(0.5, 0.5, 1.0));
        let b = registry.intern(Vec3::new(0.5, 0.5, 1.0));
        let c = registry.intern(Vec3::new(0.6, 0.5, 1.0));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.half_extents(c), Some(Vec3::new(0.6, 0.5, 1.0)));
    }

    #[test]
    fn test_lookup_is_exact() {
        let mut registry = AgentRegistry::new();
        registry.intern(Vec3::new(0.5, 1.0, 1.0));

        assert!(registry.get(Vec3::new(0.5, 1.0 + f32::EPSILON, 1.0)).is_none());
        assert!(registry.get(Vec3::new(0.5, 1.0, 1.0)).is_some());
    }
}
