//! Rein Physics
//!
//! Convex hull collision detection and contact resolution for rigid bodies.
//!
//! # Architecture
//!
//! The library is organized into layers:
//!
//! 1. **error** - Error types for geometry construction
//! 2. **ecs** - hecs components: transforms, rigid bodies, colliders (feature = "ecs")
//! 3. **physics** - Half-edge meshes, Quickhull, SAT, clipping, the impulse
//!    solver and the fixed-step world (feature = "physics")

pub mod error;

#[cfg(feature = "ecs")]
pub mod ecs;

#[cfg(feature = "physics")]
pub mod physics;

pub use error::{PhysicsError, PhysicsResult};

#[cfg(feature = "ecs")]
pub use ecs::prelude::*;

#[cfg(feature = "physics")]
pub use physics::{
    NarrowPhaseConfig, PhysicsConfig, PhysicsWorld, SimulationControl, SolverConfig,
};

// Re-export glam for convenience
pub use glam;
