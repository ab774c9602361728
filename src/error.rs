//! Error types for hull construction and mesh validation.

use thiserror::Error;

/// Errors raised while building or mutating convex geometry.
///
/// Collision queries never return these: "no contact" is a normal outcome.
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// Fewer than four points, or the points are collinear or coplanar.
    #[error("Degenerate hull input: {0}")]
    DegenerateInput(String),

    /// The horizon walk did not close within its step bound.
    #[error("Horizon walk exceeded {limit} steps")]
    HorizonWalkExceeded { limit: usize },

    /// A half-edge is missing one of its links.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
}

/// Convenience result type for geometry operations.
pub type PhysicsResult<T> = Result<T, PhysicsError>;
