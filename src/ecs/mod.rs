//! hecs components consumed by the physics step.

pub mod components;

pub mod prelude {
    #[cfg(feature = "physics")]
    pub use super::components::physics::Collider;
    pub use super::components::physics::{RigidBody, RigidBodyType};
    pub use super::components::transform::{GlobalTransform, Transform};
}
