//! Component types attached to entities.

pub mod physics;
pub mod transform;
