//! Collision and trigger callbacks raised during a step.
//!
//! Events fire after narrowphase and before the solver, once per entity pair.
//! The event carries one manifold per touching hull pair. A listener may call
//! [`Manifold::invalidate`] to keep any of them out of the solver for this
//! step.

use super::contact::Manifold;

/// Two solid colliders touched.
#[derive(Debug)]
pub struct CollisionEvent<'a> {
    pub entity_a: hecs::Entity,
    pub entity_b: hecs::Entity,
    /// One manifold per touching hull pair, never empty.
    pub manifolds: &'a mut [Manifold],
    /// Fixed timestep of the running step.
    pub dt: f32,
}

/// A sensor overlapped another collider.
#[derive(Debug)]
pub struct TriggerEvent<'a> {
    pub sensor: hecs::Entity,
    pub other: hecs::Entity,
    pub manifolds: &'a mut [Manifold],
    pub dt: f32,
}

/// Receives per-pair events. Both methods default to no-ops.
pub trait ContactListener: Send {
    fn on_collision(&mut self, _event: &mut CollisionEvent<'_>) {}

    fn on_trigger(&mut self, _event: &mut TriggerEvent<'_>) {}
}
