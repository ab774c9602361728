//! Sequential impulse constraint solver.
//!
//! Contacts are solved one at a time (projected Gauss-Seidel). Normal
//! constraints run first for `contact_iterations` sweeps, then friction for
//! `friction_iterations` sweeps, clamped against the final normal impulses.

use glam::{Mat3, Vec3};
use tracing::warn;

use crate::ecs::components::physics::RigidBody;
use crate::ecs::components::transform::GlobalTransform;

use super::contact::{Contact, Manifold};
use super::SolverConfig;

/// Per-step snapshot of one body's mass properties and velocities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverBody {
    pub inv_mass: f32,
    /// World-space inverse inertia.
    pub inv_inertia: Mat3,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// World-space center of mass.
    pub center: Vec3,
    pub restitution: f32,
    pub friction: f32,
}

impl SolverBody {
    /// Immovable body used for sides without a rigid body.
    pub const FIXED: Self = Self {
        inv_mass: 0.0,
        inv_inertia: Mat3::ZERO,
        linear_velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
        center: Vec3::ZERO,
        restitution: 0.0,
        friction: 0.5,
    };

    pub fn from_rigid_body(rb: &RigidBody, global: &GlobalTransform) -> Self {
        Self {
            inv_mass: rb.inverse_mass(),
            inv_inertia: rb.inverse_inertia_world(global.rotation()),
            linear_velocity: rb.linear_velocity,
            angular_velocity: rb.angular_velocity,
            center: global.0.transform_point3(rb.center_of_mass),
            restitution: rb.restitution,
            friction: rb.friction,
        }
    }

    #[inline]
    fn velocity_at(&self, arm: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(arm)
    }
}

/// Orthonormal tangent basis for a contact normal.
pub fn compute_tangents(normal: Vec3) -> [Vec3; 2] {
    let mut t1 = normal.cross(Vec3::X);
    if t1.length_squared() < 1e-6 {
        t1 = normal.cross(Vec3::Y);
    }
    let t1 = t1.normalize();
    let t2 = normal.cross(t1).normalize();
    [t1, t2]
}

fn effective_mass(reference: &SolverBody, incident: &SolverBody, ra: Vec3, rb: Vec3, axis: Vec3) -> f32 {
    let ra_x = ra.cross(axis);
    let rb_x = rb.cross(axis);
    reference.inv_mass
        + incident.inv_mass
        + ra_x.dot(reference.inv_inertia * ra_x)
        + rb_x.dot(incident.inv_inertia * rb_x)
}

#[inline]
fn apply_impulse(reference: &mut SolverBody, incident: &mut SolverBody, contact: &Contact, impulse: Vec3) {
    reference.linear_velocity -= impulse * reference.inv_mass;
    reference.angular_velocity -= reference.inv_inertia * contact.reference_arm.cross(impulse);
    incident.linear_velocity += impulse * incident.inv_mass;
    incident.angular_velocity += incident.inv_inertia * contact.incident_arm.cross(impulse);
}

#[inline]
fn relative_velocity(reference: &SolverBody, incident: &SolverBody, contact: &Contact) -> Vec3 {
    incident.velocity_at(contact.incident_arm) - reference.velocity_at(contact.reference_arm)
}

fn load(bodies: &[SolverBody], index: Option<usize>) -> SolverBody {
    index
        .and_then(|i| bodies.get(i).copied())
        .unwrap_or(SolverBody::FIXED)
}

fn store(bodies: &mut [SolverBody], index: Option<usize>, body: SolverBody) {
    if let Some(slot) = index.and_then(|i| bodies.get_mut(i)) {
        *slot = body;
    }
}

/// Run `f` over every valid manifold with both bodies copied out and written
/// back afterwards.
fn for_each_manifold(
    manifolds: &mut [Manifold],
    bodies: &mut [SolverBody],
    mut f: impl FnMut(&mut Manifold, &mut SolverBody, &mut SolverBody),
) {
    for manifold in manifolds.iter_mut().filter(|m| m.is_valid()) {
        let mut reference = load(bodies, manifold.reference.body);
        let mut incident = load(bodies, manifold.incident.body);
        f(manifold, &mut reference, &mut incident);
        store(bodies, manifold.reference.body, reference);
        store(bodies, manifold.incident.body, incident);
    }
}

/// Precompute arms, tangents, effective masses and velocity bias, then apply
/// the warm-start impulses already stored on each contact.
pub fn initialize(manifolds: &mut [Manifold], bodies: &mut [SolverBody], dt: f32, config: &SolverConfig) {
    let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };

    for_each_manifold(manifolds, bodies, |manifold, reference, incident| {
        let restitution = (reference.restitution + incident.restitution) * 0.5;

        for contact in &mut manifold.contacts {
            contact.reference_arm = contact.reference_point - reference.center;
            contact.incident_arm = contact.incident_point - incident.center;
            contact.tangents = compute_tangents(contact.normal);

            let k_normal = effective_mass(
                reference,
                incident,
                contact.reference_arm,
                contact.incident_arm,
                contact.normal,
            );
            let k_tangents = contact.tangents.map(|t| {
                effective_mass(reference, incident, contact.reference_arm, contact.incident_arm, t)
            });

            if !k_normal.is_finite() || k_normal <= 0.0 || k_tangents.iter().any(|k| !k.is_finite() || *k <= 0.0) {
                warn!(
                    "Skipping contact {:?} with unusable effective mass {}",
                    contact.label, k_normal
                );
                contact.active = false;
                continue;
            }
            contact.active = true;
            contact.normal_mass = 1.0 / k_normal;
            contact.tangent_masses = k_tangents.map(|k| 1.0 / k);

            let vn = relative_velocity(reference, incident, contact).dot(contact.normal);
            let baumgarte = -(contact.separation() + config.baumgarte_slop).min(0.0)
                * config.baumgarte_coefficient
                * inv_dt;
            let bounce = (-vn * restitution - config.restitution_slop).max(0.0);
            contact.bias = baumgarte + bounce;

            if config.warm_starting {
                let impulse = contact.normal * contact.normal_lambda
                    + contact.tangents[0] * contact.tangent_lambdas[0]
                    + contact.tangents[1] * contact.tangent_lambdas[1];
                apply_impulse(reference, incident, contact, impulse);
            } else {
                contact.normal_lambda = 0.0;
                contact.tangent_lambdas = [0.0; 2];
            }
        }
    });
}

/// One sweep of normal constraints.
pub fn solve_contacts(manifolds: &mut [Manifold], bodies: &mut [SolverBody]) {
    for_each_manifold(manifolds, bodies, |manifold, reference, incident| {
        for contact in manifold.contacts.iter_mut().filter(|c| c.active) {
            let vn = relative_velocity(reference, incident, contact).dot(contact.normal);
            let lambda = -contact.normal_mass * (vn - contact.bias);

            let old = contact.normal_lambda;
            contact.normal_lambda = (old + lambda).max(0.0);
            let applied = contact.normal_lambda - old;

            apply_impulse(reference, incident, contact, contact.normal * applied);
        }
    });
}

/// One sweep of Coulomb friction constraints.
pub fn solve_friction(manifolds: &mut [Manifold], bodies: &mut [SolverBody]) {
    for_each_manifold(manifolds, bodies, |manifold, reference, incident| {
        let friction = (reference.friction + incident.friction) * 0.5;

        for contact in manifold.contacts.iter_mut().filter(|c| c.active) {
            let max_friction = friction * contact.normal_lambda;
            for i in 0..2 {
                let tangent = contact.tangents[i];
                let vt = relative_velocity(reference, incident, contact).dot(tangent);
                let lambda = -contact.tangent_masses[i] * vt;

                let old = contact.tangent_lambdas[i];
                contact.tangent_lambdas[i] = (old + lambda).clamp(-max_friction, max_friction);
                let applied = contact.tangent_lambdas[i] - old;

                apply_impulse(reference, incident, contact, tangent * applied);
            }
        }
    });
}

/// Sort, initialize and iterate every valid manifold.
///
/// Body velocities in `bodies` are updated in place. Manifold sides whose
/// `body` is `None` or out of range act as immovable.
pub fn resolve(manifolds: &mut [Manifold], bodies: &mut [SolverBody], dt: f32, config: &SolverConfig) {
    for manifold in manifolds.iter_mut().filter(|m| m.is_valid()) {
        manifold
            .contacts
            .sort_by(|a, b| a.separation().total_cmp(&b.separation()));
    }

    initialize(manifolds, bodies, dt, config);
    for _ in 0..config.contact_iterations {
        solve_contacts(manifolds, bodies);
    }
    for _ in 0..config.friction_iterations {
        solve_friction(manifolds, bodies);
    }
}
