//! Contact data structures for collision response.

use glam::{Mat4, Vec3};

use super::collider::ColliderId;
use super::half_edge::FeatureLabel;
use super::sat::PenetrationQuery;

/// A single clipped contact point with solver state.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    /// Contact position projected onto the reference feature.
    pub reference_point: Vec3,
    /// Contact position on the incident body.
    pub incident_point: Vec3,
    /// Unit normal pointing from the reference body into the incident body.
    pub normal: Vec3,
    pub label: FeatureLabel,
    /// Accumulated normal impulse.
    pub normal_lambda: f32,
    /// Accumulated friction impulses along `tangents`.
    pub tangent_lambdas: [f32; 2],
    pub tangents: [Vec3; 2],
    pub normal_mass: f32,
    pub tangent_masses: [f32; 2],
    /// Velocity bias from position correction and restitution.
    pub bias: f32,
    pub reference_arm: Vec3,
    pub incident_arm: Vec3,
    /// Cleared when the effective mass is unusable.
    pub active: bool,
}

impl Contact {
    pub fn new(reference_point: Vec3, incident_point: Vec3, normal: Vec3, label: FeatureLabel) -> Self {
        Self {
            reference_point,
            incident_point,
            normal,
            label,
            normal_lambda: 0.0,
            tangent_lambdas: [0.0; 2],
            tangents: [Vec3::ZERO; 2],
            normal_mass: 0.0,
            tangent_masses: [0.0; 2],
            bias: 0.0,
            reference_arm: Vec3::ZERO,
            incident_arm: Vec3::ZERO,
            active: true,
        }
    }

    /// Signed distance of the incident point from the reference feature.
    /// Negative while penetrating.
    #[inline]
    pub fn separation(&self) -> f32 {
        (self.incident_point - self.reference_point).dot(self.normal)
    }

    #[inline]
    pub fn penetration(&self) -> f32 {
        (-self.separation()).max(0.0)
    }
}

/// One body's role in a manifold.
#[derive(Debug, Clone, Copy)]
pub struct ManifoldSide {
    pub entity: Option<hecs::Entity>,
    pub collider: ColliderId,
    /// Index of the hull inside the entity's `Collider`.
    pub hull: usize,
    pub transform: Mat4,
    /// Index into the solver's body list; `None` means immovable.
    pub body: Option<usize>,
}

impl ManifoldSide {
    pub fn new(collider: ColliderId, transform: Mat4) -> Self {
        Self {
            entity: None,
            collider,
            hull: 0,
            transform,
            body: None,
        }
    }
}

/// Contact set for one colliding pair in one step.
#[derive(Debug, Clone)]
pub struct Manifold {
    pub reference: ManifoldSide,
    pub incident: ManifoldSide,
    pub query: PenetrationQuery,
    pub contacts: Vec<Contact>,
    valid: bool,
}

impl Manifold {
    pub fn new(
        reference: ManifoldSide,
        incident: ManifoldSide,
        query: PenetrationQuery,
        contacts: Vec<Contact>,
    ) -> Self {
        Self {
            reference,
            incident,
            query,
            contacts,
            valid: true,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Exclude this manifold from the solver for the rest of the step.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    #[inline]
    pub fn normal(&self) -> Vec3 {
        self.query.normal
    }

    /// Depth along the separating-axis normal.
    #[inline]
    pub fn penetration_depth(&self) -> f32 {
        -self.query.separation
    }
}

/// Final impulses of one contact, kept on the reference collider to seed the
/// next step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceIdentifier {
    pub label: FeatureLabel,
    pub incident_collider: ColliderId,
    pub normal_lambda: f32,
    pub tangent_lambdas: [f32; 2],
}

impl ConvergenceIdentifier {
    pub fn from_contact(contact: &Contact, incident_collider: ColliderId) -> Self {
        Self {
            label: contact.label,
            incident_collider,
            normal_lambda: contact.normal_lambda,
            tangent_lambdas: contact.tangent_lambdas,
        }
    }

    /// Copy the stored impulses into a contact.
    pub fn seed(&self, contact: &mut Contact) {
        contact.normal_lambda = self.normal_lambda;
        contact.tangent_lambdas = self.tangent_lambdas;
    }
}
