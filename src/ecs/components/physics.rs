//! Physics components for ECS entities.

use glam::{Mat3, Quat, Vec3};

#[cfg(feature = "physics")]
use crate::error::PhysicsResult;
#[cfg(feature = "physics")]
use crate::physics::collider::ConvexCollider;

/// Rigid body type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyType {
    /// Affected by forces and collisions.
    Dynamic,
    /// Immovable.
    Static,
    /// Position controlled by user, but affects dynamic bodies.
    Kinematic,
}

/// Rigid body component.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub body_type: RigidBodyType,
    pub mass: f32,
    /// Body-space inertia tensor about the center of mass.
    pub inertia_tensor: Mat3,
    /// Body-space center of mass.
    pub center_of_mass: Vec3,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub force_accumulator: Vec3,
    pub torque_accumulator: Vec3,
    /// Linear damping factor (default: 0.01).
    pub linear_damping: f32,
    /// Angular damping factor (default: 0.01).
    pub angular_damping: f32,
    /// Coefficient of restitution (0.0 - 1.0).
    pub restitution: f32,
    /// Friction coefficient (0.0 - 1.0).
    pub friction: f32,
    /// Gravity scale (default: 1.0).
    pub gravity_scale: f32,
}

impl RigidBody {
    fn with_type(body_type: RigidBodyType, mass: f32, inertia_tensor: Mat3) -> Self {
        Self {
            body_type,
            mass,
            inertia_tensor,
            center_of_mass: Vec3::ZERO,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force_accumulator: Vec3::ZERO,
            torque_accumulator: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            restitution: 0.0,
            friction: 0.5,
            gravity_scale: 0.0,
        }
    }

    /// Create a new dynamic rigid body with the given mass.
    ///
    /// The inertia tensor starts as `mass * I`; use [`Self::with_box_inertia`]
    /// for a solid box.
    pub fn new_dynamic(mass: f32) -> Self {
        Self {
            linear_damping: 0.01,
            angular_damping: 0.01,
            gravity_scale: 1.0,
            ..Self::with_type(RigidBodyType::Dynamic, mass, Mat3::from_diagonal(Vec3::splat(mass)))
        }
    }

    /// Create a new static rigid body.
    pub fn new_static() -> Self {
        Self::with_type(RigidBodyType::Static, 0.0, Mat3::ZERO)
    }

    /// Create a new kinematic rigid body.
    pub fn new_kinematic() -> Self {
        Self::with_type(RigidBodyType::Kinematic, 0.0, Mat3::ZERO)
    }

    /// Replace the inertia tensor with that of a solid box.
    pub fn with_box_inertia(mut self, half_extents: Vec3) -> Self {
        let sq = half_extents * half_extents;
        let k = self.mass / 3.0;
        self.inertia_tensor = Mat3::from_diagonal(Vec3::new(
            k * (sq.y + sq.z),
            k * (sq.x + sq.z),
            k * (sq.x + sq.y),
        ));
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.body_type == RigidBodyType::Dynamic
    }

    /// Zero for anything that is not a dynamic body with positive mass.
    #[inline]
    pub fn inverse_mass(&self) -> f32 {
        if self.is_dynamic() && self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    /// World-space inverse inertia `R * I^-1 * R^T`.
    pub fn inverse_inertia_world(&self, rotation: Quat) -> Mat3 {
        if !self.is_dynamic() || self.inertia_tensor.determinant().abs() <= f32::EPSILON {
            return Mat3::ZERO;
        }
        let r = Mat3::from_quat(rotation);
        r * self.inertia_tensor.inverse() * r.transpose()
    }
}

/// Collision component: one or more convex hulls sharing a body.
#[cfg(feature = "physics")]
#[derive(Debug, Clone)]
pub struct Collider {
    pub hulls: Vec<ConvexCollider>,
    /// Offset from the entity's transform origin, applied to every hull.
    pub offset: Vec3,
    /// If true, generates trigger events but no physics response.
    pub is_sensor: bool,
}

#[cfg(feature = "physics")]
impl Collider {
    pub fn new(hull: ConvexCollider) -> Self {
        Self::compound(vec![hull])
    }

    pub fn compound(hulls: Vec<ConvexCollider>) -> Self {
        Self {
            hulls,
            offset: Vec3::ZERO,
            is_sensor: false,
        }
    }

    /// Box collider centered on the entity.
    pub fn cuboid(half_extents: Vec3) -> PhysicsResult<Self> {
        Ok(Self::new(ConvexCollider::new_box(half_extents)?))
    }

    /// Convex hull of an arbitrary point cloud.
    pub fn convex_hull(points: &[Vec3]) -> PhysicsResult<Self> {
        Ok(Self::new(ConvexCollider::from_points(points)?))
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }

    pub fn sensor(mut self) -> Self {
        self.is_sensor = true;
        self
    }
}
