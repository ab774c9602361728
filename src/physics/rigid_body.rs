//! Rigid body integration functions.

use glam::{Quat, Vec3};

use crate::ecs::components::physics::{RigidBody, RigidBodyType};
use crate::ecs::components::transform::{GlobalTransform, Transform};

/// Angular speed ceiling in rad/s.
pub const MAX_ANGULAR_SPEED: f32 = 32.0;

/// Apply gravity force to all dynamic rigid bodies.
pub fn apply_gravity(world: &mut hecs::World, gravity: Vec3) {
    for (_, rb) in world.query_mut::<&mut RigidBody>() {
        if rb.is_dynamic() && rb.mass > 0.0 {
            rb.force_accumulator += gravity * rb.mass * rb.gravity_scale;
        }
    }
}

/// Integrate velocities using semi-implicit Euler: v += (F/m) * dt.
pub fn integrate_velocities(world: &mut hecs::World, dt: f32) {
    for (_, (rb, transform)) in world.query_mut::<(&mut RigidBody, &Transform)>() {
        if !rb.is_dynamic() || rb.mass <= 0.0 {
            continue;
        }

        let inv_mass = rb.inverse_mass();
        rb.linear_velocity += rb.force_accumulator * inv_mass * dt;

        let inv_inertia = rb.inverse_inertia_world(transform.rotation);
        rb.angular_velocity += inv_inertia * rb.torque_accumulator * dt;

        // Apply damping
        rb.linear_velocity *= (1.0 - rb.linear_damping).max(0.0);
        rb.angular_velocity *= (1.0 - rb.angular_damping).max(0.0);

        rb.angular_velocity = clamp_angular_speed(rb.angular_velocity);
    }
}

#[inline]
fn clamp_angular_speed(omega: Vec3) -> Vec3 {
    let speed_sq = omega.length_squared();
    if speed_sq > MAX_ANGULAR_SPEED * MAX_ANGULAR_SPEED {
        omega * (MAX_ANGULAR_SPEED / speed_sq.sqrt())
    } else {
        omega
    }
}

/// Integrate positions: p += v * dt, q += 0.5 * omega * q * dt.
///
/// Kinematic bodies move with their user-set velocities.
pub fn integrate_positions(world: &mut hecs::World, dt: f32) {
    for (_, (rb, transform)) in world.query_mut::<(&mut RigidBody, &mut Transform)>() {
        if !rb.is_dynamic() && rb.body_type != RigidBodyType::Kinematic {
            continue;
        }

        rb.angular_velocity = clamp_angular_speed(rb.angular_velocity);

        // Rotation about the center of mass moves the origin too.
        let com_before = transform.position + transform.rotation * rb.center_of_mass;
        let com_after = com_before + rb.linear_velocity * dt;

        let omega = rb.angular_velocity;
        if omega.length_squared() > 1e-10 {
            let omega_quat = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0);
            let q_dot = omega_quat * transform.rotation * 0.5;
            transform.rotation = Quat::from_xyzw(
                transform.rotation.x + q_dot.x * dt,
                transform.rotation.y + q_dot.y * dt,
                transform.rotation.z + q_dot.z * dt,
                transform.rotation.w + q_dot.w * dt,
            )
            .normalize();
        }

        transform.position = com_after - transform.rotation * rb.center_of_mass;
    }
}

/// Rebuild every GlobalTransform from its Transform.
pub fn sync_transforms(world: &mut hecs::World) {
    for (_, (transform, global)) in world.query_mut::<(&Transform, &mut GlobalTransform)>() {
        global.0 = transform.to_matrix();
    }
}

/// Clear force and torque accumulators on all rigid bodies.
pub fn clear_forces(world: &mut hecs::World) {
    for (_, rb) in world.query_mut::<&mut RigidBody>() {
        rb.force_accumulator = Vec3::ZERO;
        rb.torque_accumulator = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(world: &mut hecs::World, gravity: Vec3, dt: f32, steps: usize) {
        for _ in 0..steps {
            apply_gravity(world, gravity);
            integrate_velocities(world, dt);
            integrate_positions(world, dt);
            sync_transforms(world);
            clear_forces(world);
        }
    }

    #[test]
    fn test_free_fall() {
        let mut world = hecs::World::new();

        let entity = world.spawn((
            Transform::from_position(Vec3::new(0.0, 10.0, 0.0)),
            GlobalTransform::default(),
            RigidBody::new_dynamic(1.0),
        ));

        run(&mut world, Vec3::new(0.0, -9.81, 0.0), 1.0 / 60.0, 60);

        let transform = world.get::<&Transform>(entity).unwrap();

        // After 1 second of free fall from y=10: y = 10 - 0.5*9.81*1^2 ≈ 5.095
        assert!(
            transform.position.y < 10.0,
            "Body should have fallen: y = {}",
            transform.position.y
        );
        assert!(
            transform.position.y > 0.0,
            "Body should not have fallen too far in 1 second: y = {}",
            transform.position.y
        );

        let eps = 1e-5;
        assert!(transform.position.x.abs() < eps);
        assert!(transform.position.z.abs() < eps);

        let global = world.get::<&GlobalTransform>(entity).unwrap();
        assert!((global.translation() - transform.position).length() < eps);
    }

    #[test]
    fn test_static_body_unaffected() {
        let mut world = hecs::World::new();

        let entity = world.spawn((
            Transform::from_position(Vec3::new(0.0, 0.0, 0.0)),
            GlobalTransform::default(),
            RigidBody::new_static(),
        ));

        run(&mut world, Vec3::new(0.0, -9.81, 0.0), 1.0 / 60.0, 60);

        let transform = world.get::<&Transform>(entity).unwrap();
        assert_eq!(transform.position, Vec3::ZERO);
    }

    #[test]
    fn test_kinematic_body_follows_velocity() {
        let mut world = hecs::World::new();
        let mut rb = RigidBody::new_kinematic();
        rb.linear_velocity = Vec3::new(1.0, 0.0, 0.0);
        let entity = world.spawn((Transform::identity(), GlobalTransform::default(), rb));

        run(&mut world, Vec3::new(0.0, -9.81, 0.0), 0.5, 2);

        let transform = world.get::<&Transform>(entity).unwrap();
        assert!((transform.position - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_angular_speed_clamped() {
        let mut world = hecs::World::new();
        let mut rb = RigidBody::new_dynamic(1.0);
        rb.angular_damping = 0.0;
        rb.angular_velocity = Vec3::new(0.0, 100.0, 0.0);
        let entity = world.spawn((Transform::identity(), GlobalTransform::default(), rb));

        integrate_velocities(&mut world, 1.0 / 60.0);

        let rb = world.get::<&RigidBody>(entity).unwrap();
        assert!((rb.angular_velocity.length() - MAX_ANGULAR_SPEED).abs() < 1e-3);
    }

    #[test]
    fn test_rotation_about_center_of_mass() {
        let mut world = hecs::World::new();
        let mut rb = RigidBody::new_dynamic(1.0);
        rb.center_of_mass = Vec3::X;
        rb.angular_velocity = Vec3::new(0.0, 1.0, 0.0);
        let entity = world.spawn((Transform::identity(), GlobalTransform::default(), rb));

        for _ in 0..10 {
            integrate_positions(&mut world, 0.01);
        }

        let transform = world.get::<&Transform>(entity).unwrap();
        let com = transform.position + transform.rotation * Vec3::X;
        assert!((com - Vec3::X).length() < 1e-4, "com drifted to {:?}", com);
    }

    #[test]
    fn test_clear_forces() {
        let mut world = hecs::World::new();

        let entity = world.spawn((Transform::identity(), GlobalTransform::default(), {
            let mut rb = RigidBody::new_dynamic(1.0);
            rb.force_accumulator = Vec3::new(10.0, 20.0, 30.0);
            rb.torque_accumulator = Vec3::new(1.0, 2.0, 3.0);
            rb
        }));

        clear_forces(&mut world);

        let rb = world.get::<&RigidBody>(entity).unwrap();
        assert_eq!(rb.force_accumulator, Vec3::ZERO);
        assert_eq!(rb.torque_accumulator, Vec3::ZERO);
    }
}
