//! Shared setup helpers for rein-physics benchmarks.
//!
//! ## Running
//!
//! Wall-clock (criterion):
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics
//!
//! iai-callgrind (instruction counts, requires valgrind):
//!   cargo install iai-callgrind-runner
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics_iai
//!
//! Filter by group:
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics -- quickhull
//!   cargo bench --manifest-path benchmarks/Cargo.toml --bench physics -- solver

use anyhow::Context;
use glam::{Mat4, Quat, Vec3};
use rein_physics::ecs::components::physics::{Collider, RigidBody, RigidBodyType};
use rein_physics::ecs::components::transform::{GlobalTransform, Transform};
use rein_physics::physics::broadphase::BodyProxy;
use rein_physics::physics::collider::{ConvexCollider, PhysicsAabb};
use rein_physics::physics::contact::Manifold;
use rein_physics::physics::narrowphase::test_collision;
use rein_physics::physics::solver::SolverBody;
use rein_physics::physics::{NarrowPhaseConfig, PhysicsConfig, PhysicsWorld, SimulationControl};

// ---------------------------------------------------------------------------
// Point clouds
// ---------------------------------------------------------------------------

/// `n` points on a unit sphere (Fibonacci lattice).
pub fn setup_sphere_cloud(n: usize) -> Vec<Vec3> {
    let golden = std::f32::consts::PI * (3.0 - 5.0_f32.sqrt());
    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - y * y).sqrt();
            let theta = golden * i as f32;
            Vec3::new(r * theta.cos(), y, r * theta.sin())
        })
        .collect()
}

/// `n` pseudo-random points in the unit cube; most end up inside the hull.
pub fn setup_box_cloud(n: usize) -> Vec<Vec3> {
    let mut state = 0x2545_f491_u32;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state as f32 / u32::MAX as f32) * 2.0 - 1.0
    };
    (0..n).map(|_| Vec3::new(next(), next(), next())).collect()
}

// ---------------------------------------------------------------------------
// Collision pairs
// ---------------------------------------------------------------------------

/// Two unit cubes, the second translated by `offset` and rotated about Y.
pub fn setup_box_pair(offset: Vec3, yaw: f32) -> anyhow::Result<(ConvexCollider, Mat4, ConvexCollider, Mat4)> {
    let a = ConvexCollider::new_box(Vec3::splat(0.5)).context("cube A")?;
    let b = ConvexCollider::new_box(Vec3::splat(0.5)).context("cube B")?;
    let tb = Mat4::from_rotation_translation(Quat::from_rotation_y(yaw), offset);
    Ok((a, Mat4::IDENTITY, b, tb))
}

/// Two round-ish hulls built from `n`-point sphere clouds.
pub fn setup_hull_pair(n: usize, offset: Vec3) -> anyhow::Result<(ConvexCollider, Mat4, ConvexCollider, Mat4)> {
    let cloud = setup_sphere_cloud(n);
    let a = ConvexCollider::from_points(&cloud).context("hull A")?;
    let b = ConvexCollider::from_points(&cloud).context("hull B")?;
    Ok((a, Mat4::IDENTITY, b, Mat4::from_translation(offset)))
}

// ---------------------------------------------------------------------------
// Broadphase proxies
// ---------------------------------------------------------------------------

/// `n` unit proxies on a square grid with the given spacing.
pub fn setup_proxies(n: usize, spacing: f32) -> Vec<BodyProxy> {
    let mut world = hecs::World::new();
    let cols = (n as f32).sqrt().ceil() as usize;
    (0..n)
        .map(|i| {
            let center = Vec3::new((i % cols) as f32 * spacing, 0.0, (i / cols) as f32 * spacing);
            BodyProxy {
                entity: world.spawn(()),
                aabb: PhysicsAabb {
                    min: center - Vec3::splat(0.5),
                    max: center + Vec3::splat(0.5),
                },
                body_type: Some(RigidBodyType::Dynamic),
                is_sensor: false,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Solver setup
// ---------------------------------------------------------------------------

/// A column of `n` resting cubes on a fixed ground, with manifolds and
/// solver bodies ready for `solver::resolve`.
pub fn setup_stack(n: usize) -> anyhow::Result<(Vec<Manifold>, Vec<SolverBody>)> {
    let config = NarrowPhaseConfig::default();
    let ground = ConvexCollider::new_box(Vec3::new(5.0, 0.5, 5.0)).context("ground")?;
    let t_ground = Mat4::from_translation(Vec3::new(0.0, -0.5, 0.0));

    let mut cubes = Vec::with_capacity(n);
    let mut bodies = Vec::with_capacity(n);
    for i in 0..n {
        let position = Vec3::new(0.0, 0.499 + i as f32 * 0.999, 0.0);
        cubes.push((ConvexCollider::new_box(Vec3::splat(0.5)).context("cube")?, Mat4::from_translation(position)));
        let rb = RigidBody::new_dynamic(1.0).with_box_inertia(Vec3::splat(0.5));
        bodies.push(SolverBody::from_rigid_body(&rb, &GlobalTransform(Mat4::from_translation(position))));
    }

    let mut manifolds = Vec::with_capacity(n);
    for i in 0..n {
        let (below, t_below, below_body) = if i == 0 {
            (&ground, t_ground, None)
        } else {
            (&cubes[i - 1].0, cubes[i - 1].1, Some(i - 1))
        };
        let (cube, t_cube) = (&cubes[i].0, cubes[i].1);
        let mut manifold = test_collision(below, &t_below, cube, &t_cube, &config)
            .with_context(|| format!("stack contact {i}"))?;
        let below_is_reference = manifold.reference.collider == below.id();
        let (reference, incident) = if below_is_reference {
            (below_body, Some(i))
        } else {
            (Some(i), below_body)
        };
        manifold.reference.body = reference;
        manifold.incident.body = incident;
        manifolds.push(manifold);
    }

    Ok((manifolds, bodies))
}

// ---------------------------------------------------------------------------
// Full scenes
// ---------------------------------------------------------------------------

/// Ground plus `n` dynamic cubes above it, half of them rotated.
pub fn setup_scene(n: usize) -> anyhow::Result<(hecs::World, PhysicsWorld)> {
    let mut world = hecs::World::new();
    let physics = PhysicsWorld::new(PhysicsConfig::default());

    let ground = Transform::from_position(Vec3::new(0.0, -0.5, 0.0));
    world.spawn((
        ground,
        GlobalTransform::from_transform(&ground),
        RigidBody::new_static(),
        Collider::cuboid(Vec3::new(100.0, 0.5, 100.0))?,
    ));

    let cols = (n as f32).sqrt().ceil() as usize;
    for i in 0..n {
        let x = (i % cols) as f32 * 2.0 - (cols as f32);
        let z = (i / cols) as f32 * 2.0 - (cols as f32);
        let y = 1.0 + (i % 5) as f32 * 1.5;
        let rotation = if i % 2 == 0 {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_y(0.4) * Quat::from_rotation_x(0.3)
        };
        let transform = Transform::from_position_rotation(Vec3::new(x, y, z), rotation);
        world.spawn((
            transform,
            GlobalTransform::from_transform(&transform),
            RigidBody::new_dynamic(1.0).with_box_inertia(Vec3::splat(0.4)),
            Collider::cuboid(Vec3::splat(0.4))?,
        ));
    }

    Ok((world, physics))
}

/// Run `frames` frames at 60 Hz.
pub fn run_frames(world: &mut hecs::World, physics: &mut PhysicsWorld, frames: usize) {
    let mut control = SimulationControl::default();
    for _ in 0..frames {
        physics.step(world, 1.0 / 60.0, &mut control);
    }
}
