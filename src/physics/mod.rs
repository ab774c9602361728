//! CPU rigid body simulation with convex hull collision detection.
//!
//! # Architecture
//!
//! The physics pipeline runs in a fixed timestep loop:
//!
//! 1. Apply forces (gravity)
//! 2. Integrate velocities
//! 3. Broadphase grouping of collider AABBs
//! 4. Narrowphase: AABB middle phase, SAT, contact clipping
//! 5. Collision and trigger events
//! 6. Solve contact constraints (sequential impulse, warm started)
//! 7. Record convergence data for the next step
//! 8. Integrate positions
//! 9. Synchronize transforms
//! 10. Clear force accumulators

pub mod broadphase;
pub mod clipper;
pub mod collider;
pub mod contact;
pub mod events;
pub mod half_edge;
pub mod narrowphase;
pub mod quickhull;
pub mod rigid_body;
pub mod sat;
pub mod solver;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;

use glam::{Mat4, Vec3};
use tracing::{error, trace};

use crate::ecs::components::physics::{Collider, RigidBody};
use crate::ecs::components::transform::GlobalTransform;

use self::broadphase::{classify_pair, BodyProxy, BroadPhase, PairAction, SpatialHashGrid};
use self::collider::{ConvexCollider, PhysicsAabb};
use self::contact::{ConvergenceIdentifier, Manifold};
use self::events::{CollisionEvent, ContactListener, TriggerEvent};
use self::narrowphase::test_collision;
use self::solver::SolverBody;

/// Tuning for SAT feature selection and contact clipping.
#[derive(Debug, Clone)]
pub struct NarrowPhaseConfig {
    /// Margin by which hull B's face must beat hull A's to become the
    /// reference. Default: 0.001.
    pub face_to_face_penetration_bias: f32,
    /// Margin by which an edge axis must beat the best face. Default: 0.01.
    pub face_to_edge_penetration_bias: f32,
    /// Edge pairs with `|dot| > 1 - threshold` count as parallel.
    /// Default: 0.01.
    pub gauss_map_edge_threshold: f32,
    /// Distance under which a clipped vertex lies on the clip plane.
    /// Default: 1e-4.
    pub clipping_threshold: f32,
    /// Clipped points further than this above the reference face are
    /// dropped. Default: 0.01.
    pub contact_offset: f32,
}

impl Default for NarrowPhaseConfig {
    fn default() -> Self {
        Self {
            face_to_face_penetration_bias: 0.001,
            face_to_edge_penetration_bias: 0.01,
            gauss_map_edge_threshold: 0.01,
            clipping_threshold: 1e-4,
            contact_offset: 0.01,
        }
    }
}

/// Sequential impulse solver parameters.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Normal constraint sweeps per step. Default: 8.
    pub contact_iterations: u32,
    /// Friction sweeps per step, run after the normal sweeps. Default: 4.
    pub friction_iterations: u32,
    /// Fraction of penetration corrected per step. Default: 0.2.
    pub baumgarte_coefficient: f32,
    /// Penetration left uncorrected. Default: 0.005.
    pub baumgarte_slop: f32,
    /// Approach speed absorbed before restitution applies. Default: 0.5.
    pub restitution_slop: f32,
    /// Seed impulses from the previous step. Default: true.
    pub warm_starting: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            contact_iterations: 8,
            friction_iterations: 4,
            baumgarte_coefficient: 0.2,
            baumgarte_slop: 0.005,
            restitution_slop: 0.5,
            warm_starting: true,
        }
    }
}

/// Configuration for the physics simulation.
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    /// Gravity vector. Default: (0, -9.81, 0).
    pub gravity: Vec3,
    /// Fixed timestep for physics updates in seconds. Default: 1/60.
    pub fixed_timestep: f64,
    /// Maximum number of sub-steps per frame. Default: 4.
    pub max_substeps: u32,
    /// Cell size of the default spatial hash broadphase. Default: 3.0.
    pub broadphase_cell_size: f32,
    pub narrowphase: NarrowPhaseConfig,
    pub solver: SolverConfig,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 4,
            broadphase_cell_size: 3.0,
            narrowphase: NarrowPhaseConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

/// External control over whether steps run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationControl {
    /// Skip every step while set.
    pub paused: bool,
    /// Run exactly one fixed step on the next call, then pause.
    pub single_step: bool,
}

/// Hulls that failed validation this step, by entity and hull index.
type InvalidHulls = HashSet<(hecs::Entity, usize)>;

#[derive(Debug, Clone, Copy)]
struct PairRecord {
    entity_a: hecs::Entity,
    entity_b: hecs::Entity,
    action: PairAction,
    sensor_is_a: bool,
}

/// The main physics world managing simulation state.
pub struct PhysicsWorld {
    config: PhysicsConfig,
    accumulator: f64,
    broadphase: Box<dyn BroadPhase>,
    manifolds: Vec<Manifold>,
    listeners: Vec<Box<dyn ContactListener>>,
}

impl PhysicsWorld {
    /// Create a new physics world with a spatial hash broadphase.
    pub fn new(config: PhysicsConfig) -> Self {
        let grid = SpatialHashGrid::new(config.broadphase_cell_size);
        Self::with_broadphase(config, Box::new(grid))
    }

    pub fn with_broadphase(config: PhysicsConfig, broadphase: Box<dyn BroadPhase>) -> Self {
        Self {
            config,
            accumulator: 0.0,
            broadphase,
            manifolds: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn ContactListener>) {
        self.listeners.push(listener);
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Manifolds produced by the most recent fixed step. Trigger pairs and
    /// pairs without a dynamic body are present but invalid.
    pub fn manifolds(&self) -> &[Manifold] {
        &self.manifolds
    }

    /// Step the physics simulation forward by `delta_time` seconds.
    ///
    /// Uses a fixed timestep accumulator to ensure deterministic simulation.
    /// Returns the number of fixed steps that ran.
    pub fn step(
        &mut self,
        world: &mut hecs::World,
        delta_time: f64,
        control: &mut SimulationControl,
    ) -> u32 {
        let dt = self.config.fixed_timestep;

        if control.single_step {
            self.fixed_step(world, dt as f32);
            control.single_step = false;
            control.paused = true;
            self.accumulator = 0.0;
            return 1;
        }
        if control.paused {
            return 0;
        }

        self.accumulator += delta_time;

        let mut substeps = 0u32;
        while self.accumulator >= dt && substeps < self.config.max_substeps {
            self.fixed_step(world, dt as f32);
            self.accumulator -= dt;
            substeps += 1;
        }

        // Clamp accumulator to avoid spiral of death
        if self.accumulator > dt * self.config.max_substeps as f64 {
            self.accumulator = 0.0;
        }
        substeps
    }

    fn fixed_step(&mut self, world: &mut hecs::World, dt: f32) {
        // 1-2. Forces and velocities
        rigid_body::apply_gravity(world, self.config.gravity);
        rigid_body::integrate_velocities(world, dt);
        rigid_body::sync_transforms(world);

        // 3. Broadphase
        let (proxies, invalid) = collect_proxies(world);
        let pairs = self.candidate_pairs(&proxies);

        // 4. Narrowphase; each entity pair owns a contiguous run of manifolds
        self.manifolds.clear();
        let mut spans: Vec<(PairRecord, Range<usize>)> = Vec::new();
        for pair in &pairs {
            let before = self.manifolds.len();
            self.collide_pair(world, pair, &invalid);
            if self.manifolds.len() > before {
                spans.push((*pair, before..self.manifolds.len()));
            }
        }

        // 5. Events, then keep unsolvable pairs away from the solver
        self.dispatch_events(&spans, dt);
        for (record, range) in &spans {
            if !matches!(record.action, PairAction::Collide { solve: true }) {
                for manifold in &mut self.manifolds[range.clone()] {
                    manifold.invalidate();
                }
            }
        }

        // 6. Solve
        let bodies = self.solve(world, dt);

        // 7. Record convergence
        self.record_convergence(world, &bodies);

        // 8-10. Positions, transforms, forces
        rigid_body::integrate_positions(world, dt);
        rigid_body::sync_transforms(world);
        rigid_body::clear_forces(world);
    }

    fn candidate_pairs(&mut self, proxies: &[BodyProxy]) -> Vec<PairRecord> {
        let mut unique = BTreeSet::new();
        for group in self.broadphase.collect_pairs(proxies) {
            for (n, &i) in group.iter().enumerate() {
                for &j in &group[n + 1..] {
                    if i != j {
                        unique.insert((i.min(j), i.max(j)));
                    }
                }
            }
        }

        unique
            .into_iter()
            .filter_map(|(i, j)| {
                let (a, b) = (proxies.get(i)?, proxies.get(j)?);
                if !a.aabb.overlaps(&b.aabb) {
                    return None;
                }
                let action = classify_pair(a, b);
                (action != PairAction::Skip).then_some(PairRecord {
                    entity_a: a.entity,
                    entity_b: b.entity,
                    action,
                    sensor_is_a: a.is_sensor,
                })
            })
            .collect()
    }

    fn collide_pair(&mut self, world: &hecs::World, pair: &PairRecord, invalid: &InvalidHulls) {
        let (Ok(collider_a), Ok(collider_b)) = (
            world.get::<&Collider>(pair.entity_a),
            world.get::<&Collider>(pair.entity_b),
        ) else {
            return;
        };
        let (Ok(global_a), Ok(global_b)) = (
            world.get::<&GlobalTransform>(pair.entity_a),
            world.get::<&GlobalTransform>(pair.entity_b),
        ) else {
            return;
        };
        let transform_a = hull_transform(&global_a, &collider_a);
        let transform_b = hull_transform(&global_b, &collider_b);

        for (i, hull_a) in collider_a.hulls.iter().enumerate() {
            if invalid.contains(&(pair.entity_a, i)) {
                continue;
            }
            for (j, hull_b) in collider_b.hulls.iter().enumerate() {
                if invalid.contains(&(pair.entity_b, j)) {
                    continue;
                }
                let Some(mut manifold) = test_collision(
                    hull_a,
                    &transform_a,
                    hull_b,
                    &transform_b,
                    &self.config.narrowphase,
                ) else {
                    continue;
                };

                let a_is_reference = manifold.reference.collider == hull_a.id();
                let (reference_hull, (ref_entity, ref_index), (inc_entity, inc_index)) =
                    if a_is_reference {
                        (hull_a, (pair.entity_a, i), (pair.entity_b, j))
                    } else {
                        (hull_b, (pair.entity_b, j), (pair.entity_a, i))
                    };
                manifold.reference.entity = Some(ref_entity);
                manifold.reference.hull = ref_index;
                manifold.incident.entity = Some(inc_entity);
                manifold.incident.hull = inc_index;

                if self.config.solver.warm_starting {
                    let incident_id = manifold.incident.collider;
                    for contact in &mut manifold.contacts {
                        if let Some(previous) =
                            reference_hull.find_convergence(contact.label, incident_id)
                        {
                            previous.seed(contact);
                        }
                    }
                }

                self.manifolds.push(manifold);
            }
        }
    }

    /// One event per entity pair, carrying all of that pair's manifolds.
    fn dispatch_events(&mut self, spans: &[(PairRecord, Range<usize>)], dt: f32) {
        if self.listeners.is_empty() {
            return;
        }
        for (record, range) in spans {
            let manifolds = &mut self.manifolds[range.clone()];
            for listener in self.listeners.iter_mut() {
                match record.action {
                    PairAction::Trigger => {
                        let (sensor, other) = if record.sensor_is_a {
                            (record.entity_a, record.entity_b)
                        } else {
                            (record.entity_b, record.entity_a)
                        };
                        listener.on_trigger(&mut TriggerEvent {
                            sensor,
                            other,
                            manifolds: &mut *manifolds,
                            dt,
                        });
                    }
                    PairAction::Collide { .. } => {
                        listener.on_collision(&mut CollisionEvent {
                            entity_a: record.entity_a,
                            entity_b: record.entity_b,
                            manifolds: &mut *manifolds,
                            dt,
                        });
                    }
                    PairAction::Skip => {}
                }
            }
        }
    }

    /// Gather solver bodies, run the solver, and write dynamic velocities
    /// back. Returns the entity-to-body map.
    fn solve(&mut self, world: &mut hecs::World, dt: f32) -> HashMap<hecs::Entity, usize> {
        let mut index: HashMap<hecs::Entity, usize> = HashMap::new();
        let mut bodies: Vec<SolverBody> = Vec::new();

        for manifold in self.manifolds.iter_mut().filter(|m| m.is_valid()) {
            for side in [&mut manifold.reference, &mut manifold.incident] {
                let Some(entity) = side.entity else {
                    continue;
                };
                if let Some(&slot) = index.get(&entity) {
                    side.body = Some(slot);
                    continue;
                }
                let (Ok(rb), Ok(global)) = (
                    world.get::<&RigidBody>(entity),
                    world.get::<&GlobalTransform>(entity),
                ) else {
                    continue;
                };
                bodies.push(SolverBody::from_rigid_body(&rb, &global));
                index.insert(entity, bodies.len() - 1);
                side.body = Some(bodies.len() - 1);
            }
        }

        solver::resolve(&mut self.manifolds, &mut bodies, dt, &self.config.solver);

        for (&entity, &slot) in &index {
            if let (Ok(mut rb), Some(body)) = (world.get::<&mut RigidBody>(entity), bodies.get(slot)) {
                if rb.is_dynamic() {
                    rb.linear_velocity = body.linear_velocity;
                    rb.angular_velocity = body.angular_velocity;
                }
            }
        }
        index
    }

    fn record_convergence(&self, world: &mut hecs::World, bodies: &HashMap<hecs::Entity, usize>) {
        for (_, collider) in world.query_mut::<&mut Collider>() {
            for hull in &mut collider.hulls {
                hull.clear_convergence();
            }
        }

        for manifold in self.manifolds.iter().filter(|m| m.is_valid()) {
            let Some(entity) = manifold.reference.entity else {
                continue;
            };
            let Ok(mut collider) = world.get::<&mut Collider>(entity) else {
                continue;
            };
            let Some(hull) = collider.hulls.get_mut(manifold.reference.hull) else {
                continue;
            };
            for contact in manifold.contacts.iter().filter(|c| c.active) {
                hull.push_convergence(ConvergenceIdentifier::from_contact(
                    contact,
                    manifold.incident.collider,
                ));
            }
        }
        trace!(
            "Recorded convergence for {} manifolds over {} bodies",
            self.manifolds.len(),
            bodies.len()
        );
    }
}

#[inline]
fn hull_transform(global: &GlobalTransform, collider: &Collider) -> Mat4 {
    if collider.offset != Vec3::ZERO {
        global.0 * Mat4::from_translation(collider.offset)
    } else {
        global.0
    }
}

/// Invalid hulls panic in debug builds; release builds log and skip them.
fn hull_is_valid(entity: hecs::Entity, index: usize, hull: &ConvexCollider) -> bool {
    let result = hull.validate();
    if let Err(err) = &result {
        error!("Skipping invalid hull {} on entity {:?}: {}", index, entity, err);
    }
    debug_assert!(
        result.is_ok(),
        "invalid hull {} on entity {:?}: {:?}",
        index,
        entity,
        result
    );
    result.is_ok()
}

/// Refresh every hull's world AABB and build one proxy per entity.
///
/// Hulls that fail validation are left out of the bounds and returned so the
/// narrowphase can skip them.
fn collect_proxies(world: &mut hecs::World) -> (Vec<BodyProxy>, InvalidHulls) {
    let mut proxies = Vec::new();
    let mut invalid = InvalidHulls::new();
    for (entity, (collider, global, rb)) in
        world.query_mut::<(&mut Collider, &GlobalTransform, Option<&RigidBody>)>()
    {
        let transform = hull_transform(global, collider);
        let mut bounds: Option<PhysicsAabb> = None;
        for (index, hull) in collider.hulls.iter_mut().enumerate() {
            if !hull_is_valid(entity, index, hull) {
                invalid.insert((entity, index));
                continue;
            }
            let aabb = hull.update_world_aabb(&transform);
            bounds = Some(bounds.map_or(aabb, |b| b.merge(&aabb)));
        }
        let Some(aabb) = bounds else {
            continue;
        };
        if !(aabb.min.is_finite() && aabb.max.is_finite()) {
            error!("Skipping entity {:?} with non-finite bounds", entity);
            continue;
        }
        proxies.push(BodyProxy {
            entity,
            aabb,
            body_type: rb.map(|rb| rb.body_type),
            is_sensor: collider.is_sensor,
        });
    }
    (proxies, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::components::transform::Transform;
    use crate::physics::broadphase::BruteForce;
    use crate::physics::collider::ConvexCollider;
    use crate::physics::collider::ColliderId;
    use crate::physics::half_edge::FeatureLabel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn spawn_box(world: &mut hecs::World, position: Vec3, half: Vec3, rb: RigidBody) -> hecs::Entity {
        let transform = Transform::from_position(position);
        world.spawn((
            transform,
            GlobalTransform::from_transform(&transform),
            rb,
            Collider::cuboid(half).unwrap(),
        ))
    }

    fn spawn_ground(world: &mut hecs::World) -> hecs::Entity {
        spawn_box(
            world,
            Vec3::new(0.0, -0.5, 0.0),
            Vec3::new(50.0, 0.5, 50.0),
            RigidBody::new_static(),
        )
    }

    fn run(physics: &mut PhysicsWorld, world: &mut hecs::World, steps: usize) {
        let mut control = SimulationControl::default();
        for _ in 0..steps {
            physics.step(world, 1.0 / 60.0, &mut control);
        }
    }

    #[derive(Default)]
    struct Counter {
        collisions: Arc<AtomicUsize>,
        triggers: Arc<AtomicUsize>,
        invalidate: bool,
    }

    impl ContactListener for Counter {
        fn on_collision(&mut self, event: &mut CollisionEvent<'_>) {
            self.collisions.fetch_add(1, Ordering::Relaxed);
            if self.invalidate {
                for manifold in event.manifolds.iter_mut() {
                    manifold.invalidate();
                }
            }
        }

        fn on_trigger(&mut self, _event: &mut TriggerEvent<'_>) {
            self.triggers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Impulses each contact carries when events fire, i.e. after seeding.
    #[derive(Default)]
    struct SeedRecorder {
        seen: Arc<Mutex<Vec<(ColliderId, ColliderId, FeatureLabel, f32, [f32; 2])>>>,
    }

    impl ContactListener for SeedRecorder {
        fn on_collision(&mut self, event: &mut CollisionEvent<'_>) {
            let Ok(mut seen) = self.seen.lock() else {
                return;
            };
            for manifold in event.manifolds.iter() {
                for contact in &manifold.contacts {
                    seen.push((
                        manifold.reference.collider,
                        manifold.incident.collider,
                        contact.label,
                        contact.normal_lambda,
                        contact.tangent_lambdas,
                    ));
                }
            }
        }
    }

    #[test]
    fn test_physics_world_free_fall() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());

        let entity = spawn_box(
            &mut world,
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::splat(0.5),
            RigidBody::new_dynamic(1.0),
        );

        // Simulate ~1 second
        run(&mut physics, &mut world, 60);

        let transform = world.get::<&Transform>(entity).unwrap();
        assert!(
            transform.position.y < 10.0,
            "Body should have fallen: y = {}",
            transform.position.y
        );
        assert!(physics.manifolds().is_empty());
    }

    #[test]
    fn test_box_comes_to_rest_on_ground() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());

        let dynamic_entity = spawn_box(
            &mut world,
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::splat(0.5),
            RigidBody::new_dynamic(1.0).with_box_inertia(Vec3::splat(0.5)),
        );
        spawn_ground(&mut world);

        // Simulate 3 seconds
        run(&mut physics, &mut world, 180);

        let transform = world.get::<&Transform>(dynamic_entity).unwrap();
        let rb = world.get::<&RigidBody>(dynamic_entity).unwrap();

        // Half the box height above the ground surface
        assert!(
            transform.position.y > 0.3 && transform.position.y < 0.7,
            "Box should rest on the ground: y = {}",
            transform.position.y
        );
        let speed = rb.linear_velocity.length();
        assert!(speed < 0.5, "Box should have settled: speed = {}", speed);
        assert!(!physics.manifolds().is_empty());
    }

    #[test]
    fn test_brute_force_broadphase_matches_grid() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::with_broadphase(PhysicsConfig::default(), Box::new(BruteForce));
        let entity = spawn_box(
            &mut world,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::splat(0.5),
            RigidBody::new_dynamic(1.0).with_box_inertia(Vec3::splat(0.5)),
        );
        spawn_ground(&mut world);

        run(&mut physics, &mut world, 120);

        let transform = world.get::<&Transform>(entity).unwrap();
        assert!(transform.position.y > 0.3, "y = {}", transform.position.y);
    }

    #[test]
    fn test_convergence_recorded_on_reference_hull() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());
        spawn_box(
            &mut world,
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::splat(0.5),
            RigidBody::new_dynamic(1.0).with_box_inertia(Vec3::splat(0.5)),
        );
        spawn_ground(&mut world);

        run(&mut physics, &mut world, 10);

        let recorded: usize = world
            .query_mut::<&Collider>()
            .into_iter()
            .map(|(_, c)| c.hulls.iter().map(|h| h.convergence().len()).sum::<usize>())
            .sum();
        assert!(recorded > 0);
    }

    #[test]
    fn test_warm_start_seeds_previous_impulses() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());
        let recorder = SeedRecorder::default();
        let seen = recorder.seen.clone();
        physics.add_listener(Box::new(recorder));

        spawn_box(
            &mut world,
            Vec3::new(0.0, 0.49, 0.0),
            Vec3::splat(0.5),
            RigidBody::new_dynamic(1.0).with_box_inertia(Vec3::splat(0.5)),
        );
        spawn_ground(&mut world);

        run(&mut physics, &mut world, 30);

        let previous: Vec<(ColliderId, ConvergenceIdentifier)> = world
            .query_mut::<&Collider>()
            .into_iter()
            .flat_map(|(_, c)| {
                c.hulls
                    .iter()
                    .flat_map(|h| h.convergence().iter().map(move |id| (h.id(), *id)))
                    .collect::<Vec<_>>()
            })
            .collect();
        assert!(!previous.is_empty());
        seen.lock().unwrap().clear();

        run(&mut physics, &mut world, 1);

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        let mut matched = 0;
        for &(reference, incident, label, normal_lambda, tangent_lambdas) in seen.iter() {
            let Some((_, stored)) = previous.iter().find(|(hull, id)| {
                *hull == reference && id.label == label && id.incident_collider == incident
            }) else {
                continue;
            };
            matched += 1;
            assert_eq!(normal_lambda, stored.normal_lambda, "label {:?}", label);
            assert_eq!(tangent_lambdas, stored.tangent_lambdas, "label {:?}", label);
        }
        assert!(matched > 0, "no contact matched a stored label");
        assert!(previous.iter().any(|(_, id)| id.normal_lambda > 0.0));
    }

    #[test]
    fn test_physics_config_default() {
        let config = PhysicsConfig::default();
        assert_eq!(config.gravity, Vec3::new(0.0, -9.81, 0.0));
        assert!((config.fixed_timestep - 1.0 / 60.0).abs() < 1e-10);
        assert_eq!(config.max_substeps, 4);
        assert_eq!(config.broadphase_cell_size, 3.0);
        assert_eq!(config.solver.contact_iterations, 8);
        assert_eq!(config.solver.friction_iterations, 4);
        assert!(config.solver.warm_starting);
        assert_eq!(config.narrowphase.contact_offset, 0.01);
    }

    #[test]
    fn test_accumulator_substeps() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());
        let mut control = SimulationControl::default();

        assert_eq!(physics.step(&mut world, 0.5 / 60.0, &mut control), 0);
        assert_eq!(physics.step(&mut world, 0.6 / 60.0, &mut control), 1);
        // Large frames are capped at max_substeps.
        assert_eq!(physics.step(&mut world, 1.0, &mut control), 4);
    }

    #[test]
    fn test_pause_and_single_step() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());
        let entity = spawn_box(
            &mut world,
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::splat(0.5),
            RigidBody::new_dynamic(1.0),
        );

        let mut control = SimulationControl {
            paused: true,
            single_step: false,
        };
        assert_eq!(physics.step(&mut world, 1.0, &mut control), 0);
        assert_eq!(world.get::<&Transform>(entity).unwrap().position.y, 10.0);

        control.single_step = true;
        assert_eq!(physics.step(&mut world, 0.0, &mut control), 1);
        assert!(!control.single_step);
        assert!(control.paused);
        assert!(world.get::<&Transform>(entity).unwrap().position.y < 10.0);

        control.paused = false;
        assert_eq!(physics.step(&mut world, 1.0 / 60.0, &mut control), 1);
    }

    #[test]
    fn test_sensor_raises_trigger_only() {
        let mut world = hecs::World::new();
        let config = PhysicsConfig {
            gravity: Vec3::ZERO,
            ..PhysicsConfig::default()
        };
        let mut physics = PhysicsWorld::new(config);
        let counter = Counter::default();
        let triggers = counter.triggers.clone();
        let collisions = counter.collisions.clone();
        physics.add_listener(Box::new(counter));

        let body = spawn_box(&mut world, Vec3::ZERO, Vec3::splat(0.5), RigidBody::new_dynamic(1.0));
        let sensor_transform = Transform::from_position(Vec3::new(0.3, 0.0, 0.0));
        world.spawn((
            sensor_transform,
            GlobalTransform::from_transform(&sensor_transform),
            Collider::cuboid(Vec3::splat(0.5)).unwrap().sensor(),
        ));

        run(&mut physics, &mut world, 5);

        assert_eq!(triggers.load(Ordering::Relaxed), 5);
        assert_eq!(collisions.load(Ordering::Relaxed), 0);
        let rb = world.get::<&RigidBody>(body).unwrap();
        assert_eq!(rb.linear_velocity, Vec3::ZERO);
        assert!(physics.manifolds().iter().all(|m| !m.is_valid()));
    }

    #[test]
    fn test_listener_can_invalidate_manifold() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());
        let counter = Counter {
            invalidate: true,
            ..Counter::default()
        };
        let collisions = counter.collisions.clone();
        physics.add_listener(Box::new(counter));

        let entity = spawn_box(
            &mut world,
            Vec3::new(0.0, 0.45, 0.0),
            Vec3::splat(0.5),
            RigidBody::new_dynamic(1.0),
        );
        spawn_ground(&mut world);

        run(&mut physics, &mut world, 120);

        assert!(collisions.load(Ordering::Relaxed) > 0);
        let y = world.get::<&Transform>(entity).unwrap().position.y;
        assert!(y < -1.0, "Box should fall through: y = {}", y);
    }

    #[test]
    fn test_compound_collider_one_manifold_per_hull() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());

        let corners = |center: Vec3| -> Vec<Vec3> {
            (0..8)
                .map(|i| {
                    center
                        + Vec3::new(
                            if i & 1 == 0 { -0.5 } else { 0.5 },
                            if i & 2 == 0 { -0.5 } else { 0.5 },
                            if i & 4 == 0 { -0.5 } else { 0.5 },
                        )
                })
                .collect()
        };
        let compound = Collider::compound(vec![
            ConvexCollider::from_points(&corners(Vec3::new(-1.0, 0.0, 0.0))).unwrap(),
            ConvexCollider::from_points(&corners(Vec3::new(1.0, 0.0, 0.0))).unwrap(),
        ]);
        let transform = Transform::from_position(Vec3::new(0.0, 0.48, 0.0));
        let body = world.spawn((
            transform,
            GlobalTransform::from_transform(&transform),
            RigidBody::new_dynamic(2.0),
            compound,
        ));
        spawn_ground(&mut world);
        let counter = Counter::default();
        let collisions = counter.collisions.clone();
        physics.add_listener(Box::new(counter));

        run(&mut physics, &mut world, 1);

        // Two hull manifolds, one event for the entity pair.
        assert_eq!(physics.manifolds().len(), 2);
        assert_eq!(collisions.load(Ordering::Relaxed), 1);
        let hulls: BTreeSet<usize> = physics
            .manifolds()
            .iter()
            .map(|m| {
                if m.reference.entity == Some(body) {
                    m.reference.hull
                } else {
                    m.incident.hull
                }
            })
            .collect();
        assert_eq!(hulls, BTreeSet::from([0, 1]));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "invalid hull"))]
    fn test_corrupted_hull_is_skipped() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());

        let mut collider = Collider::cuboid(Vec3::splat(0.5)).unwrap();
        let face = collider.hulls[0].mesh().faces().next().map(|(id, _)| id).unwrap();
        collider.hulls[0].mesh_mut().remove_face(face);
        let transform = Transform::from_position(Vec3::new(0.0, 0.45, 0.0));
        world.spawn((
            transform,
            GlobalTransform::from_transform(&transform),
            RigidBody::new_dynamic(1.0),
            collider,
        ));
        spawn_ground(&mut world);

        run(&mut physics, &mut world, 1);

        assert!(physics.manifolds().is_empty());
    }

    #[test]
    fn test_collider_offset_moves_hulls() {
        let mut world = hecs::World::new();
        let mut physics = PhysicsWorld::new(PhysicsConfig::default());

        let transform = Transform::from_position(Vec3::new(0.0, -5.0, 0.0));
        world.spawn((
            transform,
            GlobalTransform::from_transform(&transform),
            RigidBody::new_dynamic(1.0),
            Collider::cuboid(Vec3::splat(0.5))
                .unwrap()
                .with_offset(Vec3::new(0.0, 5.48, 0.0)),
        ));
        spawn_ground(&mut world);

        run(&mut physics, &mut world, 1);

        assert_eq!(physics.manifolds().len(), 1);
        assert!(physics.manifolds()[0].is_valid());
    }
}
