//! Broadphase candidate grouping.
//!
//! A [`BroadPhase`] only groups proxies that might touch. The orchestrator
//! expands each group into pairs, removes duplicates, and applies
//! [`classify_pair`].

use std::collections::HashMap;

use glam::Vec3;

use crate::ecs::components::physics::RigidBodyType;

use super::collider::PhysicsAabb;

/// One collider entity as seen by the broadphase.
#[derive(Debug, Clone, Copy)]
pub struct BodyProxy {
    pub entity: hecs::Entity,
    /// Union of the world AABBs of every hull on the entity.
    pub aabb: PhysicsAabb,
    /// `None` when the entity has a collider but no rigid body.
    pub body_type: Option<RigidBodyType>,
    pub is_sensor: bool,
}

/// Strategy that groups proxies into candidate sets.
pub trait BroadPhase: Send {
    /// Return groups of proxy indices; every pair inside a group is a
    /// candidate. Groups may overlap.
    fn collect_pairs(&mut self, proxies: &[BodyProxy]) -> Vec<Vec<usize>>;
}

/// Every proxy in a single group.
#[derive(Debug, Default, Clone, Copy)]
pub struct BruteForce;

impl BroadPhase for BruteForce {
    fn collect_pairs(&mut self, proxies: &[BodyProxy]) -> Vec<Vec<usize>> {
        if proxies.len() < 2 {
            return Vec::new();
        }
        vec![(0..proxies.len()).collect()]
    }
}

type CellKey = (i32, i32, i32);

/// Uniform spatial hash grid. Each occupied cell with two or more proxies
/// becomes a group.
#[derive(Debug)]
pub struct SpatialHashGrid {
    cell_size: f32,
    cells: HashMap<CellKey, Vec<usize>>,
}

impl Default for SpatialHashGrid {
    fn default() -> Self {
        Self::new(3.0)
    }
}

impl SpatialHashGrid {
    /// Non-positive sizes fall back to 1.0.
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { 1.0 },
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Compute cell coordinates for a point.
    #[inline]
    fn cell_coords(&self, point: Vec3) -> CellKey {
        let inv = 1.0 / self.cell_size;
        (
            (point.x * inv).floor() as i32,
            (point.y * inv).floor() as i32,
            (point.z * inv).floor() as i32,
        )
    }
}

impl BroadPhase for SpatialHashGrid {
    fn collect_pairs(&mut self, proxies: &[BodyProxy]) -> Vec<Vec<usize>> {
        self.cells.clear();

        for (index, proxy) in proxies.iter().enumerate() {
            let min_cell = self.cell_coords(proxy.aabb.min);
            let max_cell = self.cell_coords(proxy.aabb.max);

            for cx in min_cell.0..=max_cell.0 {
                for cy in min_cell.1..=max_cell.1 {
                    for cz in min_cell.2..=max_cell.2 {
                        self.cells.entry((cx, cy, cz)).or_default().push(index);
                    }
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = self
            .cells
            .values()
            .filter(|cell| cell.len() >= 2)
            .cloned()
            .collect();
        // HashMap order is unspecified; keep the step deterministic.
        groups.sort();
        groups
    }
}

/// What the step does with a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairAction {
    Skip,
    /// Exactly one side is a sensor: raise a trigger event, never solve.
    Trigger,
    /// Raise a collision event; feed the solver when `solve` is set.
    Collide { solve: bool },
}

/// Filter rules for a candidate pair.
pub fn classify_pair(a: &BodyProxy, b: &BodyProxy) -> PairAction {
    match (a.is_sensor, b.is_sensor) {
        (true, true) => return PairAction::Skip,
        (true, false) | (false, true) => return PairAction::Trigger,
        (false, false) => {}
    }
    if a.body_type.is_none() && b.body_type.is_none() {
        return PairAction::Skip;
    }
    let dynamic = |p: &BodyProxy| p.body_type == Some(RigidBodyType::Dynamic);
    PairAction::Collide {
        solve: dynamic(a) || dynamic(b),
    }
}
