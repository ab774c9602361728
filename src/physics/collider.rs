//! Convex hull colliders and bounding boxes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat3, Mat4, Vec3};
use tracing::warn;

use crate::error::PhysicsResult;

use super::contact::ConvergenceIdentifier;
use super::half_edge::{FeatureLabel, HalfEdgeMesh};
use super::quickhull::build_hull;

/// Axis-aligned bounding box for broadphase and middle-phase rejection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsAabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl PhysicsAabb {
    /// Test whether two AABBs overlap.
    #[inline]
    pub fn overlaps(&self, other: &PhysicsAabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Smallest box containing all points. Empty input yields a point box at
    /// the origin.
    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            return Self {
                min: Vec3::ZERO,
                max: Vec3::ZERO,
            };
        }
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for &p in points {
            min = min.min(p);
            max = max.max(p);
        }
        Self { min, max }
    }

    #[inline]
    pub fn merge(&self, other: &PhysicsAabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Bounding box of this box after an affine transform.
    #[inline]
    pub fn transformed(&self, mat: &Mat4) -> Self {
        let center = mat.transform_point3(self.center());
        let half = self.half_extents();

        // Project the local box axes onto each world axis.
        let abs_col0 = mat.x_axis.truncate().abs();
        let abs_col1 = mat.y_axis.truncate().abs();
        let abs_col2 = mat.z_axis.truncate().abs();
        let extent = abs_col0 * half.x + abs_col1 * half.y + abs_col2 * half.z;

        Self {
            min: center - extent,
            max: center + extent,
        }
    }
}

/// Matrix that maps local normals to world normals under `transform`.
#[inline]
pub(crate) fn normal_matrix(transform: &Mat4) -> Mat3 {
    Mat3::from_mat4(*transform).inverse().transpose()
}

/// Process-unique identity of a convex collider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderId(u64);

impl ColliderId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A convex polyhedron ready for collision queries.
///
/// Owns its half-edge mesh, a flat vertex list for support queries, and the
/// warm-start data recorded at the end of the previous step.
#[derive(Debug)]
pub struct ConvexCollider {
    id: ColliderId,
    mesh: HalfEdgeMesh,
    vertices: Vec<Vec3>,
    local_centroid: Vec3,
    local_aabb: PhysicsAabb,
    world_aabb: PhysicsAabb,
    convergence: Vec<ConvergenceIdentifier>,
}

/// Clones get a fresh identity and no warm-start history.
impl Clone for ConvexCollider {
    fn clone(&self) -> Self {
        Self {
            id: ColliderId::next(),
            mesh: self.mesh.clone(),
            vertices: self.vertices.clone(),
            local_centroid: self.local_centroid,
            local_aabb: self.local_aabb,
            world_aabb: self.world_aabb,
            convergence: Vec::new(),
        }
    }
}

impl ConvexCollider {
    /// Build the convex hull of `points` and wrap it as a collider.
    pub fn from_points(points: &[Vec3]) -> PhysicsResult<Self> {
        Self::from_mesh(build_hull(points)?)
    }

    /// Axis-aligned box centred on the local origin.
    pub fn new_box(half_extents: Vec3) -> PhysicsResult<Self> {
        let h = half_extents;
        let corners: Vec<Vec3> = (0..8)
            .map(|i| {
                Vec3::new(
                    if i & 1 == 0 { -h.x } else { h.x },
                    if i & 2 == 0 { -h.y } else { h.y },
                    if i & 4 == 0 { -h.z } else { h.z },
                )
            })
            .collect();
        Self::from_points(&corners)
    }

    /// Wrap an already closed mesh.
    ///
    /// Edge directions are replaced by the robust face-normal cross products
    /// and every edge origin is snapped onto its own face plane.
    pub fn from_mesh(mesh: HalfEdgeMesh) -> PhysicsResult<Self> {
        let (mesh, vertices) = finalize_mesh(mesh)?;
        let local_aabb = PhysicsAabb::from_points(&vertices);
        Ok(Self {
            id: ColliderId::next(),
            local_centroid: centroid_of(&vertices),
            mesh,
            vertices,
            local_aabb,
            world_aabb: local_aabb,
            convergence: Vec::new(),
        })
    }

    /// Rebuild the hull from a new point set.
    ///
    /// On failure the previous hull is kept and the error is returned.
    pub fn rehull(&mut self, points: &[Vec3]) -> PhysicsResult<()> {
        let rebuilt = build_hull(points).and_then(finalize_mesh);
        match rebuilt {
            Ok((mesh, vertices)) => {
                self.local_aabb = PhysicsAabb::from_points(&vertices);
                self.local_centroid = centroid_of(&vertices);
                self.mesh = mesh;
                self.vertices = vertices;
                self.world_aabb = self.local_aabb;
                // Labels from the old hull mean nothing now.
                self.convergence.clear();
                Ok(())
            }
            Err(err) => {
                warn!("Re-hull of collider {:?} failed, keeping previous hull: {}", self.id, err);
                Err(err)
            }
        }
    }

    #[inline]
    pub fn id(&self) -> ColliderId {
        self.id
    }

    #[inline]
    pub fn mesh(&self) -> &HalfEdgeMesh {
        &self.mesh
    }

    #[cfg(test)]
    pub(crate) fn mesh_mut(&mut self) -> &mut HalfEdgeMesh {
        &mut self.mesh
    }

    /// Re-check the half-edge links of the hull.
    pub fn validate(&self) -> PhysicsResult<()> {
        self.mesh.assert_edge_validity()
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    #[inline]
    pub fn local_centroid(&self) -> Vec3 {
        self.local_centroid
    }

    #[inline]
    pub fn local_aabb(&self) -> PhysicsAabb {
        self.local_aabb
    }

    /// World AABB as of the last [`update_world_aabb`](Self::update_world_aabb).
    #[inline]
    pub fn world_aabb(&self) -> PhysicsAabb {
        self.world_aabb
    }

    #[inline]
    pub fn compute_world_aabb(&self, transform: &Mat4) -> PhysicsAabb {
        self.local_aabb.transformed(transform)
    }

    pub fn update_world_aabb(&mut self, transform: &Mat4) -> PhysicsAabb {
        self.world_aabb = self.compute_world_aabb(transform);
        self.world_aabb
    }

    /// Furthest local vertex along a local direction.
    #[inline]
    pub fn support_point(&self, direction: Vec3) -> Vec3 {
        let mut best = self.local_centroid;
        let mut best_dot = f32::MIN;
        for &v in &self.vertices {
            let d = v.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = v;
            }
        }
        best
    }

    /// Furthest world-space vertex along a world direction.
    #[inline]
    pub fn world_support(&self, transform: &Mat4, direction: Vec3) -> Vec3 {
        let local_dir = transform.inverse().transform_vector3(direction);
        transform.transform_point3(self.support_point(local_dir))
    }

    pub fn convergence(&self) -> &[ConvergenceIdentifier] {
        &self.convergence
    }

    pub fn clear_convergence(&mut self) {
        self.convergence.clear();
    }

    pub fn push_convergence(&mut self, identifier: ConvergenceIdentifier) {
        self.convergence.push(identifier);
    }

    /// Warm-start record for a contact label against a given incident collider.
    pub fn find_convergence(
        &self,
        label: FeatureLabel,
        incident: ColliderId,
    ) -> Option<&ConvergenceIdentifier> {
        self.convergence
            .iter()
            .find(|c| c.label == label && c.incident_collider == incident)
    }
}

fn centroid_of(points: &[Vec3]) -> Vec3 {
    if points.is_empty() {
        return Vec3::ZERO;
    }
    points.iter().copied().sum::<Vec3>() / points.len() as f32
}

fn finalize_mesh(mut mesh: HalfEdgeMesh) -> PhysicsResult<(HalfEdgeMesh, Vec<Vec3>)> {
    mesh.assert_edge_validity()?;

    let mut seen = HashSet::new();
    let vertices: Vec<Vec3> = mesh
        .edges()
        .map(|(_, e)| e.origin)
        .filter(|p| seen.insert([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]))
        .collect();

    mesh.compute_robust_directions();

    let snapped: Vec<_> = mesh
        .edges()
        .map(|(id, e)| {
            let face = &mesh[e.face];
            let dist = face.normal.dot(e.origin - face.centroid);
            (id, e.origin - face.normal * dist)
        })
        .collect();
    for (id, origin) in snapped {
        mesh[id].origin = origin;
    }

    Ok((mesh, vertices))
}
