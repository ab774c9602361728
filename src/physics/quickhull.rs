//! Quickhull convex hull construction.
//!
//! Points are merged into an initial tetrahedron one at a time, always taking
//! the point furthest outside the current hull. Each merge removes the faces
//! the point can see, fans new triangles from the horizon to the point, and
//! then merges new faces with neighbours that are coplanar or concave.

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec3;
use tracing::debug;

use crate::error::{PhysicsError, PhysicsResult};

use super::half_edge::{newell_plane, EdgeId, FaceId, HalfEdgeMesh};

/// Size-scaled tolerances for one point set.
#[derive(Debug, Clone, Copy)]
pub struct HullEpsilons {
    /// Planarity and visibility-region tolerance.
    pub scaled: f32,
    /// A point must be further than this outside a face to join the hull.
    pub visibility: f32,
}

impl HullEpsilons {
    pub fn from_points(points: &[Vec3]) -> Self {
        let max_abs = points.iter().fold(Vec3::ZERO, |m, p| m.max(p.abs()));
        let dimension_sum = 3.0 * (max_abs.x + max_abs.y + max_abs.z);
        let scaled = dimension_sum * f32::EPSILON.sqrt();
        Self {
            scaled,
            visibility: 2.0 * scaled,
        }
    }
}

type OutsideSets = BTreeMap<FaceId, Vec<Vec3>>;

/// Build the convex hull of an unordered point set.
///
/// Fails with [`PhysicsError::DegenerateInput`] for fewer than four points or
/// collinear/coplanar input, and with [`PhysicsError::HorizonWalkExceeded`]
/// if an intermediate hull is corrupted.
pub fn build_hull(points: &[Vec3]) -> PhysicsResult<HalfEdgeMesh> {
    if points.len() < 4 {
        return Err(PhysicsError::DegenerateInput(format!(
            "hull needs at least 4 points, got {}",
            points.len()
        )));
    }
    if points.iter().any(|p| !p.is_finite()) {
        return Err(PhysicsError::DegenerateInput(
            "hull input contains non-finite points".into(),
        ));
    }

    let eps = HullEpsilons::from_points(points);
    let [a, b, c, d] = initial_simplex(points, &eps)?;
    let mut mesh = HalfEdgeMesh::from_polygons(&[
        vec![a, b, c],
        vec![b, a, d],
        vec![c, b, d],
        vec![a, c, d],
    ])?;

    let mut outside = OutsideSets::new();
    let all_faces: Vec<FaceId> = mesh.faces().map(|(id, _)| id).collect();
    for &p in points {
        assign_to_face(&mesh, &mut outside, p, &all_faces);
    }

    // Every merge consumes its eye point.
    for _ in 0..points.len() {
        let Some((face, index, distance)) = furthest_outside_point(&mesh, &outside) else {
            break;
        };
        if distance <= eps.visibility {
            break;
        }
        let eye = match outside.get_mut(&face) {
            Some(set) => set.swap_remove(index),
            None => break,
        };
        add_point(&mut mesh, &mut outside, eye, face, &eps)?;
    }

    mesh.assert_edge_validity()?;
    debug!(
        "Built convex hull from {} points: {} faces, {} half-edges",
        points.len(),
        mesh.face_count(),
        mesh.edge_count()
    );
    Ok(mesh)
}

/// Pick the four seed points of the initial tetrahedron, oriented so that
/// `[a, b, c]` is counter-clockwise seen from outside and `d` lies behind it.
fn initial_simplex(points: &[Vec3], eps: &HullEpsilons) -> PhysicsResult<[Vec3; 4]> {
    let mut extremes = [points[0]; 6];
    for &p in points {
        for axis in 0..3 {
            if p[axis] < extremes[axis * 2][axis] {
                extremes[axis * 2] = p;
            }
            if p[axis] > extremes[axis * 2 + 1][axis] {
                extremes[axis * 2 + 1] = p;
            }
        }
    }

    let mut best = (extremes[0], extremes[1], -1.0_f32);
    for i in 0..extremes.len() {
        for j in (i + 1)..extremes.len() {
            let dist = extremes[i].distance_squared(extremes[j]);
            if dist > best.2 {
                best = (extremes[i], extremes[j], dist);
            }
        }
    }
    let (a, b, span) = best;
    if span.sqrt() <= eps.scaled {
        return Err(PhysicsError::DegenerateInput(
            "all points coincide".into(),
        ));
    }

    let line = (b - a).normalize();
    let (c, line_dist) = points
        .iter()
        .map(|&p| {
            let offset = p - a;
            (p, (offset - line * offset.dot(line)).length())
        })
        .fold((a, 0.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
    if line_dist <= eps.scaled {
        return Err(PhysicsError::DegenerateInput("points are collinear".into()));
    }

    let normal = (b - a).cross(c - a).normalize();
    let (d, plane_dist) = points
        .iter()
        .map(|&p| (p, (p - a).dot(normal)))
        .fold((a, 0.0_f32), |acc, cur| {
            if cur.1.abs() > acc.1.abs() {
                cur
            } else {
                acc
            }
        });
    if plane_dist.abs() <= eps.scaled {
        return Err(PhysicsError::DegenerateInput("points are coplanar".into()));
    }

    if plane_dist > 0.0 {
        Ok([a, c, b, d])
    } else {
        Ok([a, b, c, d])
    }
}

/// Put a point into the outside set of the face it is furthest in front of.
/// Points behind every candidate face are dropped.
fn assign_to_face(mesh: &HalfEdgeMesh, outside: &mut OutsideSets, point: Vec3, faces: &[FaceId]) {
    let mut best: Option<(FaceId, f32)> = None;
    for &face in faces {
        if !mesh.contains_face(face) {
            continue;
        }
        let dist = mesh.distance_to_face(face, point);
        if dist > 0.0 && best.map_or(true, |(_, d)| dist > d) {
            best = Some((face, dist));
        }
    }
    if let Some((face, _)) = best {
        outside.entry(face).or_default().push(point);
    }
}

fn furthest_outside_point(mesh: &HalfEdgeMesh, outside: &OutsideSets) -> Option<(FaceId, usize, f32)> {
    let mut best: Option<(FaceId, usize, f32)> = None;
    for (&face, set) in outside {
        if !mesh.contains_face(face) {
            continue;
        }
        for (index, &p) in set.iter().enumerate() {
            let dist = mesh.distance_to_face(face, p);
            if best.map_or(true, |(_, _, d)| dist > d) {
                best = Some((face, index, dist));
            }
        }
    }
    best
}

/// Faces that can see `eye`, grown from `seed` across edges.
fn visible_faces(mesh: &HalfEdgeMesh, eye: Vec3, seed: FaceId, eps: &HullEpsilons) -> BTreeSet<FaceId> {
    let mut visible = BTreeSet::from([seed]);
    let mut stack = vec![seed];
    while let Some(face) = stack.pop() {
        for e in mesh.face_loop(face) {
            let Some(neighbor) = mesh[e].pair.and_then(|p| mesh.edge(p)).map(|t| t.face) else {
                continue;
            };
            if !visible.contains(&neighbor) && mesh.distance_to_face(neighbor, eye) > eps.scaled {
                visible.insert(neighbor);
                stack.push(neighbor);
            }
        }
    }
    visible
}

/// Walk the boundary of the visible region as an ordered, closed edge loop.
///
/// Returned edges lie on visible faces; their twins lie on hidden faces. The
/// walk rotates around each horizon vertex by jumping across twins, and gives
/// up with [`PhysicsError::HorizonWalkExceeded`] after `limit` steps.
pub fn find_horizon(
    mesh: &HalfEdgeMesh,
    visible: &BTreeSet<FaceId>,
    limit: usize,
) -> PhysicsResult<Vec<EdgeId>> {
    let is_horizon = |e: EdgeId| -> PhysicsResult<bool> {
        let twin = mesh.pair_of(e)?;
        Ok(!visible.contains(&mesh[twin].face))
    };
    let next_of = |e: EdgeId| -> PhysicsResult<EdgeId> {
        mesh.edge(e)
            .map(|edge| edge.next)
            .filter(|&n| mesh.edge(n).is_some())
            .ok_or_else(|| PhysicsError::InvalidMesh(format!("{e:?} has no next edge")))
    };

    let start = visible
        .iter()
        .flat_map(|&face| mesh.face_loop(face))
        .find(|&e| matches!(is_horizon(e), Ok(true)))
        .ok_or_else(|| PhysicsError::InvalidMesh("visible region has no horizon".into()))?;

    let mut horizon = vec![start];
    let mut current = start;
    let mut steps = 0;
    loop {
        let mut candidate = next_of(current)?;
        loop {
            steps += 1;
            if steps > limit {
                return Err(PhysicsError::HorizonWalkExceeded { limit });
            }
            if is_horizon(candidate)? {
                break;
            }
            candidate = next_of(mesh.pair_of(candidate)?)?;
        }
        if candidate == start {
            return Ok(horizon);
        }
        horizon.push(candidate);
        current = candidate;
    }
}

fn add_point(
    mesh: &mut HalfEdgeMesh,
    outside: &mut OutsideSets,
    eye: Vec3,
    conflict: FaceId,
    eps: &HullEpsilons,
) -> PhysicsResult<()> {
    let visible = visible_faces(mesh, eye, conflict, eps);
    let horizon = find_horizon(mesh, &visible, 2 * mesh.edge_count() + 8)?;

    let mut orphans: Vec<Vec3> = visible
        .iter()
        .filter_map(|face| outside.remove(face))
        .flatten()
        .collect();

    // Fan of triangles from the horizon to the eye; base edges take over the
    // hidden twins of the horizon edges.
    let mut new_faces = Vec::with_capacity(horizon.len());
    let mut sides = Vec::with_capacity(horizon.len());
    for &h in &horizon {
        let hidden_twin = mesh.pair_of(h)?;
        let from = mesh[h].origin;
        let to = mesh[mesh[h].next].origin;
        let face = mesh.add_face(&[from, to, eye])?;
        let base = mesh[face].start;
        let to_eye = mesh[base].next;
        let from_eye = mesh[to_eye].next;
        mesh.pair(base, hidden_twin);
        new_faces.push(face);
        sides.push((to_eye, from_eye));
    }
    for i in 0..sides.len() {
        let (to_eye, _) = sides[i];
        let (_, from_eye) = sides[(i + 1) % sides.len()];
        mesh.pair(to_eye, from_eye);
    }
    for &face in &visible {
        mesh.remove_face(face);
    }

    merge_new_faces(mesh, &new_faces, outside, &mut orphans, eps)?;

    let faces: Vec<FaceId> = mesh.faces().map(|(id, _)| id).collect();
    for p in orphans {
        assign_to_face(mesh, outside, p, &faces);
    }
    Ok(())
}

fn merge_new_faces(
    mesh: &mut HalfEdgeMesh,
    new_faces: &[FaceId],
    outside: &mut OutsideSets,
    orphans: &mut Vec<Vec3>,
    eps: &HullEpsilons,
) -> PhysicsResult<()> {
    for &face in new_faces {
        // Each merge removes at least one face, so this terminates.
        while mesh.contains_face(face) {
            let Some(edge) = mesh.face_loop(face).find(|&e| should_merge(mesh, e, eps)) else {
                break;
            };
            let outcome = mesh.merge_across_edge(edge)?;
            for removed in outcome.removed {
                if let Some(points) = outside.remove(&removed) {
                    orphans.extend(points);
                }
            }
        }
    }
    Ok(())
}

fn should_merge(mesh: &HalfEdgeMesh, edge: EdgeId, eps: &HullEpsilons) -> bool {
    let Some(twin) = mesh[edge].pair.filter(|&t| mesh.edge(t).is_some()) else {
        return false;
    };
    let first = mesh[edge].face;
    let second = mesh[twin].face;
    faces_concave(mesh, first, second)
        || faces_concave(mesh, second, first)
        || faces_coplanar(mesh, edge, twin, eps)
}

/// `second` lies in front of `first`'s plane.
fn faces_concave(mesh: &HalfEdgeMesh, first: FaceId, second: FaceId) -> bool {
    let f = &mesh[first];
    f.normal.dot(mesh[second].centroid - f.centroid) > 0.0
}

/// The polygon formed by merging across `edge` is planar within tolerance.
fn faces_coplanar(mesh: &HalfEdgeMesh, edge: EdgeId, twin: EdgeId, eps: &HullEpsilons) -> bool {
    let mut merged: Vec<Vec3> = Vec::new();
    let mut e = mesh[edge].next;
    loop {
        merged.push(mesh[e].origin);
        if e == edge {
            break;
        }
        e = mesh[e].next;
    }
    let mut e = mesh[mesh[twin].next].next;
    while e != twin {
        merged.push(mesh[e].origin);
        e = mesh[e].next;
    }

    // `scaled` already grows linearly with the input extent.
    let plane = newell_plane(&merged);
    merged
        .iter()
        .all(|p| (plane.normal.dot(*p) - plane.distance).abs() < eps.scaled)
}
