//! Separating-axis tests for convex hulls.
//!
//! Face normals of either hull and cross products of edge pairs that form a
//! Minkowski face are the only candidate axes. Any positive separation proves
//! the hulls disjoint and ends the query early.

use glam::{Mat3, Mat4, Vec3};

use super::collider::{normal_matrix, ConvexCollider};
use super::half_edge::{EdgeId, FaceId};
use super::NarrowPhaseConfig;

/// Best face axis of the querying hull.
#[derive(Debug, Clone, Copy)]
pub struct FaceQuery {
    pub face: FaceId,
    /// World-space face normal.
    pub axis: Vec3,
    pub separation: f32,
}

/// Best edge-pair axis.
#[derive(Debug, Clone, Copy)]
pub struct EdgeQuery {
    pub edge_a: EdgeId,
    pub edge_b: EdgeId,
    /// Unit axis oriented away from hull A.
    pub axis: Vec3,
    pub separation: f32,
}

/// Feature that defines the contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionFeature {
    Face { reference_face: FaceId },
    Edge { reference_edge: EdgeId, incident_edge: EdgeId },
}

/// Outcome of a positive SAT test.
#[derive(Debug, Clone, Copy)]
pub struct PenetrationQuery {
    pub feature: CollisionFeature,
    /// Hull A is the reference body.
    pub reference_is_a: bool,
    /// World normal pointing from the reference hull into the incident hull.
    pub normal: Vec3,
    /// Non-positive; its magnitude is the penetration depth.
    pub separation: f32,
}

/// Test every face of `reference` as a separating plane against `other`.
pub fn query_face_directions(
    reference: &ConvexCollider,
    reference_transform: &Mat4,
    other: &ConvexCollider,
    other_transform: &Mat4,
) -> FaceQuery {
    let normals = normal_matrix(reference_transform);
    let other_inverse = other_transform.inverse();
    let mut best = FaceQuery {
        face: FaceId::DANGLING,
        axis: Vec3::ZERO,
        separation: f32::MIN,
    };

    for (id, face) in reference.mesh().faces() {
        let axis = (normals * face.normal).normalize_or_zero();
        let position = reference_transform.transform_point3(face.centroid);
        let local_dir = other_inverse.transform_vector3(-axis);
        let support = other_transform.transform_point3(other.support_point(local_dir));
        let separation = (support - position).dot(axis);

        if separation > best.separation {
            best = FaceQuery {
                face: id,
                axis,
                separation,
            };
            if separation > 0.0 {
                return best;
            }
        }
    }
    best
}

/// Arcs `a-b` and `-c,-d` cross on the Gauss map.
///
/// `dir_a = a x b` and `dir_b = c x d` are the robust edge directions.
#[inline]
pub fn is_minkowski_face(a: Vec3, b: Vec3, dir_a: Vec3, c: Vec3, d: Vec3, dir_b: Vec3) -> bool {
    let cba = c.dot(dir_a);
    let dba = d.dot(dir_a);
    let adc = a.dot(dir_b);
    let bdc = b.dot(dir_b);
    cba * dba < 0.0 && adc * bdc < 0.0 && cba * bdc < 0.0
}

struct WorldEdge {
    id: EdgeId,
    start: Vec3,
    direction: Vec3,
    normal: Vec3,
    twin_normal: Vec3,
}

fn world_edges(hull: &ConvexCollider, transform: &Mat4, normals: &Mat3) -> Vec<WorldEdge> {
    let mesh = hull.mesh();
    mesh.edges()
        .filter_map(|(id, edge)| {
            debug_assert!(edge.pair.is_some(), "{id:?} has no twin");
            let twin = edge.pair?;
            // One half-edge per undirected edge.
            if twin < id {
                return None;
            }
            let normal = (*normals * mesh.face(edge.face)?.normal).normalize_or_zero();
            let twin_normal =
                (*normals * mesh.face(mesh.edge(twin)?.face)?.normal).normalize_or_zero();
            let direction = normal.cross(twin_normal);
            (direction.length_squared() > 1e-12).then(|| WorldEdge {
                id,
                start: transform.transform_point3(edge.origin),
                direction: direction.normalize(),
                normal,
                twin_normal,
            })
        })
        .collect()
}

/// Test cross products of edge pairs that form Minkowski faces.
///
/// Returns `None` when no edge pair qualifies. That is not a separation.
pub fn query_edge_directions(
    a: &ConvexCollider,
    transform_a: &Mat4,
    b: &ConvexCollider,
    transform_b: &Mat4,
    parallel_threshold: f32,
) -> Option<EdgeQuery> {
    let edges_a = world_edges(a, transform_a, &normal_matrix(transform_a));
    let edges_b = world_edges(b, transform_b, &normal_matrix(transform_b));
    let centroid_a = transform_a.transform_point3(a.local_centroid());
    let mut best: Option<EdgeQuery> = None;

    for ea in &edges_a {
        for eb in &edges_b {
            if ea.direction.dot(eb.direction).abs() > 1.0 - parallel_threshold {
                continue;
            }
            if !is_minkowski_face(
                ea.normal,
                ea.twin_normal,
                ea.direction,
                eb.normal,
                eb.twin_normal,
                eb.direction,
            ) {
                continue;
            }

            let mut axis = ea.direction.cross(eb.direction).normalize();
            if axis.dot(ea.start - centroid_a) < 0.0 {
                axis = -axis;
            }
            let separation = axis.dot(eb.start - ea.start);

            if best.map_or(true, |q| separation > q.separation) {
                best = Some(EdgeQuery {
                    edge_a: ea.id,
                    edge_b: eb.id,
                    axis,
                    separation,
                });
                if separation > 0.0 {
                    return best;
                }
            }
        }
    }
    best
}

/// Full SAT decision. `None` means the hulls are disjoint.
///
/// Face contacts are preferred: hull B becomes the reference only when its
/// face separation beats A's by `face_to_face_penetration_bias`, and an edge
/// contact wins only when it beats the chosen face by
/// `face_to_edge_penetration_bias`.
pub fn find_penetration(
    a: &ConvexCollider,
    transform_a: &Mat4,
    b: &ConvexCollider,
    transform_b: &Mat4,
    config: &NarrowPhaseConfig,
) -> Option<PenetrationQuery> {
    let face_ab = query_face_directions(a, transform_a, b, transform_b);
    if face_ab.separation > 0.0 {
        return None;
    }
    let face_ba = query_face_directions(b, transform_b, a, transform_a);
    if face_ba.separation > 0.0 {
        return None;
    }
    let edge = query_edge_directions(a, transform_a, b, transform_b, config.gauss_map_edge_threshold);
    if edge.is_some_and(|e| e.separation > 0.0) {
        return None;
    }

    let (face, reference_is_a) =
        if face_ab.separation + config.face_to_face_penetration_bias > face_ba.separation {
            (face_ab, true)
        } else {
            (face_ba, false)
        };

    if let Some(e) = edge {
        if e.separation > face.separation + config.face_to_edge_penetration_bias {
            return Some(PenetrationQuery {
                feature: CollisionFeature::Edge {
                    reference_edge: e.edge_a,
                    incident_edge: e.edge_b,
                },
                reference_is_a: true,
                normal: e.axis,
                separation: e.separation,
            });
        }
    }

    Some(PenetrationQuery {
        feature: CollisionFeature::Face {
            reference_face: face.face,
        },
        reference_is_a,
        normal: face.axis,
        separation: face.separation,
    })
}
