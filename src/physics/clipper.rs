//! Sutherland-Hodgman clipping of the incident face against the reference
//! face's side planes.

use glam::{Mat4, Vec3};

use super::collider::{normal_matrix, ConvexCollider};
use super::contact::Contact;
use super::half_edge::{FaceId, FeatureLabel};
use super::NarrowPhaseConfig;

/// A polygon vertex tagged with the features that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactVertex {
    pub position: Vec3,
    pub label: FeatureLabel,
}

/// Clip a convex polygon against the plane through `plane_point` with
/// outward normal `plane_normal`, keeping the part behind it.
///
/// Points within `threshold` of the plane count as inside and are never
/// duplicated by an intersection, so the output has at most one vertex more
/// than the input.
pub fn sutherland_hodgman(
    input: &[ContactVertex],
    plane_normal: Vec3,
    plane_point: Vec3,
    clip_label: FeatureLabel,
    threshold: f32,
) -> Vec<ContactVertex> {
    let mut output = Vec::with_capacity(input.len() + 1);
    let n = input.len();

    for i in 0..n {
        let current = input[i];
        let next = input[(i + 1) % n];
        let d_current = plane_normal.dot(current.position - plane_point);
        let d_next = plane_normal.dot(next.position - plane_point);
        let current_inside = d_current <= threshold;
        let next_inside = d_next <= threshold;

        let intersection = || {
            let t = d_current / (d_current - d_next);
            ContactVertex {
                position: current.position + (next.position - current.position) * t,
                label: FeatureLabel {
                    first: current.label.first,
                    next: clip_label.next,
                },
            }
        };

        match (current_inside, next_inside) {
            (true, true) => output.push(next),
            (false, true) => {
                if d_next < -threshold {
                    output.push(intersection());
                }
                output.push(next);
            }
            (true, false) => {
                if d_current < -threshold {
                    output.push(intersection());
                }
            }
            (false, false) => {}
        }
    }
    output
}

/// Incident face: the one whose world normal is most anti-parallel to
/// `reference_normal`.
pub fn find_incident_face(
    incident: &ConvexCollider,
    incident_transform: &Mat4,
    reference_normal: Vec3,
) -> Option<FaceId> {
    let normals = normal_matrix(incident_transform);
    incident
        .mesh()
        .faces()
        .map(|(id, face)| (id, (-reference_normal).dot((normals * face.normal).normalize_or_zero())))
        .fold(None, |best: Option<(FaceId, f32)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .map(|(id, _)| id)
}

/// Build face contacts: clip the incident face by every side plane of the
/// reference face, keep points at most `contact_offset` above the reference
/// plane, and pair each with its projection onto that plane.
pub fn clip_face_contacts(
    reference: &ConvexCollider,
    reference_transform: &Mat4,
    reference_face: FaceId,
    incident: &ConvexCollider,
    incident_transform: &Mat4,
    config: &NarrowPhaseConfig,
) -> Vec<Contact> {
    let ref_mesh = reference.mesh();
    let Some(face) = ref_mesh.face(reference_face) else {
        return Vec::new();
    };
    let ref_normals = normal_matrix(reference_transform);
    let normal = (ref_normals * face.normal).normalize_or_zero();
    let plane_point = reference_transform.transform_point3(face.centroid);

    let Some(incident_face) = find_incident_face(incident, incident_transform, normal) else {
        return Vec::new();
    };
    let inc_mesh = incident.mesh();
    let mut polygon: Vec<ContactVertex> = inc_mesh
        .face_loop(incident_face)
        .map(|e| ContactVertex {
            position: incident_transform.transform_point3(inc_mesh[e].origin),
            label: inc_mesh[e].label,
        })
        .collect();

    for e in ref_mesh.face_loop(reference_face) {
        let Some(side) = ref_mesh[e]
            .pair
            .and_then(|twin| ref_mesh.edge(twin))
            .and_then(|twin| ref_mesh.face(twin.face))
        else {
            continue;
        };
        let side_normal = (ref_normals * side.normal).normalize_or_zero();
        let side_point = reference_transform.transform_point3(ref_mesh[e].origin);
        polygon = sutherland_hodgman(
            &polygon,
            side_normal,
            side_point,
            ref_mesh[e].label,
            config.clipping_threshold,
        );
        if polygon.is_empty() {
            break;
        }
    }

    polygon
        .into_iter()
        .filter_map(|v| {
            let dist = normal.dot(v.position - plane_point);
            (dist < config.contact_offset)
                .then(|| Contact::new(v.position - normal * dist, v.position, normal, v.label))
        })
        .collect()
}
