//! Narrowphase collision detection between convex hulls.
//!
//! A pair first passes the transformed-AABB middle phase, then the SAT test
//! in [`super::sat`]. Face results are clipped into a multi-point manifold;
//! edge results produce one contact between the closest points of the two
//! edges.

use glam::{Mat4, Vec3};
use tracing::trace;

use super::clipper::clip_face_contacts;
use super::collider::ConvexCollider;
use super::contact::{Contact, Manifold, ManifoldSide};
use super::half_edge::{EdgeId, FeatureLabel};
use super::sat::{find_penetration, CollisionFeature};
use super::NarrowPhaseConfig;

/// Closest points between segments `p1-q1` and `p2-q2`.
///
/// Returns the point on the first segment and the point on the second.
pub fn closest_points_between_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);
    let eps = 1e-12;

    if a <= eps && e <= eps {
        return (p1, p2);
    }

    let (s, t) = if a <= eps {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= eps {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom != 0.0 {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    (p1 + d1 * s, p2 + d2 * t)
}

fn world_segment(hull: &ConvexCollider, transform: &Mat4, edge: EdgeId) -> Option<(Vec3, Vec3, FeatureLabel)> {
    let mesh = hull.mesh();
    let he = mesh.edge(edge)?;
    let end = mesh.edge(he.next)?.origin;
    Some((
        transform.transform_point3(he.origin),
        transform.transform_point3(end),
        he.label,
    ))
}

fn edge_contact(
    reference: &ConvexCollider,
    reference_transform: &Mat4,
    reference_edge: EdgeId,
    incident: &ConvexCollider,
    incident_transform: &Mat4,
    incident_edge: EdgeId,
    normal: Vec3,
) -> Option<Contact> {
    let (p1, q1, label_a) = world_segment(reference, reference_transform, reference_edge)?;
    let (p2, q2, label_b) = world_segment(incident, incident_transform, incident_edge)?;
    let (on_reference, on_incident) = closest_points_between_segments(p1, q1, p2, q2);
    let label = FeatureLabel {
        first: label_a.first,
        next: label_b.next,
    };
    Some(Contact::new(on_reference, on_incident, normal, label))
}

/// Full collision test between two hulls.
///
/// Returns `None` when the world AABBs miss, when SAT finds a separating
/// axis, or when clipping leaves no contact. The returned manifold's
/// reference side is whichever hull owns the chosen reference feature.
pub fn test_collision(
    a: &ConvexCollider,
    transform_a: &Mat4,
    b: &ConvexCollider,
    transform_b: &Mat4,
    config: &NarrowPhaseConfig,
) -> Option<Manifold> {
    let aabb_a = a.local_aabb().transformed(transform_a);
    let aabb_b = b.local_aabb().transformed(transform_b);
    if !aabb_a.overlaps(&aabb_b) {
        return None;
    }

    let query = find_penetration(a, transform_a, b, transform_b, config)?;
    let ((reference, t_ref), (incident, t_inc)) = if query.reference_is_a {
        ((a, transform_a), (b, transform_b))
    } else {
        ((b, transform_b), (a, transform_a))
    };

    let contacts = match query.feature {
        CollisionFeature::Face { reference_face } => {
            clip_face_contacts(reference, t_ref, reference_face, incident, t_inc, config)
        }
        CollisionFeature::Edge {
            reference_edge,
            incident_edge,
        } => edge_contact(
            reference,
            t_ref,
            reference_edge,
            incident,
            t_inc,
            incident_edge,
            query.normal,
        )
        .into_iter()
        .collect(),
    };

    if contacts.is_empty() {
        trace!(
            "SAT overlap between {:?} and {:?} produced no contacts",
            a.id(),
            b.id()
        );
        return None;
    }

    trace!(
        "{:?} vs {:?}: {} contacts, depth {}",
        reference.id(),
        incident.id(),
        contacts.len(),
        -query.separation
    );

    Some(Manifold::new(
        ManifoldSide::new(reference.id(), *t_ref),
        ManifoldSide::new(incident.id(), *t_inc),
        query,
        contacts,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn unit_cube() -> ConvexCollider {
        ConvexCollider::new_box(Vec3::splat(0.5)).unwrap()
    }

    #[test]
    fn test_overlapping_cubes_manifold() {
        let a = unit_cube();
        let b = unit_cube();
        let ta = Mat4::IDENTITY;
        let tb = Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0));

        let manifold = test_collision(&a, &ta, &b, &tb, &NarrowPhaseConfig::default()).unwrap();
        let eps = 1e-5;
        assert!(
            (manifold.penetration_depth() - 0.5).abs() < eps,
            "depth = {}",
            manifold.penetration_depth()
        );
        assert!((manifold.normal().abs() - Vec3::X).length() < eps);
        assert_eq!(manifold.contacts.len(), 4);
        assert_eq!(manifold.reference.collider, a.id());
        assert_eq!(manifold.incident.collider, b.id());
        for c in &manifold.contacts {
            assert!(c.separation() < 0.0);
        }
    }

    #[test]
    fn test_separated_cubes_no_manifold() {
        let a = unit_cube();
        let b = unit_cube();
        let tb = Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0));
        assert!(test_collision(&a, &Mat4::IDENTITY, &b, &tb, &NarrowPhaseConfig::default()).is_none());
    }

    #[test]
    fn test_box_resting_on_ground() {
        let small = unit_cube();
        let ground = ConvexCollider::new_box(Vec3::new(5.0, 0.5, 5.0)).unwrap();
        let t_small = Mat4::from_translation(Vec3::new(0.0, 0.95, 0.0));

        let manifold = test_collision(
            &small,
            &t_small,
            &ground,
            &Mat4::IDENTITY,
            &NarrowPhaseConfig::default(),
        )
        .unwrap();
        assert!((manifold.penetration_depth() - 0.05).abs() < 1e-4);
        assert_eq!(manifold.contacts.len(), 4);
        for c in &manifold.contacts {
            // Normal always points from reference into incident.
            let incident_center = manifold.incident.transform.transform_point3(Vec3::ZERO);
            let reference_center = manifold.reference.transform.transform_point3(Vec3::ZERO);
            assert!(c.normal.dot(incident_center - reference_center) > 0.0);
        }
    }

    #[test]
    fn test_crossed_edges_single_contact() {
        let a = unit_cube();
        let b = unit_cube();
        let half_diag = 0.5 * 2.0_f32.sqrt();
        let ta = Mat4::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_4));
        let tb = Mat4::from_rotation_translation(
            Quat::from_rotation_x(std::f32::consts::FRAC_PI_4),
            Vec3::new(0.0, 2.0 * half_diag - 0.05, 0.0),
        );

        let manifold = test_collision(&a, &ta, &b, &tb, &NarrowPhaseConfig::default()).unwrap();
        assert_eq!(manifold.contacts.len(), 1);
        let c = manifold.contacts[0];
        assert!((c.separation() + 0.05).abs() < 1e-4, "separation = {}", c.separation());
        assert!(c.reference_point.x.abs() < 1e-4 && c.reference_point.z.abs() < 1e-4);
    }

    #[test]
    fn test_closest_points_crossing_segments() {
        let (p, q) = closest_points_between_segments(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        let eps = 1e-6;
        assert!((p - Vec3::ZERO).length() < eps);
        assert!((q - Vec3::Y).length() < eps);
    }

    #[test]
    fn test_closest_points_clamped_to_endpoints() {
        let (p, q) = closest_points_between_segments(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(3.0, 1.0, 0.0),
            Vec3::new(4.0, 1.0, 0.0),
        );
        assert_eq!(p, Vec3::X);
        assert_eq!(q, Vec3::new(3.0, 1.0, 0.0));
    }

    #[test]
    fn test_closest_points_degenerate_segments() {
        let (p, q) = closest_points_between_segments(Vec3::ZERO, Vec3::ZERO, Vec3::Y, Vec3::Y);
        assert_eq!(p, Vec3::ZERO);
        assert_eq!(q, Vec3::Y);
    }
}
