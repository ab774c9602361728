//! Arena-backed half-edge mesh for convex polyhedra.
//!
//! Edges and faces live in generational arenas and refer to each other through
//! [`EdgeId`] and [`FaceId`] handles. A handle to a removed slot never resolves
//! again, even after the slot is reused.
//!
//! [`HalfEdgeMesh::split_face`] and the first splice of
//! [`HalfEdgeMesh::merge_across_edge`] validate the replacement loop before
//! touching any links, so those errors leave the mesh as it was. If the
//! redundant-vertex cleanup after a merge fails, the merged face keeps its
//! new loop and its plane data is recomputed before the error is returned.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use glam::Vec3;

use crate::error::{PhysicsError, PhysicsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    const DANGLING: Self = Self {
        index: u32::MAX,
        generation: u32::MAX,
    };
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generation-checked keys and a free list.
#[derive(Debug, Clone)]
struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, value: T) -> SlotKey {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            SlotKey {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            SlotKey {
                index,
                generation: 0,
            }
        }
    }

    fn remove(&mut self, key: SlotKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    fn get(&self, key: SlotKey) -> Option<&T> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    #[inline]
    fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlotKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

macro_rules! mesh_handle {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(SlotKey);

        impl $name {
            /// Handle that never resolves. Used while a loop is being linked.
            pub const DANGLING: Self = Self(SlotKey::DANGLING);

            /// Slot index, stable for the lifetime of the element.
            pub fn index(self) -> u32 {
                self.0.index
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    "{}({}v{})",
                    stringify!($name),
                    self.0.index,
                    self.0.generation
                )
            }
        }
    };
}

mesh_handle!(EdgeId, "Handle to a half-edge inside a [`HalfEdgeMesh`].");
mesh_handle!(FaceId, "Handle to a face inside a [`HalfEdgeMesh`].");

/// One endpoint of a feature label: a face number and an edge index in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId {
    pub face: u32,
    pub edge: u32,
}

impl FeatureId {
    pub const UNSET: Self = Self {
        face: u32::MAX,
        edge: u32::MAX,
    };
}

/// Opaque identity of a contact-generating feature, stable across frames as
/// long as the hull is not rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureLabel {
    pub first: FeatureId,
    pub next: FeatureId,
}

impl FeatureLabel {
    pub const UNSET: Self = Self {
        first: FeatureId::UNSET,
        next: FeatureId::UNSET,
    };

    #[inline]
    pub fn is_set(&self) -> bool {
        self.first != FeatureId::UNSET && self.next != FeatureId::UNSET
    }
}

impl Default for FeatureLabel {
    fn default() -> Self {
        Self::UNSET
    }
}

/// Directed edge owned by exactly one face.
#[derive(Debug, Clone)]
pub struct HalfEdge {
    /// Start vertex.
    pub origin: Vec3,
    pub next: EdgeId,
    pub prev: EdgeId,
    /// Twin on the neighbouring face. `None` only while the mesh is open.
    pub pair: Option<EdgeId>,
    pub face: FaceId,
    /// Unit edge direction. After [`HalfEdgeMesh::compute_robust_directions`]
    /// this is the cross product of the two adjacent face normals.
    pub direction: Vec3,
    pub label: FeatureLabel,
}

/// A planar polygon bounded by a loop of half-edges.
#[derive(Debug, Clone)]
pub struct Face {
    pub start: EdgeId,
    /// Outward unit normal.
    pub normal: Vec3,
    pub centroid: Vec3,
    /// Sequence number assigned at (re)initialization; feeds edge labels.
    pub label: u32,
}

/// Plane fitted to a polygon with Newell's method.
#[derive(Debug, Clone, Copy)]
pub struct NewellPlane {
    pub normal: Vec3,
    /// Signed distance of the plane from the origin along `normal`.
    pub distance: f32,
    pub centroid: Vec3,
}

/// Result of [`HalfEdgeMesh::merge_across_edge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The surviving face.
    pub face: FaceId,
    /// Faces absorbed into `face`. Their handles are now dangling.
    pub removed: Vec<FaceId>,
}

/// Closed polyhedral surface built from half-edges.
#[derive(Debug, Clone, Default)]
pub struct HalfEdgeMesh {
    edges: Arena<HalfEdge>,
    faces: Arena<Face>,
    face_counter: u32,
}

/// Iterator over the edges of one face loop.
///
/// Bounded by the mesh edge count so a corrupted loop cannot spin forever.
pub struct EdgeLoop<'a> {
    mesh: &'a HalfEdgeMesh,
    start: EdgeId,
    current: Option<EdgeId>,
    reverse: bool,
    remaining: usize,
}

impl Iterator for EdgeLoop<'_> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<EdgeId> {
        let current = self.current?;
        if self.remaining == 0 {
            self.current = None;
            return None;
        }
        self.remaining -= 1;
        let edge = self.mesh.edge(current)?;
        let following = if self.reverse { edge.prev } else { edge.next };
        self.current = (following != self.start).then_some(following);
        Some(current)
    }
}

fn invalid(message: impl Into<String>) -> PhysicsError {
    PhysicsError::InvalidMesh(message.into())
}

fn vertex_key(p: Vec3) -> [u32; 3] {
    [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]
}

/// Fit a plane to a polygon loop with Newell's method.
///
/// The normal follows the right-hand rule over the loop order.
pub fn newell_plane(points: &[Vec3]) -> NewellPlane {
    let mut normal = Vec3::ZERO;
    let mut sum = Vec3::ZERO;
    for (i, &vi) in points.iter().enumerate() {
        let vj = points[(i + 1) % points.len()];
        normal.x += (vi.y - vj.y) * (vi.z + vj.z);
        normal.y += (vi.z - vj.z) * (vi.x + vj.x);
        normal.z += (vi.x - vj.x) * (vi.y + vj.y);
        sum += vi;
    }
    let normal = normal.normalize_or_zero();
    let centroid = if points.is_empty() {
        Vec3::ZERO
    } else {
        sum / points.len() as f32
    };
    NewellPlane {
        normal,
        distance: centroid.dot(normal),
        centroid,
    }
}

impl HalfEdgeMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a closed mesh from polygon loops, pairing edges by shared endpoints.
    ///
    /// Each loop is wound counter-clockwise seen from outside. Vertices must
    /// match exactly between neighbouring polygons.
    pub fn from_polygons(polygons: &[Vec<Vec3>]) -> PhysicsResult<Self> {
        let mut mesh = Self::new();
        let mut open: HashMap<([u32; 3], [u32; 3]), EdgeId> = HashMap::new();

        for points in polygons {
            let face = mesh.add_face(points)?;
            for e in mesh.face_edges(face) {
                let from = vertex_key(mesh[e].origin);
                let to = vertex_key(mesh[mesh[e].next].origin);
                if let Some(twin) = open.remove(&(to, from)) {
                    mesh.pair(e, twin);
                } else if open.insert((from, to), e).is_some() {
                    return Err(invalid("two faces share an edge with the same winding"));
                }
            }
        }

        if !open.is_empty() {
            return Err(invalid(format!("{} edges have no twin", open.len())));
        }
        Ok(mesh)
    }

    pub fn face_count(&self) -> usize {
        self.faces.len
    }

    /// Number of half-edges (twice the number of undirected edges when closed).
    pub fn edge_count(&self) -> usize {
        self.edges.len
    }

    pub fn faces(&self) -> impl Iterator<Item = (FaceId, &Face)> {
        self.faces.iter().map(|(key, face)| (FaceId(key), face))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &HalfEdge)> {
        self.edges.iter().map(|(key, edge)| (EdgeId(key), edge))
    }

    #[inline]
    pub fn face(&self, id: FaceId) -> Option<&Face> {
        self.faces.get(id.0)
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> Option<&HalfEdge> {
        self.edges.get(id.0)
    }

    pub fn contains_face(&self, id: FaceId) -> bool {
        self.faces.get(id.0).is_some()
    }

    /// Twin of `edge`, or [`PhysicsError::InvalidMesh`] if it is missing.
    pub fn pair_of(&self, edge: EdgeId) -> PhysicsResult<EdgeId> {
        self.edge(edge)
            .and_then(|e| e.pair)
            .filter(|&twin| self.edge(twin).is_some())
            .ok_or_else(|| invalid(format!("{edge:?} has no twin")))
    }

    /// Walk a face loop forward, starting at the face's start edge.
    pub fn face_loop(&self, face: FaceId) -> EdgeLoop<'_> {
        self.loop_from(face, false)
    }

    /// Walk a face loop backward, starting at the face's start edge.
    pub fn face_loop_reverse(&self, face: FaceId) -> EdgeLoop<'_> {
        self.loop_from(face, true)
    }

    fn loop_from(&self, face: FaceId, reverse: bool) -> EdgeLoop<'_> {
        let start = self.face(face).map_or(EdgeId::DANGLING, |f| f.start);
        EdgeLoop {
            mesh: self,
            start,
            current: self.edge(start).map(|_| start),
            reverse,
            remaining: self.edges.len,
        }
    }

    pub fn for_each_edge(&self, face: FaceId, mut f: impl FnMut(EdgeId, &HalfEdge)) {
        for id in self.face_loop(face) {
            f(id, &self[id]);
        }
    }

    pub fn for_each_edge_reverse(&self, face: FaceId, mut f: impl FnMut(EdgeId, &HalfEdge)) {
        for id in self.face_loop_reverse(face) {
            f(id, &self[id]);
        }
    }

    pub fn face_edges(&self, face: FaceId) -> Vec<EdgeId> {
        self.face_loop(face).collect()
    }

    pub fn face_vertices(&self, face: FaceId) -> Vec<Vec3> {
        self.face_loop(face).map(|e| self[e].origin).collect()
    }

    /// Create an unpaired face from a loop of points.
    pub fn add_face(&mut self, points: &[Vec3]) -> PhysicsResult<FaceId> {
        if points.len() < 3 {
            return Err(PhysicsError::DegenerateInput(format!(
                "a face needs at least 3 vertices, got {}",
                points.len()
            )));
        }

        let face = FaceId(self.faces.insert(Face {
            start: EdgeId::DANGLING,
            normal: Vec3::ZERO,
            centroid: Vec3::ZERO,
            label: 0,
        }));
        let ids: Vec<EdgeId> = points
            .iter()
            .map(|&origin| {
                EdgeId(self.edges.insert(HalfEdge {
                    origin,
                    next: EdgeId::DANGLING,
                    prev: EdgeId::DANGLING,
                    pair: None,
                    face,
                    direction: Vec3::ZERO,
                    label: FeatureLabel::UNSET,
                }))
            })
            .collect();

        self.link_loop(&ids, face);
        self.initialize_face(face);
        Ok(face)
    }

    /// Make `a` and `b` twins of each other.
    #[inline]
    pub fn pair(&mut self, a: EdgeId, b: EdgeId) {
        self[a].pair = Some(b);
        self[b].pair = Some(a);
    }

    /// Link `prev -> edge -> next`, updating both neighbours.
    #[inline]
    pub fn set_next_and_previous(&mut self, edge: EdgeId, prev: EdgeId, next: EdgeId) {
        self[edge].prev = prev;
        self[edge].next = next;
        self[prev].next = edge;
        self[next].prev = edge;
    }

    fn link_loop(&mut self, ids: &[EdgeId], face: FaceId) {
        let n = ids.len();
        for (i, &id) in ids.iter().enumerate() {
            self[id].face = face;
            self.set_next_and_previous(id, ids[(i + n - 1) % n], ids[(i + 1) % n]);
        }
        if let Some(&first) = ids.first() {
            self[face].start = first;
        }
    }

    /// Delete a face and its edges. Twins that pointed at the removed edges
    /// are left unpaired.
    pub fn remove_face(&mut self, face: FaceId) -> Option<Face> {
        for e in self.face_edges(face) {
            let Some(edge) = self.edges.remove(e.0) else {
                continue;
            };
            if let Some(twin) = edge.pair.and_then(|p| self.edges.get_mut(p.0)) {
                if twin.pair == Some(e) {
                    twin.pair = None;
                }
            }
        }
        self.faces.remove(face.0)
    }

    /// Recompute normal, centroid, edge directions and feature labels of a face.
    pub fn initialize_face(&mut self, face: FaceId) {
        let ids = self.face_edges(face);
        if ids.is_empty() {
            return;
        }
        let points: Vec<Vec3> = ids.iter().map(|&e| self[e].origin).collect();
        let plane = newell_plane(&points);
        let label = self.face_counter;
        self.face_counter = self.face_counter.wrapping_add(1);

        let n = ids.len();
        for (i, &e) in ids.iter().enumerate() {
            let next_origin = points[(i + 1) % n];
            let edge = &mut self[e];
            edge.face = face;
            edge.direction = (next_origin - edge.origin).normalize_or_zero();
            edge.label = FeatureLabel {
                first: FeatureId {
                    face: label,
                    edge: i as u32,
                },
                next: FeatureId {
                    face: label,
                    edge: ((i + 1) % n) as u32,
                },
            };
        }

        let f = &mut self[face];
        f.normal = plane.normal;
        f.centroid = plane.centroid;
        f.label = label;
    }

    /// Signed distance from the face plane, positive in front.
    #[inline]
    pub fn distance_to_face(&self, face: FaceId, point: Vec3) -> f32 {
        let f = &self[face];
        f.normal.dot(point - f.centroid)
    }

    /// Newell plane of the face's current loop.
    pub fn face_plane(&self, face: FaceId) -> NewellPlane {
        newell_plane(&self.face_vertices(face))
    }

    /// Check that every edge has live next, previous, twin and face links and
    /// that those links are mutually consistent.
    pub fn assert_edge_validity(&self) -> PhysicsResult<()> {
        for (id, edge) in self.edges() {
            let next = self
                .edge(edge.next)
                .ok_or_else(|| invalid(format!("{id:?} has no next edge")))?;
            if next.prev != id {
                return Err(invalid(format!("{id:?}: next.prev does not link back")));
            }
            if next.face != edge.face {
                return Err(invalid(format!("{id:?}: next edge is on another face")));
            }
            let prev = self
                .edge(edge.prev)
                .ok_or_else(|| invalid(format!("{id:?} has no previous edge")))?;
            if prev.next != id {
                return Err(invalid(format!("{id:?}: prev.next does not link back")));
            }
            let twin_id = self.pair_of(id)?;
            let twin = &self[twin_id];
            if twin.pair != Some(id) {
                return Err(invalid(format!("{id:?}: twin is not paired back")));
            }
            if twin.face == edge.face {
                return Err(invalid(format!("{id:?}: twin lies on the same face")));
            }
            if !self.contains_face(edge.face) {
                return Err(invalid(format!("{id:?} has no face")));
            }
        }
        for (id, face) in self.faces() {
            match self.edge(face.start) {
                Some(start) if start.face == id => {}
                _ => return Err(invalid(format!("{id:?} has a dangling start edge"))),
            }
        }
        Ok(())
    }

    /// Replace every paired edge's direction with the cross product of its
    /// two face normals. Leaves the direction alone when the normals are
    /// parallel.
    pub fn compute_robust_directions(&mut self) {
        let updates: Vec<(EdgeId, Vec3)> = self
            .edges()
            .filter_map(|(id, edge)| {
                let twin = self.edge(edge.pair?)?;
                let n1 = self.face(edge.face)?.normal;
                let n2 = self.face(twin.face)?.normal;
                let dir = n1.cross(n2);
                (dir.length_squared() > 1e-12).then(|| (id, dir.normalize()))
            })
            .collect();
        for (id, dir) in updates {
            self[id].direction = dir;
        }
    }

    /// Merge the face across `edge` into the face that owns `edge`.
    ///
    /// The whole run of edges shared by the two faces is removed. Vertices
    /// left with only two incident faces are collapsed afterwards, which may
    /// absorb further triangles.
    pub fn merge_across_edge(&mut self, edge: EdgeId) -> PhysicsResult<MergeOutcome> {
        let face = self
            .edge(edge)
            .ok_or_else(|| invalid(format!("{edge:?} is not in the mesh")))?
            .face;
        let mut removed = Vec::new();
        self.absorb_neighbor(edge, &mut removed)?;
        let cleanup = self.remove_redundant_vertices(face, &mut removed);
        // The loop has changed either way.
        self.initialize_face(face);
        cleanup?;
        Ok(MergeOutcome { face, removed })
    }

    fn borders(&self, edge: EdgeId, face: FaceId) -> bool {
        self.edge(edge)
            .and_then(|e| e.pair)
            .and_then(|p| self.edge(p))
            .is_some_and(|p| p.face == face)
    }

    fn absorb_neighbor(&mut self, edge: EdgeId, removed: &mut Vec<FaceId>) -> PhysicsResult<()> {
        let face = self[edge].face;
        let neighbor = self[self.pair_of(edge)?].face;
        if face == neighbor {
            return Err(invalid(format!("{edge:?} pairs within its own face")));
        }
        let face_len = self.face_loop(face).count();
        let neighbor_len = self.face_loop(neighbor).count();

        let mut run_start = edge;
        let mut run_end = edge;
        let mut run_len = 1;
        while self.borders(self[run_start].prev, neighbor) {
            run_start = self[run_start].prev;
            run_len += 1;
            if run_len >= face_len {
                return Err(invalid("face is entirely shared with its neighbour"));
            }
        }
        while self.borders(self[run_end].next, neighbor) {
            run_end = self[run_end].next;
            run_len += 1;
            if run_len >= face_len {
                return Err(invalid("face is entirely shared with its neighbour"));
            }
        }

        let mut run = Vec::with_capacity(run_len);
        let mut e = run_start;
        loop {
            run.push(e);
            if e == run_end {
                break;
            }
            e = self[e].next;
        }
        let twins = run
            .iter()
            .map(|&e| self.pair_of(e))
            .collect::<PhysicsResult<Vec<_>>>()?;
        if twins.len() >= neighbor_len {
            return Err(invalid("neighbour is entirely shared with the face"));
        }
        for w in twins.windows(2) {
            if self[w[1]].next != w[0] {
                return Err(invalid("shared edges are not contiguous in the neighbour"));
            }
        }

        let mut merged = Vec::with_capacity(face_len + neighbor_len);
        let mut e = self[run_end].next;
        while e != run_start {
            merged.push(e);
            e = self[e].next;
        }
        let stop = twins[twins.len() - 1];
        let mut e = self[twins[0]].next;
        while e != stop {
            merged.push(e);
            e = self[e].next;
            if merged.len() > face_len + neighbor_len {
                return Err(invalid("neighbour loop does not close"));
            }
        }
        if merged.len() < 3 {
            return Err(invalid("merge would leave fewer than 3 edges"));
        }

        self.link_loop(&merged, face);
        for e in run.into_iter().chain(twins) {
            self.edges.remove(e.0);
        }
        self.faces.remove(neighbor.0);
        removed.push(neighbor);
        Ok(())
    }

    fn find_redundant_vertex(&self, face: FaceId) -> Option<(EdgeId, EdgeId)> {
        self.face_loop(face).find_map(|a| {
            let b = self[a].next;
            let fa = self.edge(self[a].pair?)?.face;
            let fb = self.edge(self[b].pair?)?.face;
            (a != b && fa == fb).then_some((a, b))
        })
    }

    fn remove_redundant_vertices(
        &mut self,
        face: FaceId,
        removed: &mut Vec<FaceId>,
    ) -> PhysicsResult<()> {
        let limit = self.edges.len + 8;
        for _ in 0..limit {
            let Some((a, b)) = self.find_redundant_vertex(face) else {
                return Ok(());
            };
            let neighbor = self[self.pair_of(a)?].face;
            if self.face_loop(neighbor).count() == 3 {
                self.absorb_neighbor(a, removed)?;
            } else {
                self.collapse_vertex(a, b)?;
                self.initialize_face(neighbor);
            }
        }
        Err(invalid("redundant vertex cleanup did not terminate"))
    }

    /// Remove the vertex between `a` and `b = a.next`, whose twins both lie on
    /// the same neighbouring face.
    fn collapse_vertex(&mut self, a: EdgeId, b: EdgeId) -> PhysicsResult<()> {
        let a_twin = self.pair_of(a)?;
        let b_twin = self.pair_of(b)?;
        if self[b_twin].next != a_twin {
            return Err(invalid("collapsed vertex twins are not adjacent"));
        }
        let face = self[a].face;
        let neighbor = self[a_twin].face;
        if self.face_loop(face).count() <= 3 {
            return Err(invalid("collapsing vertex would leave a face with 2 edges"));
        }

        let a_prev = self[a].prev;
        let b_next = self[b].next;
        let b_twin_prev = self[b_twin].prev;
        let a_twin_next = self[a_twin].next;
        self.set_next_and_previous(a, a_prev, b_next);
        self.set_next_and_previous(b_twin, b_twin_prev, a_twin_next);
        self.pair(a, b_twin);
        if self[face].start == b {
            self[face].start = a;
        }
        if self[neighbor].start == a_twin {
            self[neighbor].start = b_twin;
        }
        self.edges.remove(b.0);
        self.edges.remove(a_twin.0);
        Ok(())
    }

    /// Split a face along the diagonal from `a.origin` to `b.origin`.
    ///
    /// `face` keeps the loop starting at `a`; the returned face owns the loop
    /// starting at `b`. The new diagonal half-edges are paired.
    pub fn split_face(&mut self, face: FaceId, a: EdgeId, b: EdgeId) -> PhysicsResult<FaceId> {
        let ids = self.face_edges(face);
        if !ids.contains(&a) || !ids.contains(&b) {
            return Err(invalid("split edges do not belong to the face"));
        }
        if a == b || self[a].next == b || self[b].next == a {
            return Err(PhysicsError::DegenerateInput(
                "split diagonal must join non-adjacent vertices".into(),
            ));
        }

        let walk = |from: EdgeId, to: EdgeId| -> Vec<EdgeId> {
            let mut out = Vec::new();
            let mut e = from;
            while e != to {
                out.push(e);
                e = self[e].next;
            }
            out
        };
        let mut first = walk(a, b);
        let mut second = walk(b, a);
        let origin_a = self[a].origin;
        let origin_b = self[b].origin;

        let new_face = FaceId(self.faces.insert(Face {
            start: b,
            normal: Vec3::ZERO,
            centroid: Vec3::ZERO,
            label: 0,
        }));
        let mut diagonal = |origin: Vec3, owner: FaceId| {
            EdgeId(self.edges.insert(HalfEdge {
                origin,
                next: EdgeId::DANGLING,
                prev: EdgeId::DANGLING,
                pair: None,
                face: owner,
                direction: Vec3::ZERO,
                label: FeatureLabel::UNSET,
            }))
        };
        let closes_first = diagonal(origin_b, face);
        let closes_second = diagonal(origin_a, new_face);
        self.pair(closes_first, closes_second);

        first.push(closes_first);
        second.push(closes_second);
        self.link_loop(&first, face);
        self.link_loop(&second, new_face);
        self.initialize_face(face);
        self.initialize_face(new_face);
        Ok(new_face)
    }
}

impl Index<EdgeId> for HalfEdgeMesh {
    type Output = HalfEdge;

    fn index(&self, id: EdgeId) -> &HalfEdge {
        match self.edges.get(id.0) {
            Some(edge) => edge,
            None => panic!("dangling edge handle {id:?}"),
        }
    }
}

impl IndexMut<EdgeId> for HalfEdgeMesh {
    fn index_mut(&mut self, id: EdgeId) -> &mut HalfEdge {
        match self.edges.get_mut(id.0) {
            Some(edge) => edge,
            None => panic!("dangling edge handle {id:?}"),
        }
    }
}

impl Index<FaceId> for HalfEdgeMesh {
    type Output = Face;

    fn index(&self, id: FaceId) -> &Face {
        match self.faces.get(id.0) {
            Some(face) => face,
            None => panic!("dangling face handle {id:?}"),
        }
    }
}

impl IndexMut<FaceId> for HalfEdgeMesh {
    fn index_mut(&mut self, id: FaceId) -> &mut Face {
        match self.faces.get_mut(id.0) {
            Some(face) => face,
            None => panic!("dangling face handle {id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, y: f32, z: f32) -> Vec3 {
        Vec3::new(x, y, z)
    }

    /// Unit cube polygons, counter-clockwise seen from outside.
    fn cube_polygons() -> Vec<Vec<Vec3>> {
        vec![
            vec![v(-1., -1., 1.), v(1., -1., 1.), v(1., 1., 1.), v(-1., 1., 1.)],
            vec![v(1., -1., -1.), v(-1., -1., -1.), v(-1., 1., -1.), v(1., 1., -1.)],
            vec![v(1., -1., 1.), v(1., -1., -1.), v(1., 1., -1.), v(1., 1., 1.)],
            vec![v(-1., -1., -1.), v(-1., -1., 1.), v(-1., 1., 1.), v(-1., 1., -1.)],
            vec![v(-1., 1., 1.), v(1., 1., 1.), v(1., 1., -1.), v(-1., 1., -1.)],
            vec![v(-1., -1., -1.), v(1., -1., -1.), v(1., -1., 1.), v(-1., -1., 1.)],
        ]
    }

    fn top_face(mesh: &HalfEdgeMesh) -> FaceId {
        mesh.faces()
            .find(|(_, f)| f.normal.dot(Vec3::Y) > 0.99)
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn test_arena_generation_invalidates_handles() {
        let mut arena = Arena::default();
        let a = arena.insert(1);
        assert_eq!(arena.remove(a), Some(1));
        let b = arena.insert(2);
        assert_eq!(a.index, b.index);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.len, 1);
    }

    #[test]
    fn test_newell_plane_square() {
        let plane = newell_plane(&[v(0., 0., 0.), v(1., 0., 0.), v(1., 1., 0.), v(0., 1., 0.)]);
        let eps = 1e-6;
        assert!((plane.normal - Vec3::Z).length() < eps);
        assert!((plane.centroid - v(0.5, 0.5, 0.0)).length() < eps);
        assert!(plane.distance.abs() < eps);
    }

    #[test]
    fn test_cube_from_polygons() {
        let mesh = HalfEdgeMesh::from_polygons(&cube_polygons()).unwrap();
        assert_eq!(mesh.face_count(), 6);
        assert_eq!(mesh.edge_count(), 24);
        mesh.assert_edge_validity().unwrap();

        for (id, edge) in mesh.edges() {
            let twin = mesh.pair_of(id).unwrap();
            assert_eq!(mesh[twin].pair, Some(id));
            assert_ne!(mesh[twin].face, edge.face);
            assert_eq!(mesh[edge.next].prev, id);
        }
        for (_, face) in mesh.faces() {
            assert!((face.normal.length() - 1.0).abs() < 1e-5);
            assert!(face.normal.dot(face.centroid) > 0.0, "normals face outward");
        }
    }

    #[test]
    fn test_open_mesh_is_invalid() {
        let mut mesh = HalfEdgeMesh::new();
        mesh.add_face(&[v(0., 0., 0.), v(1., 0., 0.), v(0., 1., 0.)])
            .unwrap();
        assert!(matches!(
            mesh.assert_edge_validity(),
            Err(PhysicsError::InvalidMesh(_))
        ));
        assert!(HalfEdgeMesh::from_polygons(&cube_polygons()[..5]).is_err());
    }

    #[test]
    fn test_add_face_rejects_two_points() {
        let mut mesh = HalfEdgeMesh::new();
        let result = mesh.add_face(&[Vec3::ZERO, Vec3::X]);
        assert!(matches!(result, Err(PhysicsError::DegenerateInput(_))));
        assert_eq!(mesh.face_count(), 0);
    }

    #[test]
    fn test_face_loop_forward_and_reverse() {
        let mesh = HalfEdgeMesh::from_polygons(&cube_polygons()).unwrap();
        let face = top_face(&mesh);

        let mut forward = Vec::new();
        mesh.for_each_edge(face, |id, _| forward.push(id));
        let mut backward = Vec::new();
        mesh.for_each_edge_reverse(face, |id, _| backward.push(id));

        assert_eq!(forward.len(), 4);
        assert_eq!(backward.len(), 4);
        assert_eq!(forward[0], backward[0]);
        assert_eq!(forward[1], backward[3]);
        assert_eq!(forward[3], backward[1]);
    }

    #[test]
    fn test_labels_are_sequential_per_face() {
        let mesh = HalfEdgeMesh::from_polygons(&cube_polygons()).unwrap();
        let face = top_face(&mesh);
        let label = mesh[face].label;
        for (i, e) in mesh.face_loop(face).enumerate() {
            let l = mesh[e].label;
            assert!(l.is_set());
            assert_eq!(l.first, FeatureId { face: label, edge: i as u32 });
            assert_eq!(l.next.edge, ((i + 1) % 4) as u32);
        }
    }

    #[test]
    fn test_split_then_merge_restores_cube() {
        let mut mesh = HalfEdgeMesh::from_polygons(&cube_polygons()).unwrap();
        let face = top_face(&mesh);
        let ids = mesh.face_edges(face);

        let new_face = mesh.split_face(face, ids[0], ids[2]).unwrap();
        assert_eq!(mesh.face_count(), 7);
        assert_eq!(mesh.edge_count(), 26);
        assert_eq!(mesh.face_loop(face).count(), 3);
        assert_eq!(mesh.face_loop(new_face).count(), 3);
        mesh.assert_edge_validity().unwrap();
        assert!((mesh[new_face].normal - Vec3::Y).length() < 1e-5);

        let diagonal = mesh
            .face_loop(face)
            .find(|&e| mesh.borders(e, new_face))
            .unwrap();
        let outcome = mesh.merge_across_edge(diagonal).unwrap();
        assert_eq!(outcome.face, face);
        assert_eq!(outcome.removed, vec![new_face]);
        assert!(!mesh.contains_face(new_face));
        assert_eq!(mesh.face_count(), 6);
        assert_eq!(mesh.edge_count(), 24);
        assert_eq!(mesh.face_loop(face).count(), 4);
        mesh.assert_edge_validity().unwrap();
        assert!((mesh[face].centroid - v(0.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_split_rejects_adjacent_vertices() {
        let mut mesh = HalfEdgeMesh::from_polygons(&cube_polygons()).unwrap();
        let face = top_face(&mesh);
        let ids = mesh.face_edges(face);
        let before = mesh.edge_count();
        assert!(mesh.split_face(face, ids[0], ids[1]).is_err());
        assert_eq!(mesh.edge_count(), before);
        mesh.assert_edge_validity().unwrap();
    }

    #[test]
    fn test_merge_collapses_redundant_vertex() {
        // Cube whose +X face is split into two quads along z = 0. Merging the
        // halves leaves the top and bottom faces with a collinear vertex.
        let polys = vec![
            vec![v(-1., -1., 1.), v(1., -1., 1.), v(1., 1., 1.), v(-1., 1., 1.)],
            vec![v(1., -1., -1.), v(-1., -1., -1.), v(-1., 1., -1.), v(1., 1., -1.)],
            vec![v(-1., -1., -1.), v(-1., -1., 1.), v(-1., 1., 1.), v(-1., 1., -1.)],
            vec![v(-1., 1., 1.), v(1., 1., 1.), v(1., 1., 0.), v(1., 1., -1.), v(-1., 1., -1.)],
            vec![v(-1., -1., -1.), v(1., -1., -1.), v(1., -1., 0.), v(1., -1., 1.), v(-1., -1., 1.)],
            vec![v(1., -1., 1.), v(1., -1., 0.), v(1., 1., 0.), v(1., 1., 1.)],
            vec![v(1., -1., 0.), v(1., -1., -1.), v(1., 1., -1.), v(1., 1., 0.)],
        ];
        let mut mesh = HalfEdgeMesh::from_polygons(&polys).unwrap();
        mesh.assert_edge_validity().unwrap();
        assert_eq!(mesh.face_count(), 7);

        let front_half = mesh
            .faces()
            .find(|(_, f)| f.normal.dot(Vec3::X) > 0.99 && f.centroid.z > 0.0)
            .map(|(id, _)| id)
            .unwrap();
        let back_half = mesh
            .faces()
            .find(|(_, f)| f.normal.dot(Vec3::X) > 0.99 && f.centroid.z < 0.0)
            .map(|(id, _)| id)
            .unwrap();
        let shared = mesh
            .face_loop(front_half)
            .find(|&e| mesh.borders(e, back_half))
            .unwrap();

        mesh.merge_across_edge(shared).unwrap();
        mesh.assert_edge_validity().unwrap();
        assert_eq!(mesh.face_count(), 6);
        assert_eq!(mesh.face_loop(front_half).count(), 4);
        // The top and bottom faces lost their extra vertex.
        for (id, face) in mesh.faces() {
            assert_eq!(mesh.face_loop(id).count(), 4);
            assert!(face.normal.abs().max_element() > 0.99);
        }
        assert_eq!(mesh.edge_count(), 24);
    }

    #[test]
    fn test_failed_merge_cleanup_reinitializes_face() {
        let (a, b, c, d) = (v(0., 0., 0.), v(1., 0., 0.), v(0., 1., 0.), v(0., 0., 1.));
        let mut mesh =
            HalfEdgeMesh::from_polygons(&[vec![a, c, b], vec![a, b, d], vec![a, d, c], vec![b, c, d]])
                .unwrap();
        let face = mesh
            .faces()
            .find(|(_, f)| f.normal.z < -0.99)
            .map(|(id, _)| id)
            .unwrap();
        let edge = mesh[face].start;

        // Merging two tetrahedron faces leaves nothing convex to collapse into.
        assert!(matches!(
            mesh.merge_across_edge(edge),
            Err(PhysicsError::InvalidMesh(_))
        ));

        assert!(mesh.contains_face(face));
        let plane = mesh.face_plane(face);
        let eps = 1e-5;
        assert!(
            (mesh[face].normal - plane.normal).length() < eps,
            "stale normal {:?}, loop normal {:?}",
            mesh[face].normal,
            plane.normal
        );
        assert!((mesh[face].centroid - plane.centroid).length() < eps);
        for e in mesh.face_loop(face) {
            assert_eq!(mesh[e].face, face);
        }
    }

    #[test]
    fn test_robust_directions_follow_edges() {
        let mut mesh = HalfEdgeMesh::from_polygons(&cube_polygons()).unwrap();
        let before: Vec<(EdgeId, Vec3)> = mesh.edges().map(|(id, e)| (id, e.direction)).collect();
        mesh.compute_robust_directions();
        for (id, dir) in before {
            assert!((mesh[id].direction - dir).length() < 1e-5);
        }
    }
}
