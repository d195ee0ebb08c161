//! Interface meshing passes over the BCC lattice
//!
//! The [`Mesher`] drives the lattice through its pipeline stages: it
//! computes cut, triple, and quadruple interface vertices from the material
//! fields, generalizes every tet to the full fifteen-slot form, then runs
//! three warping phases that snap interface vertices violating the
//! forbidden zones of lattice vertices, edges, and faces. The final
//! stenciling pass emits output tets into the octree's global arrays.
//!
//! Violation tests and projections follow the lattice adjacency
//! conventions of [`crate::lattice`]: tet verts are `[A, B, C, D]`, edges
//! `[AB, AC, AD, BC, CD, BD]`, and faces `[ABC, ACD, ABD, BCD]`. Face
//! helpers reorder edges so `edges[i]` is opposite `verts[i]`.

use log::{debug, info, warn};
use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

use crate::lattice::tables::{
    EDGES_PER_CELL, FACES_PER_CELL, TETS_PER_CELL, VERTS_PER_CELL, vtx,
};
use crate::lattice::{
    BccLattice, EdgeId, FaceId, GeometryRef, MaterialSet, Order, Stage, TetId, Vertex, VertexId,
};
use crate::stencils::{self, PARITY_FLIP, Variant, is_key_valid, slot};
use crate::volume::MaterialVolume;

/// Axis along which each face's 2D triple solve lifts field values: `1`
/// lifts into y, `2` into z, chosen so the face never degenerates when
/// projected onto the remaining two axes
const FACE_LIFT_AXIS: [usize; FACES_PER_CELL] = [
    1, 1, 1, 1, // upper primal edge triangles
    1, 1, 1, 1, // lower primal edge triangles
    2, 2, 2, 2, // column edge triangles
    2, 2, 2, 2, // left facet
    2, 2, 2, 2, // right facet
    1, 1, 1, 1, // front facet
    1, 1, 1, 1, // back facet
    2, 2, 2, 2, // upper facet
    2, 2, 2, 2, // lower facet
];

/// One of the two bounding planes a quadruple may cross toward a tet edge
///
/// The plane passes through two cone points raised from `base` toward the
/// `cones` corners (at the scaled-alpha parameter of the named edge slot)
/// and is tested against the quadruple as seen from `apex`.
struct EdgePlane {
    base: usize,
    cones: [(usize, usize); 2],
    apex: usize,
    flipped: bool,
}

/// Per tet edge, the two planes whose positive side the quadruple must
/// reach to violate that edge
const QUAD_EDGE_PLANES: [[EdgePlane; 2]; 6] = [
    // AB
    [
        EdgePlane { base: 0, cones: [(1, 2), (2, 3)], apex: 1, flipped: false },
        EdgePlane { base: 1, cones: [(3, 2), (5, 3)], apex: 0, flipped: true },
    ],
    // AC
    [
        EdgePlane { base: 0, cones: [(0, 1), (2, 3)], apex: 2, flipped: true },
        EdgePlane { base: 2, cones: [(3, 1), (4, 3)], apex: 0, flipped: false },
    ],
    // AD
    [
        EdgePlane { base: 0, cones: [(0, 1), (1, 2)], apex: 3, flipped: true },
        EdgePlane { base: 3, cones: [(5, 1), (4, 2)], apex: 0, flipped: true },
    ],
    // BC
    [
        EdgePlane { base: 1, cones: [(0, 0), (5, 3)], apex: 2, flipped: false },
        EdgePlane { base: 2, cones: [(1, 0), (4, 3)], apex: 1, flipped: true },
    ],
    // CD
    [
        EdgePlane { base: 3, cones: [(2, 0), (5, 1)], apex: 2, flipped: true },
        EdgePlane { base: 2, cones: [(1, 0), (3, 1)], apex: 3, flipped: false },
    ],
    // BD
    [
        EdgePlane { base: 1, cones: [(0, 0), (3, 2)], apex: 3, flipped: true },
        EdgePlane { base: 3, cones: [(2, 0), (4, 2)], apex: 1, flipped: false },
    ],
];

/// Per tet face, the cone construction for the three-plane violation test:
/// the face's `corners`, the edge slots whose scaled alphas raise the cone
/// points toward `far`, and whether the normals run anti-cyclic
struct FaceCone {
    corners: [usize; 3],
    edges: [usize; 3],
    far: usize,
    anti: bool,
}

const QUAD_FACE_CONES: [FaceCone; 4] = [
    FaceCone { corners: [0, 1, 2], edges: [2, 5, 4], far: 3, anti: false }, // ABC
    FaceCone { corners: [0, 2, 3], edges: [0, 3, 5], far: 1, anti: false }, // ACD
    FaceCone { corners: [0, 1, 3], edges: [1, 3, 4], far: 2, anti: true },  // ABD
    FaceCone { corners: [1, 2, 3], edges: [0, 1, 2], far: 0, anti: true },  // BCD
];

/// Per tet corner, the three planes bounding its forbidden region: each
/// plane sits at the scaled-alpha point of edge `edge` toward corner `to`,
/// with its normal spanned by the `span` corners
const QUAD_CORNER_PLANES: [[(usize, usize, (usize, usize)); 3]; 4] = [
    [(0, 1, (2, 3)), (1, 2, (3, 1)), (2, 3, (1, 2))],
    [(0, 0, (3, 2)), (5, 3, (2, 0)), (3, 2, (0, 3))],
    [(1, 0, (1, 3)), (4, 3, (0, 1)), (3, 1, (3, 0))],
    [(2, 0, (2, 1)), (4, 2, (1, 0)), (5, 1, (0, 2))],
];

////////////////////////////////////////////////////////////////////////////////

/// Runs the meshing pipeline over a freshly built lattice
///
/// Holds the lattice mutably for the whole run, plus the material volume
/// the interface solves sample from.
pub struct Mesher<'a> {
    lat: &'a mut BccLattice,
    volume: &'a dyn MaterialVolume,

    /// Set after warning that an interface reaches the unpadded boundary
    boundary_warned: bool,
}

impl<'a> Mesher<'a> {
    pub fn new(lat: &'a mut BccLattice, volume: &'a dyn MaterialVolume) -> Self {
        Self {
            lat,
            volume,
            boundary_warned: false,
        }
    }

    /// Runs every pipeline stage in order
    pub fn mesh(&mut self) {
        self.compute_all_cuts();
        self.compute_all_triples();
        self.compute_all_quads();
        self.generalize_tets();

        self.warp_violating_cuts();

        self.detect_triples_violating_edges();
        self.detect_quads_violating_edges();
        self.warp_violating_triples();

        self.detect_quads_violating_faces();
        self.warp_violating_quads();

        self.fill_all_stencils();
    }

    fn sample(&self, p: Vector3<f64>, mat: u8) -> f64 {
        f64::from(self.volume.value_at(p.x, p.y, p.z, mat as usize))
    }

    /// Warns (once) that the interface reaches the unpadded volume
    /// boundary, leaving lattice slots unpopulated there
    fn boundary_gap(&mut self) {
        if !self.boundary_warned {
            self.boundary_warned = true;
            warn!(
                "material interface reaches the volume boundary; \
                 some interface elements are skipped there (pad the volume to close it)"
            );
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Interface vertex computation

    pub fn compute_all_cuts(&mut self) {
        let mut count = 0;
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..EDGES_PER_CELL {
                let Some(ents) = self.lat.tree[cell].entities() else {
                    continue;
                };
                let Some(e) = ents.edges[slot] else {
                    self.boundary_gap();
                    continue;
                };
                if !self.lat[e].evaluated {
                    self.compute_cut(e);
                    count += usize::from(self.lat[e].cut.is_some());
                }
            }
        }
        self.lat.advance(Stage::CutsComputed);
        info!("computed {count} cuts");
    }

    /// Places the material crossing on a transition edge
    ///
    /// The crossing parameter comes from the closed-form intersection of
    /// the two dominant fields linearized along the edge, clamped to the
    /// segment. Violation here uses the unscaled alpha on the parameter;
    /// the scaled re-check runs when vertices start moving.
    fn compute_cut(&mut self, e: EdgeId) {
        let (v1, v2) = (self.lat[e].v1, self.lat[e].v2);
        self.lat[e].evaluated = true;

        let m1 = self.lat.verts[v1].materials;
        let m2 = self.lat.verts[v2].materials;
        if m1.intersects(m2) {
            return;
        }

        let a_mat = self.lat.verts[v1].label;
        let b_mat = self.lat.verts[v2].label;
        let p1 = self.lat.verts.position(v1);
        let p2 = self.lat.verts.position(v2);
        let a1 = self.sample(p1, a_mat);
        let a2 = self.sample(p2, a_mat);
        let b1 = self.sample(p1, b_mat);
        let b2 = self.sample(p2, b_mat);

        let t = ((a1 - b1) / (b2 - a2 + a1 - b1)).clamp(0.0, 1.0);

        let mut cut = Vertex::new(p1.lerp(&p2, t), Order::Cut);
        cut.label = a_mat;
        cut.materials = MaterialSet::single(a_mat).union(MaterialSet::single(b_mat));
        cut.closest_geometry = Some(GeometryRef::Vertex(if t < 0.5 { v1 } else { v2 }));

        let alpha = self.lat.alpha(e);
        cut.violating = t < alpha || t > 1.0 - alpha;

        self.lat[e].cut = Some(self.lat.verts.insert(cut));
    }

    pub fn compute_all_triples(&mut self) {
        let mut count = 0;
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..FACES_PER_CELL {
                let Some(ents) = self.lat.tree[cell].entities() else {
                    continue;
                };
                let Some(f) = ents.faces[slot] else {
                    self.boundary_gap();
                    continue;
                };
                if !self.lat[f].evaluated {
                    self.compute_triple(f);
                    count += usize::from(self.lat[f].triple.is_some());
                }
            }
        }
        self.lat.advance(Stage::TriplesComputed);
        info!("computed {count} triples");
    }

    /// Places the three-material point on a face whose edges all carry cuts
    ///
    /// Each material field is lifted out of the face plane along the
    /// face's lift axis and fit with a plane through the corner samples;
    /// the pairwise-equality lines of the three planes meet at one 2D
    /// point, which is dropped back onto the face and clamped into the
    /// triangle.
    fn compute_triple(&mut self, f: FaceId) {
        let (verts, edges) = self.face_lists(f);
        self.lat[f].evaluated = true;
        if edges.iter().any(|&e| self.lat[e].cut.is_none()) {
            return;
        }

        let p = verts.map(|v| self.lat.verts.position(v));
        let mats = verts.map(|v| self.lat.verts[v].label);
        let axis = FACE_LIFT_AXIS[self.lat[f].face_index];

        // plane through the three lifted samples of one material
        let lift = |this: &Self, mat: u8| -> Vector4<f64> {
            let q: Vec<Vector3<f64>> = p
                .iter()
                .map(|&pt| {
                    let s = this.sample(pt, mat);
                    if axis == 1 {
                        Vector3::new(pt.x, s, pt.z)
                    } else {
                        Vector3::new(pt.x, pt.y, s)
                    }
                })
                .collect();
            let n = (q[1] - q[0]).cross(&(q[2] - q[0])).normalize();
            Vector4::new(n.x, n.y, n.z, -n.dot(&q[0]))
        };
        let pl1 = lift(self, mats[0]);
        let pl2 = lift(self, mats[1]);
        let pl3 = lift(self, mats[2]);

        // divide out the lifted coordinate and solve the two pairwise
        // equality lines for the in-plane point
        let (l1, l2, l3) = if axis == 1 {
            (pl1 / pl1.y, pl2 / pl2.y, pl3 / pl3.y)
        } else {
            (pl1 / pl1.z, pl2 / pl2.z, pl3 / pl3.z)
        };
        let (row, col) = if axis == 1 { (0, 2) } else { (0, 1) };
        let a = [
            [l3[row] - l1[row], l3[col] - l1[col]],
            [l3[row] - l2[row], l3[col] - l2[col]],
        ];
        let b = [l1.w - l3.w, l2.w - l3.w];
        let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
        let flat = Vector2::new(
            (b[0] * a[1][1] - b[1] * a[0][1]) / det,
            (b[1] * a[0][0] - b[0] * a[1][0]) / det,
        );

        // lift the 2D point back onto the face plane
        let (origin, ray) = if axis == 1 {
            (Vector3::new(flat.x, 0.0, flat.y), Vector3::y())
        } else {
            (Vector3::new(flat.x, flat.y, 0.0), Vector3::z())
        };
        let mut result = match self.plane_intersect(verts[0], verts[1], verts[2], origin, ray) {
            Some(pt) => pt,
            None => {
                debug!("triple solve failed on face {}; using barycenter", f.0);
                (p[0] + p[1] + p[2]) / 3.0
            }
        };
        force_point_in_triangle(p[0], p[1], p[2], &mut result);

        let mut triple = Vertex::new(result, Order::Trip);
        triple.label = mats[0];
        for m in mats {
            triple.materials.insert(m);
        }
        self.lat[f].triple = Some(self.lat.verts.insert(triple));

        self.check_triple_violating_lattice(f);
    }

    pub fn compute_all_quads(&mut self) {
        let mut count = 0;
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..TETS_PER_CELL {
                let Some(ents) = self.lat.tree[cell].entities() else {
                    continue;
                };
                let Some(t) = ents.tets[slot] else {
                    self.boundary_gap();
                    continue;
                };
                if !self.lat[t].evaluated {
                    self.compute_quadruple(t);
                    count += usize::from(self.lat[t].quad.is_some());
                }
            }
        }
        self.lat.advance(Stage::QuadsComputed);
        info!("computed {count} quadruples");
    }

    /// Places the four-material point in a tet whose edges all carry cuts
    ///
    /// Solves the 4x4 material-value system for barycentric weights. A
    /// weight falling negative means the point left the tet through the
    /// face opposite that corner, so the quadruple adopts that face's
    /// triple instead.
    fn compute_quadruple(&mut self, t: TetId) {
        let adj = self.lat.adjacency_lists(t);
        let mut faces = adj.faces;
        // reorder so faces[i] is opposite verts[i]
        for j in 0..3 {
            for f in j..4 {
                if !self.lat.face_contains_vert(faces[f], adj.verts[j]) {
                    faces.swap(j, f);
                }
            }
        }

        self.lat[t].evaluated = true;
        let all_cut = adj.edges.iter().all(|&e| {
            self.lat[e]
                .cut
                .is_some_and(|c| self.lat.verts.order(c) == Order::Cut)
        });
        if !all_cut {
            return;
        }

        let p = adj.verts.map(|v| self.lat.verts.position(v));
        let mats = adj.verts.map(|v| self.lat.verts[v].label);
        let m = Matrix4::from_fn(|r, c| self.sample(p[r], mats[c]));

        let mut quad = Vertex::new(Vector3::zeros(), Order::Quad);
        quad.label = mats[0];
        for mat in mats {
            quad.materials.insert(mat);
        }

        let Some(inv) = m.try_inverse() else {
            debug!("quadruple solve singular in tet {}; using barycenter", t.0);
            quad.pos = (p[0] + p[1] + p[2] + p[3]) / 4.0;
            quad.pos_next = quad.pos;
            self.lat[t].quad = Some(self.lat.verts.insert(quad));
            return;
        };
        let slam = inv.tr_mul(&Vector4::repeat(1.0));
        let lambda = slam / slam.sum();

        // left the tet: collapse onto the triple of the opposite face
        for i in 0..4 {
            if lambda[i] < 0.0 {
                let Some(triple) = self.lat[faces[i]].triple else {
                    self.boundary_gap();
                    return;
                };
                quad.pos = self.lat.verts.position(triple);
                quad.pos_next = quad.pos;
                quad.violating = self.lat.verts[triple].violating;
                quad.closest_geometry = self.lat.verts[triple].closest_geometry;
                self.lat[t].quad = Some(self.lat.verts.insert(quad));
                return;
            }
        }

        quad.pos = p[3]
            + lambda[0] * (p[0] - p[3])
            + lambda[1] * (p[1] - p[3])
            + lambda[2] * (p[2] - p[3]);
        quad.pos_next = quad.pos;
        self.lat[t].quad = Some(self.lat.verts.insert(quad));

        self.check_quadruple_violating_lattice(t);
    }

    ////////////////////////////////////////////////////////////////////////
    // Violation tests against lattice vertices

    /// Re-checks a cut against both endpoint forbidden zones, with alpha
    /// scaled by the current edge length
    fn check_cut_violating_lattice(&mut self, e: EdgeId) {
        let cut = self.lat[e].cut.expect("edge has no cut");
        let (v1, v2) = (self.lat[e].v1, self.lat[e].v2);
        let a = self.lat.verts.position(v1);
        let b = self.lat.verts.position(v2);
        let c = self.lat.verts.position(cut);

        let t = (c - a).norm() / (b - a).norm();
        let alpha = self.lat.scaled_alpha(e);

        let (violating, geom) = if t <= alpha {
            (true, Some(GeometryRef::Vertex(v1)))
        } else if t >= 1.0 - alpha {
            (true, Some(GeometryRef::Vertex(v2)))
        } else {
            (false, self.lat.verts[cut].closest_geometry)
        };
        self.lat.verts[cut].violating = violating;
        self.lat.verts[cut].closest_geometry = geom;
    }

    /// Cone test deciding whether a triple sits inside the forbidden
    /// region of one of its face's corners
    fn check_triple_violating_lattice(&mut self, f: FaceId) {
        let triple = self.lat[f].triple.expect("face has no triple");
        self.lat.verts[triple].violating = false;
        self.lat.verts[triple].closest_geometry = None;

        let (verts, edges) = self.face_lists(f);
        let p = verts.map(|v| self.lat.verts.position(v));
        let tr = self.lat.verts.position(triple);

        for i in 0..3 {
            let (j, k) = match i {
                0 => (1, 2),
                1 => (2, 0),
                _ => (0, 1),
            };
            // cones toward each neighbor, viewed from the third corner
            let hit = [(j, k), (k, j)].iter().all(|&(o, w)| {
                let e = (p[i] - p[w]).normalize();
                let t = (tr - p[w]).normalize();
                let alpha = self.lat.scaled_alpha(edges[w]);
                let c = (p[i] * (1.0 - alpha) + alpha * p[o] - p[w]).normalize();
                e.dot(&t) >= e.dot(&c)
            });
            if hit {
                self.lat.verts[triple].violating = true;
                self.lat.verts[triple].closest_geometry = Some(GeometryRef::Vertex(verts[i]));
                return;
            }
        }
    }

    /// Three-plane test deciding whether a quadruple sits inside the
    /// forbidden region of one of its tet's corners
    fn check_quadruple_violating_lattice(&mut self, t: TetId) {
        let quad = self.lat[t].quad.expect("tet has no quadruple");
        self.lat.verts[quad].violating = false;

        let adj = self.lat.adjacency_lists(t);
        let p = adj.verts.map(|v| self.lat.verts.position(v));
        let q = self.lat.verts.position(quad);

        for (i, planes) in QUAD_CORNER_PLANES.iter().enumerate() {
            let inside = planes.iter().all(|&(e, to, (a, b))| {
                let alpha = self.lat.scaled_alpha(adj.edges[e]);
                let ev = (1.0 - alpha) * p[i] + alpha * p[to];
                let n = (p[a] - ev).cross(&(p[b] - ev)).normalize();
                n.dot(&(q - ev)) < 0.0
            });
            if inside {
                self.lat.verts[quad].violating = true;
                self.lat.verts[quad].closest_geometry = Some(GeometryRef::Vertex(adj.verts[i]));
                return;
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Generalization

    /// Fills every unused interface slot of every tet with the
    /// parity-correct lower-order stand-in, so later passes can treat all
    /// tets as fully cut
    pub fn generalize_tets(&mut self) {
        for list in [self.lat.cut_cells.clone(), self.lat.buffer_cells.clone()] {
            for cell in list {
                for slot in 0..TETS_PER_CELL {
                    let Some(t) = self.lat.tree[cell].entities().and_then(|e| e.tets[slot])
                    else {
                        continue;
                    };
                    self.generalize_tet(t);
                }
            }
        }
        self.lat.advance(Stage::Generalized);
        info!("tets generalized");
    }

    fn generalize_tet(&mut self, t: TetId) {
        if self.lat[t].quad.is_some() {
            // fully cut already; just record the key
            let edges = self.lat.edges_around_tet(t);
            self.lat[t].key = self.lat.key_from_adjacent_edges(&edges);
            return;
        }

        let adj = self.lat.adjacency_lists(t);
        let key = self.lat.key_from_adjacent_edges(&adj.edges);
        self.lat[t].key = key;
        assert!(is_key_valid(key), "invalid interface key {key}");

        let variant = if PARITY_FLIP[self.lat[t].tet_index] {
            Variant::Even
        } else {
            Variant::Odd
        };
        let row = stencils::generalization(key, variant);
        let v = self.lat.right_handed_vertex_list(t);

        let mut fill = [None; 11];
        for (i, f) in fill.iter_mut().enumerate() {
            *f = v[row[slot::AB + i]];
        }
        if fill.iter().any(|f| f.is_none()) {
            self.boundary_gap();
            return;
        }

        for (i, &e) in adj.edges.iter().enumerate() {
            let nv = fill[i].unwrap();
            if let Some(existing) = self.lat[e].cut {
                if existing != nv {
                    warn!("cut generalization disagrees with neighbor tet");
                }
            }
            self.lat[e].cut = Some(nv);
        }
        for (i, &f) in adj.faces.iter().enumerate() {
            let nv = fill[6 + i].unwrap();
            if let Some(existing) = self.lat[f].triple {
                if existing != nv {
                    warn!("triple generalization disagrees with neighbor tet");
                }
            }
            self.lat[f].triple = Some(nv);
        }
        self.lat[t].quad = fill[10];

        debug_assert!(
            self.lat
                .right_handed_vertex_list(t)
                .iter()
                .all(|s| s.is_some()),
            "tet failed to generalize"
        );
    }

    ////////////////////////////////////////////////////////////////////////
    // Phase 1: warp lattice vertices

    /// Warps every lattice vertex that has interface points inside its
    /// forbidden zone, snapping those points onto it
    pub fn warp_violating_cuts(&mut self) {
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..VERTS_PER_CELL {
                let Some(v) = self.lat.tree[cell].entities().and_then(|e| e.verts[slot])
                else {
                    continue;
                };
                if !self.lat.verts[v].warped {
                    self.warp_vertex(v);
                }
            }
        }
        // buffer cells only carry cuts on their central edges, so only
        // the dual vertex can be violated
        for n in 0..self.lat.buffer_cells.len() {
            let cell = self.lat.buffer_cells[n];
            let Some(v) = self.lat.tree[cell]
                .entities()
                .and_then(|e| e.verts[vtx::C])
            else {
                continue;
            };
            if !self.lat.verts[v].warped {
                self.warp_vertex(v);
            }
        }
        self.lat.advance(Stage::CutsWarped);
        info!("phase 1 complete");
    }

    fn warp_vertex(&mut self, vertex: VertexId) {
        self.lat.verts[vertex].warped = true;

        let mut viol_edges = Vec::new();
        let mut part_edges = Vec::new();
        for e in self.lat.edges_around_vertex(vertex).into_iter().flatten() {
            let Some(cut) = self.lat[e].cut else { continue };
            if self.lat.verts.order(cut) != Order::Cut {
                continue;
            }
            let v = &self.lat.verts[cut];
            if v.violating && v.closest_geometry == Some(GeometryRef::Vertex(vertex)) {
                viol_edges.push(e);
            } else {
                part_edges.push(e);
            }
        }

        let mut viol_faces = Vec::new();
        let mut part_faces = Vec::new();
        for f in self.lat.faces_around_vertex(vertex).into_iter().flatten() {
            let Some(triple) = self.lat[f].triple else { continue };
            if self.lat.verts.order(triple) != Order::Trip {
                continue;
            }
            let v = &self.lat.verts[triple];
            if v.violating && v.closest_geometry == Some(GeometryRef::Vertex(vertex)) {
                viol_faces.push(f);
            } else {
                part_faces.push(f);
            }
        }

        let mut viol_tets = Vec::new();
        let mut part_tets = Vec::new();
        for t in self.lat.tets_around_vertex(vertex).into_iter().flatten() {
            let Some(quad) = self.lat[t].quad else { continue };
            if self.lat.verts.order(quad) != Order::Quad {
                continue;
            }
            let v = &self.lat.verts[quad];
            if v.violating && v.closest_geometry == Some(GeometryRef::Vertex(vertex)) {
                viol_tets.push(t);
            } else {
                part_tets.push(t);
            }
        }

        if viol_edges.is_empty() && viol_faces.is_empty() && viol_tets.is_empty() {
            return;
        }

        let warp_point = if viol_tets.len() == 1 {
            self.lat.verts.position(self.lat[viol_tets[0]].quad.unwrap())
        } else if viol_faces.len() == 1 {
            self.lat.verts.position(self.lat[viol_faces[0]].triple.unwrap())
        } else {
            self.center_of_mass(&viol_edges, &viol_faces, &viol_tets)
        };

        // stage new positions for everything that survives the warp
        for &t in &part_tets {
            self.conform_quadruple(t, vertex, warp_point);
        }
        for &f in &part_faces {
            let triple = self.lat[f].triple.unwrap();
            if self.lat.verts.order(triple) != Order::Trip {
                continue;
            }
            self.stage_triple(f, triple, vertex, warp_point);
        }
        for &e in &part_edges {
            let cut = self.lat[e].cut.unwrap();
            if self.lat.verts.order(cut) != Order::Cut {
                continue;
            }
            self.stage_cut(e, cut, vertex, warp_point);
        }

        // move everything and re-check the survivors
        self.lat.verts.set_position(vertex, warp_point);
        for &e in &part_edges {
            let cut = self.lat[e].cut.unwrap();
            if self.lat.verts.order(cut) == Order::Cut {
                let next = self.lat.verts.position_next(cut);
                self.lat.verts.set_position(cut, next);
                self.check_cut_violating_lattice(e);
            }
        }
        for &f in &part_faces {
            let triple = self.lat[f].triple.unwrap();
            if self.lat.verts.order(triple) == Order::Trip {
                let next = self.lat.verts.position_next(triple);
                self.lat.verts.set_position(triple, next);
                self.check_triple_violating_lattice(f);
            }
        }
        for &t in &part_tets {
            let quad = self.lat[t].quad.unwrap();
            if self.lat.verts.order(quad) == Order::Quad {
                let next = self.lat.verts.position_next(quad);
                self.lat.verts.set_position(quad, next);
                self.check_quadruple_violating_lattice(t);
            }
        }

        // cuts that divide the same material pair as a violating cut have
        // merged interfaces; snap them in too
        for &e in &part_edges {
            let cut = self.lat[e].cut.unwrap();
            if self.lat.verts.order(cut) != Order::Cut {
                continue;
            }
            let mats = self.lat.verts[cut].materials;
            let affected = viol_edges.iter().any(|&ve| {
                let vc = self.lat[ve].cut.unwrap();
                self.lat.verts[vc].materials == mats
            });
            if affected {
                self.snap_cut(e, vertex);
            }
        }

        // projections that landed in a forbidden zone collapse now
        for &e in &part_edges {
            let cut = self.lat[e].cut.unwrap();
            if self.lat.verts.order(cut) != Order::Cut || !self.lat.verts[cut].violating {
                continue;
            }
            match self.lat.verts[cut].closest_geometry {
                Some(GeometryRef::Vertex(w)) if w == vertex => {
                    self.snap_cut(e, vertex);
                }
                Some(GeometryRef::Vertex(w)) if self.lat.verts[w].warped => {
                    self.snap_cut(e, w);
                    self.resolve_degeneracies_around_vertex(w);
                }
                // otherwise the other vertex warps later and picks it up
                _ => {}
            }
        }
        for &f in &part_faces {
            let triple = self.lat[f].triple.unwrap();
            if self.lat.verts.order(triple) != Order::Trip || !self.lat.verts[triple].violating {
                continue;
            }
            match self.lat.verts[triple].closest_geometry {
                Some(GeometryRef::Vertex(w)) if w == vertex => {
                    self.snap_triple(f, vertex);
                }
                Some(GeometryRef::Vertex(w)) if self.lat.verts[w].warped => {
                    self.snap_triple(f, w);
                    self.resolve_degeneracies_around_vertex(w);
                }
                _ => {}
            }
        }
        for &t in &part_tets {
            let quad = self.lat[t].quad.unwrap();
            if self.lat.verts.order(quad) == Order::Quad
                && self.lat.verts[quad].violating
                && self.lat.verts[quad].closest_geometry == Some(GeometryRef::Vertex(vertex))
            {
                self.snap_quad(t, vertex);
            }
        }

        for &e in &viol_edges {
            self.snap_cut(e, vertex);
        }
        for &f in &viol_faces {
            self.snap_triple(f, vertex);
        }
        for &t in &viol_tets {
            self.snap_quad(t, vertex);
        }

        self.resolve_degeneracies_around_vertex(vertex);
    }

    /// Average position of all violating interface points around a vertex
    fn center_of_mass(&self, edges: &[EdgeId], faces: &[FaceId], tets: &[TetId]) -> Vector3<f64> {
        let mut c = Vector3::zeros();
        for &e in edges {
            c += self.lat.verts.position(self.lat[e].cut.unwrap());
        }
        for &f in faces {
            c += self.lat.verts.position(self.lat[f].triple.unwrap());
        }
        for &t in tets {
            c += self.lat.verts.position(self.lat[t].quad.unwrap());
        }
        c / (edges.len() + faces.len() + tets.len()) as f64
    }

    /// Stages the post-warp position of a surviving triple
    fn stage_triple(&mut self, f: FaceId, triple: VertexId, vertex: VertexId, warp_pt: Vector3<f64>) {
        let inner = self.lat.inner_tet_of_face(f, warp_pt);
        let q = inner.and_then(|t| self.lat[t].quad);
        let (Some(inner), Some(q)) = (inner, q) else {
            self.boundary_gap();
            let pos = self.lat.verts.position(triple);
            self.lat.verts.set_position_next(triple, pos);
            self.conform_triple(f, vertex, warp_pt);
            return;
        };

        let edges = self.lat.edges_around_face(f);
        if self.lat.verts.same_vertex(q, triple) {
            // the triple doubles as the inner quadruple
            self.conform_quadruple(inner, vertex, warp_pt);
        } else if self.lat.verts.order(q) == Order::Quad
            && self.lat.verts[q].conformed_face == Some(f)
        {
            let next = self.lat.verts.position_next(q);
            self.lat.verts.set_position_next(triple, next);
            self.lat.verts[triple].conformed_edge = None;
        } else if self.lat.verts.order(q) == Order::Quad
            && self.lat.verts[q]
                .conformed_edge
                .is_some_and(|e| edges.contains(&e))
        {
            let next = self.lat.verts.position_next(q);
            self.lat.verts.set_position_next(triple, next);
            self.lat.verts[triple].conformed_edge = self.lat.verts[q].conformed_edge;
        } else {
            let projected = self.project_triple(f, q, vertex, warp_pt);
            self.lat.verts.set_position_next(triple, projected);
            self.conform_triple(f, vertex, warp_pt);
        }
    }

    /// Stages the post-warp position of a surviving cut
    fn stage_cut(&mut self, e: EdgeId, cut: VertexId, vertex: VertexId, warp_pt: Vector3<f64>) {
        // a triple that conformed onto this edge carries the cut with it
        for f in self.lat.faces_around_edge(e) {
            let Some(triple) = self.lat[f].triple else { continue };
            if self.lat.verts.order(triple) == Order::Trip
                && self.lat.verts[triple].conformed_edge == Some(e)
            {
                let next = self.lat.verts.position_next(triple);
                self.lat.verts.set_position_next(cut, next);
                return;
            }
        }

        let projected = match self.lat.inner_tet_of_edge(e, warp_pt) {
            Some(t) => self.project_cut(e, t, vertex, warp_pt),
            None => {
                self.boundary_gap();
                self.lat.verts.position(cut)
            }
        };
        self.lat.verts.set_position_next(cut, projected);
    }

    /// Clamps a warped quadruple back into its tet by zeroing negative
    /// barycentric weights, recording what it collapsed onto
    fn conform_quadruple(&mut self, t: TetId, vertex: VertexId, warp_pt: Vector3<f64>) {
        const EPS: f64 = 1e-3;

        let quad = self.lat[t].quad.expect("tet has no quadruple");
        let adj = self.lat.adjacency_lists(t);
        let mut verts = adj.verts;
        for i in 0..4 {
            if verts[i] == vertex {
                verts.swap(0, i);
                break;
            }
        }

        self.lat.verts[quad].conformed_face = None;
        self.lat.verts[quad].conformed_edge = None;
        self.lat.verts[quad].conformed_vertex = None;

        let pos = self.lat.verts.position(quad);
        let p1 = warp_pt;
        let p2 = self.lat.verts.position(verts[1]);
        let p3 = self.lat.verts.position(verts[2]);
        let p4 = self.lat.verts.position(verts[3]);

        let a = Matrix3::from_columns(&[p1 - p4, p2 - p4, p3 - p4]);
        let Some(inv) = a.try_inverse() else {
            self.lat.verts.set_position_next(quad, pos);
            return;
        };
        let mut l = inv * (pos - p4);
        let mut lw = 1.0 - l.sum();

        // conformed edge between the two surviving corners, or face
        // opposite the single dropped one
        let edge_between = |this: &Self, a: VertexId, b: VertexId| {
            adj.edges
                .iter()
                .copied()
                .find(|&e| this.lat[e].touches_both(a, b))
        };
        let face_opposite = |this: &Self, v: VertexId| {
            adj.faces
                .iter()
                .copied()
                .find(|&f| !this.lat.face_contains_vert(f, v))
        };

        if l.x < EPS {
            if l.y < EPS {
                l.x = 0.0;
                l.y = 0.0;
                self.lat.verts[quad].conformed_edge = edge_between(self, verts[2], verts[3]);
            } else if l.z < EPS {
                l.x = 0.0;
                l.z = 0.0;
                self.lat.verts[quad].conformed_edge = edge_between(self, verts[1], verts[3]);
            } else if lw < EPS {
                l.x = 0.0;
                lw = 0.0;
                self.lat.verts[quad].conformed_edge = edge_between(self, verts[1], verts[2]);
            } else {
                l.x = 0.0;
                self.lat.verts[quad].conformed_face = face_opposite(self, verts[0]);
            }
        } else if l.y < EPS {
            if l.z < EPS {
                l.y = 0.0;
                l.z = 0.0;
                self.lat.verts[quad].conformed_edge = edge_between(self, verts[0], verts[3]);
            } else if lw < EPS {
                l.y = 0.0;
                lw = 0.0;
                self.lat.verts[quad].conformed_edge = edge_between(self, verts[0], verts[2]);
            } else {
                l.y = 0.0;
                self.lat.verts[quad].conformed_face = face_opposite(self, verts[1]);
            }
        } else if l.z < EPS {
            if lw < EPS {
                l.z = 0.0;
                lw = 0.0;
                self.lat.verts[quad].conformed_edge = edge_between(self, verts[0], verts[1]);
            } else {
                l.z = 0.0;
                self.lat.verts[quad].conformed_face = face_opposite(self, verts[2]);
            }
        } else if lw < EPS {
            lw = 0.0;
            self.lat.verts[quad].conformed_face = face_opposite(self, verts[3]);
        }

        let total = l.sum() + lw;
        l /= total;

        let next = l.x * p1 + l.y * p2 + l.z * p3 + (1.0 - l.sum()) * p4;
        self.lat.verts.set_position_next(quad, next);
    }

    /// Intersects the triple-to-quadruple interface segment with the
    /// post-warp face plane
    fn project_triple(
        &mut self,
        f: FaceId,
        quad: VertexId,
        vertex: VertexId,
        warp_pt: Vector3<f64>,
    ) -> Vector3<f64> {
        let triple = self.lat[f].triple.expect("face has no triple");
        let mut verts = self.lat.verts_around_face(f);
        for i in 0..3 {
            if verts[i] == vertex {
                verts.swap(0, i);
                break;
            }
        }

        let p0 = warp_pt;
        let p1 = self.lat.verts.position(verts[1]);
        let p2 = self.lat.verts.position(verts[2]);
        let n = (p1 - p0).cross(&(p2 - p0)).normalize();
        let ia = self.lat.verts.position(triple);
        let ib = self.lat.verts.position(quad);
        let l = ib - ia;

        // interface collapsed or parallel to the face
        if l.norm() < 1e-5 || l.dot(&n) == 0.0 {
            return ia;
        }
        let d = (p0 - ia).dot(&n) / l.dot(&n);
        ia + d * l
    }

    /// Clamps a warped triple back into its face by zeroing negative
    /// barycentric weights, recording the edge it collapsed onto
    fn conform_triple(&mut self, f: FaceId, vertex: VertexId, warp_pt: Vector3<f64>) {
        const EPS: f64 = 1e-3;

        let triple = self.lat[f].triple.expect("face has no triple");
        let (averts, aedges) = self.face_lists(f);
        let mut verts = averts;
        for i in 0..3 {
            if verts[i] == vertex {
                verts.swap(0, i);
                break;
            }
        }

        let pos = self.lat.verts.position_next(triple);
        let p1 = warp_pt;
        let p2 = self.lat.verts.position(verts[1]);
        let p3 = self.lat.verts.position(verts[2]);
        let p4 = p1
            + (p3 - p1)
                .normalize()
                .cross(&(p2 - p1).normalize())
                .normalize();

        let a = Matrix3::from_columns(&[p1 - p4, p2 - p4, p3 - p4]);
        let Some(inv) = a.try_inverse() else {
            self.lat.verts.set_position_next(triple, pos);
            return;
        };
        let mut l = inv * (pos - p4);

        let edge_between = |this: &Self, a: VertexId, b: VertexId| {
            aedges
                .iter()
                .copied()
                .find(|&e| this.lat[e].touches_both(a, b))
        };

        if l.x < EPS {
            l.x = 0.0;
            self.lat.verts[triple].conformed_edge = edge_between(self, verts[1], verts[2]);
        } else if l.y < EPS {
            l.y = 0.0;
            self.lat.verts[triple].conformed_edge = edge_between(self, verts[0], verts[2]);
        } else if l.z < EPS {
            l.z = 0.0;
            self.lat.verts[triple].conformed_edge = edge_between(self, verts[0], verts[1]);
        } else {
            self.lat.verts[triple].conformed_edge = None;
        }

        l /= l.x.abs() + l.y.abs() + l.z.abs();
        let next = l.x * p1 + l.y * p2 + l.z * p3;
        self.lat.verts.set_position_next(triple, next);
    }

    /// Projects a surviving cut onto the warped interface by casting the
    /// warped edge through the tet's interface triangles
    fn project_cut(
        &mut self,
        e: EdgeId,
        t: TetId,
        vertex: VertexId,
        warp_pt: Vector3<f64>,
    ) -> Vector3<f64> {
        let cut = self.lat[e].cut.expect("edge has no cut");
        let quad = self.lat[t].quad.expect("tet has no quadruple");
        let verts = self.lat.right_handed_vertex_list(t);

        let static_vertex = self.lat[e].opposite(vertex);
        let static_pt = self.lat.verts.position(static_vertex);
        let ray = (warp_pt - static_pt).normalize();
        let cut_pos = self.lat.verts.position(cut);

        let variant = if PARITY_FLIP[self.lat[t].tet_index] {
            Variant::Even
        } else {
            Variant::Odd
        };

        // only triangles that touch the cut can carry it
        let mut best: Option<(Vector3<f64>, f64)> = None;
        for pair in stencils::interface_pairs(self.lat[t].key, variant) {
            let (Some(v1), Some(v2)) = (verts[pair[0]], verts[pair[1]]) else {
                continue;
            };
            let touches = [v1, v2, quad].iter().any(|&v| {
                self.lat.verts.same_vertex(v, cut)
                    || (self.lat.verts.position(v) - cut_pos).norm() < 1e-7
            });
            if !touches {
                continue;
            }
            if let Some((pt, err)) = self.triangle_intersect(v1, v2, quad, static_pt, ray) {
                if best.is_none_or(|(_, e0)| err < e0) {
                    best = Some((pt, err));
                }
            }
        }

        let pt = match best {
            Some((pt, _)) => pt,
            None => cut_pos,
        };

        // keep the cut on its (warped) edge segment
        let t1 = (pt - static_pt)
            .dot(&ray)
            .clamp(0.0, (warp_pt - static_pt).norm());
        static_pt + t1 * ray
    }

    /// Ray-triangle intersection that tolerates misses: the plane hit is
    /// clamped into the triangle and projected back onto the ray, and the
    /// clamping distance comes back as an error measure
    fn triangle_intersect(
        &self,
        v1: VertexId,
        v2: VertexId,
        v3: VertexId,
        origin: Vector3<f64>,
        ray: Vector3<f64>,
    ) -> Option<(Vector3<f64>, f64)> {
        let pt = self.plane_intersect(v1, v2, v3, origin, ray)?;

        let p1 = self.lat.verts.position(v1);
        let p2 = self.lat.verts.position(v2);
        let p3 = self.lat.verts.position(v3);
        let p4 = p1
            + (p3 - p1)
                .normalize()
                .cross(&(p2 - p1).normalize())
                .normalize();

        let a = Matrix3::from_columns(&[p1 - p4, p2 - p4, p3 - p4]);
        let inv = a.try_inverse()?;
        let mut l = inv * (pt - p4);

        l.x = l.x.max(0.0);
        l.y = l.y.max(0.0);
        l.z = l.z.max(0.0);
        l /= l.sum();
        let tri_pt = l.x * p1 + l.y * p2 + l.z * p3;

        // project the clamped point back onto the ray
        let t = (tri_pt - origin).dot(&ray) / ray.dot(&ray);
        let out = origin + t * ray;
        let error = (tri_pt - out).norm();
        if !out.iter().all(|c| c.is_finite()) {
            return None;
        }
        Some((out, error))
    }

    /// Ray-plane intersection through a triangle's plane; `None` for
    /// degenerate triangles or parallel rays
    fn plane_intersect(
        &self,
        v1: VertexId,
        v2: VertexId,
        v3: VertexId,
        origin: Vector3<f64>,
        ray: Vector3<f64>,
    ) -> Option<Vector3<f64>> {
        const EPS: f64 = 1e-7;
        if self.lat.verts.same_vertex(v1, v2)
            || self.lat.verts.same_vertex(v2, v3)
            || self.lat.verts.same_vertex(v1, v3)
        {
            return None;
        }
        let p1 = self.lat.verts.position(v1);
        let p2 = self.lat.verts.position(v2);
        let p3 = self.lat.verts.position(v3);
        if (p1 - p2).norm() < EPS || (p2 - p3).norm() < EPS || (p1 - p3).norm() < EPS {
            return None;
        }

        let n = (p3 - p1)
            .normalize()
            .cross(&(p2 - p1).normalize())
            .normalize();
        let t = n.dot(&(p1 - origin)) / n.dot(&ray);
        let pt = origin + t * ray;
        pt.iter().all(|c| c.is_finite()).then_some(pt)
    }

    ////////////////////////////////////////////////////////////////////////
    // Phase 2: triples violating edges

    pub fn detect_triples_violating_edges(&mut self) {
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..FACES_PER_CELL {
                let Some(f) = self.lat.tree[cell].entities().and_then(|e| e.faces[slot])
                else {
                    continue;
                };
                self.check_triple_violating_edges(f);
            }
        }
    }

    /// Cone test deciding whether a triple crowds one of its face's
    /// edges; the nearest (smallest-angle) edge wins
    fn check_triple_violating_edges(&mut self, f: FaceId) {
        let Some(triple) = self.lat[f].triple else { return };
        if self.lat.verts.order(triple) != Order::Trip {
            return;
        }
        self.lat.verts[triple].violating = false;

        let (verts, edges) = self.face_lists(f);
        let p = verts.map(|v| self.lat.verts.position(v));
        let tr = self.lat.verts.position(triple);

        let mut best: Option<(usize, f64)> = None;
        for i in 0..3 {
            let (a, b) = match i {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            // cones at both endpoints, opening toward the opposite corner
            let mut dots = [0.0; 2];
            let mut outside = false;
            for (n, &(from, other)) in [(a, b), (b, a)].iter().enumerate() {
                let e = (p[other] - p[from]).normalize();
                let t = (tr - p[from]).normalize();
                let alpha = self.lat.scaled_alpha(edges[from]);
                let c = (p[other] * (1.0 - alpha) + alpha * p[i] - p[from]).normalize();
                dots[n] = e.dot(&t);
                outside |= e.dot(&t) > e.dot(&c);
            }
            if outside {
                let d = dots[0].max(dots[1]).clamp(-1.0, 1.0).acos();
                if best.is_none_or(|(_, d0)| d < d0) {
                    best = Some((i, d));
                }
            }
        }

        if let Some((i, _)) = best {
            self.lat.verts[triple].violating = true;
            self.lat.verts[triple].closest_geometry = Some(GeometryRef::Edge(edges[i]));
        }
    }

    pub fn detect_quads_violating_edges(&mut self) {
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..TETS_PER_CELL {
                let Some(t) = self.lat.tree[cell].entities().and_then(|e| e.tets[slot])
                else {
                    continue;
                };
                self.check_quadruple_violating_edges(t);
            }
        }
    }

    /// Two-plane test deciding whether a quadruple crowds one of its
    /// tet's edges
    fn check_quadruple_violating_edges(&mut self, t: TetId) {
        let Some(quad) = self.lat[t].quad else { return };
        if self.lat.verts.order(quad) != Order::Quad {
            return;
        }
        self.lat.verts[quad].violating = false;

        let adj = self.lat.adjacency_lists(t);
        let p = adj.verts.map(|v| self.lat.verts.position(v));
        let q = self.lat.verts.position(quad);

        for (i, planes) in QUAD_EDGE_PLANES.iter().enumerate() {
            let crossed = planes.iter().all(|plane| {
                let c = plane.cones.map(|(e, to)| {
                    let alpha = self.lat.scaled_alpha(adj.edges[e]);
                    (1.0 - alpha) * p[plane.base] + alpha * p[to]
                });
                let apex = p[plane.apex];
                let n = if plane.flipped {
                    (c[1] - apex).cross(&(c[0] - apex))
                } else {
                    (c[0] - apex).cross(&(c[1] - apex))
                }
                .normalize();
                n.dot(&(q - apex)) > 0.0
            });
            if crossed {
                self.lat.verts[quad].violating = true;
                self.lat.verts[quad].closest_geometry = Some(GeometryRef::Edge(adj.edges[i]));
                return;
            }
        }
    }

    /// Snaps every edge-violating triple onto its edge's cut and settles
    /// the fallout
    pub fn warp_violating_triples(&mut self) {
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..EDGES_PER_CELL {
                let Some(e) = self.lat.tree[cell].entities().and_then(|c| c.edges[slot])
                else {
                    continue;
                };
                self.warp_edge(e);
            }
        }
        self.lat.advance(Stage::TriplesWarped);
        info!("phase 2 complete");
    }

    fn warp_edge(&mut self, e: EdgeId) {
        let Some(cut) = self.lat[e].cut else { return };

        for f in self.lat.faces_around_edge(e) {
            let Some(triple) = self.lat[f].triple else { continue };
            if self.lat.verts.order(triple) == Order::Trip
                && self.lat.verts[triple].violating
                && self.lat.verts[triple].closest_geometry == Some(GeometryRef::Edge(e))
            {
                self.snap_triple(f, cut);
            }
        }

        if self.lat.verts.order(cut) == Order::Vert {
            let root = self.lat.verts.root(cut);
            self.resolve_degeneracies_around_vertex(root);
        } else {
            self.resolve_degeneracies_around_edge(e);
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Phase 3: quadruples violating faces

    pub fn detect_quads_violating_faces(&mut self) {
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..TETS_PER_CELL {
                let Some(t) = self.lat.tree[cell].entities().and_then(|e| e.tets[slot])
                else {
                    continue;
                };
                self.check_quadruple_violating_faces(t);
            }
        }
    }

    /// Three-plane test deciding whether a quadruple crowds one of its
    /// tet's faces
    fn check_quadruple_violating_faces(&mut self, t: TetId) {
        let Some(quad) = self.lat[t].quad else { return };
        if self.lat.verts.order(quad) != Order::Quad {
            return;
        }
        self.lat.verts[quad].violating = false;

        let adj = self.lat.adjacency_lists(t);
        let p = adj.verts.map(|v| self.lat.verts.position(v));
        let q = self.lat.verts.position(quad);

        for (i, cone) in QUAD_FACE_CONES.iter().enumerate() {
            let c: Vec<Vector3<f64>> = cone
                .corners
                .iter()
                .zip(&cone.edges)
                .map(|(&corner, &e)| {
                    let alpha = self.lat.scaled_alpha(adj.edges[e]);
                    (1.0 - alpha) * p[corner] + alpha * p[cone.far]
                })
                .collect();

            let inside = (0..3).all(|n| {
                let v = p[cone.corners[n]];
                let (x, y) = (c[(n + 1) % 3], c[(n + 2) % 3]);
                let normal = if cone.anti {
                    (y - v).cross(&(x - v))
                } else {
                    (x - v).cross(&(y - v))
                }
                .normalize();
                normal.dot(&(q - v)) < 0.0
            });
            if inside {
                self.lat.verts[quad].violating = true;
                self.lat.verts[quad].closest_geometry = Some(GeometryRef::Face(adj.faces[i]));
                return;
            }
        }
    }

    /// Snaps every face-violating quadruple onto its face's triple and
    /// propagates through whatever the triple already snapped to
    pub fn warp_violating_quads(&mut self) {
        for n in 0..self.lat.cut_cells.len() {
            let cell = self.lat.cut_cells[n];
            for slot in 0..FACES_PER_CELL {
                let Some(f) = self.lat.tree[cell].entities().and_then(|e| e.faces[slot])
                else {
                    continue;
                };
                self.warp_face_quads(f);
            }
        }
        self.lat.advance(Stage::QuadsWarped);
        info!("phase 3 complete");
    }

    fn warp_face_quads(&mut self, f: FaceId) {
        for t in self.lat.try_tets_around_face(f).into_iter().flatten() {
            let Some(quad) = self.lat[t].quad else { continue };
            if self.lat.verts.order(quad) != Order::Quad
                || !self.lat.verts[quad].violating
                || self.lat.verts[quad].closest_geometry != Some(GeometryRef::Face(f))
            {
                continue;
            }
            let Some(triple) = self.lat[f].triple else { continue };
            self.snap_quad(t, triple);

            let quad = self.lat[t].quad.unwrap();
            match self.lat.verts.order(quad) {
                Order::Vert => {
                    let root = self.lat.verts.root(quad);
                    self.resolve_degeneracies_around_vertex(root);
                }
                Order::Cut => {
                    for e in self.lat.edges_around_face(f) {
                        let cut = self.lat[e].cut;
                        if cut.is_some_and(|c| self.lat.verts.same_vertex(c, quad)) {
                            self.snap_quad_to_edge(t, e);
                            self.resolve_degeneracies_around_edge(e);
                        }
                    }
                }
                Order::Trip => {}
                Order::Quad => {
                    panic!("quadruple unresolved after snapping to its face triple")
                }
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Snapping and degeneracy resolution

    /// Merges an edge's cut into `target`: an original cut re-parents,
    /// while an aliased slot just rewrites
    fn snap_cut(&mut self, e: EdgeId, target: VertexId) {
        let cut = self.lat[e].cut.expect("edge has no cut");
        if self.lat.verts.same_vertex(cut, target) {
            return;
        }
        if self.lat.verts.original_order(cut) == Order::Cut {
            self.lat.verts.snap(cut, target);
        } else {
            self.lat[e].cut = Some(target);
        }
    }

    fn snap_triple(&mut self, f: FaceId, target: VertexId) {
        let triple = self.lat[f].triple.expect("face has no triple");
        if self.lat.verts.same_vertex(triple, target) {
            return;
        }
        if self.lat.verts.original_order(triple) == Order::Trip {
            self.lat.verts.snap(triple, target);
        } else {
            self.lat[f].triple = Some(target);
        }
    }

    fn snap_quad(&mut self, t: TetId, target: VertexId) {
        let quad = self.lat[t].quad.expect("tet has no quadruple");
        if self.lat.verts.same_vertex(quad, target) {
            return;
        }
        if self.lat.verts.original_order(quad) == Order::Quad {
            self.lat.verts.snap(quad, target);
        } else {
            self.lat[t].quad = Some(target);
        }
    }

    /// Snaps a quadruple onto an edge's cut, collapsing the two adjacent
    /// triples; if a neighboring tet's quadruple rode on one of those
    /// triples the collapse recurses across the face
    fn snap_quad_to_edge(&mut self, t: TetId, e: EdgeId) {
        let cut = self.lat[e].cut.expect("edge has no cut");
        let quad = self.lat[t].quad.expect("tet has no quadruple");
        if !self.lat.verts.same_vertex(quad, cut) {
            self.snap_quad(t, cut);
        }

        for f in self.lat.faces_around_edge_on_tet(t, e) {
            let Some(triple) = self.lat[f].triple else { continue };
            match self.lat.verts.order(triple) {
                Order::Trip => {
                    self.snap_triple(f, cut);
                    if let Some(op) = self.lat.opposite_tet(t, f) {
                        let oq = self.lat[op].quad;
                        if oq.is_some_and(|q| self.lat.verts.same_vertex(q, triple)) {
                            self.snap_quad_to_edge(op, e);
                        }
                    }
                }
                Order::Cut if !self.lat.verts.same_vertex(triple, cut) => {
                    if let Some(op) = self.lat.opposite_tet(t, f) {
                        let oq = self.lat[op].quad;
                        if oq.is_some_and(|q| self.lat.verts.same_vertex(q, triple)) {
                            self.snap_quad_to_edge(op, e);
                        }
                    }
                    self.snap_triple(f, cut);
                }
                _ => {}
            }
        }
    }

    /// Collapses every interface point around `vertex` that the snaps so
    /// far have made degenerate, iterating to a fixed point
    fn resolve_degeneracies_around_vertex(&mut self, vertex: VertexId) {
        let faces = self.lat.faces_around_vertex(vertex);
        let tets = self.lat.tets_around_vertex(vertex);

        let mut changed = true;
        while changed {
            changed = false;

            // cuts and triples must follow a quadruple sitting on the vertex
            for t in tets.into_iter().flatten() {
                let Some(quad) = self.lat[t].quad else { continue };
                if !self.lat.verts.same_vertex(quad, vertex) {
                    continue;
                }
                for e in self.lat.edges_around_tet(t) {
                    let Some(cut) = self.lat[e].cut else { continue };
                    if self.lat.verts.order(cut) == Order::Cut && self.lat[e].touches(vertex) {
                        self.snap_cut(e, vertex);
                        changed = true;
                    }
                }
                for f in self.lat.faces_around_tet(t) {
                    let Some(triple) = self.lat[f].triple else { continue };
                    if self.lat.verts.order(triple) == Order::Trip
                        && self.lat.verts_around_face(f).contains(&vertex)
                    {
                        self.snap_triple(f, vertex);
                        changed = true;
                    }
                }
            }

            // cuts must follow a triple sitting on the vertex
            for f in faces.into_iter().flatten() {
                let Some(triple) = self.lat[f].triple else { continue };
                if !self.lat.verts.same_vertex(triple, vertex) {
                    continue;
                }
                for e in self.lat.edges_around_face(f) {
                    let Some(cut) = self.lat[e].cut else { continue };
                    if self.lat.verts.order(cut) == Order::Cut && self.lat[e].touches(vertex) {
                        self.snap_cut(e, vertex);
                        changed = true;
                    }
                }
            }

            // a triple with two of its cuts on the vertex is degenerate
            for f in faces.into_iter().flatten() {
                let Some(triple) = self.lat[f].triple else { continue };
                if self.lat.verts.order(triple) != Order::Trip {
                    continue;
                }
                let count = self
                    .lat
                    .edges_around_face(f)
                    .iter()
                    .filter(|&&e| {
                        self.lat[e]
                            .cut
                            .is_some_and(|c| self.lat.verts.same_vertex(c, vertex))
                    })
                    .count();
                if count == 2 {
                    self.snap_triple(f, vertex);
                    changed = true;
                }
            }

            // a quadruple with three of its triples on the vertex is too
            for t in tets.into_iter().flatten() {
                let Some(quad) = self.lat[t].quad else { continue };
                if self.lat.verts.order(quad) != Order::Quad {
                    continue;
                }
                let count = self
                    .lat
                    .faces_around_tet(t)
                    .iter()
                    .filter(|&&f| {
                        self.lat[f]
                            .triple
                            .is_some_and(|tr| self.lat.verts.same_vertex(tr, vertex))
                    })
                    .count();
                if count == 3 {
                    self.snap_quad(t, vertex);
                    changed = true;
                }
            }
        }
    }

    /// Collapses quadruples that the snaps so far have left degenerate
    /// around an edge's cut
    fn resolve_degeneracies_around_edge(&mut self, e: EdgeId) {
        let cut = self.lat[e].cut.expect("edge has no cut");
        let tets = self.lat.tets_around_edge(e);

        for &t in &tets {
            let Some(quad) = self.lat[t].quad else { continue };
            if self.lat.verts.same_vertex(quad, cut) {
                self.snap_quad_to_edge(t, e);
            }
        }

        for &t in &tets {
            let Some(quad) = self.lat[t].quad else { continue };
            if self.lat.verts.order(quad) != Order::Quad {
                continue;
            }
            let count = self
                .lat
                .faces_around_tet(t)
                .iter()
                .filter(|&&f| {
                    self.lat[f]
                        .triple
                        .is_some_and(|tr| self.lat.verts.same_vertex(tr, cut))
                })
                .count();
            if count == 2 {
                self.snap_quad_to_edge(t, e);
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Stenciling

    /// Emits output tets for every cut and buffer tet through the case
    /// stencils
    pub fn fill_all_stencils(&mut self) {
        let before = self.lat.tree.tets.len();
        for list in [self.lat.cut_cells.clone(), self.lat.buffer_cells.clone()] {
            for cell in list {
                for slot in 0..TETS_PER_CELL {
                    let Some(t) = self.lat.tree[cell].entities().and_then(|e| e.tets[slot])
                    else {
                        continue;
                    };
                    if !self.lat[t].stenciled {
                        self.fill_stencil(t);
                    }
                }
            }
        }
        self.lat.advance(Stage::Stenciled);
        info!(
            "stenciling emitted {} tets",
            self.lat.tree.tets.len() - before
        );
    }

    /// Emits the stencil tets of a single lattice tet
    ///
    /// Every tet uses the fully-cut stencil: slots that were generalized
    /// or snapped resolve to shared roots, and micro-tets with a repeated
    /// root collapse to nothing and are skipped.
    fn fill_stencil(&mut self, t: TetId) {
        self.lat[t].stenciled = true;

        let slots = self.lat.right_handed_vertex_list(t);
        if slots.iter().any(|s| s.is_none()) {
            self.boundary_gap();
            return;
        }
        let roots = slots.map(|s| self.lat.verts.root(s.unwrap()));

        // stencil and material parities are wired opposite the
        // generalization tables
        let variant = if PARITY_FLIP[self.lat[t].tet_index] {
            Variant::Odd
        } else {
            Variant::Even
        };
        let key = 63;
        let rows = stencils::stencil(key, variant);
        let mats = stencils::materials(key, variant);

        let lat = &mut *self.lat;
        for (row, &m) in rows.iter().zip(mats) {
            let v = row.map(|s| roots[s]);
            if v[0] == v[1]
                || v[0] == v[2]
                || v[0] == v[3]
                || v[1] == v[2]
                || v[1] == v[3]
                || v[2] == v[3]
            {
                continue;
            }
            let label = lat.verts[roots[m]].label;
            lat.tree.add_labeled_tet(&mut lat.verts, v, label);
        }
    }

    ////////////////////////////////////////////////////////////////////////

    /// Face corners and edges, with edges reordered so `edges[i]` is
    /// opposite `verts[i]`
    fn face_lists(&self, f: FaceId) -> ([VertexId; 3], [EdgeId; 3]) {
        let verts = self.lat.verts_around_face(f);
        let mut edges = self.lat.edges_around_face(f);
        for i in 0..2 {
            for e in i..3 {
                if !self.lat[edges[e]].touches(verts[i]) {
                    edges.swap(i, e);
                }
            }
        }
        (verts, edges)
    }
}

/// Clamps a point into a triangle by zeroing negative barycentric
/// coordinates and renormalizing
fn force_point_in_triangle(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>, p: &mut Vector3<f64>) {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = *p - a;

    let dot00 = v0.dot(&v0);
    let dot01 = v0.dot(&v1);
    let dot02 = v0.dot(&v2);
    let dot11 = v1.dot(&v1);
    let dot12 = v1.dot(&v2);

    let inv = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let mut u = (dot11 * dot02 - dot01 * dot12) * inv;
    let mut v = (dot00 * dot12 - dot01 * dot02) * inv;
    let mut w = 1.0 - u - v;

    u = u.max(0.0);
    v = v.max(0.0);
    w = w.max(0.0);

    let total = u + v + w;
    if total > 0.0 {
        u /= total;
        v /= total;
    }
    *p = (1.0 - u - v) * a + v * b + u * c;
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;
    use crate::volume::{FloatField, ScalarField, Volume};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// Two materials split by the plane z = 3.5
    fn planar_volume() -> Volume {
        let below = FloatField::from_fn(8, 8, 8, |_, _, k| 3.5 - k as f32);
        let above = FloatField::from_fn(8, 8, 8, |_, _, k| k as f32 - 3.5);
        Volume::new(vec![Arc::new(below) as Arc<dyn ScalarField>, Arc::new(above)]).unwrap()
    }

    /// Four materials meeting along a line tilted across the grid
    ///
    /// The tilt in `x` matters: with an axis-aligned meeting line the two
    /// cell centers flanking it always share a label and no tet ever sees
    /// four materials.
    fn quadrant_volume() -> Volume {
        let field = |sy: f32, sz: f32| {
            FloatField::from_fn(6, 6, 6, move |i, j, k| {
                let y = j as f32 - 1.05 - 0.5 * i as f32;
                let z = k as f32 - 2.3;
                sy * y + sz * z
            })
        };
        Volume::new(vec![
            Arc::new(field(1.0, 1.0)) as Arc<dyn ScalarField>,
            Arc::new(field(1.0, -1.0)),
            Arc::new(field(-1.0, 1.0)),
            Arc::new(field(-1.0, -1.0)),
        ])
        .unwrap()
    }

    #[test]
    fn cuts_lie_on_their_edges() {
        let volume = planar_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.compute_all_cuts();

        let mut seen = 0;
        for e in 0..lat.edges.len() {
            let edge = &lat.edges[e];
            let Some(cut) = edge.cut else { continue };
            seen += 1;

            let a = lat.verts.position(edge.v1);
            let b = lat.verts.position(edge.v2);
            let c = lat.verts.position(cut);

            // the cut is a convex combination of the endpoints
            let t = (c - a).norm() / (b - a).norm();
            assert!((0.0..=1.0).contains(&t));
            assert_relative_eq!((c - a).cross(&(b - a)).norm(), 0.0, epsilon = 1e-9);

            // endpoint materials both show up on the cut
            let cv = &lat.verts[cut];
            assert!(cv.materials.contains(lat.verts[edge.v1].label));
            assert!(cv.materials.contains(lat.verts[edge.v2].label));
            assert_eq!(cv.order, Order::Cut);
        }
        assert!(seen > 0);
        assert_eq!(lat.stage(), Stage::CutsComputed);
    }

    #[test]
    fn planar_cuts_sit_at_the_interface_plane() {
        let volume = planar_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.compute_all_cuts();

        // the fields are linear in z, so every cut lands exactly on z = 3.5
        for e in 0..lat.edges.len() {
            if let Some(cut) = lat.edges[e].cut {
                assert_relative_eq!(lat.verts.position(cut).z, 3.5, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn planar_volume_has_no_triples_or_quads() {
        let volume = planar_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.compute_all_cuts();
        mesher.compute_all_triples();
        mesher.compute_all_quads();

        // two materials never put three cuts on one face
        assert!(lat.faces.iter().all(|f| f.triple.is_none()));
        assert!(lat.tets.iter().all(|t| t.quad.is_none()));
    }

    #[test]
    fn quadrant_volume_computes_triples_and_quads() {
        let volume = quadrant_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.compute_all_cuts();
        mesher.compute_all_triples();
        mesher.compute_all_quads();

        let triples = lat.faces.iter().filter(|f| f.triple.is_some()).count();
        let quads = lat.tets.iter().filter(|t| t.quad.is_some()).count();
        assert!(triples > 0);
        assert!(quads > 0);

        // a triple carries the materials of its three corners
        for f in 0..lat.faces.len() {
            if let Some(triple) = lat.faces[f].triple {
                assert_eq!(lat.verts[triple].materials.len(), 3);
            }
        }
    }

    #[test]
    fn generalization_fills_every_slot() {
        let volume = quadrant_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.compute_all_cuts();
        mesher.compute_all_triples();
        mesher.compute_all_quads();
        mesher.generalize_tets();

        for &cell in lat.cut_cells.iter().chain(&lat.buffer_cells) {
            let Some(ents) = lat.tree[cell].entities() else {
                continue;
            };
            for t in ents.tets.iter().flatten() {
                let slots = lat.right_handed_vertex_list(*t);
                assert!(slots.iter().all(|s| s.is_some()));
                assert!(is_key_valid(lat[*t].key));
            }
        }
    }

    #[test]
    fn full_pipeline_emits_labeled_tets() {
        let volume = quadrant_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let background = lat.tree.tets.len();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.mesh();

        assert_eq!(lat.stage(), Stage::Stenciled);
        assert!(lat.tree.tets.len() > background);

        // every output tet is labeled and has four distinct vertices
        for tet in &lat.tree.tets {
            let label = tet.label.expect("stencil tet has no label");
            assert!((label as usize) < 4);
            for i in 0..4 {
                for j in i + 1..4 {
                    assert_ne!(
                        lat.verts.find_root(tet.verts[i]),
                        lat.verts.find_root(tet.verts[j])
                    );
                }
            }
        }
    }

    #[test]
    fn warped_vertices_absorb_their_violating_cuts() {
        let volume = quadrant_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.compute_all_cuts();
        mesher.compute_all_triples();
        mesher.compute_all_quads();
        mesher.generalize_tets();
        mesher.warp_violating_cuts();

        // no surviving cut still violates a lattice vertex
        for e in 0..lat.edges.len() {
            let Some(cut) = lat.edges[e].cut else { continue };
            if lat.verts.order(cut) != Order::Cut {
                continue;
            }
            if let Some(GeometryRef::Vertex(_)) = lat.verts[lat.verts.find_root(cut)].closest_geometry {
                assert!(!lat.verts[lat.verts.find_root(cut)].violating);
            }
        }
    }

    #[test]
    fn stencil_skips_fully_collapsed_tets() {
        let volume = planar_volume();
        let mut lat = BccLattice::from_volume(&volume).unwrap();
        let mut mesher = Mesher::new(&mut lat, &volume);
        mesher.mesh();

        // interface tets split into stencil tets labeled on both sides
        let labels: std::collections::HashSet<u8> =
            lat.tree.tets.iter().filter_map(|t| t.label).collect();
        assert_eq!(labels.len(), 2);
    }
}
