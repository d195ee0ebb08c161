//! BCC lattice topology on top of the octree cell grid
//!
//! Each level-0 cell owns nine vertex slots (eight primal corners plus the
//! dual center), 26 edge slots, 36 face slots, and 24 tet slots; entities
//! shared between cells are aliased into every cell that touches them, so
//! a lookup through any cell lands on the same arena object. Tets are
//! created on the cell whose center comes first in right-handed order,
//! which means only the right, upper, and back tet indices ever appear as
//! an owning `tet_index`.
//!
//! Interface meshing names the corners of a tet `A`, `B`, `C`, `D`: `A`
//! is the owning cell's center, `C` the neighbor cell's center, and `B`,
//! `D` the two shared primal corners, ordered so the tet is right-handed.
//! Edge cuts, face triples, and the tet quadruple extend these to the
//! fifteen generalized slots consumed by the case tables in
//! [`crate::stencils`].

pub mod tables;
pub mod vertex;

mod build;

use arrayvec::ArrayVec;
use nalgebra::Vector3;

use crate::octree::{CellId, Octree};
use tables::{
    CellOffset, DUAL_EDGE_FACE_GROUP, DUAL_EDGE_TET_GROUP, EDGE_CELL_GROUP, FACE_EDGE_GROUP,
    FACE_TET_GROUP, FACE_VERTEX_GROUP, PRIMAL_EDGE_FACE_GROUP, PRIMAL_EDGE_TET_GROUP,
    SHORT_EDGE_FACE_GROUP, SHORT_EDGE_TET_GROUP, VERTEX_CELL_GROUP, VERTEX_EDGE_GROUP,
    VERTEX_FACE_GROUP, VERTEX_TET_GROUP, edge, face, tet, vtx,
};

pub use vertex::{GeometryRef, MaterialSet, Order, Vertex, VertexId, VertexPool};

/// Index of an [`Edge`] in the lattice arena
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EdgeId(pub usize);

/// Index of a [`Face`] in the lattice arena
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FaceId(pub usize);

/// Index of a [`Tet`] in the lattice arena
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TetId(pub usize);

/// A lattice edge between two vertices
#[derive(Debug)]
pub struct Edge {
    pub v1: VertexId,
    pub v2: VertexId,

    /// Interface vertex on this edge, if the endpoint materials differ
    pub cut: Option<VertexId>,

    /// Owning cell and its slot for this edge
    pub cell: CellId,
    pub edge_index: usize,

    /// Primal and dual edges are long; diagonals are short
    pub is_long: bool,

    /// Set once the cut for this edge has been computed
    pub evaluated: bool,
}

impl Edge {
    /// Whether `v` is one of the endpoints
    ///
    /// This is reference equality, not merge-class equality.
    pub fn touches(&self, v: VertexId) -> bool {
        self.v1 == v || self.v2 == v
    }

    pub fn touches_both(&self, a: VertexId, b: VertexId) -> bool {
        self.touches(a) && self.touches(b)
    }

    /// The endpoint that isn't `v`
    pub fn opposite(&self, v: VertexId) -> VertexId {
        if self.v1 == v { self.v2 } else { self.v1 }
    }
}

/// A lattice face between three edges
#[derive(Debug)]
pub struct Face {
    /// Interface vertex interior to this face, if three materials meet
    pub triple: Option<VertexId>,

    pub cell: CellId,
    pub face_index: usize,
    pub evaluated: bool,
}

/// A lattice tet spanning two cell centers and two primal corners
#[derive(Debug)]
pub struct Tet {
    /// Interface vertex interior to this tet, if four materials meet
    pub quad: Option<VertexId>,

    pub cell: CellId,
    pub tet_index: usize,

    /// Generalized interface key, assigned during generalization
    pub key: u8,

    pub evaluated: bool,
    pub stenciled: bool,
}

/// Pipeline stage the lattice has reached
///
/// Stages advance strictly one at a time; skipping means meshing steps
/// ran out of order, which [`BccLattice::advance`] treats as fatal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Stage {
    Built = 0,
    CutsComputed,
    TriplesComputed,
    QuadsComputed,
    Generalized,
    CutsWarped,
    TriplesWarped,
    QuadsWarped,
    Stenciled,
}

/// Vertex, edge, and face neighborhoods of a tet, in generalized order
///
/// Verts are `[A, B, C, D]`, edges `[AB, AC, AD, BC, CD, BD]`, and faces
/// `[ABC, ACD, ABD, BCD]`.
pub struct TetAdjacency {
    pub verts: [VertexId; 4],
    pub edges: [EdgeId; 6],
    pub faces: [FaceId; 4],
}

/// Default violation tolerance for short (diagonal) edges
pub const DEFAULT_ALPHA_SHORT: f64 = 0.357;

/// Default violation tolerance for long (primal and dual) edges
pub const DEFAULT_ALPHA_LONG: f64 = 0.203;

/// BCC lattice over the cut region of a labeled volume
///
/// Entity arenas are indexed by the id newtypes; the octree's per-cell
/// slot arrays alias into them. Built by [`BccLattice::from_volume`].
pub struct BccLattice {
    pub tree: Octree,

    /// Dominant material at each primal lattice point, x fastest
    pub labels: Vec<u8>,

    pub num_materials: usize,

    width: usize,
    height: usize,
    depth: usize,

    pub verts: VertexPool,
    pub edges: Vec<Edge>,
    pub faces: Vec<Face>,
    pub tets: Vec<Tet>,

    /// Cells containing at least one material transition
    pub cut_cells: Vec<CellId>,

    /// Fully-meshed cells adjacent to a cut cell
    pub buffer_cells: Vec<CellId>,

    pub alpha_short: f64,
    pub alpha_long: f64,
    pub long_length: f64,
    pub short_length: f64,

    stage: Stage,
}

impl BccLattice {
    /// Number of primal lattice points along x
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Dominant material at a primal lattice point
    pub fn label_at(&self, x: usize, y: usize, z: usize) -> u8 {
        debug_assert!(x < self.width && y < self.height && z < self.depth);
        self.labels[x + y * self.width + z * self.width * self.height]
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Marks the next pipeline stage as reached
    ///
    /// Panics if `next` is not the immediate successor of the current
    /// stage.
    pub fn advance(&mut self, next: Stage) {
        assert_eq!(
            next as u8,
            self.stage as u8 + 1,
            "stage {next:?} reached out of order (currently at {:?})",
            self.stage
        );
        self.stage = next;
    }

    pub fn edge_length(&self, e: EdgeId) -> f64 {
        let edge = &self[e];
        (self.verts.position(edge.v1) - self.verts.position(edge.v2)).norm()
    }

    /// Violation coefficient for an edge, scaled so shortened edges keep
    /// forbidden zones proportional to their reference length
    pub fn scaled_alpha(&self, e: EdgeId) -> f64 {
        if self[e].is_long {
            self.alpha_long * (self.long_length / self.edge_length(e))
        } else {
            self.alpha_short * (self.short_length / self.edge_length(e))
        }
    }

    /// Unscaled violation coefficient for an edge
    pub fn alpha(&self, e: EdgeId) -> f64 {
        if self[e].is_long {
            self.alpha_long
        } else {
            self.alpha_short
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Cell slot lookups

    fn neighbor_cell(&self, cell: CellId, off: CellOffset) -> CellId {
        self.tree
            .neighbor(cell, off)
            .expect("entity spans a missing cell")
    }

    fn cell_vert(&self, cell: CellId, slot: usize) -> VertexId {
        self.try_cell_vert(Some(cell), slot)
            .expect("missing lattice vertex")
    }

    fn cell_edge(&self, cell: CellId, slot: usize) -> EdgeId {
        self.try_cell_edge(Some(cell), slot)
            .expect("missing lattice edge")
    }

    fn cell_face(&self, cell: CellId, slot: usize) -> FaceId {
        self.try_cell_face(Some(cell), slot)
            .expect("missing lattice face")
    }

    fn cell_tet(&self, cell: CellId, slot: usize) -> TetId {
        self.try_cell_tet(Some(cell), slot)
            .expect("missing lattice tet")
    }

    fn try_cell_vert(&self, cell: Option<CellId>, slot: usize) -> Option<VertexId> {
        self.tree[cell?].entities()?.verts[slot]
    }

    fn try_cell_edge(&self, cell: Option<CellId>, slot: usize) -> Option<EdgeId> {
        self.tree[cell?].entities()?.edges[slot]
    }

    fn try_cell_face(&self, cell: Option<CellId>, slot: usize) -> Option<FaceId> {
        self.tree[cell?].entities()?.faces[slot]
    }

    fn try_cell_tet(&self, cell: Option<CellId>, slot: usize) -> Option<TetId> {
        self.tree[cell?].entities()?.tets[slot]
    }

    ////////////////////////////////////////////////////////////////////////
    // Around a face

    pub fn verts_around_face(&self, f: FaceId) -> [VertexId; 3] {
        let face = &self[f];
        std::array::from_fn(|i| {
            let (c, v) = FACE_VERTEX_GROUP[face.face_index][i];
            self.cell_vert(self.neighbor_cell(face.cell, EDGE_CELL_GROUP[c]), v)
        })
    }

    pub fn edges_around_face(&self, f: FaceId) -> [EdgeId; 3] {
        let face = &self[f];
        std::array::from_fn(|i| {
            let (c, e) = FACE_EDGE_GROUP[face.face_index][i];
            self.cell_edge(self.neighbor_cell(face.cell, EDGE_CELL_GROUP[c]), e)
        })
    }

    pub fn tets_around_face(&self, f: FaceId) -> [TetId; 2] {
        let face = &self[f];
        std::array::from_fn(|i| self.cell_tet(face.cell, FACE_TET_GROUP[face.face_index][i]))
    }

    /// Like [`Self::tets_around_face`], but tolerates tets missing at the
    /// domain boundary
    pub fn try_tets_around_face(&self, f: FaceId) -> [Option<TetId>; 2] {
        let face = &self[f];
        std::array::from_fn(|i| {
            self.try_cell_tet(Some(face.cell), FACE_TET_GROUP[face.face_index][i])
        })
    }

    /// The tet on the other side of `f` from `t`, if it exists
    pub fn opposite_tet(&self, t: TetId, f: FaceId) -> Option<TetId> {
        let [a, b] = self.try_tets_around_face(f);
        if a == Some(t) { b } else { a }
    }

    ////////////////////////////////////////////////////////////////////////
    // Around a tet

    /// Adjacent entities of a tet, ordered to match the generalized slots
    pub fn adjacency_lists(&self, t: TetId) -> TetAdjacency {
        let cell = self[t].cell;
        let cv = |c, s| self.cell_vert(c, s);
        let ce = |c, s| self.cell_edge(c, s);
        let cf = |c, s| self.cell_face(c, s);
        match self[t].tet_index {
            tet::TRU => {
                let r = self.neighbor_cell(cell, [1, 0, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::URB),
                        cv(r, vtx::C),
                        cv(cell, vtx::URF),
                    ],
                    edges: [
                        ce(cell, edge::DURB),
                        ce(cell, edge::CR),
                        ce(cell, edge::DURF),
                        ce(r, edge::DULB),
                        ce(r, edge::DULF),
                        ce(cell, edge::UR),
                    ],
                    faces: [
                        cf(cell, face::FRUB),
                        cf(cell, face::FRUF),
                        cf(cell, face::FUR),
                        cf(r, face::FUL),
                    ],
                }
            }
            tet::TRL => {
                let r = self.neighbor_cell(cell, [1, 0, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::LRF),
                        cv(r, vtx::C),
                        cv(cell, vtx::LRB),
                    ],
                    edges: [
                        ce(cell, edge::DLRF),
                        ce(cell, edge::CR),
                        ce(cell, edge::DLRB),
                        ce(r, edge::DLLF),
                        ce(r, edge::DLLB),
                        ce(cell, edge::LR),
                    ],
                    faces: [
                        cf(cell, face::FRLF),
                        cf(cell, face::FRLB),
                        cf(cell, face::FLR),
                        cf(r, face::FLL),
                    ],
                }
            }
            tet::TRF => {
                let r = self.neighbor_cell(cell, [1, 0, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::URF),
                        cv(r, vtx::C),
                        cv(cell, vtx::LRF),
                    ],
                    edges: [
                        ce(cell, edge::DURF),
                        ce(cell, edge::CR),
                        ce(cell, edge::DLRF),
                        ce(r, edge::DULF),
                        ce(r, edge::DLLF),
                        ce(cell, edge::FR),
                    ],
                    faces: [
                        cf(cell, face::FRUF),
                        cf(cell, face::FRLF),
                        cf(cell, face::FFR),
                        cf(r, face::FFL),
                    ],
                }
            }
            tet::TRB => {
                let r = self.neighbor_cell(cell, [1, 0, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::LRB),
                        cv(r, vtx::C),
                        cv(cell, vtx::URB),
                    ],
                    edges: [
                        ce(cell, edge::DLRB),
                        ce(cell, edge::CR),
                        ce(cell, edge::DURB),
                        ce(r, edge::DLLB),
                        ce(r, edge::DULB),
                        ce(cell, edge::BR),
                    ],
                    faces: [
                        cf(cell, face::FRLB),
                        cf(cell, face::FRUB),
                        cf(cell, face::FBR),
                        cf(r, face::FBL),
                    ],
                }
            }
            tet::TUF => {
                let u = self.neighbor_cell(cell, [0, 1, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::ULF),
                        cv(u, vtx::C),
                        cv(cell, vtx::URF),
                    ],
                    edges: [
                        ce(cell, edge::DULF),
                        ce(cell, edge::CU),
                        ce(cell, edge::DURF),
                        ce(u, edge::DLLF),
                        ce(u, edge::DLRF),
                        ce(cell, edge::UF),
                    ],
                    faces: [
                        cf(cell, face::FUFL),
                        cf(cell, face::FUFR),
                        cf(cell, face::FUF),
                        cf(u, face::FLF),
                    ],
                }
            }
            tet::TUB => {
                let u = self.neighbor_cell(cell, [0, 1, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::URB),
                        cv(u, vtx::C),
                        cv(cell, vtx::ULB),
                    ],
                    edges: [
                        ce(cell, edge::DURB),
                        ce(cell, edge::CU),
                        ce(cell, edge::DULB),
                        ce(u, edge::DLRB),
                        ce(u, edge::DLLB),
                        ce(cell, edge::UB),
                    ],
                    faces: [
                        cf(cell, face::FUBR),
                        cf(cell, face::FUBL),
                        cf(cell, face::FUB),
                        cf(u, face::FLB),
                    ],
                }
            }
            tet::TUL => {
                let u = self.neighbor_cell(cell, [0, 1, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::ULB),
                        cv(u, vtx::C),
                        cv(cell, vtx::ULF),
                    ],
                    edges: [
                        ce(cell, edge::DULB),
                        ce(cell, edge::CU),
                        ce(cell, edge::DULF),
                        ce(u, edge::DLLB),
                        ce(u, edge::DLLF),
                        ce(cell, edge::UL),
                    ],
                    faces: [
                        cf(cell, face::FUBL),
                        cf(cell, face::FUFL),
                        cf(cell, face::FUL),
                        cf(u, face::FLL),
                    ],
                }
            }
            tet::TUR => {
                let u = self.neighbor_cell(cell, [0, 1, 0]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::URF),
                        cv(u, vtx::C),
                        cv(cell, vtx::URB),
                    ],
                    edges: [
                        ce(cell, edge::DURF),
                        ce(cell, edge::CU),
                        ce(cell, edge::DURB),
                        ce(u, edge::DLRF),
                        ce(u, edge::DLRB),
                        ce(cell, edge::UR),
                    ],
                    faces: [
                        cf(cell, face::FUFR),
                        cf(cell, face::FUBR),
                        cf(cell, face::FUR),
                        cf(u, face::FLR),
                    ],
                }
            }
            tet::TBT => {
                let b = self.neighbor_cell(cell, [0, 0, 1]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::ULB),
                        cv(b, vtx::C),
                        cv(cell, vtx::URB),
                    ],
                    edges: [
                        ce(cell, edge::DULB),
                        ce(cell, edge::CB),
                        ce(cell, edge::DURB),
                        ce(b, edge::DULF),
                        ce(b, edge::DURF),
                        ce(cell, edge::UB),
                    ],
                    faces: [
                        cf(cell, face::FBUL),
                        cf(cell, face::FBUR),
                        cf(cell, face::FUB),
                        cf(b, face::FUF),
                    ],
                }
            }
            tet::TBB => {
                let b = self.neighbor_cell(cell, [0, 0, 1]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::LRB),
                        cv(b, vtx::C),
                        cv(cell, vtx::LLB),
                    ],
                    edges: [
                        ce(cell, edge::DLRB),
                        ce(cell, edge::CB),
                        ce(cell, edge::DLLB),
                        ce(b, edge::DLRF),
                        ce(b, edge::DLLF),
                        ce(cell, edge::LB),
                    ],
                    faces: [
                        cf(cell, face::FBLR),
                        cf(cell, face::FBLL),
                        cf(cell, face::FLB),
                        cf(b, face::FLF),
                    ],
                }
            }
            tet::TBL => {
                let b = self.neighbor_cell(cell, [0, 0, 1]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::LLB),
                        cv(b, vtx::C),
                        cv(cell, vtx::ULB),
                    ],
                    edges: [
                        ce(cell, edge::DLLB),
                        ce(cell, edge::CB),
                        ce(cell, edge::DULB),
                        ce(b, edge::DLLF),
                        ce(b, edge::DULF),
                        ce(cell, edge::BL),
                    ],
                    faces: [
                        cf(cell, face::FBLL),
                        cf(cell, face::FBUL),
                        cf(cell, face::FBL),
                        cf(b, face::FFL),
                    ],
                }
            }
            tet::TBR => {
                let b = self.neighbor_cell(cell, [0, 0, 1]);
                TetAdjacency {
                    verts: [
                        cv(cell, vtx::C),
                        cv(cell, vtx::URB),
                        cv(b, vtx::C),
                        cv(cell, vtx::LRB),
                    ],
                    edges: [
                        ce(cell, edge::DURB),
                        ce(cell, edge::CB),
                        ce(cell, edge::DLRB),
                        ce(b, edge::DURF),
                        ce(b, edge::DLRF),
                        ce(cell, edge::BR),
                    ],
                    faces: [
                        cf(cell, face::FBUR),
                        cf(cell, face::FBLR),
                        cf(cell, face::FBR),
                        cf(b, face::FFR),
                    ],
                }
            }
            i => unreachable!("tet owned under non-canonical index {i}"),
        }
    }

    pub fn verts_around_tet(&self, t: TetId) -> [VertexId; 4] {
        self.adjacency_lists(t).verts
    }

    pub fn edges_around_tet(&self, t: TetId) -> [EdgeId; 6] {
        self.adjacency_lists(t).edges
    }

    pub fn faces_around_tet(&self, t: TetId) -> [FaceId; 4] {
        self.adjacency_lists(t).faces
    }

    ////////////////////////////////////////////////////////////////////////
    // Around a vertex

    /// Cells touching a primal corner, or just the owning cell for a
    /// center vertex
    ///
    /// Entries are `None` where the neighborhood runs off the lattice.
    pub fn cells_around_vertex(&self, v: VertexId) -> [Option<CellId>; 8] {
        let (cell, slot) = self.verts[v].cell.expect("vertex is not on the lattice");
        self.cells_around_corner(cell, slot)
    }

    pub fn cells_around_corner(&self, cell: CellId, slot: usize) -> [Option<CellId>; 8] {
        if slot == vtx::C {
            let mut out = [None; 8];
            out[0] = Some(cell);
            out
        } else {
            std::array::from_fn(|i| self.tree.neighbor(cell, VERTEX_CELL_GROUP[slot][i]))
        }
    }

    /// The 14 edges touching a vertex: a center vertex reaches its cell's
    /// diagonals and duals, a primal corner the 8 diagonals and 6 primal
    /// edges around it
    pub fn edges_around_vertex(&self, v: VertexId) -> [Option<EdgeId>; 14] {
        let (cell, slot) = self.verts[v].cell.expect("vertex is not on the lattice");
        if slot == vtx::C {
            let ents = self.tree[cell].entities();
            std::array::from_fn(|i| ents.and_then(|e| e.edges[i]))
        } else {
            let cells = self.cells_around_corner(cell, slot);
            std::array::from_fn(|i| {
                let (c, e) = VERTEX_EDGE_GROUP[i];
                self.try_cell_edge(cells[c], e)
            })
        }
    }

    pub fn faces_around_vertex(&self, v: VertexId) -> [Option<FaceId>; 36] {
        let (cell, slot) = self.verts[v].cell.expect("vertex is not on the lattice");
        if slot == vtx::C {
            let ents = self.tree[cell].entities();
            std::array::from_fn(|i| ents.and_then(|e| e.faces[i]))
        } else {
            let cells = self.cells_around_corner(cell, slot);
            std::array::from_fn(|i| {
                let (c, f) = VERTEX_FACE_GROUP[i];
                self.try_cell_face(cells[c], f)
            })
        }
    }

    pub fn tets_around_vertex(&self, v: VertexId) -> [Option<TetId>; 24] {
        let (cell, slot) = self.verts[v].cell.expect("vertex is not on the lattice");
        if slot == vtx::C {
            let ents = self.tree[cell].entities();
            std::array::from_fn(|i| ents.and_then(|e| e.tets[i]))
        } else {
            let cells = self.cells_around_corner(cell, slot);
            std::array::from_fn(|i| {
                let (c, t) = VERTEX_TET_GROUP[i];
                self.try_cell_tet(cells[c], t)
            })
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Around an edge

    /// Faces fanning around an edge: six for a diagonal, four for a dual
    /// or primal edge
    pub fn faces_around_edge(&self, e: EdgeId) -> ArrayVec<FaceId, 6> {
        let (cell, idx) = (self[e].cell, self[e].edge_index);
        let mut out = ArrayVec::new();
        if idx < 8 {
            for &f in &SHORT_EDGE_FACE_GROUP[idx] {
                if let Some(f) = self.try_cell_face(Some(cell), f) {
                    out.push(f);
                }
            }
        } else if idx < 14 {
            for &f in &DUAL_EDGE_FACE_GROUP[idx - 8] {
                if let Some(f) = self.try_cell_face(Some(cell), f) {
                    out.push(f);
                }
            }
        } else {
            for &(c, f) in &PRIMAL_EDGE_FACE_GROUP[idx - 14] {
                let fcell = self.tree.neighbor(cell, EDGE_CELL_GROUP[c]);
                if let Some(f) = self.try_cell_face(fcell, f) {
                    out.push(f);
                }
            }
        }
        out
    }

    pub fn tets_around_edge(&self, e: EdgeId) -> ArrayVec<TetId, 6> {
        let (cell, idx) = (self[e].cell, self[e].edge_index);
        let mut out = ArrayVec::new();
        if idx < 8 {
            for &t in &SHORT_EDGE_TET_GROUP[idx] {
                if let Some(t) = self.try_cell_tet(Some(cell), t) {
                    out.push(t);
                }
            }
        } else if idx < 14 {
            for &t in &DUAL_EDGE_TET_GROUP[idx - 8] {
                if let Some(t) = self.try_cell_tet(Some(cell), t) {
                    out.push(t);
                }
            }
        } else {
            for &(c, t) in &PRIMAL_EDGE_TET_GROUP[idx - 14] {
                let tcell = self.tree.neighbor(cell, EDGE_CELL_GROUP[c]);
                if let Some(t) = self.try_cell_tet(tcell, t) {
                    out.push(t);
                }
            }
        }
        out
    }

    /// The two faces of `t` that share the edge `e`
    pub fn faces_around_edge_on_tet(&self, t: TetId, e: EdgeId) -> [FaceId; 2] {
        let mut out = ArrayVec::<FaceId, 2>::new();
        for f in self.faces_around_edge(e) {
            if self.tet_contains_face(t, f) {
                out.push(f);
            }
        }
        out.into_inner().expect("edge is not on the tet")
    }

    ////////////////////////////////////////////////////////////////////////
    // Membership

    /// Whether the face has `v` as a corner, resolving merges
    pub fn face_contains_vert(&self, f: FaceId, v: VertexId) -> bool {
        self.verts_around_face(f)
            .iter()
            .any(|&w| self.verts.same_vertex(w, v))
    }

    pub fn face_contains_edge(&self, f: FaceId, e: EdgeId) -> bool {
        self.edges_around_face(f).contains(&e)
    }

    /// Whether the tet has `v` as a corner, resolving merges
    pub fn tet_contains_vert(&self, t: TetId, v: VertexId) -> bool {
        self.verts_around_tet(t)
            .iter()
            .any(|&w| self.verts.same_vertex(w, v))
    }

    pub fn tet_contains_edge(&self, t: TetId, e: EdgeId) -> bool {
        self.edges_around_tet(t).contains(&e)
    }

    pub fn tet_contains_face(&self, t: TetId, f: FaceId) -> bool {
        self.faces_around_tet(t).contains(&f)
    }

    ////////////////////////////////////////////////////////////////////////
    // Generalized slots

    /// All fifteen generalized vertices of a tet in slot order; unfilled
    /// slots are `None` until generalization runs
    pub fn right_handed_vertex_list(&self, t: TetId) -> [Option<VertexId>; 15] {
        let adj = self.adjacency_lists(t);
        let mut out = [None; 15];
        for i in 0..4 {
            out[i] = Some(adj.verts[i]);
        }
        for i in 0..6 {
            out[4 + i] = self[adj.edges[i]].cut;
        }
        for i in 0..4 {
            out[10 + i] = self[adj.faces[i]].triple;
        }
        out[14] = self[t].quad;
        out
    }

    pub fn generalized_vertex(&self, t: TetId, slot: usize) -> VertexId {
        self.right_handed_vertex_list(t)[slot].expect("generalized slot is unset")
    }

    /// Interface key from whichever of the six edge slots are occupied
    pub fn generalized_key(&self, t: TetId) -> u8 {
        let verts = self.right_handed_vertex_list(t);
        let mut key = 0;
        for (i, &bit) in crate::stencils::EDGE_KEY_BITS.iter().enumerate() {
            if verts[4 + i].is_some() {
                key |= bit;
            }
        }
        key
    }

    /// Interface key from the edges' cuts, ignoring cuts that have been
    /// snapped away onto lattice vertices
    pub fn key_from_adjacent_edges(&self, edges: &[EdgeId; 6]) -> u8 {
        let mut key = 0;
        for (&e, &bit) in edges.iter().zip(crate::stencils::EDGE_KEY_BITS.iter()) {
            if let Some(cut) = self[e].cut {
                if self.verts.order(cut) == Order::Cut {
                    key |= bit;
                }
            }
        }
        key
    }

    ////////////////////////////////////////////////////////////////////////
    // Projection targets

    /// Which of the two tets sharing `f` a triple projection should use,
    /// given the point the lattice vertex is warping to
    ///
    /// `None` only for boundary faces with no adjacent tet at all.
    pub fn inner_tet_of_face(&self, f: FaceId, warp_pt: Vector3<f64>) -> Option<TetId> {
        let triple = self[f].triple.expect("face has no triple");
        let tp = self.verts.position(triple);
        let ray = (warp_pt - tp).normalize();

        let (ta, tb) = match self.try_tets_around_face(f) {
            [Some(a), Some(b)] => (a, b),
            [one, two] => return one.or(two),
        };
        let mut verts_a = self.verts_around_tet(ta);
        let mut verts_b = self.verts_around_tet(tb);

        // move the vertex opposite the face to the front
        for v in 0..4 {
            if !self.face_contains_vert(f, verts_a[v]) {
                verts_a.swap(0, v);
            }
            if !self.face_contains_vert(f, verts_b[v]) {
                verts_b.swap(0, v);
            }
        }

        let vec_a = (self.verts.position(verts_a[0]) - tp).normalize();
        let vec_b = (self.verts.position(verts_b[0]) - tp).normalize();

        if vec_a.dot(&ray) > vec_b.dot(&ray) {
            Some(ta)
        } else {
            Some(tb)
        }
    }

    /// Which tet around `e` a cut projection should use, given the point
    /// the lattice vertex is warping to
    ///
    /// Casts a ray from the edge midpoint toward the warp point and picks
    /// the tet whose face it exits through, preferring exits that are not
    /// right on top of the existing cut. `None` for boundary edges with
    /// no adjacent tet.
    pub fn inner_tet_of_edge(&self, e: EdgeId, warp_pt: Vector3<f64>) -> Option<TetId> {
        let edge = &self[e];
        let cut = edge.cut.expect("edge has no cut");
        let origin = 0.5 * (self.verts.position(edge.v1) + self.verts.position(edge.v2));
        let ray = warp_pt - origin;
        let cut_pos = self.verts.position(cut);

        let tets = self.tets_around_edge(e);
        for &t in &tets {
            for f in self.faces_around_tet(t) {
                let [v1, v2, v3] = self.verts_around_face(f);
                if let Some(hit) =
                    triangle_intersection(&self.verts, v1, v2, v3, origin, ray, 1e-8)
                {
                    if (cut_pos - hit).norm() > 1e-3 {
                        return Some(t);
                    }
                }
            }
        }

        // no exit clear of the cut; take any exit
        for &t in &tets {
            for f in self.faces_around_tet(t) {
                let [v1, v2, v3] = self.verts_around_face(f);
                if triangle_intersection(&self.verts, v1, v2, v3, origin, ray, 1e-8).is_some() {
                    return Some(t);
                }
            }
        }

        tets.first().copied()
    }
}

impl std::ops::Index<EdgeId> for BccLattice {
    type Output = Edge;
    fn index(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0]
    }
}

impl std::ops::IndexMut<EdgeId> for BccLattice {
    fn index_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id.0]
    }
}

impl std::ops::Index<FaceId> for BccLattice {
    type Output = Face;
    fn index(&self, id: FaceId) -> &Face {
        &self.faces[id.0]
    }
}

impl std::ops::IndexMut<FaceId> for BccLattice {
    fn index_mut(&mut self, id: FaceId) -> &mut Face {
        &mut self.faces[id.0]
    }
}

impl std::ops::Index<TetId> for BccLattice {
    type Output = Tet;
    fn index(&self, id: TetId) -> &Tet {
        &self.tets[id.0]
    }
}

impl std::ops::IndexMut<TetId> for BccLattice {
    fn index_mut(&mut self, id: TetId) -> &mut Tet {
        &mut self.tets[id.0]
    }
}

/// Ray-triangle intersection with loose boundary tolerance
///
/// Returns the hit point, or `None` if the triangle is degenerate, the
/// ray is parallel, the hit lies outside the (slightly padded) triangle,
/// or the hit is behind or too close to the origin.
fn triangle_intersection(
    pool: &VertexPool,
    v1: VertexId,
    v2: VertexId,
    v3: VertexId,
    origin: Vector3<f64>,
    ray: Vector3<f64>,
    epsilon: f64,
) -> Option<Vector3<f64>> {
    let epsilon2 = 1e-3;

    if v1 == v2 || v2 == v3 || v1 == v3 {
        return None;
    }
    let p1 = pool.position(v1);
    let p2 = pool.position(v2);
    let p3 = pool.position(v3);
    if (p1 - p2).norm() < epsilon || (p2 - p3).norm() < epsilon || (p1 - p3).norm() < epsilon {
        return None;
    }

    let e1 = p1 - p3;
    let e2 = p2 - p3;

    let ray = ray.normalize();
    let r1 = ray.cross(&e2);
    let denom = e1.dot(&r1);
    if denom.abs() < epsilon {
        return None;
    }
    let inv_denom = 1.0 / denom;

    let s = origin - p3;
    let b1 = s.dot(&r1) * inv_denom;
    if b1 < -epsilon2 || b1 > 1.0 + epsilon2 {
        return None;
    }

    let r2 = s.cross(&e1);
    let b2 = ray.dot(&r2) * inv_denom;
    if b2 < -epsilon2 || b1 + b2 > 1.0 + 2.0 * epsilon2 {
        return None;
    }

    let t = e2.dot(&r2) * inv_denom;
    if t < 0.01 {
        return None;
    }
    Some(origin + t * ray)
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    fn tri_pool() -> (VertexPool, [VertexId; 3]) {
        let mut pool = VertexPool::new();
        let a = pool.insert(Vertex::new(Vector3::new(0.0, 0.0, 1.0), Order::Vert));
        let b = pool.insert(Vertex::new(Vector3::new(1.0, 0.0, 1.0), Order::Vert));
        let c = pool.insert(Vertex::new(Vector3::new(0.0, 1.0, 1.0), Order::Vert));
        (pool, [a, b, c])
    }

    #[test]
    fn ray_hits_triangle_interior() {
        let (pool, [a, b, c]) = tri_pool();
        let origin = Vector3::new(0.25, 0.25, 0.0);
        let hit = triangle_intersection(&pool, a, b, c, origin, Vector3::z(), 1e-8).unwrap();
        assert!((hit - Vector3::new(0.25, 0.25, 1.0)).norm() < 1e-12);
    }

    #[test]
    fn ray_misses_outside_tolerance() {
        let (pool, [a, b, c]) = tri_pool();
        let origin = Vector3::new(0.7, 0.7, 0.0);
        assert!(triangle_intersection(&pool, a, b, c, origin, Vector3::z(), 1e-8).is_none());
    }

    #[test]
    fn hit_too_close_to_origin_is_rejected() {
        let (pool, [a, b, c]) = tri_pool();
        let origin = Vector3::new(0.25, 0.25, 0.9999);
        assert!(triangle_intersection(&pool, a, b, c, origin, Vector3::z(), 1e-8).is_none());
    }

    #[test]
    fn repeated_vertex_is_rejected() {
        let (pool, [a, b, _]) = tri_pool();
        let origin = Vector3::new(0.25, 0.25, 0.0);
        assert!(triangle_intersection(&pool, a, b, b, origin, Vector3::z(), 1e-8).is_none());
    }

    #[test]
    fn backwards_hit_is_rejected() {
        let (pool, [a, b, c]) = tri_pool();
        let origin = Vector3::new(0.25, 0.25, 2.0);
        assert!(triangle_intersection(&pool, a, b, c, origin, Vector3::z(), 1e-8).is_none());
    }

    fn empty_lattice() -> BccLattice {
        BccLattice {
            tree: Octree::new(1, 1, 1),
            labels: vec![0; 8],
            num_materials: 2,
            width: 2,
            height: 2,
            depth: 2,
            verts: VertexPool::new(),
            edges: vec![],
            faces: vec![],
            tets: vec![],
            cut_cells: vec![],
            buffer_cells: vec![],
            alpha_short: 0.357,
            alpha_long: 0.203,
            long_length: 1.0,
            short_length: 0.75f64.sqrt(),
            stage: Stage::Built,
        }
    }

    #[test]
    fn stages_advance_one_at_a_time() {
        let mut lat = empty_lattice();
        lat.advance(Stage::CutsComputed);
        lat.advance(Stage::TriplesComputed);
        assert_eq!(lat.stage(), Stage::TriplesComputed);
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn skipping_a_stage_panics() {
        let mut lat = empty_lattice();
        lat.advance(Stage::QuadsComputed);
    }
}
