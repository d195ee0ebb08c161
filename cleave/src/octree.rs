//! Adaptive octree spatial index for the BCC lattice
//!
//! The tree stores cells in a flat arena addressed by [`CellId`]. Leaf
//! cells at level 0 correspond to unit lattice cells and carry the vertex,
//! edge, face, and tet entities built during lattice construction. Coarser
//! cells grade the mesh away from the material interfaces: after
//! [`Octree::balance_tree`] enforces the weak balance condition,
//! [`Octree::create_background_grid`] fills the graded region with
//! tetrahedra that stitch cleanly against both finer and coarser
//! neighbors, sharing vertices with the lattice along the way.

use std::collections::HashMap;
use std::ops::{Index, IndexMut};

use log::warn;
use nalgebra::Vector3;

use crate::lattice::tables::{
    CellOffset, EDGES_PER_CELL, FACES_PER_CELL, TETS_PER_CELL, VERTS_PER_CELL,
};
use crate::lattice::{EdgeId, FaceId, Order, TetId, Vertex, VertexId, VertexPool};

/// Index of a cell in the octree arena
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CellId(pub usize);

/// Offsets to the 6 face neighbors, in the order left, right, front,
/// back, down, up
const FACE_NEIGHBOR_OFFSETS: [Vector3<i64>; 6] = [
    Vector3::new(-1, 0, 0),
    Vector3::new(1, 0, 0),
    Vector3::new(0, 0, -1),
    Vector3::new(0, 0, 1),
    Vector3::new(0, -1, 0),
    Vector3::new(0, 1, 0),
];

/// Offsets to the 4 edge neighbors bordering each face, indexed to match
/// [`FACE_NEIGHBOR_OFFSETS`]
const EDGE_FACE_NEIGHBOR_OFFSETS: [[Vector3<i64>; 4]; 6] = [
    [
        Vector3::new(0, -1, 0),
        Vector3::new(0, 1, 0),
        Vector3::new(0, 0, -1),
        Vector3::new(0, 0, 1),
    ],
    [
        Vector3::new(0, -1, 0),
        Vector3::new(0, 1, 0),
        Vector3::new(0, 0, -1),
        Vector3::new(0, 0, 1),
    ],
    [
        Vector3::new(-1, 0, 0),
        Vector3::new(1, 0, 0),
        Vector3::new(0, -1, 0),
        Vector3::new(0, 1, 0),
    ],
    [
        Vector3::new(-1, 0, 0),
        Vector3::new(1, 0, 0),
        Vector3::new(0, -1, 0),
        Vector3::new(0, 1, 0),
    ],
    [
        Vector3::new(-1, 0, 0),
        Vector3::new(1, 0, 0),
        Vector3::new(0, 0, -1),
        Vector3::new(0, 0, 1),
    ],
    [
        Vector3::new(-1, 0, 0),
        Vector3::new(1, 0, 0),
        Vector3::new(0, 0, -1),
        Vector3::new(0, 0, 1),
    ],
];

// Winding parities for the background tets, indexed [face][edge]. The
// parity alternates so that adjacent tets keep a consistent orientation.
const BG_PARITY: [[bool; 4]; 6] = [
    [false, true, true, false],
    [true, false, false, true],
    [false, true, true, false],
    [true, false, false, true],
    [true, false, false, true],
    [false, true, true, false],
];

const BG_BI_PARITY: [[bool; 4]; 6] = [
    [true, false, false, true],
    [false, true, true, false],
    [true, false, false, true],
    [false, true, true, false],
    [false, true, true, false],
    [true, false, false, true],
];

const BG_QUAD_PARITY: [[bool; 4]; 6] = [
    [false, true, true, false],
    [true, false, false, true],
    [false, true, true, false],
    [true, false, false, true],
    [true, false, false, true],
    [false, true, true, false],
];

/// Per-cell entity storage, allocated only for cut and buffer cells
pub struct CellEntities {
    pub verts: [Option<VertexId>; VERTS_PER_CELL],
    pub edges: [Option<EdgeId>; EDGES_PER_CELL],
    pub faces: [Option<FaceId>; FACES_PER_CELL],
    pub tets: [Option<TetId>; TETS_PER_CELL],
}

impl CellEntities {
    fn new() -> Self {
        Self {
            verts: [None; VERTS_PER_CELL],
            edges: [None; EDGES_PER_CELL],
            faces: [None; FACES_PER_CELL],
            tets: [None; TETS_PER_CELL],
        }
    }
}

/// A single octree cell
///
/// `loc` is the cell's minimum corner, measured in units of level-0 cells;
/// the cell spans `1 << level` such units along each axis.
pub struct OctCell {
    pub loc: Vector3<i64>,
    pub level: u8,
    pub children: [Option<CellId>; 8],
    pub bg_pass_made: bool,
    entities: Option<Box<CellEntities>>,
}

impl OctCell {
    pub fn entities(&self) -> Option<&CellEntities> {
        self.entities.as_deref()
    }

    /// Returns the cell's entity storage, allocating it if absent
    pub fn entities_mut(&mut self) -> &mut CellEntities {
        self.entities.get_or_insert_with(|| Box::new(CellEntities::new()))
    }
}

/// A tetrahedron of the background grid
///
/// Vertices point into the shared [`VertexPool`], so later vertex warps
/// carry through to the output mesh. The label stays `None` until
/// [`Octree::label_background_tets`] runs.
pub struct BackgroundTet {
    pub verts: [VertexId; 4],
    pub label: Option<u8>,
}

/// Pointerless octree over the lattice domain
///
/// The bounding cube is the smallest power of two covering the lattice
/// dimensions, but lookups are clamped to the lattice itself: coordinates
/// at or beyond the data dimensions resolve to `None`.
pub struct Octree {
    cells: Vec<OctCell>,
    root_level: u8,
    bounding_size: i64,
    w: i64,
    h: i64,
    d: i64,

    /// Vertices referenced by the background grid, in output-mesh order
    pub verts: Vec<VertexId>,
    pub tets: Vec<BackgroundTet>,
}

impl Octree {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        let size = width.max(height).max(depth).max(1);
        let mut root_level = 0u8;
        while (1usize << root_level) < size {
            root_level += 1;
        }
        Self {
            cells: vec![OctCell {
                loc: Vector3::zeros(),
                level: root_level,
                children: [None; 8],
                bg_pass_made: false,
                entities: None,
            }],
            root_level,
            bounding_size: 1 << root_level,
            w: width as i64,
            h: height as i64,
            d: depth as i64,
            verts: Vec::new(),
            tets: Vec::new(),
        }
    }

    /// The root cell is always the first arena entry
    pub fn root(&self) -> CellId {
        CellId(0)
    }

    fn child_index(x: i64, y: i64, z: i64, bit: i64) -> usize {
        usize::from(x & bit != 0)
            | (usize::from(y & bit != 0) << 1)
            | (usize::from(z & bit != 0) << 2)
    }

    /// Adds a leaf cell, creating intermediate cells as needed
    pub fn add_cell(&mut self, x: i64, y: i64, z: i64) -> CellId {
        self.add_cell_at_level(x, y, z, 0)
    }

    /// Adds the cell containing `(x, y, z)` at the given level
    pub fn add_cell_at_level(&mut self, x: i64, y: i64, z: i64, level: u8) -> CellId {
        let mut cell = self.root();
        let mut l = self.root_level;
        while l > level {
            let bit = 1i64 << (l - 1);
            let ci = Self::child_index(x, y, z, bit);
            cell = match self[cell].children[ci] {
                Some(child) => child,
                None => {
                    let loc = self[cell].loc + Vector3::new(x & bit, y & bit, z & bit);
                    let child = CellId(self.cells.len());
                    self.cells.push(OctCell {
                        loc,
                        level: l - 1,
                        children: [None; 8],
                        bg_pass_made: false,
                        entities: None,
                    });
                    self[cell].children[ci] = Some(child);
                    child
                }
            };
            l -= 1;
        }
        cell
    }

    /// Looks up the leaf cell at the given lattice coordinates
    pub fn cell_at(&self, x: i64, y: i64, z: i64) -> Option<CellId> {
        if x < 0 || y < 0 || z < 0 || x >= self.w || y >= self.h || z >= self.d {
            return None;
        }
        let mut cell = self.root();
        for l in (0..self.root_level).rev() {
            let bit = 1i64 << l;
            cell = self[cell].children[Self::child_index(x, y, z, bit)]?;
        }
        Some(cell)
    }

    /// Looks up the leaf neighbor of a leaf cell
    pub fn neighbor(&self, cell: CellId, off: CellOffset) -> Option<CellId> {
        let loc = self[cell].loc;
        self.cell_at(loc.x + off[0], loc.y + off[1], loc.z + off[2])
    }

    /// Looks up the neighbor of `cell` with the same size, one cell width
    /// away in the direction `dir`. Returns `None` if no cell exists at
    /// that level or the target is outside the lattice.
    pub fn neighbor_at_same_level(&self, cell: CellId, dir: Vector3<i64>) -> Option<CellId> {
        let level = self[cell].level;
        let target = self[cell].loc + dir * (1i64 << level);
        if target.x < 0
            || target.y < 0
            || target.z < 0
            || target.x >= self.w
            || target.y >= self.h
            || target.z >= self.d
        {
            return None;
        }
        let mut node = self.root();
        while self[node].level > level {
            let bit = 1i64 << (self[node].level - 1);
            node = self[node].children[Self::child_index(target.x, target.y, target.z, bit)]?;
        }
        Some(node)
    }

    fn collect_children_at_level(&self, level: u8) -> Vec<CellId> {
        let mut out = Vec::new();
        self.collect_at_level(self.root(), level, &mut out);
        out
    }

    fn collect_at_level(&self, cell: CellId, level: u8, out: &mut Vec<CellId>) {
        let c = &self[cell];
        if c.level == level {
            out.push(cell);
        } else if c.level > level {
            for child in c.children.into_iter().flatten() {
                self.collect_at_level(child, level, out);
            }
        }
    }

    /// Enforces the weak balance condition: every face and edge neighbor
    /// of a cell is at most one level coarser
    pub fn balance_tree(&mut self) {
        for level in 0..=self.root_level {
            for cell in self.collect_children_at_level(level) {
                let loc = self[cell].loc;
                let shift = 1i64 << level;
                for dx in -1i64..=1 {
                    for dy in -1i64..=1 {
                        for dz in -1i64..=1 {
                            // skip self and the 8 corner directions
                            let order = dx.abs() + dy.abs() + dz.abs();
                            if order == 0 || order == 3 {
                                continue;
                            }
                            let n = loc + Vector3::new(dx, dy, dz) * shift;
                            if n.x < 0
                                || n.y < 0
                                || n.z < 0
                                || n.x >= self.bounding_size
                                || n.y >= self.bounding_size
                                || n.z >= self.bounding_size
                            {
                                continue;
                            }
                            self.add_cell_at_level(n.x, n.y, n.z, level + 1);
                        }
                    }
                }
            }
        }
    }

    /// Collects the cells that need background tetrahedralization: leaves
    /// above level 0 and partially refined interior cells. Fully refined
    /// cells are covered by their children; level-0 leaves are lattice
    /// cells and are meshed by the stencils instead.
    fn collect_background_cells(&self) -> Vec<CellId> {
        let mut out = Vec::new();
        self.collect_bg(self.root(), &mut out);
        out
    }

    fn collect_bg(&self, cell: CellId, out: &mut Vec<CellId>) {
        let c = &self[cell];
        let mut kids = 0;
        for child in c.children.into_iter().flatten() {
            kids += 1;
            self.collect_bg(child, out);
        }
        if (kids == 0 && c.level > 0) || (1..8).contains(&kids) {
            out.push(cell);
        }
    }

    /// True if the face `f` of cell `p` holds a refined vertex at its
    /// center, i.e. either side has children touching the face
    fn has_shared_face_vertex(&self, p: CellId, q: Option<CellId>, f: usize) -> bool {
        let off = FACE_NEIGHBOR_OFFSETS[f];
        let axis = (0..3).find(|&a| off[a] != 0).unwrap();
        let side = off[axis] > 0;
        let touches = |children: &[Option<CellId>; 8], positive: bool| {
            (0..8).any(|i| (((i >> axis) & 1) == 1) == positive && children[i].is_some())
        };
        if touches(&self[p].children, side) {
            return true;
        }
        match q {
            Some(q) => touches(&self[q].children, !side),
            None => false,
        }
    }

    /// True if edge `e` of face `f` holds a refined vertex at its
    /// midpoint. The edge is shared by up to four same-size cells: `p`,
    /// its face neighbor `q`, the edge-plane neighbor `e_cell`, and the
    /// diagonal neighbor `s_cell`; a midpoint vertex exists if any of
    /// them has a child octant touching the edge.
    fn has_shared_edge_vertex(
        &self,
        p: CellId,
        q: Option<CellId>,
        e_cell: Option<CellId>,
        s_cell: Option<CellId>,
        f: usize,
        e: usize,
    ) -> bool {
        let off = FACE_NEIGHBOR_OFFSETS[f];
        let off2 = EDGE_FACE_NEIGHBOR_OFFSETS[f][e];
        let off3 = off + off2;
        let ring: [(Option<CellId>, Vector3<i64>); 4] = [
            (Some(p), Vector3::zeros()),
            (q, off),
            (e_cell, off2),
            (s_cell, off3),
        ];
        for (cell, rel) in ring {
            let Some(cell) = cell else { continue };
            let children = &self[cell].children;
            for i in 0..8 {
                let on_edge = (0..3).all(|a| {
                    if off3[a] == 0 {
                        // the edge direction, both octants touch
                        true
                    } else {
                        let want = if rel[a] != 0 { rel[a] < 0 } else { off3[a] > 0 };
                        (((i >> a) & 1) == 1) == want
                    }
                });
                if on_edge && children[i].is_some() {
                    return true;
                }
            }
        }
        false
    }

    /// Fills the graded octree region with tetrahedra
    ///
    /// Vertices shared with the lattice are found through the positions of
    /// the buffer cells' corners, so the grid stitches onto the buffer
    /// ring without duplicating vertices. Cells reaching past the data
    /// dimensions are left empty.
    pub fn create_background_grid(&mut self, pool: &mut VertexPool, buffer_cells: &[CellId]) {
        let mut tracker: HashMap<[i64; 3], VertexId> = HashMap::new();
        for &cell in buffer_cells {
            if let Some(ent) = self[cell].entities() {
                for v in ent.verts.iter().flatten() {
                    tracker.insert(grid_key(pool[*v].pos), *v);
                }
            }
        }

        for node in self.collect_background_cells() {
            let (loc, level) = {
                let c = &self[node];
                (c.loc, c.level)
            };
            if level == 0 {
                self[node].bg_pass_made = true;
                continue;
            }
            let shift = 1i64 << level;
            if loc.x + shift > self.w || loc.y + shift > self.h || loc.z + shift > self.d {
                self[node].bg_pass_made = true;
                continue;
            }

            let mut fno = [None; 6];
            let mut en = [[None; 4]; 6];
            let mut sn = [[None; 4]; 6];
            for f in 0..6 {
                let off = FACE_NEIGHBOR_OFFSETS[f];
                fno[f] = self.neighbor_at_same_level(node, off);
                for e in 0..4 {
                    let off2 = EDGE_FACE_NEIGHBOR_OFFSETS[f][e];
                    en[f][e] = self.neighbor_at_same_level(node, off2);
                    sn[f][e] = self.neighbor_at_same_level(node, off + off2);
                }
            }

            let cw = shift;
            let v_c = loc + Vector3::repeat(cw / 2);
            for f in 0..6 {
                let fp = FacePass {
                    cell: node,
                    q: fno[f],
                    en: en[f],
                    sn: sn[f],
                    f,
                    v_c,
                    cw,
                };
                if self.has_shared_face_vertex(node, fno[f], f) {
                    self.grid_split_pass(pool, &mut tracker, fp);
                } else {
                    match fp.q {
                        Some(q) if self[q].level == level => {
                            self.grid_equal_pass(pool, &mut tracker, fp, q)
                        }
                        _ => self.grid_coarse_pass(pool, &mut tracker, fp),
                    }
                }
            }
            self[node].bg_pass_made = true;
        }
    }

    /// Face against an equal-size neighbor with no face vertex: span the
    /// two cell centers with one or two tets per face edge. Only one of
    /// the two cells builds the spanning tets.
    fn grid_equal_pass(
        &mut self,
        pool: &mut VertexPool,
        tracker: &mut HashMap<[i64; 3], VertexId>,
        fp: FacePass,
        q: CellId,
    ) {
        if self[q].bg_pass_made {
            return;
        }
        let off = FACE_NEIGHBOR_OFFSETS[fp.f];
        let half = fp.cw / 2;
        let v_c2 = fp.v_c + off * fp.cw;
        let v_d = fp.v_c + off * half;
        for e in 0..4 {
            let fr = EdgeFrame::new(fp.f, e, v_d, half);
            let c = Self::vertex_for_position(tracker, pool, fp.v_c);
            let c2 = Self::vertex_for_position(tracker, pool, v_c2);
            let e0 = Self::vertex_for_position(tracker, pool, fr.e0);
            let e1 = Self::vertex_for_position(tracker, pool, fr.e1);
            if self.has_shared_edge_vertex(fp.cell, fp.q, fp.en[e], fp.sn[e], fp.f, e) {
                // a midpoint vertex splits the spanning tet in two
                let m = Self::vertex_for_position(tracker, pool, fr.m);
                if BG_BI_PARITY[fp.f][e] {
                    self.create_tet(pool, [e0, m, c2, c]);
                    self.create_tet(pool, [e1, m, c, c2]);
                } else {
                    self.create_tet(pool, [e0, m, c, c2]);
                    self.create_tet(pool, [e1, m, c2, c]);
                }
            } else if BG_PARITY[fp.f][e] {
                self.create_tet(pool, [c, c2, e0, e1]);
            } else {
                self.create_tet(pool, [c, c2, e1, e0]);
            }
        }
    }

    /// Face against a coarser or missing neighbor with no face vertex:
    /// build the half pyramid on this side of the face, splitting around
    /// refined edge midpoints where the balance condition put them
    fn grid_coarse_pass(
        &mut self,
        pool: &mut VertexPool,
        tracker: &mut HashMap<[i64; 3], VertexId>,
        fp: FacePass,
    ) {
        let off = FACE_NEIGHBOR_OFFSETS[fp.f];
        let half = fp.cw / 2;
        let split = (0..4)
            .any(|e| self.has_shared_edge_vertex(fp.cell, fp.q, fp.en[e], fp.sn[e], fp.f, e));
        if !split {
            // two tets filling the pyramid, with a winding that matches
            // the diagonal chosen by the coarser side
            let (loc, level) = {
                let c = &self[fp.cell];
                (c.loc, c.level)
            };
            let branch = 1i64 << level;
            let xbit = loc.x & branch != 0;
            let ybit = loc.y & branch != 0;
            let zbit = loc.z & branch != 0;
            let axis = (0..3).find(|&a| off[a] != 0).unwrap();
            let (a0, a1, parity) = match axis {
                0 => (1, 2, ybit != zbit),
                1 => (0, 2, xbit != zbit),
                _ => (0, 1, xbit != ybit),
            };
            let base = fp.v_c + off * half;
            let corner = |s0: i64, s1: i64| {
                let mut p = base;
                p[a0] += s0 * half;
                p[a1] += s1 * half;
                p
            };
            let (p0, p1, p2, p3) = if parity {
                (corner(1, -1), corner(-1, -1), corner(-1, 1), corner(1, 1))
            } else {
                (corner(1, 1), corner(1, -1), corner(-1, -1), corner(-1, 1))
            };
            let c = Self::vertex_for_position(tracker, pool, fp.v_c);
            let v0 = Self::vertex_for_position(tracker, pool, p0);
            let v1 = Self::vertex_for_position(tracker, pool, p1);
            let v2 = Self::vertex_for_position(tracker, pool, p2);
            let v3 = Self::vertex_for_position(tracker, pool, p3);
            if off.x < 0 || off.z < 0 {
                self.create_tet(pool, [c, v0, v1, v2]);
                self.create_tet(pool, [c, v2, v3, v0]);
            } else if off.x > 0 || off.z > 0 {
                self.create_tet(pool, [c, v0, v2, v1]);
                self.create_tet(pool, [c, v2, v0, v3]);
            } else if off.y < 0 {
                self.create_tet(pool, [c, v0, v2, v1]);
                self.create_tet(pool, [c, v2, v0, v3]);
            } else {
                self.create_tet(pool, [c, v0, v1, v2]);
                self.create_tet(pool, [c, v2, v3, v0]);
            }
        } else {
            let v_d = fp.v_c + off * half;
            for e in 0..4 {
                let fr = EdgeFrame::new(fp.f, e, v_d, half);
                let c = Self::vertex_for_position(tracker, pool, fp.v_c);
                let d = Self::vertex_for_position(tracker, pool, v_d);
                if self.has_shared_edge_vertex(fp.cell, fp.q, fp.en[e], fp.sn[e], fp.f, e) {
                    let m = Self::vertex_for_position(tracker, pool, fr.m);
                    if self[fp.cell].children[fr.child0].is_none() {
                        let e0 = Self::vertex_for_position(tracker, pool, fr.e0);
                        if BG_PARITY[fp.f][e] {
                            self.create_tet(pool, [e0, m, c, d]);
                        } else {
                            self.create_tet(pool, [e0, m, d, c]);
                        }
                    }
                    if self[fp.cell].children[fr.child1].is_none() {
                        let e1 = Self::vertex_for_position(tracker, pool, fr.e1);
                        if BG_PARITY[fp.f][e] {
                            self.create_tet(pool, [e1, m, d, c]);
                        } else {
                            self.create_tet(pool, [e1, m, c, d]);
                        }
                    }
                } else {
                    let e0 = Self::vertex_for_position(tracker, pool, fr.e0);
                    let e1 = Self::vertex_for_position(tracker, pool, fr.e1);
                    if BG_PARITY[fp.f][e] {
                        self.create_tet(pool, [e0, e1, c, d]);
                    } else {
                        self.create_tet(pool, [e0, e1, d, c]);
                    }
                }
            }
        }
    }

    /// Face with a refined vertex at its center: fan tets between the
    /// face center and each face edge, skipping octants already covered
    /// by this cell's own children
    fn grid_split_pass(
        &mut self,
        pool: &mut VertexPool,
        tracker: &mut HashMap<[i64; 3], VertexId>,
        fp: FacePass,
    ) {
        let off = FACE_NEIGHBOR_OFFSETS[fp.f];
        let half = fp.cw / 2;
        let v_d = fp.v_c + off * half;
        for e in 0..4 {
            let fr = EdgeFrame::new(fp.f, e, v_d, half);
            let c = Self::vertex_for_position(tracker, pool, fp.v_c);
            let d = Self::vertex_for_position(tracker, pool, v_d);
            if self.has_shared_edge_vertex(fp.cell, fp.q, fp.en[e], fp.sn[e], fp.f, e) {
                let m = Self::vertex_for_position(tracker, pool, fr.m);
                if self[fp.cell].children[fr.child0].is_none() {
                    let e0 = Self::vertex_for_position(tracker, pool, fr.e0);
                    if BG_QUAD_PARITY[fp.f][e] {
                        self.create_tet(pool, [e0, m, c, d]);
                    } else {
                        self.create_tet(pool, [e0, m, d, c]);
                    }
                }
                if self[fp.cell].children[fr.child1].is_none() {
                    let e1 = Self::vertex_for_position(tracker, pool, fr.e1);
                    if BG_QUAD_PARITY[fp.f][e] {
                        self.create_tet(pool, [e1, m, d, c]);
                    } else {
                        self.create_tet(pool, [e1, m, c, d]);
                    }
                }
            } else {
                let e0 = Self::vertex_for_position(tracker, pool, fr.e0);
                let e1 = Self::vertex_for_position(tracker, pool, fr.e1);
                if BG_BI_PARITY[fp.f][e] {
                    self.create_tet(pool, [e0, e1, d, c]);
                } else {
                    self.create_tet(pool, [e0, e1, c, d]);
                }
            }
        }
    }

    fn vertex_for_position(
        tracker: &mut HashMap<[i64; 3], VertexId>,
        pool: &mut VertexPool,
        p: Vector3<i64>,
    ) -> VertexId {
        *tracker
            .entry([2 * p.x, 2 * p.y, 2 * p.z])
            .or_insert_with(|| pool.insert(Vertex::new(p.map(|c| c as f64), Order::Vert)))
    }

    /// Appends a background tet, registering its vertices in output order
    fn create_tet(&mut self, pool: &mut VertexPool, verts: [VertexId; 4]) {
        self.push_tet(pool, verts, None);
    }

    /// Appends a tet whose material is already known; the pyramids sealing
    /// open buffer cell faces take their label from a corner vertex
    pub(crate) fn add_labeled_tet(
        &mut self,
        pool: &mut VertexPool,
        verts: [VertexId; 4],
        label: u8,
    ) {
        self.push_tet(pool, verts, Some(label));
    }

    fn push_tet(&mut self, pool: &mut VertexPool, verts: [VertexId; 4], label: Option<u8>) {
        for &v in &verts {
            if pool[v].mesh_index.is_none() {
                pool[v].mesh_index = Some(self.verts.len());
                self.verts.push(v);
            }
        }
        self.tets.push(BackgroundTet { verts, label });
    }

    /// Assigns material labels to the background tets
    ///
    /// Every background tet has at least one vertex on a whole-numbered
    /// lattice point; that point's label applies to the whole tet, since
    /// the graded region contains no material transitions.
    pub fn label_background_tets(&mut self, pool: &VertexPool, labels: &[u8]) {
        let (w, h, d) = (self.w, self.h, self.d);
        for tet in &mut self.tets {
            if tet.label.is_some() {
                continue;
            }
            for &v in &tet.verts {
                let p = pool[v].pos;
                // background vertices sit on whole or half coordinates
                if p.x.fract() < 1e-5 && p.y.fract() < 1e-5 && p.z.fract() < 1e-5 {
                    let (x, y, z) = (p.x as i64, p.y as i64, p.z as i64);
                    if x < w + 1 && y < h + 1 && z < d + 1 {
                        let idx = x + y * (w + 1) + z * (w + 1) * (h + 1);
                        tet.label = Some(labels[idx as usize]);
                        break;
                    }
                }
            }
            if tet.label.is_none() {
                warn!("background tet has no vertex on a lattice point");
            }
        }
    }
}

impl Index<CellId> for Octree {
    type Output = OctCell;
    fn index(&self, id: CellId) -> &OctCell {
        &self.cells[id.0]
    }
}

impl IndexMut<CellId> for Octree {
    fn index_mut(&mut self, id: CellId) -> &mut OctCell {
        &mut self.cells[id.0]
    }
}

/// One face of one cell during the background grid pass
#[derive(Copy, Clone)]
struct FacePass {
    cell: CellId,
    q: Option<CellId>,
    en: [Option<CellId>; 4],
    sn: [Option<CellId>; 4],
    f: usize,
    v_c: Vector3<i64>,
    cw: i64,
}

/// Geometry around one edge of one face: the edge midpoint, the two edge
/// endpoints, and the child octants guarding each endpoint
struct EdgeFrame {
    m: Vector3<i64>,
    e0: Vector3<i64>,
    e1: Vector3<i64>,
    child0: usize,
    child1: usize,
}

impl EdgeFrame {
    fn new(f: usize, e: usize, face_center: Vector3<i64>, half: i64) -> Self {
        let off2 = EDGE_FACE_NEIGHBOR_OFFSETS[f][e];
        let off3 = FACE_NEIGHBOR_OFFSETS[f] + off2;
        let m = face_center + off2 * half;
        let free = (0..3).find(|&a| off3[a] == 0).unwrap();
        let mut base = 0;
        for a in 0..3 {
            if off3[a] > 0 {
                base |= 1 << a;
            }
        }
        let mut e0 = m;
        e0[free] += half;
        let mut e1 = m;
        e1[free] -= half;
        Self {
            m,
            e0,
            e1,
            child0: base | (1 << free),
            child1: base,
        }
    }
}

fn grid_key(p: Vector3<f64>) -> [i64; 3] {
    // doubled coordinates, so cell centers at half offsets stay exact
    [
        (2.0 * p.x).round() as i64,
        (2.0 * p.y).round() as i64,
        (2.0 * p.z).round() as i64,
    ]
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;
    use crate::lattice::tables::vtx;
    use approx::assert_relative_eq;

    fn tet_volume(pool: &VertexPool, tet: &BackgroundTet) -> f64 {
        let p: Vec<Vector3<f64>> = tet.verts.iter().map(|&v| pool[v].pos).collect();
        (p[0] - p[3]).dot(&(p[1] - p[3]).cross(&(p[2] - p[3]))) / 6.0
    }

    /// Level of the deepest cell containing a point
    fn deepest_level_at(tree: &Octree, p: Vector3<i64>) -> u8 {
        let mut node = tree.root();
        loop {
            let c = &tree[node];
            if c.level == 0 {
                return 0;
            }
            let bit = 1i64 << (c.level - 1);
            match c.children[Octree::child_index(p.x, p.y, p.z, bit)] {
                Some(n) => node = n,
                None => return c.level,
            }
        }
    }

    #[test]
    fn cell_insertion_and_lookup() {
        let mut tree = Octree::new(8, 8, 8);
        assert_eq!(tree.root_level, 3);
        assert_eq!(tree.bounding_size, 8);

        let cell = tree.add_cell(3, 5, 2);
        assert_eq!(tree[cell].level, 0);
        assert_eq!(tree[cell].loc, Vector3::new(3, 5, 2));
        assert_eq!(tree.cell_at(3, 5, 2), Some(cell));

        // repeated insertion returns the same cell
        assert_eq!(tree.add_cell(3, 5, 2), cell);

        assert_eq!(tree.cell_at(3, 5, 3), None);
        assert_eq!(tree.cell_at(-1, 0, 0), None);
        assert_eq!(tree.cell_at(8, 0, 0), None);
    }

    #[test]
    fn neighbor_lookup() {
        let mut tree = Octree::new(4, 4, 4);
        let a = tree.add_cell(1, 1, 1);
        let b = tree.add_cell(2, 1, 1);
        assert_eq!(tree.neighbor(a, [1, 0, 0]), Some(b));
        assert_eq!(tree.neighbor(b, [-1, 0, 0]), Some(a));
        assert_eq!(tree.neighbor(a, [-1, 0, 0]), None);

        let edge = tree.add_cell(3, 3, 3);
        assert_eq!(tree.neighbor(edge, [1, 0, 0]), None);
    }

    #[test]
    fn tree_balancing() {
        let mut tree = Octree::new(16, 16, 16);
        tree.add_cell(0, 0, 0);
        tree.add_cell(15, 15, 15);
        tree.balance_tree();

        for i in 0..tree.cells.len() {
            let cell = &tree[CellId(i)];
            if cell.children.iter().any(Option::is_some) {
                continue;
            }
            let size = 1i64 << cell.level;
            for dx in -1i64..=1 {
                for dy in -1i64..=1 {
                    for dz in -1i64..=1 {
                        let order = dx.abs() + dy.abs() + dz.abs();
                        if order == 0 || order == 3 {
                            continue;
                        }
                        let p = cell.loc + Vector3::new(dx, dy, dz) * size;
                        if p.x < 0
                            || p.y < 0
                            || p.z < 0
                            || p.x >= tree.bounding_size
                            || p.y >= tree.bounding_size
                            || p.z >= tree.bounding_size
                        {
                            continue;
                        }
                        assert!(
                            deepest_level_at(&tree, p) <= cell.level + 1,
                            "{:?} (level {}) has an oversized neighbor at {:?}",
                            cell.loc,
                            cell.level,
                            p,
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn background_cell_collection() {
        let mut tree = Octree::new(8, 8, 8);
        // a fully refined level-1 cell, a lone leaf, and their ancestors
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    tree.add_cell(x, y, z);
                }
            }
        }
        let lone = tree.add_cell_at_level(4, 0, 0, 1);
        let cells = tree.collect_background_cells();

        let full_parent = tree
            .collect_children_at_level(1)
            .into_iter()
            .find(|&p| tree[p].children.iter().all(Option::is_some))
            .unwrap();

        assert!(cells.contains(&lone));
        assert!(!cells.contains(&full_parent));
        assert!(cells.contains(&tree.root()));
        for x in 0..2i64 {
            let leaf = tree.cell_at(x, 0, 0).unwrap();
            assert!(!cells.contains(&leaf));
        }
    }

    #[test]
    fn grid_tets_tile_the_domain() {
        let mut tree = Octree::new(4, 4, 4);
        tree.add_cell(0, 0, 0);
        tree.balance_tree();

        let mut pool = VertexPool::new();
        tree.create_background_grid(&mut pool, &[]);

        assert!(!tree.tets.is_empty());
        let mut total = 0.0;
        for tet in &tree.tets {
            let vol = tet_volume(&pool, tet).abs();
            assert!(vol > 0.0, "degenerate background tet");
            let [a, b, c, d] = tet.verts;
            assert!(a != b && a != c && a != d && b != c && b != d && c != d);
            total += vol;
        }
        // everything except the single lattice cell is tiled
        assert_relative_eq!(total, 63.0, max_relative = 1e-12);
    }

    #[test]
    fn grid_reuses_lattice_corners() {
        let mut tree = Octree::new(2, 2, 2);
        let mut pool = VertexPool::new();
        let cell = tree.add_cell(0, 0, 0);

        let mut corner = |x: f64, y: f64, z: f64| {
            pool.insert(Vertex::new(Vector3::new(x, y, z), Order::Vert))
        };
        let ulf = corner(0.0, 1.0, 0.0);
        let ulb = corner(0.0, 1.0, 1.0);
        let urf = corner(1.0, 1.0, 0.0);
        let urb = corner(1.0, 1.0, 1.0);
        let llf = corner(0.0, 0.0, 0.0);
        let llb = corner(0.0, 0.0, 1.0);
        let lrf = corner(1.0, 0.0, 0.0);
        let lrb = corner(1.0, 0.0, 1.0);
        let center = corner(0.5, 0.5, 0.5);
        {
            let ent = tree[cell].entities_mut();
            ent.verts[vtx::ULF] = Some(ulf);
            ent.verts[vtx::ULB] = Some(ulb);
            ent.verts[vtx::URF] = Some(urf);
            ent.verts[vtx::URB] = Some(urb);
            ent.verts[vtx::LLF] = Some(llf);
            ent.verts[vtx::LLB] = Some(llb);
            ent.verts[vtx::LRF] = Some(lrf);
            ent.verts[vtx::LRB] = Some(lrb);
            ent.verts[vtx::C] = Some(center);
        }

        tree.balance_tree();
        tree.create_background_grid(&mut pool, &[cell]);

        // the far corner of the lattice cell is the center of the domain,
        // so the grid must pick up the existing vertex instead of making
        // its own
        assert!(tree.verts.contains(&urb));
        assert!(tree.tets.iter().any(|t| t.verts.contains(&urb)));

        let total: f64 = tree.tets.iter().map(|t| tet_volume(&pool, t).abs()).sum();
        assert_relative_eq!(total, 7.0, max_relative = 1e-12);

        // grid labels come from the lattice point labels
        let labels = vec![3u8; 27];
        tree.label_background_tets(&pool, &labels);
        assert!(tree.tets.iter().all(|t| t.label == Some(3)));
    }
}
