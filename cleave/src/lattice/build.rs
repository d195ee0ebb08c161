//! Lattice construction from a labeled volume
//!
//! Construction labels every primal lattice point with its dominant
//! material, then meshes only where the labels change: each cell whose
//! corners disagree becomes a cut cell, the one-ring around the cut
//! cells becomes the buffer, and the rest of the domain is left to the
//! graded octree. Corner vertices and primal edges land in maps keyed
//! by position and endpoints, so adjacent cells share them; entities
//! spanning two cells are written into both cells' slot arrays.
use std::collections::HashMap;

use log::info;
use nalgebra::Vector3;

use super::tables::{CellOffset, edge, face, tet, vtx};
use super::{
    BccLattice, DEFAULT_ALPHA_LONG, DEFAULT_ALPHA_SHORT, Edge, EdgeId, Face, FaceId, MaterialSet,
    Order, Stage, Tet, TetId, Vertex, VertexId, VertexPool,
};
use crate::error::Error;
use crate::octree::{CellId, Octree};
use crate::volume::{MaterialVolume, dominant_material};

/// Corner offsets within a cell, indexed by vertex slot
const CORNER_OFFSET: [[i64; 3]; 8] = [
    [0, 1, 0], // ULF
    [0, 1, 1], // ULB
    [1, 1, 0], // URF
    [1, 1, 1], // URB
    [0, 0, 0], // LLF
    [0, 0, 1], // LLB
    [1, 0, 0], // LRF
    [1, 0, 1], // LRB
];

/// Primal edge slots with their corner endpoints
///
/// Endpoints are listed in grid order, so the cells on either side of a
/// shared edge compute the same key.
const PRIMAL_EDGE_ENDPOINTS: [(usize, usize, usize); 12] = [
    (edge::UL, vtx::ULF, vtx::ULB),
    (edge::UR, vtx::URF, vtx::URB),
    (edge::UF, vtx::ULF, vtx::URF),
    (edge::UB, vtx::ULB, vtx::URB),
    (edge::LL, vtx::LLF, vtx::LLB),
    (edge::LR, vtx::LRF, vtx::LRB),
    (edge::LF, vtx::LLF, vtx::LRF),
    (edge::LB, vtx::LLB, vtx::LRB),
    (edge::FL, vtx::LLF, vtx::ULF),
    (edge::FR, vtx::LRF, vtx::URF),
    (edge::BL, vtx::LLB, vtx::ULB),
    (edge::BR, vtx::LRB, vtx::URB),
];

/// One face direction of the cross-entity pass
///
/// The cell toward +x/+y/+z owns the dual edge's four spanning tets and
/// quadrant faces; the cell on the other side aliases them under its
/// mirrored slots.
struct DualLink {
    offset: CellOffset,
    own_edge: usize,
    other_edge: usize,
    own_is_canonical: bool,
    canonical_tets: [usize; 4],
    alias_tets: [usize; 4],
    canonical_faces: [usize; 4],
    alias_faces: [usize; 4],
}

const DUAL_LINKS: [DualLink; 6] = [
    DualLink {
        offset: [-1, 0, 0],
        own_edge: edge::CL,
        other_edge: edge::CR,
        own_is_canonical: false,
        canonical_tets: [tet::TRU, tet::TRL, tet::TRF, tet::TRB],
        alias_tets: [tet::TLU, tet::TLL, tet::TLF, tet::TLB],
        canonical_faces: [face::FRUF, face::FRUB, face::FRLF, face::FRLB],
        alias_faces: [face::FLUF, face::FLUB, face::FLLF, face::FLLB],
    },
    DualLink {
        offset: [1, 0, 0],
        own_edge: edge::CR,
        other_edge: edge::CL,
        own_is_canonical: true,
        canonical_tets: [tet::TRU, tet::TRL, tet::TRF, tet::TRB],
        alias_tets: [tet::TLU, tet::TLL, tet::TLF, tet::TLB],
        canonical_faces: [face::FRUF, face::FRUB, face::FRLF, face::FRLB],
        alias_faces: [face::FLUF, face::FLUB, face::FLLF, face::FLLB],
    },
    DualLink {
        offset: [0, 1, 0],
        own_edge: edge::CU,
        other_edge: edge::CD,
        own_is_canonical: true,
        canonical_tets: [tet::TUF, tet::TUB, tet::TUL, tet::TUR],
        alias_tets: [tet::TDF, tet::TDB, tet::TDL, tet::TDR],
        canonical_faces: [face::FUFL, face::FUFR, face::FUBL, face::FUBR],
        alias_faces: [face::FDFL, face::FDFR, face::FDBL, face::FDBR],
    },
    DualLink {
        offset: [0, -1, 0],
        own_edge: edge::CD,
        other_edge: edge::CU,
        own_is_canonical: false,
        canonical_tets: [tet::TUF, tet::TUB, tet::TUL, tet::TUR],
        alias_tets: [tet::TDF, tet::TDB, tet::TDL, tet::TDR],
        canonical_faces: [face::FUFL, face::FUFR, face::FUBL, face::FUBR],
        alias_faces: [face::FDFL, face::FDFR, face::FDBL, face::FDBR],
    },
    DualLink {
        offset: [0, 0, -1],
        own_edge: edge::CF,
        other_edge: edge::CB,
        own_is_canonical: false,
        canonical_tets: [tet::TBT, tet::TBB, tet::TBL, tet::TBR],
        alias_tets: [tet::TFT, tet::TFB, tet::TFL, tet::TFR],
        canonical_faces: [face::FBUL, face::FBUR, face::FBLL, face::FBLR],
        alias_faces: [face::FFUL, face::FFUR, face::FFLL, face::FFLR],
    },
    DualLink {
        offset: [0, 0, 1],
        own_edge: edge::CB,
        other_edge: edge::CF,
        own_is_canonical: true,
        canonical_tets: [tet::TBT, tet::TBB, tet::TBL, tet::TBR],
        alias_tets: [tet::TFT, tet::TFB, tet::TFL, tet::TFR],
        canonical_faces: [face::FBUL, face::FBUR, face::FBLL, face::FBLR],
        alias_faces: [face::FFUL, face::FFUR, face::FFLL, face::FFLR],
    },
];

/// A buffer cell face with no neighbor on the other side
///
/// Two pyramid tets seal the gap between the cell center and the open
/// face. The quad diagonal alternates with the cell's octant parity so
/// it matches the split the graded grid makes on the far side.
struct StitchFace {
    axis: usize,
    corners: [usize; 4],
    /// Corner windings when the parity picks the flipped diagonal
    flipped: [[usize; 3]; 2],
    unflipped: [[usize; 3]; 2],
}

const STITCH_FACES: [StitchFace; 6] = [
    // left
    StitchFace {
        axis: 0,
        corners: [vtx::ULF, vtx::ULB, vtx::LLB, vtx::LLF],
        flipped: [[1, 3, 2], [1, 0, 3]],
        unflipped: [[0, 2, 1], [0, 3, 2]],
    },
    // right
    StitchFace {
        axis: 0,
        corners: [vtx::URF, vtx::URB, vtx::LRB, vtx::LRF],
        flipped: [[0, 1, 3], [1, 2, 3]],
        unflipped: [[0, 1, 2], [2, 3, 0]],
    },
    // up
    StitchFace {
        axis: 1,
        corners: [vtx::ULF, vtx::ULB, vtx::URB, vtx::URF],
        flipped: [[0, 1, 3], [1, 2, 3]],
        unflipped: [[0, 1, 2], [2, 3, 0]],
    },
    // down
    StitchFace {
        axis: 1,
        corners: [vtx::LLF, vtx::LLB, vtx::LRB, vtx::LRF],
        flipped: [[0, 3, 1], [1, 3, 2]],
        unflipped: [[0, 2, 1], [2, 0, 3]],
    },
    // front
    StitchFace {
        axis: 2,
        corners: [vtx::ULF, vtx::URF, vtx::LRF, vtx::LLF],
        flipped: [[0, 1, 3], [1, 2, 3]],
        unflipped: [[0, 1, 2], [2, 3, 0]],
    },
    // back
    StitchFace {
        axis: 2,
        corners: [vtx::LLB, vtx::LRB, vtx::URB, vtx::ULB],
        flipped: [[0, 1, 2], [2, 3, 0]],
        unflipped: [[0, 1, 3], [1, 2, 3]],
    },
];

impl BccLattice {
    /// Builds the adaptive lattice for a labeled volume
    ///
    /// Cells containing a material transition are meshed directly, along
    /// with a one-cell buffer ring around them; the rest of the domain
    /// is covered by a balanced octree that coarsens away from the cut
    /// region. The returned lattice is at [`Stage::Built`], ready for
    /// the mesher.
    pub fn from_volume(volume: &dyn MaterialVolume) -> Result<BccLattice, Error> {
        match volume.num_materials() {
            0 | 1 => return Err(Error::TooFewMaterials),
            n if n > MaterialSet::MAX => return Err(Error::TooManyMaterials),
            _ => (),
        }
        if volume.width() < 2 || volume.height() < 2 || volume.depth() < 2 {
            return Err(Error::EmptyVolume);
        }

        let mut b = Builder::new(volume);
        b.label_points();
        b.find_cut_cells();
        b.add_buffer_ring();
        b.create_cross_entities();
        Ok(b.finish())
    }
}

/// Scratch state for [`BccLattice::from_volume`]
struct Builder<'a> {
    volume: &'a dyn MaterialVolume,
    width: usize,
    height: usize,
    depth: usize,
    labels: Vec<u8>,
    tree: Octree,
    verts: VertexPool,
    edges: Vec<Edge>,
    faces: Vec<Face>,
    tets: Vec<Tet>,
    cut_cells: Vec<CellId>,
    buffer_cells: Vec<CellId>,

    /// Corner vertices shared between cells, by grid point
    corners: HashMap<[i64; 3], VertexId>,
    /// Primal edges shared between cells, by endpoint pair
    primal_edges: HashMap<(VertexId, VertexId), EdgeId>,
}

impl<'a> Builder<'a> {
    fn new(volume: &'a dyn MaterialVolume) -> Self {
        // volume dims count cells; the primal grid has one more point per axis
        let (width, height, depth) = (
            volume.width() + 1,
            volume.height() + 1,
            volume.depth() + 1,
        );
        Builder {
            volume,
            width,
            height,
            depth,
            labels: vec![0; width * height * depth],
            tree: Octree::new(width - 1, height - 1, depth - 1),
            verts: VertexPool::new(),
            edges: Vec::new(),
            faces: Vec::new(),
            tets: Vec::new(),
            cut_cells: Vec::new(),
            buffer_cells: Vec::new(),
            corners: HashMap::new(),
            primal_edges: HashMap::new(),
        }
    }

    fn label_at(&self, x: i64, y: i64, z: i64) -> u8 {
        let (w, h) = (self.width as i64, self.height as i64);
        self.labels[(x + y * w + z * w * h) as usize]
    }

    /// Labels every primal point with its dominant material
    fn label_points(&mut self) {
        let mut idx = 0;
        for k in 0..self.depth {
            for j in 0..self.height {
                for i in 0..self.width {
                    self.labels[idx] =
                        dominant_material(self.volume, i as f64, j as f64, k as f64);
                    idx += 1;
                }
            }
        }
    }

    /// Adds a cut cell wherever the corner labels disagree
    fn find_cut_cells(&mut self) {
        let (cw, ch, cd) = (
            self.width as i64 - 1,
            self.height as i64 - 1,
            self.depth as i64 - 1,
        );
        for k in 0..cd {
            for j in 0..ch {
                for i in 0..cw {
                    let first = self.label_at(i, j, k);
                    let mixed = CORNER_OFFSET
                        .iter()
                        .any(|o| self.label_at(i + o[0], j + o[1], k + o[2]) != first);
                    if mixed {
                        let cell = self.tree.add_cell(i, j, k);
                        self.fill_basic_cell(cell);
                        self.cut_cells.push(cell);
                    }
                }
            }
        }
        info!("lattice has {} cut cells", self.cut_cells.len());
    }

    /// Meshes the one-cell ring around every cut cell
    fn add_buffer_ring(&mut self) {
        let (cw, ch, cd) = (
            self.width as i64 - 1,
            self.height as i64 - 1,
            self.depth as i64 - 1,
        );
        for n in 0..self.cut_cells.len() {
            let loc = self.tree[self.cut_cells[n]].loc;
            for dz in -1..=1i64 {
                for dy in -1..=1i64 {
                    for dx in -1..=1i64 {
                        if dx == 0 && dy == 0 && dz == 0 {
                            continue;
                        }
                        let (x, y, z) = (loc.x + dx, loc.y + dy, loc.z + dz);
                        if x < 0 || y < 0 || z < 0 || x >= cw || y >= ch || z >= cd {
                            continue;
                        }
                        if self.tree.cell_at(x, y, z).is_none() {
                            let cell = self.tree.add_cell(x, y, z);
                            self.fill_basic_cell(cell);
                            self.buffer_cells.push(cell);
                        }
                    }
                }
            }
        }
        info!("lattice has {} buffer cells", self.buffer_cells.len());
    }

    /// Creates the vertices, edges, and interior faces local to one cell
    ///
    /// Corner vertices and primal edges are shared with any neighbor
    /// that already made them; the center vertex, the eight diagonals,
    /// and the twelve interior faces are always fresh.
    fn fill_basic_cell(&mut self, cell: CellId) {
        let loc = self.tree[cell].loc;

        let mut corner_ids = [VertexId(0); 8];
        for (slot, off) in CORNER_OFFSET.iter().enumerate() {
            let p = [loc.x + off[0], loc.y + off[1], loc.z + off[2]];
            corner_ids[slot] = match self.corners.get(&p) {
                Some(&id) => id,
                None => {
                    let label = self.label_at(p[0], p[1], p[2]);
                    let mut v = Vertex::new(
                        Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64),
                        Order::Vert,
                    );
                    v.label = label;
                    v.materials = MaterialSet::single(label);
                    v.cell = Some((cell, slot));
                    let id = self.verts.insert(v);
                    self.corners.insert(p, id);
                    id
                }
            };
        }

        let center = self.center_vertex(cell, loc, &corner_ids);

        let mut primal_ids = [(0usize, EdgeId(0)); 12];
        for (n, &(slot, a, b)) in PRIMAL_EDGE_ENDPOINTS.iter().enumerate() {
            let key = (corner_ids[a], corner_ids[b]);
            let id = match self.primal_edges.get(&key) {
                Some(&id) => id,
                None => {
                    let id = EdgeId(self.edges.len());
                    self.edges.push(Edge {
                        v1: key.0,
                        v2: key.1,
                        cut: None,
                        cell,
                        edge_index: slot,
                        is_long: true,
                        evaluated: false,
                    });
                    self.primal_edges.insert(key, id);
                    id
                }
            };
            primal_ids[n] = (slot, id);
        }

        let mut diag_ids = [EdgeId(0); 8];
        for (slot, id) in diag_ids.iter_mut().enumerate() {
            *id = EdgeId(self.edges.len());
            self.edges.push(Edge {
                v1: center,
                v2: corner_ids[slot],
                cut: None,
                cell,
                edge_index: slot,
                is_long: false,
                evaluated: false,
            });
        }

        let mut face_ids = [FaceId(0); 12];
        for (slot, id) in face_ids.iter_mut().enumerate() {
            *id = FaceId(self.faces.len());
            self.faces.push(Face {
                triple: None,
                cell,
                face_index: slot,
                evaluated: false,
            });
        }

        let ents = self.tree[cell].entities_mut();
        ents.verts[vtx::C] = Some(center);
        for (slot, &id) in corner_ids.iter().enumerate() {
            ents.verts[slot] = Some(id);
        }
        for &(slot, id) in &primal_ids {
            ents.edges[slot] = Some(id);
        }
        for (slot, &id) in diag_ids.iter().enumerate() {
            ents.edges[slot] = Some(id);
        }
        for (slot, &id) in face_ids.iter().enumerate() {
            ents.faces[slot] = Some(id);
        }
    }

    /// Center vertex labeled with the strongest material at the cell
    /// midpoint, chosen among the materials its corners carry
    fn center_vertex(
        &mut self,
        cell: CellId,
        loc: Vector3<i64>,
        corner_ids: &[VertexId; 8],
    ) -> VertexId {
        let mut present = MaterialSet::EMPTY;
        for &c in corner_ids {
            present = present.union(self.verts[c].materials);
        }

        let p = loc.map(|c| c as f64).add_scalar(0.5);
        let mut label = None;
        let mut max = f32::NEG_INFINITY;
        for mat in present.iter() {
            let value = self.volume.value_at(p.x, p.y, p.z, mat as usize);
            // ties keep the lowest material index
            if label.is_none() || value > max {
                max = value;
                label = Some(mat);
            }
        }
        let label = label.expect("cell corners carry no materials");

        let mut v = Vertex::new(p, Order::Vert);
        v.label = label;
        v.materials = MaterialSet::single(label);
        v.cell = Some((cell, vtx::C));
        self.verts.insert(v)
    }

    /// Creates the dual edges, spanning tets, and quadrant faces between
    /// adjacent cells, then seals open buffer faces with pyramids
    fn create_cross_entities(&mut self) {
        for n in 0..self.cut_cells.len() {
            let cell = self.cut_cells[n];
            for link in &DUAL_LINKS {
                if let Some(other) = self.tree.neighbor(cell, link.offset) {
                    self.link_cells(cell, other, link);
                }
            }
        }
        for n in 0..self.buffer_cells.len() {
            let cell = self.buffer_cells[n];
            for (link, stitch) in DUAL_LINKS.iter().zip(&STITCH_FACES) {
                match self.tree.neighbor(cell, link.offset) {
                    Some(other) => self.link_cells(cell, other, link),
                    None => self.stitch_open_face(cell, stitch),
                }
            }
        }
    }

    /// Fills the shared face between two cells, once
    fn link_cells(&mut self, cell: CellId, other: CellId, link: &DualLink) {
        if self.tree[cell]
            .entities()
            .is_some_and(|e| e.edges[link.own_edge].is_some())
        {
            return;
        }
        let (canon, alias) = if link.own_is_canonical {
            (cell, other)
        } else {
            (other, cell)
        };
        let v1 = self.center_of(canon);
        let v2 = self.center_of(alias);

        let eid = EdgeId(self.edges.len());
        self.edges.push(Edge {
            v1,
            v2,
            cut: None,
            cell,
            edge_index: link.own_edge,
            is_long: true,
            evaluated: false,
        });
        self.tree[cell].entities_mut().edges[link.own_edge] = Some(eid);
        self.tree[other].entities_mut().edges[link.other_edge] = Some(eid);

        for n in 0..4 {
            let tid = TetId(self.tets.len());
            self.tets.push(Tet {
                quad: None,
                cell: canon,
                tet_index: link.canonical_tets[n],
                key: 0,
                evaluated: false,
                stenciled: false,
            });
            self.tree[canon].entities_mut().tets[link.canonical_tets[n]] = Some(tid);
            self.tree[alias].entities_mut().tets[link.alias_tets[n]] = Some(tid);
        }
        for n in 0..4 {
            let fid = FaceId(self.faces.len());
            self.faces.push(Face {
                triple: None,
                cell: canon,
                face_index: link.canonical_faces[n],
                evaluated: false,
            });
            self.tree[canon].entities_mut().faces[link.canonical_faces[n]] = Some(fid);
            self.tree[alias].entities_mut().faces[link.alias_faces[n]] = Some(fid);
        }
    }

    fn center_of(&self, cell: CellId) -> VertexId {
        self.tree[cell]
            .entities()
            .and_then(|e| e.verts[vtx::C])
            .expect("cell has no center vertex")
    }

    /// Seals a buffer cell face that no neighbor spans
    ///
    /// On the far side sits either the graded grid or the domain
    /// boundary; two pyramid tets with the material of the face close
    /// the gap.
    fn stitch_open_face(&mut self, cell: CellId, stitch: &StitchFace) {
        let loc = self.tree[cell].loc;
        let (xb, yb, zb) = (loc.x & 1, loc.y & 1, loc.z & 1);
        let flip = match stitch.axis {
            0 => yb == zb,
            1 => xb != zb,
            _ => xb == yb,
        };
        let windings = if flip {
            &stitch.flipped
        } else {
            &stitch.unflipped
        };

        let ents = self.tree[cell]
            .entities()
            .expect("buffer cell has no entities");
        let c = ents.verts[vtx::C].expect("cell has no center vertex");
        let p = stitch
            .corners
            .map(|slot| ents.verts[slot].expect("cell has no corner vertex"));
        let label = self.verts[p[0]].label;

        for t in windings {
            self.tree
                .add_labeled_tet(&mut self.verts, [c, p[t[0]], p[t[1]], p[t[2]]], label);
        }
    }

    /// Balances the octree, meshes the graded region, and assembles the
    /// finished lattice
    fn finish(mut self) -> BccLattice {
        self.tree.balance_tree();
        self.tree
            .create_background_grid(&mut self.verts, &self.buffer_cells);
        self.tree.label_background_tets(&self.verts, &self.labels);
        info!("graded grid has {} tets", self.tree.tets.len());

        BccLattice {
            tree: self.tree,
            labels: self.labels,
            num_materials: self.volume.num_materials(),
            width: self.width,
            height: self.height,
            depth: self.depth,
            verts: self.verts,
            edges: self.edges,
            faces: self.faces,
            tets: self.tets,
            cut_cells: self.cut_cells,
            buffer_cells: self.buffer_cells,
            alpha_short: DEFAULT_ALPHA_SHORT,
            alpha_long: DEFAULT_ALPHA_LONG,
            long_length: 1.0,
            short_length: 0.75f64.sqrt(),
            stage: Stage::Built,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;
    use crate::volume::{FloatField, PaddedVolume, ScalarField, Volume};
    use approx::assert_relative_eq;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Two materials split by the plane z = 3.5
    fn planar_volume() -> Volume {
        let below = FloatField::from_fn(8, 8, 8, |_, _, k| 3.5 - k as f32);
        let above = FloatField::from_fn(8, 8, 8, |_, _, k| k as f32 - 3.5);
        Volume::new(vec![Arc::new(below) as Arc<dyn ScalarField>, Arc::new(above)]).unwrap()
    }

    fn tet_volume(pool: &VertexPool, verts: [VertexId; 4]) -> f64 {
        let p = verts.map(|v| pool.position(v));
        (p[0] - p[3]).dot(&(p[1] - p[3]).cross(&(p[2] - p[3]))) / 6.0
    }

    #[test]
    fn planar_volume_cut_and_buffer_cells() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();

        // 8^3 samples make a 7-cell domain on an 8-point primal grid
        assert_eq!(lat.width(), 8);
        assert_eq!(lat.height(), 8);
        assert_eq!(lat.depth(), 8);

        // the transition crosses every cell in the k = 3 layer
        assert_eq!(lat.cut_cells.len(), 49);
        for &cell in &lat.cut_cells {
            assert_eq!(lat.tree[cell].loc.z, 3);
        }
        // one full layer above and one below
        assert_eq!(lat.buffer_cells.len(), 2 * 49);

        assert_eq!(lat.stage(), Stage::Built);
        assert_eq!(lat.alpha_short, DEFAULT_ALPHA_SHORT);
        assert_eq!(lat.alpha_long, DEFAULT_ALPHA_LONG);
        assert_relative_eq!(lat.short_length, 0.75f64.sqrt());
    }

    #[test]
    fn shared_entities_are_deduplicated() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();

        // three full 7x7 layers of cells: 640 primal edges on the 8x8x4
        // point grid, 8 diagonals per cell, one dual edge per adjacent
        // pair, and 4 tets and cross faces per pair
        let cells = 7 * 7 * 3;
        let primal = 7 * 8 * 4 + 8 * 7 * 4 + 8 * 8 * 3;
        let pairs = 6 * 7 * 3 + 7 * 6 * 3 + 7 * 7 * 2;
        assert_eq!(lat.edges.len(), primal + 8 * cells + pairs);
        assert_eq!(lat.faces.len(), 12 * cells + 4 * pairs);
        assert_eq!(lat.tets.len(), 4 * pairs);
    }

    #[test]
    fn cross_entities_land_in_both_cells() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();
        let c = lat.tree.cell_at(3, 3, 3).unwrap();
        let r = lat.tree.cell_at(4, 3, 3).unwrap();
        let ce = lat.tree[c].entities().unwrap();
        let re = lat.tree[r].entities().unwrap();

        // one dual edge between the two centers, in +x order
        let e = ce.edges[edge::CR].unwrap();
        assert_eq!(re.edges[edge::CL], Some(e));
        assert_eq!(lat[e].v1, ce.verts[vtx::C].unwrap());
        assert_eq!(lat[e].v2, re.verts[vtx::C].unwrap());
        assert!(lat[e].is_long);

        // the four spanning tets and faces alias under mirrored slots
        assert_eq!(ce.tets[tet::TRU], re.tets[tet::TLU]);
        assert_eq!(ce.tets[tet::TRB], re.tets[tet::TLB]);
        assert_eq!(ce.faces[face::FRUF], re.faces[face::FLUF]);
        assert_eq!(ce.faces[face::FRLB], re.faces[face::FLLB]);
        let t = ce.tets[tet::TRU].unwrap();
        assert_eq!(lat[t].cell, c);
        assert_eq!(lat[t].tet_index, tet::TRU);

        // the shared face's corners and primal edges are one set
        assert_eq!(ce.verts[vtx::URF], re.verts[vtx::ULF]);
        assert_eq!(ce.verts[vtx::LRB], re.verts[vtx::LLB]);
        assert_eq!(ce.edges[edge::UR], re.edges[edge::UL]);
        assert_eq!(ce.edges[edge::FR], re.edges[edge::FL]);
    }

    #[test]
    fn edge_endpoints_follow_slot_conventions() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();
        let cell = lat.tree.cell_at(3, 3, 3).unwrap();
        let ents = lat.tree[cell].entities().unwrap();

        let ul = ents.edges[edge::UL].unwrap();
        assert_eq!(lat[ul].v1, ents.verts[vtx::ULF].unwrap());
        assert_eq!(lat[ul].v2, ents.verts[vtx::ULB].unwrap());
        assert!(lat[ul].is_long);

        let d = ents.edges[edge::DLRB].unwrap();
        assert_eq!(lat[d].v1, ents.verts[vtx::C].unwrap());
        assert_eq!(lat[d].v2, ents.verts[vtx::LRB].unwrap());
        assert!(!lat[d].is_long);
    }

    #[test]
    fn corner_vertices_carry_point_labels() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();
        let cell = lat.tree.cell_at(2, 5, 3).unwrap();
        let ents = lat.tree[cell].entities().unwrap();

        let urb = ents.verts[vtx::URB].unwrap();
        assert_eq!(lat.verts.position(urb), Vector3::new(3.0, 6.0, 4.0));
        assert_eq!(lat.verts[urb].label, lat.label_at(3, 6, 4));
        assert_eq!(lat.verts[urb].label, 1);

        let c = ents.verts[vtx::C].unwrap();
        assert_eq!(lat.verts.position(c), Vector3::new(2.5, 5.5, 3.5));
    }

    #[test]
    fn center_vertices_take_the_strongest_corner_material() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();
        for &cell in &lat.cut_cells {
            let c = lat.tree[cell].entities().unwrap().verts[vtx::C].unwrap();
            // both materials tie exactly at z = 3.5; the lower index wins
            assert_eq!(lat.verts[c].label, 0);
            assert_eq!(lat.verts[c].materials.len(), 1);
        }
    }

    #[test]
    fn accessors_round_trip_through_the_lattice() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();
        let cell = lat.tree.cell_at(3, 3, 3).unwrap();
        let v = lat.tree[cell].entities().unwrap().verts[vtx::URB].unwrap();

        // interior primal corner: all 24 surrounding tets exist, are
        // distinct, and contain it
        let mut seen = HashSet::new();
        for t in lat.tets_around_vertex(v).into_iter().flatten() {
            assert!(lat.tet_contains_vert(t, v));
            seen.insert(t);
        }
        assert_eq!(seen.len(), 24);

        let around = lat.edges_around_vertex(v);
        assert_eq!(around.iter().flatten().count(), 14);
        for e in around.into_iter().flatten() {
            assert!(lat[e].touches(v));
        }

        // a dual edge is spanned by exactly its four quadrant faces
        let e = lat.tree[cell].entities().unwrap().edges[edge::CR].unwrap();
        let faces = lat.faces_around_edge(e);
        assert_eq!(faces.len(), 4);
        for f in faces {
            assert!(lat.face_contains_edge(f, e));
        }

        // a diagonal fans six faces and six tets
        let d = lat.tree[cell].entities().unwrap().edges[edge::DURF].unwrap();
        assert_eq!(lat.faces_around_edge(d).len(), 6);
        assert_eq!(lat.tets_around_edge(d).len(), 6);
    }

    #[test]
    fn open_buffer_faces_are_sealed_with_labeled_pyramids() {
        let lat = BccLattice::from_volume(&planar_volume()).unwrap();

        // every background tet is labeled, and the stitching keeps the
        // material of the side it seals
        assert!(lat.tree.tets.iter().all(|t| t.label.is_some()));
        assert!(lat.tree.tets.iter().any(|t| t.label == Some(0)));
        assert!(lat.tree.tets.iter().any(|t| t.label == Some(1)));
        for t in &lat.tree.tets {
            assert!(tet_volume(&lat.verts, t.verts).abs() > 0.0);
        }
    }

    #[test]
    fn uniform_volume_has_no_cut_cells() {
        let a = FloatField::from_fn(9, 9, 9, |_, _, _| 1.0);
        let b = FloatField::from_fn(9, 9, 9, |_, _, _| 0.0);
        let vol = Volume::new(vec![Arc::new(a) as Arc<dyn ScalarField>, Arc::new(b)]).unwrap();
        let lat = BccLattice::from_volume(&vol).unwrap();

        assert!(lat.cut_cells.is_empty());
        assert!(lat.buffer_cells.is_empty());
        assert!(lat.edges.is_empty());
        assert!(lat.faces.is_empty());
        assert!(lat.tets.is_empty());

        // the whole 8x8x8 cell domain falls to the graded grid
        assert!(!lat.tree.tets.is_empty());
        let total: f64 = lat
            .tree
            .tets
            .iter()
            .map(|t| tet_volume(&lat.verts, t.verts).abs())
            .sum();
        assert_relative_eq!(total, 512.0, max_relative = 1e-12);
        assert!(lat.tree.tets.iter().all(|t| t.label == Some(0)));
    }

    #[test]
    fn padding_keeps_transitions_off_the_boundary() {
        let vol = PaddedVolume::new(Box::new(planar_volume()));
        let lat = BccLattice::from_volume(&vol).unwrap();

        assert_eq!(lat.num_materials, 3);
        assert_eq!(lat.width(), 12);

        // with the shell two cells deep, every cut cell is interior and
        // carries its full complement of entities
        assert!(!lat.cut_cells.is_empty());
        for &cell in &lat.cut_cells {
            let loc = lat.tree[cell].loc;
            assert!((1..=9).contains(&loc.x));
            assert!((1..=9).contains(&loc.y));
            assert!((1..=9).contains(&loc.z));
            let ents = lat.tree[cell].entities().unwrap();
            assert!(ents.verts.iter().all(Option::is_some));
            assert!(ents.edges.iter().all(Option::is_some));
            assert!(ents.faces.iter().all(Option::is_some));
            assert!(ents.tets.iter().all(Option::is_some));
        }
    }

    #[test]
    fn degenerate_volumes_are_rejected() {
        let single = Volume::new(vec![
            Arc::new(FloatField::from_fn(4, 4, 4, |_, _, _| 1.0)) as Arc<dyn ScalarField>,
        ])
        .unwrap();
        assert!(matches!(
            BccLattice::from_volume(&single),
            Err(Error::TooFewMaterials)
        ));

        // one cell thick leaves no interior to lattice
        struct ThinVolume;
        impl MaterialVolume for ThinVolume {
            fn value_at(&self, _x: f64, _y: f64, _z: f64, mat: usize) -> f32 {
                if mat == 0 { 1.0 } else { -1.0 }
            }
            fn num_materials(&self) -> usize {
                2
            }
            fn width(&self) -> usize {
                1
            }
            fn height(&self) -> usize {
                4
            }
            fn depth(&self) -> usize {
                4
            }
        }
        assert!(matches!(
            BccLattice::from_volume(&ThinVolume),
            Err(Error::EmptyVolume)
        ));
    }
}
