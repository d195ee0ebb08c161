//! Vertices and the merge-tracking vertex pool
//!
//! Warping snaps interface vertices onto other vertices. Instead of
//! rewriting every reference, a snapped vertex records the vertex it
//! merged into, forming a union-find forest: position and order queries
//! always resolve through the representative, while the original order
//! stays available for table lookups.
use nalgebra::Vector3;

use super::{EdgeId, FaceId};
use crate::octree::CellId;

/// Index of a vertex in a [`VertexPool`]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub usize);

/// Topological order of a vertex
///
/// Ordinary lattice vertices are `Vert`; interface vertices rank by how
/// many materials meet there.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Order {
    Vert = 0,
    Cut = 1,
    Trip = 2,
    Quad = 3,
}

/// Set of materials present at a vertex, stored as a bitmask
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct MaterialSet(u64);

impl MaterialSet {
    pub const EMPTY: Self = MaterialSet(0);

    /// Maximum number of representable materials
    pub const MAX: usize = 64;

    pub fn single(mat: u8) -> Self {
        MaterialSet(1 << mat)
    }

    pub fn insert(&mut self, mat: u8) {
        self.0 |= 1 << mat;
    }

    pub fn contains(&self, mat: u8) -> bool {
        self.0 & (1 << mat) != 0
    }

    pub fn union(self, other: Self) -> Self {
        MaterialSet(self.0 | other.0)
    }

    /// Whether any material appears in both sets
    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..u64::BITS as u8).filter(|&m| self.contains(m))
    }
}

impl std::fmt::Debug for MaterialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A piece of lattice geometry an interface vertex refers back to
///
/// Violation checks record the nearest offending entity here, and the
/// conforming projections record what a vertex was moved onto.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GeometryRef {
    Vertex(VertexId),
    Edge(EdgeId),
    Face(FaceId),
}

/// A single mesh vertex
#[derive(Clone, Debug)]
pub struct Vertex {
    pub pos: Vector3<f64>,

    /// Order this vertex was created with; never changes, even after the
    /// vertex is merged into one of higher order
    pub order: Order,

    /// Dominant material
    pub label: u8,

    /// Materials meeting at this vertex
    pub materials: MaterialSet,

    /// Cell and corner slot, for vertices on the lattice itself
    pub cell: Option<(CellId, usize)>,

    /// Index in the output mesh, once assigned
    pub mesh_index: Option<usize>,

    /// Staged destination for the next warp
    pub pos_next: Vector3<f64>,

    /// Whether this vertex sits inside the forbidden zone of some
    /// lower-order entity
    pub violating: bool,

    /// The entity whose forbidden zone this vertex falls in
    pub closest_geometry: Option<GeometryRef>,

    /// Entities this vertex was projected onto while conforming to a warp
    pub conformed_edge: Option<EdgeId>,
    pub conformed_face: Option<FaceId>,
    pub conformed_vertex: Option<VertexId>,

    /// Set once a warp has moved this vertex
    pub warped: bool,

    parent: Option<VertexId>,
}

impl Vertex {
    pub fn new(pos: Vector3<f64>, order: Order) -> Self {
        Self {
            pos,
            order,
            label: 0,
            materials: MaterialSet::EMPTY,
            cell: None,
            mesh_index: None,
            pos_next: pos,
            violating: false,
            closest_geometry: None,
            conformed_edge: None,
            conformed_face: None,
            conformed_vertex: None,
            warped: false,
            parent: None,
        }
    }
}

/// Arena of vertices with union-find merge resolution
#[derive(Default)]
pub struct VertexPool {
    verts: Vec<Vertex>,
}

impl VertexPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, v: Vertex) -> VertexId {
        let id = VertexId(self.verts.len());
        self.verts.push(v);
        id
    }

    pub fn len(&self) -> usize {
        self.verts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verts.is_empty()
    }

    /// Representative of the merge class, without mutating the forest
    pub fn find_root(&self, v: VertexId) -> VertexId {
        let mut v = v;
        while let Some(p) = self.verts[v.0].parent {
            v = p;
        }
        v
    }

    /// Representative of the merge class, compressing the path walked
    pub fn root(&mut self, v: VertexId) -> VertexId {
        let root = self.find_root(v);
        let mut v = v;
        while let Some(p) = self.verts[v.0].parent {
            self.verts[v.0].parent = Some(root);
            v = p;
        }
        root
    }

    /// Merges `v` into `target`'s class
    ///
    /// `v` itself is re-parented, so references held elsewhere keep
    /// resolving through it.
    pub fn snap(&mut self, v: VertexId, target: VertexId) {
        debug_assert!(self.find_root(target) != v, "snap would form a cycle");
        self.verts[v.0].parent = Some(target);
    }

    /// Whether two references resolve to the same vertex
    pub fn same_vertex(&self, a: VertexId, b: VertexId) -> bool {
        self.find_root(a) == self.find_root(b)
    }

    /// Position of the representative
    pub fn position(&self, v: VertexId) -> Vector3<f64> {
        self.verts[self.find_root(v).0].pos
    }

    /// Moves the representative
    pub fn set_position(&mut self, v: VertexId, pos: Vector3<f64>) {
        let r = self.root(v);
        self.verts[r.0].pos = pos;
    }

    /// Staged warp destination of the representative
    pub fn position_next(&self, v: VertexId) -> Vector3<f64> {
        self.verts[self.find_root(v).0].pos_next
    }

    pub fn set_position_next(&mut self, v: VertexId, pos: Vector3<f64>) {
        let r = self.root(v);
        self.verts[r.0].pos_next = pos;
    }

    /// Order of the representative
    pub fn order(&self, v: VertexId) -> Order {
        self.verts[self.find_root(v).0].order
    }

    /// Order the vertex itself was created with
    pub fn original_order(&self, v: VertexId) -> Order {
        self.verts[v.0].order
    }
}

impl std::ops::Index<VertexId> for VertexPool {
    type Output = Vertex;
    fn index(&self, id: VertexId) -> &Vertex {
        &self.verts[id.0]
    }
}

impl std::ops::IndexMut<VertexId> for VertexPool {
    fn index_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.verts[id.0]
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    fn pool_of(n: usize) -> (VertexPool, Vec<VertexId>) {
        let mut pool = VertexPool::new();
        let ids = (0..n)
            .map(|i| pool.insert(Vertex::new(Vector3::new(i as f64, 0.0, 0.0), Order::Vert)))
            .collect();
        (pool, ids)
    }

    #[test]
    fn snap_resolves_through_chain() {
        let (mut pool, v) = pool_of(3);
        pool[v[1]].order = Order::Cut;

        pool.snap(v[1], v[0]);
        pool.snap(v[2], v[1]);

        assert_eq!(pool.find_root(v[2]), v[0]);
        assert_eq!(pool.root(v[2]), v[0]);
        assert!(pool.same_vertex(v[1], v[2]));

        // order and position follow the representative
        assert_eq!(pool.order(v[1]), Order::Vert);
        assert_eq!(pool.original_order(v[1]), Order::Cut);
        assert_eq!(pool.position(v[2]), pool.position(v[0]));
    }

    #[test]
    fn moving_any_alias_moves_the_class() {
        let (mut pool, v) = pool_of(2);
        pool.snap(v[1], v[0]);

        let p = Vector3::new(0.25, 0.5, 0.75);
        pool.set_position(v[1], p);
        assert_eq!(pool.position(v[0]), p);
        assert_eq!(pool.position(v[1]), p);
    }

    #[test]
    fn material_sets() {
        let mut m = MaterialSet::EMPTY;
        assert!(m.is_empty());
        m.insert(0);
        m.insert(5);
        assert!(m.contains(5) && !m.contains(1));
        assert_eq!(m.len(), 2);

        let merged = m.union(MaterialSet::single(63));
        assert_eq!(merged.iter().collect::<Vec<_>>(), vec![0, 5, 63]);
    }
}
