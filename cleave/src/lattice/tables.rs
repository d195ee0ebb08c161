//! Static adjacency of the body-centered cubic lattice
//!
//! Every grid cell carries a fixed roster of mesh entities, addressed by
//! small indices:
//!
//! - 9 vertices: the 8 cube corners plus the dual vertex at the center
//! - 26 edges: 8 diagonals from the center to each corner, 6 dual edges
//!   connecting the center to neighboring cell centers, and 12 primal
//!   edges along the cube boundary
//! - 36 faces: 12 interior triangles (center edge + two diagonals) and 24
//!   triangles cutting through the 6 cube facets
//! - 24 tetrahedra, four around each dual edge
//!
//! Corner names combine upper/lower, left/right, and front/back, so `ULF`
//! is the upper-left-front corner. Edge and face names follow the same
//! scheme: `DULF` is the diagonal toward that corner, `CL` the dual edge
//! toward the left neighbor, `FUL` the interior triangle on the upper-left
//! primal edge, and `FLUF` the upper-front triangle crossing the left
//! facet.
//!
//! Entities on a shared boundary are stored once and referenced by every
//! touching cell, so each lookup here pairs a neighbor offset with an index
//! into that neighbor's roster. Offsets index [`EDGE_CELL_GROUP`], whose
//! final row (`CC`) is the cell itself.

/// Offset to a neighboring cell, in cell units
pub type CellOffset = [i64; 3];

/// Cell-relative entity reference: neighbor offset index, then entity index
pub type Slot = (usize, usize);

pub const VERTS_PER_CELL: usize = 9;
pub const EDGES_PER_CELL: usize = 26;
pub const FACES_PER_CELL: usize = 36;
pub const TETS_PER_CELL: usize = 24;

/// Vertex indices within a cell
pub mod vtx {
    pub const ULF: usize = 0;
    pub const ULB: usize = 1;
    pub const URF: usize = 2;
    pub const URB: usize = 3;
    pub const LLF: usize = 4;
    pub const LLB: usize = 5;
    pub const LRF: usize = 6;
    pub const LRB: usize = 7;

    /// Dual vertex at the cell center
    pub const C: usize = 8;
}

/// Edge indices within a cell
pub mod edge {
    // diagonals, center to corner
    pub const DULF: usize = 0;
    pub const DULB: usize = 1;
    pub const DURF: usize = 2;
    pub const DURB: usize = 3;
    pub const DLLF: usize = 4;
    pub const DLLB: usize = 5;
    pub const DLRF: usize = 6;
    pub const DLRB: usize = 7;

    // dual edges, center to neighbor center
    pub const CL: usize = 8;
    pub const CR: usize = 9;
    pub const CU: usize = 10;
    pub const CD: usize = 11;
    pub const CF: usize = 12;
    pub const CB: usize = 13;

    // primal edges along the cube boundary
    pub const UL: usize = 14;
    pub const UR: usize = 15;
    pub const UF: usize = 16;
    pub const UB: usize = 17;
    pub const LL: usize = 18;
    pub const LR: usize = 19;
    pub const LF: usize = 20;
    pub const LB: usize = 21;
    pub const FL: usize = 22;
    pub const FR: usize = 23;
    pub const BL: usize = 24;
    pub const BR: usize = 25;

    /// Marker for the cell itself in [`super::EDGE_CELL_GROUP`]
    pub const CC: usize = 26;
}

/// Face indices within a cell
pub mod face {
    // interior triangles on the upper primal edges
    pub const FUL: usize = 0;
    pub const FUR: usize = 1;
    pub const FUF: usize = 2;
    pub const FUB: usize = 3;

    // interior triangles on the lower primal edges
    pub const FLL: usize = 4;
    pub const FLR: usize = 5;
    pub const FLF: usize = 6;
    pub const FLB: usize = 7;

    // interior triangles on the four column edges
    pub const FFL: usize = 8;
    pub const FFR: usize = 9;
    pub const FBL: usize = 10;
    pub const FBR: usize = 11;

    // triangles cutting through the left facet
    pub const FLUF: usize = 12;
    pub const FLUB: usize = 13;
    pub const FLLF: usize = 14;
    pub const FLLB: usize = 15;

    // right facet
    pub const FRUF: usize = 16;
    pub const FRUB: usize = 17;
    pub const FRLF: usize = 18;
    pub const FRLB: usize = 19;

    // front facet
    pub const FFUL: usize = 20;
    pub const FFUR: usize = 21;
    pub const FFLL: usize = 22;
    pub const FFLR: usize = 23;

    // back facet
    pub const FBUL: usize = 24;
    pub const FBUR: usize = 25;
    pub const FBLL: usize = 26;
    pub const FBLR: usize = 27;

    // upper facet
    pub const FUFL: usize = 28;
    pub const FUFR: usize = 29;
    pub const FUBL: usize = 30;
    pub const FUBR: usize = 31;

    // lower facet
    pub const FDFL: usize = 32;
    pub const FDFR: usize = 33;
    pub const FDBL: usize = 34;
    pub const FDBR: usize = 35;
}

/// Tetrahedron indices within a cell
///
/// Only tets toward the right, upper, and back neighbors are stored on the
/// cell itself; the rest alias the matching slot of the adjacent cell.
pub mod tet {
    pub const TLU: usize = 0;
    pub const TLL: usize = 1;
    pub const TLF: usize = 2;
    pub const TLB: usize = 3;
    pub const TRU: usize = 4;
    pub const TRL: usize = 5;
    pub const TRF: usize = 6;
    pub const TRB: usize = 7;
    pub const TFT: usize = 8;
    pub const TFB: usize = 9;
    pub const TFL: usize = 10;
    pub const TFR: usize = 11;
    pub const TBT: usize = 12;
    pub const TBB: usize = 13;
    pub const TBL: usize = 14;
    pub const TBR: usize = 15;
    pub const TDF: usize = 16;
    pub const TDB: usize = 17;
    pub const TDL: usize = 18;
    pub const TDR: usize = 19;
    pub const TUF: usize = 20;
    pub const TUB: usize = 21;
    pub const TUL: usize = 22;
    pub const TUR: usize = 23;
}

use edge::*;
use face::*;
use tet::*;
use vtx::*;

/// Neighbor offsets, indexed by edge id plus the `CC` self row
pub const EDGE_CELL_GROUP: [CellOffset; 27] = [
    // DULF        DULB        DURF        DURB
    [-1, 1, -1], [-1, 1, 1], [1, 1, -1], [1, 1, 1],
    // DLLF        DLLB        DLRF        DLRB
    [-1, -1, -1], [-1, -1, 1], [1, -1, -1], [1, -1, 1],
    //  CL         CR         CU         CD         CF         CB
    [-1, 0, 0], [1, 0, 0], [0, 1, 0], [0, -1, 0], [0, 0, -1], [0, 0, 1],
    //  UL         UR         UF         UB
    [-1, 1, 0], [1, 1, 0], [0, 1, -1], [0, 1, 1],
    //  LL         LR         LF         LB
    [-1, -1, 0], [1, -1, 0], [0, -1, -1], [0, -1, 1],
    //  FL         FR         BL         BR         CC
    [-1, 0, -1], [1, 0, -1], [-1, 0, 1], [1, 0, 1], [0, 0, 0],
];

/// The 8 cells touching each primal vertex
///
/// Indexed by vertex id, then by the octant of the touching cell relative
/// to the vertex (octants are named like vertices, `ULF` first). Offsets
/// are relative to the cell that owns the vertex at the given corner.
pub const VERTEX_CELL_GROUP: [[CellOffset; 8]; 8] = [
    // ULF
    [[-1, 1, -1], [-1, 1, 0], [0, 1, -1], [0, 1, 0], [-1, 0, -1], [-1, 0, 0], [0, 0, -1], [0, 0, 0]],
    // ULB
    [[-1, 1, 0], [-1, 1, 1], [0, 1, 0], [0, 1, 1], [-1, 0, 0], [-1, 0, 1], [0, 0, 0], [0, 0, 1]],
    // URF
    [[0, 1, -1], [0, 1, 0], [1, 1, -1], [1, 1, 0], [0, 0, -1], [0, 0, 0], [1, 0, -1], [1, 0, 0]],
    // URB
    [[0, 1, 0], [0, 1, 1], [1, 1, 0], [1, 1, 1], [0, 0, 0], [0, 0, 1], [1, 0, 0], [1, 0, 1]],
    // LLF
    [[-1, 0, -1], [-1, 0, 0], [0, 0, -1], [0, 0, 0], [-1, -1, -1], [-1, -1, 0], [0, -1, -1], [0, -1, 0]],
    // LLB
    [[-1, 0, 0], [-1, 0, 1], [0, 0, 0], [0, 0, 1], [-1, -1, 0], [-1, -1, 1], [0, -1, 0], [0, -1, 1]],
    // LRF
    [[0, 0, -1], [0, 0, 0], [1, 0, -1], [1, 0, 0], [0, -1, -1], [0, -1, 0], [1, -1, -1], [1, -1, 0]],
    // LRB
    [[0, 0, 0], [0, 0, 1], [1, 0, 0], [1, 0, 1], [0, -1, 0], [0, -1, 1], [1, -1, 0], [1, -1, 1]],
];

/// The 14 edges touching a primal vertex: 6 primal, then 8 diagonal
///
/// Pairs are (octant into [`VERTEX_CELL_GROUP`], edge id).
pub const VERTEX_EDGE_GROUP: [Slot; 14] = [
    (URB, LF), (URB, FL), (URB, LL),
    (LLF, UB), (LLF, UR), (LLF, BR),
    (LRB, DULF), (LRF, DULB), (LLB, DURF), (LLF, DURB),
    (URB, DLLF), (URF, DLLB), (ULB, DLRF), (ULF, DLRB),
];

/// The 36 faces touching a primal vertex, as (octant, face id)
pub const VERTEX_FACE_GROUP: [Slot; 36] = [
    (ULF, FBLR), (URB, FFLL), (ULF, FRLB), (URB, FLLF), // touching upper edges
    (LLF, FBUR), (LRB, FFUL), (LLF, FRUB), (LRB, FLUF), // touching lower edges
    (LLF, FUBR), (LRF, FUBL), (LLB, FUFR), (LRB, FUFL), // touching columns
    (ULF, FLB), (ULB, FLF), (LLF, FUB), (LLB, FUF),     // left facet
    (URF, FLB), (URB, FLF), (LRF, FUB), (LRB, FUF),     // right facet
    (ULF, FLR), (URF, FLL), (LLF, FUR), (LRF, FUL),     // front facet
    (ULB, FLR), (URB, FLL), (LLB, FUR), (LRB, FUL),     // back facet
    (ULF, FBR), (URF, FBL), (ULB, FFR), (URB, FFL),     // upper facet
    (LLF, FBR), (LRF, FBL), (LLB, FFR), (LRB, FFL),     // lower facet
];

/// The 24 tets touching a primal vertex, as (octant, tet id)
pub const VERTEX_TET_GROUP: [Slot; 24] = [
    (LLF, TBT), (LLF, TUB), (ULB, TFB), (ULB, TDF), // left facet tets
    (LRF, TBT), (LRF, TUB), (URB, TFB), (URB, TDF), // right facet tets
    (ULF, TBR), (ULF, TRB), (URB, TFL), (URB, TLF), // upper facet tets
    (LLF, TBR), (LLF, TRB), (LRB, TFL), (LRB, TLF), // lower facet tets
    (LLF, TUR), (LLF, TRU), (URF, TDL), (URF, TLL), // front facet tets
    (LLB, TUR), (LLB, TRU), (URB, TDL), (URB, TLL), // back facet tets
];

/// The 4 faces around each dual edge, all within the edge's cell
///
/// Indexed by `edge - CL`.
pub const DUAL_EDGE_FACE_GROUP: [[usize; 4]; 6] = [
    [FLUF, FLUB, FLLF, FLLB], // CL
    [FRUF, FRUB, FRLF, FRLB], // CR
    [FUFL, FUFR, FUBL, FUBR], // CU
    [FDFL, FDFR, FDBL, FDBR], // CD
    [FFUL, FFUR, FFLL, FFLR], // CF
    [FBUL, FBUR, FBLL, FBLR], // CB
];

/// The 4 faces around each primal edge, as (offset into
/// [`EDGE_CELL_GROUP`], face id); indexed by `edge - UL`
pub const PRIMAL_EDGE_FACE_GROUP: [[Slot; 4]; 12] = [
    [(CC, FUL), (CL, FUR), (CU, FLL), (UL, FLR)], // UL
    [(CC, FUR), (CR, FUL), (CU, FLR), (UR, FLL)], // UR
    [(CC, FUF), (CF, FUB), (CU, FLF), (UF, FLB)], // UF
    [(CC, FUB), (CB, FUF), (CU, FLB), (UB, FLF)], // UB
    [(CC, FLL), (CL, FLR), (CD, FUL), (LL, FUR)], // LL
    [(CC, FLR), (CR, FLL), (CD, FUR), (LR, FUL)], // LR
    [(CC, FLF), (CF, FLB), (CD, FUF), (LF, FUB)], // LF
    [(CC, FLB), (CB, FLF), (CD, FUB), (LB, FUF)], // LB
    [(CC, FFL), (CL, FFR), (CF, FBL), (FL, FBR)], // FL
    [(CC, FFR), (CR, FFL), (CF, FBR), (FR, FBL)], // FR
    [(CC, FBL), (CL, FBR), (CB, FFL), (BL, FFR)], // BL
    [(CC, FBR), (CR, FBL), (CB, FFR), (BR, FFL)], // BR
];

/// The 6 faces around each diagonal edge, all within the edge's cell
pub const SHORT_EDGE_FACE_GROUP: [[usize; 6]; 8] = [
    [FUL, FUF, FFL, FFUL, FLUF, FUFL], // DULF
    [FUL, FUB, FBL, FBUL, FLUB, FUBL], // DULB
    [FUR, FUF, FFR, FFUR, FRUF, FUFR], // DURF
    [FUR, FUB, FBR, FBUR, FRUB, FUBR], // DURB
    [FLL, FLF, FFL, FFLL, FLLF, FDFL], // DLLF
    [FLL, FLB, FBL, FBLL, FLLB, FDBL], // DLLB
    [FLR, FLF, FFR, FFLR, FRLF, FDFR], // DLRF
    [FLR, FLB, FBR, FBLR, FRLB, FDBR], // DLRB
];

/// The 4 tets around each dual edge, all within the edge's cell
pub const DUAL_EDGE_TET_GROUP: [[usize; 4]; 6] = [
    [TLU, TLL, TLF, TLB], // CL
    [TRU, TRL, TRF, TRB], // CR
    [TUF, TUB, TUL, TUR], // CU
    [TDF, TDB, TDL, TDR], // CD
    [TFT, TFB, TFL, TFR], // CF
    [TBT, TBB, TBL, TBR], // CB
];

/// The 4 tets around each primal edge, as (offset, tet id)
pub const PRIMAL_EDGE_TET_GROUP: [[Slot; 4]; 12] = [
    [(CC, TLU), (CC, TUL), (CL, TUR), (CU, TLL)], // UL
    [(CC, TRU), (CC, TUR), (CR, TUL), (CU, TRL)], // UR
    [(CC, TFT), (CC, TUF), (CF, TUB), (CU, TFB)], // UF
    [(CC, TBT), (CC, TUB), (CB, TUF), (CU, TBB)], // UB
    [(CC, TLL), (CC, TDL), (CL, TDR), (CD, TLU)], // LL
    [(CC, TRL), (CC, TDR), (CR, TDL), (CD, TRU)], // LR
    [(CC, TFB), (CC, TDF), (CF, TDB), (CD, TFT)], // LF
    [(CC, TBB), (CC, TDB), (CB, TDF), (CD, TBT)], // LB
    [(CC, TLF), (CC, TFL), (FL, TBR), (FL, TRB)], // FL
    [(CC, TRF), (CC, TFR), (FR, TBL), (FR, TLB)], // FR
    [(CC, TLB), (CC, TBL), (BL, TFR), (BL, TRF)], // BL
    [(CC, TRB), (CC, TBR), (BR, TFL), (BR, TLF)], // BR
];

/// The 6 tets around each diagonal edge, all within the edge's cell
pub const SHORT_EDGE_TET_GROUP: [[usize; 6]; 8] = [
    [TUL, TUF, TLU, TLF, TFL, TFT], // DULF
    [TUL, TUB, TLU, TLB, TBL, TBT], // DULB
    [TUR, TUF, TRU, TRF, TFR, TFT], // DURF
    [TUR, TUB, TRU, TRB, TBR, TBT], // DURB
    [TDL, TDF, TLL, TLF, TFL, TFB], // DLLF
    [TDL, TDB, TLL, TLB, TBL, TBB], // DLLB
    [TDR, TDF, TRL, TRF, TFR, TFB], // DLRF
    [TDR, TDB, TRL, TRB, TBR, TBB], // DLRB
];

/// The 3 vertices of each face, as (offset, vertex id)
///
/// The dual vertex of the owning cell always comes first.
pub const FACE_VERTEX_GROUP: [[Slot; 3]; 36] = [
    [(CC, C), (CC, ULF), (CC, ULB)],  // FUL
    [(CC, C), (CC, URF), (CC, URB)],  // FUR
    [(CC, C), (CC, ULF), (CC, URF)],  // FUF
    [(CC, C), (CC, ULB), (CC, URB)],  // FUB
    [(CC, C), (CC, LLF), (CC, LLB)],  // FLL
    [(CC, C), (CC, LRF), (CC, LRB)],  // FLR
    [(CC, C), (CC, LLF), (CC, LRF)],  // FLF
    [(CC, C), (CC, LLB), (CC, LRB)],  // FLB
    [(CC, C), (CC, LLF), (CC, ULF)],  // FFL
    [(CC, C), (CC, LRF), (CC, URF)],  // FFR
    [(CC, C), (CC, LLB), (CC, ULB)],  // FBL
    [(CC, C), (CC, LRB), (CC, URB)],  // FBR
    [(CC, C), (CC, ULF), (CL, C)],    // FLUF
    [(CC, C), (CC, ULB), (CL, C)],    // FLUB
    [(CC, C), (CC, LLF), (CL, C)],    // FLLF
    [(CC, C), (CC, LLB), (CL, C)],    // FLLB
    [(CC, C), (CC, URF), (CR, C)],    // FRUF
    [(CC, C), (CC, URB), (CR, C)],    // FRUB
    [(CC, C), (CC, LRF), (CR, C)],    // FRLF
    [(CC, C), (CC, LRB), (CR, C)],    // FRLB
    [(CC, C), (CC, ULF), (CF, C)],    // FFUL
    [(CC, C), (CC, URF), (CF, C)],    // FFUR
    [(CC, C), (CC, LLF), (CF, C)],    // FFLL
    [(CC, C), (CC, LRF), (CF, C)],    // FFLR
    [(CC, C), (CC, ULB), (CB, C)],    // FBUL
    [(CC, C), (CC, URB), (CB, C)],    // FBUR
    [(CC, C), (CC, LLB), (CB, C)],    // FBLL
    [(CC, C), (CC, LRB), (CB, C)],    // FBLR
    [(CC, C), (CC, ULF), (CU, C)],    // FUFL
    [(CC, C), (CC, URF), (CU, C)],    // FUFR
    [(CC, C), (CC, ULB), (CU, C)],    // FUBL
    [(CC, C), (CC, URB), (CU, C)],    // FUBR
    [(CC, C), (CC, LLF), (CD, C)],    // FDFL
    [(CC, C), (CC, LRF), (CD, C)],    // FDFR
    [(CC, C), (CC, LLB), (CD, C)],    // FDBL
    [(CC, C), (CC, LRB), (CD, C)],    // FDBR
];

/// The 3 edges of each face, as (offset, edge id)
pub const FACE_EDGE_GROUP: [[Slot; 3]; 36] = [
    [(CC, UL), (CC, DULF), (CC, DULB)], // FUL
    [(CC, UR), (CC, DURF), (CC, DURB)], // FUR
    [(CC, UF), (CC, DULF), (CC, DURF)], // FUF
    [(CC, UB), (CC, DULB), (CC, DURB)], // FUB
    [(CC, LL), (CC, DLLF), (CC, DLLB)], // FLL
    [(CC, LR), (CC, DLRF), (CC, DLRB)], // FLR
    [(CC, LF), (CC, DLLF), (CC, DLRF)], // FLF
    [(CC, LB), (CC, DLLB), (CC, DLRB)], // FLB
    [(CC, FL), (CC, DLLF), (CC, DULF)], // FFL
    [(CC, FR), (CC, DLRF), (CC, DURF)], // FFR
    [(CC, BL), (CC, DLLB), (CC, DULB)], // FBL
    [(CC, BR), (CC, DLRB), (CC, DURB)], // FBR
    [(CC, CL), (CC, DULF), (CL, DURF)], // FLUF
    [(CC, CL), (CC, DULB), (CL, DURB)], // FLUB
    [(CC, CL), (CC, DLLF), (CL, DLRF)], // FLLF
    [(CC, CL), (CC, DLLB), (CL, DLRB)], // FLLB
    [(CC, CR), (CC, DURF), (CR, DULF)], // FRUF
    [(CC, CR), (CC, DURB), (CR, DULB)], // FRUB
    [(CC, CR), (CC, DLRF), (CR, DLLF)], // FRLF
    [(CC, CR), (CC, DLRB), (CR, DLLB)], // FRLB
    [(CC, CF), (CC, DULF), (CF, DULB)], // FFUL
    [(CC, CF), (CC, DURF), (CF, DURB)], // FFUR
    [(CC, CF), (CC, DLLF), (CF, DLLB)], // FFLL
    [(CC, CF), (CC, DLRF), (CF, DLRB)], // FFLR
    [(CC, CB), (CC, DULB), (CB, DULF)], // FBUL
    [(CC, CB), (CC, DURB), (CB, DURF)], // FBUR
    [(CC, CB), (CC, DLLB), (CB, DLLF)], // FBLL
    [(CC, CB), (CC, DLRB), (CB, DLRF)], // FBLR
    [(CC, CU), (CC, DULF), (CU, DLLF)], // FUFL
    [(CC, CU), (CC, DURF), (CU, DLRF)], // FUFR
    [(CC, CU), (CC, DULB), (CU, DLLB)], // FUBL
    [(CC, CU), (CC, DURB), (CU, DLRB)], // FUBR
    [(CC, CD), (CC, DLLF), (CD, DULF)], // FDFL
    [(CC, CD), (CC, DLRF), (CD, DURF)], // FDFR
    [(CC, CD), (CC, DLLB), (CD, DULB)], // FDBL
    [(CC, CD), (CC, DLRB), (CD, DURB)], // FDBR
];

/// The 2 tets adjacent to each face, within the face's cell
pub const FACE_TET_GROUP: [[usize; 2]; 36] = [
    [TLU, TUL], // FUL
    [TRU, TUR], // FUR
    [TFT, TUF], // FUF
    [TBT, TUB], // FUB
    [TLL, TDL], // FLL
    [TRL, TDR], // FLR
    [TFB, TDF], // FLF
    [TBB, TDB], // FLB
    [TLF, TFL], // FFL
    [TRF, TFR], // FFR
    [TLB, TBL], // FBL
    [TRB, TBR], // FBR
    [TLU, TLF], // FLUF
    [TLU, TLB], // FLUB
    [TLL, TLF], // FLLF
    [TLL, TLB], // FLLB
    [TRU, TRF], // FRUF
    [TRU, TRB], // FRUB
    [TRL, TRF], // FRLF
    [TRL, TRB], // FRLB
    [TFT, TFL], // FFUL
    [TFT, TFR], // FFUR
    [TFB, TFL], // FFLL
    [TFB, TFR], // FFLR
    [TBT, TBL], // FBUL
    [TBT, TBR], // FBUR
    [TBB, TBL], // FBLL
    [TBB, TBR], // FBLR
    [TUF, TUL], // FUFL
    [TUF, TUR], // FUFR
    [TUB, TUL], // FUBL
    [TUB, TUR], // FUBR
    [TDF, TDL], // FDFL
    [TDF, TDR], // FDFR
    [TDB, TDL], // FDBL
    [TDB, TDR], // FDBR
];

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn edge_cell_offsets() {
        assert_eq!(EDGE_CELL_GROUP[CC], [0, 0, 0]);
        for e in 0..8 {
            // diagonals point at corner-adjacent cells
            assert!(EDGE_CELL_GROUP[e].iter().all(|&d| d == 1 || d == -1));
        }
        for e in CL..=CB {
            let nonzero = EDGE_CELL_GROUP[e].iter().filter(|&&d| d != 0).count();
            assert_eq!(nonzero, 1, "dual edge {e} should be facet-adjacent");
        }
        for e in UL..=BR {
            let nonzero = EDGE_CELL_GROUP[e].iter().filter(|&&d| d != 0).count();
            assert_eq!(nonzero, 2, "primal edge {e} should be edge-adjacent");
        }
    }

    #[test]
    fn vertex_cells_form_octant_block() {
        for v in 0..8 {
            let row = &VERTEX_CELL_GROUP[v];
            // owning cell is always present
            assert!(row.contains(&[0, 0, 0]));
            for axis in 0..3 {
                let mut vals: Vec<i64> = row.iter().map(|o| o[axis]).collect();
                vals.sort_unstable();
                vals.dedup();
                assert_eq!(vals.len(), 2);
                assert_eq!(vals[1] - vals[0], 1);
            }
            // all eight cells distinct
            let mut cells = row.to_vec();
            cells.sort_unstable();
            cells.dedup();
            assert_eq!(cells.len(), 8);
        }
    }

    #[test]
    fn every_tet_has_one_dual_edge() {
        let mut seen = [0; TETS_PER_CELL];
        for row in DUAL_EDGE_TET_GROUP {
            for t in row {
                seen[t] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn every_tet_has_two_diagonal_edges() {
        let mut seen = [0; TETS_PER_CELL];
        for row in SHORT_EDGE_TET_GROUP {
            for t in row {
                seen[t] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 2));
    }

    #[test]
    fn every_tet_has_three_local_faces() {
        // the fourth face of each tet lives in the neighbor's index space
        let mut seen = [0; TETS_PER_CELL];
        for row in FACE_TET_GROUP {
            for t in row {
                seen[t] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 3));
    }

    #[test]
    fn diagonal_edge_face_counts() {
        // interior faces carry two diagonals, crossing faces one
        let mut seen = [0; FACES_PER_CELL];
        for row in SHORT_EDGE_FACE_GROUP {
            for f in row {
                seen[f] += 1;
            }
        }
        for (f, &n) in seen.iter().enumerate() {
            let expected = if f < 12 { 2 } else { 1 };
            assert_eq!(n, expected, "face {f}");
        }
    }

    #[test]
    fn dual_edge_faces_cover_crossing_faces() {
        let mut seen = [0; FACES_PER_CELL];
        for row in DUAL_EDGE_FACE_GROUP {
            for f in row {
                seen[f] += 1;
            }
        }
        for (f, &n) in seen.iter().enumerate() {
            let expected = if f < 12 { 0 } else { 1 };
            assert_eq!(n, expected, "face {f}");
        }
    }

    #[test]
    fn faces_lead_with_dual_vertex() {
        for row in FACE_VERTEX_GROUP {
            assert_eq!(row[0], (CC, C));
        }
    }

    #[test]
    fn face_edges_match_face_kind() {
        for (f, row) in FACE_EDGE_GROUP.iter().enumerate() {
            if f < 12 {
                // interior: one primal edge and two local diagonals
                assert!(row[0].1 >= UL);
                assert!(row.iter().all(|&(c, _)| c == CC));
            } else {
                // crossing: one dual edge, one local and one remote diagonal
                assert!((CL..=CB).contains(&row[0].1));
                assert_eq!(row[0].0, CC);
                assert_eq!(row[1].0, CC);
                assert!(row[1].1 < 8 && row[2].1 < 8);
                assert_eq!(row[2].0, row[0].1);
            }
        }
    }
}
