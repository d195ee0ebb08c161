//! Case tables for subdividing cut lattice tetrahedra
//!
//! A lattice tet carries up to 15 vertices: its 4 corners, a cut point on
//! each of its 6 edges, a triple point on each of its 4 faces, and one
//! quadruple point in the interior. Which of those actually exist is
//! summarized by a 6-bit *interface key*, one bit per edge in canonical
//! order (`AB` is the high bit, `BD` the low bit). Only 15 of the 64 keys
//! correspond to realizable material patterns; the rest indicate corrupted
//! dominance data and have no table rows.
//!
//! Four tables are keyed on the interface key:
//!
//! - [`generalization`]: for every abstract slot of a fully cut tet, the
//!   concrete slot that stands in for it when the interface point is
//!   absent. Applying this row leaves every tet with all 15 slots filled,
//!   so downstream passes never branch on missing points.
//! - [`stencil`]: the output micro-tets, four slots each.
//! - [`materials`]: which corner's material each micro-tet inherits.
//! - [`interface_pairs`]: the (cut, opposite point) pairs spanning the
//!   material interface inside the tet, used to rebuild a cut after its
//!   lattice vertex moves.
//!
//! The 24 tets of a cell alternate between two mirrored subdivisions, so
//! every table comes in an `Even` and an `Odd` variant. [`PARITY_FLIP`]
//! gives the flip state per tet index; a flipped tet reads the `Even`
//! generalization and interface rows but the `Odd` stencil and material
//! rows, and an unflipped tet the reverse.

use static_assertions::const_assert_eq;

/// Slots in the 15-entry vertex list of a lattice tet.
///
/// Corners come first, then cuts on the edge named by their endpoints,
/// then face triples, then the quadruple point.
pub mod slot {
    pub const A: usize = 0;
    pub const B: usize = 1;
    pub const C: usize = 2;
    pub const D: usize = 3;

    pub const AB: usize = 4;
    pub const AC: usize = 5;
    pub const AD: usize = 6;
    pub const BC: usize = 7;
    pub const CD: usize = 8;
    pub const BD: usize = 9;

    pub const ABC: usize = 10;
    pub const ACD: usize = 11;
    pub const ABD: usize = 12;
    pub const BCD: usize = 13;

    pub const ABCD: usize = 14;
}

use slot::{A, AB, ABC, ABCD, ABD, AC, ACD, AD, B, BC, BCD, BD, C, CD, D};

/// Number of slots in a generalized vertex list
pub const SLOTS_PER_TET: usize = 15;

/// Key bit contributed by each edge slot, in slot order `AB..BD`
pub const EDGE_KEY_BITS: [u8; 6] = [32, 16, 8, 4, 2, 1];

/// The interface keys that correspond to realizable dominance patterns
pub const VALID_KEYS: [u8; 15] = [
    0, 11, 22, 29, 31, 37, 46, 47, 51, 55, 56, 59, 61, 62, 63,
];

/// Returns true if `key` is realizable.
///
/// An invalid key means two non-adjacent edges claim cuts in a pattern no
/// material assignment can produce; encountering one downstream is a logic
/// error, not an input condition.
pub fn is_key_valid(key: u8) -> bool {
    let mut i = 0;
    while i < VALID_KEYS.len() {
        if VALID_KEYS[i] == key {
            return true;
        }
        i += 1;
    }
    false
}

/// Mirror state of each of a cell's 24 tets
pub const PARITY_FLIP: [bool; 24] = [
    false, true, false, true, false, true, false, true, // left, right
    false, true, false, true, false, true, true, false, // front, back
    false, true, false, true, false, true, false, true, // down, up
];

/// Which mirror variant of a table to read
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Variant {
    Even,
    Odd,
}

/// Generalized 15-slot vertex list for `key`.
///
/// Slots whose interface point exists map to themselves; absent slots map
/// to the lower-order point that geometrically collapses onto them.
///
/// # Panics
/// If `key` is not one of [`VALID_KEYS`].
pub fn generalization(key: u8, variant: Variant) -> &'static [usize; SLOTS_PER_TET] {
    let table = match variant {
        Variant::Even => &VERTEX_EVEN,
        Variant::Odd => &VERTEX_ODD,
    };
    match &table[key as usize] {
        Some(row) => row,
        None => panic!("invalid interface key {key}"),
    }
}

/// Output micro-tets for `key`, as slot quadruples in output winding.
///
/// # Panics
/// If `key` is not one of [`VALID_KEYS`].
pub fn stencil(key: u8, variant: Variant) -> &'static [[usize; 4]] {
    let table = match variant {
        Variant::Even => &STENCIL_EVEN,
        Variant::Odd => &STENCIL_ODD,
    };
    match table[key as usize] {
        Some(rows) => rows,
        None => panic!("invalid interface key {key}"),
    }
}

/// Corner slot whose material each micro-tet of [`stencil`] inherits.
///
/// # Panics
/// If `key` is not one of [`VALID_KEYS`].
pub fn materials(key: u8, variant: Variant) -> &'static [usize] {
    let table = match variant {
        Variant::Even => &MATERIAL_EVEN,
        Variant::Odd => &MATERIAL_ODD,
    };
    match table[key as usize] {
        Some(rows) => rows,
        None => panic!("invalid interface key {key}"),
    }
}

/// Pairs of slots spanning the material interface inside a tet with `key`.
///
/// The first slot of a pair is (almost always) a cut; together with the
/// second it bounds one triangle fan of the interface surface.
///
/// # Panics
/// If `key` is not one of [`VALID_KEYS`].
pub fn interface_pairs(key: u8, variant: Variant) -> &'static [[usize; 2]] {
    let table = match variant {
        Variant::Even => &INTERFACE_EVEN,
        Variant::Odd => &INTERFACE_ODD,
    };
    match table[key as usize] {
        Some(pairs) => pairs,
        None => panic!("invalid interface key {key}"),
    }
}

// Table data. The Even variant is written out in full; the Odd variant
// overrides the keys where the mirrored subdivision disagrees.

const VERTEX_EVEN: [Option<[usize; SLOTS_PER_TET]>; 64] = {
    let mut t = [None; 64];
    t[0] = Some([A, B, C, D, A, A, A, C, C, B, A, A, A, C, A]);
    t[11] = Some([A, B, C, D, A, A, AD, C, CD, BD, A, AD, AD, CD, AD]);
    t[22] = Some([A, B, C, D, A, AC, A, BC, CD, B, AC, AC, A, BC, AC]);
    t[29] = Some([A, B, C, D, A, AC, AD, BC, C, BD, AC, AC, AD, BC, AC]);
    t[31] = Some([A, B, C, D, A, AC, AD, BC, CD, BD, AC, ACD, AD, BCD, ACD]);
    t[37] = Some([A, B, C, D, AB, A, A, BC, C, BD, AB, A, AB, BC, AB]);
    t[46] = Some([A, B, C, D, AB, A, AD, BC, CD, B, AB, AD, AB, BC, AB]);
    t[47] = Some([A, B, C, D, AB, A, AD, BC, CD, BD, AB, AD, ABD, BCD, ABD]);
    t[51] = Some([A, B, C, D, AB, AC, A, C, CD, BD, AC, AC, AB, CD, AC]);
    t[55] = Some([A, B, C, D, AB, AC, A, BC, CD, BD, ABC, AC, AB, BCD, ABC]);
    t[56] = Some([A, B, C, D, AB, AC, AD, C, C, B, AC, AC, AB, C, AC]);
    t[59] = Some([A, B, C, D, AB, AC, AD, C, CD, BD, AC, ACD, ABD, CD, ACD]);
    t[61] = Some([A, B, C, D, AB, AC, AD, BC, C, BD, ABC, AC, ABD, BC, ABC]);
    t[62] = Some([A, B, C, D, AB, AC, AD, BC, CD, B, ABC, ACD, AB, BC, ABC]);
    t[63] = Some([A, B, C, D, AB, AC, AD, BC, CD, BD, ABC, ACD, ABD, BCD, ABCD]);
    t
};

const VERTEX_ODD: [Option<[usize; SLOTS_PER_TET]>; 64] = {
    let mut t = VERTEX_EVEN;
    t[0] = Some([A, B, C, D, A, A, A, C, C, D, A, A, A, C, A]);
    t[22] = Some([A, B, C, D, A, AC, A, BC, CD, D, AC, AC, A, CD, AC]);
    t[46] = Some([A, B, C, D, AB, A, AD, BC, CD, D, AB, AD, AD, CD, AD]);
    t[56] = Some([A, B, C, D, AB, AC, AD, C, C, D, AC, AC, AD, C, AC]);
    t[62] = Some([A, B, C, D, AB, AC, AD, BC, CD, D, ABC, ACD, AD, CD, ABC]);
    t
};

/// Stencil of a fully subdivided tet: six micro-tets around each corner,
/// paired across the quadruple point.
const FULL_STENCIL: [[usize; 4]; 24] = [
    [ABCD, AB, ABD, A],
    [A, AB, ABC, ABCD],
    [ABCD, AC, ABC, A],
    [A, AD, ABD, ABCD],
    [ABCD, AD, ACD, A],
    [A, AC, ACD, ABCD],
    [B, BD, BCD, ABCD],
    [ABCD, BD, ABD, B],
    [B, AB, ABD, ABCD],
    [ABCD, BC, BCD, B],
    [B, BC, ABC, ABCD],
    [ABCD, AB, ABC, B],
    [C, BC, BCD, ABCD],
    [ABCD, BC, ABC, C],
    [C, AC, ABC, ABCD],
    [ABCD, CD, BCD, C],
    [C, CD, ACD, ABCD],
    [ABCD, AC, ACD, C],
    [D, CD, BCD, ABCD],
    [ABCD, CD, ACD, D],
    [D, AD, ACD, ABCD],
    [ABCD, BD, BCD, D],
    [D, BD, ABD, ABCD],
    [ABCD, AD, ABD, D],
];

const FULL_MATERIALS: [usize; 24] = [
    A, A, A, A, A, A, B, B, B, B, B, B, C, C, C, C, C, C, D, D, D, D, D, D,
];

const STENCIL_EVEN: [Option<&'static [[usize; 4]]>; 64] = {
    let mut t: [Option<&'static [[usize; 4]]>; 64] = [None; 64];
    t[0] = Some(&[[A, B, C, D]]);
    t[11] = Some(&[
        [BD, AD, CD, B],
        [B, C, AD, CD],
        [A, B, C, AD],
        [D, AD, CD, BD],
    ]);
    t[22] = Some(&[
        [CD, D, AC, B],
        [AC, B, D, A],
        [CD, AC, BC, B],
        [C, AC, BC, CD],
    ]);
    t[29] = Some(&[
        [BD, AC, BC, B],
        [B, AC, AD, BD],
        [A, B, AC, AD],
        [C, D, AC, BC],
        [D, AC, BC, BD],
        [BD, AC, AD, D],
    ]);
    t[31] = Some(&FULL_STENCIL);
    t[37] = Some(&[
        [BD, AB, BC, B],
        [C, D, AB, BC],
        [A, C, D, AB],
        [D, AB, BC, BD],
    ]);
    t[46] = Some(&[
        [CD, D, AD, B],
        [CD, AD, BC, B],
        [B, AB, AD, BC],
        [C, AD, BC, CD],
        [BC, AB, AD, C],
        [AD, C, AB, A],
    ]);
    t[47] = Some(&FULL_STENCIL);
    t[51] = Some(&[
        [BD, AC, CD, B],
        [BD, AB, AC, B],
        [B, C, AC, CD],
        [D, AC, CD, BD],
        [D, AB, AC, BD],
        [A, D, AB, AC],
    ]);
    t[55] = Some(&FULL_STENCIL);
    t[56] = Some(&[
        [A, AB, AC, AD],
        [AC, C, D, B],
        [B, D, AC, AD],
        [AD, AB, AC, B],
    ]);
    t[59] = Some(&FULL_STENCIL);
    t[61] = Some(&FULL_STENCIL);
    t[62] = Some(&FULL_STENCIL);
    t[63] = Some(&FULL_STENCIL);
    t
};

const STENCIL_ODD: [Option<&'static [[usize; 4]]>; 64] = {
    let mut t = STENCIL_EVEN;
    t[22] = Some(&[
        [C, AC, BC, CD],
        [CD, AC, BC, D],
        [BC, D, AC, B],
        [AC, B, D, A],
    ]);
    t[46] = Some(&[
        [C, AB, BC, CD],
        [CD, AB, AD, C],
        [AD, C, AB, A],
        [CD, AB, BC, D],
        [D, AB, AD, CD],
        [BC, D, AB, B],
    ]);
    t[56] = Some(&[
        [A, AB, AC, AD],
        [AC, C, D, B],
        [AC, D, AB, B],
        [AD, AB, AC, D],
    ]);
    t
};

const MATERIAL_EVEN: [Option<&'static [usize]>; 64] = {
    let mut t: [Option<&'static [usize]>; 64] = [None; 64];
    t[0] = Some(&[A]);
    t[11] = Some(&[B, B, A, D]);
    t[22] = Some(&[D, B, B, C]);
    t[29] = Some(&[B, B, A, C, D, D]);
    t[31] = Some(&FULL_MATERIALS);
    t[37] = Some(&[B, C, A, D]);
    t[46] = Some(&[D, B, B, C, C, C]);
    t[47] = Some(&FULL_MATERIALS);
    t[51] = Some(&[B, B, B, D, D, A]);
    t[55] = Some(&FULL_MATERIALS);
    t[56] = Some(&[A, C, B, B]);
    t[59] = Some(&FULL_MATERIALS);
    t[61] = Some(&FULL_MATERIALS);
    t[62] = Some(&FULL_MATERIALS);
    t[63] = Some(&FULL_MATERIALS);
    t
};

const MATERIAL_ODD: [Option<&'static [usize]>; 64] = {
    let mut t = MATERIAL_EVEN;
    t[22] = Some(&[C, D, D, B]);
    t[46] = Some(&[C, C, C, D, D, D]);
    t[56] = Some(&[A, C, D, D]);
    t
};

const INTERFACE_EVEN: [Option<&'static [[usize; 2]]>; 64] = {
    let mut t: [Option<&'static [[usize; 2]]>; 64] = [None; 64];
    t[0] = Some(&[]);
    t[11] = Some(&[[BD, CD]]);
    t[22] = Some(&[[CD, BC]]);
    t[29] = Some(&[[BD, AD], [BD, BC]]);
    t[31] = Some(&[[BC, AC], [BC, BCD], [CD, BCD], [BD, AD], [BD, BCD]]);
    t[37] = Some(&[[BD, BC]]);
    t[46] = Some(&[[CD, AD], [CD, BC]]);
    t[47] = Some(&[[BC, AB], [BC, BCD], [CD, AD], [CD, BCD], [BD, BCD]]);
    t[51] = Some(&[[BD, AB], [BD, CD]]);
    t[55] = Some(&[[BC, BCD], [CD, AC], [CD, BCD], [BD, AB], [BD, BCD]]);
    t[56] = Some(&[[AD, AB]]);
    t[59] = Some(&[[AB, AC], [AB, ABD], [AD, ABD], [BD, ABD], [BD, CD]]);
    t[61] = Some(&[[AB, ABD], [AD, ABD], [AD, AC], [BD, ABD], [BD, BC]]);
    t[62] = Some(&[[AC, ACD], [AD, AB], [AD, ACD], [CD, ACD], [CD, BC]]);
    t[63] = Some(&[
        [AB, ABC],
        [AB, ABD],
        [AC, ABC],
        [AC, ACD],
        [AD, ABD],
        [AD, ACD],
        [BC, ABC],
        [BC, BCD],
        [BD, ABD],
        [BD, BCD],
        [CD, ACD],
        [CD, BCD],
    ]);
    t
};

const INTERFACE_ODD: [Option<&'static [[usize; 2]]>; 64] = {
    let mut t = INTERFACE_EVEN;
    t[22] = Some(&[[BC, CD]]);
    t[46] = Some(&[[BC, AB], [BC, CD]]);
    t[56] = Some(&[[AB, AD]]);
    t[62] = Some(&[
        [AB, AD],
        [AC, ACD],
        [AD, ACD],
        [BC, CD],
        [CD, ACD],
        [D, AD],
        [D, CD],
    ]);
    t
};

const fn defined_rows<T: Copy>(table: &[Option<T>; 64]) -> usize {
    let mut n = 0;
    let mut i = 0;
    while i < table.len() {
        if table[i].is_some() {
            n += 1;
        }
        i += 1;
    }
    n
}

const_assert_eq!(defined_rows(&VERTEX_EVEN), VALID_KEYS.len());
const_assert_eq!(defined_rows(&VERTEX_ODD), VALID_KEYS.len());
const_assert_eq!(defined_rows(&STENCIL_EVEN), VALID_KEYS.len());
const_assert_eq!(defined_rows(&STENCIL_ODD), VALID_KEYS.len());
const_assert_eq!(defined_rows(&MATERIAL_EVEN), VALID_KEYS.len());
const_assert_eq!(defined_rows(&MATERIAL_ODD), VALID_KEYS.len());
const_assert_eq!(defined_rows(&INTERFACE_EVEN), VALID_KEYS.len());
const_assert_eq!(defined_rows(&INTERFACE_ODD), VALID_KEYS.len());

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    const VARIANTS: [Variant; 2] = [Variant::Even, Variant::Odd];

    /// Key mask of the three edges bounding each face slot
    fn face_mask(s: usize) -> u8 {
        match s {
            ABC => 32 | 16 | 4,
            ACD => 16 | 2 | 8,
            ABD => 32 | 8 | 1,
            BCD => 4 | 2 | 1,
            _ => unreachable!(),
        }
    }

    #[test]
    fn tables_cover_exactly_the_valid_keys() {
        for key in 0..64u8 {
            let valid = is_key_valid(key);
            let k = key as usize;
            assert_eq!(VERTEX_EVEN[k].is_some(), valid, "vertex even {key}");
            assert_eq!(VERTEX_ODD[k].is_some(), valid, "vertex odd {key}");
            assert_eq!(STENCIL_EVEN[k].is_some(), valid, "stencil even {key}");
            assert_eq!(STENCIL_ODD[k].is_some(), valid, "stencil odd {key}");
            assert_eq!(MATERIAL_EVEN[k].is_some(), valid, "material even {key}");
            assert_eq!(MATERIAL_ODD[k].is_some(), valid, "material odd {key}");
            assert_eq!(INTERFACE_EVEN[k].is_some(), valid, "interface even {key}");
            assert_eq!(INTERFACE_ODD[k].is_some(), valid, "interface odd {key}");
        }
    }

    #[test]
    fn generalization_fixes_present_points_and_replaces_absent_ones() {
        for &key in &VALID_KEYS {
            for v in VARIANTS {
                let row = generalization(key, v);
                assert_eq!(&row[..4], &[A, B, C, D], "key {key}");
                for (i, &bit) in EDGE_KEY_BITS.iter().enumerate() {
                    let s = AB + i;
                    if key & bit != 0 {
                        assert_eq!(row[s], s, "cut slot {s} of key {key}");
                    } else {
                        assert_ne!(row[s], s, "absent slot {s} of key {key}");
                        assert!(row[s] < s, "substitute must be lower order");
                    }
                }
                for s in ABC..=BCD {
                    let m = face_mask(s);
                    if key & m == m {
                        assert_eq!(row[s], s, "triple slot {s} of key {key}");
                    } else {
                        assert_ne!(row[s], s, "absent triple {s} of key {key}");
                    }
                }
                if key == 63 {
                    assert_eq!(row[ABCD], ABCD);
                } else {
                    assert_ne!(row[ABCD], ABCD);
                }
            }
        }
    }

    #[test]
    fn stencil_rows_pair_with_materials() {
        for &key in &VALID_KEYS {
            for v in VARIANTS {
                let tets = stencil(key, v);
                let mats = materials(key, v);
                assert_eq!(tets.len(), mats.len(), "key {key}");
                assert!((1..=24).contains(&tets.len()));
                for row in tets {
                    for &s in row {
                        assert!(s < SLOTS_PER_TET);
                    }
                }
                for &m in mats {
                    assert!(m <= D, "materials name corners only");
                }
            }
        }
    }

    #[test]
    fn full_key_stencil_covers_every_corner_six_times() {
        for v in VARIANTS {
            let mats = materials(63, v);
            assert_eq!(mats.len(), 24);
            for corner in A..=D {
                let n = mats.iter().filter(|&&m| m == corner).count();
                assert_eq!(n, 6);
            }
            assert_eq!(stencil(63, v).len(), 24);
        }
    }

    #[test]
    fn variants_differ_only_at_mirror_sensitive_keys() {
        for &key in &VALID_KEYS {
            let vertex_same = generalization(key, Variant::Even) == generalization(key, Variant::Odd);
            assert_eq!(vertex_same, ![0, 22, 46, 56, 62].contains(&key), "vertex key {key}");

            let stencil_same = stencil(key, Variant::Even) == stencil(key, Variant::Odd);
            assert_eq!(stencil_same, ![22, 46, 56].contains(&key), "stencil key {key}");

            let material_same = materials(key, Variant::Even) == materials(key, Variant::Odd);
            assert_eq!(material_same, ![22, 46, 56].contains(&key), "material key {key}");

            let interface_same =
                interface_pairs(key, Variant::Even) == interface_pairs(key, Variant::Odd);
            assert_eq!(interface_same, ![22, 46, 56, 62].contains(&key), "interface key {key}");
        }
    }

    #[test]
    fn interface_pairs_reference_valid_slots() {
        for &key in &VALID_KEYS {
            for v in VARIANTS {
                let pairs = interface_pairs(key, v);
                assert!(pairs.len() <= 12);
                for p in pairs {
                    assert!(p[0] < SLOTS_PER_TET && p[1] < SLOTS_PER_TET);
                }
            }
        }
        assert!(interface_pairs(0, Variant::Even).is_empty());
        assert_eq!(interface_pairs(63, Variant::Odd).len(), 12);
    }

    #[test]
    fn half_the_tets_flip() {
        assert_eq!(PARITY_FLIP.iter().filter(|&&f| f).count(), 12);
    }

    #[test]
    #[should_panic(expected = "invalid interface key")]
    fn invalid_key_lookup_panics() {
        generalization(3, Variant::Even);
    }
}
