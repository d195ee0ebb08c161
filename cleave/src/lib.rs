//! Cleave is a library for conforming multimaterial tetrahedral meshing on
//! a body-centered cubic lattice.
//!
//! The input is a **material volume**: a set of scalar fields over a shared
//! 3D domain, where the material at a point is the field with the largest
//! value there. The output is a tetrahedral mesh whose elements each carry
//! one material label and whose element faces conform to the surfaces
//! where the dominant material changes, with guaranteed bounds on element
//! quality away from those surfaces.
//!
//! # Building a volume
//! Material fields implement [`ScalarField`]; a [`FloatField`] wraps a raw
//! grid of samples with trilinear interpolation, and [`InverseField`]
//! completes a single field into a two-material segmentation. Fields are
//! grouped into a [`Volume`]:
//!
//! ```
//! use cleave::{FloatField, InverseField, ScalarField, Volume};
//! use std::sync::Arc;
//!
//! let sphere = Arc::new(FloatField::from_fn(16, 16, 16, |i, j, k| {
//!     let (x, y, z) = (i as f32 - 8.0, j as f32 - 8.0, k as f32 - 8.0);
//!     5.0 - (x * x + y * y + z * z).sqrt()
//! }));
//! let outside = Arc::new(InverseField::new(sphere.clone()));
//! let volume = Volume::new(vec![sphere as Arc<dyn ScalarField>, outside])?;
//! # Ok::<(), cleave::Error>(())
//! ```
//!
//! # Meshing
//! [`mesh_volume`] runs the whole pipeline and returns a [`TetMesh`]:
//!
//! ```no_run
//! # use cleave::{FloatField, InverseField, ScalarField, Volume};
//! # use std::sync::Arc;
//! # let sphere = Arc::new(FloatField::from_fn(16, 16, 16, |_, _, _| 1.0));
//! # let outside = Arc::new(InverseField::new(sphere.clone()));
//! # let volume = Volume::new(vec![sphere as Arc<dyn ScalarField>, outside])?;
//! let options = cleave::MesherOptions::default();
//! let mesh = cleave::mesh_volume(&volume, &options)?;
//! mesh.write_node_ele("output")?;
//! # Ok::<(), cleave::Error>(())
//! ```
//!
//! The pipeline builds an adaptively graded BCC background lattice over
//! the region containing material transitions ([`BccLattice`]), computes
//! the points where 2, 3, and 4 materials meet on lattice edges, faces,
//! and tets, warps the lattice to absorb interface points that fall too
//! close to it, and carves the remaining lattice tets with case-table
//! stencils ([`Mesher`]). Staged use (building the lattice yourself and
//! stepping the mesher) is supported for inspection and testing.
//!
//! If a material interface touches the bounding box of the volume, wrap
//! the input in a [`PaddedVolume`] (or pass `pad` in [`MesherOptions`]) to
//! close the surface with a sacrificial outer material.

#![allow(clippy::needless_range_loop)]

mod error;
pub mod lattice;
pub mod mesh;
pub mod mesher;
pub mod octree;
pub mod stencils;
pub mod volume;

pub use error::Error;
pub use lattice::BccLattice;
pub use mesh::TetMesh;
pub use mesher::Mesher;
pub use volume::{
    FloatField, InverseField, MaterialVolume, PaddedVolume, ScalarField, Volume,
};

/// Knobs for a [`mesh_volume`] run
///
/// The alphas set the violation tolerance around lattice vertices as a
/// fraction of edge length; larger values move interface points more
/// aggressively onto the lattice, trading surface fidelity for element
/// quality.
#[derive(Clone, Debug)]
pub struct MesherOptions {
    /// Violation tolerance on short (diagonal) edges
    pub alpha_short: f64,

    /// Violation tolerance on long (primal and dual) edges
    pub alpha_long: f64,

    /// Wrap the volume in a padding material before meshing
    pub pad: bool,
}

impl Default for MesherOptions {
    fn default() -> Self {
        Self {
            alpha_short: lattice::DEFAULT_ALPHA_SHORT,
            alpha_long: lattice::DEFAULT_ALPHA_LONG,
            pad: false,
        }
    }
}

/// Meshes a material volume end to end
///
/// Builds the lattice, runs every mesher phase, and collects the output
/// tets; the returned mesh records the wall-clock meshing time. Faces and
/// dihedral angles are left for the caller to derive as needed.
pub fn mesh_volume(
    volume: &dyn MaterialVolume,
    options: &MesherOptions,
) -> Result<TetMesh, Error> {
    let start = std::time::Instant::now();

    let padded;
    let volume: &dyn MaterialVolume = if options.pad {
        padded = PaddedVolume::new(Box::new(volume));
        &padded
    } else {
        volume
    };

    let mut lat = BccLattice::from_volume(volume)?;
    lat.alpha_short = options.alpha_short;
    lat.alpha_long = options.alpha_long;

    Mesher::new(&mut lat, volume).mesh();

    let mut mesh = TetMesh::from_lattice(&lat)?;
    mesh.strip_bad_tets();
    mesh.time = start.elapsed();
    Ok(mesh)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    fn sphere_volume(n: usize, r: f32) -> Volume {
        let c = n as f32 / 2.0;
        let inside = Arc::new(FloatField::from_fn(n, n, n, move |i, j, k| {
            let (x, y, z) = (i as f32 - c, j as f32 - c, k as f32 - c);
            r - (x * x + y * y + z * z).sqrt()
        }));
        let outside = Arc::new(InverseField::new(inside.clone()));
        Volume::new(vec![inside as Arc<dyn ScalarField>, outside]).unwrap()
    }

    #[test]
    fn mesh_volume_produces_a_labeled_mesh() {
        let volume = sphere_volume(10, 3.0);
        let mesh = mesh_volume(&volume, &MesherOptions::default()).unwrap();

        assert!(!mesh.tets.is_empty());
        assert!(mesh.tets.iter().any(|t| t.material == 0));
        assert!(mesh.tets.iter().any(|t| t.material == 1));
        for t in &mesh.tets {
            assert!(t.volume(&mesh.verts).abs() > 1e-12);
        }
    }

    #[test]
    fn padding_adds_one_material() {
        let volume = sphere_volume(8, 6.0);
        let options = MesherOptions {
            pad: true,
            ..MesherOptions::default()
        };
        let mesh = mesh_volume(&volume, &options).unwrap();

        // the sphere overflows the box, so the padding material appears
        let max = mesh.tets.iter().map(|t| t.material).max().unwrap();
        assert_eq!(max, 2);
    }

    #[test]
    fn exported_vertices_are_unique() {
        let volume = sphere_volume(10, 3.0);
        let mesh = mesh_volume(&volume, &MesherOptions::default()).unwrap();

        // no position appears twice in the vertex array
        let mut seen = std::collections::HashSet::new();
        for v in &mesh.verts {
            let key = v.map(|c| (c * 1e9).round() as i64);
            assert!(seen.insert((key.x, key.y, key.z)));
        }
    }
}
