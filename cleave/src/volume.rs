//! Scalar fields and multi-material volumes
//!
//! The mesher consumes a [`MaterialVolume`]: an ordered set of scalar
//! indicator functions, one per material, sampled over a shared rectangular
//! domain. At every point the material with the largest field value is
//! dominant, with ties broken by the lowest material index.
//!
//! Domain coordinates are measured in lattice cells: a volume of size
//! `(w, h, d)` spans `[0, w] x [0, h] x [0, d]`, and the lattice places
//! primal vertices at the integer grid points of that domain.
use std::sync::Arc;

use crate::Error;

/// A single scalar indicator function over a rectangular domain
///
/// `value_at` must accept any coordinate; implementations clamp queries to
/// their domain rather than extrapolating.
pub trait ScalarField {
    /// Samples the field at the given point
    fn value_at(&self, x: f64, y: f64, z: f64) -> f32;

    /// Domain size, in cells per axis
    ///
    /// A field backed by `n` samples along an axis covers `n - 1` cells.
    fn bounds(&self) -> [f64; 3];
}

/// Scalar field backed by a dense grid of `f32` samples
///
/// Samples are stored in `x`-fastest order. Queries between samples are
/// trilinearly interpolated; queries outside the grid clamp to the nearest
/// boundary sample.
pub struct FloatField {
    data: Vec<f32>,
    nx: usize,
    ny: usize,
    nz: usize,
}

impl FloatField {
    /// Builds a field from `nx * ny * nz` samples in `x`-fastest order
    pub fn new(nx: usize, ny: usize, nz: usize, data: Vec<f32>) -> Result<Self, Error> {
        if nx < 2 || ny < 2 || nz < 2 {
            return Err(Error::EmptyVolume);
        }
        if data.len() != nx * ny * nz {
            return Err(Error::BadSampleCount);
        }
        Ok(Self { data, nx, ny, nz })
    }

    /// Builds a field by evaluating `f` at every sample point
    ///
    /// Panics if any dimension is below 2 samples; runtime-sized data
    /// should go through [`FloatField::new`] instead.
    pub fn from_fn<F: Fn(usize, usize, usize) -> f32>(
        nx: usize,
        ny: usize,
        nz: usize,
        f: F,
    ) -> Self {
        assert!(
            nx >= 2 && ny >= 2 && nz >= 2,
            "a field needs at least 2 samples per axis"
        );
        let mut data = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    data.push(f(i, j, k));
                }
            }
        }
        Self { data, nx, ny, nz }
    }

    fn sample(&self, i: usize, j: usize, k: usize) -> f32 {
        self.data[i + j * self.nx + k * self.nx * self.ny]
    }
}

impl ScalarField for FloatField {
    fn value_at(&self, x: f64, y: f64, z: f64) -> f32 {
        let x = x.clamp(0.0, (self.nx - 1) as f64);
        let y = y.clamp(0.0, (self.ny - 1) as f64);
        let z = z.clamp(0.0, (self.nz - 1) as f64);

        let i0 = (x.floor() as usize).min(self.nx - 2);
        let j0 = (y.floor() as usize).min(self.ny - 2);
        let k0 = (z.floor() as usize).min(self.nz - 2);
        let tx = (x - i0 as f64) as f32;
        let ty = (y - j0 as f64) as f32;
        let tz = (z - k0 as f64) as f32;

        let c00 = self.sample(i0, j0, k0) * (1.0 - tx) + self.sample(i0 + 1, j0, k0) * tx;
        let c10 = self.sample(i0, j0 + 1, k0) * (1.0 - tx) + self.sample(i0 + 1, j0 + 1, k0) * tx;
        let c01 = self.sample(i0, j0, k0 + 1) * (1.0 - tx) + self.sample(i0 + 1, j0, k0 + 1) * tx;
        let c11 =
            self.sample(i0, j0 + 1, k0 + 1) * (1.0 - tx) + self.sample(i0 + 1, j0 + 1, k0 + 1) * tx;

        let c0 = c00 * (1.0 - ty) + c10 * ty;
        let c1 = c01 * (1.0 - ty) + c11 * ty;
        c0 * (1.0 - tz) + c1 * tz
    }

    fn bounds(&self) -> [f64; 3] {
        [
            (self.nx - 1) as f64,
            (self.ny - 1) as f64,
            (self.nz - 1) as f64,
        ]
    }
}

/// Negation of another field
///
/// Completes a single indicator function into a two-material volume: the
/// inverse is dominant exactly where the inner field is negative.
pub struct InverseField {
    field: Arc<dyn ScalarField>,
}

impl InverseField {
    pub fn new(field: Arc<dyn ScalarField>) -> Self {
        Self { field }
    }
}

impl ScalarField for InverseField {
    fn value_at(&self, x: f64, y: f64, z: f64) -> f32 {
        -self.field.value_at(x, y, z)
    }

    fn bounds(&self) -> [f64; 3] {
        self.field.bounds()
    }
}

/// The sampling contract consumed by the mesher
///
/// Coordinates are in lattice cells; `width/height/depth` give the number of
/// cells per axis, so the lattice has `width + 1` primal vertices along `x`.
pub trait MaterialVolume {
    /// Samples material `mat` at the given point
    fn value_at(&self, x: f64, y: f64, z: f64, mat: usize) -> f32;

    /// Number of materials
    fn num_materials(&self) -> usize;

    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn depth(&self) -> usize;
}

/// An ordered set of material fields over a shared domain
///
/// The volume may be resampled to a different lattice size with
/// [`set_size`](Volume::set_size); queries are then scaled from lattice
/// coordinates into the native field domain.
pub struct Volume {
    fields: Vec<Arc<dyn ScalarField>>,
    bounds: [f64; 3],
    width: usize,
    height: usize,
    depth: usize,
}

impl Volume {
    /// Builds a volume from one field per material
    ///
    /// All fields must share the same domain bounds. The initial lattice
    /// size matches the native field bounds, rounded to whole cells.
    pub fn new(fields: Vec<Arc<dyn ScalarField>>) -> Result<Self, Error> {
        let Some(first) = fields.first() else {
            return Err(Error::TooFewMaterials);
        };
        let bounds = first.bounds();
        if fields.iter().any(|f| f.bounds() != bounds) {
            return Err(Error::FieldSizeMismatch);
        }
        if bounds.iter().any(|&b| b < 1.0) {
            return Err(Error::EmptyVolume);
        }
        let width = bounds[0].round() as usize;
        let height = bounds[1].round() as usize;
        let depth = bounds[2].round() as usize;
        Ok(Self {
            fields,
            bounds,
            width,
            height,
            depth,
        })
    }

    /// Changes the lattice size the volume is meshed at
    ///
    /// Field data is unchanged; queries are rescaled, so a larger size
    /// produces a finer mesh of the same data.
    pub fn set_size(&mut self, width: usize, height: usize, depth: usize) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.depth = depth.max(1);
    }
}

impl MaterialVolume for Volume {
    fn value_at(&self, x: f64, y: f64, z: f64, mat: usize) -> f32 {
        let fx = x * self.bounds[0] / self.width as f64;
        let fy = y * self.bounds[1] / self.height as f64;
        let fz = z * self.bounds[2] / self.depth as f64;
        self.fields[mat].value_at(fx, fy, fz)
    }

    fn num_materials(&self) -> usize {
        self.fields.len()
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

impl<V: MaterialVolume + ?Sized> MaterialVolume for &V {
    fn value_at(&self, x: f64, y: f64, z: f64, mat: usize) -> f32 {
        (**self).value_at(x, y, z, mat)
    }

    fn num_materials(&self) -> usize {
        (**self).num_materials()
    }

    fn width(&self) -> usize {
        (**self).width()
    }

    fn height(&self) -> usize {
        (**self).height()
    }

    fn depth(&self) -> usize {
        (**self).depth()
    }
}

/// Surrounds a volume with a ring of a brand-new material
///
/// Padding guarantees that no material transition of the inner volume
/// touches the outer boundary, which the lattice construction requires
/// whenever interfaces reach the edge of the data. The padding material is
/// appended after the inner materials and dominates everywhere in the
/// padding shell.
pub struct PaddedVolume<'a> {
    inner: Box<dyn MaterialVolume + 'a>,
    thickness: usize,
    high: f32,
    low: f32,
}

impl<'a> PaddedVolume<'a> {
    pub const DEFAULT_THICKNESS: usize = 2;
    const HIGH: f32 = 10_000.0;
    const LOW: f32 = -10_000.0;

    pub fn new(inner: Box<dyn MaterialVolume + 'a>) -> Self {
        Self::with_thickness(inner, Self::DEFAULT_THICKNESS)
    }

    pub fn with_thickness(inner: Box<dyn MaterialVolume + 'a>, thickness: usize) -> Self {
        Self {
            inner,
            thickness: thickness.max(1),
            high: Self::HIGH,
            low: Self::LOW,
        }
    }

    fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        let t = self.thickness as f64;
        x >= t
            && x <= t + self.inner.width() as f64
            && y >= t
            && y <= t + self.inner.height() as f64
            && z >= t
            && z <= t + self.inner.depth() as f64
    }
}

impl MaterialVolume for PaddedVolume<'_> {
    fn value_at(&self, x: f64, y: f64, z: f64, mat: usize) -> f32 {
        let inside = self.contains(x, y, z);
        if mat == self.inner.num_materials() {
            // the padding material itself
            if inside { self.low } else { self.high }
        } else if inside {
            let t = self.thickness as f64;
            self.inner.value_at(x - t, y - t, z - t, mat)
        } else {
            self.low
        }
    }

    fn num_materials(&self) -> usize {
        self.inner.num_materials() + 1
    }

    fn width(&self) -> usize {
        self.inner.width() + 2 * self.thickness
    }

    fn height(&self) -> usize {
        self.inner.height() + 2 * self.thickness
    }

    fn depth(&self) -> usize {
        self.inner.depth() + 2 * self.thickness
    }
}

/// Label of the dominant material at a point, ties to the lowest index
pub fn dominant_material(volume: &dyn MaterialVolume, x: f64, y: f64, z: f64) -> u8 {
    let mut dom = 0;
    let mut max = volume.value_at(x, y, z, 0);
    for mat in 1..volume.num_materials() {
        let v = volume.value_at(x, y, z, mat);
        if v > max {
            max = v;
            dom = mat;
        }
    }
    dom as u8
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn trilinear_interpolation() {
        let f = FloatField::from_fn(3, 3, 3, |i, j, k| (i + 2 * j + 4 * k) as f32);
        assert_eq!(f.bounds(), [2.0, 2.0, 2.0]);

        // exact at samples
        assert_relative_eq!(f.value_at(1.0, 2.0, 0.0), 5.0);

        // linear along each axis
        assert_relative_eq!(f.value_at(0.5, 0.0, 0.0), 0.5);
        assert_relative_eq!(f.value_at(0.0, 0.5, 0.0), 1.0);
        assert_relative_eq!(f.value_at(0.0, 0.0, 0.5), 2.0);

        // clamped outside the domain
        assert_relative_eq!(f.value_at(-3.0, 0.0, 0.0), 0.0);
        assert_relative_eq!(f.value_at(5.0, 5.0, 5.0), f.value_at(2.0, 2.0, 2.0));
    }

    #[test]
    fn field_validation() {
        assert!(matches!(
            FloatField::new(1, 3, 3, vec![0.0; 9]),
            Err(Error::EmptyVolume)
        ));
        assert!(matches!(
            FloatField::new(2, 2, 2, vec![0.0; 7]),
            Err(Error::BadSampleCount)
        ));
    }

    #[test]
    #[should_panic(expected = "at least 2 samples")]
    fn from_fn_rejects_thin_grids() {
        FloatField::from_fn(1, 3, 3, |_, _, _| 0.0);
    }

    #[test]
    fn inverse_negates() {
        let f = Arc::new(FloatField::from_fn(3, 3, 3, |i, _, _| i as f32 - 1.0));
        let inv = InverseField::new(f.clone());
        assert_relative_eq!(inv.value_at(0.0, 0.0, 0.0), 1.0);
        assert_relative_eq!(inv.value_at(2.0, 1.0, 1.0), -1.0);
        assert_eq!(inv.bounds(), f.bounds());
    }

    #[test]
    fn volume_resampling() {
        let f: Arc<dyn ScalarField> = Arc::new(FloatField::from_fn(5, 5, 5, |i, _, _| i as f32));
        let mut v = Volume::new(vec![f]).unwrap();
        assert_eq!(v.width(), 4);

        let native = v.value_at(2.0, 0.0, 0.0, 0);
        v.set_size(8, 8, 8);
        assert_eq!(v.width(), 8);
        // same data point, now addressed at twice the coordinate
        assert_relative_eq!(v.value_at(4.0, 0.0, 0.0, 0), native);
    }

    #[test]
    fn volume_rejects_mismatched_fields() {
        let a: Arc<dyn ScalarField> = Arc::new(FloatField::from_fn(3, 3, 3, |_, _, _| 0.0));
        let b: Arc<dyn ScalarField> = Arc::new(FloatField::from_fn(4, 3, 3, |_, _, _| 0.0));
        assert!(matches!(
            Volume::new(vec![a, b]),
            Err(Error::FieldSizeMismatch)
        ));
        assert!(matches!(Volume::new(vec![]), Err(Error::TooFewMaterials)));
    }

    #[test]
    fn padded_volume_adds_one_material() {
        let f: Arc<dyn ScalarField> = Arc::new(FloatField::from_fn(5, 5, 5, |_, _, _| 1.0));
        let v = Volume::new(vec![f]).unwrap();
        let p = PaddedVolume::new(Box::new(v));

        assert_eq!(p.num_materials(), 2);
        assert_eq!(p.width(), 4 + 2 * PaddedVolume::DEFAULT_THICKNESS);

        // padding material dominates in the shell, loses in the interior
        assert_eq!(dominant_material(&p, 0.5, 0.5, 0.5), 1);
        let mid = p.width() as f64 / 2.0;
        assert_eq!(dominant_material(&p, mid, mid, mid), 0);

        // inner query is shifted by the padding thickness
        assert_relative_eq!(p.value_at(mid, mid, mid, 0), 1.0);
    }
}
