//! Output tetrahedral mesh and legacy file writers
//!
//! [`TetMesh`] is a flat array mesh extracted from a stenciled lattice:
//! vertex positions, labeled tets, and (after
//! [`construct_faces`](TetMesh::construct_faces)) a derived triangle list
//! with tet adjacency. The writers target the file formats of the
//! downstream tools: TetGen `.node`/`.ele`, SCIRun `.pts`/`.elem`/`.txt`,
//! a MAT 5.0 `tetmesh` struct, and PLY interface surfaces.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use nalgebra::Vector3;

use crate::error::Error;
use crate::lattice::BccLattice;

/// An output tet: four vertex indices, a material, and (after face
/// construction) neighbor tets and face indices opposite each vertex
#[derive(Clone, Debug)]
pub struct MeshTet {
    pub verts: [usize; 4],
    pub material: u8,
    pub neighbors: [Option<usize>; 4],
    pub faces: [Option<usize>; 4],
}

impl MeshTet {
    /// Oriented volume
    pub fn volume(&self, verts: &[Vector3<f64>]) -> f64 {
        let [a, b, c, d] = self.verts.map(|v| verts[v]);
        (a - d).dot(&(b - d).cross(&(c - d))) / 6.0
    }
}

/// A triangle shared by one or two tets; boundary faces leave the second
/// slot empty
#[derive(Clone, Debug)]
pub struct MeshFace {
    pub verts: [usize; 3],
    pub tets: [Option<usize>; 2],
    pub normal: Vector3<f64>,
}

/// Flat-array tetrahedral mesh extracted from a stenciled lattice
pub struct TetMesh {
    pub verts: Vec<Vector3<f64>>,
    pub tets: Vec<MeshTet>,
    pub faces: Vec<MeshFace>,
    pub min_angle: f64,
    pub max_angle: f64,
    pub time: Duration,
}

impl TetMesh {
    /// Collects the labeled output tets of a meshed lattice
    ///
    /// Vertex indices come from the export order recorded while tets were
    /// emitted, so every vertex appears once regardless of how many merge
    /// chains resolve to it.
    pub fn from_lattice(lat: &BccLattice) -> Result<Self, Error> {
        let verts: Vec<Vector3<f64>> = lat
            .tree
            .verts
            .iter()
            .map(|&v| lat.verts.position(v))
            .collect();

        let mut tets = Vec::with_capacity(lat.tree.tets.len());
        for tet in &lat.tree.tets {
            let Some(material) = tet.label else { continue };
            let vs = tet.verts.map(|v| {
                lat.verts[v]
                    .mesh_index
                    .expect("exported vertex has no index")
            });
            tets.push(MeshTet {
                verts: vs,
                material,
                neighbors: [None; 4],
                faces: [None; 4],
            });
        }
        if tets.is_empty() {
            return Err(Error::EmptyMesh);
        }

        Ok(Self {
            verts,
            tets,
            faces: Vec::new(),
            min_angle: 180.0,
            max_angle: 0.0,
            time: Duration::ZERO,
        })
    }

    /// Removes tets with (near) zero volume or degenerate dihedral angles
    ///
    /// Invalidates faces and adjacency, so it must run before
    /// [`construct_faces`](Self::construct_faces).
    pub fn strip_bad_tets(&mut self) {
        let before = self.tets.len();
        let verts = std::mem::take(&mut self.verts);
        self.tets.retain(|t| {
            t.volume(&verts).abs() > 1e-12 && valid_dihedral_angles(&verts, t)
        });
        self.verts = verts;
        self.faces.clear();
        for t in &mut self.tets {
            t.neighbors = [None; 4];
            t.faces = [None; 4];
        }

        let dropped = before - self.tets.len();
        if dropped > 0 {
            warn!("dropped {dropped} degenerate tets ({} remain)", self.tets.len());
        }
    }

    /// Derives the face list by pairing the triangles shared by exactly
    /// two tets; unpaired triangles become boundary faces
    ///
    /// Normals are oriented away from the first tet's opposite vertex.
    pub fn construct_faces(&mut self) {
        self.faces.clear();

        // vertex -> incident tets, for the pairing search
        let mut incident = vec![Vec::new(); self.verts.len()];
        for (i, t) in self.tets.iter().enumerate() {
            for &v in &t.verts {
                incident[v].push(i);
            }
        }

        for i in 0..self.tets.len() {
            for j in 0..4 {
                if self.tets[i].faces[j].is_some() {
                    continue;
                }
                let fv = [
                    self.tets[i].verts[(j + 1) % 4],
                    self.tets[i].verts[(j + 2) % 4],
                    self.tets[i].verts[(j + 3) % 4],
                ];

                // a neighbor shares all three face vertices
                let neighbor = incident[fv[0]]
                    .iter()
                    .copied()
                    .find(|&k| {
                        k != i
                            && self.tets[k].verts.contains(&fv[1])
                            && self.tets[k].verts.contains(&fv[2])
                    });

                let id = self.faces.len();
                self.tets[i].faces[j] = Some(id);
                if let Some(k) = neighbor {
                    let slot = (0..4)
                        .find(|&m| !fv.contains(&self.tets[k].verts[m]))
                        .expect("paired tets share all four vertices");
                    self.tets[i].neighbors[j] = Some(k);
                    self.tets[k].neighbors[slot] = Some(i);
                    self.tets[k].faces[slot] = Some(id);
                }

                let p = fv.map(|v| self.verts[v]);
                let mut normal = (p[1] - p[0]).cross(&(p[2] - p[0])).normalize();
                let bary = (p[0] + p[1] + p[2]) / 3.0;
                let opposite = self.verts[self.tets[i].verts[j]];
                if (opposite - bary).dot(&normal) > 0.0 {
                    normal = -normal;
                }

                self.faces.push(MeshFace {
                    verts: fv,
                    tets: [Some(i), neighbor],
                    normal,
                });
            }
        }
        info!("mesh has {} faces", self.faces.len());
    }

    /// Computes the global min and max dihedral angles, in degrees
    pub fn compute_angles(&mut self) {
        let mut min = 180.0f64;
        let mut max = 0.0f64;
        for t in &self.tets {
            for angle in dihedral_angles(&self.verts, t) {
                min = min.min(angle);
                max = max.max(angle);
            }
        }
        self.min_angle = min;
        self.max_angle = max;
    }

    ////////////////////////////////////////////////////////////////////////
    // Writers

    /// TetGen-style `.node` / `.ele` pair, 1-indexed, with the material
    /// (1-based) as the single element attribute
    pub fn write_node_ele(&self, stem: &str) -> Result<(), Error> {
        let path = format!("{stem}.node");
        info!("writing mesh node file: {path}");
        let mut node = BufWriter::new(File::create(path)?);
        writeln!(node, "# Node count, 3 dim, no attribute, no boundary marker")?;
        writeln!(node, "{}  3  0  0", self.verts.len())?;
        writeln!(node)?;
        for (i, v) in self.verts.iter().enumerate() {
            writeln!(node, "{} {} {} {}", i + 1, v.x, v.y, v.z)?;
        }
        node.flush()?;

        let path = format!("{stem}.ele");
        info!("writing mesh ele file: {path}");
        let mut ele = BufWriter::new(File::create(path)?);
        writeln!(ele, "# Tet count, verts per tet, attribute count")?;
        writeln!(ele, "{} 4 1", self.tets.len())?;
        writeln!(ele)?;
        for (i, t) in self.tets.iter().enumerate() {
            write!(ele, "{}", i + 1)?;
            for v in t.verts {
                write!(ele, " {}", v + 1)?;
            }
            writeln!(ele, " {}", t.material + 1)?;
        }
        ele.flush()?;
        Ok(())
    }

    /// SCIRun-style `.pts` / `.elem` / `.txt` triplet
    pub fn write_pts_ele(&self, stem: &str) -> Result<(), Error> {
        let path = format!("{stem}.pts");
        info!("writing mesh pts file: {path}");
        let mut pts = BufWriter::new(File::create(path)?);
        for v in &self.verts {
            writeln!(pts, "{} {} {}", v.x, v.y, v.z)?;
        }
        pts.flush()?;

        let path = format!("{stem}.elem");
        info!("writing mesh elem file: {path}");
        let mut elem = BufWriter::new(File::create(path)?);
        for t in &self.tets {
            let [a, b, c, d] = t.verts;
            writeln!(elem, "{} {} {} {}", a + 1, b + 1, c + 1, d + 1)?;
        }
        elem.flush()?;

        let path = format!("{stem}.txt");
        info!("writing mesh material file: {path}");
        let mut mat = BufWriter::new(File::create(path)?);
        for t in &self.tets {
            writeln!(mat, "{}", t.material + 1)?;
        }
        mat.flush()?;
        Ok(())
    }

    /// Run statistics alongside the mesh files
    pub fn write_info(&self, stem: &str) -> Result<(), Error> {
        let path = format!("{stem}.info");
        info!("writing info file: {path}");
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "min_angle = {:.8}", self.min_angle)?;
        writeln!(file, "max_angle = {:.8}", self.max_angle)?;
        writeln!(file, "tet_count = {}", self.tets.len())?;
        writeln!(file, "vtx_count = {}", self.verts.len())?;
        writeln!(file, "mesh time = {}s", self.time.as_secs_f64())?;
        file.flush()?;
        Ok(())
    }

    /// Interface faces, with the color index each material pair was
    /// assigned in first-seen order
    fn interface_faces(&self) -> Vec<(usize, usize)> {
        let mut keys: Vec<u64> = Vec::new();
        let mut out = Vec::new();
        for (f, face) in self.faces.iter().enumerate() {
            let (Some(t1), Some(t2)) = (face.tets[0], face.tets[1]) else {
                continue;
            };
            let m1 = self.tets[t1].material;
            let m2 = self.tets[t2].material;
            if m1 == m2 {
                continue;
            }
            let key = (1u64 << m1) + (1u64 << m2);
            let color = match keys.iter().position(|&k| k == key) {
                Some(i) => i,
                None => {
                    keys.push(key);
                    keys.len() - 1
                }
            };
            out.push((f, color));
        }
        out
    }

    /// Material-interface surface as an ASCII PLY triangle soup, one
    /// color per material pair
    ///
    /// Vertices are duplicated per face; viewers that merge by position
    /// recover the shared surface.
    pub fn write_ply(&self, stem: &str) -> Result<(), Error> {
        let path = format!("{stem}.ply");
        info!("writing mesh ply file: {path}");
        let mut file = BufWriter::new(File::create(path)?);

        let interfaces = self.interface_faces();
        write_ply_header(&mut file, interfaces.len())?;
        for &(f, _) in &interfaces {
            for v in self.faces[f].verts {
                let p = self.verts[v];
                writeln!(file, "{} {} {}", p.x, p.y, p.z)?;
            }
        }
        for (i, &(_, color)) in interfaces.iter().enumerate() {
            let [r, g, b] = INTERFACE_COLORS[color % 12];
            writeln!(file, "3 {} {} {} {r} {g} {b}", 3 * i, 3 * i + 1, 3 * i + 2)?;
        }
        writeln!(file)?;
        file.flush()?;
        Ok(())
    }

    /// One PLY per material pair, named `interface.{a}-{b}.ply` under
    /// `dir`
    pub fn write_multiple_ply(&self, dir: &Path) -> Result<(), Error> {
        let mut groups: Vec<(u8, u8, Vec<usize>)> = Vec::new();
        for (f, color) in self.interface_faces() {
            let (t1, t2) = (
                self.faces[f].tets[0].unwrap(),
                self.faces[f].tets[1].unwrap(),
            );
            let m1 = self.tets[t1].material.min(self.tets[t2].material);
            let m2 = self.tets[t1].material.max(self.tets[t2].material);
            match groups.get_mut(color) {
                Some(g) => g.2.push(f),
                None => groups.push((m1, m2, vec![f])),
            }
        }

        for (color, (m1, m2, faces)) in groups.iter().enumerate() {
            let path = dir.join(format!("interface.{m1}-{m2}.ply"));
            info!("writing mesh ply file: {}", path.display());
            let mut file = BufWriter::new(File::create(path)?);

            write_ply_header(&mut file, faces.len())?;
            for &f in faces {
                for v in self.faces[f].verts {
                    let p = self.verts[v];
                    writeln!(file, "{} {} {}", p.x, p.y, p.z)?;
                }
            }
            let [r, g, b] = INTERFACE_COLORS[color % 12];
            for i in 0..faces.len() {
                writeln!(file, "3 {} {} {} {r} {g} {b}", 3 * i, 3 * i + 1, 3 * i + 2)?;
            }
            writeln!(file)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Binary MAT 5.0 file holding a SCIRun `tetmesh` struct with `node`
    /// (3 x N single), `cell` (4 x M int32, 0-based), `field` (1 x M
    /// uint8), and `fieldat = "cell"`
    pub fn write_matlab(&self, stem: &str) -> Result<(), Error> {
        let path = format!("{stem}.mat");
        info!("writing mesh matlab file: {path}");

        // the four struct fields, built first so the sizes that precede
        // them are known
        let node = mat_array(
            mx::SINGLE,
            [3, self.verts.len() as i32],
            mi::SINGLE,
            &self
                .verts
                .iter()
                .flat_map(|v| {
                    [v.x as f32, v.y as f32, v.z as f32]
                        .into_iter()
                        .flat_map(f32::to_le_bytes)
                })
                .collect::<Vec<u8>>(),
        );
        let cell = mat_array(
            mx::INT32,
            [4, self.tets.len() as i32],
            mi::INT32,
            &self
                .tets
                .iter()
                .flat_map(|t| t.verts.into_iter().flat_map(|v| (v as i32).to_le_bytes()))
                .collect::<Vec<u8>>(),
        );
        let field = mat_array(
            mx::UINT8,
            [1, self.tets.len() as i32],
            mi::UINT8,
            &self.tets.iter().map(|t| t.material).collect::<Vec<u8>>(),
        );
        let fieldat = mat_array(mx::CHAR, [1, 4], mi::UTF8, b"cell");

        // struct element: flags, dims, name, field name length, field
        // names, then the four field matrices
        let mut body = Vec::new();
        body.extend_from_slice(&mi::UINT32.to_le_bytes());
        body.extend_from_slice(&8i32.to_le_bytes());
        body.push(mx::STRUCT as u8);
        body.push(0);
        body.extend_from_slice(&[0; 6]);

        body.extend_from_slice(&mi::INT32.to_le_bytes());
        body.extend_from_slice(&8i32.to_le_bytes());
        body.extend_from_slice(&1i32.to_le_bytes());
        body.extend_from_slice(&1i32.to_le_bytes());

        body.extend_from_slice(&mi::INT8.to_le_bytes());
        body.extend_from_slice(&7i32.to_le_bytes());
        body.extend_from_slice(b"tetmesh\0");

        // small element form: 16-bit type and size packed into the tag
        body.extend_from_slice(&(mi::INT32 as i16).to_le_bytes());
        body.extend_from_slice(&4i16.to_le_bytes());
        body.extend_from_slice(&8i32.to_le_bytes());

        body.extend_from_slice(&mi::INT8.to_le_bytes());
        body.extend_from_slice(&32i32.to_le_bytes());
        body.extend_from_slice(b"node\0\0\0\0");
        body.extend_from_slice(b"cell\0\0\0\0");
        body.extend_from_slice(b"field\0\0\0");
        body.extend_from_slice(b"fieldat\0");

        body.extend_from_slice(&node);
        body.extend_from_slice(&cell);
        body.extend_from_slice(&field);
        body.extend_from_slice(&fieldat);

        let mut file = BufWriter::new(File::create(path)?);
        let mut description =
            b"MATLAB 5.0 MAT-file, SCIRun-TetMesh".to_vec();
        description.resize(116, b' ');
        file.write_all(&description)?;
        file.write_all(&[0; 8])?;
        file.write_all(&0x0100i16.to_le_bytes())?;
        file.write_all(b"IM")?;

        file.write_all(&mi::MATRIX.to_le_bytes())?;
        file.write_all(&(body.len() as i32).to_le_bytes())?;
        file.write_all(&body)?;
        file.flush()?;
        Ok(())
    }
}

/// The six dihedral angles of a tet, in degrees
fn dihedral_angles(verts: &[Vector3<f64>], t: &MeshTet) -> [f64; 6] {
    // normals of the four faces, each pointing away from its opposite
    // vertex
    let p = t.verts.map(|v| verts[v]);
    let mut normals = [Vector3::zeros(); 4];
    for (j, n) in normals.iter_mut().enumerate() {
        let v0 = p[(j + 1) % 4];
        let v1 = p[(j + 2) % 4];
        let v2 = p[(j + 3) % 4];
        let mut normal = (v1 - v0).cross(&(v2 - v0)).normalize();
        if (p[j] - v0).normalize().dot(&normal) > 0.0 {
            normal = -normal;
        }
        *n = normal;
    }

    let mut out = [0.0; 6];
    let mut i = 0;
    for j in 0..4 {
        for k in j + 1..4 {
            let dot = normals[j].dot(&normals[k]).clamp(-1.0, 1.0);
            out[i] = 180.0 - dot.acos().to_degrees();
            i += 1;
        }
    }
    out
}

/// Whether a tet's dihedral angles are all finite and strictly between
/// 0 and 180 degrees
fn valid_dihedral_angles(verts: &[Vector3<f64>], t: &MeshTet) -> bool {
    dihedral_angles(verts, t)
        .iter()
        .all(|a| a.is_finite() && *a > 0.0 && *a < 180.0)
}

fn write_ply_header<W: Write>(file: &mut W, faces: usize) -> Result<(), Error> {
    writeln!(file, "ply")?;
    writeln!(file, "format ascii 1.0")?;
    writeln!(file, "element vertex {}", 3 * faces)?;
    writeln!(file, "property float x")?;
    writeln!(file, "property float y")?;
    writeln!(file, "property float z")?;
    writeln!(file, "element face {faces}")?;
    writeln!(file, "property list uchar int vertex_index")?;
    writeln!(file, "property uchar red")?;
    writeln!(file, "property uchar green")?;
    writeln!(file, "property uchar blue")?;
    writeln!(file, "end_header")?;
    Ok(())
}

/// MAT 5.0 data type tags
mod mi {
    pub const INT8: i32 = 1;
    pub const UINT8: i32 = 2;
    pub const INT32: i32 = 5;
    pub const UINT32: i32 = 6;
    pub const SINGLE: i32 = 7;
    pub const MATRIX: i32 = 14;
    pub const UTF8: i32 = 16;
}

/// MAT 5.0 array class tags
mod mx {
    pub const STRUCT: i32 = 2;
    pub const CHAR: i32 = 4;
    pub const SINGLE: i32 = 7;
    pub const UINT8: i32 = 9;
    pub const INT32: i32 = 12;
}

/// Serializes one numeric MAT array element (tag, flags, dims, empty
/// name, data, padding)
fn mat_array(class: i32, dims: [i32; 2], data_type: i32, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&mi::UINT32.to_le_bytes());
    body.extend_from_slice(&8i32.to_le_bytes());
    body.push(class as u8);
    body.push(0);
    body.extend_from_slice(&[0; 6]);

    body.extend_from_slice(&mi::INT32.to_le_bytes());
    body.extend_from_slice(&8i32.to_le_bytes());
    body.extend_from_slice(&dims[0].to_le_bytes());
    body.extend_from_slice(&dims[1].to_le_bytes());

    body.extend_from_slice(&mi::INT8.to_le_bytes());
    body.extend_from_slice(&0i32.to_le_bytes());

    body.extend_from_slice(&data_type.to_le_bytes());
    body.extend_from_slice(&(data.len() as i32).to_le_bytes());
    body.extend_from_slice(data);
    let padding = (8 - data.len() % 8) % 8;
    body.extend_from_slice(&vec![0; padding]);

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&mi::MATRIX.to_le_bytes());
    out.extend_from_slice(&(body.len() as i32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Interface surface palette, reused modulo 12
const INTERFACE_COLORS: [[u8; 3]; 12] = [
    [141, 211, 199],
    [255, 255, 179],
    [190, 186, 218],
    [251, 128, 114],
    [128, 177, 211],
    [253, 180, 98],
    [179, 222, 105],
    [252, 205, 229],
    [217, 217, 217],
    [188, 128, 189],
    [204, 235, 197],
    [255, 237, 111],
];

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    /// Two tets sharing the face (0, 1, 2)
    fn two_tet_mesh() -> TetMesh {
        TetMesh {
            verts: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.0, 0.0, -1.0),
            ],
            tets: vec![
                MeshTet {
                    verts: [0, 1, 2, 3],
                    material: 0,
                    neighbors: [None; 4],
                    faces: [None; 4],
                },
                MeshTet {
                    verts: [0, 1, 2, 4],
                    material: 1,
                    neighbors: [None; 4],
                    faces: [None; 4],
                },
            ],
            faces: Vec::new(),
            min_angle: 180.0,
            max_angle: 0.0,
            time: Duration::ZERO,
        }
    }

    #[test]
    fn construct_faces_pairs_shared_triangles() {
        let mut mesh = two_tet_mesh();
        mesh.construct_faces();

        // 4 + 4 triangles, one shared
        assert_eq!(mesh.faces.len(), 7);
        let interior: Vec<&MeshFace> = mesh
            .faces
            .iter()
            .filter(|f| f.tets[1].is_some())
            .collect();
        assert_eq!(interior.len(), 1);
        assert_eq!(interior[0].tets, [Some(0), Some(1)]);

        // adjacency is symmetric
        assert_eq!(mesh.tets[0].neighbors.iter().flatten().count(), 1);
        assert_eq!(mesh.tets[1].neighbors.iter().flatten().count(), 1);

        // the shared face's normal points away from tet 0's apex
        let f = interior[0];
        assert!(f.normal.dot(&Vector3::z()) < 0.0);
    }

    #[test]
    fn bcc_tet_dihedral_angles() {
        // a background tet of the BCC lattice: a primal edge and the two
        // dual points flanking it
        let mut mesh = TetMesh {
            verts: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.5, 0.5, 0.5),
                Vector3::new(0.5, 0.5, -0.5),
            ],
            tets: vec![MeshTet {
                verts: [0, 1, 2, 3],
                material: 0,
                neighbors: [None; 4],
                faces: [None; 4],
            }],
            faces: Vec::new(),
            min_angle: 180.0,
            max_angle: 0.0,
            time: Duration::ZERO,
        };
        mesh.compute_angles();
        assert_relative_eq!(mesh.min_angle, 60.0, epsilon = 1e-9);
        assert_relative_eq!(mesh.max_angle, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn strip_bad_tets_drops_flat_tets() {
        let mut mesh = two_tet_mesh();
        // a tet squashed into the z = 0 plane
        mesh.tets.push(MeshTet {
            verts: [0, 1, 2, 0],
            material: 0,
            neighbors: [None; 4],
            faces: [None; 4],
        });
        mesh.strip_bad_tets();
        assert_eq!(mesh.tets.len(), 2);
    }

    #[test]
    fn node_ele_writer_counts() {
        let mut mesh = two_tet_mesh();
        mesh.compute_angles();

        let dir = std::env::temp_dir().join("cleave-node-ele-test");
        std::fs::create_dir_all(&dir).unwrap();
        let stem = dir.join("mesh");
        let stem = stem.to_str().unwrap();
        mesh.write_node_ele(stem).unwrap();

        let node = std::fs::read_to_string(format!("{stem}.node")).unwrap();
        assert!(node.lines().nth(1).unwrap().starts_with("5  3  0  0"));
        // header + blank + one line per vertex
        assert_eq!(node.lines().count(), 3 + 5);

        let ele = std::fs::read_to_string(format!("{stem}.ele")).unwrap();
        assert!(ele.lines().nth(1).unwrap().starts_with("2 4 1"));
        // materials are 1-based in the last column
        let last = ele.lines().last().unwrap();
        assert!(last.ends_with('2'));
    }

    #[test]
    fn ply_writer_emits_interface_faces() {
        let mut mesh = two_tet_mesh();
        mesh.construct_faces();

        let dir = std::env::temp_dir().join("cleave-ply-test");
        std::fs::create_dir_all(&dir).unwrap();
        let stem = dir.join("mesh");
        let stem = stem.to_str().unwrap();
        mesh.write_ply(stem).unwrap();

        let ply = std::fs::read_to_string(format!("{stem}.ply")).unwrap();
        let mut lines = ply.lines();
        assert_eq!(lines.next(), Some("ply"));
        assert_eq!(lines.next(), Some("format ascii 1.0"));
        // the single material interface yields one face, three vertices
        assert_eq!(lines.next(), Some("element vertex 3"));
        assert!(ply.lines().any(|l| l == "element face 1"));
    }

    #[test]
    fn matlab_writer_sizes_are_consistent() {
        let mesh = two_tet_mesh();

        let dir = std::env::temp_dir().join("cleave-matlab-test");
        std::fs::create_dir_all(&dir).unwrap();
        let stem = dir.join("mesh");
        let stem = stem.to_str().unwrap();
        mesh.write_matlab(stem).unwrap();

        let bytes = std::fs::read(format!("{stem}.mat")).unwrap();
        assert!(bytes.starts_with(b"MATLAB 5.0 MAT-file"));
        assert_eq!(&bytes[126..128], b"IM");

        // the top-level element size covers the rest of the file
        let size = i32::from_le_bytes(bytes[132..136].try_into().unwrap());
        assert_eq!(bytes.len(), 136 + size as usize);
    }
}
