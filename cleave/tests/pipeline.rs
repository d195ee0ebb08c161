//! End-to-end meshing runs over small synthetic volumes

use std::sync::Arc;

use cleave::{
    BccLattice, FloatField, InverseField, MaterialVolume, Mesher, MesherOptions, ScalarField,
    TetMesh, Volume,
};

/// Two materials split by the plane z = 3.5
fn planar_volume() -> Volume {
    let below = Arc::new(FloatField::from_fn(8, 8, 8, |_, _, k| 3.5 - k as f32));
    let above = Arc::new(InverseField::new(below.clone()));
    Volume::new(vec![below as Arc<dyn ScalarField>, above]).unwrap()
}

/// Four materials meeting along a line tilted across the grid, so some
/// tets see all four labels and real quadruple points appear
fn quadrant_volume() -> Volume {
    let field = |sy: f32, sz: f32| {
        Arc::new(FloatField::from_fn(8, 8, 8, move |i, j, k| {
            let y = j as f32 - 1.05 - 0.5 * i as f32;
            let z = k as f32 - 3.3;
            sy * y + sz * z
        })) as Arc<dyn ScalarField>
    };
    Volume::new(vec![
        field(1.0, 1.0),
        field(1.0, -1.0),
        field(-1.0, 1.0),
        field(-1.0, -1.0),
    ])
    .unwrap()
}

#[test]
fn single_material_volume_meshes_without_interfaces() {
    // material 0 dominates everywhere
    let high = Arc::new(FloatField::from_fn(6, 6, 6, |_, _, _| 1.0));
    let low = Arc::new(FloatField::from_fn(6, 6, 6, |_, _, _| -1.0));
    let volume = Volume::new(vec![high as Arc<dyn ScalarField>, low]).unwrap();

    let mut lat = BccLattice::from_volume(&volume).unwrap();
    Mesher::new(&mut lat, &volume).mesh();

    assert!(lat.edges.iter().all(|e| e.cut.is_none()));
    assert!(lat.faces.iter().all(|f| f.triple.is_none()));
    assert!(lat.tets.iter().all(|t| t.quad.is_none()));

    let mesh = TetMesh::from_lattice(&lat).unwrap();
    assert!(mesh.tets.iter().all(|t| t.material == 0));
}

#[test]
fn planar_interface_stays_planar() {
    let volume = planar_volume();
    let mut mesh = cleave::mesh_volume(&volume, &MesherOptions::default()).unwrap();
    mesh.construct_faces();

    // the fields are linear in z, so every interface vertex lands on the
    // z = 3.5 plane, warped or not
    let mut interface_faces = 0;
    for face in &mesh.faces {
        let (Some(t1), Some(t2)) = (face.tets[0], face.tets[1]) else {
            continue;
        };
        if mesh.tets[t1].material == mesh.tets[t2].material {
            continue;
        }
        interface_faces += 1;
        for v in face.verts {
            assert!(
                (mesh.verts[v].z - 3.5).abs() < 1e-6,
                "interface vertex off the plane: {:?}",
                mesh.verts[v]
            );
        }
    }
    assert!(interface_faces > 0);

    // both sides are present
    assert!(mesh.tets.iter().any(|t| t.material == 0));
    assert!(mesh.tets.iter().any(|t| t.material == 1));
}

#[test]
fn quadruple_point_volume_meshes_cleanly() {
    let volume = quadrant_volume();
    let mesh = cleave::mesh_volume(&volume, &MesherOptions::default()).unwrap();

    // all four materials survive to the output
    for mat in 0..4 {
        assert!(
            mesh.tets.iter().any(|t| t.material == mat),
            "material {mat} missing from output"
        );
    }

    // no zero-volume tets
    for t in &mesh.tets {
        assert!(t.volume(&mesh.verts).abs() > 1e-12);
    }
}

#[test]
fn interface_faces_are_shared_by_exactly_two_tets() {
    let volume = quadrant_volume();
    let mut mesh = cleave::mesh_volume(&volume, &MesherOptions::default()).unwrap();
    mesh.construct_faces();

    for face in &mesh.faces {
        let (Some(t1), Some(t2)) = (face.tets[0], face.tets[1]) else {
            continue;
        };
        if mesh.tets[t1].material != mesh.tets[t2].material {
            // the paired tets must actually share all three face vertices
            for v in face.verts {
                let a = mesh.tets[t1].verts.contains(&v);
                let b = mesh.tets[t2].verts.contains(&v);
                assert!(a && b);
            }
        }
    }
}

#[test]
fn padding_closes_a_boundary_interface() {
    // the sphere pokes out of the box on all sides
    let c = 4.0f32;
    let inside = Arc::new(FloatField::from_fn(8, 8, 8, move |i, j, k| {
        let (x, y, z) = (i as f32 - c, j as f32 - c, k as f32 - c);
        6.0 - (x * x + y * y + z * z).sqrt()
    }));
    let outside = Arc::new(InverseField::new(inside.clone()));
    let volume = Volume::new(vec![inside as Arc<dyn ScalarField>, outside]).unwrap();

    let options = MesherOptions {
        pad: true,
        ..MesherOptions::default()
    };
    let mesh = cleave::mesh_volume(&volume, &options).unwrap();

    // two input materials plus the padding material
    let max = mesh.tets.iter().map(|t| t.material).max().unwrap();
    assert_eq!(max, 2);

    // the outer shell belongs entirely to the padding material
    let padded =
        cleave::PaddedVolume::new(Box::new(&volume as &dyn MaterialVolume));
    let size = [padded.width(), padded.height(), padded.depth()];
    for t in &mesh.tets {
        let mut bary = [0.0f64; 3];
        for &v in &t.verts {
            for axis in 0..3 {
                bary[axis] += mesh.verts[v][axis] / 4.0;
            }
        }
        let near_boundary = (0..3).any(|axis| {
            bary[axis] < 1.0 || bary[axis] > size[axis] as f64 - 1.0
        });
        if near_boundary {
            assert_eq!(t.material, 2, "non-padding tet at the boundary: {bary:?}");
        }
    }
}

#[test]
fn mesh_records_timing() {
    let volume = planar_volume();
    let mesh = cleave::mesh_volume(&volume, &MesherOptions::default()).unwrap();
    assert!(mesh.time > std::time::Duration::ZERO);
}
