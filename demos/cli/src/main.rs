use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::info;

use cleave::{FloatField, InverseField, MesherOptions, ScalarField, Volume};

/// Multimaterial tetrahedral mesher
///
/// Takes one material field per input file (raw format: three
/// little-endian u32 dimensions, then width * height * depth f32
/// samples, x fastest). A single input is completed with its inverse to
/// form a two-material segmentation.
#[derive(Parser)]
#[clap(author, version, about)]
struct Args {
    /// Input material field files
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file stem
    #[clap(short, long, default_value = "output")]
    output: String,

    /// Volume mesh output format
    #[clap(short, long, value_enum, default_value_t = Format::Tetgen)]
    format: Format,

    /// Wrap the volume in a padding material, closing any interface that
    /// touches the bounding box
    #[clap(short, long)]
    pad: bool,

    /// Violation tolerance on short (diagonal) lattice edges
    #[clap(long, default_value_t = MesherOptions::default().alpha_short)]
    alpha_short: f64,

    /// Violation tolerance on long (primal and dual) lattice edges
    #[clap(long, default_value_t = MesherOptions::default().alpha_long)]
    alpha_long: f64,

    /// Resample the volume to an absolute lattice size
    #[clap(long, num_args = 3, value_names = ["W", "H", "D"])]
    size: Option<Vec<usize>>,

    /// Scale the lattice size relative to the field dimensions
    #[clap(long, conflicts_with = "size")]
    scale: Option<f64>,

    /// Suppress progress output
    #[clap(short, long)]
    silent: bool,
}

#[derive(ValueEnum, Clone, Copy)]
enum Format {
    /// TetGen .node / .ele pair
    Tetgen,
    /// SCIRun .pts / .elem / .txt triplet
    Scirun,
    /// MAT 5.0 tetmesh struct
    Matlab,
}

/// Reads a raw float field: u32 dims, then f32 samples, all little-endian
fn load_field(path: &Path) -> Result<FloatField> {
    let mut file = std::io::BufReader::new(
        std::fs::File::open(path).with_context(|| format!("failed to open {path:?}"))?,
    );

    let mut dims = [0u32; 3];
    for d in &mut dims {
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf)
            .with_context(|| format!("failed to read header of {path:?}"))?;
        *d = u32::from_le_bytes(buf);
    }
    let [nx, ny, nz] = dims.map(|d| d as usize);

    let count = nx
        .checked_mul(ny)
        .and_then(|v| v.checked_mul(nz))
        .context("field dimensions overflow")?;
    let mut data = Vec::with_capacity(count);
    let mut buf = [0u8; 4];
    for _ in 0..count {
        file.read_exact(&mut buf)
            .with_context(|| format!("{path:?} is truncated"))?;
        data.push(f32::from_le_bytes(buf));
    }

    Ok(FloatField::new(nx, ny, nz, data)?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.silent { "warn" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let mut fields: Vec<Arc<dyn ScalarField>> = Vec::new();
    for path in &args.inputs {
        info!("loading field {path:?}");
        fields.push(Arc::new(load_field(path)?));
    }
    if fields.len() == 1 {
        info!("single input; completing the segmentation with its inverse");
        fields.push(Arc::new(InverseField::new(fields[0].clone())));
    }

    let mut volume = Volume::new(fields)?;
    if let Some(size) = &args.size {
        let &[w, h, d] = size.as_slice() else {
            bail!("--size takes three values");
        };
        volume.set_size(w, h, d);
    } else if let Some(scale) = args.scale {
        use cleave::MaterialVolume;
        volume.set_size(
            (scale * volume.width() as f64) as usize,
            (scale * volume.height() as f64) as usize,
            (scale * volume.depth() as f64) as usize,
        );
    }

    let options = MesherOptions {
        alpha_short: args.alpha_short,
        alpha_long: args.alpha_long,
        pad: args.pad,
    };
    let mut mesh = cleave::mesh_volume(&volume, &options)?;

    mesh.compute_angles();
    info!(
        "worst dihedral angles: min {:.6}, max {:.6}",
        mesh.min_angle, mesh.max_angle
    );

    mesh.write_info(&args.output)?;
    match args.format {
        Format::Tetgen => mesh.write_node_ele(&args.output)?,
        Format::Scirun => mesh.write_pts_ele(&args.output)?,
        Format::Matlab => mesh.write_matlab(&args.output)?,
    }

    mesh.construct_faces();
    mesh.write_ply(&args.output)?;

    info!("done");
    Ok(())
}
