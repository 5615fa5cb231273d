//! Plane merge demo
//!
//! Builds a synthetic pair of splat scenes (a floor, a wall and some clutter),
//! reduces them with a toy voxel-clustering oracle and exports the merged pair.
//!
//! Run with `RUST_LOG=debug` to see per-plane progress.

use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splatreg_core::{
    feature_block_len, GaussianPrimitiveSet, Matrix3, MixtureLevel, PackedCovariance, Point3f, PreviewCloud,
    SplatAttributes, Transform3D, UnitQuaternion, Vector3f,
};
use splatreg_mixture::{MixtureClusteringOracle, ReductionParams};
use splatreg_session::{PlanePartition, RegistrationSession, SessionConfig, Side};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Reduce only primitives on fitted planes
    Planes,
    /// Reduce whole clouds
    Mixture,
}

#[derive(Parser, Debug)]
#[command(name = "plane_merge")]
#[command(about = "Reduce a synthetic splat pair into a level-of-detail pyramid")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Planes)]
    mode: Mode,

    /// Primitives per scene
    #[arg(short, long, default_value_t = 4000)]
    points: usize,

    /// Number of reduced levels
    #[arg(short, long, default_value_t = 3)]
    depth: usize,

    #[arg(long, default_value_t = 1)]
    sh_degree: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 2.5)]
    distance_delta: f32,

    #[arg(long, default_value_t = 3.0)]
    hem_reduction: f32,
}

/// Toy clustering: merges primitives sharing a voxel by moment matching, with
/// the voxel edge growing by `hem_reduction` per level.
struct VoxelOracle;

impl VoxelOracle {
    fn cluster(input: &MixtureLevel, cell: f32) -> MixtureLevel {
        let n = input.len();
        let block = if n == 0 { 0 } else { input.features.len() / n };

        let mut cells: BTreeMap<(i64, i64, i64), Vec<usize>> = BTreeMap::new();
        for (i, p) in input.positions.iter().enumerate() {
            let key = (
                (p.x / cell).floor() as i64,
                (p.y / cell).floor() as i64,
                (p.z / cell).floor() as i64,
            );
            cells.entry(key).or_default().push(i);
        }

        let mut out = MixtureLevel::new();
        for members in cells.values() {
            let weight = 1.0 / members.len() as f32;
            let mean = members
                .iter()
                .fold(Vector3f::zeros(), |acc, &i| acc + input.positions[i].coords)
                * weight;
            let covariance = members.iter().fold(Matrix3::zeros(), |acc, &i| {
                let d = input.positions[i].coords - mean;
                acc + input.covariances[i].to_matrix() + d * d.transpose()
            }) * weight;
            let color = members
                .iter()
                .fold(Vector3f::zeros(), |acc, &i| acc + input.colors[i])
                * weight;
            let opacity = members.iter().map(|&i| input.opacities[i]).sum::<f32>() * weight;

            let mut features = vec![0.0; block];
            for &i in members {
                for (f, v) in features.iter_mut().zip(&input.features[i * block..(i + 1) * block]) {
                    *f += v * weight;
                }
            }

            out.positions.push(Point3f::from(mean));
            out.covariances.push(PackedCovariance::from_matrix(&covariance));
            out.colors.push(color);
            out.opacities.push(opacity);
            out.features.extend(features);
        }
        out
    }
}

impl MixtureClusteringOracle for VoxelOracle {
    fn reduce(&self, input: &MixtureLevel, params: &ReductionParams) -> anyhow::Result<Vec<MixtureLevel>> {
        let mut levels = Vec::with_capacity(params.depth);
        let mut cell = 0.02 * params.distance_delta;
        let mut current = input.clone();
        for _ in 0..params.depth {
            current = Self::cluster(&current, cell);
            levels.push(current.clone());
            cell *= params.hem_reduction.max(1.0) * params.decay_rate.max(0.1);
        }
        Ok(levels)
    }
}

/// A floor at z = 0, a wall at x = 0 and clutter above the floor
fn synthetic_scene(points: usize, sh_degree: usize, seed: u64) -> anyhow::Result<(GaussianPrimitiveSet, Vec<PlanePartition>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let floor = points / 2;
    let wall = points / 4;
    let block = feature_block_len(sh_degree);

    let positions: Vec<Point3f> = (0..points)
        .map(|i| {
            if i < floor {
                Point3f::new(rng.gen_range(0.0..4.0), rng.gen_range(0.0..4.0), rng.gen_range(-0.005..0.005))
            } else if i < floor + wall {
                Point3f::new(rng.gen_range(-0.005..0.005), rng.gen_range(0.0..4.0), rng.gen_range(0.0..2.0))
            } else {
                Point3f::new(rng.gen_range(1.0..3.0), rng.gen_range(1.0..3.0), rng.gen_range(0.2..1.5))
            }
        })
        .collect();

    let attributes = SplatAttributes {
        scales: (0..points)
            .map(|_| Vector3f::new(rng.gen_range(0.01..0.03), rng.gen_range(0.01..0.03), rng.gen_range(0.002..0.01)))
            .collect(),
        rotations: (0..points)
            .map(|_| UnitQuaternion::from_euler_angles(rng.gen_range(-0.2..0.2), rng.gen_range(-0.2..0.2), rng.gen_range(-3.1..3.1)))
            .collect(),
        opacities: (0..points).map(|_| rng.gen_range(-1.0..3.0)).collect(),
        colors: (0..points)
            .map(|_| Vector3f::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect(),
        features: (0..points * block).map(|_| rng.gen_range(-0.1..0.1)).collect(),
        positions,
    };
    let set = GaussianPrimitiveSet::from_scale_rotation(sh_degree, attributes)?;

    let planes = vec![
        PlanePartition::new((0..floor).collect()).with_coefficients([0.0, 0.0, 1.0, 0.0]),
        PlanePartition::new((floor..floor + wall).collect()).with_coefficients([1.0, 0.0, 0.0, 0.0]),
    ];
    Ok((set, planes))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    println!("=== splatreg plane merge demo ===\n");

    let (first, first_planes) = synthetic_scene(cli.points, cli.sh_degree, cli.seed)?;
    let (second, second_planes) = synthetic_scene(cli.points, cli.sh_degree, cli.seed + 1)?;

    let reduction = ReductionParams::default()
        .with_depth(cli.depth)
        .with_distance_delta(cli.distance_delta)
        .with_hem_reduction(cli.hem_reduction);
    let mut session = RegistrationSession::new(Arc::new(VoxelOracle), SessionConfig::default().with_reduction(reduction));
    session.on_error(|e| error!(error = %e, "reduction failed"));
    session.on_levels_changed(|levels| info!(levels, "pyramids updated"));

    session.load_pair(first, second)?;
    let status = match cli.mode {
        Mode::Planes => {
            session.set_plane_partitions(first_planes, second_planes)?;
            session.merge_plane_inliers(|percent| info!(percent, "plane merge"))?
        }
        Mode::Mixture => session.build_mixture(|percent| info!(percent, "mixture build"))?,
    };
    println!("Reduction finished: {:?}", status);

    for side in [Side::First, Side::Second] {
        let sizes: Vec<usize> = session.state().pyramid(side).iter().map(|l| l.len()).collect();
        println!("   {:?} pyramid: {:?}", side, sizes);
    }

    // Stand-in for a registration result: a small turn about z plus a shift.
    let delta = Transform3D::from_translation_rotation(
        Vector3f::new(0.05, -0.02, 0.0),
        UnitQuaternion::from_euler_angles(0.0, 0.0, 0.05),
    );
    session.compose_transform(delta);

    let level = session.set_active_level(1);
    let merged = session.merged_export(level)?;
    let preview = PreviewCloud::from_gaussians(&merged);
    println!(
        "\nMerged export at level {}: {} primitives ({} preview bytes)",
        level,
        merged.len(),
        preview.as_bytes().len()
    );

    println!("\n=== Demo completed successfully! ===");
    Ok(())
}
