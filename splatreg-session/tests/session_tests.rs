//! End-to-end behaviour of the registration session coordinator

use approx::assert_relative_eq;
use splatreg_core::*;
use splatreg_mixture::{MixtureClusteringOracle, ReductionParams};
use splatreg_session::*;
use splatreg_tasks::{RunnerConfig, TaskStatus};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

fn halve(level: &MixtureLevel) -> MixtureLevel {
    let keep: Vec<usize> = (0..level.len()).step_by(2).collect();
    let block = if level.is_empty() { 0 } else { level.features.len() / level.len() };
    MixtureLevel {
        positions: keep.iter().map(|&i| level.positions[i]).collect(),
        colors: keep.iter().map(|&i| level.colors[i]).collect(),
        opacities: keep.iter().map(|&i| level.opacities[i]).collect(),
        covariances: keep.iter().map(|&i| level.covariances[i]).collect(),
        features: keep
            .iter()
            .flat_map(|&i| level.features[i * block..(i + 1) * block].iter().copied())
            .collect(),
    }
}

fn halving_levels(input: &MixtureLevel, depth: usize) -> Vec<MixtureLevel> {
    let mut levels = Vec::with_capacity(depth);
    let mut current = input.clone();
    for _ in 0..depth {
        current = halve(&current);
        levels.push(current.clone());
    }
    levels
}

fn halving_oracle() -> Arc<dyn MixtureClusteringOracle> {
    Arc::new(
        |input: &MixtureLevel, params: &ReductionParams| -> anyhow::Result<Vec<MixtureLevel>> {
            Ok(halving_levels(input, params.depth))
        },
    )
}

/// Halving oracle that waits for one permit per call
fn gated_oracle() -> (Arc<dyn MixtureClusteringOracle>, flume::Sender<()>) {
    let (permits, gate) = flume::unbounded::<()>();
    let oracle: Arc<dyn MixtureClusteringOracle> = Arc::new(
        move |input: &MixtureLevel, params: &ReductionParams| -> anyhow::Result<Vec<MixtureLevel>> {
            gate.recv()?;
            Ok(halving_levels(input, params.depth))
        },
    );
    (oracle, permits)
}

fn cloud(n: usize, sh_degree: usize) -> GaussianPrimitiveSet {
    let block = feature_block_len(sh_degree);
    GaussianPrimitiveSet::from_scale_rotation(
        sh_degree,
        SplatAttributes {
            positions: (0..n).map(|i| Point3f::new(i as f32, 1.0, 2.0)).collect(),
            scales: vec![Vector3f::new(0.1, 0.2, 0.05); n],
            rotations: vec![UnitQuaternion::from_euler_angles(0.3, 0.1, -0.2); n],
            opacities: vec![0.5; n],
            colors: vec![Vector3f::new(0.2, 0.4, 0.6); n],
            features: vec![0.0; n * block],
        },
    )
    .unwrap()
}

fn session_with(oracle: Arc<dyn MixtureClusteringOracle>, depth: usize) -> RegistrationSession {
    let config = SessionConfig::default()
        .with_reduction(ReductionParams::default().with_depth(depth))
        .with_runner(RunnerConfig::default().with_poll_interval(Duration::from_millis(1)));
    RegistrationSession::new(oracle, config)
}

fn level_sizes(session: &RegistrationSession, side: Side) -> Vec<usize> {
    session.state().pyramid(side).iter().map(|l| l.len()).collect()
}

fn planes(range: std::ops::Range<usize>) -> Vec<PlanePartition> {
    vec![PlanePartition::new(range.collect())]
}

#[test]
fn test_load_pair_resets_pyramids_and_planes() {
    let mut session = session_with(halving_oracle(), 2);
    session.load_pair(cloud(100, 1), cloud(100, 1)).unwrap();
    session.set_plane_partitions(planes(0..50), planes(0..50)).unwrap();
    session.build_mixture(|_| {}).unwrap();
    assert_eq!(session.state().level_count(), 3);
    session.set_active_level(2);

    session.load_pair(cloud(10, 1), cloud(12, 1)).unwrap();
    assert_eq!(level_sizes(&session, Side::First), vec![10]);
    assert_eq!(level_sizes(&session, Side::Second), vec![12]);
    assert_eq!(session.state().active_level(), 0);
    assert!(!session.state().has_planes());
}

#[test]
fn test_load_pair_rejects_mismatched_degree() {
    let mut session = session_with(halving_oracle(), 2);
    let result = session.load_pair(cloud(5, 0), cloud(5, 1));
    assert!(matches!(
        result,
        Err(Error::IncompatibleFeatureDegree { left: 0, right: 1 })
    ));
    assert!(!session.state().is_loaded());
}

#[test]
fn test_plane_merge_installs_behind_level_zero() {
    let mut session = session_with(halving_oracle(), 2);
    let counts = Rc::new(RefCell::new(Vec::new()));
    let counts_log = Rc::clone(&counts);
    session.on_levels_changed(move |n| counts_log.borrow_mut().push(n));

    session.load_pair(cloud(100, 1), cloud(100, 1)).unwrap();
    session.set_plane_partitions(planes(0..50), planes(50..100)).unwrap();

    let progress = Rc::new(RefCell::new(Vec::new()));
    let progress_log = Rc::clone(&progress);
    let status = session
        .merge_plane_inliers(move |p| progress_log.borrow_mut().push(p))
        .unwrap();

    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(level_sizes(&session, Side::First), vec![100, 75, 63]);
    assert_eq!(level_sizes(&session, Side::Second), vec![100, 75, 63]);
    assert!(!session.state().has_planes());
    assert_eq!(*counts.borrow(), vec![1, 3]);

    let progress = progress.borrow();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&67));
}

#[test]
fn test_level_zero_is_shared_with_the_loaded_set() {
    let mut session = session_with(halving_oracle(), 1);
    session.load_pair(cloud(20, 0), cloud(20, 0)).unwrap();
    let before = Arc::clone(&session.state().original(Side::First).unwrap().gaussians);

    session.build_mixture(|_| {}).unwrap();

    let after = &session.state().original(Side::First).unwrap().gaussians;
    assert!(Arc::ptr_eq(&before, after));
    assert_eq!(level_sizes(&session, Side::First), vec![20, 10]);
}

#[test]
fn test_failed_reduction_reaches_error_sink_and_keeps_state() {
    let failing: Arc<dyn MixtureClusteringOracle> = Arc::new(
        |_: &MixtureLevel, _: &ReductionParams| -> anyhow::Result<Vec<MixtureLevel>> {
            Err(anyhow::anyhow!("clustering backend unavailable"))
        },
    );
    let mut session = session_with(failing, 2);
    let errors = Rc::new(RefCell::new(Vec::new()));
    let errors_log = Rc::clone(&errors);
    session.on_error(move |e| errors_log.borrow_mut().push(e.to_string()));

    session.load_pair(cloud(30, 1), cloud(30, 1)).unwrap();
    session.set_plane_partitions(planes(0..10), planes(0..10)).unwrap();
    let status = session.merge_plane_inliers(|_| {}).unwrap();

    assert_eq!(status, TaskStatus::Failed);
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("clustering backend unavailable"));
    assert_eq!(level_sizes(&session, Side::First), vec![30]);
    assert!(session.state().has_planes());
}

#[test]
fn test_cancel_keeps_state_and_slot_reusable() {
    let (oracle, permits) = gated_oracle();
    let mut session = session_with(oracle, 2);
    session.load_pair(cloud(40, 0), cloud(40, 0)).unwrap();
    session.set_plane_partitions(planes(0..20), planes(0..20)).unwrap();

    let pending = session.start_plane_merge().unwrap();
    pending.request_cancel();
    permits.send(()).unwrap();
    let status = session.complete(pending, |_| {});

    assert_eq!(status, TaskStatus::Cancelled);
    assert_eq!(level_sizes(&session, Side::First), vec![40]);
    assert!(session.state().has_planes());
    assert!(!session.is_busy());

    permits.send(()).unwrap();
    permits.send(()).unwrap();
    let status = session.merge_plane_inliers(|_| {}).unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(level_sizes(&session, Side::First), vec![40, 30, 25]);
}

#[test]
fn test_state_changes_rejected_while_running() {
    let (oracle, permits) = gated_oracle();
    let mut session = session_with(oracle, 1);
    session.load_pair(cloud(16, 0), cloud(16, 0)).unwrap();

    let pending = session.start_mixture_build().unwrap();
    assert!(session.is_busy());
    assert!(matches!(session.start_mixture_build(), Err(Error::Busy { .. })));
    assert!(matches!(session.load_pair(cloud(4, 0), cloud(4, 0)), Err(Error::Busy { .. })));
    assert!(matches!(
        session.set_plane_partitions(planes(0..2), planes(0..2)),
        Err(Error::Busy { .. })
    ));

    permits.send(()).unwrap();
    permits.send(()).unwrap();
    assert_eq!(session.complete(pending, |_| {}), TaskStatus::Completed);
    assert_eq!(level_sizes(&session, Side::First), vec![16, 8]);
}

#[test]
fn test_reduction_preconditions() {
    let mut session = session_with(halving_oracle(), 2);
    assert!(matches!(session.start_mixture_build(), Err(Error::InvalidData(_))));

    session.load_pair(cloud(10, 0), cloud(10, 0)).unwrap();
    assert!(matches!(session.start_plane_merge(), Err(Error::NoPartitions)));
    assert!(matches!(
        session.set_plane_partitions(planes(0..11), Vec::new()),
        Err(Error::InvalidData(_))
    ));

    session.set_plane_partitions(planes(0..5), Vec::new()).unwrap();
    assert!(matches!(session.start_plane_merge(), Err(Error::NoPartitions)));
    session.set_plane_partitions(Vec::new(), planes(0..5)).unwrap();
    assert!(matches!(session.start_plane_merge(), Err(Error::NoPartitions)));
    assert!(!session.is_busy());
}

#[test]
fn test_finished_reduction_holds_slot_until_completed() {
    let (done_tx, done_rx) = flume::unbounded::<()>();
    let oracle: Arc<dyn MixtureClusteringOracle> = Arc::new(
        move |input: &MixtureLevel, params: &ReductionParams| -> anyhow::Result<Vec<MixtureLevel>> {
            let levels = halving_levels(input, params.depth);
            done_tx.send(())?;
            Ok(levels)
        },
    );
    let mut session = session_with(oracle, 1);
    session.load_pair(cloud(16, 0), cloud(16, 0)).unwrap();

    let pending = session.start_mixture_build().unwrap();
    done_rx.recv().unwrap();
    done_rx.recv().unwrap();
    // Let the worker finish and queue its result.
    std::thread::sleep(Duration::from_millis(50));

    assert!(session.is_busy());
    assert!(matches!(session.load_pair(cloud(4, 0), cloud(4, 0)), Err(Error::Busy { .. })));
    assert!(matches!(session.start_mixture_build(), Err(Error::Busy { .. })));

    assert_eq!(session.complete(pending, |_| {}), TaskStatus::Completed);
    assert_eq!(level_sizes(&session, Side::First), vec![16, 8]);
    assert!(!session.is_busy());

    session.load_pair(cloud(4, 0), cloud(4, 0)).unwrap();
    assert_eq!(session.build_mixture(|_| {}).unwrap(), TaskStatus::Completed);
    assert_eq!(level_sizes(&session, Side::First), vec![4, 2]);
    assert_eq!(level_sizes(&session, Side::Second), vec![4, 2]);
}

#[test]
fn test_active_level_clamped_to_shorter_pyramid() {
    // Levels with fewer than three primitives come back empty.
    let thinning: Arc<dyn MixtureClusteringOracle> = Arc::new(
        |input: &MixtureLevel, params: &ReductionParams| -> anyhow::Result<Vec<MixtureLevel>> {
            Ok(halving_levels(input, params.depth)
                .into_iter()
                .map(|level| if level.len() < 3 { MixtureLevel::new() } else { level })
                .collect())
        },
    );
    let mut session = session_with(thinning, 2);
    session.load_pair(cloud(40, 0), cloud(8, 0)).unwrap();
    session.build_mixture(|_| {}).unwrap();

    assert_eq!(level_sizes(&session, Side::First), vec![40, 20, 10]);
    assert_eq!(level_sizes(&session, Side::Second), vec![8, 4]);
    assert_eq!(session.set_active_level(5), 1);

    let pair = session.active_pair().unwrap();
    assert_eq!(pair.level, 1);
    assert_eq!(pair.first.len(), 20);
    assert_eq!(pair.second.len(), 4);
}

#[test]
fn test_transform_listeners_fire_on_change_only() {
    let mut session = session_with(halving_oracle(), 1);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_log = Rc::clone(&seen);
    session.on_transform_changed(move |t| seen_log.borrow_mut().push(*t));

    assert!(!session.set_transform(Transform3D::identity()));
    let shift = Transform3D::translation(Vector3f::new(1.0, 0.0, 0.0));
    assert!(session.set_transform(shift));
    assert!(!session.set_transform(shift));
    assert_eq!(seen.borrow().len(), 1);

    let turn = Transform3D::rotation(UnitQuaternion::from_euler_angles(0.0, 0.0, std::f32::consts::FRAC_PI_2));
    assert!(session.compose_transform(turn));
    let moved = session.transform().transform_point(&Point3f::origin());
    // Rotation applied after the translation: (1, 0, 0) -> (0, 1, 0).
    assert_relative_eq!(moved, Point3f::new(0.0, 1.0, 0.0), epsilon = 1e-6);
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn test_merged_export_moves_first_cloud_only() {
    let mut session = session_with(halving_oracle(), 1);
    session.load_pair(cloud(5, 1), cloud(3, 1)).unwrap();
    session.set_transform(Transform3D::translation(Vector3f::new(10.0, 0.0, 0.0)));

    let merged = session.merged_export(0).unwrap();
    assert_eq!(merged.len(), 8);
    assert_relative_eq!(merged.positions()[0], Point3f::new(10.0, 1.0, 2.0));
    assert_relative_eq!(merged.positions()[5], Point3f::new(0.0, 1.0, 2.0));

    let stored = &session.state().original(Side::First).unwrap().gaussians;
    assert_eq!(stored.positions()[0], Point3f::new(0.0, 1.0, 2.0));
    assert!(matches!(session.merged_export(1), Err(Error::InvalidData(_))));
}

#[test]
fn test_plane_inliers_follow_plane_order() {
    let mut session = session_with(halving_oracle(), 1);
    session.load_pair(cloud(10, 0), cloud(10, 0)).unwrap();
    session
        .set_plane_partitions(
            vec![
                PlanePartition::new(vec![3, 1]).with_coefficients([0.0, 1.0, 0.0, -1.0]),
                PlanePartition::new(vec![7]),
            ],
            Vec::new(),
        )
        .unwrap();

    let inliers = session.plane_inliers(Side::First).unwrap();
    let xs: Vec<f32> = inliers.positions().iter().map(|p| p.x).collect();
    assert_eq!(xs, vec![3.0, 1.0, 7.0]);
    assert!(session.plane_inliers(Side::Second).unwrap().is_empty());
}
