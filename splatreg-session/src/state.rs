//! Session state shared with renderers
//!
//! Pyramids are stored as `Arc<[PyramidLevel]>` and replaced as a whole, so a
//! reader holding a previous snapshot never sees a half-installed pyramid.

use serde::{Deserialize, Serialize};
use splatreg_core::{Error, Result, Transform3D};
use splatreg_mixture::PyramidLevel;
use std::sync::Arc;

/// One side of the registration pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The cloud being moved by the current transform
    First,
    Second,
}

/// Indices of level-0 primitives lying on one fitted plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanePartition {
    pub indices: Vec<usize>,
    /// Plane equation `ax + by + cz + d = 0`, when the fitter reports it
    pub coefficients: Option<[f32; 4]>,
}

impl PlanePartition {
    pub fn new(indices: Vec<usize>) -> Self {
        Self {
            indices,
            coefficients: None,
        }
    }

    pub fn with_coefficients(mut self, coefficients: [f32; 4]) -> Self {
        self.coefficients = Some(coefficients);
        self
    }
}

/// Snapshot of what a renderer draws
#[derive(Debug, Clone)]
pub struct ActivePair {
    pub level: usize,
    pub first: PyramidLevel,
    pub second: PyramidLevel,
    /// Transform applied to `first`
    pub transform: Transform3D,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    first: Arc<[PyramidLevel]>,
    second: Arc<[PyramidLevel]>,
    active_level: usize,
    first_planes: Vec<PlanePartition>,
    second_planes: Vec<PlanePartition>,
    transform: Transform3D,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            first: Arc::from(Vec::new()),
            second: Arc::from(Vec::new()),
            active_level: 0,
            first_planes: Vec::new(),
            second_planes: Vec::new(),
            transform: Transform3D::identity(),
        }
    }

    pub fn pyramid(&self, side: Side) -> &Arc<[PyramidLevel]> {
        match side {
            Side::First => &self.first,
            Side::Second => &self.second,
        }
    }

    pub fn level(&self, side: Side, level: usize) -> Option<&PyramidLevel> {
        self.pyramid(side).get(level)
    }

    /// The full-resolution set of `side`
    pub fn original(&self, side: Side) -> Option<&PyramidLevel> {
        self.level(side, 0)
    }

    pub fn is_loaded(&self) -> bool {
        !self.first.is_empty() && !self.second.is_empty()
    }

    /// Number of levels usable on both sides
    pub fn level_count(&self) -> usize {
        self.first.len().min(self.second.len())
    }

    pub fn active_level(&self) -> usize {
        self.active_level
    }

    pub fn planes(&self, side: Side) -> &[PlanePartition] {
        match side {
            Side::First => &self.first_planes,
            Side::Second => &self.second_planes,
        }
    }

    /// Plane index lists of `side`, in plane order
    pub fn plane_indices(&self, side: Side) -> Vec<Vec<usize>> {
        self.planes(side).iter().map(|p| p.indices.clone()).collect()
    }

    pub fn has_planes(&self) -> bool {
        !self.first_planes.is_empty() || !self.second_planes.is_empty()
    }

    pub fn transform(&self) -> &Transform3D {
        &self.transform
    }

    pub fn active_pair(&self) -> Option<ActivePair> {
        let level = self.active_level;
        Some(ActivePair {
            level,
            first: self.level(Side::First, level)?.clone(),
            second: self.level(Side::Second, level)?.clone(),
            transform: self.transform,
        })
    }

    pub(crate) fn replace_pyramids(&mut self, first: Vec<PyramidLevel>, second: Vec<PyramidLevel>) {
        self.first = Arc::from(first);
        self.second = Arc::from(second);
        self.clamp_active_level();
    }

    /// Check plane indices against the level-0 sets and store them
    pub(crate) fn set_planes(&mut self, first: Vec<PlanePartition>, second: Vec<PlanePartition>) -> Result<()> {
        check_planes(self.original(Side::First), &first, Side::First)?;
        check_planes(self.original(Side::Second), &second, Side::Second)?;
        self.first_planes = first;
        self.second_planes = second;
        Ok(())
    }

    pub(crate) fn clear_planes(&mut self) {
        self.first_planes.clear();
        self.second_planes.clear();
    }

    /// Select a level, clamped to the levels present on both sides
    pub(crate) fn set_active_level(&mut self, level: usize) -> usize {
        self.active_level = level;
        self.clamp_active_level();
        self.active_level
    }

    fn clamp_active_level(&mut self) {
        self.active_level = self.active_level.min(self.level_count().saturating_sub(1));
    }

    /// Returns whether the stored transform changed
    pub(crate) fn set_transform(&mut self, transform: Transform3D) -> bool {
        if self.transform == transform {
            return false;
        }
        self.transform = transform;
        true
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

fn check_planes(original: Option<&PyramidLevel>, planes: &[PlanePartition], side: Side) -> Result<()> {
    if planes.is_empty() {
        return Ok(());
    }
    let len = original.map_or(0, PyramidLevel::len);
    for (plane, partition) in planes.iter().enumerate() {
        if let Some(&bad) = partition.indices.iter().find(|&&i| i >= len) {
            return Err(Error::InvalidData(format!(
                "{:?} plane {} references primitive {} but level 0 has {}",
                side, plane, bad, len
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splatreg_core::{GaussianPrimitiveSet, Point3f, SplatAttributes, UnitQuaternion, Vector3f};

    fn level(n: usize) -> PyramidLevel {
        let set = GaussianPrimitiveSet::from_scale_rotation(
            0,
            SplatAttributes {
                positions: (0..n).map(|i| Point3f::new(i as f32, 0.0, 0.0)).collect(),
                scales: vec![Vector3f::new(0.1, 0.1, 0.1); n],
                rotations: vec![UnitQuaternion::identity(); n],
                opacities: vec![0.0; n],
                colors: vec![Vector3f::zeros(); n],
                features: Vec::new(),
            },
        )
        .unwrap();
        PyramidLevel::new(set)
    }

    #[test]
    fn test_empty_state() {
        let state = SessionState::new();
        assert!(!state.is_loaded());
        assert_eq!(state.level_count(), 0);
        assert!(state.active_pair().is_none());
    }

    #[test]
    fn test_active_level_clamped_to_shorter_side() {
        let mut state = SessionState::new();
        state.replace_pyramids(vec![level(8), level(4), level(2)], vec![level(8), level(4)]);
        assert_eq!(state.level_count(), 2);
        assert_eq!(state.set_active_level(5), 1);

        state.replace_pyramids(vec![level(8)], vec![level(8)]);
        assert_eq!(state.active_level(), 0);
    }

    #[test]
    fn test_replace_keeps_old_snapshots_alive() {
        let mut state = SessionState::new();
        state.replace_pyramids(vec![level(3)], vec![level(5)]);
        let snapshot = Arc::clone(state.pyramid(Side::First));
        state.replace_pyramids(vec![level(1)], vec![level(1)]);
        assert_eq!(snapshot[0].len(), 3);
        assert_eq!(state.pyramid(Side::First)[0].len(), 1);
    }

    #[test]
    fn test_plane_indices_checked() {
        let mut state = SessionState::new();
        state.replace_pyramids(vec![level(4)], vec![level(2)]);
        let ok = state.set_planes(
            vec![PlanePartition::new(vec![0, 3]).with_coefficients([0.0, 0.0, 1.0, 0.0])],
            vec![PlanePartition::new(vec![1])],
        );
        assert!(ok.is_ok());
        assert_eq!(state.plane_indices(Side::First), vec![vec![0, 3]]);

        let bad = state.set_planes(Vec::new(), vec![PlanePartition::new(vec![2])]);
        assert!(matches!(bad, Err(Error::InvalidData(_))));
        // Rejected input leaves the stored planes alone.
        assert_eq!(state.planes(Side::Second).len(), 1);
    }

    #[test]
    fn test_set_transform_reports_change() {
        let mut state = SessionState::new();
        assert!(!state.set_transform(Transform3D::identity()));
        let shift = Transform3D::translation(Vector3f::new(1.0, 0.0, 0.0));
        assert!(state.set_transform(shift));
        assert!(!state.set_transform(shift));
    }
}
