use crossbeam_channel::Receiver;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use scanstitch_core::{ParamError, PointCloud};
use scanstitch_registration::{Correspondence, RigidTransform};

use crate::config::{FallbackPolicy, FilterBox, RegistrationConfig, RotationAxis};
use crate::error::{Result, SessionError};
use crate::pipeline::{self, ScanRecord, SessionState};
use crate::stage::ScanStage;
use crate::status::{StatusBus, StatusEvent};

/// Incremental multi-scan registration.
///
/// Scans are added one at a time and chained into the frame of the first
/// one. All methods take `&self`: one scan is processed at a time, and
/// readers see the state from before or after a scan, never in between.
/// Share it across threads with `Arc`.
pub struct RegistrationSession {
    config: RwLock<RegistrationConfig>,
    state: RwLock<SessionState>,
    status: StatusBus,
}

impl RegistrationSession {
    pub fn new(config: RegistrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            state: RwLock::new(SessionState::default()),
            status: StatusBus::default(),
        })
    }

    /// Receive a copy of every status event from now on.
    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn config(&self) -> RegistrationConfig {
        self.config.read().clone()
    }

    /// Replace the whole configuration; used by scans added afterwards.
    pub fn set_config(&self, config: RegistrationConfig) -> Result<()> {
        self.update_config(|c| *c = config)
    }

    /// Apply `f` to a copy of the configuration and keep it if it validates.
    /// On error the previous configuration stays in place.
    pub fn update_config(&self, f: impl FnOnce(&mut RegistrationConfig)) -> Result<()> {
        let mut config = self.config.write();
        let mut candidate = config.clone();
        f(&mut candidate);
        candidate.validate()?;
        *config = candidate;
        Ok(())
    }

    pub fn set_normal_radius(&self, radius: f32) -> Result<()> {
        self.update_config(|c| c.normal_radius = radius)
    }

    pub fn set_voxel_side_length(&self, side: f32) -> Result<()> {
        self.update_config(|c| c.voxel_side_length = side)
    }

    pub fn set_svd_max_distance(&self, distance: f32) -> Result<()> {
        self.update_config(|c| c.svd_max_distance = distance)
    }

    pub fn set_icp_max_correspondence_distance(&self, distance: f32) -> Result<()> {
        self.update_config(|c| c.icp_max_correspondence_distance = distance)
    }

    pub fn set_post_icp_max_correspondence_distance(&self, distance: f32) -> Result<()> {
        self.update_config(|c| c.post_icp_max_correspondence_distance = distance)
    }

    pub fn set_register_in_real_time(&self, enabled: bool) -> Result<()> {
        self.update_config(|c| c.register_in_real_time = enabled)
    }

    pub fn set_use_feature_correspondences(&self, enabled: bool) -> Result<()> {
        self.update_config(|c| c.use_feature_correspondences = enabled)
    }

    /// `None` disables ingestion filtering.
    pub fn set_filter_box(&self, filter_box: Option<FilterBox>) -> Result<()> {
        self.update_config(|c| c.filter_box = filter_box)
    }

    pub fn set_rotation_axis(&self, axis: RotationAxis) -> Result<()> {
        self.update_config(|c| c.rotation_axis = axis)
    }

    pub fn set_fallback_policy(&self, policy: FallbackPolicy) -> Result<()> {
        self.update_config(|c| c.fallback_policy = policy)
    }

    /// Ingest the next scan and return its index.
    ///
    /// `rotation_degrees` is how far the scanned object turned since the
    /// previous scan (`None` means it did not). In real-time mode the scan
    /// is registered and composed before this returns; otherwise it waits
    /// for [`process_and_get_aligned_cloud`](Self::process_and_get_aligned_cloud).
    ///
    /// Registration failures never surface here: the scan is placed by the
    /// fallback policy and a warning is emitted instead.
    pub fn add_next_point_cloud(
        &self,
        cloud: &PointCloud,
        rotation_degrees: Option<f32>,
    ) -> Result<usize> {
        let delta = rotation_degrees.unwrap_or(0.0);
        if !delta.is_finite() {
            return Err(ParamError::Invalid {
                name: "rotation_degrees",
                reason: format!("must be finite, got {}", delta),
            }
            .into());
        }
        let config = self.config();

        let state = self.state.upgradable_read();
        let index = state.scans.len();
        let accumulated = state.accumulated_degrees + delta;
        let scan = pipeline::prepare_scan(index, cloud, accumulated, &config)?;

        let mut events = vec![StatusEvent::info(
            Some(index),
            format!("scan {} ingested ({} points)", index, scan.raw.len()),
        )];
        let placements = if config.register_in_real_time {
            let first = state.first_pending();
            let pending: Vec<&ScanRecord> = state.scans[first..]
                .iter()
                .chain(std::iter::once(&scan))
                .collect();
            pipeline::compose(&state, &pending, &config, &mut events)
        } else {
            Vec::new()
        };

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        state.push_scan(scan);
        state.commit(placements);
        drop(state);

        self.emit_all(events);
        Ok(index)
    }

    /// Add several scans in order. Missing rotations count as zero.
    pub fn add_point_clouds(
        &self,
        clouds: &[PointCloud],
        rotations_degrees: &[f32],
    ) -> Result<Vec<usize>> {
        clouds
            .iter()
            .enumerate()
            .map(|(i, cloud)| {
                let rotation = rotations_degrees.get(i).copied().unwrap_or(0.0);
                self.add_next_point_cloud(cloud, Some(rotation))
            })
            .collect()
    }

    /// Register every scan still waiting and return the refined composite.
    ///
    /// In real-time mode nothing is waiting and this is a plain read.
    pub fn process_and_get_aligned_cloud(&self) -> Result<PointCloud> {
        let config = self.config();
        let state = self.state.upgradable_read();
        if state.scans.is_empty() {
            return Err(SessionError::NoReferenceScan);
        }

        let first = state.first_pending();
        if first == state.scans.len() {
            return Ok(state.composite.clone());
        }

        let mut events = Vec::new();
        let pending: Vec<&ScanRecord> = state.scans[first..].iter().collect();
        let placements = pipeline::compose(&state, &pending, &config, &mut events);

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        state.commit(placements);
        let composite = state.composite.clone();
        drop(state);

        self.emit_all(events);
        Ok(composite)
    }

    /// Composite of every composed scan after full registration.
    pub fn aligned_cloud(&self) -> PointCloud {
        self.state.read().composite.clone()
    }

    /// Composite of every scan placed by rotation compensation alone.
    pub fn roughly_aligned_cloud(&self) -> PointCloud {
        self.state.read().rough_composite.clone()
    }

    pub fn last_downsampled_cloud(&self) -> Option<PointCloud> {
        self.state.read().scans.last().map(|s| s.downsampled.clone())
    }

    pub fn rotation_compensated_clouds(&self) -> Vec<PointCloud> {
        self.state.read().scans.iter().map(|s| s.compensated.clone()).collect()
    }

    /// Per-scan registered clouds, for every composed scan.
    pub fn aligned_clouds(&self) -> Vec<PointCloud> {
        self.state
            .read()
            .scans
            .iter()
            .filter_map(|s| s.placement.as_ref().map(|p| p.aligned.clone()))
            .collect()
    }

    /// Global pose of every composed scan (scan frame → reference frame).
    pub fn transforms(&self) -> Vec<RigidTransform> {
        self.state
            .read()
            .scans
            .iter()
            .filter_map(|s| s.placement.as_ref().map(|p| p.pose))
            .collect()
    }

    /// Pose of scan `index` relative to scan `index - 1`: first this, then
    /// the predecessor's pose gives the global pose.
    pub fn relative_transform(&self, index: usize) -> Option<RigidTransform> {
        let state = self.state.read();
        let pose = state.scans.get(index)?.placement.as_ref()?.pose;
        if index == 0 {
            return Some(pose);
        }
        let previous = state.scans[index - 1].placement.as_ref()?.pose;
        Some(pose.compose(&previous.inverse()))
    }

    /// Consensus correspondences scan `index` was registered with (empty for
    /// the reference scan and for fallbacks).
    pub fn correspondences(&self, index: usize) -> Option<Vec<Correspondence>> {
        let state = self.state.read();
        Some(state.scans.get(index)?.placement.as_ref()?.correspondences.clone())
    }

    /// Whether scan `index` was placed by the fallback policy.
    pub fn used_fallback(&self, index: usize) -> Option<bool> {
        let state = self.state.read();
        Some(state.scans.get(index)?.placement.as_ref()?.failed_at.is_some())
    }

    /// Stage registration of scan `index` failed to reach, for a scan placed
    /// by the fallback policy. `None` for registered, reference and
    /// not-yet-composed scans.
    pub fn failed_stage(&self, index: usize) -> Option<ScanStage> {
        self.state.read().scans.get(index)?.placement.as_ref()?.failed_at
    }

    /// `Empty` for indices not ingested yet.
    pub fn stage(&self, index: usize) -> ScanStage {
        self.state
            .read()
            .scans
            .get(index)
            .map_or(ScanStage::Empty, |s| s.stage)
    }

    pub fn accumulated_rotation_degrees(&self) -> f32 {
        self.state.read().accumulated_degrees
    }

    pub fn len(&self) -> usize {
        self.state.read().scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn emit(&self, event: StatusEvent) {
        self.status.emit(event);
    }

    fn emit_all(&self, events: Vec<StatusEvent>) {
        for event in events {
            self.status.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IcpSection;
    use crate::status::Severity;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Three jittered faces of a box, each of a different size.
    fn corner(seed: u64, n: usize) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pts = Vec::with_capacity(n);
        for k in 0..n {
            let (u, v) = (rng.gen_range(0.0f32..1.0), rng.gen_range(0.0f32..1.0));
            let j = rng.gen_range(-1e-4f32..1e-4);
            pts.push(match k % 3 {
                0 => [u * 0.6 - 0.3, v * 0.4 - 0.2, j],
                1 => [u * 0.6 - 0.3, j, v * 0.3],
                _ => [j, u * 0.4 - 0.2, v * 0.3],
            });
        }
        PointCloud::from_points(&pts)
    }

    fn session(config: RegistrationConfig) -> RegistrationSession {
        RegistrationSession::new(config).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = RegistrationConfig {
            normal_radius: 0.0,
            ..RegistrationConfig::default()
        };
        assert!(matches!(RegistrationSession::new(config), Err(SessionError::Config(_))));
    }

    #[test]
    fn failed_setter_keeps_previous_value() {
        let s = session(RegistrationConfig::default());
        assert!(s.set_voxel_side_length(-0.5).is_err());
        assert_eq!(s.config().voxel_side_length, 0.01);
        s.set_voxel_side_length(0.02).unwrap();
        assert_eq!(s.config().voxel_side_length, 0.02);
    }

    #[test]
    fn empty_session_has_no_reference() {
        let s = session(RegistrationConfig::default());
        assert_eq!(s.process_and_get_aligned_cloud().unwrap_err(), SessionError::NoReferenceScan);
        assert_eq!(s.stage(0), ScanStage::Empty);
        assert!(s.last_downsampled_cloud().is_none());
    }

    #[test]
    fn first_scan_is_the_reference() {
        let s = session(RegistrationConfig::default());
        let cloud = corner(1, 1500);
        assert_eq!(s.add_next_point_cloud(&cloud, None).unwrap(), 0);
        assert_eq!(s.stage(0), ScanStage::Composed);
        assert!(s.transforms()[0].is_identity(1e-6));
        assert_eq!(s.aligned_cloud().len(), cloud.len());
        assert_eq!(s.relative_transform(0), Some(s.transforms()[0]));
    }

    #[test]
    fn initial_rotation_places_the_reference() {
        let s = session(RegistrationConfig {
            initial_rotation_degrees: 30.0,
            ..RegistrationConfig::default()
        });
        s.add_next_point_cloud(&corner(1, 300), None).unwrap();
        assert!((s.transforms()[0].rotation_angle_degrees() - 30.0).abs() < 1e-3);
    }

    #[test]
    fn identical_scans_register_to_identity() {
        let s = session(RegistrationConfig::default());
        let cloud = corner(2, 3000);
        s.add_next_point_cloud(&cloud, None).unwrap();
        s.add_next_point_cloud(&cloud, None).unwrap();

        assert_eq!(s.used_fallback(1), Some(false));
        assert_eq!(s.failed_stage(1), None);
        let pose = s.transforms()[1];
        assert!(pose.translation_norm() < 1e-3, "{:?}", pose);
        assert!(pose.rotation_angle_degrees() < 0.1);
        assert!(!s.correspondences(1).unwrap().is_empty());
    }

    #[test]
    fn rotation_metadata_accumulates() {
        let s = session(RegistrationConfig::default());
        let cloud = corner(3, 300);
        s.add_point_clouds(&[cloud.clone(), cloud.clone(), cloud], &[0.0, 10.0]).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.accumulated_rotation_degrees(), 10.0);
        s.add_next_point_cloud(&corner(3, 300), Some(5.0)).unwrap();
        assert_eq!(s.accumulated_rotation_degrees(), 15.0);
    }

    #[test]
    fn unreachable_scan_falls_back_with_warning() {
        let s = session(RegistrationConfig::default());
        let events = s.subscribe();
        s.add_next_point_cloud(&corner(4, 600), None).unwrap();
        let far = scanstitch_registration::apply_transform(
            &corner(5, 600),
            &RigidTransform::from_translation([5.0, 0.0, 0.0]),
        );
        s.add_next_point_cloud(&far, Some(20.0)).unwrap();

        assert_eq!(s.used_fallback(1), Some(true));
        let expected = RigidTransform::rotation_about_axis([0.0; 3], [0.0, 1.0, 0.0], -20.0);
        assert_eq!(s.transforms()[1], expected);
        assert_eq!(s.failed_stage(1), Some(ScanStage::Correlated));
        assert_eq!(s.stage(1), ScanStage::Composed);
        assert!(events
            .try_iter()
            .any(|e| e.severity == Severity::Warning && e.scan_index == Some(1)));
    }

    #[test]
    fn too_few_correspondences_fail_at_correlation() {
        let s = session(RegistrationConfig {
            svd_max_distance: 1e-4,
            ..RegistrationConfig::default()
        });
        s.add_next_point_cloud(&corner(11, 600), None).unwrap();
        let shifted = scanstitch_registration::apply_transform(
            &corner(11, 600),
            &RigidTransform::from_translation([0.0, 0.05, 0.0]),
        );
        s.add_next_point_cloud(&shifted, None).unwrap();

        assert_eq!(s.used_fallback(1), Some(true));
        assert_eq!(s.failed_stage(1), Some(ScanStage::Correlated));
        assert!(s.correspondences(1).unwrap().is_empty());
    }

    #[test]
    fn rejected_unconverged_icp_fails_at_refinement() {
        let s = session(RegistrationConfig {
            accept_unconverged_refinement: false,
            icp: IcpSection {
                max_iterations: 1,
                transformation_epsilon: 1e-9,
                fitness_epsilon: 1e-9,
            },
            ..RegistrationConfig::default()
        });
        let events = s.subscribe();
        s.add_next_point_cloud(&corner(7, 1500), None).unwrap();
        // Different sampling of the same faces: one ICP step cannot settle.
        let resampled = scanstitch_registration::apply_transform(
            &corner(8, 1500),
            &RigidTransform::from_translation([0.01, 0.0, 0.0]),
        );
        s.add_next_point_cloud(&resampled, None).unwrap();

        assert_eq!(s.used_fallback(1), Some(true));
        assert_eq!(s.failed_stage(1), Some(ScanStage::Refined));
        assert!(s.transforms()[1].is_identity(1e-6));
        assert!(events
            .try_iter()
            .any(|e| e.severity == Severity::Warning && e.message.contains("Refined")));
    }

    #[test]
    fn deferred_mode_waits_for_processing() {
        let s = session(RegistrationConfig {
            register_in_real_time: false,
            ..RegistrationConfig::default()
        });
        let cloud = corner(6, 900);
        s.add_next_point_cloud(&cloud, None).unwrap();
        s.add_next_point_cloud(&cloud, None).unwrap();

        assert_eq!(s.stage(1), ScanStage::FeatureReady);
        assert!(s.aligned_cloud().is_empty());
        assert_eq!(s.roughly_aligned_cloud().len(), 2 * cloud.len());
        assert_eq!(s.rotation_compensated_clouds().len(), 2);

        let aligned = s.process_and_get_aligned_cloud().unwrap();
        assert_eq!(aligned.len(), 2 * cloud.len());
        assert_eq!(s.stage(0), ScanStage::Composed);
        assert_eq!(s.stage(1), ScanStage::Composed);
        assert_eq!(s.transforms().len(), 2);
    }

    #[test]
    fn non_finite_rotation_is_rejected() {
        let s = session(RegistrationConfig::default());
        assert!(s.add_next_point_cloud(&corner(7, 100), Some(f32::NAN)).is_err());
        assert!(s.is_empty());
    }
}
