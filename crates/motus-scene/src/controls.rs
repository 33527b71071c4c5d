//! Orbit camera controls with damping
//!
//! Input accumulates into pending deltas; `update` is called once per frame and
//! moves the camera a fraction of the way (the damping factor), so motion
//! eases out after the pointer is released.

use glam::Vec3;
use motus_core::config::ControlsSettings;
use std::f32::consts::PI;

use crate::builder::PerspectiveCamera;

const POLAR_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct OrbitControls {
    settings: ControlsSettings,
    target: Vec3,
    /// Angle from +Y
    polar: f32,
    /// Angle about +Y, measured from +Z
    azimuth: f32,
    distance: f32,
    target_distance: f32,
    pending_azimuth: f32,
    pending_polar: f32,
    enabled: bool,
}

impl OrbitControls {
    /// Controls orbiting `settings.target`, starting from wherever `camera` is
    pub fn new(settings: &ControlsSettings, camera: &PerspectiveCamera) -> Self {
        let target = Vec3::from(settings.target);
        let offset = camera.position - target;
        let radius = offset.length().max(f32::EPSILON);
        let polar = (offset.y / radius).clamp(-1.0, 1.0).acos();
        let azimuth = offset.x.atan2(offset.z);

        let mut controls = Self {
            settings: settings.clone(),
            target,
            polar,
            azimuth,
            distance: radius,
            target_distance: radius,
            pending_azimuth: 0.0,
            pending_polar: 0.0,
            enabled: true,
        };
        controls.clamp();
        controls
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn polar_angle(&self) -> f32 {
        self.polar
    }

    pub fn azimuth(&self) -> f32 {
        self.azimuth
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.pending_azimuth = 0.0;
            self.pending_polar = 0.0;
        }
    }

    /// Pointer drag in pixels
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        if !self.enabled {
            return;
        }
        self.pending_azimuth -= dx * self.settings.rotate_speed;
        self.pending_polar -= dy * self.settings.rotate_speed;
    }

    /// Scroll in lines; positive zooms in
    pub fn zoom(&mut self, lines: f32) {
        if !self.enabled {
            return;
        }
        let factor = (1.0 - lines * self.settings.zoom_speed).max(0.05);
        self.target_distance = (self.target_distance * factor)
            .clamp(self.settings.min_distance, self.settings.max_distance);
    }

    /// Panning moves the target; returns false when panning is disabled
    pub fn pan(&mut self, offset: Vec3) -> bool {
        if !self.enabled || !self.settings.enable_pan {
            return false;
        }
        self.target += offset;
        true
    }

    /// Advance one frame of damping. Returns whether the camera moved.
    pub fn update(&mut self) -> bool {
        let before = (self.azimuth, self.polar, self.distance);

        if self.settings.enable_damping {
            let f = self.settings.damping_factor;
            self.azimuth += self.pending_azimuth * f;
            self.polar += self.pending_polar * f;
            self.pending_azimuth *= 1.0 - f;
            self.pending_polar *= 1.0 - f;
            self.distance += (self.target_distance - self.distance) * f;
        } else {
            self.azimuth += self.pending_azimuth;
            self.polar += self.pending_polar;
            self.pending_azimuth = 0.0;
            self.pending_polar = 0.0;
            self.distance = self.target_distance;
        }
        self.clamp();

        let after = (self.azimuth, self.polar, self.distance);
        before != after
    }

    /// Camera position for the current angles
    pub fn position(&self) -> Vec3 {
        let sin_polar = self.polar.sin();
        self.target
            + Vec3::new(
                self.distance * sin_polar * self.azimuth.sin(),
                self.distance * self.polar.cos(),
                self.distance * sin_polar * self.azimuth.cos(),
            )
    }

    pub fn apply(&self, camera: &mut PerspectiveCamera) {
        camera.position = self.position();
        camera.target = self.target;
    }

    fn clamp(&mut self) {
        let min_polar = self.settings.min_polar_angle.max(POLAR_EPSILON);
        let max_polar = self.settings.max_polar_angle.min(PI - POLAR_EPSILON);
        self.polar = self.polar.clamp(min_polar, max_polar);
        self.distance = self
            .distance
            .clamp(self.settings.min_distance, self.settings.max_distance);
        self.target_distance = self
            .target_distance
            .clamp(self.settings.min_distance, self.settings.max_distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Viewport;
    use motus_core::config::CameraSettings;

    fn setup() -> (OrbitControls, PerspectiveCamera) {
        let camera = PerspectiveCamera::new(&CameraSettings::default(), Viewport::new(800, 600));
        let controls = OrbitControls::new(&ControlsSettings::default(), &camera);
        (controls, camera)
    }

    #[test]
    fn test_initial_pose_preserved() {
        let (controls, camera) = setup();
        assert!((controls.position() - camera.position).length() < 1e-4);
        assert_eq!(controls.target(), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_distance_clamped() {
        let (mut controls, _) = setup();
        for _ in 0..400 {
            controls.zoom(5.0);
            controls.update();
        }
        assert!((controls.distance() - 5.0).abs() < 1e-3);

        for _ in 0..200 {
            controls.zoom(-5.0);
            controls.update();
        }
        assert!(controls.distance() <= 20.0);
        assert!(controls.distance() > 19.0);
    }

    #[test]
    fn test_polar_clamped() {
        let (mut controls, _) = setup();
        controls.rotate(0.0, 100_000.0);
        for _ in 0..200 {
            controls.update();
        }
        assert!(controls.polar_angle() >= PI / 6.0 - 1e-6);

        controls.rotate(0.0, -100_000.0);
        for _ in 0..200 {
            controls.update();
        }
        assert!(controls.polar_angle() <= PI / 2.0 + 1e-6);
        // never below the ground plane through the target
        assert!(controls.position().y >= controls.target().y - 1e-4);
    }

    #[test]
    fn test_pan_disabled_by_default() {
        let (mut controls, _) = setup();
        assert!(!controls.pan(Vec3::X));
        assert_eq!(controls.target(), Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_damping_eases_out() {
        let (mut controls, _) = setup();
        let start = controls.azimuth();
        controls.rotate(-100.0, 0.0);

        assert!(controls.update());
        let first_step = controls.azimuth() - start;
        let total_expected = 100.0 * ControlsSettings::default().rotate_speed;
        assert!(first_step > 0.0 && first_step < total_expected);

        for _ in 0..600 {
            controls.update();
        }
        assert!((controls.azimuth() - start - total_expected).abs() < 1e-3);
        assert!(!controls.update());
    }
}
