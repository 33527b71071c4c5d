//! Configuration loading and validation

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::read_state::RetentionPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid colour '{0}', expected #rrggbb")]
    InvalidColor(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub viewer: ViewerSettings,
    #[serde(default)]
    pub messaging: MessagingSettings,
}

impl PortalConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PortalConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.viewer.controls;
        if c.min_distance <= 0.0 || c.min_distance > c.max_distance {
            return Err(ConfigError::Invalid(format!(
                "controls distance range {}..{} is empty",
                c.min_distance, c.max_distance
            )));
        }
        if c.min_polar_angle < 0.0 || c.min_polar_angle > c.max_polar_angle || c.max_polar_angle > PI {
            return Err(ConfigError::Invalid("controls polar range must lie within 0..=PI".into()));
        }
        if !(0.0..1.0).contains(&c.damping_factor) {
            return Err(ConfigError::Invalid("damping_factor must be in 0..1".into()));
        }
        let cam = &self.viewer.camera;
        if cam.near <= 0.0 || cam.near >= cam.far {
            return Err(ConfigError::Invalid("camera near plane must be positive and below far".into()));
        }
        if self.viewer.frame_delta_secs <= 0.0 {
            return Err(ConfigError::Invalid("frame_delta_secs must be positive".into()));
        }
        if self.viewer.progress_step_percent == 0 || self.viewer.progress_step_percent > 100 {
            return Err(ConfigError::Invalid("progress_step_percent must be 1..=100".into()));
        }
        if self.viewer.model.scale <= 0.0 {
            return Err(ConfigError::Invalid("model scale must be positive".into()));
        }
        Ok(())
    }
}

/// Where the backend lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Base URL of the REST API
    #[serde(default = "default_http_url")]
    pub http_url: String,
    /// URL of the realtime WebSocket endpoint
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Storage container the motion file blobs live in
    #[serde(default = "default_motion_container")]
    pub motion_container: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            http_url: default_http_url(),
            ws_url: default_ws_url(),
            motion_container: default_motion_container(),
        }
    }
}

fn default_http_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:5000/ws".to_string()
}

fn default_motion_container() -> String {
    "motion-files".to_string()
}

impl BackendSettings {
    /// Derive both URLs from one origin (`https://host` gives `wss://host/ws`)
    pub fn from_origin(origin: &str) -> Self {
        let http_url = origin.trim_end_matches('/').to_string();
        let ws_url = if let Some(rest) = http_url.strip_prefix("https://") {
            format!("wss://{}/ws", rest)
        } else if let Some(rest) = http_url.strip_prefix("http://") {
            format!("ws://{}/ws", rest)
        } else {
            format!("{}/ws", http_url)
        };
        Self {
            http_url,
            ws_url,
            motion_container: default_motion_container(),
        }
    }
}

/// 24-bit sRGB colour, written as `#rrggbb` in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const WHITE: Rgb = Rgb([0xff, 0xff, 0xff]);
    pub const BLACK: Rgb = Rgb([0x00, 0x00, 0x00]);

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let hex = raw.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ConfigError::InvalidColor(raw.to_string()));
        }
        let mut out = [0u8; 3];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| ConfigError::InvalidColor(raw.to_string()))?;
        }
        Ok(Rgb(out))
    }

    /// Components scaled to 0..=1
    pub fn to_f32(self) -> [f32; 3] {
        self.0.map(|c| c as f32 / 255.0)
    }
}

impl TryFrom<String> for Rgb {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::parse(&value)
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        format!("#{:02x}{:02x}{:02x}", value.0[0], value.0[1], value.0[2])
    }
}

/// Everything the model viewer builds per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSettings {
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub controls: ControlsSettings,
    #[serde(default)]
    pub ground: GroundSettings,
    #[serde(default)]
    pub spotlight: SpotlightSettings,
    #[serde(default)]
    pub model: ModelSettings,
    /// Animation time advanced per rendered frame
    #[serde(default = "default_frame_delta")]
    pub frame_delta_secs: f32,
    /// Load progress is reported each time it crosses a multiple of this
    #[serde(default = "default_progress_step")]
    pub progress_step_percent: u8,
    #[serde(default = "default_clear_color")]
    pub clear_color: Rgb,
    #[serde(default = "default_clear_color")]
    pub high_contrast_clear_color: Rgb,
    #[serde(default = "default_high_contrast_ground")]
    pub high_contrast_ground_color: Rgb,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            controls: ControlsSettings::default(),
            ground: GroundSettings::default(),
            spotlight: SpotlightSettings::default(),
            model: ModelSettings::default(),
            frame_delta_secs: default_frame_delta(),
            progress_step_percent: default_progress_step(),
            clear_color: default_clear_color(),
            high_contrast_clear_color: default_clear_color(),
            high_contrast_ground_color: default_high_contrast_ground(),
        }
    }
}

fn default_frame_delta() -> f32 {
    1.0 / 60.0
}

fn default_progress_step() -> u8 {
    10
}

fn default_clear_color() -> Rgb {
    Rgb::BLACK
}

fn default_high_contrast_ground() -> Rgb {
    Rgb::WHITE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Vertical field of view in degrees
    #[serde(default = "default_fov")]
    pub fov_degrees: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
    #[serde(default = "default_camera_position")]
    pub position: [f32; 3],
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_degrees: default_fov(),
            near: default_near(),
            far: default_far(),
            position: default_camera_position(),
        }
    }
}

fn default_fov() -> f32 {
    45.0
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    1000.0
}

fn default_camera_position() -> [f32; 3] {
    [4.0, 5.0, 11.0]
}

/// Orbit controls limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlsSettings {
    #[serde(default = "default_target")]
    pub target: [f32; 3],
    #[serde(default = "default_min_distance")]
    pub min_distance: f32,
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    /// Radians from the +Y axis
    #[serde(default = "default_min_polar")]
    pub min_polar_angle: f32,
    #[serde(default = "default_max_polar")]
    pub max_polar_angle: f32,
    #[serde(default)]
    pub enable_pan: bool,
    #[serde(default = "default_true")]
    pub enable_damping: bool,
    #[serde(default = "default_damping")]
    pub damping_factor: f32,
    /// Radians per pixel of drag
    #[serde(default = "default_rotate_speed")]
    pub rotate_speed: f32,
    /// Fractional distance change per scroll line
    #[serde(default = "default_zoom_speed")]
    pub zoom_speed: f32,
}

impl Default for ControlsSettings {
    fn default() -> Self {
        Self {
            target: default_target(),
            min_distance: default_min_distance(),
            max_distance: default_max_distance(),
            min_polar_angle: default_min_polar(),
            max_polar_angle: default_max_polar(),
            enable_pan: false,
            enable_damping: true,
            damping_factor: default_damping(),
            rotate_speed: default_rotate_speed(),
            zoom_speed: default_zoom_speed(),
        }
    }
}

fn default_target() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}

fn default_min_distance() -> f32 {
    5.0
}

fn default_max_distance() -> f32 {
    20.0
}

fn default_min_polar() -> f32 {
    PI / 6.0
}

fn default_max_polar() -> f32 {
    PI / 2.0
}

fn default_true() -> bool {
    true
}

fn default_damping() -> f32 {
    0.05
}

fn default_rotate_speed() -> f32 {
    0.005
}

fn default_zoom_speed() -> f32 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundSettings {
    #[serde(default = "default_ground_size")]
    pub size: f32,
    #[serde(default = "default_ground_segments")]
    pub segments: u32,
    #[serde(default = "default_ground_color")]
    pub color: Rgb,
}

impl Default for GroundSettings {
    fn default() -> Self {
        Self {
            size: default_ground_size(),
            segments: default_ground_segments(),
            color: default_ground_color(),
        }
    }
}

fn default_ground_size() -> f32 {
    20.0
}

fn default_ground_segments() -> u32 {
    32
}

fn default_ground_color() -> Rgb {
    Rgb([0xc0, 0xc0, 0xc0])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotlightSettings {
    #[serde(default = "default_light_position")]
    pub position: [f32; 3],
    #[serde(default = "default_light_color")]
    pub color: Rgb,
    #[serde(default = "default_light_intensity")]
    pub intensity: f32,
    /// Distance at which the light falls off to zero
    #[serde(default = "default_light_range")]
    pub range: f32,
    /// Half-angle of the cone in radians
    #[serde(default = "default_light_angle")]
    pub angle: f32,
    /// 0 = hard edge, 1 = fully soft
    #[serde(default = "default_penumbra")]
    pub penumbra: f32,
    #[serde(default = "default_true")]
    pub cast_shadow: bool,
    #[serde(default = "default_shadow_map_size")]
    pub shadow_map_size: u32,
}

impl Default for SpotlightSettings {
    fn default() -> Self {
        Self {
            position: default_light_position(),
            color: default_light_color(),
            intensity: default_light_intensity(),
            range: default_light_range(),
            angle: default_light_angle(),
            penumbra: default_penumbra(),
            cast_shadow: true,
            shadow_map_size: default_shadow_map_size(),
        }
    }
}

fn default_light_position() -> [f32; 3] {
    [0.0, 25.0, 0.0]
}

fn default_light_color() -> Rgb {
    Rgb::WHITE
}

fn default_light_intensity() -> f32 {
    3000.0
}

fn default_light_range() -> f32 {
    100.0
}

fn default_light_angle() -> f32 {
    PI / 8.0
}

fn default_penumbra() -> f32 {
    1.0
}

fn default_shadow_map_size() -> u32 {
    1024
}

/// Correction applied to every mounted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Rotation about +X in degrees (recordings are Z-up)
    #[serde(default = "default_model_rotation")]
    pub rotation_x_degrees: f32,
    #[serde(default = "default_model_scale")]
    pub scale: f32,
    #[serde(default = "default_model_offset")]
    pub offset: [f32; 3],
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            rotation_x_degrees: default_model_rotation(),
            scale: default_model_scale(),
            offset: default_model_offset(),
        }
    }
}

fn default_model_rotation() -> f32 {
    -90.0
}

fn default_model_scale() -> f32 {
    1.0
}

fn default_model_offset() -> [f32; 3] {
    [0.0, 0.0, -1.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagingSettings {
    /// Read markers older than this are forgotten
    #[serde(default = "default_retention_days")]
    pub read_retention_days: u32,
    #[serde(default = "default_max_read_entries")]
    pub max_read_entries: usize,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            read_retention_days: default_retention_days(),
            max_read_entries: default_max_read_entries(),
        }
    }
}

impl MessagingSettings {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention: chrono::Duration::days(i64::from(self.read_retention_days)),
            max_entries: self.max_read_entries,
        }
    }
}

fn default_retention_days() -> u32 {
    90
}

fn default_max_read_entries() -> usize {
    5000
}

/// Load configuration from file, falling back to defaults when it does not exist
pub fn load_config(path: &Path) -> anyhow::Result<PortalConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config = PortalConfig::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(PortalConfig::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(&PortalConfig::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
