use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::orbit_controls::{MouseBindings, TouchBindings};

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_fov_degrees")]
    pub fov_degrees: f32,
    #[serde(default = "CameraConfig::default_near")]
    pub near: f32,
    #[serde(default = "CameraConfig::default_far")]
    pub far: f32,
    /// Logical width below which the viewport counts as a compact device.
    #[serde(default = "CameraConfig::default_compact_breakpoint")]
    pub compact_breakpoint: f64,
    #[serde(default = "CameraConfig::default_desktop_position")]
    pub desktop_position: [f32; 3],
    #[serde(default = "CameraConfig::default_compact_position")]
    pub compact_position: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlsConfig {
    #[serde(default = "ControlsConfig::default_true")]
    pub enable_damping: bool,
    #[serde(default = "ControlsConfig::default_damping_factor")]
    pub damping_factor: f32,
    #[serde(default)]
    pub screen_space_panning: bool,
    #[serde(default = "ControlsConfig::default_min_distance")]
    pub min_distance: f32,
    #[serde(default = "ControlsConfig::default_max_distance")]
    pub max_distance: f32,
    #[serde(default)]
    pub target: [f32; 3],
    #[serde(default = "ControlsConfig::default_true")]
    pub enable_rotate: bool,
    #[serde(default = "ControlsConfig::default_true")]
    pub enable_zoom: bool,
    #[serde(default = "ControlsConfig::default_true")]
    pub enable_pan: bool,
    #[serde(default = "ControlsConfig::default_rotate_speed")]
    pub rotate_speed: f32,
    #[serde(default = "ControlsConfig::default_zoom_speed")]
    pub zoom_speed: f32,
    #[serde(default = "ControlsConfig::default_pan_speed")]
    pub pan_speed: f32,
    #[serde(default)]
    pub mouse_buttons: MouseBindings,
    #[serde(default)]
    pub touches: TouchBindings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "FallbackConfig::default_size")]
    pub size: f32,
    #[serde(default = "FallbackConfig::default_color")]
    pub color: u32,
    #[serde(default = "FallbackConfig::default_shininess")]
    pub shininess: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "ModelConfig::default_path")]
    pub path: PathBuf,
    #[serde(default = "ModelConfig::default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LightConfig {
    Ambient { color: u32, intensity: f32 },
    Directional { color: u32, intensity: f32, position: [f32; 3] },
    Point { color: u32, intensity: f32, position: [f32; 3], range: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GradientStopConfig {
    pub offset: f32,
    pub color: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default = "BackgroundConfig::default_height")]
    pub height: u32,
    #[serde(default = "BackgroundConfig::default_stops")]
    pub stops: Vec<GradientStopConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub window: WindowConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "AppConfig::default_lights")]
    pub lights: Vec<LightConfig>,
    #[serde(default)]
    pub background: BackgroundConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub model: Option<PathBuf>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { title: "Sample 3D Object".to_string(), width: 1280, height: 720, vsync: true, fullscreen: false }
    }
}

impl CameraConfig {
    const fn default_fov_degrees() -> f32 {
        75.0
    }

    const fn default_near() -> f32 {
        0.1
    }

    const fn default_far() -> f32 {
        1000.0
    }

    const fn default_compact_breakpoint() -> f64 {
        768.0
    }

    const fn default_desktop_position() -> [f32; 3] {
        [0.0, 1.0, 5.0]
    }

    const fn default_compact_position() -> [f32; 3] {
        [0.0, 1.0, 7.0]
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: Self::default_fov_degrees(),
            near: Self::default_near(),
            far: Self::default_far(),
            compact_breakpoint: Self::default_compact_breakpoint(),
            desktop_position: Self::default_desktop_position(),
            compact_position: Self::default_compact_position(),
        }
    }
}

impl ControlsConfig {
    const fn default_true() -> bool {
        true
    }

    const fn default_damping_factor() -> f32 {
        0.05
    }

    const fn default_min_distance() -> f32 {
        3.0
    }

    const fn default_max_distance() -> f32 {
        100.0
    }

    const fn default_rotate_speed() -> f32 {
        1.0
    }

    const fn default_zoom_speed() -> f32 {
        1.2
    }

    const fn default_pan_speed() -> f32 {
        0.8
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            enable_damping: true,
            damping_factor: Self::default_damping_factor(),
            screen_space_panning: false,
            min_distance: Self::default_min_distance(),
            max_distance: Self::default_max_distance(),
            target: [0.0; 3],
            enable_rotate: true,
            enable_zoom: true,
            enable_pan: true,
            rotate_speed: Self::default_rotate_speed(),
            zoom_speed: Self::default_zoom_speed(),
            pan_speed: Self::default_pan_speed(),
            mouse_buttons: MouseBindings::default(),
            touches: TouchBindings::default(),
        }
    }
}

impl FallbackConfig {
    const fn default_size() -> f32 {
        2.0
    }

    const fn default_color() -> u32 {
        0xff6b35
    }

    const fn default_shininess() -> f32 {
        50.0
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { size: Self::default_size(), color: Self::default_color(), shininess: Self::default_shininess() }
    }
}

impl ModelConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("assets/models/helmet.glb")
    }

    const fn default_scale() -> f32 {
        2.0
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { path: Self::default_path(), scale: Self::default_scale(), fallback: FallbackConfig::default() }
    }
}

impl BackgroundConfig {
    const fn default_height() -> u32 {
        512
    }

    fn default_stops() -> Vec<GradientStopConfig> {
        vec![
            GradientStopConfig { offset: 0.0, color: 0xffffff },
            GradientStopConfig { offset: 0.3, color: 0xe6f3ff },
            GradientStopConfig { offset: 0.7, color: 0xb3d9ff },
            GradientStopConfig { offset: 1.0, color: 0x87ceeb },
        ]
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { height: Self::default_height(), stops: Self::default_stops() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            camera: CameraConfig::default(),
            controls: ControlsConfig::default(),
            model: ModelConfig::default(),
            lights: Self::default_lights(),
            background: BackgroundConfig::default(),
        }
    }
}

impl AppConfig {
    fn default_lights() -> Vec<LightConfig> {
        vec![
            LightConfig::Ambient { color: 0xffffff, intensity: 4.0 },
            LightConfig::Directional { color: 0xffffff, intensity: 4.0, position: [5.0, 5.0, 5.0] },
            LightConfig::Directional { color: 0xffffff, intensity: 2.5, position: [-5.0, 3.0, -2.0] },
            LightConfig::Point { color: 0xffffff, intensity: 2.0, position: [0.0, 10.0, 0.0], range: 50.0 },
            LightConfig::Directional { color: 0xffffff, intensity: 1.8, position: [10.0, 0.0, 0.0] },
            LightConfig::Directional { color: 0xffffff, intensity: 1.8, position: [-10.0, 0.0, 0.0] },
        ]
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
        if let Some(model) = overrides.model.as_ref() {
            self.model.path = model.clone();
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.vsync.is_none() && self.model.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.vsync.is_some() {
            fields.push("vsync");
        }
        if self.model.is_some() {
            fields.push("model");
        }
        fields
    }
}

/// Converts a packed `0xRRGGBB` colour into linear-ish float channels.
pub fn rgb_from_hex(color: u32) -> [f32; 3] {
    let r = ((color >> 16) & 0xff) as f32 / 255.0;
    let g = ((color >> 8) & 0xff) as f32 / 255.0;
    let b = (color & 0xff) as f32 / 255.0;
    [r, g, b]
}
