use glam::Vec3;
use winit::dpi::{LogicalSize, PhysicalSize};

use crate::camera3d::Camera3D;
use crate::config::CameraConfig;

/// Current dimensions of the viewport surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSize {
    pub physical: PhysicalSize<u32>,
    pub scale_factor: f64,
}

impl ViewportSize {
    pub fn new(physical: PhysicalSize<u32>, scale_factor: f64) -> Self {
        let scale_factor = if scale_factor.is_finite() && scale_factor > 0.0 { scale_factor } else { 1.0 };
        Self { physical, scale_factor }
    }

    pub fn from_logical(width: f64, height: f64, scale_factor: f64) -> Self {
        let size = Self::new(PhysicalSize::new(0, 0), scale_factor);
        let physical = LogicalSize::new(width, height).to_physical(size.scale_factor);
        Self { physical, ..size }
    }

    pub fn logical(&self) -> LogicalSize<f64> {
        self.physical.to_logical(self.scale_factor)
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.physical.height == 0 {
            1.0
        } else {
            self.physical.width as f32 / self.physical.height as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.physical.width == 0 || self.physical.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Compact,
    Desktop,
}

impl DeviceClass {
    pub fn classify(logical_width: f64, breakpoint: f64) -> Self {
        if logical_width < breakpoint {
            DeviceClass::Compact
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceClass::Compact => "compact",
            DeviceClass::Desktop => "desktop",
        }
    }
}

/// Camera state derived from a viewport size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    pub aspect: f32,
    pub device_class: DeviceClass,
    pub camera_position: Vec3,
}

/// Maps viewport dimensions to aspect ratio and a per-device camera distance preset.
///
/// Holds no history: the same viewport always produces the same framing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponsivePolicy {
    breakpoint: f64,
    compact_position: Vec3,
    desktop_position: Vec3,
}

impl ResponsivePolicy {
    pub fn new(breakpoint: f64, compact_position: Vec3, desktop_position: Vec3) -> Self {
        Self { breakpoint, compact_position, desktop_position }
    }

    pub fn from_config(cfg: &CameraConfig) -> Self {
        Self::new(
            cfg.compact_breakpoint,
            Vec3::from_array(cfg.compact_position),
            Vec3::from_array(cfg.desktop_position),
        )
    }

    pub fn breakpoint(&self) -> f64 {
        self.breakpoint
    }

    pub fn framing(&self, viewport: ViewportSize) -> Framing {
        let device_class = DeviceClass::classify(viewport.logical().width, self.breakpoint);
        let camera_position = match device_class {
            DeviceClass::Compact => self.compact_position,
            DeviceClass::Desktop => self.desktop_position,
        };
        Framing { aspect: viewport.aspect_ratio(), device_class, camera_position }
    }

    /// Writes the framing for `viewport` into `camera`, refreshing its projection.
    pub fn apply(&self, viewport: ViewportSize, camera: &mut Camera3D) -> Framing {
        let framing = self.framing(viewport);
        camera.set_aspect(framing.aspect);
        camera.update_projection_matrix();
        camera.position = framing.camera_position;
        framing
    }
}

impl Default for ResponsivePolicy {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}
