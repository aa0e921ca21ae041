//! Orbit/pan/zoom camera controls with damping.
//!
//! Gestures only accumulate deltas; [`OrbitControls::update`] integrates them into the camera
//! once per frame. With damping enabled each update applies `damping_factor` of the pending
//! rotation and pan and decays the remainder, so motion eases out over several frames.

use std::f32::consts::{PI, TAU};

use glam::{Vec2, Vec3};
use serde::Deserialize;

use crate::camera3d::Camera3D;
use crate::config::ControlsConfig;
use crate::input::{PointerButton, PointerEvent, TouchPhase};
use crate::responsive::ViewportSize;

const POLAR_EPSILON: f32 = 1e-6;
const MOTION_EPSILON: f32 = 1e-6;
const WHEEL_ZOOM_BASE: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseAction {
    Rotate,
    Dolly,
    Pan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchAction {
    Rotate,
    Pan,
    DollyPan,
    DollyRotate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MouseBindings {
    pub left: MouseAction,
    pub middle: MouseAction,
    pub right: MouseAction,
}

impl Default for MouseBindings {
    fn default() -> Self {
        Self { left: MouseAction::Rotate, middle: MouseAction::Dolly, right: MouseAction::Pan }
    }
}

impl MouseBindings {
    pub fn action_for(&self, button: PointerButton) -> MouseAction {
        match button {
            PointerButton::Left => self.left,
            PointerButton::Middle => self.middle,
            PointerButton::Right => self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TouchBindings {
    pub one: TouchAction,
    pub two: TouchAction,
}

impl Default for TouchBindings {
    fn default() -> Self {
        Self { one: TouchAction::Rotate, two: TouchAction::DollyPan }
    }
}

/// Spherical coordinates around the Y axis: `theta` is the azimuth measured from +Z,
/// `phi` the polar angle measured from +Y.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spherical {
    pub radius: f32,
    pub theta: f32,
    pub phi: f32,
}

impl Spherical {
    pub fn from_offset(offset: Vec3) -> Self {
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return Self { radius: 0.0, theta: 0.0, phi: 0.0 };
        }
        let theta = offset.x.atan2(offset.z);
        let phi = (offset.y / radius).clamp(-1.0, 1.0).acos();
        Self { radius, theta, phi }
    }

    pub fn to_offset(self) -> Vec3 {
        let sin_phi_radius = self.phi.sin() * self.radius;
        Vec3::new(sin_phi_radius * self.theta.sin(), self.phi.cos() * self.radius, sin_phi_radius * self.theta.cos())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Idle,
    Mouse { button: PointerButton, action: MouseAction, last: Vec2 },
    Touch(TouchAction),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TouchAnchor {
    distance: f32,
    midpoint: Vec2,
}

pub struct OrbitControls {
    settings: ControlsConfig,
    target: Vec3,
    spherical_delta: Spherical,
    scale: f32,
    pan_offset: Vec3,
    gesture: Gesture,
    touches: Vec<(u64, Vec2)>,
    touch_anchor: Option<TouchAnchor>,
    disposed: bool,
    updates: u64,
}

impl OrbitControls {
    /// Creates controls orbiting `settings.target` and aims `camera` at it.
    pub fn attach(camera: &mut Camera3D, settings: &ControlsConfig) -> Self {
        let target = Vec3::from_array(settings.target);
        camera.look_at(target);
        Self {
            settings: settings.clone(),
            target,
            spherical_delta: Spherical::default(),
            scale: 1.0,
            pan_offset: Vec3::ZERO,
            gesture: Gesture::Idle,
            touches: Vec::new(),
            touch_anchor: None,
            disposed: false,
            updates: 0,
        }
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn settings(&self) -> &ControlsConfig {
        &self.settings
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Number of times [`OrbitControls::update`] has run.
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// True while rotation or pan is still being integrated.
    pub fn is_settling(&self) -> bool {
        self.spherical_delta.theta.abs() > MOTION_EPSILON
            || self.spherical_delta.phi.abs() > MOTION_EPSILON
            || self.pan_offset.length_squared() > MOTION_EPSILON * MOTION_EPSILON
            || (self.scale - 1.0).abs() > MOTION_EPSILON
    }

    /// Releases gesture state. Further input is ignored.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.gesture = Gesture::Idle;
        self.touches.clear();
        self.touch_anchor = None;
        self.spherical_delta = Spherical::default();
        self.pan_offset = Vec3::ZERO;
        self.scale = 1.0;
    }

    /// Integrates pending gesture motion into `camera`. Returns whether the camera moved.
    pub fn update(&mut self, camera: &mut Camera3D) -> bool {
        self.updates += 1;
        if self.disposed {
            return false;
        }
        let before = camera.position;
        let mut spherical = Spherical::from_offset(camera.position - self.target);

        let factor = if self.settings.enable_damping { self.settings.damping_factor } else { 1.0 };
        spherical.theta += self.spherical_delta.theta * factor;
        spherical.phi += self.spherical_delta.phi * factor;
        spherical.theta = wrap_angle(spherical.theta);
        spherical.phi = spherical.phi.clamp(POLAR_EPSILON, PI - POLAR_EPSILON);
        spherical.radius = (spherical.radius * self.scale)
            .clamp(self.settings.min_distance, self.settings.max_distance.max(self.settings.min_distance));

        self.target += self.pan_offset * factor;
        camera.position = self.target + spherical.to_offset();
        camera.look_at(self.target);

        if self.settings.enable_damping {
            let decay = 1.0 - self.settings.damping_factor;
            self.spherical_delta.theta *= decay;
            self.spherical_delta.phi *= decay;
            self.pan_offset *= decay;
        } else {
            self.spherical_delta = Spherical::default();
            self.pan_offset = Vec3::ZERO;
        }
        self.scale = 1.0;

        camera.position.distance_squared(before) > MOTION_EPSILON * MOTION_EPSILON
    }

    pub fn handle_pointer(&mut self, event: &PointerEvent, camera: &Camera3D, viewport: ViewportSize) {
        if self.disposed {
            return;
        }
        match *event {
            PointerEvent::ButtonDown { button, position } => {
                let action = self.settings.mouse_buttons.action_for(button);
                self.gesture = if self.action_enabled(action) {
                    Gesture::Mouse { button, action, last: position }
                } else {
                    Gesture::Idle
                };
            }
            PointerEvent::ButtonUp { button, .. } => {
                if matches!(self.gesture, Gesture::Mouse { button: active, .. } if active == button) {
                    self.gesture = Gesture::Idle;
                }
            }
            PointerEvent::Moved { position } => {
                if let Gesture::Mouse { button, action, last } = self.gesture {
                    let delta = position - last;
                    self.apply_mouse_drag(action, delta, camera, viewport);
                    self.gesture = Gesture::Mouse { button, action, last: position };
                }
            }
            PointerEvent::Wheel { delta_y } => {
                if !self.settings.enable_zoom {
                    return;
                }
                if delta_y < 0.0 {
                    self.dolly_in(self.zoom_scale());
                } else if delta_y > 0.0 {
                    self.dolly_out(self.zoom_scale());
                }
            }
            PointerEvent::Touch { id, phase, position } => self.handle_touch(id, phase, position, camera, viewport),
        }
    }

    fn action_enabled(&self, action: MouseAction) -> bool {
        match action {
            MouseAction::Rotate => self.settings.enable_rotate,
            MouseAction::Dolly => self.settings.enable_zoom,
            MouseAction::Pan => self.settings.enable_pan,
        }
    }

    fn apply_mouse_drag(&mut self, action: MouseAction, delta: Vec2, camera: &Camera3D, viewport: ViewportSize) {
        match action {
            MouseAction::Rotate => self.rotate_by_pixels(delta, viewport),
            MouseAction::Dolly => {
                if delta.y > 0.0 {
                    self.dolly_out(self.zoom_scale());
                } else if delta.y < 0.0 {
                    self.dolly_in(self.zoom_scale());
                }
            }
            MouseAction::Pan => self.pan_by_pixels(delta * self.settings.pan_speed, camera, viewport),
        }
    }

    fn handle_touch(
        &mut self,
        id: u64,
        phase: TouchPhase,
        position: Vec2,
        camera: &Camera3D,
        viewport: ViewportSize,
    ) {
        match phase {
            TouchPhase::Started => {
                self.touches.retain(|(existing, _)| *existing != id);
                self.touches.push((id, position));
                self.begin_touch_gesture();
            }
            TouchPhase::Moved => {
                let Some(index) = self.touches.iter().position(|(existing, _)| *existing == id) else {
                    return;
                };
                let previous = self.touches[index].1;
                self.touches[index].1 = position;
                match self.gesture {
                    Gesture::Touch(TouchAction::Rotate) if self.touches.len() == 1 => {
                        self.rotate_by_pixels(position - previous, viewport);
                    }
                    Gesture::Touch(TouchAction::Pan) if self.touches.len() == 1 => {
                        self.pan_by_pixels((position - previous) * self.settings.pan_speed, camera, viewport);
                    }
                    Gesture::Touch(action) if self.touches.len() >= 2 => {
                        self.apply_two_finger(action, index, previous, camera, viewport);
                    }
                    _ => {}
                }
            }
            TouchPhase::Ended => {
                self.touches.retain(|(existing, _)| *existing != id);
                self.begin_touch_gesture();
            }
        }
    }

    fn begin_touch_gesture(&mut self) {
        self.touch_anchor = None;
        let action = match self.touches.len() {
            0 => None,
            1 => Some(self.settings.touches.one),
            _ => Some(self.settings.touches.two),
        };
        self.gesture = match action {
            Some(action) if self.touch_action_enabled(action, self.touches.len()) => {
                if self.touches.len() >= 2 {
                    self.touch_anchor = Some(self.two_finger_anchor());
                }
                Gesture::Touch(action)
            }
            _ => Gesture::Idle,
        };
    }

    fn touch_action_enabled(&self, action: TouchAction, fingers: usize) -> bool {
        match action {
            TouchAction::Rotate => self.settings.enable_rotate,
            TouchAction::Pan => self.settings.enable_pan,
            TouchAction::DollyPan => fingers >= 2 && (self.settings.enable_zoom || self.settings.enable_pan),
            TouchAction::DollyRotate => fingers >= 2 && (self.settings.enable_zoom || self.settings.enable_rotate),
        }
    }

    fn two_finger_anchor(&self) -> TouchAnchor {
        let a = self.touches[0].1;
        let b = self.touches[1].1;
        TouchAnchor { distance: a.distance(b), midpoint: (a + b) * 0.5 }
    }

    fn apply_two_finger(
        &mut self,
        action: TouchAction,
        moved_index: usize,
        previous: Vec2,
        camera: &Camera3D,
        viewport: ViewportSize,
    ) {
        let Some(anchor) = self.touch_anchor else {
            return;
        };
        let current = self.two_finger_anchor();
        if self.settings.enable_zoom && anchor.distance > f32::EPSILON && current.distance > f32::EPSILON {
            let ratio = (current.distance / anchor.distance).powf(self.settings.zoom_speed);
            self.dolly_out(ratio);
        }
        match action {
            TouchAction::DollyPan if self.settings.enable_pan => {
                let delta = (current.midpoint - anchor.midpoint) * self.settings.pan_speed;
                self.pan_by_pixels(delta, camera, viewport);
            }
            TouchAction::DollyRotate if self.settings.enable_rotate => {
                if moved_index < 2 {
                    self.rotate_by_pixels(self.touches[moved_index].1 - previous, viewport);
                }
            }
            _ => {}
        }
        self.touch_anchor = Some(current);
    }

    fn zoom_scale(&self) -> f32 {
        WHEEL_ZOOM_BASE.powf(self.settings.zoom_speed)
    }

    /// Moves the camera towards the target.
    fn dolly_in(&mut self, dolly_scale: f32) {
        self.scale *= dolly_scale;
    }

    /// Moves the camera away from the target.
    fn dolly_out(&mut self, dolly_scale: f32) {
        if dolly_scale > f32::EPSILON {
            self.scale /= dolly_scale;
        }
    }

    fn rotate_by_pixels(&mut self, delta: Vec2, viewport: ViewportSize) {
        if !self.settings.enable_rotate {
            return;
        }
        let height = viewport.physical.height.max(1) as f32;
        self.spherical_delta.theta -= TAU * delta.x / height * self.settings.rotate_speed;
        self.spherical_delta.phi -= TAU * delta.y / height * self.settings.rotate_speed;
    }

    fn pan_by_pixels(&mut self, delta: Vec2, camera: &Camera3D, viewport: ViewportSize) {
        if !self.settings.enable_pan {
            return;
        }
        let height = viewport.physical.height.max(1) as f32;
        let target_distance = (camera.position - self.target).length() * (camera.fov_y_radians * 0.5).tan();
        let right = camera.right();
        let up = if self.settings.screen_space_panning {
            camera.view_matrix().inverse().y_axis.truncate()
        } else {
            camera.up.cross(right)
        };
        self.pan_offset -= right * (2.0 * delta.x * target_distance / height);
        self.pan_offset += up * (2.0 * delta.y * target_distance / height);
    }
}

fn wrap_angle(mut radians: f32) -> f32 {
    while radians > PI {
        radians -= TAU;
    }
    while radians < -PI {
        radians += TAU;
    }
    radians
}
