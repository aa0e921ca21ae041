use glam::{Mat4, Vec3};

const DEFAULT_UP: Vec3 = Vec3::Y;

/// Perspective camera looking at a target point.
///
/// The projection matrix is cached; callers that change `fov_y_radians`, `aspect`, `near` or
/// `far` must call [`Camera3D::update_projection_matrix`] before the next draw.
#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    projection: Mat4,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera =
            Self { position, target, up: DEFAULT_UP, fov_y_radians, aspect, near, far, projection: Mat4::IDENTITY };
        camera.update_projection_matrix();
        camera
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn update_projection_matrix(&mut self) {
        self.projection = Mat4::perspective_rh(self.fov_y_radians, self.aspect.max(0.0001), self.near, self.far);
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view_matrix()
    }

    /// Camera-space X axis expressed in world space.
    pub fn right(&self) -> Vec3 {
        self.view_matrix().inverse().x_axis.truncate()
    }
}
