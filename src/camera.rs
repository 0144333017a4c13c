// Cameras - a free-flying camera and a fixed-target camera
//
// Both share position/target/up and a cached projection. The rig holds one
// of each and knows which is active.

use glam::{Mat4, Vec3};
use std::f32::consts::FRAC_PI_4;

pub const FIELD_OF_VIEW: f32 = FRAC_PI_4;
pub const NEAR_PLANE: f32 = 0.414;
pub const FREE_FAR_PLANE: f32 = 1000.0;
pub const TARGET_FAR_PLANE: f32 = 40000.0;

pub const FREE_START: Vec3 = Vec3::new(-15.0, 5.0, 0.0);

/// Positions the target camera jumps to on keys 1-4
pub const TARGET_POSITIONS: [Vec3; 4] = [
    Vec3::new(10.0, 10.0, 10.0),
    Vec3::new(-10.0, 10.0, 10.0),
    Vec3::new(-10.0, 10.0, -10.0),
    Vec3::new(10.0, 10.0, -10.0),
];

// Keeps look_at away from the up axis
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    projection: Mat4,
    far: f32,
}

impl Camera {
    fn new(position: Vec3, far: f32, aspect: f32) -> Self {
        let mut camera = Self {
            position,
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Mat4::IDENTITY,
            far,
        };
        camera.set_aspect(aspect);
        camera
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.projection = Mat4::perspective_rh(FIELD_OF_VIEW, aspect, NEAR_PLANE, self.far);
    }
}

/// Yaw/pitch camera that accumulates movement relative to where it faces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeCamera {
    pub camera: Camera,
    yaw: f32,
    pitch: f32,
    translation: Vec3,
}

impl FreeCamera {
    pub fn new(position: Vec3, aspect: f32) -> Self {
        let mut free = Self {
            camera: Camera::new(position, FREE_FAR_PLANE, aspect),
            yaw: 0.0,
            pitch: 0.0,
            translation: Vec3::ZERO,
        };
        free.update();
        free
    }

    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.pitch.cos() * -self.yaw.sin(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), 0.0, -self.yaw.sin()).normalize()
    }

    /// Positive `delta_yaw` turns right, positive `delta_pitch` looks up
    pub fn rotate(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw -= delta_yaw;
        self.pitch = (self.pitch + delta_pitch).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Queue a move in camera space: x right, y up, z forward
    pub fn translate(&mut self, local: Vec3) {
        self.translation += local.x * self.right() + local.y * self.camera.up + local.z * self.forward();
    }

    /// Apply queued movement and re-aim the camera
    pub fn update(&mut self) {
        let forward = self.forward();
        self.camera.up = self.right().cross(forward).normalize();
        self.camera.position += self.translation;
        self.translation = Vec3::ZERO;
        self.camera.target = self.camera.position + forward;
    }
}

/// Camera that always looks at the origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetCamera {
    pub camera: Camera,
}

impl TargetCamera {
    pub fn new(position: Vec3, aspect: f32) -> Self {
        Self {
            camera: Camera::new(position, TARGET_FAR_PLANE, aspect),
        }
    }

    pub fn place(&mut self, position: Vec3) {
        self.camera.position = position;
        self.camera.target = Vec3::ZERO;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveCamera {
    Free,
    Target,
}

#[derive(Debug, Clone)]
pub struct CameraRig {
    pub free: FreeCamera,
    pub target: TargetCamera,
    pub active: ActiveCamera,
}

impl CameraRig {
    pub fn new(aspect: f32) -> Self {
        Self {
            free: FreeCamera::new(FREE_START, aspect),
            target: TargetCamera::new(TARGET_POSITIONS[0], aspect),
            active: ActiveCamera::Free,
        }
    }

    pub fn use_free(&mut self) {
        self.active = ActiveCamera::Free;
    }

    /// Switch to the target camera at preset `slot` (0-3)
    pub fn use_target(&mut self, slot: usize) {
        if let Some(&position) = TARGET_POSITIONS.get(slot) {
            self.target.place(position);
            self.active = ActiveCamera::Target;
        }
    }

    /// Both projections follow the swapchain extent
    pub fn set_aspect(&mut self, aspect: f32) {
        self.free.camera.set_aspect(aspect);
        self.target.camera.set_aspect(aspect);
    }

    pub fn active_camera(&self) -> &Camera {
        match self.active {
            ActiveCamera::Free => &self.free.camera,
            ActiveCamera::Target => &self.target.camera,
        }
    }
}
