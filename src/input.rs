// Keyboard and mouse state, applied to the camera rig once per frame

use glam::{Vec2, Vec3};
use std::collections::HashSet;
use std::f32::consts::FRAC_PI_4;
use winit::keyboard::KeyCode;

use crate::camera::{ActiveCamera, CameraRig};
use crate::config::CameraConfig;

const TARGET_KEYS: [KeyCode; 4] = [
    KeyCode::Digit1,
    KeyCode::Digit2,
    KeyCode::Digit3,
    KeyCode::Digit4,
];

#[derive(Debug, Default)]
pub struct InputState {
    held: HashSet<KeyCode>,
    /// Raw mouse motion since the last frame, in pixels
    mouse_delta: Vec2,
}

impl InputState {
    pub fn key(&mut self, code: KeyCode, pressed: bool) {
        if pressed {
            self.held.insert(code);
        } else {
            self.held.remove(&code);
        }
    }

    pub fn is_held(&self, code: KeyCode) -> bool {
        self.held.contains(&code)
    }

    pub fn mouse_moved(&mut self, dx: f64, dy: f64) {
        self.mouse_delta += Vec2::new(dx as f32, dy as f32);
    }

    /// Forget held keys, e.g. when focus is lost and releases go elsewhere
    pub fn clear(&mut self) {
        self.held.clear();
        self.mouse_delta = Vec2::ZERO;
    }

    /// Camera-space movement direction from WASD (x right, z forward)
    fn movement(&self) -> Vec3 {
        let mut direction = Vec3::ZERO;
        if self.is_held(KeyCode::KeyW) {
            direction.z += 1.0;
        }
        if self.is_held(KeyCode::KeyS) {
            direction.z -= 1.0;
        }
        if self.is_held(KeyCode::KeyD) {
            direction.x += 1.0;
        }
        if self.is_held(KeyCode::KeyA) {
            direction.x -= 1.0;
        }
        direction
    }

    /// Drive the rig for one frame.
    ///
    /// A mouse movement the width of the window turns the free camera by
    /// pi/4. Vertical motion is inverted.
    pub fn apply(&mut self, rig: &mut CameraRig, settings: &CameraConfig, window_width: u32, dt: f32) {
        if self.is_held(KeyCode::KeyF) {
            rig.use_free();
        }
        if let Some(slot) = TARGET_KEYS.iter().position(|&key| self.is_held(key)) {
            rig.use_target(slot);
        }

        let delta = std::mem::take(&mut self.mouse_delta);
        if rig.active == ActiveCamera::Free {
            let ratio = FRAC_PI_4 / window_width.max(1) as f32 * settings.mouse_sensitivity;
            rig.free.rotate(delta.x * ratio, -delta.y * ratio);
            rig.free.translate(self.movement() * settings.move_speed * dt);
        }
        rig.free.update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::FREE_START;

    fn settings() -> CameraConfig {
        CameraConfig {
            move_speed: 4.0,
            mouse_sensitivity: 1.0,
        }
    }

    #[test]
    fn holding_w_moves_forward_by_speed_times_dt() {
        let mut rig = CameraRig::new(1.0);
        let mut input = InputState::default();
        input.key(KeyCode::KeyW, true);

        input.apply(&mut rig, &settings(), 800, 0.5);

        let moved = rig.free.camera.position - FREE_START;
        assert!(moved.abs_diff_eq(Vec3::new(0.0, 0.0, -2.0), 1e-5));
    }

    #[test]
    fn released_keys_stop_moving() {
        let mut rig = CameraRig::new(1.0);
        let mut input = InputState::default();
        input.key(KeyCode::KeyD, true);
        input.key(KeyCode::KeyD, false);

        input.apply(&mut rig, &settings(), 800, 1.0);
        assert_eq!(rig.free.camera.position, FREE_START);
    }

    #[test]
    fn number_key_switches_to_target_camera_and_freezes_free_camera() {
        let mut rig = CameraRig::new(1.0);
        let mut input = InputState::default();
        input.key(KeyCode::Digit4, true);
        input.key(KeyCode::KeyW, true);

        input.apply(&mut rig, &settings(), 800, 1.0);

        assert_eq!(rig.active, ActiveCamera::Target);
        assert_eq!(rig.active_camera().position, Vec3::new(10.0, 10.0, -10.0));
        assert_eq!(rig.free.camera.position, FREE_START);
    }

    #[test]
    fn f_returns_to_free_camera() {
        let mut rig = CameraRig::new(1.0);
        rig.use_target(0);
        let mut input = InputState::default();
        input.key(KeyCode::KeyF, true);

        input.apply(&mut rig, &settings(), 800, 0.0);
        assert_eq!(rig.active, ActiveCamera::Free);
    }

    #[test]
    fn mouse_delta_is_consumed_each_frame() {
        let mut rig = CameraRig::new(1.0);
        let mut input = InputState::default();
        input.mouse_moved(400.0, 0.0);

        input.apply(&mut rig, &settings(), 800, 0.0);
        let after_first = rig.free.forward();
        input.apply(&mut rig, &settings(), 800, 0.0);

        // Half the window width turns pi/8 to the right
        let expected = Vec3::new((std::f32::consts::PI / 8.0).sin(), 0.0, -(std::f32::consts::PI / 8.0).cos());
        assert!(after_first.abs_diff_eq(expected, 1e-5));
        assert!(rig.free.forward().abs_diff_eq(after_first, 1e-6));
    }

    #[test]
    fn moving_the_mouse_up_looks_up() {
        let mut rig = CameraRig::new(1.0);
        let mut input = InputState::default();
        input.mouse_moved(0.0, -100.0);

        input.apply(&mut rig, &settings(), 800, 0.0);
        assert!(rig.free.forward().y > 0.0);
    }
}
