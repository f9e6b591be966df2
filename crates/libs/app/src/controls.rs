use glam::Vec3;
use winit::event::{
    DeviceEvent, ElementState, Event, MouseButton, VirtualKeyCode, WindowEvent,
};

const MOVE_SPEED: f32 = 3.0;
const ANGLE_PER_POINT: f32 = 0.001745;

/// Input state accumulated from winit events, consumed once per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Controls {
    pub go_forward: bool,
    pub go_backward: bool,
    pub strafe_right: bool,
    pub strafe_left: bool,
    pub go_up: bool,
    pub go_down: bool,
    pub look_around: bool,
    pub cursor_delta: [f32; 2],
}

impl Controls {
    pub fn reset(self) -> Self {
        Self {
            cursor_delta: [0.0; 2],
            ..self
        }
    }

    pub fn handle_event<T>(self, event: &Event<T>) -> Self {
        let mut new_state = self;

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::KeyboardInput { input, .. } => {
                    let pressed = input.state == ElementState::Pressed;
                    match input.virtual_keycode {
                        Some(VirtualKeyCode::W) => new_state.go_forward = pressed,
                        Some(VirtualKeyCode::S) => new_state.go_backward = pressed,
                        Some(VirtualKeyCode::D) => new_state.strafe_right = pressed,
                        Some(VirtualKeyCode::A) => new_state.strafe_left = pressed,
                        Some(VirtualKeyCode::E) => new_state.go_up = pressed,
                        Some(VirtualKeyCode::Q) => new_state.go_down = pressed,
                        _ => (),
                    }
                }
                WindowEvent::MouseInput { state, button, .. } => {
                    if *button == MouseButton::Right {
                        new_state.look_around = *state == ElementState::Pressed;
                    }
                }
                _ => (),
            },
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta: (x, y) },
                ..
            } => {
                new_state.cursor_delta[0] += *x as f32;
                new_state.cursor_delta[1] += *y as f32;
            }
            _ => (),
        }

        new_state
    }
}

/// Applies the accumulated input to the main camera's transform. Translation
/// moves along the camera's YXZ-forward; rotation stays clamped away from the
/// poles so the view matrix never degenerates.
pub fn drive_camera(
    controls: &Controls,
    translation: &mut Vec3,
    rotation: &mut Vec3,
    dt: f32,
) {
    if controls.look_around {
        rotation.y += controls.cursor_delta[0] * ANGLE_PER_POINT;
        rotation.x += controls.cursor_delta[1] * ANGLE_PER_POINT;
        rotation.x = rotation.x.clamp(-1.5, 1.5);
        rotation.y %= std::f32::consts::TAU;
    }

    let yaw = rotation.y;
    let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
    let right = Vec3::new(forward.z, 0.0, -forward.x);
    let up = Vec3::new(0.0, -1.0, 0.0);

    let mut direction = Vec3::ZERO;
    if controls.go_forward {
        direction += forward;
    }
    if controls.go_backward {
        direction -= forward;
    }
    if controls.strafe_right {
        direction += right;
    }
    if controls.strafe_left {
        direction -= right;
    }
    if controls.go_up {
        direction += up;
    }
    if controls.go_down {
        direction -= up;
    }

    if direction.length_squared() > f32::EPSILON {
        *translation += direction.normalize() * MOVE_SPEED * dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_only_the_cursor_delta() {
        let controls = Controls {
            go_forward: true,
            cursor_delta: [3.0, -2.0],
            ..Default::default()
        };
        let reset = controls.reset();
        assert!(reset.go_forward);
        assert_eq!(reset.cursor_delta, [0.0; 2]);
    }

    #[test]
    fn forward_moves_along_the_view_direction() {
        let controls = Controls {
            go_forward: true,
            ..Default::default()
        };
        let mut translation = Vec3::ZERO;
        let mut rotation = Vec3::ZERO;

        drive_camera(&controls, &mut translation, &mut rotation, 1.0);

        assert!(translation.z > 0.0);
        assert!(translation.x.abs() < f32::EPSILON);
    }

    #[test]
    fn pitch_is_clamped() {
        let controls = Controls {
            look_around: true,
            cursor_delta: [0.0, 1e6],
            ..Default::default()
        };
        let mut translation = Vec3::ZERO;
        let mut rotation = Vec3::ZERO;

        drive_camera(&controls, &mut translation, &mut rotation, 0.016);

        assert!(rotation.x <= 1.5);
    }
}
