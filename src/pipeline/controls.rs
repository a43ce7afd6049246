//! Orbit-style camera controls
//!
//! Input arrives from the host as [`ControlInput`] events and is queued;
//! [`OrbitControls::update`] applies the queue once per frame, so the camera
//! only ever changes at a fixed point in the frame sequence.

use std::collections::VecDeque;
use std::f32::consts::TAU;

use super::camera::Camera3D;

/// Wheel step multiplier; one step moves the camera 5% closer or further
const ZOOM_STEP: f32 = 0.95;

/// One pending user interaction, in screen pixels where applicable
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlInput {
    /// Drag to orbit; a drag the height of the viewport turns a full circle
    Rotate { dx: f32, dy: f32 },
    /// Wheel steps; positive moves closer
    Zoom { steps: f32 },
    /// Drag to slide the target across the screen plane
    Pan { dx: f32, dy: f32 },
    /// Return to the camera state captured at construction
    Reset,
}

/// Queue of pending input plus the saved home view
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pending: VecDeque<ControlInput>,
    home: Camera3D,
    pub enabled: bool,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
}

impl OrbitControls {
    /// Controls for `camera`, remembering its current state as home
    pub fn new(camera: &Camera3D) -> Self {
        Self {
            pending: VecDeque::new(),
            home: camera.clone(),
            enabled: true,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            pan_speed: 1.0,
        }
    }

    /// Queue an input for the next update
    pub fn push(&mut self, input: ControlInput) {
        self.pending.push_back(input);
    }

    /// Number of queued inputs
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply every queued input to `camera` in arrival order and return how
    /// many were applied. `viewport_height` converts pixels to angles.
    /// Disabled controls drop their queue.
    pub fn update(&mut self, camera: &mut Camera3D, viewport_height: f32) -> usize {
        if !self.enabled {
            self.pending.clear();
            return 0;
        }

        let height = viewport_height.max(1.0);
        let mut applied = 0;
        while let Some(input) = self.pending.pop_front() {
            match input {
                ControlInput::Rotate { dx, dy } => {
                    let turn = TAU * self.rotate_speed / height;
                    camera.orbit(-dx * turn, dy * turn);
                }
                ControlInput::Zoom { steps } => {
                    camera.dolly(ZOOM_STEP.powf(steps * self.zoom_speed));
                }
                ControlInput::Pan { dx, dy } => {
                    // Pixels to world units at the target's depth
                    let world_per_pixel =
                        2.0 * camera.distance * (camera.fov / 2.0).tan() / height;
                    let scale = world_per_pixel * self.pan_speed;
                    camera.pan(-dx * scale, dy * scale);
                }
                ControlInput::Reset => {
                    let aspect = camera.aspect;
                    *camera = self.home.clone();
                    camera.set_aspect(aspect);
                }
            }
            applied += 1;
        }
        applied
    }
}
