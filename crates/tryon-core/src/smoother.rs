//! Exponential smoothing of head pose across detection ticks.

use crate::types::{FacePose, FrameSize, PlacementConfig, Rotation, SmoothedPose, REST_DEPTH};
use thiserror::Error;

/// Blend weight applied toward each new target.
pub const DEFAULT_SMOOTHING_FACTOR: f32 = 0.3;

/// Nose x in [-1, 1] maps to this world-space horizontal range.
const HORIZONTAL_GAIN: f32 = 0.5;
/// Eye level in [-1, 1] maps to this world-space vertical range.
const VERTICAL_GAIN: f32 = 0.8;
/// Face-width ratio to model scale.
const SCALE_GAIN: f32 = 2.0;

#[derive(Error, Debug, PartialEq)]
pub enum SmootherError {
    #[error("smoothing factor must be in (0, 1], got {0}")]
    InvalidFactor(f32),
}

/// Where the glasses should be for one detected face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseTarget {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation: Rotation,
    pub face_scale: f32,
}

impl PoseTarget {
    /// Map a detected face into world-space targets.
    ///
    /// Screen y grows downward while world y grows upward, so the vertical
    /// axis is inverted. Manual offsets are added here so that slider changes
    /// glide in with the rest of the motion.
    pub fn from_face(face: &FacePose, frame: FrameSize, config: &PlacementConfig) -> Option<Self> {
        if frame.width == 0 || frame.height == 0 {
            return None;
        }
        let (w, h) = (frame.width as f32, frame.height as f32);
        let offset = config.clamped().position;

        let nose_x = (face.nose_tip.x / w) * 2.0 - 1.0;
        let eye_y = (face.eye_level / h) * 2.0 - 1.0;

        Some(Self {
            x: nose_x * HORIZONTAL_GAIN + offset.x,
            y: -eye_y * VERTICAL_GAIN + offset.y,
            z: REST_DEPTH + offset.z,
            rotation: face.rotation,
            face_scale: (face.bounding_box.width / w) * SCALE_GAIN,
        })
    }
}

/// Running pose estimate for one try-on session.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    factor: f32,
    state: SmoothedPose,
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self {
            factor: DEFAULT_SMOOTHING_FACTOR,
            state: SmoothedPose::REST,
        }
    }
}

impl TemporalSmoother {
    pub fn new(factor: f32) -> Result<Self, SmootherError> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(SmootherError::InvalidFactor(factor));
        }
        Ok(Self {
            factor,
            state: SmoothedPose::REST,
        })
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn current(&self) -> SmoothedPose {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = SmoothedPose::REST;
    }

    /// Blend toward `target`, or hold the previous estimate when no face was
    /// found this tick.
    ///
    /// Position and rotation are smoothed; `face_scale` is taken from the
    /// target as-is.
    pub fn update(&mut self, target: Option<&PoseTarget>) -> SmoothedPose {
        let Some(t) = target else {
            return self.state;
        };
        let blend = |prev: f32, next: f32| prev + (next - prev) * self.factor;
        let prev = self.state;

        self.state = SmoothedPose {
            x: blend(prev.x, t.x),
            y: blend(prev.y, t.y),
            z: blend(prev.z, t.z),
            rotation: Rotation {
                pitch: blend(prev.rotation.pitch, t.rotation.pitch),
                yaw: blend(prev.rotation.yaw, t.rotation.yaw),
                roll: blend(prev.rotation.roll, t.rotation.roll),
            },
            face_scale: t.face_scale,
        };
        self.state
    }
}
