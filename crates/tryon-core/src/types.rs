use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Depth of the glasses in front of the camera when no offset is applied.
pub const REST_DEPTH: f32 = -0.5;

/// Manual scale limits exposed to the UI sliders.
pub const SCALE_RANGE: (f32, f32) = (0.5, 1.5);
/// Manual position offset limits (per axis).
pub const OFFSET_RANGE: (f32, f32) = (-0.5, 0.5);

/// A grayscale camera frame shared read-only between the render loop and
/// the pose estimator.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl CameraFrame {
    pub fn new(data: impl Into<Arc<[u8]>>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            sequence,
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize {
            width: self.width,
            height: self.height,
        }
    }

    /// Camera not ready yet: metadata has not reported dimensions.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixel dimensions of the camera feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

/// A 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Centroid of a point set, `None` when the set is empty.
    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// Face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Head rotation in normalised units (roll is the eye-line angle in radians).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Rotation {
    pub const ZERO: Rotation = Rotation {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    pub fn to_quat(self) -> Quat {
        Quat::from_euler(EulerRot::XYZ, self.pitch, self.yaw, self.roll)
    }
}

/// Detection result for one frame. Absence of a face is `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacePose {
    pub bounding_box: FaceBox,
    /// Pixel y of the midpoint between both eye centres.
    pub eye_level: f32,
    pub nose_tip: Point,
    pub rotation: Rotation,
}

/// The smoother's running estimate, persisted across frames of one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rotation: Rotation,
    /// Scale basis from the latest detection. Not exponentially smoothed.
    pub face_scale: f32,
}

impl SmoothedPose {
    pub const REST: SmoothedPose = SmoothedPose {
        x: 0.0,
        y: 0.0,
        z: REST_DEPTH,
        rotation: Rotation::ZERO,
        face_scale: 1.0,
    };
}

impl Default for SmoothedPose {
    fn default() -> Self {
        Self::REST
    }
}

/// Manual position offsets from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

/// User-adjustable placement parameters (UI sliders).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    pub scale: f32,
    pub position: Offset,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            position: Offset::default(),
        }
    }
}

impl PlacementConfig {
    /// Copy with every parameter clamped into its slider range.
    /// Non-finite values fall back to the defaults.
    pub fn clamped(&self) -> Self {
        let clamp = |v: f32, (lo, hi): (f32, f32), default: f32| {
            if v.is_finite() {
                v.clamp(lo, hi)
            } else {
                default
            }
        };
        Self {
            scale: clamp(self.scale, SCALE_RANGE, 1.0),
            position: Offset {
                x: clamp(self.position.x, OFFSET_RANGE, 0.0),
                y: clamp(self.position.y, OFFSET_RANGE, 0.0),
                z: clamp(self.position.z, OFFSET_RANGE, 0.0),
            },
        }
    }
}

/// Position, rotation and uniform scale of the glasses in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, REST_DEPTH),
            rotation: Quat::IDENTITY,
            scale: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid() {
        let pts = [Point::new(0.0, 0.0), Point::new(2.0, 0.0), Point::new(1.0, 3.0)];
        let c = Point::centroid(&pts).unwrap();
        assert!((c.x - 1.0).abs() < 1e-6);
        assert!((c.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_empty() {
        assert!(Point::centroid(&[]).is_none());
    }

    #[test]
    fn test_placement_clamp() {
        let cfg = PlacementConfig {
            scale: 3.0,
            position: Offset { x: -2.0, y: 0.25, z: f32::NAN },
        };
        let c = cfg.clamped();
        assert_eq!(c.scale, 1.5);
        assert_eq!(c.position.x, -0.5);
        assert_eq!(c.position.y, 0.25);
        assert_eq!(c.position.z, 0.0);
    }

    #[test]
    fn test_frame_empty() {
        let frame = CameraFrame::new(Vec::new(), 0, 480, 0);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_rest_pose() {
        let rest = SmoothedPose::default();
        assert_eq!(rest.z, -0.5);
        assert_eq!(rest.rotation, Rotation::ZERO);
    }
}
