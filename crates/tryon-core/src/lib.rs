//! tryon-core — Virtual try-on pose pipeline.
//!
//! Estimates head pose from camera frames (SCRFD landmarks via ONNX Runtime,
//! with a geometric fallback), smooths it over time, and places a normalised
//! glTF glasses asset on the face.

pub mod asset;
pub mod detector;
pub mod estimator;
pub mod placement;
pub mod smoother;
pub mod types;

pub use asset::{AssetError, GlassesAsset, LoadProgress};
pub use detector::{DetectorError, DetectorLoader, FaceDetector, LandmarkDetector, ScrfdLoader};
pub use estimator::{EstimatorOptions, PoseService, Strategy};
pub use smoother::{PoseTarget, TemporalSmoother};
pub use types::{CameraFrame, FacePose, FrameSize, PlacementConfig, SmoothedPose, Transform};

/// Default directory holding detector weights.
///
/// Checks `/usr/share/tryon/models` first, then `./models`.
pub fn default_model_dir() -> std::path::PathBuf {
    let system = std::path::PathBuf::from("/usr/share/tryon/models");
    if system.is_dir() {
        system
    } else {
        std::path::PathBuf::from("models")
    }
}
