//! tryon-hw — Camera acquisition for the try-on engine.
//!
//! Opens V4L2 devices by facing mode at a requested resolution and converts
//! captured buffers (YUYV, MJPG, GREY, Y16) to grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraRequest, DeviceMap, FacingMode};
pub use frame::Frame;
