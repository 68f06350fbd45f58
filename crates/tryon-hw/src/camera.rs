//! V4L2 camera acquisition via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Mmap buffers queued per capture stream.
const STREAM_BUFFERS: u32 = 4;
/// Longest a dequeue may wait before the stop flag is checked again.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("no camera configured for {0:?} facing mode")]
    NoDeviceForFacing(FacingMode),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera stopped")]
    Stopped,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Which way the requested camera should face the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, looking at the user.
    #[default]
    User,
    /// Rear camera.
    Environment,
}

/// Video stream request: facing mode plus the ideal resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRequest {
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            facing: FacingMode::User,
            width: 640,
            height: 480,
        }
    }
}

/// Devices available for each facing mode.
#[derive(Debug, Clone, Default)]
pub struct DeviceMap {
    pub user: Option<String>,
    pub environment: Option<String>,
}

impl DeviceMap {
    pub fn resolve(&self, facing: FacingMode) -> Result<&str, CameraError> {
        let device = match facing {
            FacingMode::User => self.user.as_deref(),
            FacingMode::Environment => self.environment.as_deref(),
        };
        device.ok_or(CameraError::NoDeviceForFacing(facing))
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, Y channel extracted.
    Yuyv,
    /// Motion-JPEG, decoded to luma.
    Mjpg,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }
}

/// An open V4L2 camera. Dropping it (or calling [`Camera::stop`]) releases
/// the device.
pub struct Camera {
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open the device mapped to `request.facing`, negotiating the ideal
    /// resolution.
    pub fn open(devices: &DeviceMap, request: &CameraRequest) -> Result<Self, CameraError> {
        let device_path = devices.resolve(request.facing)?;
        Self::open_path(device_path, request.width, request.height)
    }

    /// Open a device by path (e.g., "/dev/video0").
    pub fn open_path(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            _ if e.raw_os_error() == Some(16) => CameraError::DeviceBusy,
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, GREY or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            requested_width = width,
            requested_height = height,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    /// Stream grayscale frames to `on_frame` until `running` is cleared.
    /// A stalled camera never holds the caller longer than one dequeue
    /// timeout past the flag change.
    pub fn stream(&self, running: &AtomicBool, mut on_frame: impl FnMut(Frame)) -> Result<(), CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::Stopped)?;
        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        pump(
            running,
            || {
                let (buf, meta) = stream.next()?;
                match self.to_grayscale(buf) {
                    Ok(data) => Ok(Some(Frame {
                        data,
                        width: self.width,
                        height: self.height,
                        sequence: meta.sequence,
                    })),
                    Err(err) => {
                        tracing::debug!(seq = meta.sequence, error = %err, "dropping undecodable frame");
                        Ok(None)
                    }
                }
            },
            &mut on_frame,
        )
    }

    /// Release the device. Idempotent.
    pub fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, FrameError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
            PixelFormat::Mjpg => frame::mjpg_to_grayscale(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, self.width, self.height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = format!("/dev/video{i}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

/// Pull frames from `next` while `running` holds. Timeouts only re-check
/// the flag; any other dequeue error ends the capture.
fn pump(
    running: &AtomicBool,
    mut next: impl FnMut() -> std::io::Result<Option<Frame>>,
    on_frame: &mut impl FnMut(Frame),
) -> Result<(), CameraError> {
    while running.load(Ordering::SeqCst) {
        match next() {
            Ok(Some(frame)) => on_frame(frame),
            Ok(None) => {}
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(sequence: u32) -> Frame {
        Frame {
            data: vec![0u8; 4],
            width: 2,
            height: 2,
            sequence,
        }
    }

    #[test]
    fn test_stalled_camera_stops_on_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::SeqCst);
        });

        let started = Instant::now();
        let mut timeouts = 0;
        let result = pump(
            &running,
            || {
                timeouts += 1;
                std::thread::sleep(Duration::from_millis(5));
                Err(Error::new(ErrorKind::TimedOut, "VIDIOC_DQBUF"))
            },
            &mut |_| panic!("no frame expected"),
        );
        stopper.join().unwrap();

        assert!(result.is_ok());
        assert!(timeouts > 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_pump_delivers_until_stopped() {
        let running = AtomicBool::new(true);
        let mut seq = 0;
        let mut seen = Vec::new();
        pump(
            &running,
            || {
                seq += 1;
                // Every third buffer fails to decode.
                Ok((seq % 3 != 0).then(|| frame(seq)))
            },
            &mut |f| {
                seen.push(f.sequence);
                if seen.len() == 4 {
                    running.store(false, Ordering::SeqCst);
                }
            },
        )
        .unwrap();
        assert_eq!(seen, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_dequeue_error_ends_capture() {
        let running = AtomicBool::new(true);
        let err = pump(&running, || Err(Error::new(ErrorKind::Other, "ENODEV")), &mut |_| {}).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(msg) if msg.contains("ENODEV")));
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_facing_mode_resolution() {
        let map = DeviceMap {
            user: Some("/dev/video0".into()),
            environment: None,
        };
        assert_eq!(map.resolve(FacingMode::User).unwrap(), "/dev/video0");
        assert!(matches!(
            map.resolve(FacingMode::Environment),
            Err(CameraError::NoDeviceForFacing(FacingMode::Environment))
        ));
    }

    #[test]
    fn test_missing_device() {
        let err = Camera::open_path("/dev/video-does-not-exist", 640, 480).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_default_request() {
        let req = CameraRequest::default();
        assert_eq!((req.facing, req.width, req.height), (FacingMode::User, 640, 480));
    }
}
