//! Live camera feed: a capture thread over `tryon-hw` publishing the latest
//! grayscale frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;
use tryon_core::types::{CameraFrame, FrameSize};
use tryon_hw::{Camera, CameraError, CameraRequest, DeviceMap};

/// The video element the render loop draws from.
pub trait VideoFeed: Send {
    /// Frame dimensions, or `None` while the camera has not delivered one.
    fn frame_size(&self) -> Option<FrameSize>;
    fn latest_frame(&self) -> Option<CameraFrame>;
    /// Stop every track. Idempotent.
    fn stop(&mut self);
    fn active_tracks(&self) -> usize;
}

/// Opens feeds for new sessions. Called from the blocking pool.
pub trait FeedSource: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn VideoFeed>, CameraError>;
}

/// Opens the configured V4L2 device for the requested facing mode.
pub struct V4lSource {
    pub devices: DeviceMap,
    pub request: CameraRequest,
}

impl FeedSource for V4lSource {
    fn open(&self) -> Result<Box<dyn VideoFeed>, CameraError> {
        let camera = Camera::open(&self.devices, &self.request)?;
        Ok(Box::new(CameraFeed::start(camera)?))
    }
}

pub struct CameraFeed {
    device: String,
    frames: watch::Receiver<Option<CameraFrame>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CameraFeed {
    /// Start streaming from an open camera on a dedicated thread.
    pub fn start(mut camera: Camera) -> Result<Self, CameraError> {
        let (tx, frames) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));
        let device = camera.device_path.clone();

        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("tryon-capture".into())
            .spawn(move || {
                let result = camera.stream(&flag, |frame| {
                    tx.send_replace(Some(CameraFrame::new(
                        frame.data,
                        frame.width,
                        frame.height,
                        frame.sequence,
                    )));
                });
                if let Err(err) = result {
                    tracing::warn!(device = %camera.device_path, error = %err, "capture ended");
                }
                camera.stop();
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        Ok(Self {
            device,
            frames,
            running,
            thread: Some(thread),
        })
    }
}

impl VideoFeed for CameraFeed {
    fn frame_size(&self) -> Option<FrameSize> {
        self.frames.borrow().as_ref().map(CameraFrame::size)
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        self.frames.borrow().clone()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            // The capture loop sees the flag within one dequeue timeout,
            // even when the camera has stopped delivering frames.
            if thread.join().is_err() {
                tracing::debug!(device = %self.device, "capture thread panicked");
            }
            tracing::info!(device = %self.device, "camera track stopped");
        }
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.thread.is_some())
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Feed replaying a fixed frame, for tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct StillFeed {
        pub(crate) frame: Option<CameraFrame>,
        pub(crate) tracks: Arc<Mutex<usize>>,
    }

    impl StillFeed {
        pub(crate) fn new(width: u32, height: u32) -> Self {
            Self {
                frame: Some(CameraFrame::new(vec![128u8; (width * height) as usize], width, height, 0)),
                tracks: Arc::new(Mutex::new(1)),
            }
        }
    }

    impl VideoFeed for StillFeed {
        fn frame_size(&self) -> Option<FrameSize> {
            self.frame.as_ref().map(CameraFrame::size)
        }

        fn latest_frame(&self) -> Option<CameraFrame> {
            self.frame.clone()
        }

        fn stop(&mut self) {
            *self.tracks.lock().unwrap() = 0;
        }

        fn active_tracks(&self) -> usize {
            *self.tracks.lock().unwrap()
        }
    }

    /// Source handing out still feeds, or a fixed error.
    pub(crate) struct StillSource {
        pub(crate) size: (u32, u32),
        pub(crate) fail: bool,
        pub(crate) tracks: Mutex<Vec<Arc<Mutex<usize>>>>,
    }

    impl StillSource {
        pub(crate) fn new(width: u32, height: u32) -> Self {
            Self {
                size: (width, height),
                fail: false,
                tracks: Mutex::new(Vec::new()),
            }
        }

        /// Tracks still live across every feed handed out.
        pub(crate) fn live_tracks(&self) -> usize {
            self.tracks.lock().unwrap().iter().map(|t| *t.lock().unwrap()).sum()
        }
    }

    impl FeedSource for StillSource {
        fn open(&self) -> Result<Box<dyn VideoFeed>, CameraError> {
            if self.fail {
                return Err(CameraError::PermissionDenied("/dev/video0".into()));
            }
            let feed = StillFeed::new(self.size.0, self.size.1);
            self.tracks.lock().unwrap().push(Arc::clone(&feed.tracks));
            Ok(Box::new(feed))
        }
    }
}
