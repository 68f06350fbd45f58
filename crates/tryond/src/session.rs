//! Try-on session: the render loop state machine.
//!
//! A session is owned by the engine task and driven entirely through method
//! calls: user start/stop, camera and asset completions, and frame ticks from
//! the [`FrameScheduler`]. Pose estimation runs elsewhere; each tick polls the
//! in-flight request without blocking and fires a new one once the detection
//! interval has elapsed.

use crate::feed::VideoFeed;
use crate::render::{PerspectiveCamera, Renderer, Scene};
use crate::scheduler::{FrameId, FrameScheduler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tryon_core::placement;
use tryon_core::smoother::{PoseTarget, SmootherError, TemporalSmoother};
use tryon_core::types::{CameraFrame, FacePose, FrameSize, PlacementConfig, Transform};
use tryon_core::{AssetError, GlassesAsset, LoadProgress, Strategy};
use tryon_hw::CameraError;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a try-on session is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Smoother(#[from] SmootherError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssetStatus {
    None,
    Loading { url: String, percent: Option<u8> },
    Ready { url: String, meshes: usize, animation: Option<String> },
    Failed { url: String, error: String },
}

/// Snapshot reported over D-Bus.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub started_at: Option<DateTime<Utc>>,
    pub asset: AssetStatus,
    pub face_detected: bool,
    pub strategy: Option<Strategy>,
    pub transform: Option<Transform>,
    pub placement: PlacementConfig,
    pub frame_size: Option<FrameSize>,
    pub frames_drawn: u64,
    /// Live camera tracks; zero whenever no session is running.
    pub camera_tracks: usize,
    pub pending_frames: usize,
    pub last_error: Option<String>,
}

/// Outcome of one pose estimation.
#[derive(Debug, Clone, Copy)]
pub struct PoseReply {
    pub pose: Option<FacePose>,
    pub strategy: Strategy,
}

/// Fires pose estimations; the answer arrives on the returned receiver.
pub trait PoseRequester: Send {
    fn request(&self, frame: CameraFrame) -> oneshot::Receiver<PoseReply>;
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub detection_interval: Duration,
    pub smoothing_factor: f32,
    pub placement: PlacementConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(30),
            smoothing_factor: tryon_core::smoother::DEFAULT_SMOOTHING_FACTOR,
            placement: PlacementConfig::default(),
        }
    }
}

struct InFlight {
    session: SessionId,
    frame_size: FrameSize,
    reply: oneshot::Receiver<PoseReply>,
}

pub struct Session<S, R, P> {
    state: SessionState,
    id: Option<SessionId>,
    started_at: Option<DateTime<Utc>>,
    options: SessionOptions,

    scheduler: S,
    renderer: R,
    poses: P,
    feed: Option<Box<dyn VideoFeed>>,
    camera: PerspectiveCamera,
    viewport: Option<FrameSize>,

    asset: Option<GlassesAsset>,
    asset_status: AssetStatus,
    smoother: TemporalSmoother,
    placement: PlacementConfig,

    pending_frame: Option<FrameId>,
    in_flight: Option<InFlight>,
    last_detection: Option<Instant>,
    last_tick: Option<Instant>,

    face_detected: bool,
    strategy: Option<Strategy>,
    transform: Option<Transform>,
    frames_drawn: u64,
    last_error: Option<String>,
}

impl<S, R, P> Session<S, R, P>
where
    S: FrameScheduler,
    R: Renderer,
    P: PoseRequester,
{
    pub fn new(scheduler: S, renderer: R, poses: P, options: SessionOptions) -> Result<Self, SessionError> {
        Ok(Self {
            state: SessionState::Idle,
            id: None,
            started_at: None,
            smoother: TemporalSmoother::new(options.smoothing_factor)?,
            placement: options.placement.clamped(),
            options,
            scheduler,
            renderer,
            poses,
            feed: None,
            camera: PerspectiveCamera::default(),
            viewport: None,
            asset: None,
            asset_status: AssetStatus::None,
            pending_frame: None,
            in_flight: None,
            last_detection: None,
            last_tick: None,
            face_detected: false,
            strategy: None,
            transform: None,
            frames_drawn: 0,
            last_error: None,
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> Option<SessionId> {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn poses(&self) -> &P {
        &self.poses
    }

    pub fn pending_frames(&self) -> usize {
        self.scheduler.pending_frames()
    }

    pub fn active_tracks(&self) -> usize {
        self.feed.as_ref().map_or(0, |f| f.active_tracks())
    }

    /// User pressed start. Opens a new session waiting for its camera and
    /// asset.
    pub fn begin(&mut self, model_url: &str) -> Result<SessionId, SessionError> {
        if matches!(self.state, SessionState::Initializing | SessionState::Active) {
            return Err(SessionError::AlreadyRunning);
        }

        let id = Uuid::new_v4();
        self.id = Some(id);
        self.started_at = Some(Utc::now());
        self.state = SessionState::Initializing;
        self.smoother.reset();
        self.asset = None;
        self.asset_status = AssetStatus::Loading {
            url: model_url.to_string(),
            percent: None,
        };
        self.in_flight = None;
        self.last_detection = None;
        self.last_tick = None;
        self.viewport = None;
        self.face_detected = false;
        self.strategy = None;
        self.transform = None;
        self.frames_drawn = 0;
        self.last_error = None;

        tracing::info!(session = %id, url = model_url, "try-on session starting");
        Ok(id)
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.id == Some(id) && matches!(self.state, SessionState::Initializing | SessionState::Active)
    }

    /// Camera access granted. The loop starts immediately; the asset may
    /// still be loading.
    pub fn camera_ready(&mut self, id: SessionId, mut feed: Box<dyn VideoFeed>) {
        if !self.is_current(id) || self.state != SessionState::Initializing {
            tracing::debug!(session = %id, "discarding camera for stale session");
            feed.stop();
            return;
        }
        self.feed = Some(feed);
        self.state = SessionState::Active;
        self.pending_frame = Some(self.scheduler.request_frame());
        tracing::info!(session = %id, "camera ready; render loop running");
    }

    pub fn camera_failed(&mut self, id: SessionId, err: &CameraError) {
        if !self.is_current(id) {
            return;
        }
        tracing::warn!(session = %id, error = %err, "camera unavailable");
        self.teardown();
        self.state = SessionState::Idle;
        self.last_error = Some(format!("camera: {err}"));
    }

    pub fn asset_progress(&mut self, id: SessionId, progress: LoadProgress) {
        if !self.is_current(id) {
            return;
        }
        if let AssetStatus::Loading { percent, .. } = &mut self.asset_status {
            *percent = progress.percent();
        }
    }

    /// Attach the asset to the running loop without restarting it.
    pub fn asset_ready(&mut self, id: SessionId, asset: GlassesAsset) {
        if !self.is_current(id) {
            tracing::debug!(session = %id, url = asset.url(), "discarding asset for stale session");
            return;
        }
        self.asset_status = AssetStatus::Ready {
            url: asset.url().to_string(),
            meshes: asset.mesh_count(),
            animation: asset.animation().map(|a| a.clip.name.clone()),
        };
        self.asset = Some(asset);
    }

    /// The loop keeps drawing the camera without an overlay.
    pub fn asset_failed(&mut self, id: SessionId, err: &AssetError) {
        if !self.is_current(id) {
            return;
        }
        let url = match &self.asset_status {
            AssetStatus::Loading { url, .. } => url.clone(),
            _ => String::new(),
        };
        tracing::warn!(session = %id, url = %url, error = %err, "glasses asset failed to load");
        self.asset_status = AssetStatus::Failed {
            url,
            error: err.to_string(),
        };
    }

    pub fn set_placement(&mut self, config: PlacementConfig) -> PlacementConfig {
        self.placement = config.clamped();
        tracing::debug!(scale = self.placement.scale, offset = ?self.placement.position, "placement updated");
        self.placement
    }

    /// One display refresh.
    pub fn on_frame(&mut self, frame: FrameId, now: Instant) {
        if self.state != SessionState::Active || self.pending_frame != Some(frame) {
            tracing::trace!(?frame, "ignoring stale frame");
            return;
        }
        self.pending_frame = Some(self.scheduler.request_frame());

        let delta = self
            .last_tick
            .map_or(Duration::ZERO, |prev| now.saturating_duration_since(prev));
        self.last_tick = Some(now);

        let (size, latest) = match self.feed.as_ref() {
            Some(feed) => (feed.frame_size(), feed.latest_frame()),
            None => return,
        };
        self.fit_viewport(size);
        self.poll_detection();

        if let Some(frame) = latest.as_ref().filter(|f| !f.is_empty()) {
            if self.in_flight.is_none() && self.detection_due(now) {
                self.fire_detection(frame.clone(), now);
            }
        }

        if let Some(asset) = self.asset.as_mut() {
            asset.advance_animation(delta);
            self.transform = Some(placement::place(asset, &self.smoother.current(), &self.placement));
        }

        let scene = Scene {
            camera: &self.camera,
            background: latest.as_ref(),
            asset: self.asset.as_ref(),
        };
        match self.renderer.draw(&scene) {
            Ok(()) => self.frames_drawn += 1,
            Err(err) => tracing::debug!(error = %err, "draw failed; skipping frame"),
        }
    }

    fn fit_viewport(&mut self, size: Option<FrameSize>) {
        let Some(size) = size else {
            return;
        };
        if self.viewport == Some(size) {
            return;
        }
        self.camera.fit(size);
        match self.renderer.resize(size) {
            Ok(()) => self.viewport = Some(size),
            Err(err) => tracing::debug!(error = %err, "resize failed"),
        }
    }

    fn detection_due(&self, now: Instant) -> bool {
        self.last_detection
            .map_or(true, |prev| now.saturating_duration_since(prev) >= self.options.detection_interval)
    }

    fn fire_detection(&mut self, frame: CameraFrame, now: Instant) {
        let Some(session) = self.id else {
            return;
        };
        let frame_size = frame.size();
        self.in_flight = Some(InFlight {
            session,
            frame_size,
            reply: self.poses.request(frame),
        });
        self.last_detection = Some(now);
    }

    fn poll_detection(&mut self) {
        let Some(flight) = self.in_flight.as_mut() else {
            return;
        };
        let reply = match flight.reply.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Closed) => None,
        };
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        if Some(flight.session) != self.id {
            tracing::debug!(session = %flight.session, "discarding pose for previous session");
            return;
        }

        match reply {
            Some(reply) => {
                let target = reply
                    .pose
                    .and_then(|pose| PoseTarget::from_face(&pose, flight.frame_size, &self.placement));
                self.smoother.update(target.as_ref());
                self.face_detected = target.is_some();
                self.strategy = Some(reply.strategy);
            }
            None => {
                // Estimation task dropped its reply: no face this tick.
                self.smoother.update(None);
                self.face_detected = false;
            }
        }
    }

    /// Stop the loop and release the camera and renderer. Safe to call in
    /// any state.
    pub fn stop(&mut self) {
        let was_running = matches!(self.state, SessionState::Initializing | SessionState::Active);
        self.teardown();
        if was_running {
            self.state = SessionState::Stopped;
            tracing::info!(session = ?self.id, frames = self.frames_drawn, "try-on session stopped");
        }
    }

    fn teardown(&mut self) {
        if let Some(frame) = self.pending_frame.take() {
            self.scheduler.cancel_frame(frame);
        }
        self.in_flight = None;
        if let Some(mut feed) = self.feed.take() {
            feed.stop();
        }
        if let Err(err) = self.renderer.dispose() {
            tracing::debug!(error = %err, "renderer dispose failed");
        }
        self.asset = None;
        self.viewport = None;
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            session_id: self.id,
            started_at: self.started_at,
            asset: self.asset_status.clone(),
            face_detected: self.face_detected,
            strategy: self.strategy,
            transform: self.transform,
            placement: self.placement,
            frame_size: self.viewport,
            frames_drawn: self.frames_drawn,
            camera_tracks: self.active_tracks(),
            pending_frames: self.pending_frames(),
            last_error: self.last_error.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    #[cfg(test)]
    pub(crate) fn smoothed(&self) -> tryon_core::types::SmoothedPose {
        self.smoother.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fake::StillFeed;
    use crate::render::HeadlessRenderer;
    use crate::scheduler::ManualScheduler;
    use serde_json::json;
    use std::sync::Mutex;
    use tryon_core::types::{FaceBox, Point, Rotation, SmoothedPose};

    const W: u32 = 640;
    const H: u32 = 480;

    /// Records requests; the test answers them by hand.
    #[derive(Default)]
    struct ManualPoses {
        senders: Mutex<Vec<oneshot::Sender<PoseReply>>>,
    }

    impl ManualPoses {
        /// Requests not yet answered.
        fn requests(&self) -> usize {
            self.senders.lock().unwrap().len()
        }

        fn answer_latest(&self, pose: Option<FacePose>) -> bool {
            match self.senders.lock().unwrap().pop() {
                Some(tx) => tx
                    .send(PoseReply {
                        pose,
                        strategy: Strategy::Landmark,
                    })
                    .is_ok(),
                None => false,
            }
        }
    }

    impl PoseRequester for std::sync::Arc<ManualPoses> {
        fn request(&self, _frame: CameraFrame) -> oneshot::Receiver<PoseReply> {
            let (tx, rx) = oneshot::channel();
            self.senders.lock().unwrap().push(tx);
            rx
        }
    }

    type TestSession = Session<ManualScheduler, HeadlessRenderer, std::sync::Arc<ManualPoses>>;

    fn session() -> (TestSession, std::sync::Arc<ManualPoses>) {
        let poses = std::sync::Arc::new(ManualPoses::default());
        let s = Session::new(
            ManualScheduler::default(),
            HeadlessRenderer::new(),
            std::sync::Arc::clone(&poses),
            SessionOptions::default(),
        )
        .unwrap();
        (s, poses)
    }

    fn face(nose_x: f32) -> FacePose {
        FacePose {
            bounding_box: FaceBox {
                x: 200.0,
                y: 120.0,
                width: 240.0,
                height: 300.0,
            },
            eye_level: 0.4 * H as f32,
            nose_tip: Point::new(nose_x, 0.5 * H as f32),
            rotation: Rotation::ZERO,
        }
    }

    fn glasses() -> GlassesAsset {
        let doc = json!({
            "asset": { "version": "2.0" },
            "nodes": [{ "mesh": 0 }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
            "accessors": [
                { "count": 8, "componentType": 5126, "type": "VEC3", "min": [-0.07, -0.02, -0.01], "max": [0.07, 0.02, 0.01] },
                { "count": 2, "componentType": 5126, "type": "SCALAR", "min": [0.0], "max": [1.0] }
            ],
            "animations": [{ "name": "fold", "samplers": [{ "input": 1, "output": 0 }] }]
        });
        GlassesAsset::from_bytes("frames.gltf", serde_json::to_vec(&doc).unwrap()).unwrap()
    }

    /// Fire the pending frame at `now`.
    fn tick(s: &mut TestSession, now: Instant) {
        let id = s.scheduler_mut().fire().expect("a frame should be pending");
        s.on_frame(id, now);
    }

    fn running() -> (TestSession, std::sync::Arc<ManualPoses>, SessionId) {
        let (mut s, poses) = session();
        let id = s.begin("frames.gltf").unwrap();
        s.camera_ready(id, Box::new(StillFeed::new(W, H)));
        (s, poses, id)
    }

    #[test]
    fn test_lifecycle_states() {
        let (mut s, _) = session();
        assert_eq!(s.state(), SessionState::Idle);
        let id = s.begin("frames.gltf").unwrap();
        assert_eq!(s.state(), SessionState::Initializing);
        assert!(matches!(s.begin("x.glb"), Err(SessionError::AlreadyRunning)));

        s.camera_ready(id, Box::new(StillFeed::new(W, H)));
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.pending_frames(), 1);

        s.stop();
        assert_eq!(s.state(), SessionState::Stopped);
        let second = s.begin("frames.gltf").unwrap();
        assert_ne!(id, second);
    }

    #[test]
    fn test_stop_releases_tracks_and_frames() {
        let (mut s, _, _) = running();
        let t0 = Instant::now();
        tick(&mut s, t0);
        assert_eq!(s.active_tracks(), 1);
        assert!(s.renderer().allocated_resources() > 0);

        s.stop();
        assert_eq!(s.active_tracks(), 0);
        assert_eq!(s.pending_frames(), 0);
        assert_eq!(s.renderer().allocated_resources(), 0);
    }

    #[test]
    fn test_stale_camera_is_stopped() {
        let (mut s, _) = session();
        let id = s.begin("frames.gltf").unwrap();
        s.stop();

        let feed = StillFeed::new(W, H);
        let tracks = std::sync::Arc::clone(&feed.tracks);
        s.camera_ready(id, Box::new(feed));
        assert_eq!(*tracks.lock().unwrap(), 0);
        assert_eq!(s.state(), SessionState::Stopped);
    }

    #[test]
    fn test_camera_failure_returns_to_idle() {
        let (mut s, _) = session();
        let id = s.begin("frames.gltf").unwrap();
        s.camera_failed(id, &CameraError::PermissionDenied("/dev/video0".into()));
        let status = s.status();
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.last_error.unwrap().contains("permission denied"));
        assert!(s.begin("frames.gltf").is_ok());
    }

    #[test]
    fn test_asset_failure_keeps_drawing_camera() {
        let (mut s, _, id) = running();
        s.asset_failed(id, &AssetError::UnsupportedScheme("https".into()));
        let t0 = Instant::now();
        for i in 0..5 {
            tick(&mut s, t0 + Duration::from_millis(16 * i));
        }
        let status = s.status();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.frames_drawn, 5);
        assert!(status.transform.is_none());
        assert!(matches!(status.asset, AssetStatus::Failed { ref url, .. } if url == "frames.gltf"));
        assert_eq!(s.renderer().uploaded_asset(), None);
    }

    #[test]
    fn test_asset_attaches_mid_loop() {
        let (mut s, _, id) = running();
        let t0 = Instant::now();
        tick(&mut s, t0);
        assert_eq!(s.renderer().uploaded_asset(), None);

        s.asset_progress(id, LoadProgress { loaded: 50, total: Some(100) });
        assert!(matches!(s.status().asset, AssetStatus::Loading { percent: Some(50), .. }));

        s.asset_ready(id, glasses());
        tick(&mut s, t0 + Duration::from_millis(16));
        tick(&mut s, t0 + Duration::from_millis(32));
        assert_eq!(s.renderer().uploaded_asset(), Some("frames.gltf"));
        let status = s.status();
        assert!(matches!(status.asset, AssetStatus::Ready { ref animation, .. } if animation.as_deref() == Some("fold")));
        // Clock advanced by the two tick deltas.
        let player = s.asset.as_ref().unwrap().animation().unwrap();
        assert!((player.time() - 0.032).abs() < 1e-4);
        assert_eq!(status.transform.unwrap().position.z, tryon_core::types::REST_DEPTH);
    }

    #[test]
    fn test_resize_fits_camera_aspect() {
        let (mut s, _, _) = running();
        tick(&mut s, Instant::now());
        assert_eq!(s.renderer().viewport(), Some(FrameSize { width: W, height: H }));
        assert!((s.camera.aspect - W as f32 / H as f32).abs() < 1e-6);
    }

    #[test]
    fn test_detection_cadence() {
        let (mut s, poses, _) = running();
        let t0 = Instant::now();
        tick(&mut s, t0);
        assert_eq!(poses.requests(), 1);

        // Still in flight: no new request regardless of elapsed time.
        tick(&mut s, t0 + Duration::from_millis(40));
        assert_eq!(poses.requests(), 1);

        assert!(poses.answer_latest(Some(face(W as f32 / 2.0))));
        assert_eq!(poses.requests(), 0);
        // Reply consumed and, with the interval long past, a fresh request
        // fired on the same tick.
        tick(&mut s, t0 + Duration::from_millis(56));
        assert!(s.status().face_detected);
        assert_eq!(poses.requests(), 1);
    }

    #[test]
    fn test_detection_waits_for_interval() {
        let (mut s, poses, _) = running();
        let t0 = Instant::now();
        tick(&mut s, t0);
        poses.answer_latest(None);

        tick(&mut s, t0 + Duration::from_millis(16));
        assert_eq!(poses.requests(), 0, "reply consumed, interval not yet elapsed");
        tick(&mut s, t0 + Duration::from_millis(32));
        assert_eq!(poses.requests(), 1);
    }

    #[test]
    fn test_pose_moves_smoothed_estimate() {
        let (mut s, poses, _) = running();
        s.asset_ready(s.id().unwrap(), glasses());
        let t0 = Instant::now();
        tick(&mut s, t0);
        poses.answer_latest(Some(face(0.75 * W as f32)));
        tick(&mut s, t0 + Duration::from_millis(16));

        // Target x = 0.5 * 0.5 = 0.25; one step of factor 0.3 from rest.
        let smoothed = s.smoothed();
        assert!((smoothed.x - 0.075).abs() < 1e-6);
        assert_eq!(s.status().transform.unwrap().position.x, smoothed.x);
        assert_eq!(s.status().strategy, Some(Strategy::Landmark));
    }

    #[test]
    fn test_missing_face_holds_pose() {
        let (mut s, poses, _) = running();
        let t0 = Instant::now();
        tick(&mut s, t0);
        poses.answer_latest(Some(face(0.75 * W as f32)));
        tick(&mut s, t0 + Duration::from_millis(32));
        let held = s.smoothed();

        poses.answer_latest(None);
        tick(&mut s, t0 + Duration::from_millis(64));
        assert_eq!(s.smoothed(), held);
        assert!(!s.status().face_detected);
    }

    #[test]
    fn test_dropped_reply_counts_as_no_face() {
        let (mut s, poses, _) = running();
        let t0 = Instant::now();
        tick(&mut s, t0);
        poses.senders.lock().unwrap().clear();
        tick(&mut s, t0 + Duration::from_millis(16));
        assert_eq!(s.smoothed(), SmoothedPose::REST);
        assert!(!s.status().face_detected);
    }

    #[test]
    fn test_late_result_after_stop_is_discarded() {
        let (mut s, poses, _) = running();
        let t0 = Instant::now();
        tick(&mut s, t0);
        s.stop();

        // The estimator finishes after stop: nobody is listening.
        assert!(!poses.answer_latest(Some(face(0.75 * W as f32))));

        let id = s.begin("frames.gltf").unwrap();
        s.camera_ready(id, Box::new(StillFeed::new(W, H)));
        tick(&mut s, t0 + Duration::from_millis(100));
        assert_eq!(s.smoothed(), SmoothedPose::REST);
    }

    #[test]
    fn test_stale_frame_ignored() {
        let (mut s, _, _) = running();
        let stale = s.scheduler_mut().fire().unwrap();
        s.stop();
        s.on_frame(stale, Instant::now());
        assert_eq!(s.status().frames_drawn, 0);
        assert_eq!(s.pending_frames(), 0);
    }

    #[test]
    fn test_placement_clamped() {
        let (mut s, _) = session();
        let applied = s.set_placement(PlacementConfig {
            scale: 3.0,
            position: tryon_core::types::Offset { x: -2.0, y: 0.1, z: 0.0 },
        });
        assert_eq!(applied.scale, 1.5);
        assert_eq!(applied.position.x, -0.5);
        assert_eq!(s.status().placement, applied);
    }

    #[test]
    fn test_status_serialises() {
        let (s, _, _) = running();
        let json = serde_json::to_value(s.status()).unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["asset"]["state"], "loading");
        assert!(json["session_id"].is_string());
    }
}
