use crate::feed::{FeedSource, VideoFeed};
use crate::render::Renderer;
use crate::scheduler::{FrameId, RefreshScheduler};
use crate::session::{PoseReply, PoseRequester, Session, SessionError, SessionId, SessionOptions, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tryon_core::detector::DetectorLoader;
use tryon_core::types::{CameraFrame, PlacementConfig};
use tryon_core::{asset, AssetError, GlassesAsset, LoadProgress, PoseService, Strategy};
use tryon_hw::CameraError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("engine task exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine task.
enum EngineRequest {
    Start {
        model_url: String,
        reply: oneshot::Sender<Result<SessionId, EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SetPlacement {
        config: PlacementConfig,
        reply: oneshot::Sender<PlacementConfig>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    RetryDetector {
        reply: oneshot::Sender<()>,
    },
}

/// Completions from camera and asset work, tagged with the session that
/// asked for them.
enum EngineEvent {
    CameraReady {
        session: SessionId,
        feed: Box<dyn VideoFeed>,
    },
    CameraFailed {
        session: SessionId,
        error: CameraError,
    },
    AssetProgress {
        session: SessionId,
        progress: LoadProgress,
    },
    AssetReady {
        session: SessionId,
        asset: Box<GlassesAsset>,
    },
    AssetFailed {
        session: SessionId,
        error: AssetError,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Start a session: open the camera and load `model_url` concurrently.
    pub async fn start(&self, model_url: &str) -> Result<SessionId, EngineError> {
        let model_url = model_url.to_string();
        self.call(|reply| EngineRequest::Start { model_url, reply }).await?
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Stop { reply }).await
    }

    /// Apply slider values; returns them after clamping.
    pub async fn set_placement(&self, config: PlacementConfig) -> Result<PlacementConfig, EngineError> {
        self.call(|reply| EngineRequest::SetPlacement { config, reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn retry_detector(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::RetryDetector { reply }).await
    }
}

impl<L: DetectorLoader> PoseRequester for Arc<PoseService<L>> {
    fn request(&self, frame: CameraFrame) -> oneshot::Receiver<PoseReply> {
        let (tx, rx) = oneshot::channel();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let pose = service.estimate(&frame).await;
            let strategy = if service.is_loaded() {
                service.strategy_in_use()
            } else {
                Strategy::Geometric
            };
            // Receiver gone means the session stopped; the result is stale.
            let _ = tx.send(PoseReply { pose, strategy });
        });
        rx
    }
}

pub struct EngineConfig {
    pub refresh_interval: Duration,
    pub session: SessionOptions,
}

type EngineSession<R, L> = Session<RefreshScheduler, R, Arc<PoseService<L>>>;

struct Engine<R, L: DetectorLoader> {
    session: EngineSession<R, L>,
    feeds: Arc<dyn FeedSource>,
    frames: mpsc::UnboundedReceiver<FrameId>,
    events_tx: mpsc::Sender<EngineEvent>,
    events: mpsc::Receiver<EngineEvent>,
}

/// Spawn the engine task. Must be called inside a tokio runtime.
///
/// The engine owns the session; everything else (camera open, asset load,
/// pose estimation) reports back over channels.
pub fn spawn_engine<R, L>(
    config: EngineConfig,
    feeds: Arc<dyn FeedSource>,
    renderer: R,
    poses: Arc<PoseService<L>>,
) -> Result<EngineHandle, EngineError>
where
    R: Renderer + 'static,
    L: DetectorLoader,
{
    let (scheduler, frames) = RefreshScheduler::new(config.refresh_interval);
    let session = Session::new(scheduler, renderer, poses, config.session)?;
    let (events_tx, events) = mpsc::channel(32);
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);

    let engine = Engine {
        session,
        feeds,
        frames,
        events_tx,
        events,
    };
    tokio::spawn(engine.run(rx));
    tracing::info!(refresh_ms = config.refresh_interval.as_millis() as u64, "engine started");

    Ok(EngineHandle { tx })
}

impl<R, L> Engine<R, L>
where
    R: Renderer + 'static,
    L: DetectorLoader,
{
    async fn run(mut self, mut requests: mpsc::Receiver<EngineRequest>) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(frame) = self.frames.recv() => {
                    self.session.on_frame(frame, std::time::Instant::now());
                }
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }
        self.session.stop();
        tracing::info!("engine task exiting");
    }

    fn handle_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Start { model_url, reply } => {
                let result = self.start(&model_url);
                let _ = reply.send(result);
            }
            EngineRequest::Stop { reply } => {
                self.session.stop();
                let _ = reply.send(());
            }
            EngineRequest::SetPlacement { config, reply } => {
                let _ = reply.send(self.session.set_placement(config));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.session.status());
            }
            EngineRequest::RetryDetector { reply } => {
                self.session.poses().retry_detector();
                let _ = reply.send(());
            }
        }
    }

    fn start(&mut self, model_url: &str) -> Result<SessionId, EngineError> {
        let session = self.session.begin(model_url)?;
        self.session.poses().preload();
        self.open_camera(session);
        self.load_asset(session, model_url.to_string());
        Ok(session)
    }

    fn open_camera(&self, session: SessionId) {
        let feeds = Arc::clone(&self.feeds);
        let events = self.events_tx.clone();
        tokio::task::spawn_blocking(move || {
            let event = match feeds.open() {
                Ok(feed) => EngineEvent::CameraReady { session, feed },
                Err(error) => EngineEvent::CameraFailed { session, error },
            };
            let _ = events.blocking_send(event);
        });
    }

    fn load_asset(&self, session: SessionId, url: String) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = watch::channel(LoadProgress::default());
            let forward = {
                let events = events.clone();
                tokio::spawn(async move {
                    while progress_rx.changed().await.is_ok() {
                        let progress = *progress_rx.borrow_and_update();
                        if events.send(EngineEvent::AssetProgress { session, progress }).await.is_err() {
                            break;
                        }
                    }
                })
            };

            let result = asset::load(&url, &progress_tx).await;
            drop(progress_tx);
            let _ = forward.await;

            let event = match result {
                Ok(asset) => EngineEvent::AssetReady {
                    session,
                    asset: Box::new(asset),
                },
                Err(error) => EngineEvent::AssetFailed { session, error },
            };
            let _ = events.send(event).await;
        });
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::CameraReady { session, feed } => self.session.camera_ready(session, feed),
            EngineEvent::CameraFailed { session, error } => self.session.camera_failed(session, &error),
            EngineEvent::AssetProgress { session, progress } => self.session.asset_progress(session, progress),
            EngineEvent::AssetReady { session, asset } => self.session.asset_ready(session, *asset),
            EngineEvent::AssetFailed { session, error } => self.session.asset_failed(session, &error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fake::StillSource;
    use crate::render::HeadlessRenderer;
    use crate::session::{AssetStatus, SessionState};
    use serde_json::json;
    use tryon_core::detector::{DetectorError, FaceLandmarks, LandmarkDetector};
    use tryon_core::EstimatorOptions;

    struct NoWeights;

    struct NeverDetector;

    impl LandmarkDetector for NeverDetector {
        fn detect(&mut self, _: &CameraFrame, _: f32) -> Result<Option<FaceLandmarks>, DetectorError> {
            Ok(None)
        }
    }

    impl DetectorLoader for NoWeights {
        type Detector = NeverDetector;

        fn load(&self) -> Result<NeverDetector, DetectorError> {
            Err(DetectorError::ModelNotFound("det_10g.onnx".into()))
        }
    }

    fn engine(source: Arc<StillSource>) -> EngineHandle {
        let config = EngineConfig {
            refresh_interval: Duration::from_millis(5),
            session: SessionOptions {
                detection_interval: Duration::from_millis(5),
                ..SessionOptions::default()
            },
        };
        let poses = Arc::new(PoseService::new(NoWeights, EstimatorOptions::default()));
        spawn_engine(config, source, HeadlessRenderer::new(), poses).unwrap()
    }

    fn write_asset() -> std::path::PathBuf {
        let doc = json!({
            "asset": { "version": "2.0" },
            "nodes": [{ "mesh": 0 }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
            "accessors": [{ "count": 8, "componentType": 5126, "type": "VEC3", "min": [-0.07, -0.02, -0.01], "max": [0.07, 0.02, 0.01] }]
        });
        let path = std::env::temp_dir().join(format!("tryon-engine-{}.gltf", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();
        path
    }

    async fn wait_for(handle: &EngineHandle, what: &str, pred: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
        for _ in 0..300 {
            let status = handle.status().await.unwrap();
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_session_runs_with_geometric_fallback() {
        let source = Arc::new(StillSource::new(64, 48));
        let handle = engine(Arc::clone(&source));
        let path = write_asset();
        let url = format!("file://{}", path.display());

        handle.start(&url).await.unwrap();
        assert!(matches!(handle.start(&url).await, Err(EngineError::Session(SessionError::AlreadyRunning))));

        let status = wait_for(&handle, "tracking", |s| {
            matches!(s.asset, AssetStatus::Ready { .. }) && s.face_detected && s.transform.is_some()
        })
        .await;
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.strategy, Some(Strategy::Geometric));

        handle.stop().await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(status.camera_tracks, 0);
        assert_eq!(status.pending_frames, 0);
        assert_eq!(source.live_tracks(), 0);
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_asset_failure_keeps_loop_active() {
        let source = Arc::new(StillSource::new(64, 48));
        let handle = engine(source);

        handle.start("https://cdn.example/frames.glb").await.unwrap();
        let status = wait_for(&handle, "asset failure", |s| {
            matches!(s.asset, AssetStatus::Failed { .. }) && s.frames_drawn > 3
        })
        .await;
        assert_eq!(status.state, SessionState::Active);
        assert!(status.transform.is_none());
    }

    #[tokio::test]
    async fn test_camera_failure_reported() {
        let mut source = StillSource::new(64, 48);
        source.fail = true;
        let handle = engine(Arc::new(source));

        handle.start("frames.glb").await.unwrap();
        let status = wait_for(&handle, "camera failure", |s| s.state == SessionState::Idle).await;
        assert!(status.last_error.unwrap().starts_with("camera:"));
    }

    #[tokio::test]
    async fn test_placement_and_retry() {
        let handle = engine(Arc::new(StillSource::new(64, 48)));
        let applied = handle
            .set_placement(PlacementConfig {
                scale: 0.1,
                ..PlacementConfig::default()
            })
            .await
            .unwrap();
        assert_eq!(applied.scale, 0.5);
        handle.retry_detector().await.unwrap();
        assert_eq!(handle.status().await.unwrap().placement.scale, 0.5);
    }
}
