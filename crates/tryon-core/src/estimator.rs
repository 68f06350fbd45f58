//! Head pose estimation from camera frames.
//!
//! Two strategies implement [`PoseEstimator`]: [`LandmarkEstimator`] runs a
//! learned landmark detector, [`GeometricEstimator`] assumes a centred face.
//! [`PoseService`] owns the lazily loaded detector and decides per call which
//! strategy answers.

use crate::detector::{DetectorError, DetectorLoader, FaceLandmarks, LandmarkDetector};
use crate::types::{CameraFrame, FaceBox, FacePose, Point, Rotation};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Minimum detector confidence for a face to count.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Normalised eye separation of a frontal face; yields yaw ≈ 0.
const YAW_BASELINE: f32 = 0.3;
/// Normalised eye-to-nose drop of a level face; yields pitch ≈ 0.
const PITCH_BASELINE: f32 = 0.15;
const ANGLE_GAIN: f32 = 2.0;

const FALLBACK_FACE_WIDTH: f32 = 0.4;
const FALLBACK_FACE_ASPECT: f32 = 1.3;
/// Vertical divisor placing the face slightly above centre.
const FALLBACK_VERTICAL_DIVISOR: f32 = 2.5;
const FALLBACK_EYE_LINE: f32 = 0.4;
const FALLBACK_NOSE_LINE: f32 = 0.55;

#[derive(Error, Debug)]
pub enum EstimatorError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("detector load failed earlier; call retry_detector() to try again")]
    LoadFailed,
    #[error("detector mutex poisoned")]
    Poisoned,
    #[error("estimation task failed: {0}")]
    Task(String),
}

/// Which estimation strategy produced (or will produce) a pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Landmark,
    Geometric,
}

/// A per-frame head pose estimator.
pub trait PoseEstimator: Send {
    fn estimate(&mut self, frame: &CameraFrame) -> Result<Option<FacePose>, EstimatorError>;

    fn strategy(&self) -> Strategy;
}

/// Deterministic estimator: a fixed-size face slightly above frame centre,
/// looking straight at the camera.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometricEstimator;

impl GeometricEstimator {
    pub fn pose_for(&self, width: u32, height: u32) -> Option<FacePose> {
        if width == 0 || height == 0 {
            return None;
        }
        let (w, h) = (width as f32, height as f32);
        let face_w = w * FALLBACK_FACE_WIDTH;
        let face_h = face_w * FALLBACK_FACE_ASPECT;
        let face_x = (w - face_w) / 2.0;
        let face_y = (h - face_h) / FALLBACK_VERTICAL_DIVISOR;

        Some(FacePose {
            bounding_box: FaceBox {
                x: face_x,
                y: face_y,
                width: face_w,
                height: face_h,
            },
            eye_level: face_y + face_h * FALLBACK_EYE_LINE,
            nose_tip: Point::new(w / 2.0, face_y + face_h * FALLBACK_NOSE_LINE),
            rotation: Rotation::ZERO,
        })
    }
}

impl PoseEstimator for GeometricEstimator {
    fn estimate(&mut self, frame: &CameraFrame) -> Result<Option<FacePose>, EstimatorError> {
        Ok(self.pose_for(frame.width, frame.height))
    }

    fn strategy(&self) -> Strategy {
        Strategy::Geometric
    }
}

/// Estimator backed by a landmark detector.
pub struct LandmarkEstimator<D> {
    detector: D,
    confidence_threshold: f32,
}

impl<D: LandmarkDetector> LandmarkEstimator<D> {
    pub fn new(detector: D, confidence_threshold: f32) -> Self {
        Self {
            detector,
            confidence_threshold,
        }
    }
}

impl<D: LandmarkDetector> PoseEstimator for LandmarkEstimator<D> {
    fn estimate(&mut self, frame: &CameraFrame) -> Result<Option<FacePose>, EstimatorError> {
        if frame.is_empty() {
            return Ok(None);
        }
        let landmarks = self.detector.detect(frame, self.confidence_threshold)?;
        Ok(landmarks.as_ref().and_then(pose_from_landmarks))
    }

    fn strategy(&self) -> Strategy {
        Strategy::Landmark
    }
}

/// Derive a [`FacePose`] from detected landmark groups.
///
/// `None` when an eye or nose group is empty.
pub fn pose_from_landmarks(lm: &FaceLandmarks) -> Option<FacePose> {
    let left = Point::centroid(&lm.left_eye)?;
    let right = Point::centroid(&lm.right_eye)?;
    let nose = lm.nose_tip()?;
    let face = lm.face;

    let eye_level = (left.y + right.y) / 2.0;

    let yaw = if face.width > 0.0 {
        ((right.x - left.x) / face.width - YAW_BASELINE) * ANGLE_GAIN
    } else {
        0.0
    };
    let pitch = if face.height > 0.0 {
        ((nose.y - eye_level) / face.height - PITCH_BASELINE) * ANGLE_GAIN
    } else {
        0.0
    };
    let roll = (right.y - left.y).atan2(right.x - left.x);

    Some(FacePose {
        bounding_box: face,
        eye_level,
        nose_tip: nose,
        rotation: Rotation { pitch, yaw, roll },
    })
}

/// Runtime options for [`PoseService`].
#[derive(Debug, Clone, Copy)]
pub struct EstimatorOptions {
    pub confidence_threshold: f32,
    /// Always answer with the geometric strategy.
    pub force_fallback: bool,
    /// Answer with the geometric pose when the detector sees no face.
    pub fallback_on_miss: bool,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            force_fallback: false,
            fallback_on_miss: false,
        }
    }
}

type SharedEstimator<D> = Arc<Mutex<LandmarkEstimator<D>>>;

/// Owns the detector load state of one estimator instance.
///
/// The detector is loaded lazily on first use. Concurrent callers share a
/// single in-flight load; a failed load or detection pins the service to the
/// geometric strategy until [`retry_detector`](Self::retry_detector).
pub struct PoseService<L: DetectorLoader> {
    loader: Arc<L>,
    options: EstimatorOptions,
    detector: OnceCell<SharedEstimator<L::Detector>>,
    loading: AtomicBool,
    load_failed: AtomicBool,
    detect_failed: AtomicBool,
    force_fallback: AtomicBool,
    warned: AtomicBool,
    fallback: GeometricEstimator,
}

impl<L: DetectorLoader> PoseService<L> {
    pub fn new(loader: L, options: EstimatorOptions) -> Self {
        Self {
            loader: Arc::new(loader),
            force_fallback: AtomicBool::new(options.force_fallback),
            options,
            detector: OnceCell::new(),
            loading: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
            detect_failed: AtomicBool::new(false),
            warned: AtomicBool::new(false),
            fallback: GeometricEstimator,
        }
    }

    /// Estimate the pose in `frame`. Never fails: detector problems degrade
    /// to the geometric strategy, an unready camera yields `None`.
    pub async fn estimate(self: &Arc<Self>, frame: &CameraFrame) -> Option<FacePose> {
        if frame.is_empty() {
            return None;
        }

        let estimator = match self.strategy_in_use() {
            Strategy::Geometric => return self.fallback.pose_for(frame.width, frame.height),
            Strategy::Landmark => self.detector.get().cloned(),
        };

        let Some(estimator) = estimator else {
            // Not loaded yet: answer geometrically while the load runs.
            self.preload();
            return self.fallback.pose_for(frame.width, frame.height);
        };

        let owned = frame.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = estimator.lock().map_err(|_| EstimatorError::Poisoned)?;
            guard.estimate(&owned)
        })
        .await
        .map_err(|e| EstimatorError::Task(e.to_string()))
        .and_then(|r| r);

        match result {
            Ok(Some(pose)) => Some(pose),
            Ok(None) if self.options.fallback_on_miss => {
                self.fallback.pose_for(frame.width, frame.height)
            }
            Ok(None) => None,
            Err(EstimatorError::Task(msg)) => {
                tracing::debug!(error = %msg, "estimation task did not complete; treating as no face");
                None
            }
            Err(err) => {
                self.detect_failed.store(true, Ordering::SeqCst);
                self.warn_once(&err);
                self.fallback.pose_for(frame.width, frame.height)
            }
        }
    }

    /// Start loading the detector in the background if nobody has yet.
    pub fn preload(self: &Arc<Self>) {
        if self.detector.initialized() || self.load_failed.load(Ordering::SeqCst) {
            return;
        }
        if self.loading.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.ensure_loaded().await;
        });
    }

    /// Wait for the detector, loading it if needed. Concurrent callers share
    /// the same load.
    pub async fn ensure_loaded(&self) -> Result<(), EstimatorError> {
        let loaded = self
            .detector
            .get_or_try_init(|| async {
                if self.load_failed.load(Ordering::SeqCst) {
                    return Err(EstimatorError::LoadFailed);
                }
                let loader = Arc::clone(&self.loader);
                let threshold = self.options.confidence_threshold;
                tracing::info!("loading face landmark detector");
                // A panicking loader counts as a failed load, not a retryable one.
                let outcome = match tokio::task::spawn_blocking(move || loader.load()).await {
                    Ok(loaded) => loaded.map_err(EstimatorError::from),
                    Err(join) => Err(EstimatorError::Task(join.to_string())),
                };
                match outcome {
                    Ok(detector) => {
                        tracing::info!("face landmark detector ready");
                        Ok(Arc::new(Mutex::new(LandmarkEstimator::new(detector, threshold))))
                    }
                    Err(err) => {
                        self.load_failed.store(true, Ordering::SeqCst);
                        self.warn_once(&err);
                        Err(err)
                    }
                }
            })
            .await;
        self.loading.store(false, Ordering::SeqCst);
        loaded.map(|_| ())
    }

    /// Clear a sticky detector failure so the next call tries the detector
    /// (and, if needed, its load) again.
    pub fn retry_detector(&self) {
        tracing::info!("retrying face landmark detector");
        self.load_failed.store(false, Ordering::SeqCst);
        self.detect_failed.store(false, Ordering::SeqCst);
        self.warned.store(false, Ordering::SeqCst);
    }

    pub fn set_force_fallback(&self, force: bool) {
        self.force_fallback.store(force, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        self.detector.initialized()
    }

    /// Strategy the next call will use once the detector is available.
    pub fn strategy_in_use(&self) -> Strategy {
        if self.force_fallback.load(Ordering::SeqCst)
            || self.load_failed.load(Ordering::SeqCst)
            || self.detect_failed.load(Ordering::SeqCst)
        {
            Strategy::Geometric
        } else {
            Strategy::Landmark
        }
    }

    fn warn_once(&self, err: &EstimatorError) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            tracing::warn!(error = %err, "face detector unavailable; using simplified face tracking");
        }
    }
}
