//! Face-landmark detection seam and its SCRFD adapter.
//!
//! The pose pipeline only sees [`LandmarkDetector`] and [`DetectorLoader`].
//! [`FaceDetector`] runs the SCRFD model (3-stride anchor-free decoding, NMS)
//! via ONNX Runtime and reports its five keypoints as landmark groups.

use crate::types::{CameraFrame, FaceBox, Point};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KEYPOINTS: usize = 5;

/// File name of the SCRFD weights inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (place the SCRFD weights in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Landmark groups reported for one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    pub face: FaceBox,
    pub confidence: f32,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub nose: Vec<Point>,
    /// Index of the nose tip inside `nose`.
    pub nose_tip: usize,
}

impl FaceLandmarks {
    /// The designated nose tip, clamped to the last nose point.
    pub fn nose_tip(&self) -> Option<Point> {
        self.nose
            .get(self.nose_tip)
            .or_else(|| self.nose.last())
            .copied()
    }
}

/// A pretrained face-landmark detector.
pub trait LandmarkDetector: Send + 'static {
    /// Best face above `confidence_threshold`, or `None`.
    fn detect(
        &mut self,
        frame: &CameraFrame,
        confidence_threshold: f32,
    ) -> Result<Option<FaceLandmarks>, DetectorError>;
}

/// Loads detector weights. Called at most once per successful load.
pub trait DetectorLoader: Send + Sync + 'static {
    type Detector: LandmarkDetector;

    fn load(&self) -> Result<Self::Detector, DetectorError>;
}

/// Loads [`FaceDetector`] from `<model_dir>/det_10g.onnx`.
#[derive(Debug, Clone)]
pub struct ScrfdLoader {
    pub model_dir: PathBuf,
}

impl ScrfdLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }
}

impl DetectorLoader for ScrfdLoader {
    type Detector = FaceDetector;

    fn load(&self) -> Result<FaceDetector, DetectorError> {
        FaceDetector::load(&self.model_path())
    }
}

/// One raw SCRFD detection in frame coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub keypoints: Option<[Point; SCRFD_KEYPOINTS]>,
}

impl Detection {
    fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Landmark groups; `None` when the model produced no keypoints.
    pub fn landmarks(&self) -> Option<FaceLandmarks> {
        let [left_eye, right_eye, nose, ..] = self.keypoints?;
        Some(FaceLandmarks {
            face: FaceBox {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
            },
            confidence: self.confidence,
            left_eye: vec![left_eye],
            right_eye: vec![right_eye],
            nose: vec![nose],
            nose_tip: 0,
        })
    }
}

/// Maps letterboxed model coordinates back into the source frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE as f32 - new_w) / 2.0,
            pad_y: (SCRFD_INPUT_SIZE as f32 - new_h) / 2.0,
        }
    }

    fn to_frame(&self, x: f32, y: f32) -> Point {
        Point::new((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox, kps) output tensor indices for one stride.
type StrideOutputs = (usize, usize, usize);

/// SCRFD face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (3 strides × score/bbox/kps), model has {}",
                names.len()
            )));
        }

        let outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "loaded SCRFD detector");

        Ok(Self { session, outputs })
    }

    /// All detections above `threshold`, best first.
    pub fn detect_all(
        &mut self,
        frame: &CameraFrame,
        threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        if frame.data.len() < w * h {
            return Err(DetectorError::FrameTooShort {
                expected: w * h,
                actual: frame.data.len(),
            });
        }

        let letterbox = Letterbox::fit(w, h);
        let input = letterbox_tensor(&frame.data, w, h, &letterbox);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.outputs[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let boxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;

            candidates.extend(decode_stride(scores, boxes, kps, stride, &letterbox, threshold));
        }

        Ok(non_max_suppression(candidates, SCRFD_NMS_THRESHOLD))
    }
}

impl LandmarkDetector for FaceDetector {
    fn detect(
        &mut self,
        frame: &CameraFrame,
        confidence_threshold: f32,
    ) -> Result<Option<FaceLandmarks>, DetectorError> {
        let detections = self.detect_all(frame, confidence_threshold)?;
        Ok(detections.iter().find_map(Detection::landmarks))
    }
}

/// Locate score/bbox/kps tensors by name ("score_8", "bbox_16", ...), or
/// assume the standard export order when the names are generic.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut layout = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => layout[slot] = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD output names not recognised, using positional layout");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    layout
}

/// Bilinear-resize a grayscale frame into the padded 640×640 NCHW input.
fn letterbox_tensor(gray: &[u8], width: usize, height: usize, lb: &Letterbox) -> Array4<f32> {
    let new_w = (width as f32 * lb.scale).round() as usize;
    let new_h = (height as f32 * lb.scale).round() as usize;
    let (x0, y0) = (lb.pad_x.floor() as usize, lb.pad_y.floor() as usize);

    // Padding holds the mean so it normalises to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    let inv = 1.0 / lb.scale;

    for y in 0..SCRFD_INPUT_SIZE {
        for x in 0..SCRFD_INPUT_SIZE {
            let inside = (y0..y0 + new_h).contains(&y) && (x0..x0 + new_w).contains(&x);
            let pixel = if inside {
                sample_bilinear(gray, width, height, (x - x0) as f32, (y - y0) as f32, inv)
            } else {
                SCRFD_MEAN
            };
            let v = (pixel - SCRFD_MEAN) / SCRFD_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }
    tensor
}

fn sample_bilinear(gray: &[u8], width: usize, height: usize, dx: f32, dy: f32, inv: f32) -> f32 {
    let sx = (dx + 0.5) * inv - 0.5;
    let sy = (dy + 0.5) * inv - 0.5;
    let x0 = (sx.floor() as i64).clamp(0, width as i64 - 1) as usize;
    let y0 = (sy.floor() as i64).clamp(0, height as i64 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (sx - sx.floor()).clamp(0.0, 1.0);
    let fy = (sy - sy.floor()).clamp(0.0, 1.0);

    let at = |x: usize, y: usize| gray[y * width + x] as f32;
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0)
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied()?;
            if score <= threshold {
                return None;
            }
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * s;
            let ay = (cell / grid) as f32 * s;

            let b = boxes.get(idx * 4..idx * 4 + 4)?;
            let top_left = letterbox.to_frame(ax - b[0] * s, ay - b[1] * s);
            let bottom_right = letterbox.to_frame(ax + b[2] * s, ay + b[3] * s);

            let keypoints = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_frame(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
            });

            Some(Detection {
                x: top_left.x,
                y: top_left.y,
                width: bottom_right.x - top_left.x,
                height: bottom_right.y - top_left.y,
                confidence: score,
                keypoints,
            })
        })
        .collect()
}

/// Keep the highest-confidence detections, dropping overlaps above `iou_threshold`.
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| iou(k, &det) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence: conf, keypoints: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let kept = non_max_suppression(
            vec![
                det(5.0, 5.0, 100.0, 100.0, 0.8),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
                det(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        let confs: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::fit(320, 240);
        let (ox, oy) = (100.0f32, 50.0f32);
        let p = lb.to_frame(ox * lb.scale + lb.pad_x, oy * lb.scale + lb.pad_y);
        assert!((p.x - ox).abs() < 0.1);
        assert!((p.y - oy).abs() < 0.1);
    }

    #[test]
    fn test_output_layout_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(output_layout(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_output_layout_positional() {
        let names: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        assert_eq!(output_layout(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_uniform_frame_samples_uniform() {
        let gray = vec![90u8; 64 * 48];
        let v = sample_bilinear(&gray, 64, 48, 10.0, 7.0, 0.1);
        assert_eq!(v, 90.0);
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let grid = SCRFD_INPUT_SIZE / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        let mut boxes = vec![0.0; anchors * 4];
        let kps = vec![0.5; anchors * 10];
        // Anchor 2 is cell 1: x = 32, y = 0.
        scores[2] = 0.9;
        boxes[8..12].copy_from_slice(&[1.0, 0.0, 1.0, 2.0]);

        let dets = decode_stride(&scores, &boxes, &kps, 32, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (0.0, 0.0, 64.0, 64.0));
        let kp = d.keypoints.unwrap();
        assert_eq!(kp[2], Point::new(48.0, 16.0));
    }

    #[test]
    fn test_detection_to_landmarks() {
        let mut d = det(10.0, 20.0, 100.0, 120.0, 0.8);
        assert!(d.landmarks().is_none());
        d.keypoints = Some([
            Point::new(40.0, 60.0),
            Point::new(80.0, 60.0),
            Point::new(60.0, 80.0),
            Point::new(45.0, 100.0),
            Point::new(75.0, 100.0),
        ]);
        let lm = d.landmarks().unwrap();
        assert_eq!(lm.left_eye, vec![Point::new(40.0, 60.0)]);
        assert_eq!(lm.nose_tip(), Some(Point::new(60.0, 80.0)));
        assert_eq!(lm.face.width, 100.0);
    }

    #[test]
    fn test_nose_tip_index_clamped() {
        let lm = FaceLandmarks {
            face: FaceBox::default(),
            confidence: 1.0,
            left_eye: vec![],
            right_eye: vec![],
            nose: vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)],
            nose_tip: 3,
        };
        assert_eq!(lm.nose_tip(), Some(Point::new(2.0, 2.0)));
    }
}
