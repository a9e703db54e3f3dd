//! Per-frame orchestration: decode, detect, gate, estimate, annotate, encode.

use crate::annotate::FrameAnnotator;
use crate::calibration::CalibrationStore;
use crate::codec::{decode_frame, encode_jpeg, to_gray};
use crate::config::{ConfigError, RangerConfig};
use image::{ImageError, RgbImage};
use marker_ranger_aruco::{DetectedMarker, DictionaryDetection, MarkerDetector};
use marker_ranger_pose::{PoseEstimate, PoseEstimator};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("frame decode failed: {0}")]
    Decode(#[source] ImageError),
    #[error("frame encode failed: {0}")]
    Encode(#[source] ImageError),
}

/// Derived from the calibration store on every frame, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    AwaitingCalibration,
    Ready,
}

/// Signed distances of one marker from the camera, in metres.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistanceReading {
    pub marker_id: u32,
    /// Positive to the right.
    pub lateral: f64,
    /// Positive downwards.
    pub vertical: f64,
    /// Positive along the optical axis.
    pub forward: f64,
}

impl From<&PoseEstimate> for DistanceReading {
    fn from(p: &PoseEstimate) -> Self {
        Self {
            marker_id: p.marker_id,
            lateral: p.lateral(),
            vertical: p.vertical(),
            forward: p.forward(),
        }
    }
}

impl fmt::Display for DistanceReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Marker [{}]: is {:.3}m left/right, {:.3}m up/down, and {:.3}m straight ahead",
            self.marker_id, self.lateral, self.vertical, self.forward
        )
    }
}

/// Everything one pipeline pass found out about a frame.
#[derive(Clone, Debug, Serialize)]
pub struct FrameReport {
    pub state: PipelineState,
    pub detections: Vec<DictionaryDetection>,
    pub poses: Vec<PoseEstimate>,
    pub readings: Vec<DistanceReading>,
    /// Whether this frame emitted the "waiting for calibration" notice.
    pub waiting_notice: bool,
}

/// Encoded output plus the report that produced it.
#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    pub jpeg: Vec<u8>,
    pub report: FrameReport,
}

/// Single-worker frame processor.
///
/// Frames never wait for calibration: while the store is empty they take the
/// awaiting branch (outlines only, no pose).
pub struct PipelineController {
    detector: MarkerDetector,
    estimator: PoseEstimator,
    annotator: FrameAnnotator,
    store: Arc<CalibrationStore>,
    marker_size: f64,
    jpeg_quality: u8,
    notice_every: u64,
    awaiting_frames: u64,
}

impl PipelineController {
    pub fn new(config: &RangerConfig, store: Arc<CalibrationStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let detector = MarkerDetector::new(&config.dictionary_set()?, config.detector.clone())
            .with_strategy(config.search)
            .with_dedup_by_id(config.dedup_by_id);

        Ok(Self {
            detector,
            estimator: PoseEstimator::new(config.pose.clone()),
            annotator: FrameAnnotator::new(config.axis_length()),
            store,
            marker_size: config.marker_size_m,
            jpeg_quality: config.jpeg_quality,
            notice_every: u64::from(config.waiting_notice_every.max(1)),
            awaiting_frames: 0,
        })
    }

    pub fn store(&self) -> &Arc<CalibrationStore> {
        &self.store
    }

    pub fn state(&self) -> PipelineState {
        if self.store.is_ready() {
            PipelineState::Ready
        } else {
            PipelineState::AwaitingCalibration
        }
    }

    /// Decode, process and re-encode one compressed frame.
    ///
    /// A decode error only affects this frame; the controller stays usable.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(bytes = bytes.len()))
    )]
    pub fn process_frame(&mut self, bytes: &[u8]) -> Result<ProcessedFrame, PipelineError> {
        let mut frame = decode_frame(bytes).map_err(PipelineError::Decode)?;
        let report = self.process_image(&mut frame);
        let jpeg = encode_jpeg(&frame, self.jpeg_quality).map_err(PipelineError::Encode)?;
        Ok(ProcessedFrame { jpeg, report })
    }

    /// Run detection, the calibration gate, pose and annotation on an
    /// already decoded frame, drawing into it in place.
    pub fn process_image(&mut self, frame: &mut RgbImage) -> FrameReport {
        let gray = to_gray(frame);
        let detections = self.detector.detect(&gray.view());
        let markers: Vec<DetectedMarker> = detections.iter().map(|d| d.marker.clone()).collect();

        // One read for both the gate and the intrinsics used below.
        let camera = self.store.snapshot();
        let state = if camera.is_some() {
            PipelineState::Ready
        } else {
            PipelineState::AwaitingCalibration
        };

        let mut poses = Vec::new();
        let mut waiting_notice = false;
        if !markers.is_empty() {
            match camera.as_deref() {
                None => {
                    if self.awaiting_frames % self.notice_every == 0 {
                        log::warn!(
                            "waiting for calibration; {} marker(s) visible, pose skipped",
                            markers.len()
                        );
                        waiting_notice = true;
                    }
                    self.awaiting_frames += 1;
                }
                Some(cam) => {
                    poses = self.estimator.estimate(&markers, self.marker_size, cam);
                }
            }
        }

        let readings: Vec<DistanceReading> = poses.iter().map(DistanceReading::from).collect();
        for reading in &readings {
            log::info!("{reading}");
        }

        self.annotator.annotate(frame, &markers, &poses, camera.as_deref());

        FrameReport {
            state,
            detections,
            poses,
            readings,
            waiting_notice,
        }
    }
}
