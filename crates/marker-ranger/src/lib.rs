//! Fiducial marker ranging.
//!
//! Compressed frames go in; annotated frames and per-marker distance readings
//! come out. Pose math is gated on a [`CalibrationStore`] that is fed by an
//! independent camera-info stream.
//!
//! ## Quickstart
//!
//! ```no_run
//! use marker_ranger::{CalibrationStore, PipelineController, RangerConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RangerConfig::default();
//! let store = Arc::new(CalibrationStore::new(config.calibration_policy));
//! let mut pipeline = PipelineController::new(&config, Arc::clone(&store))?;
//!
//! store.offer(&[400.0, 0.0, 320.0, 0.0, 400.0, 240.0, 0.0, 0.0, 1.0], &[0.0; 5])?;
//! let processed = pipeline.process_frame(&std::fs::read("frame.jpg")?)?;
//! for reading in &processed.report.readings {
//!     println!("{reading}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `marker_ranger::core`: images, homographies, camera model, logging.
//! - `marker_ranger::aruco`: dictionaries and marker detection.
//! - `marker_ranger::pose`: single-marker pose.
//! - [`node`]: directory-backed channel replay used by the CLI.

pub use marker_ranger_aruco as aruco;
pub use marker_ranger_core as core;
pub use marker_ranger_pose as pose;

mod annotate;
mod calibration;
pub mod codec;
mod config;
pub mod node;
mod pipeline;

pub use annotate::{AnnotationStyle, FrameAnnotator};
pub use calibration::{CalibrationError, CalibrationPolicy, CalibrationStore, CameraInfo, OfferOutcome};
pub use config::{ConfigError, RangerConfig, OUTPUT_CHANNEL};
pub use pipeline::{
    DistanceReading, FrameReport, PipelineController, PipelineError, PipelineState, ProcessedFrame,
};
