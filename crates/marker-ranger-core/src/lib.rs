//! Core types and utilities for fiducial marker ranging.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete image codec or marker detector.

mod camera;
mod homography;
mod image;
mod logger;

pub use camera::{CameraError, CameraModel, Distortion, UndistortConfig};
pub use homography::{homography_from_4pt, homography_from_points, Homography};
pub use image::{sample_bilinear, GrayImage, GrayImageView};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
