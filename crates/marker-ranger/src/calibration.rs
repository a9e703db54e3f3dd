//! Calibration gate shared between the frame path and the calibration feed.

use marker_ranger_core::{CameraError, CameraModel};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// How later calibration messages are treated once one was accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPolicy {
    /// First valid offer wins; the store stops listening afterwards.
    #[default]
    Latch,
    /// Every valid offer replaces the previous one.
    Continuous,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no calibration has been accepted yet")]
    NotReady,
    #[error("malformed calibration: {0}")]
    Malformed(#[from] CameraError),
}

/// What an offer did to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferOutcome {
    /// First calibration accepted.
    Accepted,
    /// A previous calibration was overwritten (continuous policy).
    Replaced,
    /// All-zero camera matrix; nothing changed.
    Sentinel,
    /// The store already latched; nothing changed.
    Latched,
}

/// Camera-info message: flat row-major `K` and a 4/5-element `D`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    #[serde(rename = "K")]
    pub k: Vec<f64>,
    #[serde(rename = "D")]
    pub d: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distortion_model: Option<String>,
}

impl CameraInfo {
    pub fn from_model(model: &CameraModel) -> Self {
        Self {
            k: model.matrix_row_major().to_vec(),
            d: model.distortion.to_array().to_vec(),
            distortion_model: Some("plumb_bob".to_string()),
        }
    }
}

fn is_sentinel(matrix: &[f64]) -> bool {
    matrix.len() == 9 && matrix.iter().all(|&v| v == 0.0)
}

/// Single-writer / multi-reader cell holding the current intrinsics.
///
/// Readers get an `Arc` snapshot, so a reader never observes a matrix from
/// one offer mixed with coefficients from another.
#[derive(Debug)]
pub struct CalibrationStore {
    policy: CalibrationPolicy,
    current: RwLock<Option<Arc<CameraModel>>>,
    latched: AtomicBool,
}

impl CalibrationStore {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self {
            policy,
            current: RwLock::new(None),
            latched: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> CalibrationPolicy {
        self.policy
    }

    /// Offer a raw calibration.
    ///
    /// The all-zero matrix is a no-op, not an error. Malformed input (wrong
    /// lengths, non-finite or singular matrix) is rejected without touching
    /// the stored value.
    pub fn offer(&self, matrix: &[f64], distortion: &[f64]) -> Result<OfferOutcome, CalibrationError> {
        if is_sentinel(matrix) {
            log::debug!("ignoring all-zero camera matrix");
            return Ok(OfferOutcome::Sentinel);
        }
        if self.latched.load(Ordering::Acquire) {
            return Ok(OfferOutcome::Latched);
        }

        let model = Arc::new(CameraModel::from_raw(matrix, distortion)?);

        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let outcome = match (self.policy, slot.is_some()) {
            (CalibrationPolicy::Latch, true) => return Ok(OfferOutcome::Latched),
            (_, false) => OfferOutcome::Accepted,
            (CalibrationPolicy::Continuous, true) => OfferOutcome::Replaced,
        };
        *slot = Some(model);
        if self.policy == CalibrationPolicy::Latch {
            self.latched.store(true, Ordering::Release);
        }
        drop(slot);

        log::info!(
            "calibration {} (distortion {} coefficients)",
            if outcome == OfferOutcome::Accepted { "received" } else { "updated" },
            distortion.len()
        );
        Ok(outcome)
    }

    pub fn offer_info(&self, info: &CameraInfo) -> Result<OfferOutcome, CalibrationError> {
        self.offer(&info.k, &info.d)
    }

    pub fn is_ready(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Current calibration; fails with [`CalibrationError::NotReady`] before
    /// the first accepted offer.
    pub fn current(&self) -> Result<Arc<CameraModel>, CalibrationError> {
        self.snapshot().ok_or(CalibrationError::NotReady)
    }

    /// Readiness and value in one read.
    pub fn snapshot(&self) -> Option<Arc<CameraModel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `false` once a latching store holds a calibration.
    pub fn wants_offers(&self) -> bool {
        !self.latched.load(Ordering::Acquire)
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(CalibrationPolicy::default())
    }
}
