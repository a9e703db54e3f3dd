//! Full-frame marker detection over one or more dictionaries.

use crate::decode::{decode_quad, CellSampler, DecodedQuad};
use crate::quad::{find_candidates, QuadCandidate};
use crate::{builtin_dictionary, Dictionary, DetectorParams, Matcher};
use marker_ranger_core::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors raised while assembling a dictionary set.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("unknown dictionary {0:?}")]
    Unknown(String),
    #[error("at least one dictionary is required")]
    Empty,
}

/// How multiple dictionaries are searched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Stop at the first dictionary that yields any marker.
    #[default]
    FirstHit,
    /// Search every dictionary and concatenate the results.
    Union,
}

/// Ordered, non-empty list of dictionaries.
#[derive(Clone, Debug, PartialEq)]
pub struct DictionarySet {
    dictionaries: Vec<Dictionary>,
}

impl DictionarySet {
    pub fn new(dictionaries: Vec<Dictionary>) -> Result<Self, DictionaryError> {
        if dictionaries.is_empty() {
            return Err(DictionaryError::Empty);
        }
        Ok(Self { dictionaries })
    }

    pub fn single(dictionary: Dictionary) -> Self {
        Self {
            dictionaries: vec![dictionary],
        }
    }

    /// Resolve built-in dictionaries by name, keeping the given order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, DictionaryError> {
        let dictionaries = names
            .iter()
            .map(|n| {
                builtin_dictionary(n.as_ref())
                    .ok_or_else(|| DictionaryError::Unknown(n.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(dictionaries)
    }

    pub fn len(&self) -> usize {
        self.dictionaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Dictionary> {
        self.dictionaries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dictionary> {
        self.dictionaries.iter()
    }
}

/// One decoded marker in image coordinates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedMarker {
    pub id: u32,
    /// Top-left, top-right, bottom-right, bottom-left of the marker itself,
    /// whatever its in-image rotation.
    pub corners: [Point2<f32>; 4],
    /// Bits corrected by the dictionary match.
    pub hamming: u8,
    /// Border cells that read with the wrong colour.
    pub border_errors: u32,
    /// White-bordered marker.
    pub inverted: bool,
}

impl DetectedMarker {
    pub fn center(&self) -> Point2<f32> {
        let sum = self
            .corners
            .iter()
            .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
        Point2::from(sum / 4.0)
    }

    pub fn perimeter(&self) -> f32 {
        (0..4)
            .map(|i| (self.corners[(i + 1) % 4] - self.corners[i]).norm())
            .sum()
    }

    /// Point-in-convex-quad test (inclusive).
    pub fn contains(&self, p: Point2<f32>) -> bool {
        let mut sign = 0.0f32;
        for i in 0..4 {
            let (a, b) = (self.corners[i], self.corners[(i + 1) % 4]);
            let c = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
            if c == 0.0 {
                continue;
            }
            if sign == 0.0 {
                sign = c.signum();
            } else if c.signum() != sign {
                return false;
            }
        }
        true
    }

    fn from_decoded(d: &DecodedQuad) -> Self {
        Self {
            id: d.id,
            corners: d.corners.map(|p| Point2::new(p.x as f32, p.y as f32)),
            hamming: d.hamming,
            border_errors: d.border_errors,
            inverted: d.inverted,
        }
    }
}

/// A marker tagged with the dictionary that decoded it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DictionaryDetection {
    /// Position of the dictionary in the [`DictionarySet`].
    pub dictionary_index: usize,
    pub dictionary: &'static str,
    pub marker: DetectedMarker,
}

struct DictionaryPass {
    dictionary: Dictionary,
    matcher: Matcher,
    sampler: Option<CellSampler>,
}

/// Reusable detector; candidates are extracted once per frame and decoded
/// against each dictionary in order.
pub struct MarkerDetector {
    params: DetectorParams,
    passes: Vec<DictionaryPass>,
    strategy: SearchStrategy,
    dedup_by_id: bool,
}

impl MarkerDetector {
    pub fn new(dictionaries: &DictionarySet, params: DetectorParams) -> Self {
        let passes = dictionaries
            .iter()
            .map(|&dictionary| {
                let budget = (dictionary.max_correction_bits as f64 * params.error_correction_rate)
                    .floor()
                    .max(0.0) as u8;
                DictionaryPass {
                    dictionary,
                    matcher: Matcher::new(dictionary, budget),
                    sampler: CellSampler::new(
                        dictionary.marker_size,
                        params.marker_border_bits,
                        params.perspective_remove_ignored_margin_per_cell,
                    ),
                }
            })
            .collect();

        Self {
            params,
            passes,
            strategy: SearchStrategy::default(),
            dedup_by_id: false,
        }
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// In union mode, drop a marker when an earlier dictionary already
    /// reported the same id.
    pub fn with_dedup_by_id(mut self, dedup: bool) -> Self {
        self.dedup_by_id = dedup;
        self
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    /// Detect markers; an empty result means nothing was found.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = img.width, height = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> Vec<DictionaryDetection> {
        if img.width == 0 || img.height == 0 || img.data.len() < img.width * img.height {
            return Vec::new();
        }

        let candidates = find_candidates(img, &self.params);
        log::debug!("{} quad candidates", candidates.len());

        let mut out: Vec<DictionaryDetection> = Vec::new();
        for (index, pass) in self.passes.iter().enumerate() {
            let found = self.decode_pass(img, &candidates, pass);
            log::debug!("{}: {} markers", pass.dictionary.name, found.len());

            for marker in found {
                if self.dedup_by_id
                    && out
                        .iter()
                        .any(|d| d.dictionary_index < index && d.marker.id == marker.id)
                {
                    continue;
                }
                out.push(DictionaryDetection {
                    dictionary_index: index,
                    dictionary: pass.dictionary.name,
                    marker,
                });
            }

            if self.strategy == SearchStrategy::FirstHit && !out.is_empty() {
                break;
            }
        }
        out
    }

    fn decode_pass(
        &self,
        img: &GrayImageView<'_>,
        candidates: &[QuadCandidate],
        pass: &DictionaryPass,
    ) -> Vec<DetectedMarker> {
        let Some(sampler) = pass.sampler.as_ref() else {
            return Vec::new();
        };

        let mut found: Vec<DetectedMarker> = candidates
            .iter()
            .filter_map(|c| {
                decode_quad(img, &c.corners, c.inverted, sampler, &pass.matcher, &self.params)
            })
            .map(|d| DetectedMarker::from_decoded(&d))
            .collect();

        // A marker whose centre lies inside a larger one is a false hit on
        // the larger marker's bit pattern.
        found.sort_by(|a, b| b.perimeter().total_cmp(&a.perimeter()));
        let mut kept: Vec<DetectedMarker> = Vec::with_capacity(found.len());
        for m in found {
            if !kept.iter().any(|k| k.contains(m.center())) {
                kept.push(m);
            }
        }
        // Report in reading order.
        kept.sort_by(|a, b| {
            let (ca, cb) = (a.center(), b.center());
            ca.y.total_cmp(&cb.y).then(ca.x.total_cmp(&cb.x))
        });
        kept
    }
}

/// One-shot convenience wrapper around [`MarkerDetector`].
pub fn detect_markers(
    img: &GrayImageView<'_>,
    dictionaries: &DictionarySet,
    params: &DetectorParams,
    strategy: SearchStrategy,
) -> Vec<DictionaryDetection> {
    MarkerDetector::new(dictionaries, params.clone())
        .with_strategy(strategy)
        .detect(img)
}
