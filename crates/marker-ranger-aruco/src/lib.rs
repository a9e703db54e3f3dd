//! ArUco dictionaries and full-frame marker detection.
//!
//! This crate covers:
//! - embedded built-in dictionaries (compiled into the binary),
//! - quad candidate extraction from a grayscale frame,
//! - bit decoding and dictionary matching with rotation recovery,
//! - searching several dictionaries in order ([`SearchStrategy`]).
//!
//! Pose estimation lives in `marker-ranger-pose`.

pub mod builtins;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod params;
mod quad;
pub mod render;
mod threshold;

pub use builtins::builtin_dictionary;
pub use detector::{
    detect_markers, DetectedMarker, DictionaryDetection, DictionaryError, DictionarySet,
    MarkerDetector, SearchStrategy,
};
pub use dictionary::Dictionary;
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use params::DetectorParams;
