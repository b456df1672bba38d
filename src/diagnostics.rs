// Structured warnings for degraded-but-successful results.
//
// Stages that fall back (skip a segment, drop a reference, return default
// bands) record a `Warning` instead of failing. Each warning is also logged.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Warning {
    /// A sweep period did not fit inside the recording.
    SegmentSkipped { index: usize, start: i64 },
    /// No sweep period fit; the averaged buffer is all zeros.
    NoSegmentsExtracted { expected: usize },
    /// Reference response was not usable for normalization.
    ReferenceRejected { reason: String },
    /// Analyzer received an empty time-domain buffer.
    EmptyInput,
    /// Smoothing could not run; the unsmoothed data was used.
    SmoothingSkipped { reason: String },
    /// Too few points in the correction window.
    InsufficientData { points: usize, required: usize },
    /// Optimizer failed; the initial guess was used instead.
    OptimizerFallback { reason: String },
    /// A band with non-finite or non-positive parameters was dropped.
    InvalidBandDiscarded { index: usize },
    /// Neutral bands were appended to reach the requested count.
    DefaultBandsAdded { count: usize },
    /// The whole fit was replaced by neutral default bands.
    DefaultBands { reason: String },
    /// Two responses being combined do not share a frequency grid.
    GridMismatch { index: usize, expected: f64, found: f64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::SegmentSkipped { index, start } => {
                write!(f, "segment {} (start {}) exceeds the recording, skipped", index + 1, start)
            }
            Warning::NoSegmentsExtracted { expected } => {
                write!(f, "no segments could be extracted ({expected} expected)")
            }
            Warning::ReferenceRejected { reason } => {
                write!(f, "reference response rejected: {reason}")
            }
            Warning::EmptyInput => write!(f, "empty time-domain input"),
            Warning::SmoothingSkipped { reason } => write!(f, "smoothing skipped: {reason}"),
            Warning::InsufficientData { points, required } => {
                write!(f, "not enough data points in range: {points} < {required}")
            }
            Warning::OptimizerFallback { reason } => {
                write!(f, "optimization failed, using initial guess: {reason}")
            }
            Warning::InvalidBandDiscarded { index } => {
                write!(f, "band {} has invalid parameters, discarded", index + 1)
            }
            Warning::DefaultBandsAdded { count } => write!(f, "added {count} default bands"),
            Warning::DefaultBands { reason } => write!(f, "using default bands: {reason}"),
            Warning::GridMismatch { index, expected, found } => {
                write!(f, "frequency mismatch at index {index}: expected {expected}, found {found}")
            }
        }
    }
}

/// Collects warnings for one operation.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// A result value together with the warnings raised while producing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosed<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Diagnosed<T> {
    pub fn new(value: T, diagnostics: Diagnostics) -> Self {
        Self {
            value,
            warnings: diagnostics.into_warnings(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let w = Warning::SegmentSkipped { index: 2, start: -10 };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "segmentSkipped");
        assert_eq!(json["start"], -10);
    }

    #[test]
    fn test_diagnosed_collects_warnings() {
        let mut diag = Diagnostics::new();
        assert!(diag.is_empty());
        diag.push(Warning::EmptyInput);
        let d = Diagnosed::new(1.0_f64, diag);
        assert!(!d.is_clean());
        assert_eq!(d.warnings, vec![Warning::EmptyInput]);
    }
}
