use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::TempoError;

/// Lower bound of the estimator search space, in bpm.
pub const DEFAULT_MIN_TEMPO: f32 = 40.0;
/// Upper bound of the estimator search space, in bpm.
pub const DEFAULT_MAX_TEMPO: f32 = 150.0;
/// Readings at or above this are estimator noise; near-silence is known to
/// produce values around 738 bpm.
pub const TEMPO_SANITY_CEILING: f32 = 300.0;
/// Accurate-mode confidence at or below this is rejected. The scale is the
/// extractor's native one, roughly 0 to 5.3.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 2.5;
/// Relative tolerance when matching a candidate against double or half of
/// the current tempo.
pub const OCTAVE_TOLERANCE: f32 = 0.03;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Cheap extraction with no usable confidence signal.
    Fast,
    /// Slower extraction that reports a genuine confidence score.
    Accurate,
}

impl Algorithm {
    /// Fast-mode confidence is degenerate (always zero), so only accurate
    /// results are confidence-gated.
    pub fn reports_confidence(self) -> bool {
        matches!(self, Algorithm::Accurate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Fast => "fast",
            Algorithm::Accurate => "accurate",
        }
    }
}

impl FromStr for Algorithm {
    type Err = TempoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Algorithm::Fast),
            "accurate" => Ok(Algorithm::Accurate),
            other => Err(TempoError::config(format!("unknown algorithm {other:?}"))),
        }
    }
}

/// One tempo reading produced by an estimation job. Consumed once by the
/// control engine and discarded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TempoEstimate {
    pub bpm: f32,
    pub confidence: f32,
    pub algorithm: Algorithm,
    /// Epoch milliseconds at the moment the estimate was produced. Results
    /// may arrive out of order; recency is judged by this, not by arrival.
    pub measured_at_ms: u64,
}

impl TempoEstimate {
    pub fn new(bpm: f32, confidence: f32, algorithm: Algorithm) -> Result<Self, TempoError> {
        if !bpm.is_finite() {
            return Err(TempoError::estimation("estimated bpm is not finite"));
        }
        Ok(Self {
            bpm,
            confidence,
            algorithm,
            measured_at_ms: epoch_millis(),
        })
    }
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
