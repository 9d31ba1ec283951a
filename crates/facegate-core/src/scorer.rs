//! Turns raw similarity scores into bounded confidence percentages and a
//! match/mismatch verdict against a user threshold.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{SessionError, SessionResult};

pub const DEFAULT_SCORE_SCALE: f64 = 1.0;
pub const MIN_THRESHOLD: u8 = 20;
pub const MAX_THRESHOLD: u8 = 100;
pub const DEFAULT_THRESHOLD: u8 = 50;

/// Confidence a live sample must strictly exceed to count as a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Threshold(u8);

impl Threshold {
    pub fn new(value: u8) -> SessionResult<Self> {
        if (MIN_THRESHOLD..=MAX_THRESHOLD).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SessionError::Validation(format!(
                "threshold {value} outside {MIN_THRESHOLD}..={MAX_THRESHOLD}"
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl TryFrom<u8> for Threshold {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Threshold> for u8 {
    fn from(threshold: Threshold) -> Self {
        threshold.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Confidence(u8);

impl Confidence {
    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Match,
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub similarity: f64,
    pub confidence: Confidence,
    pub threshold: Threshold,
    pub classification: Classification,
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        self.classification == Classification::Match
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationScorer {
    scale: f64,
}

impl VerificationScorer {
    /// `scale` is the raw score that maps to 100%; it must be finite and positive.
    pub fn new(scale: f64) -> SessionResult<Self> {
        if scale.is_finite() && scale > 0.0 {
            Ok(Self { scale })
        } else {
            Err(SessionError::Validation(format!(
                "score scale must be a positive number, got {scale}"
            )))
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn confidence(&self, similarity: f64) -> Confidence {
        // NaN fails the comparison and lands on zero as well.
        if !(similarity > 0.0) {
            return Confidence(0);
        }
        let percent = (similarity / self.scale * 100.0).min(100.0);
        Confidence(percent.floor() as u8)
    }

    pub fn classify(&self, confidence: Confidence, threshold: Threshold) -> Classification {
        if confidence.0 > threshold.0 {
            Classification::Match
        } else {
            Classification::Mismatch
        }
    }

    pub fn evaluate(&self, similarity: f64, threshold: Threshold) -> Verdict {
        let confidence = self.confidence(similarity);
        Verdict {
            similarity,
            confidence,
            threshold,
            classification: self.classify(confidence, threshold),
        }
    }
}

impl Default for VerificationScorer {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCORE_SCALE,
        }
    }
}
