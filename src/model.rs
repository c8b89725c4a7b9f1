//! # Data Model
//!
//! Core value types flowing between the pipeline stages: candidate pairs,
//! classification verdicts, and classified candidates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered pair of records proposed for duplicate classification.
///
/// For online selection `record1` is the newly arrived record and `record2`
/// a previously indexed one. Equality is pair-wise and not symmetric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate<T> {
    pub record1: T,
    pub record2: T,
}

impl<T> Candidate<T> {
    pub fn new(record1: T, record2: T) -> Self {
        Self { record1, record2 }
    }

    /// The pair with both sides swapped.
    pub fn reversed(self) -> Self {
        Self {
            record1: self.record2,
            record2: self.record1,
        }
    }
}

impl<T: PartialEq> Candidate<T> {
    /// Order-insensitive pair equality.
    pub fn symmetric_eq(&self, other: &Self) -> bool {
        (self.record1 == other.record1 && self.record2 == other.record2)
            || (self.record1 == other.record2 && self.record2 == other.record1)
    }
}

/// Categorical duplicate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Duplicate,
    PossibleDuplicate,
    NonDuplicate,
    Unknown,
}

impl Classification {
    /// True for verdicts that need further resolution before being treated as certain.
    pub fn is_ambiguous(self) -> bool {
        matches!(self, Self::PossibleDuplicate | Self::Unknown)
    }

    pub fn is_unknown(self) -> bool {
        self == Self::Unknown
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Duplicate => "DUPLICATE",
            Self::PossibleDuplicate => "POSSIBLE_DUPLICATE",
            Self::NonDuplicate => "NON_DUPLICATE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// A verdict with its confidence and a human-readable explanation.
///
/// The confidence is informative only, not a calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: Classification,
    pub confidence: f64,
    pub explanation: String,
}

impl ClassificationResult {
    pub fn new(classification: Classification, confidence: f64) -> Self {
        Self {
            classification,
            confidence,
            explanation: String::new(),
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    pub fn duplicate(confidence: f64) -> Self {
        Self::new(Classification::Duplicate, confidence)
    }

    pub fn possible_duplicate(confidence: f64) -> Self {
        Self::new(Classification::PossibleDuplicate, confidence)
    }

    pub fn non_duplicate(confidence: f64) -> Self {
        Self::new(Classification::NonDuplicate, confidence)
    }

    /// Result used when no rule applied.
    pub fn unknown() -> Self {
        Self::new(Classification::Unknown, 0.0)
    }

    pub fn is_ambiguous(&self) -> bool {
        self.classification.is_ambiguous()
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:.3})", self.classification, self.confidence)?;
        if !self.explanation.is_empty() {
            write!(f, " [{}]", self.explanation)?;
        }
        Ok(())
    }
}

/// A candidate paired with the verdict the classifier produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedCandidate<T> {
    pub candidate: Candidate<T>,
    pub result: ClassificationResult,
}

impl<T> ClassifiedCandidate<T> {
    pub fn new(candidate: Candidate<T>, result: ClassificationResult) -> Self {
        Self { candidate, result }
    }

    pub fn classification(&self) -> Classification {
        self.result.classification
    }

    /// Same candidate with a replaced verdict.
    pub fn with_result(self, result: ClassificationResult) -> Self {
        Self {
            candidate: self.candidate,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguity() {
        assert!(!Classification::Duplicate.is_ambiguous());
        assert!(!Classification::NonDuplicate.is_ambiguous());
        assert!(Classification::PossibleDuplicate.is_ambiguous());
        assert!(Classification::Unknown.is_ambiguous());
    }

    #[test]
    fn test_candidate_equality_is_ordered() {
        let forward = Candidate::new(1, 2);
        let backward = Candidate::new(2, 1);
        assert_ne!(forward, backward);
        assert!(forward.symmetric_eq(&backward));
        assert_eq!(forward.clone().reversed(), backward);
    }

    #[test]
    fn test_classification_serde() {
        let json = serde_json::to_string(&Classification::PossibleDuplicate).unwrap();
        assert_eq!(json, "\"POSSIBLE_DUPLICATE\"");

        let parsed: Classification = serde_json::from_str("\"NON_DUPLICATE\"").unwrap();
        assert_eq!(parsed, Classification::NonDuplicate);
    }

    #[test]
    fn test_result_display() {
        let result = ClassificationResult::duplicate(0.5).with_explanation("name");
        assert_eq!(result.to_string(), "DUPLICATE(0.500) [name]");
        assert_eq!(ClassificationResult::unknown().to_string(), "UNKNOWN(0.000)");
    }
}
