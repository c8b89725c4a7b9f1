//! # Online Deduplication Pipeline
//!
//! Wires candidate selection, classification, clustering and fusion into a
//! record-at-a-time pipeline. Each call handles one new record against the
//! state accumulated from earlier records.

use crate::candidate_selection::CandidateSelection;
use crate::classifier::Classifier;
use crate::clustering::{Cluster, Clustering};
use crate::config::DedupeConfig;
use crate::error::DedupeError;
use crate::fusion::{FusedValue, Fusion};
use crate::model::{Classification, ClassificationResult, ClassifiedCandidate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument, warn};

/// What happens when the classifier reports an error for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationFailurePolicy {
    /// Continue with an `Unknown` verdict carrying the error text.
    #[default]
    TreatAsUnknown,
    /// Abort the record with the classification error.
    Strict,
}

/// Decides what to do with a possible duplicate before clustering.
pub trait PossibleDuplicateHandler<T> {
    /// `None` drops the pair.
    fn handle(&self, candidate: ClassifiedCandidate<T>) -> Option<ClassifiedCandidate<T>>;
}

impl<T, F> PossibleDuplicateHandler<T> for F
where
    F: Fn(ClassifiedCandidate<T>) -> Option<ClassifiedCandidate<T>>,
{
    fn handle(&self, candidate: ClassifiedCandidate<T>) -> Option<ClassifiedCandidate<T>> {
        self(candidate)
    }
}

/// Stock possible-duplicate handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PossibleDuplicates {
    /// Pass the pair on unchanged.
    #[default]
    Keep,
    /// Drop the pair.
    DropPair,
    PromoteToDuplicate,
    DemoteToNonDuplicate,
    MarkUnknown,
}

impl<T> PossibleDuplicateHandler<T> for PossibleDuplicates {
    fn handle(&self, candidate: ClassifiedCandidate<T>) -> Option<ClassifiedCandidate<T>> {
        let result = match self {
            Self::Keep => return Some(candidate),
            Self::DropPair => return None,
            Self::PromoteToDuplicate => {
                ClassificationResult::duplicate(0.0).with_explanation("Promoted possible duplicate")
            }
            Self::DemoteToNonDuplicate => {
                ClassificationResult::non_duplicate(0.0).with_explanation("Demoted possible duplicate")
            }
            Self::MarkUnknown => ClassificationResult::unknown().with_explanation("Unresolved possible duplicate"),
        };
        Some(candidate.with_result(result))
    }
}

/// Decides what to return when a fusion captured errors.
pub trait IncompleteFusionHandler<C, T> {
    /// `None` falls back to the original record.
    fn handle(&self, fused: FusedValue<C, T>) -> Option<T>;
}

impl<C, T, F> IncompleteFusionHandler<C, T> for F
where
    F: Fn(FusedValue<C, T>) -> Option<T>,
{
    fn handle(&self, fused: FusedValue<C, T>) -> Option<T> {
        self(fused)
    }
}

/// Stock incomplete-fusion handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncompleteFusions {
    /// Keep the original record.
    #[default]
    DontFuse,
    /// Use the partially fused value.
    AcceptPartial,
}

impl<C, T> IncompleteFusionHandler<C, T> for IncompleteFusions {
    fn handle(&self, fused: FusedValue<C, T>) -> Option<T> {
        match self {
            Self::DontFuse => None,
            Self::AcceptPartial => Some(fused.value),
        }
    }
}

type BoxedSelection<T> = Box<dyn CandidateSelection<T> + Send>;
type BoxedClassifier<T> = Box<dyn Classifier<T> + Send + Sync>;
type BoxedClustering<C, T> = Box<dyn Clustering<C, T> + Send>;
type BoxedPossibleHandler<T> = Box<dyn PossibleDuplicateHandler<T> + Send + Sync>;

/// Detects the duplicate clusters a new record belongs to.
pub struct OnlineDuplicateDetection<C, T> {
    candidate_selection: BoxedSelection<T>,
    classifier: BoxedClassifier<T>,
    clustering: BoxedClustering<C, T>,
    possible_duplicate_handler: BoxedPossibleHandler<T>,
    failure_policy: ClassificationFailurePolicy,
}

impl<C, T> OnlineDuplicateDetection<C, T>
where
    T: fmt::Debug + 'static,
    C: 'static,
{
    pub fn new<S, K, L>(candidate_selection: S, classifier: K, clustering: L) -> Self
    where
        S: CandidateSelection<T> + Send + 'static,
        K: Classifier<T> + Send + Sync + 'static,
        L: Clustering<C, T> + Send + 'static,
    {
        Self {
            candidate_selection: Box::new(candidate_selection),
            classifier: Box::new(classifier),
            clustering: Box::new(clustering),
            possible_duplicate_handler: Box::new(PossibleDuplicates::Keep),
            failure_policy: ClassificationFailurePolicy::default(),
        }
    }

    pub fn with_possible_duplicate_handler<H>(mut self, handler: H) -> Self
    where
        H: PossibleDuplicateHandler<T> + Send + Sync + 'static,
    {
        self.possible_duplicate_handler = Box::new(handler);
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: ClassificationFailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Apply the pipeline-level settings of `config`.
    pub fn with_config(self, config: &DedupeConfig) -> Self {
        self.with_failure_policy(config.classifier.failure_policy)
    }

    pub fn failure_policy(&self) -> ClassificationFailurePolicy {
        self.failure_policy
    }

    /// Select, classify and cluster one new record.
    ///
    /// The first returned cluster is the one containing `new_record`, if any.
    #[instrument(skip_all)]
    pub fn detect_duplicates(&mut self, new_record: &T) -> Result<Vec<Cluster<C, T>>, DedupeError> {
        let candidates = self.candidate_selection.select_candidates(new_record);
        let candidate_count = candidates.len();

        let mut classified = Vec::with_capacity(candidate_count);
        for candidate in candidates {
            let result = match self.classifier.classify(&candidate) {
                Ok(result) => result,
                Err(error) if self.failure_policy == ClassificationFailurePolicy::Strict => {
                    return Err(error);
                }
                Err(error) => {
                    warn!(error = %error, "classification failed, treating candidate as unknown");
                    ClassificationResult::unknown().with_explanation(error.to_string())
                }
            };
            let classified_candidate = ClassifiedCandidate::new(candidate, result);
            if classified_candidate.classification() == Classification::PossibleDuplicate {
                if let Some(handled) = self.possible_duplicate_handler.handle(classified_candidate) {
                    classified.push(handled);
                }
            } else {
                classified.push(classified_candidate);
            }
        }

        let clusters = self.clustering.cluster(classified)?;
        debug!(candidates = candidate_count, clusters = clusters.len(), "record processed");
        Ok(clusters)
    }
}

impl<C, T> fmt::Debug for OnlineDuplicateDetection<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnlineDuplicateDetection")
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

type BoxedFusion<C, T> = Box<dyn Fusion<C, T> + Send + Sync>;
type BoxedFusionHandler<C, T> = Box<dyn IncompleteFusionHandler<C, T> + Send + Sync>;

/// Replaces every new record with the fused representative of its cluster.
pub struct FusingOnlineDeduplication<C, T> {
    detection: OnlineDuplicateDetection<C, T>,
    fusion: BoxedFusion<C, T>,
    incomplete_fusion_handler: BoxedFusionHandler<C, T>,
}

impl<C, T> FusingOnlineDeduplication<C, T>
where
    T: Clone + PartialEq + fmt::Debug + 'static,
    C: fmt::Debug + 'static,
{
    pub fn new<F>(detection: OnlineDuplicateDetection<C, T>, fusion: F) -> Self
    where
        F: Fusion<C, T> + Send + Sync + 'static,
    {
        Self {
            detection,
            fusion: Box::new(fusion),
            incomplete_fusion_handler: Box::new(IncompleteFusions::DontFuse),
        }
    }

    pub fn with_incomplete_fusion_handler<H>(mut self, handler: H) -> Self
    where
        H: IncompleteFusionHandler<C, T> + Send + Sync + 'static,
    {
        self.incomplete_fusion_handler = Box::new(handler);
        self
    }

    pub fn detection(&self) -> &OnlineDuplicateDetection<C, T> {
        &self.detection
    }

    pub fn detection_mut(&mut self) -> &mut OnlineDuplicateDetection<C, T> {
        &mut self.detection
    }

    /// The fused representative of the cluster `new_record` joined, or the
    /// record itself if it joined none.
    #[instrument(skip_all)]
    pub fn deduplicate(&mut self, new_record: T) -> Result<T, DedupeError> {
        let clusters = self.detection.detect_duplicates(&new_record)?;
        let Some(cluster) = clusters.into_iter().find(|cluster| cluster.contains(&new_record)) else {
            return Ok(new_record);
        };

        let cluster_id = format!("{:?}", cluster.id);
        match self.fusion.fuse(cluster) {
            Ok(fused) if fused.is_complete() => Ok(fused.value),
            Ok(fused) => {
                warn!(
                    cluster = %cluster_id,
                    exceptions = fused.exceptions.len(),
                    "incomplete fusion"
                );
                Ok(self
                    .incomplete_fusion_handler
                    .handle(fused)
                    .unwrap_or(new_record))
            }
            Err(error) => {
                warn!(cluster = %cluster_id, error = %error, "fusion failed, keeping original record");
                Ok(new_record)
            }
        }
    }

    /// Deduplicate records in arrival order.
    pub fn deduplicate_all<I>(&mut self, records: I) -> Result<Vec<T>, DedupeError>
    where
        I: IntoIterator<Item = T>,
    {
        records
            .into_iter()
            .map(|record| self.deduplicate(record))
            .collect()
    }
}

impl<C, T> fmt::Debug for FusingOnlineDeduplication<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusingOnlineDeduplication")
            .field("detection", &self.detection)
            .finish_non_exhaustive()
    }
}
