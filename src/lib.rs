//! # Dedupe
//!
//! An online entity-resolution engine. Records arrive one at a time; each is
//! compared with a small set of similar, previously seen records, the pairs are
//! classified, duplicate pairs are grouped into clusters by transitive closure,
//! and a cluster can be fused into a single representative record.
//!
//! The stages are independent and can be used on their own:
//!
//! - [`candidate_selection`]: online multi-pass sorted-neighborhood.
//! - [`similarity`] and [`classifier`]: composable measures and rule lists.
//! - [`clustering`]: incremental transitive closure over duplicate pairs,
//!   optionally refined into tighter clusters.
//! - [`fusion`]: conflict resolution over annotated values and field-wise merges.
//! - [`pipeline`]: the record-at-a-time drivers wiring everything together.

pub mod candidate_selection;
pub mod classifier;
pub mod clustering;
pub mod config;
pub mod dsu;
pub mod error;
pub mod fusion;
pub mod model;
pub mod pipeline;
pub mod similarity;
pub mod sorting_key;

// Re-export main types for convenience
pub use candidate_selection::{CandidateSelection, Pass, SortedNeighborhood};
pub use classifier::{Classifier, OracleClassifier, Rule, RuleBasedClassifier};
pub use clustering::{
    ClassifierRefinement, Cluster, ClusterSplitHandler, ClusterSplits, Clustering, ConsistentClustering,
    EdgePolicy, OracleClustering, RefineCluster, RefinedTransitiveClosure, TransitiveClosure,
};
pub use config::{ConfigError, ConfigOverrides, DedupeConfig};
pub use error::{DedupeError, ExceptionContext};
pub use fusion::{
    AnnotatedValue, ConflictResolution, ConflictResolutionFusion, FieldAccessor, FieldAccessors,
    FusedValue, Fusion, FusionContext, Merge, ResolutionTag, Source,
};
pub use model::{Candidate, Classification, ClassificationResult, ClassifiedCandidate};
pub use pipeline::{
    ClassificationFailurePolicy, FusingOnlineDeduplication, IncompleteFusionHandler,
    IncompleteFusions, OnlineDuplicateDetection, PossibleDuplicateHandler, PossibleDuplicates,
};
pub use similarity::{SimilarityContext, SimilarityMeasure, SimilarityMeasureExt};
pub use sorting_key::{CompositeValue, SortingKey};
