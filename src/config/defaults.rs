//! Default constants for dedupe configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Candidate Selection Defaults
// =============================================================================

/// Default sorted-neighborhood window size.
/// A new record is compared with up to half of this many neighbors on each
/// side of its key.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Smallest window that still yields a neighbor.
pub const MIN_WINDOW_SIZE: usize = 2;

// =============================================================================
// Clustering Defaults
// =============================================================================

/// First id handed out by the sequential cluster id generator.
pub const DEFAULT_FIRST_CLUSTER_ID: u64 = 0;

/// Largest component refined by trying every partition of its records.
/// Bigger components are refined greedily.
pub const DEFAULT_MAX_SMALL_CLUSTER_SIZE: usize = 10;

// =============================================================================
// Loading
// =============================================================================

/// Prefix of environment variables read by [`DedupeConfig::load`](super::DedupeConfig::load).
/// Nested keys are separated by a double underscore, e.g.
/// `DEDUPE_CANDIDATE_SELECTION__DEFAULT_WINDOW_SIZE`.
pub const ENV_PREFIX: &str = "DEDUPE_";

/// Separator between section and key in environment variable names.
pub const ENV_SPLIT: &str = "__";
