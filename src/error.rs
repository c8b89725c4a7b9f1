//! # Errors
//!
//! Error taxonomy for the deduplication engine, plus the capture context used
//! to evaluate caller-supplied rules and resolution strategies without letting
//! one failure abort its siblings.

use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Errors raised by the deduplication engine.
#[derive(Debug, Error)]
pub enum DedupeError {
    /// A sorted-neighborhood pass was configured with a window below 2.
    #[error("window size is < 2: {window_size}")]
    InvalidWindowSize { window_size: usize },

    /// No accessor of the requested type is registered under this name.
    #[error("no accessor registered for attribute `{name}` with the requested field type")]
    MissingAccessor { name: String },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {message}")]
    InvalidConfig { message: String },

    /// One or more rules failed while classifying a candidate.
    ///
    /// The first cause is the primary one, the rest are suppressed causes.
    #[error("could not classify candidate {candidate}: {}", summarize(.causes))]
    Classification {
        candidate: String,
        causes: Vec<anyhow::Error>,
    },

    /// A field kept more than one distinct value after its resolution chain.
    #[error("could not fully resolve `{field}`; remaining values {values:?}")]
    UnresolvedConflict { field: String, values: Vec<String> },

    /// `min`/`max` saw values without a natural order between them.
    #[error("values are not comparable: {left} vs {right}")]
    IncomparableValues { left: String, right: String },

    /// The root resolution of a fusion produced no value.
    #[error("could not resolve conflict in {values}: {}", summarize(.causes))]
    Fusion {
        values: String,
        causes: Vec<anyhow::Error>,
    },

    #[error("cannot fuse an empty cluster")]
    EmptyCluster,

    /// A cluster handed back to the clustering is not the live cluster of its elements.
    #[error("provided cluster is not known: {cluster}")]
    UnknownCluster { cluster: String },

    /// A cluster id generator has no fresh ids left.
    #[error("cluster id generator is exhausted after {last}")]
    ClusterIdsExhausted { last: String },

    #[error("tried to retrieve resolution tag `{tag}` without it being stored")]
    MissingResolutionTag { tag: String },
}

impl DedupeError {
    /// Aggregate the errors captured while classifying `candidate`.
    pub fn classification(candidate: impl fmt::Debug, causes: Vec<anyhow::Error>) -> Self {
        Self::Classification {
            candidate: format!("{candidate:?}"),
            causes,
        }
    }

    /// Aggregate the errors captured while fusing `values`.
    pub fn fusion(values: impl fmt::Debug, causes: Vec<anyhow::Error>) -> Self {
        Self::Fusion {
            values: format!("{values:?}"),
            causes,
        }
    }

    /// All underlying causes of an aggregate error; empty for other variants.
    pub fn causes(&self) -> &[anyhow::Error] {
        match self {
            Self::Classification { causes, .. } | Self::Fusion { causes, .. } => causes,
            _ => &[],
        }
    }

    /// The primary cause of an aggregate error.
    pub fn primary_cause(&self) -> Option<&anyhow::Error> {
        self.causes().first()
    }

    /// Causes attached after the primary one.
    pub fn suppressed(&self) -> &[anyhow::Error] {
        self.causes().get(1..).unwrap_or(&[])
    }
}

fn summarize(causes: &[anyhow::Error]) -> String {
    match causes {
        [] => "no cause recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (+{} suppressed)", rest.len()),
    }
}

/// Collects errors from isolated evaluations so that processing can continue
/// and fail late with every cause at hand.
#[derive(Debug, Default)]
pub struct ExceptionContext {
    exceptions: Vec<anyhow::Error>,
}

impl ExceptionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f`, capturing its error instead of propagating it.
    pub fn safe_execute<R>(&mut self, f: impl FnOnce() -> anyhow::Result<R>) -> Option<R> {
        self.capture(f())
    }

    /// Capture the error of an already evaluated result.
    pub fn capture<R>(&mut self, result: anyhow::Result<R>) -> Option<R> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.record(error);
                None
            }
        }
    }

    pub fn record(&mut self, error: anyhow::Error) {
        debug!(error = %error, "suppressing exception");
        self.exceptions.push(error);
    }

    pub fn exceptions(&self) -> &[anyhow::Error] {
        &self.exceptions
    }

    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exceptions.len()
    }

    pub fn take_exceptions(&mut self) -> Vec<anyhow::Error> {
        std::mem::take(&mut self.exceptions)
    }

    pub fn into_exceptions(self) -> Vec<anyhow::Error> {
        self.exceptions
    }
}
