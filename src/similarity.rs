//! # Similarity Measures
//!
//! Pairwise similarity functions used to build classifier rules. A measure
//! returns a score in `[0, 1]` by convention, `NaN` when it cannot say
//! anything about the pair, or an error that the caller captures.

use crate::error::ExceptionContext;
use std::borrow::Borrow;

/// The score signalling that a measure does not apply to a pair.
pub const UNKNOWN: f64 = f64::NAN;

pub fn is_unknown(score: f64) -> bool {
    score.is_nan()
}

/// Per-classification context: captured errors and the score used when a
/// compared attribute is missing on either side.
#[derive(Debug)]
pub struct SimilarityContext {
    exceptions: ExceptionContext,
    missing_similarity: f64,
}

impl SimilarityContext {
    pub fn new() -> Self {
        Self {
            exceptions: ExceptionContext::new(),
            missing_similarity: UNKNOWN,
        }
    }

    /// Score reported when a transformed attribute is absent.
    pub fn with_missing_similarity(mut self, score: f64) -> Self {
        self.missing_similarity = score;
        self
    }

    pub fn similarity_for_missing(&self) -> f64 {
        self.missing_similarity
    }

    pub fn exceptions(&self) -> &ExceptionContext {
        &self.exceptions
    }

    pub fn exceptions_mut(&mut self) -> &mut ExceptionContext {
        &mut self.exceptions
    }

    pub fn into_exceptions(self) -> Vec<anyhow::Error> {
        self.exceptions.into_exceptions()
    }
}

impl Default for SimilarityContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A pairwise similarity function.
pub trait SimilarityMeasure<T: ?Sized>: Send + Sync {
    fn similarity(&self, left: &T, right: &T, context: &mut SimilarityContext) -> anyhow::Result<f64>;
}

impl<T, F> SimilarityMeasure<T> for F
where
    T: ?Sized,
    F: Fn(&T, &T, &mut SimilarityContext) -> anyhow::Result<f64> + Send + Sync,
{
    fn similarity(&self, left: &T, right: &T, context: &mut SimilarityContext) -> anyhow::Result<f64> {
        self(left, right, context)
    }
}

/// Type-erased measure, used to mix differently typed measures in one list.
pub struct BoxedMeasure<T: ?Sized>(Box<dyn SimilarityMeasure<T>>);

impl<T: ?Sized> BoxedMeasure<T> {
    pub fn new<M: SimilarityMeasure<T> + 'static>(measure: M) -> Self {
        Self(Box::new(measure))
    }
}

impl<T: ?Sized> SimilarityMeasure<T> for BoxedMeasure<T> {
    fn similarity(&self, left: &T, right: &T, context: &mut SimilarityContext) -> anyhow::Result<f64> {
        self.0.similarity(left, right, context)
    }
}

/// Combinators available on every measure.
pub trait SimilarityMeasureExt<T: ?Sized>: SimilarityMeasure<T> + Sized {
    /// Compare a projection of the records; an absent projection on either
    /// side yields [`SimilarityContext::similarity_for_missing`].
    fn of<O, V, F>(self, transform: F) -> impl SimilarityMeasure<O>
    where
        O: ?Sized,
        V: Borrow<T>,
        F: Fn(&O) -> Option<V> + Send + Sync,
    {
        move |left: &O, right: &O, context: &mut SimilarityContext| -> anyhow::Result<f64> {
            match (transform(left), transform(right)) {
                (Some(left), Some(right)) => self.similarity(left.borrow(), right.borrow(), context),
                _ => Ok(context.similarity_for_missing()),
            }
        }
    }

    /// Scores below `threshold` become 0.
    fn cutoff(self, threshold: f64) -> impl SimilarityMeasure<T> {
        move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
            let similarity = self.similarity(left, right, context)?;
            Ok(if similarity < threshold { 0.0 } else { similarity })
        }
    }

    /// Rescale `(min_exclusive, 1]` to `(0, 1]`; everything else becomes 0.
    fn scale_with_threshold(self, min_exclusive: f64) -> impl SimilarityMeasure<T> {
        move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
            let similarity = self.similarity(left, right, context)?;
            Ok(if similarity > min_exclusive {
                (similarity - min_exclusive) / (1.0 - min_exclusive)
            } else {
                0.0
            })
        }
    }

    /// Turn scores matching `predicate` into [`UNKNOWN`].
    fn unknown_if<P>(self, predicate: P) -> impl SimilarityMeasure<T>
    where
        P: Fn(f64) -> bool + Send + Sync,
    {
        move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
            let similarity = self.similarity(left, right, context)?;
            Ok(if predicate(similarity) { UNKNOWN } else { similarity })
        }
    }

    /// `1 - similarity`.
    fn negate(self) -> impl SimilarityMeasure<T> {
        move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
            Ok(1.0 - self.similarity(left, right, context)?)
        }
    }

    /// Sign of the similarity; unknown stays unknown.
    fn binarize(self) -> impl SimilarityMeasure<T> {
        move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
            let similarity = self.similarity(left, right, context)?;
            Ok(if similarity.is_nan() || similarity == 0.0 {
                similarity
            } else {
                similarity.signum()
            })
        }
    }

    fn boxed(self) -> BoxedMeasure<T>
    where
        Self: 'static,
    {
        BoxedMeasure::new(self)
    }
}

impl<T: ?Sized, M: SimilarityMeasure<T>> SimilarityMeasureExt<T> for M {}

/// 1 if both sides are equal, 0 otherwise.
pub fn equality<T: PartialEq + ?Sized>() -> impl SimilarityMeasure<T> {
    |left: &T, right: &T, _: &mut SimilarityContext| -> anyhow::Result<f64> {
        Ok(if left == right { 1.0 } else { 0.0 })
    }
}

/// Normalized Levenshtein similarity.
pub fn levenshtein() -> impl SimilarityMeasure<str> {
    |left: &str, right: &str, _: &mut SimilarityContext| -> anyhow::Result<f64> {
        Ok(strsim::normalized_levenshtein(left, right))
    }
}

/// Jaro-Winkler similarity, boosting common prefixes.
pub fn jaro_winkler() -> impl SimilarityMeasure<str> {
    |left: &str, right: &str, _: &mut SimilarityContext| -> anyhow::Result<f64> {
        Ok(strsim::jaro_winkler(left, right))
    }
}

/// `max(0, 1 - distance / max_distance)`.
///
/// A `max_distance` of zero tolerates no difference at all: only a distance of
/// zero scores 1. A negative or NaN `max_distance` fails every evaluation.
pub fn max_difference<T, D>(max_distance: f64, distance: D) -> impl SimilarityMeasure<T>
where
    T: ?Sized,
    D: Fn(&T, &T) -> f64 + Send + Sync,
{
    move |left: &T, right: &T, _: &mut SimilarityContext| -> anyhow::Result<f64> {
        anyhow::ensure!(max_distance >= 0.0, "max_distance must not be negative: {max_distance}");
        let difference = distance(left, right).abs();
        if max_distance == 0.0 {
            return Ok(if difference == 0.0 { 1.0 } else { 0.0 });
        }
        Ok((1.0 - difference / max_distance).max(0.0))
    }
}

/// Highest known score of the given measures, unknown if none applies.
pub fn max_of<T: ?Sized + 'static>(measures: Vec<BoxedMeasure<T>>) -> impl SimilarityMeasure<T> {
    move |left: &T, right: &T, context: &mut SimilarityContext| -> anyhow::Result<f64> {
        let mut best = UNKNOWN;
        for measure in &measures {
            let similarity = measure.similarity(left, right, context)?;
            if !similarity.is_nan() && (best.is_nan() || similarity > best) {
                best = similarity;
            }
        }
        Ok(best)
    }
}

/// Weighted average over the measures that produce a known score.
pub struct WeightedAverage<T: ?Sized> {
    weighted: Vec<(f64, BoxedMeasure<T>)>,
}

impl<T: ?Sized + 'static> WeightedAverage<T> {
    pub fn builder() -> WeightedAverageBuilder<T> {
        WeightedAverageBuilder {
            weighted: Vec::new(),
        }
    }
}

impl<T: ?Sized> SimilarityMeasure<T> for WeightedAverage<T> {
    fn similarity(&self, left: &T, right: &T, context: &mut SimilarityContext) -> anyhow::Result<f64> {
        let mut total_weight = 0.0;
        let mut weighted_sum = 0.0;
        for (weight, measure) in &self.weighted {
            let similarity = measure.similarity(left, right, context)?;
            if similarity.is_nan() {
                continue;
            }
            total_weight += weight;
            weighted_sum += weight * similarity;
        }
        Ok(if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            UNKNOWN
        })
    }
}

pub struct WeightedAverageBuilder<T: ?Sized> {
    weighted: Vec<(f64, BoxedMeasure<T>)>,
}

impl<T: ?Sized + 'static> WeightedAverageBuilder<T> {
    pub fn add<M>(mut self, weight: f64, measure: M) -> Self
    where
        M: SimilarityMeasure<T> + 'static,
    {
        self.weighted.push((weight, BoxedMeasure::new(measure)));
        self
    }

    pub fn build(self) -> WeightedAverage<T> {
        WeightedAverage {
            weighted: self.weighted,
        }
    }
}

/// Convenience entry point mirroring [`WeightedAverage::builder`].
pub fn weighted_average<T: ?Sized + 'static>() -> WeightedAverageBuilder<T> {
    WeightedAverage::builder()
}
