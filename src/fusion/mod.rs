//! # Fusion
//!
//! Turns a cluster of duplicates into one representative record. Every
//! record is annotated with its [`Source`] and a timestamp, then handed to a
//! root [`ConflictResolution`], usually a [`Merge`] that resolves each field
//! with its own chain of strategies from [`resolutions`].
//!
//! Fusion fails late: field-level failures are captured in the
//! [`FusionContext`] and returned with the fused value, so callers decide
//! whether a partial result is acceptable.

mod merge;
pub mod resolutions;

pub use merge::{FieldAccessor, FieldAccessors, FieldMergeBuilder, Merge, MergeBuilder};

use crate::clustering::Cluster;
use crate::error::{DedupeError, ExceptionContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use time::OffsetDateTime;

/// Where a value came from and how much it is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub weight: f64,
}

impl Source {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }

    /// Source of values computed during fusion.
    pub fn calculated() -> Self {
        Self::new("calculated", 1.0)
    }

    /// Source of records without a source name.
    pub fn unknown() -> Self {
        Self::new("Unknown", 1.0)
    }
}

/// A value with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedValue<V> {
    pub value: V,
    pub source: Source,
    pub timestamp: OffsetDateTime,
}

impl<V> AnnotatedValue<V> {
    pub fn new(value: V, source: Source, timestamp: OffsetDateTime) -> Self {
        Self {
            value,
            source,
            timestamp,
        }
    }

    /// A value produced by a resolution from `inputs` rather than observed in
    /// a record. It carries the latest input timestamp, or the Unix epoch if
    /// there are no inputs.
    pub fn calculated<W>(value: V, inputs: &[AnnotatedValue<W>]) -> Self {
        let timestamp = inputs
            .iter()
            .map(|input| input.timestamp)
            .max()
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Self::new(value, Source::calculated(), timestamp)
    }

    /// Replace the value, keeping source and timestamp.
    pub fn with_value<W>(&self, value: W) -> AnnotatedValue<W> {
        AnnotatedValue {
            value,
            source: self.source.clone(),
            timestamp: self.timestamp,
        }
    }

    pub fn map<W>(self, f: impl FnOnce(V) -> W) -> AnnotatedValue<W> {
        AnnotatedValue {
            value: f(self.value),
            source: self.source,
            timestamp: self.timestamp,
        }
    }
}

/// Name under which the surviving sources of a field resolution are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionTag(String);

impl ResolutionTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolutionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a single fusion: captured errors and tagged resolution results.
#[derive(Debug, Default)]
pub struct FusionContext {
    exceptions: ExceptionContext,
    stored_sources: rustc_hash::FxHashMap<ResolutionTag, Vec<Source>>,
}

impl FusionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the sources of `values` under `tag`.
    pub fn store_sources<V>(&mut self, tag: &ResolutionTag, values: &[AnnotatedValue<V>]) {
        let sources = values.iter().map(|value| value.source.clone()).collect();
        self.stored_sources.insert(tag.clone(), sources);
    }

    pub fn retrieve_sources(&self, tag: &ResolutionTag) -> Result<&[Source], DedupeError> {
        self.stored_sources
            .get(tag)
            .map(Vec::as_slice)
            .ok_or_else(|| DedupeError::MissingResolutionTag {
                tag: tag.name().to_string(),
            })
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

/// Reduces a list of conflicting values to the survivors.
///
/// A partial resolution may leave several values; [`resolve`](Self::resolve)
/// finalizes to a single value or fails.
pub trait ConflictResolution<I, O = I>: Send + Sync {
    /// Only called with at least one value.
    fn resolve_non_empty(
        &self,
        values: Vec<AnnotatedValue<I>>,
        context: &mut FusionContext,
    ) -> anyhow::Result<Vec<AnnotatedValue<O>>>;

    fn resolve_partially(
        &self,
        values: Vec<AnnotatedValue<I>>,
        context: &mut FusionContext,
    ) -> anyhow::Result<Vec<AnnotatedValue<O>>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        self.resolve_non_empty(values, context)
    }

    fn resolve(&self, values: Vec<AnnotatedValue<I>>, context: &mut FusionContext) -> anyhow::Result<Option<O>>
    where
        O: PartialEq + fmt::Debug,
    {
        let resolved = self.resolve_partially(values, context)?;
        Ok(finalize("value", resolved)?)
    }

    /// Feed the survivors of this resolution into `next`.
    fn then<P, R>(self, next: R) -> Chain<Self, R, O>
    where
        Self: Sized,
        R: ConflictResolution<O, P>,
    {
        Chain {
            first: self,
            second: next,
            _intermediate: PhantomData,
        }
    }
}

impl<I, O, F> ConflictResolution<I, O> for F
where
    F: Fn(Vec<AnnotatedValue<I>>, &mut FusionContext) -> anyhow::Result<Vec<AnnotatedValue<O>>> + Send + Sync,
{
    fn resolve_non_empty(
        &self,
        values: Vec<AnnotatedValue<I>>,
        context: &mut FusionContext,
    ) -> anyhow::Result<Vec<AnnotatedValue<O>>> {
        self(values, context)
    }
}

/// Two resolutions applied in sequence, see [`ConflictResolution::then`].
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _intermediate: PhantomData<fn(M) -> M>,
}

impl<I, M, O, A, B> ConflictResolution<I, O> for Chain<A, B, M>
where
    A: ConflictResolution<I, M>,
    B: ConflictResolution<M, O>,
{
    fn resolve_non_empty(
        &self,
        values: Vec<AnnotatedValue<I>>,
        context: &mut FusionContext,
    ) -> anyhow::Result<Vec<AnnotatedValue<O>>> {
        let intermediate = self.first.resolve_partially(values, context)?;
        self.second.resolve_partially(intermediate, context)
    }
}

/// Reduce resolved values to at most one: none, one, or several equal values
/// resolve; distinct leftovers are an [`DedupeError::UnresolvedConflict`].
pub fn finalize<V>(field: &str, resolved: Vec<AnnotatedValue<V>>) -> Result<Option<V>, DedupeError>
where
    V: PartialEq + fmt::Debug,
{
    let mut values = resolved.into_iter().map(|annotated| annotated.value);
    let Some(first) = values.next() else {
        return Ok(None);
    };
    let rest: Vec<V> = values.collect();
    if rest.iter().all(|value| *value == first) {
        return Ok(Some(first));
    }

    let mut distinct: Vec<V> = vec![first];
    for value in rest {
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }
    Err(DedupeError::UnresolvedConflict {
        field: field.to_string(),
        values: distinct.iter().map(|value| format!("{value:?}")).collect(),
    })
}

/// Result of fusing a cluster.
#[derive(Debug)]
pub struct FusedValue<C, T> {
    pub value: T,
    pub original_values: Cluster<C, T>,
    /// Failures captured while fusing; the value may be partial if non-empty.
    pub exceptions: Vec<anyhow::Error>,
}

impl<C, T> FusedValue<C, T> {
    pub fn is_complete(&self) -> bool {
        self.exceptions.is_empty()
    }
}

/// Fuses a cluster into one representative.
pub trait Fusion<C, T> {
    fn fuse(&self, cluster: Cluster<C, T>) -> Result<FusedValue<C, T>, DedupeError>;
}

type SourceExtractor<R> = Box<dyn Fn(&R) -> Option<String> + Send + Sync>;
type TimestampExtractor<R> = Box<dyn Fn(&R) -> OffsetDateTime + Send + Sync>;

/// Fusion through a root conflict resolution over annotated records.
pub struct ConflictResolutionFusion<R> {
    source_extractor: SourceExtractor<R>,
    timestamp_extractor: TimestampExtractor<R>,
    sources: Vec<Source>,
    root_resolution: Box<dyn ConflictResolution<R, R>>,
}

impl<R: Clone + PartialEq + fmt::Debug + 'static> ConflictResolutionFusion<R> {
    pub fn builder<S>(root_resolution: S) -> ConflictResolutionFusionBuilder<R>
    where
        S: ConflictResolution<R, R> + 'static,
    {
        ConflictResolutionFusionBuilder {
            source_extractor: Box::new(|_| None),
            timestamp_extractor: Box::new(|_| OffsetDateTime::UNIX_EPOCH),
            sources: Vec::new(),
            root_resolution: Box::new(root_resolution),
        }
    }

    /// The configured source with this name; unknown names weigh 1.
    pub fn source_named(&self, name: Option<&str>) -> Source {
        let Some(name) = name else {
            return Source::unknown();
        };
        self.sources
            .iter()
            .find(|source| source.name == name)
            .cloned()
            .unwrap_or_else(|| Source::new(name, 1.0))
    }

    fn annotate(&self, record: &R) -> AnnotatedValue<R> {
        let source = self.source_named((self.source_extractor)(record).as_deref());
        AnnotatedValue::new(record.clone(), source, (self.timestamp_extractor)(record))
    }
}

impl<C, R> Fusion<C, R> for ConflictResolutionFusion<R>
where
    R: Clone + PartialEq + fmt::Debug + 'static,
{
    fn fuse(&self, cluster: Cluster<C, R>) -> Result<FusedValue<C, R>, DedupeError> {
        if cluster.len() < 2 {
            let Some(only) = cluster.elements.first().cloned() else {
                return Err(DedupeError::EmptyCluster);
            };
            return Ok(FusedValue {
                value: only,
                original_values: cluster,
                exceptions: Vec::new(),
            });
        }

        let conflicting: Vec<AnnotatedValue<R>> =
            cluster.elements.iter().map(|record| self.annotate(record)).collect();
        let mut context = FusionContext::new();
        let resolved = self.root_resolution.resolve(conflicting, &mut context);
        match context.exceptions_mut().capture(resolved).flatten() {
            Some(value) => Ok(FusedValue {
                value,
                original_values: cluster,
                exceptions: context.into_exceptions(),
            }),
            None => Err(DedupeError::fusion(&cluster.elements, context.into_exceptions())),
        }
    }
}

impl<R> fmt::Debug for ConflictResolutionFusion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolutionFusion")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

pub struct ConflictResolutionFusionBuilder<R> {
    source_extractor: SourceExtractor<R>,
    timestamp_extractor: TimestampExtractor<R>,
    sources: Vec<Source>,
    root_resolution: Box<dyn ConflictResolution<R, R>>,
}

impl<R> ConflictResolutionFusionBuilder<R> {
    /// Name of the source a record came from; `None` maps to [`Source::unknown`].
    pub fn source_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&R) -> Option<String> + Send + Sync + 'static,
    {
        self.source_extractor = Box::new(extractor);
        self
    }

    pub fn timestamp_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&R) -> OffsetDateTime + Send + Sync + 'static,
    {
        self.timestamp_extractor = Box::new(extractor);
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Source>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn build(self) -> ConflictResolutionFusion<R> {
        ConflictResolutionFusion {
            source_extractor: self.source_extractor,
            timestamp_extractor: self.timestamp_extractor,
            sources: self.sources,
            root_resolution: self.root_resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::resolutions::{assume_equal_value, first, longest, max, vote};
    use super::*;
    use anyhow::anyhow;
    use time::macros::datetime;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Contact {
        name: Option<String>,
        email: Option<String>,
        age: Option<u32>,
        source: Option<String>,
    }

    fn contact(name: &str, email: &str, age: u32, source: &str) -> Contact {
        Contact {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            age: Some(age),
            source: Some(source.to_string()),
        }
    }

    fn name() -> FieldAccessor<Contact, String> {
        FieldAccessor::new("name", |c: &Contact| c.name.clone(), |c: &mut Contact, v| c.name = Some(v))
    }

    fn email() -> FieldAccessor<Contact, String> {
        FieldAccessor::new("email", |c: &Contact| c.email.clone(), |c: &mut Contact, v| c.email = Some(v))
    }

    fn age() -> FieldAccessor<Contact, u32> {
        FieldAccessor::new("age", |c: &Contact| c.age, |c: &mut Contact, v| c.age = Some(v))
    }

    fn fusion(merge: Merge<Contact>) -> ConflictResolutionFusion<Contact> {
        ConflictResolutionFusion::builder(merge)
            .source_extractor(|c: &Contact| c.source.clone())
            .source(Source::new("crm", 2.0))
            .build()
    }

    #[test]
    fn test_singleton_and_empty_clusters() {
        let merge = Merge::builder(Contact::default).field(name()).with(first()).build().unwrap();
        let fusion = fusion(merge);

        let only = contact("Ann", "a@x", 30, "crm");
        let fused = fusion.fuse(Cluster::singleton(0u64, only.clone())).unwrap();
        assert_eq!(fused.value, only);
        assert!(fused.is_complete());

        let empty: Cluster<u64, Contact> = Cluster::new(0, Vec::new());
        assert!(matches!(fusion.fuse(empty), Err(DedupeError::EmptyCluster)));
    }

    #[test]
    fn test_round_trip_of_identical_records() {
        let merge = Merge::builder(Contact::default)
            .field(name())
            .with(assume_equal_value())
            .field(email())
            .with(assume_equal_value())
            .field(age())
            .with(assume_equal_value())
            .build()
            .unwrap();
        let fusion = fusion(merge);

        let record = contact("Ann", "a@x", 30, "crm");
        let fused = fusion
            .fuse(Cluster::new(1u64, vec![record.clone(), record.clone()]))
            .unwrap();
        assert!(fused.is_complete());
        assert_eq!(fused.value.name, record.name);
        assert_eq!(fused.value.email, record.email);
        assert_eq!(fused.value.age, record.age);
        assert_eq!(fused.original_values.len(), 2);
    }

    #[test]
    fn test_conflicting_field_is_left_unset() {
        let merge = Merge::builder(Contact::default)
            .field(name())
            .with(longest())
            .field(email())
            .with(assume_equal_value())
            .build()
            .unwrap();
        let fusion = fusion(merge);

        let fused = fusion
            .fuse(Cluster::new(
                1u64,
                vec![contact("Ann", "a@x", 30, "crm"), contact("Anna", "b@x", 31, "web")],
            ))
            .unwrap();
        assert!(!fused.is_complete());
        assert_eq!(fused.value.name.as_deref(), Some("Anna"));
        assert_eq!(fused.value.email, None);
        let error = fused.exceptions[0].downcast_ref::<DedupeError>().unwrap();
        assert!(matches!(error, DedupeError::UnresolvedConflict { field, .. } if field == "email"));
    }

    #[test]
    fn test_single_differing_field_records_one_conflict() {
        let merge = Merge::builder(Contact::default)
            .field(name())
            .with(assume_equal_value())
            .field(email())
            .with(assume_equal_value())
            .field(age())
            .with(assume_equal_value())
            .build()
            .unwrap();
        let fusion = fusion(merge);

        let fused = fusion
            .fuse(Cluster::new(
                1u64,
                vec![contact("Ann", "a@x", 30, "crm"), contact("Ann", "b@x", 30, "crm")],
            ))
            .unwrap();
        assert_eq!(fused.exceptions.len(), 1);
        assert_eq!(fused.value.name.as_deref(), Some("Ann"));
        assert_eq!(fused.value.age, Some(30));
        assert_eq!(fused.value.email, None);
        let error = fused.exceptions[0].downcast_ref::<DedupeError>().unwrap();
        assert!(matches!(error, DedupeError::UnresolvedConflict { field, .. } if field == "email"));
    }

    #[test]
    fn test_source_weights_drive_votes() {
        let merge = Merge::builder(Contact::default)
            .field(email())
            .with(vote())
            .field(age())
            .with(max())
            .build()
            .unwrap();
        let fusion = fusion(merge);

        let fused = fusion
            .fuse(Cluster::new(
                1u64,
                vec![
                    contact("Ann", "web@x", 30, "web"),
                    contact("Ann", "crm@x", 31, "crm"),
                ],
            ))
            .unwrap();
        assert!(fused.is_complete());
        assert_eq!(fused.value.email.as_deref(), Some("crm@x"));
        assert_eq!(fused.value.age, Some(31));
    }

    #[test]
    fn test_failing_root_resolution_is_an_error() {
        let root = |_: Vec<AnnotatedValue<Contact>>, _: &mut FusionContext| -> anyhow::Result<Vec<AnnotatedValue<Contact>>> {
            Err(anyhow!("storage offline"))
        };
        let fusion = ConflictResolutionFusion::builder(root).build();
        let error = fusion
            .fuse(Cluster::new(
                1u64,
                vec![contact("A", "a", 1, "crm"), contact("B", "b", 2, "crm")],
            ))
            .unwrap_err();
        assert!(matches!(error, DedupeError::Fusion { .. }));
        assert_eq!(error.primary_cause().map(ToString::to_string).as_deref(), Some("storage offline"));
    }

    #[test]
    fn test_unknown_sources() {
        let fusion: ConflictResolutionFusion<Contact> = ConflictResolutionFusion::builder(
            Merge::builder(Contact::default).build().unwrap(),
        )
        .source(Source::new("crm", 3.0))
        .build();
        assert_eq!(fusion.source_named(Some("crm")).weight, 3.0);
        assert_eq!(fusion.source_named(Some("web")), Source::new("web", 1.0));
        assert_eq!(fusion.source_named(None), Source::unknown());
    }

    #[test]
    fn test_then_chains_survivors() {
        let at = datetime!(2020-01-01 0:00 UTC);
        let values = vec![
            AnnotatedValue::new("bob".to_string(), Source::unknown(), at),
            AnnotatedValue::new("robert".to_string(), Source::unknown(), at),
            AnnotatedValue::new("rob".to_string(), Source::unknown(), at),
        ];
        let mut context = FusionContext::new();
        let chained = longest::<String>().then(first());
        let resolved = chained.resolve(values, &mut context).unwrap();
        assert_eq!(resolved.as_deref(), Some("robert"));
    }

    #[test]
    fn test_finalize() {
        let at = datetime!(2020-01-01 0:00 UTC);
        let same = vec![
            AnnotatedValue::new(1, Source::unknown(), at),
            AnnotatedValue::new(1, Source::calculated(), at),
        ];
        assert_eq!(finalize("n", same).unwrap(), Some(1));
        assert_eq!(finalize::<i32>("n", Vec::new()).unwrap(), None);

        let different = vec![
            AnnotatedValue::new(1, Source::unknown(), at),
            AnnotatedValue::new(2, Source::unknown(), at),
            AnnotatedValue::new(1, Source::unknown(), at),
        ];
        match finalize("n", different) {
            Err(DedupeError::UnresolvedConflict { field, values }) => {
                assert_eq!(field, "n");
                assert_eq!(values, vec!["1".to_string(), "2".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
