//! # Clustering
//!
//! Groups classified duplicate pairs into clusters of records that describe
//! the same entity. [`TransitiveClosure`] maintains connected components
//! incrementally over a [`RecordDsu`](crate::dsu::RecordDsu):
//!
//! - an edge between two unknown records opens a new cluster
//! - an edge touching one known record appends the other and keeps the id
//! - an edge between two clusters merges them under a fresh id
//!
//! Edges are never retracted. [`RefinedTransitiveClosure`] re-partitions the
//! resulting components when chaining links records that do not belong
//! together.

mod refine;

pub use refine::{
    ClassifierRefinement, ClusterSplitHandler, ClusterSplits, ConsistentClustering, RefineCluster,
    RefinedTransitiveClosure,
};

use crate::config::ClusteringConfig;
use crate::dsu::RecordDsu;
use crate::error::DedupeError;
use crate::model::{Classification, ClassifiedCandidate};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use tracing::{trace, warn};

/// A group of records considered to describe the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster<C, T> {
    pub id: C,
    pub elements: Vec<T>,
}

impl<C, T> Cluster<C, T> {
    pub fn new(id: C, elements: Vec<T>) -> Self {
        Self { id, elements }
    }

    /// Cluster holding a single record.
    pub fn singleton(id: C, element: T) -> Self {
        Self::new(id, vec![element])
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.elements.get(index)
    }
}

impl<C, T: PartialEq> Cluster<C, T> {
    pub fn contains(&self, record: &T) -> bool {
        self.elements.contains(record)
    }
}

/// Which classifications count as edges of the duplicate graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgePolicy {
    /// Duplicates and possible duplicates.
    #[default]
    IncludePossible,
    DuplicatesOnly,
}

impl EdgePolicy {
    pub fn is_edge(self, classification: Classification) -> bool {
        match classification {
            Classification::Duplicate => true,
            Classification::PossibleDuplicate => self == Self::IncludePossible,
            Classification::NonDuplicate | Classification::Unknown => false,
        }
    }
}

/// Groups classified candidates into clusters.
pub trait Clustering<C, T> {
    /// Returns the live clusters touched by `classified`, the cluster holding
    /// `record1` of the first candidate first.
    fn cluster(&mut self, classified: Vec<ClassifiedCandidate<T>>) -> Result<Vec<Cluster<C, T>>, DedupeError>;
}

/// Produces a fresh cluster id from the ids of the cluster's elements.
///
/// A generator must never hand out an id twice; once it runs dry it fails with
/// [`DedupeError::ClusterIdsExhausted`].
pub trait ClusterIdGenerator<I, C> {
    fn next_id(&mut self, element_ids: &[I]) -> Result<C, DedupeError>;
}

impl<I, C, F> ClusterIdGenerator<I, C> for F
where
    F: FnMut(&[I]) -> C,
{
    fn next_id(&mut self, element_ids: &[I]) -> Result<C, DedupeError> {
        Ok(self(element_ids))
    }
}

/// Hands out `start, start + 1, ...` until the counter would overflow.
#[derive(Debug, Clone)]
struct Counter {
    next: Option<u64>,
    last: Option<u64>,
}

impl Counter {
    fn starting_at(first: u64) -> Self {
        Self {
            next: Some(first),
            last: None,
        }
    }

    fn advance(&mut self) -> Result<u64, DedupeError> {
        let Some(id) = self.next else {
            return Err(DedupeError::ClusterIdsExhausted {
                last: self.last.map_or_else(|| "no id".to_string(), |last| last.to_string()),
            });
        };
        self.next = id.checked_add(1);
        self.last = Some(id);
        Ok(id)
    }
}

/// Counter ids `start, start + 1, ...`.
#[derive(Debug, Clone)]
pub struct SequentialIds {
    counter: Counter,
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids from `first` up to and including `u64::MAX`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            counter: Counter::starting_at(first),
        }
    }
}

impl<I> ClusterIdGenerator<I, u64> for SequentialIds {
    fn next_id(&mut self, _element_ids: &[I]) -> Result<u64, DedupeError> {
        self.counter.advance()
    }
}

/// Counter ids rendered as `"<prefix><n>"`.
#[derive(Debug, Clone)]
pub struct PrefixedIds {
    prefix: String,
    counter: Counter,
}

impl PrefixedIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Counter::starting_at(0),
        }
    }
}

impl<I> ClusterIdGenerator<I, String> for PrefixedIds {
    fn next_id(&mut self, _element_ids: &[I]) -> Result<String, DedupeError> {
        let n = self.counter.advance()?;
        Ok(format!("{}{}", self.prefix, n))
    }
}

type IdExtractor<T, I> = Box<dyn Fn(&T) -> I + Send + Sync>;

/// Incremental transitive closure over duplicate edges.
pub struct TransitiveClosure<C, T, I> {
    id_extractor: IdExtractor<T, I>,
    id_generator: Box<dyn ClusterIdGenerator<I, C> + Send>,
    edge_policy: EdgePolicy,
    dsu: RecordDsu<I>,
    /// Live clusters keyed by their DSU root
    clusters: FxHashMap<I, Cluster<C, T>>,
}

impl<C, T, I> TransitiveClosure<C, T, I>
where
    C: Clone + PartialEq + fmt::Debug,
    T: Clone,
    I: Eq + Hash + Clone,
{
    pub fn new<F, G>(id_extractor: F, id_generator: G) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
        G: ClusterIdGenerator<I, C> + Send + 'static,
    {
        Self {
            id_extractor: Box::new(id_extractor),
            id_generator: Box::new(id_generator),
            edge_policy: EdgePolicy::default(),
            dsu: RecordDsu::new(),
            clusters: FxHashMap::default(),
        }
    }

    pub fn with_edge_policy(mut self, edge_policy: EdgePolicy) -> Self {
        self.edge_policy = edge_policy;
        self
    }

    pub fn edge_policy(&self) -> EdgePolicy {
        self.edge_policy
    }

    /// Number of live clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster<C, T>> {
        self.clusters.values()
    }

    /// Whether the record with `id` is part of a live cluster.
    pub fn contains(&self, id: &I) -> bool {
        self.dsu.has_record(id)
    }

    /// The live cluster holding the record with `id`, if any.
    pub fn cluster_of(&mut self, id: &I) -> Option<&Cluster<C, T>> {
        if !self.dsu.has_record(id) {
            return None;
        }
        let root = self.dsu.find(id);
        self.clusters.get(&root)
    }

    /// Forget a cluster and all of its records.
    ///
    /// Fails if `cluster` is not the live cluster of every one of its elements.
    pub fn remove_cluster(&mut self, cluster: &Cluster<C, T>) -> Result<(), DedupeError> {
        let unknown = || DedupeError::UnknownCluster {
            cluster: format!("{:?}", cluster.id),
        };
        let ids: Vec<I> = cluster.elements.iter().map(|e| (self.id_extractor)(e)).collect();
        let Some(first) = ids.first() else {
            return Err(unknown());
        };
        if !ids.iter().all(|id| self.dsu.has_record(id)) {
            return Err(unknown());
        }
        let root = self.dsu.find(first);
        if ids.iter().any(|id| self.dsu.find(id) != root) {
            return Err(unknown());
        }
        match self.clusters.get(&root) {
            Some(live) if live.id == cluster.id && live.len() == ids.len() => {}
            _ => return Err(unknown()),
        }

        self.clusters.remove(&root);
        self.dsu.remove_set(ids.iter());
        Ok(())
    }

    /// Add one edge; returns the root of the cluster holding both records.
    fn add_edge(&mut self, left: &T, right: &T) -> Result<Option<I>, DedupeError> {
        let left_id = (self.id_extractor)(left);
        let right_id = (self.id_extractor)(right);
        if left_id == right_id {
            return Ok(None);
        }

        let root = match (self.dsu.has_record(&left_id), self.dsu.has_record(&right_id)) {
            (false, false) => {
                let id = self
                    .id_generator
                    .next_id(&[left_id.clone(), right_id.clone()])?;
                let root = self.dsu.union(&left_id, &right_id);
                self.clusters
                    .insert(root.clone(), Cluster::new(id, vec![left.clone(), right.clone()]));
                Some(root)
            }
            (true, false) => self.append(&left_id, right_id, right),
            (false, true) => self.append(&right_id, left_id, left),
            (true, true) => {
                let left_root = self.dsu.find(&left_id);
                let right_root = self.dsu.find(&right_id);
                if left_root == right_root {
                    Some(left_root)
                } else {
                    self.merge(left_root, right_root)?
                }
            }
        };
        Ok(root)
    }

    /// Add an unknown record to the cluster of `known`, keeping its id.
    fn append(&mut self, known: &I, new_id: I, record: &T) -> Option<I> {
        let old_root = self.dsu.find(known);
        let Some(mut cluster) = self.clusters.remove(&old_root) else {
            warn!("cluster index has no entry for a known record");
            return None;
        };
        cluster.elements.push(record.clone());
        let root = self.dsu.union(known, &new_id);
        self.clusters.insert(root.clone(), cluster);
        Some(root)
    }

    fn merge(&mut self, left_root: I, right_root: I) -> Result<Option<I>, DedupeError> {
        let (Some(left), Some(right)) = (self.clusters.get(&left_root), self.clusters.get(&right_root)) else {
            warn!("cluster index has no entry for a known root");
            return Ok(None);
        };
        let element_ids: Vec<I> = left
            .elements
            .iter()
            .chain(&right.elements)
            .map(|e| (self.id_extractor)(e))
            .collect();
        // both clusters stay intact when no id is left
        let id = self.id_generator.next_id(&element_ids)?;

        let (Some(left), Some(right)) = (
            self.clusters.remove(&left_root),
            self.clusters.remove(&right_root),
        ) else {
            return Ok(None);
        };
        trace!(left = ?left.id, right = ?right.id, merged = ?id, "merged clusters");
        let mut elements = left.elements;
        elements.extend(right.elements);

        let root = self.dsu.union(&left_root, &right_root);
        self.clusters.insert(root.clone(), Cluster::new(id, elements));
        Ok(Some(root))
    }
}

impl<C, T, I> Clustering<C, T> for TransitiveClosure<C, T, I>
where
    C: Clone + PartialEq + fmt::Debug,
    T: Clone,
    I: Eq + Hash + Clone,
{
    fn cluster(&mut self, classified: Vec<ClassifiedCandidate<T>>) -> Result<Vec<Cluster<C, T>>, DedupeError> {
        let anchor = classified
            .first()
            .map(|first| (self.id_extractor)(&first.candidate.record1));

        let mut touched: Vec<I> = Vec::new();
        for classified_candidate in &classified {
            if !self.edge_policy.is_edge(classified_candidate.classification()) {
                continue;
            }
            let candidate = &classified_candidate.candidate;
            if let Some(root) = self.add_edge(&candidate.record1, &candidate.record2)? {
                touched.push(root);
            }
        }

        // later merges may have retired roots touched earlier
        let mut live_roots: Vec<I> = Vec::with_capacity(touched.len());
        for root in touched {
            let root = self.dsu.find(&root);
            if !live_roots.contains(&root) {
                live_roots.push(root);
            }
        }
        if let Some(anchor) = anchor.filter(|id| self.dsu.has_record(id)) {
            let anchor_root = self.dsu.find(&anchor);
            if let Some(position) = live_roots.iter().position(|root| *root == anchor_root) {
                live_roots[..=position].rotate_right(1);
            }
        }

        Ok(live_roots
            .iter()
            .filter_map(|root| self.clusters.get(root).cloned())
            .collect())
    }
}

impl<C: fmt::Debug, T, I> fmt::Debug for TransitiveClosure<C, T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitiveClosure")
            .field("edge_policy", &self.edge_policy)
            .field("clusters", &self.clusters.len())
            .finish_non_exhaustive()
    }
}

impl<T, I> TransitiveClosure<u64, T, I>
where
    T: Clone,
    I: Eq + Hash + Clone + 'static,
{
    /// Sequential u64 ids and edge policy taken from configuration.
    pub fn from_config<F>(config: &ClusteringConfig, id_extractor: F) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        Self::new(id_extractor, SequentialIds::starting_at(config.first_cluster_id))
            .with_edge_policy(config.edge_policy)
    }
}

/// Reports the gold-standard clusters of the records a batch compares against.
pub struct OracleClustering<C, T, I> {
    gold_clusters: Vec<Cluster<C, T>>,
    id_extractor: IdExtractor<T, I>,
    index: FxHashMap<I, usize>,
}

impl<C: Clone, T: Clone, I: Eq + Hash> OracleClustering<C, T, I> {
    pub fn new<F>(gold_clusters: Vec<Cluster<C, T>>, id_extractor: F) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        let mut index = FxHashMap::default();
        for (position, cluster) in gold_clusters.iter().enumerate() {
            for element in &cluster.elements {
                index.insert(id_extractor(element), position);
            }
        }
        Self {
            gold_clusters,
            id_extractor: Box::new(id_extractor),
            index,
        }
    }

    pub fn gold_clusters(&self) -> &[Cluster<C, T>] {
        &self.gold_clusters
    }
}

impl<C: Clone, T: Clone, I: Eq + Hash> Clustering<C, T> for OracleClustering<C, T, I> {
    fn cluster(&mut self, classified: Vec<ClassifiedCandidate<T>>) -> Result<Vec<Cluster<C, T>>, DedupeError> {
        let mut positions: Vec<usize> = Vec::new();
        for classified_candidate in &classified {
            let id = (self.id_extractor)(&classified_candidate.candidate.record2);
            if let Some(&position) = self.index.get(&id) {
                if !positions.contains(&position) {
                    positions.push(position);
                }
            }
        }
        Ok(positions
            .into_iter()
            .map(|position| self.gold_clusters[position].clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candidate, ClassificationResult};

    type Record = (u32, &'static str);

    fn edge(left: Record, right: Record, result: ClassificationResult) -> ClassifiedCandidate<Record> {
        ClassifiedCandidate::new(Candidate::new(left, right), result)
    }

    fn duplicate(left: Record, right: Record) -> ClassifiedCandidate<Record> {
        edge(left, right, ClassificationResult::duplicate(1.0))
    }

    fn closure() -> TransitiveClosure<u64, Record, u32> {
        TransitiveClosure::new(|r: &Record| r.0, SequentialIds::new())
    }

    fn ids(cluster: &Cluster<u64, Record>) -> Vec<u32> {
        cluster.elements.iter().map(|r| r.0).collect()
    }

    const A: Record = (1, "a");
    const B: Record = (2, "b");
    const C: Record = (3, "c");
    const D: Record = (4, "d");

    #[test]
    fn test_transitivity() {
        let mut clustering = closure();
        let first = clustering.cluster(vec![duplicate(A, B)]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, 0);

        let second = clustering.cluster(vec![duplicate(C, B)]).unwrap();
        assert_eq!(second.len(), 1);
        // appending keeps the id
        assert_eq!(second[0].id, 0);
        assert_eq!(ids(&second[0]), vec![1, 2, 3]);
        assert_eq!(clustering.len(), 1);
    }

    #[test]
    fn test_merge_gets_fresh_id() {
        let mut clustering = closure();
        clustering.cluster(vec![duplicate(A, B)]).unwrap();
        clustering.cluster(vec![duplicate(C, D)]).unwrap();

        let merged = clustering.cluster(vec![duplicate(B, C)]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, 2);
        assert_eq!(ids(&merged[0]), vec![1, 2, 3, 4]);
        assert_eq!(clustering.len(), 1);
        assert_eq!(clustering.cluster_of(&4).map(|c| c.id), Some(2));
    }

    #[test]
    fn test_known_pair_is_still_reported() {
        let mut clustering = closure();
        clustering.cluster(vec![duplicate(A, B)]).unwrap();
        let again = clustering.cluster(vec![duplicate(B, A)]).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, 0);
        assert_eq!(again[0].len(), 2);
    }

    #[test]
    fn test_non_edges_are_ignored() {
        let mut clustering = closure();
        let result = clustering.cluster(vec![
            edge(A, B, ClassificationResult::non_duplicate(1.0)),
            edge(A, C, ClassificationResult::unknown()),
        ]).unwrap();
        assert!(result.is_empty());
        assert!(clustering.is_empty());
    }

    #[test]
    fn test_possible_duplicates_follow_edge_policy() {
        let possible = || vec![edge(A, B, ClassificationResult::possible_duplicate(0.5))];

        let mut including = closure();
        assert_eq!(including.cluster(possible()).unwrap().len(), 1);

        let mut strict = closure().with_edge_policy(EdgePolicy::DuplicatesOnly);
        assert!(strict.cluster(possible()).unwrap().is_empty());
    }

    #[test]
    fn test_containing_cluster_comes_first() {
        let mut clustering = closure();
        clustering.cluster(vec![duplicate(C, D)]).unwrap();

        // the new record A only joins a cluster through the second edge
        let result = clustering.cluster(vec![
            edge(A, D, ClassificationResult::non_duplicate(1.0)),
            duplicate(B, C),
            duplicate(A, (5, "e")),
        ]).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result[0].contains(&A));
        assert!(result[1].contains(&B));
    }

    #[test]
    fn test_merged_away_clusters_are_not_reported() {
        let mut clustering = closure();
        let result = clustering.cluster(vec![duplicate(A, B), duplicate(C, D), duplicate(A, C)]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 2);
        assert_eq!(result[0].len(), 4);
    }

    #[test]
    fn test_remove_cluster() {
        let mut clustering = closure();
        let cluster = clustering.cluster(vec![duplicate(A, B)]).unwrap().remove(0);

        let stale = Cluster::new(cluster.id, vec![A]);
        assert!(matches!(
            clustering.remove_cluster(&stale),
            Err(DedupeError::UnknownCluster { .. })
        ));

        clustering.remove_cluster(&cluster).unwrap();
        assert!(clustering.is_empty());
        assert!(clustering.cluster_of(&1).is_none());

        let fresh = clustering.cluster(vec![duplicate(A, C)]).unwrap();
        assert_eq!(fresh[0].id, 1);
        assert_eq!(ids(&fresh[0]), vec![1, 3]);
    }

    #[test]
    fn test_prefixed_and_closure_generators() {
        let mut prefixed = PrefixedIds::new("cluster-");
        assert_eq!(ClusterIdGenerator::<u32, String>::next_id(&mut prefixed, &[1, 2]).unwrap(), "cluster-0");
        assert_eq!(ClusterIdGenerator::<u32, String>::next_id(&mut prefixed, &[3]).unwrap(), "cluster-1");

        let mut clustering: TransitiveClosure<String, Record, u32> =
            TransitiveClosure::new(|r: &Record| r.0, |ids: &[u32]| {
                ids.iter().map(u32::to_string).collect::<Vec<_>>().join("+")
            });
        let result = clustering.cluster(vec![duplicate(A, B), duplicate(C, B)]).unwrap();
        assert_eq!(result[0].id, "1+2");
    }

    #[test]
    fn test_oracle_clustering() {
        let gold = vec![Cluster::new(7u64, vec![A, B]), Cluster::new(8, vec![C])];
        let mut oracle = OracleClustering::new(gold, |r: &Record| r.0);
        let result = oracle.cluster(vec![
            duplicate(D, A),
            duplicate(D, B),
            duplicate(D, C),
        ]).unwrap();
        let found: Vec<u64> = result.iter().map(|c| c.id).collect();
        assert_eq!(found, vec![7, 8]);
    }

    #[test]
    fn test_sequential_ids_stop_at_the_last_id() {
        let mut ids = SequentialIds::starting_at(u64::MAX - 1);
        assert_eq!(ClusterIdGenerator::<u32, u64>::next_id(&mut ids, &[]).unwrap(), u64::MAX - 1);
        assert_eq!(ClusterIdGenerator::<u32, u64>::next_id(&mut ids, &[]).unwrap(), u64::MAX);
        assert!(matches!(
            ClusterIdGenerator::<u32, u64>::next_id(&mut ids, &[]),
            Err(DedupeError::ClusterIdsExhausted { .. })
        ));
    }

    #[test]
    fn test_exhausted_ids_fail_without_touching_clusters() {
        let mut clustering: TransitiveClosure<u64, Record, u32> =
            TransitiveClosure::new(|r: &Record| r.0, SequentialIds::starting_at(u64::MAX - 1));
        clustering.cluster(vec![duplicate(A, B)]).unwrap();
        clustering.cluster(vec![duplicate(C, D)]).unwrap();

        let error = clustering.cluster(vec![duplicate(B, C)]).unwrap_err();
        assert!(matches!(error, DedupeError::ClusterIdsExhausted { .. }));
        assert_eq!(clustering.len(), 2);
        assert_eq!(clustering.cluster_of(&2).map(|c| c.id), Some(u64::MAX - 1));
        assert_eq!(clustering.cluster_of(&3).map(|c| c.id), Some(u64::MAX));

        // appending needs no fresh id
        let appended = clustering.cluster(vec![duplicate((5, "e"), A)]).unwrap();
        assert_eq!(appended[0].id, u64::MAX - 1);
    }

    #[test]
    fn test_from_config_with_last_id() {
        let config = ClusteringConfig {
            first_cluster_id: u64::MAX,
            ..ClusteringConfig::default()
        };
        let mut clustering = TransitiveClosure::from_config(&config, |r: &Record| r.0);
        assert_eq!(clustering.cluster(vec![duplicate(A, B)]).unwrap()[0].id, u64::MAX);
        assert!(clustering.cluster(vec![duplicate(C, D)]).is_err());
    }
}
