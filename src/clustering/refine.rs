//! Cluster refinement.
//!
//! Transitive closure chains records together, so one weak link can join two
//! entities. [`RefinedTransitiveClosure`] hands every component it touches to
//! a [`RefineCluster`], reports only the parts whose membership changed, and
//! lets a [`ClusterSplitHandler`] veto splits. [`ConsistentClustering`] keeps
//! records that were reported together in one cluster for good.

use super::{Cluster, ClusterIdGenerator, Clustering, EdgePolicy, SequentialIds, TransitiveClosure};
use crate::classifier::Classifier;
use crate::config::DEFAULT_MAX_SMALL_CLUSTER_SIZE;
use crate::error::DedupeError;
use crate::model::{Candidate, Classification, ClassificationResult, ClassifiedCandidate};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Splits one connected component into the clusters it should be.
pub trait RefineCluster<T> {
    /// Partition `component`; every element must land in exactly one part.
    ///
    /// `known` holds the classifications of the current batch, which may
    /// include pairs outside `component`.
    fn refine(&self, component: &[T], known: &[ClassifiedCandidate<T>]) -> Result<Vec<Vec<T>>, DedupeError>;
}

impl<T, F> RefineCluster<T> for F
where
    F: Fn(&[T], &[ClassifiedCandidate<T>]) -> Result<Vec<Vec<T>>, DedupeError>,
{
    fn refine(&self, component: &[T], known: &[ClassifiedCandidate<T>]) -> Result<Vec<Vec<T>>, DedupeError> {
        self(component, known)
    }
}

/// Decides whether a component may be split.
pub trait ClusterSplitHandler<T> {
    /// `main` holds the new record, `split_parts` the rest of its component.
    /// Returning `false` keeps the component together.
    fn cluster_split(&self, main: &[T], split_parts: &[Vec<T>]) -> bool;
}

impl<T, F> ClusterSplitHandler<T> for F
where
    F: Fn(&[T], &[Vec<T>]) -> bool,
{
    fn cluster_split(&self, main: &[T], split_parts: &[Vec<T>]) -> bool {
        self(main, split_parts)
    }
}

/// Built-in split handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterSplits {
    /// Accept every split.
    #[default]
    Ignore,
    /// Veto every split.
    KeepTogether,
}

impl<T> ClusterSplitHandler<T> for ClusterSplits {
    fn cluster_split(&self, _main: &[T], _split_parts: &[Vec<T>]) -> bool {
        match self {
            Self::Ignore => true,
            Self::KeepTogether => false,
        }
    }
}

/// Pair weights keyed by `(lower, higher)` element position.
type Weights = FxHashMap<(usize, usize), f64>;

/// Refines a component by maximizing agreement with pairwise classifications.
///
/// Duplicates pull records together with their confidence, non-duplicates
/// push them apart, anything else is neutral. Pairs the current batch did
/// not classify are sent to the classifier. Components of up to
/// `max_small_cluster_size` records are solved exactly by scoring every
/// partition, so keep that bound small; larger ones are merged greedily
/// from singletons along their strongest edges.
pub struct ClassifierRefinement<T> {
    classifier: Box<dyn Classifier<T> + Send + Sync>,
    max_small_cluster_size: usize,
}

impl<T: Clone + PartialEq> ClassifierRefinement<T> {
    pub fn new<K>(classifier: K) -> Self
    where
        K: Classifier<T> + Send + Sync + 'static,
    {
        Self {
            classifier: Box::new(classifier),
            max_small_cluster_size: DEFAULT_MAX_SMALL_CLUSTER_SIZE,
        }
    }

    pub fn with_max_small_cluster_size(mut self, max_small_cluster_size: usize) -> Self {
        self.max_small_cluster_size = max_small_cluster_size.max(2);
        self
    }

    pub fn max_small_cluster_size(&self) -> usize {
        self.max_small_cluster_size
    }

    fn classify(&self, component: &[T], left: usize, right: usize) -> Result<f64, DedupeError> {
        let candidate = Candidate::new(component[left].clone(), component[right].clone());
        Ok(weight(&self.classifier.classify(&candidate)?))
    }

    fn exhaustive(&self, component: &[T], mut weights: Weights) -> Result<Vec<usize>, DedupeError> {
        let n = component.len();
        let mut edges = Vec::with_capacity(n * (n - 1) / 2);
        for left in 0..n {
            for right in left + 1..n {
                let w = match weights.remove(&(left, right)) {
                    Some(w) => w,
                    None => self.classify(component, left, right)?,
                };
                edges.push((left, right, w));
            }
        }
        Ok(best_partition(n, &edges))
    }

    fn greedy(&self, component: &[T], mut weights: Weights) -> Result<Vec<usize>, DedupeError> {
        let n = component.len();
        let m = self.max_small_cluster_size;
        let desired = (m * (m - 1) / 2).max(n - 1);

        // the chain keeps every record reachable
        for right in 1..n {
            if !weights.contains_key(&(right - 1, right)) {
                let w = self.classify(component, right - 1, right)?;
                weights.insert((right - 1, right), w);
            }
        }
        let mut known: Vec<(usize, usize)> = weights.keys().copied().collect();
        known.sort_unstable();

        // close triangles around evaluated pairs until enough are known
        let mut frontier = known.clone();
        while weights.len() < desired && !frontier.is_empty() {
            let mut added = Vec::new();
            'frontier: for &edge in &frontier {
                for &other in &known {
                    let Some(pair) = third_side(edge, other) else {
                        continue;
                    };
                    if weights.contains_key(&pair) {
                        continue;
                    }
                    let w = self.classify(component, pair.0, pair.1)?;
                    weights.insert(pair, w);
                    added.push(pair);
                    if weights.len() >= desired {
                        break 'frontier;
                    }
                }
            }
            known.extend_from_slice(&added);
            frontier = added;
        }

        let mut edges: Vec<(usize, usize, f64)> = known
            .iter()
            .filter_map(|&pair| weights.get(&pair).map(|&w| (pair.0, pair.1, w)))
            .collect();
        edges.sort_by(|l, r| r.2.total_cmp(&l.2));

        let mut labels: Vec<usize> = (0..n).collect();
        let mut best = score(&labels, &edges);
        for &(left, right, _) in &edges {
            let (kept, retired) = (labels[left], labels[right]);
            if kept == retired {
                continue;
            }
            let merged: Vec<usize> = labels
                .iter()
                .map(|&label| if label == retired { kept } else { label })
                .collect();
            let merged_score = score(&merged, &edges);
            if merged_score > best {
                best = merged_score;
                labels = merged;
            }
        }
        Ok(labels)
    }
}

impl<T: Clone + PartialEq> RefineCluster<T> for ClassifierRefinement<T> {
    fn refine(&self, component: &[T], known: &[ClassifiedCandidate<T>]) -> Result<Vec<Vec<T>>, DedupeError> {
        if component.len() <= 2 {
            return Ok(vec![component.to_vec()]);
        }
        let weights = known_weights(component, known);
        let labels = if component.len() > self.max_small_cluster_size {
            self.greedy(component, weights)?
        } else {
            self.exhaustive(component, weights)?
        };
        Ok(into_parts(component, &labels))
    }
}

impl<T> fmt::Debug for ClassifierRefinement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierRefinement")
            .field("max_small_cluster_size", &self.max_small_cluster_size)
            .finish_non_exhaustive()
    }
}

fn weight(result: &ClassificationResult) -> f64 {
    match result.classification {
        Classification::Duplicate => result.confidence,
        Classification::NonDuplicate => -result.confidence,
        Classification::PossibleDuplicate | Classification::Unknown => 0.0,
    }
}

fn known_weights<T: PartialEq>(component: &[T], known: &[ClassifiedCandidate<T>]) -> Weights {
    let position = |record: &T| component.iter().position(|element| element == record);
    let mut weights = Weights::default();
    for classified in known {
        let candidate = &classified.candidate;
        if let (Some(left), Some(right)) = (position(&candidate.record1), position(&candidate.record2)) {
            if left != right {
                weights.insert((left.min(right), left.max(right)), weight(&classified.result));
            }
        }
    }
    weights
}

/// The pair closing the triangle of two edges sharing one endpoint.
fn third_side((a, b): (usize, usize), (c, d): (usize, usize)) -> Option<(usize, usize)> {
    let (x, y) = if a == c {
        (b, d)
    } else if a == d {
        (b, c)
    } else if b == c {
        (a, d)
    } else if b == d {
        (a, c)
    } else {
        return None;
    };
    (x != y).then(|| (x.min(y), x.max(y)))
}

/// Rewards weight inside a part relative to its size and penalizes weight
/// across parts relative to what lies outside them.
fn score(labels: &[usize], edges: &[(usize, usize, f64)]) -> f64 {
    let n = labels.len();
    let mut sizes = vec![0usize; n];
    for &label in labels {
        sizes[label] += 1;
    }
    let mut total = 0.0;
    for &(left, right, w) in edges {
        let (l, r) = (labels[left], labels[right]);
        if l == r {
            total += w / sizes[l] as f64;
        } else {
            total -= w / (n - sizes[l]) as f64 + w / (n - sizes[r]) as f64;
        }
    }
    total
}

/// Best scoring partition of `n` elements as restricted growth labels.
///
/// Ties keep the coarser partition found first.
fn best_partition(n: usize, edges: &[(usize, usize, f64)]) -> Vec<usize> {
    let mut labels = vec![0usize; n];
    // highest label among labels[..=i]
    let mut highest = vec![0usize; n];
    let mut best = labels.clone();
    let mut best_score = score(&labels, edges);

    while let Some(i) = (1..n).rev().find(|&i| labels[i] <= highest[i - 1]) {
        labels[i] += 1;
        highest[i] = highest[i - 1].max(labels[i]);
        for j in i + 1..n {
            labels[j] = 0;
            highest[j] = highest[i];
        }
        let current = score(&labels, edges);
        if current > best_score {
            best_score = current;
            best.clone_from(&labels);
        }
    }
    best
}

fn into_parts<T: Clone>(component: &[T], labels: &[usize]) -> Vec<Vec<T>> {
    let mut slots: FxHashMap<usize, usize> = FxHashMap::default();
    let mut parts: Vec<Vec<T>> = Vec::new();
    for (element, &label) in component.iter().zip(labels) {
        let slot = *slots.entry(label).or_insert_with(|| {
            parts.push(Vec::new());
            parts.len() - 1
        });
        parts[slot].push(element.clone());
    }
    parts
}

type SharedIdExtractor<T, I> = Arc<dyn Fn(&T) -> I + Send + Sync>;

/// Transitive closure whose components are refined before being reported.
///
/// Only clusters whose membership changed since they were last reported are
/// returned, each under a fresh id. Records refined into a part of their own
/// are not reported.
pub struct RefinedTransitiveClosure<C, T, I> {
    closure: TransitiveClosure<u64, T, I>,
    refine: Box<dyn RefineCluster<T> + Send + Sync>,
    split_handler: Box<dyn ClusterSplitHandler<T> + Send + Sync>,
    id_extractor: SharedIdExtractor<T, I>,
    id_generator: Box<dyn ClusterIdGenerator<I, C> + Send>,
    /// Id and size of the cluster each record was last reported in
    reported: FxHashMap<I, (C, usize)>,
}

impl<C, T, I> RefinedTransitiveClosure<C, T, I>
where
    C: Clone + PartialEq + fmt::Debug,
    T: Clone + PartialEq + 'static,
    I: Eq + Hash + Clone + 'static,
{
    pub fn new<F, G, R>(id_extractor: F, id_generator: G, refine: R) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
        G: ClusterIdGenerator<I, C> + Send + 'static,
        R: RefineCluster<T> + Send + Sync + 'static,
    {
        let id_extractor: SharedIdExtractor<T, I> = Arc::new(id_extractor);
        let components = Arc::clone(&id_extractor);
        Self {
            closure: TransitiveClosure::new(move |record: &T| components(record), SequentialIds::new()),
            refine: Box::new(refine),
            split_handler: Box::new(ClusterSplits::Ignore),
            id_extractor,
            id_generator: Box::new(id_generator),
            reported: FxHashMap::default(),
        }
    }

    pub fn with_split_handler<H>(mut self, split_handler: H) -> Self
    where
        H: ClusterSplitHandler<T> + Send + Sync + 'static,
    {
        self.split_handler = Box::new(split_handler);
        self
    }

    pub fn with_edge_policy(mut self, edge_policy: EdgePolicy) -> Self {
        self.closure = self.closure.with_edge_policy(edge_policy);
        self
    }

    /// Id of the cluster the record with `id` was last reported in.
    pub fn reported_cluster_id(&self, id: &I) -> Option<&C> {
        self.reported.get(id).map(|(cluster_id, _)| cluster_id)
    }

    /// Remember `part` and return it as a cluster if its membership changed.
    fn report(&mut self, part: Vec<T>) -> Result<Option<Cluster<C, T>>, DedupeError> {
        let ids: Vec<I> = part.iter().map(|e| (self.id_extractor)(e)).collect();
        if part.len() < 2 {
            for id in &ids {
                self.reported.remove(id);
            }
            return Ok(None);
        }

        let unchanged = ids
            .first()
            .and_then(|first| self.reported.get(first))
            .is_some_and(|(cluster_id, size)| {
                *size == part.len()
                    && ids
                        .iter()
                        .all(|id| self.reported.get(id).is_some_and(|(other, _)| other == cluster_id))
            });
        if unchanged {
            return Ok(None);
        }

        let cluster_id = self.id_generator.next_id(&ids)?;
        for id in ids {
            self.reported.insert(id, (cluster_id.clone(), part.len()));
        }
        Ok(Some(Cluster::new(cluster_id, part)))
    }
}

impl<C, T, I> Clustering<C, T> for RefinedTransitiveClosure<C, T, I>
where
    C: Clone + PartialEq + fmt::Debug,
    T: Clone + PartialEq + 'static,
    I: Eq + Hash + Clone + 'static,
{
    fn cluster(&mut self, classified: Vec<ClassifiedCandidate<T>>) -> Result<Vec<Cluster<C, T>>, DedupeError> {
        let new_record = classified.first().map(|first| first.candidate.record1.clone());
        let components = self.closure.cluster(classified.clone())?;

        let mut changed = Vec::new();
        for component in components {
            let mut parts = self.refine.refine(&component.elements, &classified)?;
            parts.retain(|part| !part.is_empty());
            if parts.iter().map(Vec::len).sum::<usize>() != component.len() {
                warn!(parts = parts.len(), "refinement did not partition the component, keeping it whole");
                parts = vec![component.elements.clone()];
            }

            if parts.len() > 1 {
                let main = new_record
                    .as_ref()
                    .and_then(|record| parts.iter().position(|part| part.contains(record)))
                    .unwrap_or(0);
                parts[..=main].rotate_right(1);
                if self.split_handler.cluster_split(&parts[0], &parts[1..]) {
                    debug!(parts = parts.len(), "split component");
                } else {
                    trace!(parts = parts.len(), "split vetoed");
                    parts = vec![component.elements];
                }
            }

            for part in parts {
                if let Some(cluster) = self.report(part)? {
                    changed.push(cluster);
                }
            }
        }
        Ok(changed)
    }
}

impl<C, T, I> fmt::Debug for RefinedTransitiveClosure<C, T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefinedTransitiveClosure")
            .field("reported", &self.reported.len())
            .finish_non_exhaustive()
    }
}

/// Keeps records that were once reported in different clusters of the same
/// batch together from then on.
///
/// Whenever the wrapped clustering reports more than one cluster, or a
/// cluster touching records seen in such a batch, the records are linked in
/// an internal closure and that cluster is reported instead. Once the wrapped
/// clustering reports the whole internal cluster again, it is forgotten.
///
/// The internal closure draws ids from its own generator, which should not
/// overlap with the ids of the wrapped clustering.
pub struct ConsistentClustering<C, T, I> {
    clustering: Box<dyn Clustering<C, T> + Send>,
    id_extractor: SharedIdExtractor<T, I>,
    internal: TransitiveClosure<C, T, I>,
}

impl<C, T, I> ConsistentClustering<C, T, I>
where
    C: Clone + PartialEq + fmt::Debug,
    T: Clone + 'static,
    I: Eq + Hash + Clone + 'static,
{
    pub fn new<L, F, G>(clustering: L, id_extractor: F, id_generator: G) -> Self
    where
        L: Clustering<C, T> + Send + 'static,
        F: Fn(&T) -> I + Send + Sync + 'static,
        G: ClusterIdGenerator<I, C> + Send + 'static,
    {
        let id_extractor: SharedIdExtractor<T, I> = Arc::new(id_extractor);
        let internal_ids = Arc::clone(&id_extractor);
        Self {
            clustering: Box::new(clustering),
            id_extractor,
            internal: TransitiveClosure::new(move |record: &T| internal_ids(record), id_generator),
        }
    }

    /// Number of clusters currently held together.
    pub fn held_together(&self) -> usize {
        self.internal.len()
    }

    fn untouched(&self, clusters: &[Cluster<C, T>]) -> bool {
        clusters
            .iter()
            .flat_map(|cluster| &cluster.elements)
            .all(|record| !self.internal.contains(&(self.id_extractor)(record)))
    }
}

impl<C, T, I> Clustering<C, T> for ConsistentClustering<C, T, I>
where
    C: Clone + PartialEq + fmt::Debug,
    T: Clone + 'static,
    I: Eq + Hash + Clone + 'static,
{
    fn cluster(&mut self, classified: Vec<ClassifiedCandidate<T>>) -> Result<Vec<Cluster<C, T>>, DedupeError> {
        let clusters = self.clustering.cluster(classified)?;
        let Some(first) = clusters.first().and_then(|cluster| cluster.elements.first()).cloned() else {
            return Ok(clusters);
        };
        if clusters.len() == 1 && self.untouched(&clusters) {
            return Ok(clusters);
        }

        let links: Vec<ClassifiedCandidate<T>> = clusters
            .iter()
            .flat_map(|cluster| &cluster.elements)
            .map(|record| {
                ClassifiedCandidate::new(
                    Candidate::new(first.clone(), record.clone()),
                    ClassificationResult::duplicate(1.0),
                )
            })
            .collect();
        let mut linked = self.internal.cluster(links)?;
        if linked.len() != 1 {
            if !linked.is_empty() {
                warn!(clusters = linked.len(), "expected exactly one linked cluster");
            }
            return Ok(clusters);
        }
        let linked = linked.remove(0);

        if clusters.len() == 1 && clusters[0].len() == linked.len() {
            // the wrapped clustering caught up with the records held together
            self.internal.remove_cluster(&linked)?;
            return Ok(clusters);
        }
        Ok(vec![linked])
    }
}

impl<C, T, I> fmt::Debug for ConsistentClustering<C, T, I>
where
    C: Clone + PartialEq + fmt::Debug,
    T: Clone,
    I: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistentClustering")
            .field("held_together", &self.internal.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::PrefixedIds;

    /// Records carry the entity they belong to.
    type Record = (u32, &'static str);

    const X1: Record = (1, "x");
    const X2: Record = (2, "x");
    const Y3: Record = (3, "y");
    const X4: Record = (4, "x");

    fn by_entity(candidate: &Candidate<Record>) -> Result<ClassificationResult, DedupeError> {
        Ok(if candidate.record1.1 == candidate.record2.1 {
            ClassificationResult::duplicate(1.0)
        } else {
            ClassificationResult::non_duplicate(1.0)
        })
    }

    fn link(left: Record, right: Record, confidence: f64) -> ClassifiedCandidate<Record> {
        ClassifiedCandidate::new(Candidate::new(left, right), ClassificationResult::duplicate(confidence))
    }

    fn refined() -> RefinedTransitiveClosure<u64, Record, u32> {
        RefinedTransitiveClosure::new(|r: &Record| r.0, SequentialIds::new(), ClassifierRefinement::new(by_entity))
    }

    fn ids(records: &[Record]) -> Vec<u32> {
        records.iter().map(|r| r.0).collect()
    }

    #[test]
    fn test_weak_link_is_cut() {
        let refinement = ClassifierRefinement::new(by_entity);
        let parts = refinement
            .refine(&[X1, X2, Y3], &[link(Y3, X2, 0.1)])
            .unwrap();
        assert_eq!(parts, vec![vec![X1, X2], vec![Y3]]);
    }

    #[test]
    fn test_pairs_are_not_refined() {
        let refinement = ClassifierRefinement::new(by_entity);
        let parts = refinement.refine(&[X1, Y3], &[]).unwrap();
        assert_eq!(parts, vec![vec![X1, Y3]]);
    }

    #[test]
    fn test_consistent_component_stays_whole() {
        let refinement = ClassifierRefinement::new(by_entity);
        let parts = refinement.refine(&[X1, X2, X4], &[]).unwrap();
        assert_eq!(parts, vec![vec![X1, X2, X4]]);
    }

    #[test]
    fn test_large_component_is_merged_greedily() {
        let component = [(1, "x"), (2, "x"), (3, "x"), (4, "y"), (5, "y"), (6, "y")];
        let refinement = ClassifierRefinement::new(by_entity).with_max_small_cluster_size(3);
        let parts = refinement.refine(&component, &[]).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(ids(&parts[0]), vec![1, 2, 3]);
        assert_eq!(ids(&parts[1]), vec![4, 5, 6]);
    }

    #[test]
    fn test_classifier_failure_propagates() {
        let failing = |_: &Candidate<Record>| -> Result<ClassificationResult, DedupeError> {
            Err(DedupeError::EmptyCluster)
        };
        let refinement = ClassifierRefinement::new(failing);
        assert!(refinement.refine(&[X1, X2, Y3], &[]).is_err());
    }

    #[test]
    fn test_only_changed_clusters_are_reported() {
        let mut clustering = refined();

        let first = clustering.cluster(vec![link(X1, X2, 1.0)]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, 0);
        assert_eq!(ids(&first[0].elements), vec![1, 2]);

        // Y3 is cut off again and X1, X2 did not change
        let second = clustering.cluster(vec![link(Y3, X2, 0.1)]).unwrap();
        assert!(second.is_empty());
        assert_eq!(clustering.reported_cluster_id(&1), Some(&0));
        assert_eq!(clustering.reported_cluster_id(&3), None);

        let third = clustering.cluster(vec![link(X4, X1, 1.0)]).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].id, 1);
        assert_eq!(ids(&third[0].elements), vec![1, 2, 4]);
    }

    #[test]
    fn test_split_handler_sees_new_record_first() {
        let handler = |main: &[Record], split_parts: &[Vec<Record>]| {
            assert_eq!(main, &[Y3]);
            assert_eq!(split_parts, &[vec![X1, X2]]);
            true
        };
        let mut clustering = refined().with_split_handler(handler);
        clustering.cluster(vec![link(X1, X2, 1.0)]).unwrap();
        assert!(clustering.cluster(vec![link(Y3, X2, 0.1)]).unwrap().is_empty());
    }

    #[test]
    fn test_vetoed_split_keeps_component_together() {
        let mut clustering = refined().with_split_handler(ClusterSplits::KeepTogether);
        clustering.cluster(vec![link(X1, X2, 1.0)]).unwrap();

        let result = clustering.cluster(vec![link(Y3, X2, 0.1)]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 1);
        assert_eq!(ids(&result[0].elements), vec![1, 2, 3]);
    }

    /// Replays prepared results, one per call.
    struct Replay(Vec<Vec<Cluster<String, Record>>>);

    impl Clustering<String, Record> for Replay {
        fn cluster(&mut self, _: Vec<ClassifiedCandidate<Record>>) -> Result<Vec<Cluster<String, Record>>, DedupeError> {
            Ok(if self.0.is_empty() { Vec::new() } else { self.0.remove(0) })
        }
    }

    fn cluster(id: &str, elements: &[Record]) -> Cluster<String, Record> {
        Cluster::new(id.to_string(), elements.to_vec())
    }

    #[test]
    fn test_split_records_are_held_together() {
        let (a, b, c, d, e) = ((1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e"));
        let replay = Replay(vec![
            vec![cluster("0", &[a, b])],
            vec![cluster("1", &[a, c]), cluster("2", &[b, d])],
            vec![cluster("3", &[a, b, c, d])],
            vec![cluster("4", &[a, b, c, d, e])],
        ]);
        let mut clustering = ConsistentClustering::new(replay, |r: &Record| r.0, PrefixedIds::new("held-"));

        let untouched = clustering.cluster(Vec::new()).unwrap();
        assert_eq!(untouched, vec![cluster("0", &[a, b])]);

        let held = clustering.cluster(Vec::new()).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, "held-0");
        assert_eq!(ids(&held[0].elements), vec![1, 3, 2, 4]);
        assert_eq!(clustering.held_together(), 1);

        // the wrapped clustering caught up, so the held cluster is released
        let caught_up = clustering.cluster(Vec::new()).unwrap();
        assert_eq!(caught_up, vec![cluster("3", &[a, b, c, d])]);
        assert_eq!(clustering.held_together(), 0);

        let later = clustering.cluster(Vec::new()).unwrap();
        assert_eq!(later[0].id, "4");
    }
}
