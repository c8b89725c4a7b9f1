//! # Candidate Selection
//!
//! Online sorted-neighborhood method. Each pass keeps its own sorted index;
//! a new record is compared with up to `window_size / 2` neighbors on each
//! side of its key and is inserted into the index only after the lookup, so
//! it never becomes its own candidate.
//!
//! Because later insertions can still fall into an earlier record's window,
//! a record is compared `2w - 1` times on average instead of the `w - 1` of an
//! offline pass.

use crate::config::{CandidateSelectionConfig, DEFAULT_WINDOW_SIZE, MIN_WINDOW_SIZE};
use crate::error::DedupeError;
use crate::model::Candidate;
use crate::sorting_key::SortingKey;
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

/// Proposes candidate pairs for a newly arrived record.
pub trait CandidateSelection<T> {
    /// Called once per record, in arrival order.
    fn select_candidates(&mut self, new_record: &T) -> Vec<Candidate<T>>;
}

/// A single pass over the data with one sorting key and window size.
pub struct Pass<T, K> {
    sorting_key: SortingKey<T, K>,
    window_size: usize,
    index: BTreeMap<K, Vec<T>>,
    indexed: usize,
}

impl<T: Clone, K: Ord> Pass<T, K> {
    /// Create a pass; `window_size` must be at least 2.
    pub fn new(sorting_key: SortingKey<T, K>, window_size: usize) -> Result<Self, DedupeError> {
        if window_size < MIN_WINDOW_SIZE {
            return Err(DedupeError::InvalidWindowSize { window_size });
        }
        Ok(Self {
            sorting_key,
            window_size,
            index: BTreeMap::new(),
            indexed: 0,
        })
    }

    pub fn sorting_key(&self) -> &SortingKey<T, K> {
        &self.sorting_key
    }

    /// Look up the neighbors of `new_record`, then index it.
    pub fn candidates(&mut self, new_record: &T) -> Vec<Candidate<T>> {
        let Some(key) = self.sorting_key.extract(new_record) else {
            return Vec::new();
        };
        let half = self.window_size / 2;

        // buckets keep insertion order on both sides
        let smaller = self
            .index
            .range::<K, _>(..&key)
            .rev()
            .flat_map(|(_, bucket)| bucket.iter())
            .take(half);
        let larger = self
            .index
            .range::<K, _>(&key..)
            .flat_map(|(_, bucket)| bucket.iter())
            .take(half);
        let candidates: Vec<Candidate<T>> = smaller
            .chain(larger)
            .map(|old_record| Candidate::new(new_record.clone(), old_record.clone()))
            .collect();

        self.index.entry(key).or_default().push(new_record.clone());
        self.indexed += 1;
        candidates
    }
}

impl<T, K> fmt::Debug for Pass<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass")
            .field("sorting_key", &self.sorting_key)
            .field("window_size", &self.window_size)
            .field("indexed", &self.indexed)
            .finish()
    }
}

/// Key-type-erased view of a [`Pass`] so that passes with different key
/// types can live side by side.
pub trait SelectionPass<T> {
    fn name(&self) -> &str;
    fn window_size(&self) -> usize;
    /// Number of records currently indexed by this pass.
    fn indexed_len(&self) -> usize;
    fn select(&mut self, new_record: &T) -> Vec<Candidate<T>>;
}

impl<T: Clone, K: Ord> SelectionPass<T> for Pass<T, K> {
    fn name(&self) -> &str {
        self.sorting_key.name()
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn indexed_len(&self) -> usize {
        self.indexed
    }

    fn select(&mut self, new_record: &T) -> Vec<Candidate<T>> {
        self.candidates(new_record)
    }
}

type BoxedPass<T> = Box<dyn SelectionPass<T> + Send>;

/// Multi-pass online sorted-neighborhood candidate selection.
pub struct SortedNeighborhood<T> {
    passes: Vec<BoxedPass<T>>,
}

impl<T: Clone + PartialEq + Send + 'static> SortedNeighborhood<T> {
    pub fn builder() -> SortedNeighborhoodBuilder<T> {
        SortedNeighborhoodBuilder::new()
    }

    /// Builder seeded with the configured default window size.
    pub fn builder_from_config(config: &CandidateSelectionConfig) -> SortedNeighborhoodBuilder<T> {
        SortedNeighborhoodBuilder::new().default_window_size(config.default_window_size)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn passes(&self) -> impl Iterator<Item = &dyn SelectionPass<T>> {
        self.passes.iter().map(|pass| pass.as_ref() as &dyn SelectionPass<T>)
    }
}

impl<T: Clone + PartialEq> CandidateSelection<T> for SortedNeighborhood<T> {
    fn select_candidates(&mut self, new_record: &T) -> Vec<Candidate<T>> {
        let mut selected: Vec<Candidate<T>> = Vec::new();
        for pass in &mut self.passes {
            let found = pass.select(new_record);
            trace!(pass = pass.name(), found = found.len(), "pass selected candidates");
            for candidate in found {
                if !selected.contains(&candidate) {
                    selected.push(candidate);
                }
            }
        }
        selected
    }
}

impl<T> fmt::Debug for SortedNeighborhood<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passes: Vec<(&str, usize)> = self
            .passes
            .iter()
            .map(|pass| (pass.name(), pass.window_size()))
            .collect();
        f.debug_struct("SortedNeighborhood")
            .field("passes", &passes)
            .finish()
    }
}

/// Builder for [`SortedNeighborhood`].
///
/// Passes keep the order in which they were added. The default window size
/// applies to keys added after it was set.
pub struct SortedNeighborhoodBuilder<T> {
    default_window_size: usize,
    passes: Vec<BoxedPass<T>>,
    error: Option<DedupeError>,
}

impl<T: Clone + PartialEq + Send + 'static> SortedNeighborhoodBuilder<T> {
    pub fn new() -> Self {
        Self {
            default_window_size: DEFAULT_WINDOW_SIZE,
            passes: Vec::new(),
            error: None,
        }
    }

    pub fn default_window_size(mut self, window_size: usize) -> Self {
        self.default_window_size = window_size;
        self
    }

    /// Add a pass using the default window size.
    pub fn sorting_key<K>(self, sorting_key: SortingKey<T, K>) -> Self
    where
        K: Ord + Send + 'static,
    {
        let window_size = self.default_window_size;
        self.sorting_key_with_window(sorting_key, window_size)
    }

    pub fn sorting_key_with_window<K>(mut self, sorting_key: SortingKey<T, K>, window_size: usize) -> Self
    where
        K: Ord + Send + 'static,
    {
        match Pass::new(sorting_key, window_size) {
            Ok(pass) => self.passes.push(Box::new(pass)),
            Err(error) => {
                self.error.get_or_insert(error);
            }
        }
        self
    }

    /// Add several passes sharing one key type and the default window size.
    pub fn sorting_keys<K, I>(self, sorting_keys: I) -> Self
    where
        K: Ord + Send + 'static,
        I: IntoIterator<Item = SortingKey<T, K>>,
    {
        sorting_keys
            .into_iter()
            .fold(self, |builder, key| builder.sorting_key(key))
    }

    /// Add an already constructed pass.
    pub fn pass<K>(mut self, pass: Pass<T, K>) -> Self
    where
        K: Ord + Send + 'static,
    {
        self.passes.push(Box::new(pass));
        self
    }

    /// Finish the builder, surfacing the first configuration error.
    pub fn build(self) -> Result<SortedNeighborhood<T>, DedupeError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(SortedNeighborhood {
            passes: self.passes,
        })
    }
}

impl<T: Clone + PartialEq + Send + 'static> Default for SortedNeighborhoodBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_key() -> SortingKey<(u32, Option<i32>), i32> {
        SortingKey::new("value", |record: &(u32, Option<i32>)| record.1)
    }

    fn ids(candidates: &[Candidate<(u32, Option<i32>)>]) -> Vec<u32> {
        candidates.iter().map(|c| c.record2.0).collect()
    }

    #[test]
    fn test_window_below_two_is_rejected() {
        let error = Pass::new(value_key(), 1).unwrap_err();
        assert!(matches!(error, DedupeError::InvalidWindowSize { window_size: 1 }));

        let built = SortedNeighborhood::builder()
            .sorting_key_with_window(value_key(), 0)
            .build();
        assert!(built.is_err());
    }

    #[test]
    fn test_first_record_has_no_candidates() {
        let mut pass = Pass::new(value_key(), 4).unwrap();
        assert!(pass.candidates(&(1, Some(10))).is_empty());
        assert_eq!(SelectionPass::indexed_len(&pass), 1);
    }

    #[test]
    fn test_smaller_then_larger_with_independent_limits() {
        let mut pass = Pass::new(value_key(), 4).unwrap();
        for (id, value) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
            pass.candidates(&(id, Some(value)));
        }

        let candidates = pass.candidates(&(6, Some(35)));
        // two nearest below in descending order, then two nearest at/above
        assert_eq!(ids(&candidates), vec![3, 2, 4, 5]);
        assert!(candidates.iter().all(|c| c.record1.0 == 6));
    }

    #[test]
    fn test_equal_keys_are_on_the_larger_side_in_insertion_order() {
        let mut pass = Pass::new(value_key(), 4).unwrap();
        pass.candidates(&(1, Some(5)));
        pass.candidates(&(2, Some(7)));
        pass.candidates(&(3, Some(7)));
        pass.candidates(&(4, Some(7)));

        let candidates = pass.candidates(&(5, Some(7)));
        assert_eq!(ids(&candidates), vec![1, 2, 3]);
    }

    #[test]
    fn test_candidate_count_bounded_by_window() {
        for window in 2..8 {
            let mut pass = Pass::new(value_key(), window).unwrap();
            for id in 0..40u32 {
                let value = ((id * 7) % 13) as i32;
                let candidates = pass.candidates(&(id, Some(value)));
                assert!(candidates.len() <= window);
            }
        }
    }

    #[test]
    fn test_absent_key_is_never_indexed() {
        let mut pass = Pass::new(value_key(), 4).unwrap();
        pass.candidates(&(1, Some(1)));
        assert!(pass.candidates(&(2, None)).is_empty());
        assert_eq!(SelectionPass::indexed_len(&pass), 1);

        let candidates = pass.candidates(&(3, Some(1)));
        assert_eq!(ids(&candidates), vec![1]);
    }

    #[test]
    fn test_passes_are_deduplicated() {
        let mut selection = SortedNeighborhood::builder()
            .default_window_size(4)
            .sorting_key(value_key())
            .sorting_key(SortingKey::new("negated", |r: &(u32, Option<i32>)| {
                r.1.map(|v| -v)
            }))
            .build()
            .unwrap();
        assert_eq!(selection.pass_count(), 2);

        selection.select_candidates(&(1, Some(1)));
        selection.select_candidates(&(2, Some(2)));
        let candidates = selection.select_candidates(&(3, Some(3)));

        assert_eq!(ids(&candidates), vec![2, 1]);
        for (i, left) in candidates.iter().enumerate() {
            for right in &candidates[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn test_builder_uses_default_window_at_call_time() {
        let selection = SortedNeighborhood::builder()
            .sorting_key(value_key())
            .default_window_size(6)
            .sorting_key(value_key())
            .build()
            .unwrap();
        let windows: Vec<usize> = selection.passes().map(|pass| pass.window_size()).collect();
        assert_eq!(windows, vec![DEFAULT_WINDOW_SIZE, 6]);
    }
}
