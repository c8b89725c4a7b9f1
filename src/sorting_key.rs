//! # Sorting Keys
//!
//! Ordering keys extracted from records for the sorted-neighborhood passes.
//!
//! Prefer [`CompositeValue`] over string concatenation when a key spans
//! several attributes: concatenation changes the order as soon as leading
//! parts differ in length (`[Ed, Sheeran]` vs `[Edgar, Poe]` gives
//! `EdgarPoe < EdSheeran`), while a composite compares part by part.

use serde::{Deserialize, Serialize};
use std::fmt;

type KeyExtractor<T, K> = Box<dyn Fn(&T) -> Option<K> + Send + Sync>;

/// A named, pure key extractor.
///
/// Records for which the extractor returns `None` are excluded from the pass
/// that uses this key.
pub struct SortingKey<T, K> {
    name: String,
    extractor: KeyExtractor<T, K>,
}

impl<T, K: Ord> SortingKey<T, K> {
    pub fn new<F>(name: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&T) -> Option<K> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            extractor: Box::new(extractor),
        }
    }

    /// The name of the key, mostly used for debugging.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extract(&self, record: &T) -> Option<K> {
        (self.extractor)(record)
    }
}

impl<T, K> fmt::Debug for SortingKey<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortingKey")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A right-nested pair with lexicographic ordering.
///
/// `first` is compared before `second`; deeper compositions nest in `second`
/// so that a mismatch in an early component ends the comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeValue<A, B> {
    pub first: A,
    pub second: B,
}

impl<A: Ord, B: Ord> CompositeValue<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Append another component, producing `(first, (second, value))`.
    pub fn and<C: Ord>(self, value: C) -> CompositeValue<A, CompositeValue<B, C>> {
        CompositeValue {
            first: self.first,
            second: CompositeValue::new(self.second, value),
        }
    }

    /// Like [`and`](Self::and) but propagates an absent component.
    pub fn and_optional<C: Ord>(self, value: Option<C>) -> Option<CompositeValue<A, CompositeValue<B, C>>> {
        value.map(|value| self.and(value))
    }
}

/// Compose two optional components; absent if either side is absent, so the
/// record drops out of the pass's index.
pub fn compose<A: Ord, B: Ord>(first: Option<A>, second: Option<B>) -> Option<CompositeValue<A, B>> {
    Some(CompositeValue::new(first?, second?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_orders_lexicographically() {
        let ed = CompositeValue::new("ed", "sheeran");
        let edgar = CompositeValue::new("edgar", "poe");
        assert!(ed < edgar);
        // concatenation would flip the order
        assert!("edsheeran" > "edgarpoe");
    }

    #[test]
    fn test_composite_equality_requires_all_components() {
        let a = CompositeValue::new(1, "x").and(3);
        let b = CompositeValue::new(1, "x").and(3);
        let c = CompositeValue::new(1, "x").and(4);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn test_compose_propagates_absence() {
        assert_eq!(compose(Some(1), Some(2)), Some(CompositeValue::new(1, 2)));
        assert_eq!(compose::<i32, i32>(None, Some(2)), None);
        assert_eq!(CompositeValue::new(1, 2).and_optional::<i32>(None), None);
    }

    #[test]
    fn test_sorting_key_extracts() {
        let key = SortingKey::new("length", |s: &String| {
            if s.is_empty() {
                None
            } else {
                Some(s.len())
            }
        });
        assert_eq!(key.name(), "length");
        assert_eq!(key.extract(&"abc".to_string()), Some(3));
        assert_eq!(key.extract(&String::new()), None);
    }
}
