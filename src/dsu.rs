//! # Disjoint Set Union (DSU)
//!
//! Union-Find over record ids, backing the transitive closure clustering.
//! Path halving on `find`, union by rank on `union`.

use rustc_hash::FxHashMap;
use std::hash::Hash;

/// Disjoint sets of record ids.
#[derive(Debug, Clone)]
pub struct RecordDsu<I> {
    /// Parent links - FxHashMap for faster hashing of small ids
    parent: FxHashMap<I, I>,
    rank: FxHashMap<I, u32>,
    /// Current number of disjoint sets
    set_count: usize,
}

impl<I: Eq + Hash + Clone> RecordDsu<I> {
    pub fn new() -> Self {
        Self {
            parent: FxHashMap::default(),
            rank: FxHashMap::default(),
            set_count: 0,
        }
    }

    /// Add a record as its own singleton set; no-op if already present.
    pub fn add_record(&mut self, id: I) {
        if self.parent.contains_key(&id) {
            return;
        }
        self.parent.insert(id.clone(), id.clone());
        self.rank.insert(id, 0);
        self.set_count += 1;
    }

    pub fn has_record(&self, id: &I) -> bool {
        self.parent.contains_key(id)
    }

    /// Find the root of a record, halving the path on the way.
    /// Untracked records are their own root.
    pub fn find(&mut self, id: &I) -> I {
        let mut current = id.clone();
        loop {
            let Some(parent) = self.parent.get(&current).cloned() else {
                return current;
            };
            if parent == current {
                return current;
            }
            // point current to its grandparent and continue from there
            let grandparent = self
                .parent
                .get(&parent)
                .cloned()
                .unwrap_or_else(|| parent.clone());
            self.parent.insert(current, grandparent.clone());
            current = grandparent;
        }
    }

    pub fn same_set(&mut self, a: &I, b: &I) -> bool {
        self.find(a) == self.find(b)
    }

    /// Union the sets of `a` and `b`, adding either if missing.
    /// Returns the root of the combined set.
    pub fn union(&mut self, a: &I, b: &I) -> I {
        self.add_record(a.clone());
        self.add_record(b.clone());
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return root_a;
        }

        let rank_a = self.rank.get(&root_a).copied().unwrap_or(0);
        let rank_b = self.rank.get(&root_b).copied().unwrap_or(0);
        self.set_count = self.set_count.saturating_sub(1);
        if rank_a < rank_b {
            self.parent.insert(root_a, root_b.clone());
            root_b
        } else if rank_a > rank_b {
            self.parent.insert(root_b, root_a.clone());
            root_a
        } else {
            self.parent.insert(root_a, root_b.clone());
            self.rank.insert(root_b.clone(), rank_b + 1);
            root_b
        }
    }

    /// Remove every member of one complete set.
    ///
    /// The ids must form a whole set; removing a partial set would leave
    /// dangling parent links for the remaining members.
    pub fn remove_set<'a>(&mut self, ids: impl IntoIterator<Item = &'a I>)
    where
        I: 'a,
    {
        let mut removed_any = false;
        for id in ids {
            removed_any |= self.parent.remove(id).is_some();
            self.rank.remove(id);
        }
        if removed_any {
            self.set_count = self.set_count.saturating_sub(1);
        }
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn set_count(&self) -> usize {
        self.set_count
    }
}

impl<I: Eq + Hash + Clone> Default for RecordDsu<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_find() {
        let mut dsu = RecordDsu::new();
        dsu.union(&"a", &"b");
        dsu.union(&"c", &"d");
        assert!(dsu.same_set(&"a", &"b"));
        assert!(!dsu.same_set(&"a", &"c"));
        assert_eq!(dsu.set_count(), 2);

        dsu.union(&"b", &"d");
        assert!(dsu.same_set(&"a", &"c"));
        assert_eq!(dsu.set_count(), 1);
        assert_eq!(dsu.len(), 4);
    }

    #[test]
    fn test_untracked_record_is_own_root() {
        let mut dsu: RecordDsu<u32> = RecordDsu::new();
        assert_eq!(dsu.find(&7), 7);
        assert!(!dsu.has_record(&7));
    }

    #[test]
    fn test_long_chain_is_compressed() {
        let mut dsu = RecordDsu::new();
        for i in 0..100u32 {
            dsu.union(&i, &(i + 1));
        }
        let root = dsu.find(&0);
        for i in 0..=100u32 {
            assert_eq!(dsu.find(&i), root);
        }
        assert_eq!(dsu.set_count(), 1);
    }

    #[test]
    fn test_remove_set() {
        let mut dsu = RecordDsu::new();
        dsu.union(&1, &2);
        dsu.union(&3, &4);
        dsu.remove_set([1, 2].iter());
        assert!(!dsu.has_record(&1));
        assert!(!dsu.has_record(&2));
        assert!(dsu.same_set(&3, &4));
        assert_eq!(dsu.set_count(), 1);
    }
}
