use std::collections::HashMap;
use std::hash::Hash;

use crate::model::{IdMapping, RowId};

/// One component of an equivalence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Text(String),
    Reference(Option<RowId>),
}

pub type EquivalenceKey = Vec<KeyPart>;

/// Row ids partitioned by key, in first-seen order.
#[derive(Debug, Clone)]
pub struct Groups<K> {
    index: HashMap<K, usize>,
    groups: Vec<(K, Vec<RowId>)>,
}

impl<K: Hash + Eq + Clone> Groups<K> {
    pub fn new() -> Self {
        Self { index: HashMap::new(), groups: Vec::new() }
    }

    pub fn push(&mut self, key: K, id: RowId) {
        match self.index.get(&key) {
            Some(&slot) => self.groups[slot].1.push(id),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![id]));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[RowId])> {
        self.groups.iter().map(|(k, ids)| (k, ids.as_slice()))
    }

    /// Groups with more than one member.
    pub fn duplicates(&self) -> impl Iterator<Item = (&K, &[RowId])> {
        self.iter().filter(|(_, ids)| ids.len() > 1)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.groups.iter().map(|(_, ids)| ids.len()).sum()
    }
}

impl<K: Hash + Eq + Clone> Default for Groups<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone> FromIterator<(K, RowId)> for Groups<K> {
    fn from_iter<I: IntoIterator<Item = (K, RowId)>>(iter: I) -> Self {
        let mut groups = Groups::new();
        for (key, id) in iter {
            groups.push(key, id);
        }
        groups
    }
}

/// Partition `(id, key)` rows by key.
pub fn group_by_key<K, I>(rows: I) -> Groups<K>
where
    K: Hash + Eq + Clone,
    I: IntoIterator<Item = (RowId, K)>,
{
    rows.into_iter().map(|(id, key)| (key, id)).collect()
}

/// Smallest id wins. `None` only for an empty class.
pub fn choose_canonical(ids: &[RowId]) -> Option<RowId> {
    ids.iter().copied().min()
}

/// What to keep and what to drop for a set of groups.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub mapping: IdMapping,
    /// Non-canonical ids, ascending.
    pub doomed: Vec<RowId>,
    pub duplicate_groups: usize,
}

pub fn resolve<K: Hash + Eq + Clone>(groups: &Groups<K>) -> Resolution {
    let mut resolution = Resolution::default();
    for (_, ids) in groups.duplicates() {
        let Some(canonical) = choose_canonical(ids) else {
            continue;
        };
        resolution.duplicate_groups += 1;
        for &id in ids {
            if id != canonical {
                resolution.mapping.insert(id, canonical);
                resolution.doomed.push(id);
            }
        }
    }
    resolution.doomed.sort_unstable();
    resolution.doomed.dedup();
    resolution
}
