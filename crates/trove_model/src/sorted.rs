//! Ordered index of active positions
//!
//! Positions are keyed by nominal collateral ratio (`collateral * 1e20 / debt`)
//! recorded at their last touch. Pending redistribution is not reflected in
//! the key; only touched positions are reinserted.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use crate::state::PositionId;

pub trait OrderedIndex {
    /// Lowest-ratio position
    fn worst(&self) -> Option<PositionId>;
    /// The position immediately after `id` towards healthier ratios
    fn next_healthier(&self, id: PositionId) -> Option<PositionId>;
    /// Insert `id`, or move it if already present
    fn reinsert(&mut self, id: PositionId, nominal_ratio: u128);
    fn remove(&mut self, id: PositionId);
    fn contains(&self, id: PositionId) -> bool;
    fn count(&self) -> usize;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortedPositions {
    by_ratio: BTreeSet<(u128, PositionId)>,
    keys: HashMap<PositionId, u128>,
}

impl SortedPositions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids from worst to healthiest
    pub fn iter(&self) -> impl Iterator<Item = PositionId> + '_ {
        self.by_ratio.iter().map(|(_, id)| *id)
    }
}

impl OrderedIndex for SortedPositions {
    fn worst(&self) -> Option<PositionId> {
        self.by_ratio.iter().next().map(|(_, id)| *id)
    }

    fn next_healthier(&self, id: PositionId) -> Option<PositionId> {
        let key = *self.keys.get(&id)?;
        self.by_ratio
            .range((Bound::Excluded((key, id)), Bound::Unbounded))
            .next()
            .map(|(_, next)| *next)
    }

    fn reinsert(&mut self, id: PositionId, nominal_ratio: u128) {
        if let Some(old) = self.keys.insert(id, nominal_ratio) {
            self.by_ratio.remove(&(old, id));
        }
        self.by_ratio.insert((nominal_ratio, id));
    }

    fn remove(&mut self, id: PositionId) {
        if let Some(old) = self.keys.remove(&id) {
            self.by_ratio.remove(&(old, id));
        }
    }

    fn contains(&self, id: PositionId) -> bool {
        self.keys.contains_key(&id)
    }

    fn count(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_and_walk() {
        let mut idx = SortedPositions::new();
        idx.reinsert(PositionId(1), 300);
        idx.reinsert(PositionId(2), 100);
        idx.reinsert(PositionId(3), 200);

        assert_eq!(idx.worst(), Some(PositionId(2)));
        assert_eq!(idx.next_healthier(PositionId(2)), Some(PositionId(3)));
        assert_eq!(idx.next_healthier(PositionId(3)), Some(PositionId(1)));
        assert_eq!(idx.next_healthier(PositionId(1)), None);
    }

    #[test]
    fn test_reinsert_moves_entry() {
        let mut idx = SortedPositions::new();
        idx.reinsert(PositionId(1), 100);
        idx.reinsert(PositionId(2), 200);
        idx.reinsert(PositionId(1), 300);

        assert_eq!(idx.count(), 2);
        assert_eq!(idx.worst(), Some(PositionId(2)));
    }

    #[test]
    fn test_equal_ratios_ordered_by_id() {
        let mut idx = SortedPositions::new();
        idx.reinsert(PositionId(9), 100);
        idx.reinsert(PositionId(4), 100);
        assert_eq!(idx.iter().collect::<Vec<_>>(), vec![PositionId(4), PositionId(9)]);
    }

    #[test]
    fn test_remove() {
        let mut idx = SortedPositions::new();
        idx.reinsert(PositionId(1), 100);
        idx.remove(PositionId(1));
        idx.remove(PositionId(1));
        assert_eq!(idx.count(), 0);
        assert!(!idx.contains(PositionId(1)));
        assert_eq!(idx.worst(), None);
    }
}
