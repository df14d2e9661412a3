//! Staged writes for a single protocol operation
//!
//! Position writes and index moves are buffered; the small global structures
//! (accumulator, pool globals, custody, surplus) are cloned and edited in
//! place. Nothing reaches the protocol until `commit`, so an operation that
//! fails half way leaves no trace.

use std::collections::BTreeMap;

use crate::error::{OrOverflow, Result};
use crate::ledger::PositionLedger;
use crate::redistribution::RewardAccumulator;
use crate::sorted::OrderedIndex;
use crate::stability_pool::PoolState;
use crate::state::{Custody, Position, PositionId};

pub(crate) struct Changeset {
    positions: BTreeMap<PositionId, Position>,
    /// `Some(key)` reinserts, `None` removes
    reindex: BTreeMap<PositionId, Option<u128>>,
    pub rewards: RewardAccumulator,
    pub pool: PoolState,
    pub custody: Custody,
    pub surplus: BTreeMap<PositionId, u128>,
}

impl Changeset {
    pub fn begin(
        rewards: &RewardAccumulator,
        pool: &PoolState,
        custody: &Custody,
        surplus: &BTreeMap<PositionId, u128>,
    ) -> Self {
        Self {
            positions: BTreeMap::new(),
            reindex: BTreeMap::new(),
            rewards: rewards.clone(),
            pool: pool.clone(),
            custody: custody.clone(),
            surplus: surplus.clone(),
        }
    }

    /// Staged record if any, otherwise the committed one
    pub fn read<L: PositionLedger>(&self, ledger: &L, id: PositionId) -> Position {
        self.positions.get(&id).copied().unwrap_or_else(|| ledger.read(id))
    }

    pub fn write(&mut self, id: PositionId, position: Position) {
        self.positions.insert(id, position);
    }

    pub fn reinsert(&mut self, id: PositionId, nominal_ratio: u128) {
        self.reindex.insert(id, Some(nominal_ratio));
    }

    pub fn unindex(&mut self, id: PositionId) {
        self.reindex.insert(id, None);
    }

    pub fn add_surplus(&mut self, id: PositionId, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let slot = self.surplus.entry(id).or_insert(0);
        *slot = slot.checked_add(amount).or_overflow()?;
        Ok(())
    }

    pub fn commit<L: PositionLedger, I: OrderedIndex>(
        self,
        ledger: &mut L,
        index: &mut I,
        rewards: &mut RewardAccumulator,
        pool: &mut PoolState,
        custody: &mut Custody,
        surplus: &mut BTreeMap<PositionId, u128>,
    ) {
        for (id, position) in self.positions {
            ledger.write(id, position);
        }
        for (id, key) in self.reindex {
            match key {
                Some(k) => index.reinsert(id, k),
                None => index.remove(id),
            }
        }
        *rewards = self.rewards;
        *pool = self.pool;
        *custody = self.custody;
        *surplus = self.surplus;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::sorted::SortedPositions;
    use crate::state::{Params, PositionStatus};

    #[test]
    fn test_nothing_visible_before_commit() {
        let params = Params::default();
        let mut ledger = InMemoryLedger::new();
        let mut index = SortedPositions::new();
        let mut rewards = RewardAccumulator::new();
        let mut pool = PoolState::new(&params);
        let mut custody = Custody::default();
        let mut surplus = BTreeMap::new();

        let mut cs = Changeset::begin(&rewards, &pool, &custody, &surplus);
        let pos = Position {
            collateral: 10,
            debt: 5,
            stake: 10,
            status: PositionStatus::Active,
            ..Position::default()
        };
        cs.write(PositionId(1), pos);
        cs.reinsert(PositionId(1), 200);
        cs.custody.active_collateral = 10;
        cs.add_surplus(PositionId(2), 3).unwrap();

        // Staged reads see the write, the ledger does not
        assert_eq!(cs.read(&ledger, PositionId(1)), pos);
        assert_eq!(ledger.read(PositionId(1)).status, PositionStatus::Nonexistent);
        assert_eq!(index.count(), 0);

        cs.commit(&mut ledger, &mut index, &mut rewards, &mut pool, &mut custody, &mut surplus);
        assert_eq!(ledger.read(PositionId(1)), pos);
        assert!(index.contains(PositionId(1)));
        assert_eq!(custody.active_collateral, 10);
        assert_eq!(surplus.get(&PositionId(2)), Some(&3));
    }

    #[test]
    fn test_unindex_after_reinsert_wins() {
        let params = Params::default();
        let mut ledger = InMemoryLedger::new();
        let mut index = SortedPositions::new();
        index.reinsert(PositionId(1), 100);
        let mut rewards = RewardAccumulator::new();
        let mut pool = PoolState::new(&params);
        let mut custody = Custody::default();
        let mut surplus = BTreeMap::new();

        let mut cs = Changeset::begin(&rewards, &pool, &custody, &surplus);
        cs.reinsert(PositionId(1), 300);
        cs.unindex(PositionId(1));
        cs.commit(&mut ledger, &mut index, &mut rewards, &mut pool, &mut custody, &mut surplus);

        assert!(!index.contains(PositionId(1)));
    }
}
