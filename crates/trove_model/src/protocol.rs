//! Protocol aggregate: ledger, index, accumulator, pool and custody
//!
//! Liquidation lives in `liquidation.rs` and the position lifecycle in
//! `lifecycle.rs`; both stage their writes in a [`Changeset`] and apply it
//! through [`Protocol::apply`].

use std::collections::BTreeMap;

use crate::changeset::Changeset;
use crate::error::{CdpError, OrOverflow, Result};
use crate::ledger::{InMemoryLedger, PositionLedger};
use crate::math::collateral_ratio;
use crate::mode::SystemMode;
use crate::oracle::{note_untrusted, PriceFeed};
use crate::redistribution::RewardAccumulator;
use crate::sorted::{OrderedIndex, SortedPositions};
use crate::stability_pool::{PoolPayout, StabilityPool};
use crate::state::{Custody, DepositorId, Params, Position, PositionId, PositionStatus};

/// A position with its pending redistribution folded in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntirePosition {
    pub collateral: u128,
    pub debt: u128,
    pub pending_collateral: u128,
    pub pending_debt: u128,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Protocol<F, L = InMemoryLedger, I = SortedPositions> {
    pub(crate) params: Params,
    pub(crate) feed: F,
    pub(crate) ledger: L,
    pub(crate) index: I,
    pub(crate) rewards: RewardAccumulator,
    pub(crate) pool: StabilityPool,
    pub(crate) custody: Custody,
    /// Collateral owed to owners of positions closed by a capped liquidation
    pub(crate) surplus: BTreeMap<PositionId, u128>,
}

impl<F: PriceFeed> Protocol<F> {
    pub fn new(params: Params, feed: F) -> Result<Self> {
        Self::with_parts(params, feed, InMemoryLedger::new(), SortedPositions::new())
    }
}

impl<F: PriceFeed, L: PositionLedger, I: OrderedIndex> Protocol<F, L, I> {
    /// Build around caller-supplied storage; `ledger` and `index` start empty
    pub fn with_parts(params: Params, feed: F, ledger: L, index: I) -> Result<Self> {
        params.validate()?;
        let pool = StabilityPool::new(&params);
        Ok(Self {
            params,
            feed,
            ledger,
            index,
            rewards: RewardAccumulator::new(),
            pool,
            custody: Custody::default(),
            surplus: BTreeMap::new(),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn rewards(&self) -> &RewardAccumulator {
        &self.rewards
    }

    pub fn pool(&self) -> &StabilityPool {
        &self.pool
    }

    pub fn custody(&self) -> &Custody {
        &self.custody
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    pub fn active_count(&self) -> usize {
        self.index.count()
    }

    pub fn surplus_of(&self, id: PositionId) -> u128 {
        self.surplus.get(&id).copied().unwrap_or(0)
    }

    /// Fetch a price for one operation
    pub fn fetch_price(&mut self) -> u128 {
        let reading = self.feed.fetch_price();
        note_untrusted(&reading);
        reading.value
    }

    pub fn position(&self, id: PositionId) -> Position {
        self.ledger.read(id)
    }

    pub fn pending_rewards(&self, id: PositionId) -> Result<(u128, u128)> {
        let pos = self.ledger.read(id);
        Ok((self.rewards.pending_collateral(&pos)?, self.rewards.pending_debt(&pos)?))
    }

    pub fn entire_position(&self, id: PositionId) -> Result<EntirePosition> {
        let pos = self.ledger.read(id);
        entire_of(&self.rewards, &pos)
    }

    /// Health ratio including pending redistribution
    pub fn icr(&self, id: PositionId, price: u128) -> Result<u128> {
        let entire = self.entire_position(id)?;
        Ok(collateral_ratio(entire.collateral, entire.debt, price))
    }

    /// System ratio over realized and pending collateral and debt
    pub fn tcr(&self, price: u128) -> u128 {
        collateral_ratio(self.custody.entire_collateral(), self.custody.entire_debt(), price)
    }

    pub fn system_mode(&self, price: u128) -> SystemMode {
        SystemMode::from_ratio(self.tcr(price), &self.params)
    }

    pub fn provide_to_pool(&mut self, depositor: DepositorId, amount: u128) -> Result<PoolPayout> {
        self.pool.provide(depositor, amount)
    }

    /// Withdraw from the pool; refused while the worst position is liquidatable
    pub fn withdraw_from_pool(&mut self, depositor: DepositorId, amount: u128) -> Result<PoolPayout> {
        let price = self.fetch_price();
        if let Some(worst) = self.index.worst() {
            if self.icr(worst, price)? < self.params.minimum_ratio {
                return Err(CdpError::WithdrawalBlocked(worst));
            }
        }
        self.pool.withdraw(depositor, amount)
    }

    pub fn claim_pool_gains(&mut self, depositor: DepositorId) -> Result<PoolPayout> {
        self.pool.claim_gains(depositor)
    }

    pub fn issue_secondary(&mut self, amount: u128) -> Result<()> {
        self.pool.issue_secondary(amount)
    }

    /// Drop terminal records from the ledger; returns how many were removed
    pub fn prune_closed(&mut self) -> usize {
        let closed: Vec<PositionId> = self
            .ledger
            .ids()
            .into_iter()
            .filter(|id| {
                let status = self.ledger.read(*id).status;
                status != PositionStatus::Active && status != PositionStatus::Nonexistent
            })
            .collect();
        for id in &closed {
            self.ledger.remove(*id);
        }
        closed.len()
    }

    pub(crate) fn stage(&self) -> Changeset {
        Changeset::begin(&self.rewards, &self.pool.state, &self.custody, &self.surplus)
    }

    pub(crate) fn apply(&mut self, changes: Changeset) {
        changes.commit(
            &mut self.ledger,
            &mut self.index,
            &mut self.rewards,
            &mut self.pool.state,
            &mut self.custody,
            &mut self.surplus,
        );
    }
}

pub(crate) fn entire_of(rewards: &RewardAccumulator, pos: &Position) -> Result<EntirePosition> {
    let pending_collateral = rewards.pending_collateral(pos)?;
    let pending_debt = rewards.pending_debt(pos)?;
    Ok(EntirePosition {
        collateral: pos.collateral.checked_add(pending_collateral).or_overflow()?,
        debt: pos.debt.checked_add(pending_debt).or_overflow()?,
        pending_collateral,
        pending_debt,
    })
}
