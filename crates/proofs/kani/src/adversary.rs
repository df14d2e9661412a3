//! Adversarial step generator

use arrayvec::ArrayVec;
#[cfg(kani)]
use kani::any;
use trove_model::math::DECIMAL_PRECISION;
use trove_model::{Adjustment, CdpError, DepositorId, PositionId};

use crate::generators::ProofProtocol;
use crate::sanitizer::{MAX_STEPS, N_DEPOSITORS, N_POSITIONS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Open,
    Draw,
    Close,
    Provide,
    Withdraw,
    Claim,
    Price,
    Liquidate,
    Batch,
}

/// One step plus the raw operands it is driven with
#[derive(Clone, Copy, Debug)]
pub struct Move {
    pub step: Step,
    pub target: u8,
    pub amount: u16,
}

pub type Plan = ArrayVec<Move, { MAX_STEPS as usize }>;

#[cfg(kani)]
impl kani::Arbitrary for Step {
    fn any() -> Self {
        let choice: u8 = any();
        match choice % 9 {
            0 => Step::Open,
            1 => Step::Draw,
            2 => Step::Close,
            3 => Step::Provide,
            4 => Step::Withdraw,
            5 => Step::Claim,
            6 => Step::Price,
            7 => Step::Liquidate,
            _ => Step::Batch,
        }
    }
}

#[cfg(kani)]
impl kani::Arbitrary for Move {
    fn any() -> Self {
        Move {
            step: any(),
            target: any(),
            amount: any(),
        }
    }
}

/// Drive one operation; amounts are whole units
pub fn apply(p: &mut ProofProtocol, m: Move) -> Result<(), CdpError> {
    let unit = DECIMAL_PRECISION;
    let position = PositionId(m.target as u64 % (N_POSITIONS as u64 + 1) + 1);
    let depositor = DepositorId(m.target as u64 % N_DEPOSITORS as u64 + 1);
    let amount = m.amount as u128;

    match m.step {
        Step::Open => {
            let net_debt = p.params().min_net_debt;
            p.open_position(position, (amount % 64 + 1) * unit, net_debt).map(|_| ())
        }
        Step::Draw => p
            .adjust_position(
                position,
                Adjustment {
                    debt_drawn: (amount % 500) * unit,
                    ..Adjustment::default()
                },
            )
            .map(|_| ()),
        Step::Close => p.close_position(position).map(|_| ()),
        Step::Provide => p.provide_to_pool(depositor, amount * unit).map(|_| ()),
        Step::Withdraw => p.withdraw_from_pool(depositor, amount * unit).map(|_| ()),
        Step::Claim => p.claim_pool_gains(depositor).map(|_| ()),
        Step::Price => {
            p.feed_mut().set((amount % 300 + 40) * unit);
            Ok(())
        }
        Step::Liquidate => p.liquidate(position).map(|_| ()),
        Step::Batch => p.liquidate_batch(m.target as usize % 4 + 1).map(|_| ()),
    }
}

/// Apply a plan, checking that every rejected move left the state untouched
///
/// Returns how many moves were accepted.
pub fn run_plan(p: &mut ProofProtocol, plan: &Plan) -> Result<usize, Move> {
    let mut accepted = 0;
    for m in plan {
        let before = p.clone();
        match apply(p, *m) {
            Ok(()) => accepted += 1,
            Err(_) if *p == before => {}
            Err(_) => return Err(*m),
        }
    }
    Ok(accepted)
}

#[cfg(kani)]
pub fn any_plan() -> Plan {
    let mut plan = Plan::new();
    let steps: u8 = any::<u8>() % MAX_STEPS + 1;
    for _ in 0..steps {
        plan.push(any());
    }
    plan
}
