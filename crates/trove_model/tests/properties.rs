//! Property tests: random operation sequences keep the accounting sound

mod common;

use common::*;
use proptest::prelude::*;
use trove_model::helpers;
use trove_model::{Adjustment, CdpError, DepositorId, PositionId};

#[derive(Clone, Debug)]
enum Op {
    Open { id: u64, collateral: u128, net_debt: u128 },
    Adjust { id: u64, add: u128, draw: u128 },
    Close { id: u64 },
    Provide { who: u64, amount: u128 },
    Withdraw { who: u64, amount: u128 },
    Claim { who: u64 },
    Issue { amount: u128 },
    Price { price: u128 },
    Liquidate { id: u64 },
    Batch { max: usize },
    List { ids: Vec<u64> },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..8, 12u128..60, 0u128..3_000, 0u128..1_000).prop_map(|(id, c, d, wei)| Op::Open {
            id,
            collateral: c * UNIT + wei,
            net_debt: 1_800 * UNIT + d * UNIT / 2,
        }),
        1 => (0u64..8, 0u128..5, 0u128..300).prop_map(|(id, add, draw)| Op::Adjust {
            id,
            add: add * UNIT,
            draw: draw * UNIT,
        }),
        1 => (0u64..8).prop_map(|id| Op::Close { id }),
        2 => (0u64..4, 1u128..5_000).prop_map(|(who, a)| Op::Provide { who, amount: a * UNIT + 7 }),
        1 => (0u64..4, 1u128..3_000).prop_map(|(who, a)| Op::Withdraw { who, amount: a * UNIT }),
        1 => (0u64..4).prop_map(|who| Op::Claim { who }),
        1 => (1u128..100).prop_map(|a| Op::Issue { amount: a * UNIT }),
        2 => (80u128..260).prop_map(|p| Op::Price { price: p * UNIT }),
        2 => (0u64..8).prop_map(|id| Op::Liquidate { id }),
        2 => (1usize..10).prop_map(|max| Op::Batch { max }),
        1 => prop::collection::vec(0u64..8, 1..6).prop_map(|ids| Op::List { ids }),
    ]
}

fn apply(p: &mut TestProtocol, op: &Op) -> Result<(), CdpError> {
    match op.clone() {
        Op::Open { id, collateral, net_debt } => p.open_position(PositionId(id), collateral, net_debt).map(|_| ()),
        Op::Adjust { id, add, draw } => p
            .adjust_position(
                PositionId(id),
                Adjustment {
                    collateral_added: add,
                    debt_drawn: draw,
                    ..Adjustment::default()
                },
            )
            .map(|_| ()),
        Op::Close { id } => p.close_position(PositionId(id)).map(|_| ()),
        Op::Provide { who, amount } => p.provide_to_pool(DepositorId(who), amount).map(|_| ()),
        Op::Withdraw { who, amount } => p.withdraw_from_pool(DepositorId(who), amount).map(|_| ()),
        Op::Claim { who } => p.claim_pool_gains(DepositorId(who)).map(|_| ()),
        Op::Issue { amount } => p.issue_secondary(amount),
        Op::Price { price } => {
            set_price(p, price);
            Ok(())
        }
        Op::Liquidate { id } => p.liquidate(PositionId(id)).map(|_| ()),
        Op::Batch { max } => p.liquidate_batch(max).map(|_| ()),
        Op::List { ids } => {
            let ids: Vec<PositionId> = ids.into_iter().map(PositionId).collect();
            p.liquidate_list(&ids).map(|_| ())
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_accounting_invariants(ops in prop::collection::vec(op_strategy(), 1..48)) {
        let mut p = protocol_at(200 * UNIT);
        for op in &ops {
            let before = p.clone();
            if apply(&mut p, op).is_err() {
                prop_assert_eq!(&p, &before, "rejected {:?} changed state", op);
            }

            prop_assert!(helpers::collateral_conserved(&p), "collateral after {:?}", op);
            prop_assert!(helpers::debt_conserved(&p), "debt after {:?}", op);
            prop_assert!(helpers::rounding_gap(&p).unwrap().is_some(), "over-claim after {:?}", op);
            prop_assert!(helpers::total_stakes_consistent(&p));
            prop_assert!(helpers::index_matches_ledger(&p));

            let depositors = p.pool().depositors().count() as u128;
            let (deposit_short, gain_short) = helpers::pool_shortfall(&p).unwrap();
            prop_assert!(deposit_short <= depositors * 1_000_000, "deposits short {}", deposit_short);
            prop_assert!(gain_short <= depositors * 1_000_000, "gains short {}", gain_short);
        }
    }

    #[test]
    fn prop_last_position_never_liquidated(collateral in 15u128..40, price in 1u128..200) {
        let mut p = protocol_at(200 * UNIT);
        p.open_position(PositionId(1), collateral * UNIT, 1_800 * UNIT).ok();
        set_price(&mut p, price * UNIT);
        let before = p.clone();

        prop_assert!(p.liquidate(PositionId(1)).is_err());
        prop_assert!(p.liquidate_batch(10).is_err());
        prop_assert_eq!(&p, &before);
    }
}
