use chrono::{Duration, Utc};
use ethers::types::Address;
use rust_decimal::{Decimal, dec};

use yield_allocator_bot::rebalancer::{PlannerConfig, PoolAprView, build_rebalance_plan};

fn planner() -> PlannerConfig {
    PlannerConfig {
        safety_multiplier: dec!(2),
        max_move_fraction: dec!(0.25),
        staleness: Duration::seconds(3600),
        holding_period_days: 365,
    }
}

fn pool(protocol: &str, index: u64, apr: Decimal, balance: Decimal) -> PoolAprView {
    PoolAprView {
        protocol: protocol.to_string(),
        pool: Address::from_low_u64_be(index),
        apr,
        risk_weight: Decimal::ONE,
        balance,
        computed_at: Utc::now(),
    }
}

#[test]
fn spread_worth_the_gas_produces_a_move() {
    // Pool X at 4%, pool Y at 9%: the spread on the capped amount over the
    // holding period far exceeds gas x safety multiplier
    let now = Utc::now();
    let pools = vec![
        pool("hyperlend", 1, dec!(0.04), dec!(800)),
        pool("hypurrfi", 2, dec!(0.09), dec!(3200)),
    ];

    let plan = build_rebalance_plan(&pools, dec!(4000), dec!(1), now, &planner());

    assert_eq!(plan.moves.len(), 1);
    let mv = &plan.moves[0];
    assert_eq!(mv.source_protocol, "hyperlend");
    assert_eq!(mv.dest_protocol, "hypurrfi");
    assert_eq!(mv.amount, dec!(800));
    // 5% of 800 over one year
    assert_eq!(mv.expected_gain_usd, dec!(40.00));
}

#[test]
fn oversized_move_is_capped_not_rejected() {
    let now = Utc::now();
    let pools = vec![
        pool("hyperlend", 1, dec!(0.04), dec!(5000)),
        pool("hypurrfi", 2, dec!(0.09), dec!(1000)),
    ];

    let plan = build_rebalance_plan(&pools, dec!(6000), dec!(1), now, &planner());

    assert_eq!(plan.moves.len(), 1);
    // 25% of 6000, though the source holds 5000
    assert_eq!(plan.moves[0].amount, dec!(1500.00));
}

#[test]
fn thin_spread_is_left_alone() {
    let now = Utc::now();
    let pools = vec![
        pool("hyperlend", 1, dec!(0.0400), dec!(100)),
        pool("hypurrfi", 2, dec!(0.0401), dec!(100)),
    ];

    let plan = build_rebalance_plan(&pools, dec!(200), dec!(1), now, &planner());
    assert!(plan.moves.is_empty());
}

#[test]
fn stale_apr_excluded_from_ranking() {
    let now = Utc::now();
    let mut stale = pool("hypurrfi", 2, dec!(0.20), dec!(1000));
    stale.computed_at = now - Duration::seconds(7200);
    let pools = vec![pool("hyperlend", 1, dec!(0.04), dec!(1000)), stale];

    let plan = build_rebalance_plan(&pools, dec!(2000), dec!(1), now, &planner());

    // The 20% pool looks attractive but its data is too old to act on,
    // leaving fewer than two rankable pools
    assert!(plan.moves.is_empty());
    assert!(plan.notes.iter().any(|n| n.contains("stale")));
}

#[test]
fn empty_vault_produces_no_moves() {
    let now = Utc::now();
    let pools = vec![
        pool("hyperlend", 1, dec!(0.04), dec!(0)),
        pool("hypurrfi", 2, dec!(0.09), dec!(0)),
    ];

    let plan = build_rebalance_plan(&pools, dec!(0), dec!(1), now, &planner());
    assert!(plan.moves.is_empty());
}
