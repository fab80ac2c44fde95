use rust_decimal::dec;

use yield_allocator_bot::monitor::{ClaimDecision, GuardConfig, SkipReason, evaluate_claim};

fn guards() -> GuardConfig {
    GuardConfig {
        min_claim_amount: dec!(10),
        max_gas_cost_usd: dec!(2),
        profit_margin_threshold: dec!(0.5),
    }
}

#[test]
fn pool_with_claimable_yield_triggers() {
    // Accrued 12 against min 10, gas 1.5 against max 2,
    // margin (12 - 1.5) / 12 = 87.5% against threshold 50%
    let decision = evaluate_claim(dec!(12), dec!(1.5), &guards());
    assert_eq!(decision, ClaimDecision::Claim);
}

#[test]
fn pool_below_minimum_skips_at_first_guard() {
    let decision = evaluate_claim(dec!(5), dec!(1.5), &guards());
    match decision {
        ClaimDecision::Skip(reason) => {
            assert_eq!(reason.to_string(), "yield 5 below minimum 10");
        }
        other => panic!("expected skip, got {other:?}"),
    }
}

#[test]
fn every_guard_must_pass() {
    // Gas guard fails even though yield clears the minimum
    let decision = evaluate_claim(dec!(100), dec!(3), &guards());
    assert!(matches!(
        decision,
        ClaimDecision::Skip(SkipReason::GasTooHigh { .. })
    ));

    // Margin guard fails even though yield and gas pass individually:
    // (10 - 2) / 10 = 80%, threshold 90%
    let strict = GuardConfig {
        profit_margin_threshold: dec!(0.9),
        ..guards()
    };
    let decision = evaluate_claim(dec!(10), dec!(2), &strict);
    assert!(matches!(
        decision,
        ClaimDecision::Skip(SkipReason::MarginTooThin { .. })
    ));
}

#[test]
fn boundaries_are_inclusive() {
    // Yield exactly at the minimum passes
    assert_eq!(evaluate_claim(dec!(10), dec!(1), &guards()), ClaimDecision::Claim);
    // Gas exactly at the maximum passes
    assert_eq!(evaluate_claim(dec!(20), dec!(2), &guards()), ClaimDecision::Claim);
    // Margin exactly at the threshold passes: (4 - 2) / 4 = 50%
    let loose = GuardConfig {
        min_claim_amount: dec!(4),
        ..guards()
    };
    assert_eq!(evaluate_claim(dec!(4), dec!(2), &loose), ClaimDecision::Claim);
}

#[test]
fn epsilon_below_boundary_fails() {
    assert!(matches!(
        evaluate_claim(dec!(9.99999999), dec!(1), &guards()),
        ClaimDecision::Skip(SkipReason::BelowMinimum { .. })
    ));
    assert!(matches!(
        evaluate_claim(dec!(20), dec!(2.00000001), &guards()),
        ClaimDecision::Skip(SkipReason::GasTooHigh { .. })
    ));
}

#[test]
fn guard_failure_is_a_skip_not_an_error() {
    // Skips carry a human-readable reason for the snapshot row
    let decision = evaluate_claim(dec!(0), dec!(1), &guards());
    match decision {
        ClaimDecision::Skip(reason) => assert_eq!(reason.to_string(), "no yield accrued"),
        other => panic!("expected skip, got {other:?}"),
    }
}
