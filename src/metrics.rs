use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};

use crate::error::MetricsError;

pub const SECONDS_PER_YEAR: i64 = 365 * 24 * 60 * 60;
pub const DAYS_PER_YEAR: i64 = 365;

/// Convention for deriving APY from a measured window return.
///
/// `Daily` compounds the annualized simple rate at daily frequency; `Window`
/// exponentiates the observed window growth to a year, the way the share
/// price itself compounds. The two differ materially for volatile windows,
/// so the choice is configuration, not code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApyCompounding {
    Daily,
    Window,
}

impl FromStr for ApyCompounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "window" => Ok(Self::Window),
            other => Err(format!("unknown APY compounding convention: {other}")),
        }
    }
}

/// One observation of the vault share price.
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub at: DateTime<Utc>,
    pub share_price: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeWeightedReturn {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub period_return: Decimal,
    pub apr: Decimal,
    pub apy: Decimal,
}

/// Time-weighted return over an ordered window of share-price samples.
///
/// Each sub-interval's simple return is compounded into the window growth
/// factor, which makes the figure insensitive to external deposits and
/// withdrawals between samples. The annualized APR is the simple
/// extrapolation of the window return; APY follows the configured
/// compounding convention.
pub fn compute_time_weighted_return(
    points: &[PricePoint],
    convention: ApyCompounding,
) -> Result<TimeWeightedReturn, MetricsError> {
    if points.len() < 2 {
        return Err(MetricsError::InsufficientData { have: points.len() });
    }

    let window_start = points[0].at;
    let window_end = points[points.len() - 1].at;
    let window_secs = (window_end - window_start).num_seconds();
    if window_secs <= 0 {
        return Err(MetricsError::EmptyWindow);
    }

    let mut growth = Decimal::ONE;
    for pair in points.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev.share_price <= Decimal::ZERO {
            return Err(MetricsError::NonPositivePrice { at: prev.at });
        }
        if next.share_price <= Decimal::ZERO {
            return Err(MetricsError::NonPositivePrice { at: next.at });
        }
        // (1 + r_i) where r_i = (p[i+1] - p[i]) / p[i]
        growth *= next.share_price / prev.share_price;
    }

    let period_return = growth - Decimal::ONE;
    let years = Decimal::from(window_secs) / Decimal::from(SECONDS_PER_YEAR);
    let apr = period_return / years;

    let apy = match convention {
        ApyCompounding::Daily => {
            (Decimal::ONE + apr / Decimal::from(DAYS_PER_YEAR)).powi(DAYS_PER_YEAR) - Decimal::ONE
        }
        ApyCompounding::Window => growth.powd(Decimal::ONE / years) - Decimal::ONE,
    };

    Ok(TimeWeightedReturn {
        window_start,
        window_end,
        period_return,
        apr,
        apy,
    })
}

/// APY equivalent of an instantaneous annualized rate, daily compounding.
pub fn apy_from_apr(apr: Decimal) -> Decimal {
    (Decimal::ONE + apr / Decimal::from(DAYS_PER_YEAR)).powi(DAYS_PER_YEAR) - Decimal::ONE
}

/// Share price from raw vault totals; `None` when the vault has no shares.
pub fn share_price(total_assets: Decimal, total_shares: Decimal) -> Option<Decimal> {
    if total_shares <= Decimal::ZERO {
        None
    } else {
        Some(total_assets / total_shares)
    }
}

/// Vault-level accrued yield: current value over principal, floored at zero.
pub fn accrued_yield(total_assets: Decimal, total_principal: Decimal, idle_assets: Decimal) -> Decimal {
    (total_assets - total_principal - idle_assets).max(Decimal::ZERO)
}

/// One pool's proportional share of the vault-level yield.
pub fn pool_yield_share(total_yield: Decimal, principal: Decimal, total_principal: Decimal) -> Decimal {
    if total_principal <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    total_yield * principal / total_principal
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::dec;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn point(secs: i64, price: Decimal) -> PricePoint {
        PricePoint {
            at: at(secs),
            share_price: price,
        }
    }

    fn assert_close(a: Decimal, b: Decimal) {
        assert!((a - b).abs() < dec!(0.000000001), "{a} != {b}");
    }

    #[test]
    fn window_split_recompounds_to_whole() {
        let points = vec![
            point(0, dec!(1.00)),
            point(3600, dec!(1.01)),
            point(7200, dec!(1.005)),
            point(10800, dec!(1.02)),
            point(14400, dec!(1.04)),
        ];

        let whole = compute_time_weighted_return(&points, ApyCompounding::Daily).unwrap();
        let first = compute_time_weighted_return(&points[..3], ApyCompounding::Daily).unwrap();
        let second = compute_time_weighted_return(&points[2..], ApyCompounding::Daily).unwrap();

        let recompounded =
            (Decimal::ONE + first.period_return) * (Decimal::ONE + second.period_return)
                - Decimal::ONE;
        assert_close(whole.period_return, recompounded);
    }

    #[test]
    fn single_snapshot_is_insufficient_not_zero() {
        let points = vec![point(0, dec!(1.0))];
        let err = compute_time_weighted_return(&points, ApyCompounding::Daily).unwrap_err();
        assert_eq!(err, MetricsError::InsufficientData { have: 1 });

        let err = compute_time_weighted_return(&[], ApyCompounding::Daily).unwrap_err();
        assert_eq!(err, MetricsError::InsufficientData { have: 0 });
    }

    #[test]
    fn negative_yield_compounds_correctly() {
        let points = vec![
            point(0, dec!(1.00)),
            point(43200, dec!(0.99)),
            point(86400, dec!(0.97)),
        ];
        let twr = compute_time_weighted_return(&points, ApyCompounding::Daily).unwrap();
        assert_close(twr.period_return, dec!(-0.03));
        assert!(twr.apr < Decimal::ZERO);
    }

    #[test]
    fn zero_duration_window_rejected() {
        let points = vec![point(0, dec!(1.0)), point(0, dec!(1.1))];
        let err = compute_time_weighted_return(&points, ApyCompounding::Daily).unwrap_err();
        assert_eq!(err, MetricsError::EmptyWindow);
    }

    #[test]
    fn non_positive_price_rejected() {
        let points = vec![point(0, dec!(1.0)), point(60, dec!(0))];
        let err = compute_time_weighted_return(&points, ApyCompounding::Daily).unwrap_err();
        assert!(matches!(err, MetricsError::NonPositivePrice { .. }));
    }

    #[test]
    fn apr_annualizes_window_return() {
        // +1% over exactly one day
        let points = vec![point(0, dec!(1.00)), point(86400, dec!(1.01))];
        let twr = compute_time_weighted_return(&points, ApyCompounding::Daily).unwrap();
        assert_close(twr.apr, dec!(0.01) * Decimal::from(DAYS_PER_YEAR));
    }

    #[test]
    fn window_convention_matches_share_price_exponentiation() {
        let points = vec![point(0, dec!(1.00)), point(86400, dec!(1.001))];
        let twr = compute_time_weighted_return(&points, ApyCompounding::Window).unwrap();
        let expected = dec!(1.001).powd(Decimal::from(DAYS_PER_YEAR)) - Decimal::ONE;
        assert!((twr.apy - expected).abs() < dec!(0.0001));
    }

    #[test]
    fn daily_compounding_beats_simple_rate() {
        let apy = apy_from_apr(dec!(0.10));
        assert!(apy > dec!(0.10));
        assert!(apy < dec!(0.11));
    }

    #[test]
    fn share_price_requires_shares() {
        assert_eq!(share_price(dec!(100), dec!(0)), None);
        assert_eq!(share_price(dec!(110), dec!(100)), Some(dec!(1.1)));
    }

    #[test]
    fn yield_share_is_proportional() {
        assert_eq!(pool_yield_share(dec!(12), dec!(50), dec!(100)), dec!(6));
        assert_eq!(pool_yield_share(dec!(12), dec!(50), dec!(0)), dec!(0));
    }
}
