use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use eyre::Result;
use rust_decimal::Decimal;

// ABI for Chainlink AggregatorV3Interface
abigen!(
    AggregatorV3Interface,
    r#"[
        function latestRoundData() external view returns (uint80, int256, uint256, uint256, uint80)
        function decimals() external view returns (uint8)
    ]"#
);

const PRICE_MAX_AGE: Duration = Duration::from_secs(60);

/// Native-token USD price from a Chainlink feed, cached briefly so one
/// monitoring cycle does not hammer the aggregator.
pub struct NativePriceOracle {
    feed: AggregatorV3Interface<Provider<Http>>,
    cached: tokio::sync::Mutex<Option<(Decimal, Instant)>>,
}

impl NativePriceOracle {
    pub fn new(provider: Arc<Provider<Http>>, aggregator: Address) -> Self {
        Self {
            feed: AggregatorV3Interface::new(aggregator, provider),
            cached: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn usd_price(&self) -> Result<Decimal> {
        let mut cached = self.cached.lock().await;
        if let Some((price, at)) = *cached {
            if at.elapsed() < PRICE_MAX_AGE {
                return Ok(price);
            }
        }

        let decimals = self.feed.decimals().call().await?;
        let round_data = self.feed.latest_round_data().call().await?;
        let raw_answer = round_data.1;
        if raw_answer <= I256::zero() {
            eyre::bail!(
                "Price feed {:?} returned invalid answer",
                self.feed.address()
            );
        }

        let price = Decimal::from_i128_with_scale(raw_answer.as_i128(), decimals as u32);
        *cached = Some((price, Instant::now()));
        Ok(price)
    }
}
