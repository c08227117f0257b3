use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc, Weekday};
use marketdata_application::ports::{MarketDataProvider, ProviderError};
use marketdata_domain::{DateRange, Ohlcv};
use once_cell::sync::Lazy;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use shaku::Component;
use std::collections::HashMap;
use tracing::debug;

static BASE_PRICES: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("AAPL", 190.0),
        ("GOOGL", 170.0),
        ("MSFT", 420.0),
        ("AMZN", 185.0),
        ("TSLA", 250.0),
    ])
});

/// Synthetic provider for local runs and demos. History is a
/// deterministic function of symbol and date; quotes add a small
/// random walk on top.
#[derive(Component)]
#[shaku(interface = MarketDataProvider)]
pub struct MockMarketDataProvider {
    /// Requests older than this many days yield no data.
    history_limit_days: u32,
}

impl MockMarketDataProvider {
    pub fn new(history_limit_days: u32) -> Self {
        Self { history_limit_days }
    }

    fn base_price(symbol: &str) -> f64 {
        match BASE_PRICES.get(symbol) {
            Some(price) => *price,
            // Unknown symbols get a stable pseudo-price off the name
            None => {
                let seed: u32 = symbol.bytes().map(u32::from).sum();
                20.0 + f64::from(seed % 400)
            }
        }
    }

    fn history_bar(symbol: &str, date: NaiveDate) -> Ohlcv {
        let base = Self::base_price(symbol);
        // Slow oscillation so consecutive days differ but replays match
        let phase = f64::from(date.num_days_from_ce() % 97) / 97.0;
        let drift = (phase * std::f64::consts::TAU).sin() * base * 0.03;

        let open = base + drift;
        let close = base + drift * 0.5;
        let high = open.max(close) * 1.01;
        let low = open.min(close) * 0.99;
        let volume = 500_000 + (date.num_days_from_ce() as u64 % 1000) * 1000;

        let timestamp = Utc.from_utc_datetime(&date.and_hms_opt(21, 0, 0).expect("valid time"));
        Ohlcv {
            timestamp,
            open: decimal(open),
            high: decimal(high),
            low: decimal(low),
            close: decimal(close),
            volume,
            adjusted_close: Some(decimal(close)),
        }
    }
}

fn decimal(value: f64) -> Decimal {
    Decimal::try_from((value * 10_000.0).round() / 10_000.0).expect("mock price is finite")
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    async fn fetch_history(
        &self,
        symbol: &str,
        range: DateRange,
    ) -> Result<Vec<Ohlcv>, ProviderError> {
        let oldest_available =
            Utc::now().date_naive() - ChronoDuration::days(i64::from(self.history_limit_days));
        if range.end() < oldest_available {
            return Err(ProviderError::SymbolUnavailable(symbol.to_string()));
        }

        debug!("Mock provider: generating history for {}", symbol);
        let bars = range
            .dates()
            .into_iter()
            .filter(|date| date >= &oldest_available)
            .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
            .map(|date| Self::history_bar(symbol, date))
            .collect();

        Ok(bars)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Ohlcv, ProviderError> {
        debug!("Mock provider: generating quote for {}", symbol);
        let mut bar = Self::history_bar(symbol, Utc::now().date_naive());

        let mut rng = rand::rng();
        let wiggle = 1.0 + rng.random_range(-0.005..0.005);
        let last = bar.close.to_f64().unwrap_or(1.0) * wiggle;
        bar.timestamp = Utc::now();
        bar.close = decimal(last);
        bar.high = bar.high.max(bar.close);
        bar.low = bar.low.min(bar.close);
        bar.adjusted_close = Some(bar.close);

        Ok(bar)
    }
}
