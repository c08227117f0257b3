use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Raw OHLCV observation as returned by a market-data provider.
///
/// Carries no invariants; validation happens when it is turned into a
/// [`MarketBar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ohlcv {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub adjusted_close: Option<Decimal>,
}

/// One validated OHLCV record, keyed by `(symbol, date)` for
/// idempotent persistence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBar {
    symbol: String,
    timestamp: DateTime<Utc>,
    date: NaiveDate,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
    adjusted_close: Option<Decimal>,
    ingested_at: DateTime<Utc>,
}

impl MarketBar {
    /// Build a bar from a provider observation. The trading date is
    /// derived from the observation timestamp and the ingestion
    /// timestamp is stamped here.
    pub fn from_provider(symbol: &str, quote: Ohlcv) -> Result<Self, BarValidationError> {
        let date = quote.timestamp.date_naive();
        Self::from_parts(
            symbol,
            quote.timestamp,
            date,
            quote.open,
            quote.high,
            quote.low,
            quote.close,
            quote.volume,
            quote.adjusted_close,
            Utc::now(),
        )
    }

    /// Reconstruct a bar from stored fields. Used by repositories when
    /// reading back; applies the same validation as the write path.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        symbol: &str,
        timestamp: DateTime<Utc>,
        date: NaiveDate,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
        adjusted_close: Option<Decimal>,
        ingested_at: DateTime<Utc>,
    ) -> Result<Self, BarValidationError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(BarValidationError::EmptySymbol);
        }

        for (name, price) in [
            ("open", open),
            ("high", high),
            ("low", low),
            ("close", close),
        ] {
            if price <= Decimal::ZERO {
                return Err(BarValidationError::NonPositivePrice(name));
            }
        }

        if let Some(adj) = adjusted_close {
            if adj <= Decimal::ZERO {
                return Err(BarValidationError::NonPositivePrice("adjusted_close"));
            }
        }

        if high < open.max(close).max(low) {
            return Err(BarValidationError::HighBelowRange);
        }

        if low > open.min(close).min(high) {
            return Err(BarValidationError::LowAboveRange);
        }

        Ok(Self {
            symbol,
            timestamp,
            date,
            open,
            high,
            low,
            close,
            volume,
            adjusted_close,
            ingested_at,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn open(&self) -> Decimal {
        self.open
    }

    pub fn high(&self) -> Decimal {
        self.high
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn close(&self) -> Decimal {
        self.close
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    pub fn adjusted_close(&self) -> Option<Decimal> {
        self.adjusted_close
    }

    pub fn ingested_at(&self) -> DateTime<Utc> {
        self.ingested_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BarValidationError {
    #[error("Symbol cannot be empty")]
    EmptySymbol,
    #[error("Price field {0} must be positive")]
    NonPositivePrice(&'static str),
    #[error("High must be at least max(open, close, low)")]
    HighBelowRange,
    #[error("Low must be at most min(open, close, high)")]
    LowAboveRange,
}
