//! Glue between the price cache and the indicator engine, shared by the
//! command line and the dashboard.

use crate::error::{ExplorerError, Result};
use crate::indicators::{self, CandlestickView, IndicatorView};
use crate::price_cache::{self, PriceSeries};
use crate::provider::PriceProvider;
use crate::storage_utils::{AsyncStorageManager, MacdConfig};
use chrono::NaiveDate;
use std::fmt;

/// Time-series analyses offered for a single ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analysis {
    Macd,
}

impl Analysis {
    pub const ALL: [Analysis; 1] = [Analysis::Macd];
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Analysis::Macd => f.write_str("Moving average convergence-divergence"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MacdReport {
    pub series: PriceSeries,
    pub params: MacdConfig,
    pub candles: CandlestickView,
    pub indicator: IndicatorView,
}

/// Resolved series of every selected ticker plus the ones that failed.
#[derive(Debug, Default)]
pub struct PriceHistory {
    pub series: Vec<PriceSeries>,
    pub failures: Vec<(String, ExplorerError)>,
}

impl PriceHistory {
    /// One line naming every failed symbol, for status bars.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|(symbol, e)| format!("{} ({})", symbol, e))
            .collect();
        Some(format!("Failed: {}", parts.join("; ")))
    }
}

/// Close prices of every selected ticker, for the comparison chart.
pub async fn price_history(
    symbols: &[String],
    storage: &AsyncStorageManager,
    provider: &dyn PriceProvider,
    start: NaiveDate,
) -> PriceHistory {
    let mut history = PriceHistory::default();
    for resolved in price_cache::resolve(symbols, storage, provider, start).await {
        match resolved.series {
            Ok(series) => history.series.push(series),
            Err(e) => history.failures.push((resolved.symbol, e)),
        }
    }
    history
}

/// Resolves one ticker and runs MACD on it. `name` only feeds chart titles.
pub async fn run_macd_analysis(
    symbol: &str,
    name: &str,
    params: MacdConfig,
    storage: &AsyncStorageManager,
    provider: &dyn PriceProvider,
    start: NaiveDate,
) -> Result<MacdReport> {
    // Reject bad periods before anything is downloaded or cached.
    indicators::validate_periods(params.fast, params.slow, params.signal)?;

    let series = price_cache::resolve(&[symbol], storage, provider, start)
        .await
        .into_iter()
        .next()
        .ok_or_else(|| ExplorerError::NotFound(symbol.to_string()))?
        .series?;

    macd_report(series, name, params)
}

/// Runs MACD on an already resolved series.
pub fn macd_report(series: PriceSeries, name: &str, params: MacdConfig) -> Result<MacdReport> {
    let (candles, indicator) =
        indicators::macd_views(&series, name, params.fast, params.slow, params.signal)?;

    Ok(MacdReport {
        series,
        params,
        candles,
        indicator,
    })
}
