use crate::error::{ExplorerError, Result};
use crate::price_cache::{PriceBar, PriceSeries};
use chrono::NaiveDate;
use ta::Next;
use ta::indicators::ExponentialMovingAverage;

/// MACD output aligned one-to-one with the input series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndicatorSeriesSet {
    pub timestamps: Vec<NaiveDate>,
    pub fast_ema: Vec<f64>,
    pub slow_ema: Vec<f64>,
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub divergence: Vec<f64>,
}

impl IndicatorSeriesSet {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Price candles with the two moving averages drawn over them.
#[derive(Debug, Clone, PartialEq)]
pub struct CandlestickView {
    pub title: String,
    pub candles: Vec<PriceBar>,
    pub fast_ema: Vec<f64>,
    pub slow_ema: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorView {
    pub title: String,
    pub timestamps: Vec<NaiveDate>,
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub divergence: Vec<f64>,
}

/// EMA with `alpha = 2 / (span + 1)`, seeded with the first value.
pub fn ema_series(values: &[f64], span: usize) -> Result<Vec<f64>> {
    let mut ema = ExponentialMovingAverage::new(span)?;
    Ok(values.iter().map(|&v| ema.next(v)).collect())
}

/// Every MACD period must be at least one; their relative order is free.
pub fn validate_periods(fast: usize, slow: usize, signal: usize) -> Result<()> {
    for (name, period) in [("fast", fast), ("slow", slow), ("signal", signal)] {
        if period == 0 {
            return Err(ExplorerError::InvalidParameter(format!(
                "{} period must be positive",
                name
            )));
        }
    }
    Ok(())
}

pub fn macd(
    series: &PriceSeries,
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<IndicatorSeriesSet> {
    validate_periods(fast, slow, signal)?;

    let closes = series.closes();
    let fast_ema = ema_series(&closes, fast)?;
    let slow_ema = ema_series(&closes, slow)?;

    let macd_line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema_series(&macd_line, signal)?;
    let divergence = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| m - s)
        .collect();

    Ok(IndicatorSeriesSet {
        timestamps: series.timestamps(),
        fast_ema,
        slow_ema,
        macd: macd_line,
        signal: signal_line,
        divergence,
    })
}

/// Computes MACD and packages it as the two charts of the analysis panel.
pub fn macd_views(
    series: &PriceSeries,
    name: &str,
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<(CandlestickView, IndicatorView)> {
    let set = macd(series, fast, slow, signal)?;

    let candles = CandlestickView {
        title: format!("Candlestick plot for {}", name),
        candles: series.bars.clone(),
        fast_ema: set.fast_ema,
        slow_ema: set.slow_ema,
    };
    let indicator = IndicatorView {
        title: format!("MACD analysis plot for {}", name),
        timestamps: set.timestamps,
        macd: set.macd,
        signal: set.signal,
        divergence: set.divergence,
    };
    Ok((candles, indicator))
}
