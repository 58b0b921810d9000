use crate::error::{ExplorerError, Result};
use crate::price_cache::PriceBar;
use crate::storage_utils::ProviderConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\^?[A-Za-z0-9][A-Za-z0-9.\-=]*$").expect("symbol pattern is valid")
});

/// Rejects anything that could not be a ticker before it becomes a file name
/// or a URL path segment.
pub fn validate_symbol(symbol: &str) -> Result<()> {
    if SYMBOL_RE.is_match(symbol) {
        Ok(())
    } else {
        Err(ExplorerError::InvalidSymbol(symbol.to_string()))
    }
}

/// Rewrites exchange listing notation into the provider's form: share classes
/// use `-` (`BRK/A` -> `BRK-A`) and preferred series use `-P` (`ABR^D` ->
/// `ABR-PD`). A leading `^` marks an index and is kept.
pub fn normalize_symbol(symbol: &str) -> String {
    let symbol = symbol.trim();
    let (prefix, rest) = match symbol.strip_prefix('^') {
        Some(rest) => ("^", rest),
        None => ("", symbol),
    };
    let mut out = String::with_capacity(symbol.len() + 2);
    out.push_str(prefix);
    for c in rest.chars() {
        match c {
            '/' => out.push('-'),
            '^' => out.push_str("-P"),
            _ => out.push(c),
        }
    }
    out
}

/// Source of daily OHLCV history.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Every daily bar for `symbol` from `start` up to now, ascending.
    async fn fetch_history(&self, symbol: &str, start: NaiveDate) -> Result<Vec<PriceBar>>;
}

// --- Yahoo chart API payload ---

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
}

// Yahoo reports holidays and halted sessions as nulls.
#[derive(Deserialize, Debug, Default)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) market-explorer")
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceProvider for YahooProvider {
    async fn fetch_history(&self, symbol: &str, start: NaiveDate) -> Result<Vec<PriceBar>> {
        validate_symbol(symbol)?;

        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map_or(0, |dt| dt.and_utc().timestamp());
        let period2 = Utc::now().timestamp();
        let query = [
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
            ("interval", "1d".to_string()),
        ];

        debug!("GET {} from {}", url, start);
        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by price provider while fetching {}", symbol);
            return Err(ExplorerError::RateLimited(symbol.to_string()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ExplorerError::Provider {
                symbol: symbol.to_string(),
                message: "unknown symbol".to_string(),
            });
        }
        if !status.is_success() {
            return Err(ExplorerError::Provider {
                symbol: symbol.to_string(),
                message: format!("unexpected status {}", status),
            });
        }

        let payload: ChartResponse = response.json().await?;
        parse_chart(symbol, payload)
    }
}

fn parse_chart(symbol: &str, payload: ChartResponse) -> Result<Vec<PriceBar>> {
    if let Some(err) = payload.chart.error {
        return Err(ExplorerError::Provider {
            symbol: symbol.to_string(),
            message: format!("{}: {}", err.code, err.description),
        });
    }

    let Some(result) = payload.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let column = |values: &[Option<f64>]| values.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            column(&quote.open),
            column(&quote.high),
            column(&quote.low),
            column(&quote.close),
        ) else {
            continue;
        };
        let Some(timestamp) = DateTime::from_timestamp(*ts, 0).map(|dt| dt.date_naive()) else {
            continue;
        };
        bars.push(PriceBar {
            timestamp,
            open,
            high,
            low,
            close,
            volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    Ok(bars)
}
