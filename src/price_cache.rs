use crate::error::{ExplorerError, Result};
use crate::provider::{PriceProvider, normalize_symbol, validate_symbol};
use crate::storage_utils::{AsyncStorageManager, Library};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// One trading day of OHLCV data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub timestamp: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Daily history of one symbol, ascending by timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub symbol: String,
    pub bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn timestamps(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Outcome of resolving one requested symbol.
#[derive(Debug)]
pub struct Resolved {
    /// The symbol in provider form, which is also its cache key.
    pub symbol: String,
    pub series: Result<PriceSeries>,
}

/// Returns one outcome per distinct symbol, in input order.
///
/// Symbols are handled independently: a failure is reported for that symbol
/// and the rest are still resolved. Cached entries are returned as stored and
/// never refreshed. A miss downloads the full history from `start` and caches
/// it, unless the download came back empty, in which case nothing is written
/// and the outcome is `EmptySeries`.
pub async fn resolve<S: AsRef<str>>(
    symbols: &[S],
    storage: &AsyncStorageManager,
    provider: &dyn PriceProvider,
    start: NaiveDate,
) -> Vec<Resolved> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(symbols.len());

    for symbol in symbols.iter().map(|s| normalize_symbol(s.as_ref())) {
        if !seen.insert(symbol.clone()) {
            continue;
        }
        let series = resolve_one(&symbol, storage, provider, start).await;
        if let Err(e) = &series {
            warn!("Could not resolve {}: {}", symbol, e);
        }
        resolved.push(Resolved { symbol, series });
    }

    resolved
}

async fn resolve_one(
    symbol: &str,
    storage: &AsyncStorageManager,
    provider: &dyn PriceProvider,
    start: NaiveDate,
) -> Result<PriceSeries> {
    validate_symbol(symbol)?;

    if storage.has(Library::Caches, symbol).await? {
        debug!("Cache hit for {}", symbol);
        return storage.read(Library::Caches, symbol).await;
    }

    info!("Cache miss for {}, downloading history since {}", symbol, start);
    let bars = provider.fetch_history(symbol, start).await?;
    if bars.is_empty() {
        return Err(ExplorerError::EmptySeries(symbol.to_string()));
    }

    let series = PriceSeries {
        symbol: symbol.to_string(),
        bars,
    };
    storage.write(Library::Caches, symbol, &series).await?;
    info!("Cached {} bars for {}", series.len(), symbol);
    Ok(series)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    pub(crate) fn bar(day: u32, close: f64) -> PriceBar {
        PriceBar {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000,
        }
    }

    /// Serves canned histories and records every request.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub histories: HashMap<String, Vec<PriceBar>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub fn with(symbol: &str, bars: Vec<PriceBar>) -> Self {
            let mut provider = Self::default();
            provider.histories.insert(symbol.to_string(), bars);
            provider
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceProvider for FakeProvider {
        async fn fetch_history(&self, symbol: &str, _start: NaiveDate) -> Result<Vec<PriceBar>> {
            self.calls.lock().unwrap().push(symbol.to_string());
            self.histories
                .get(symbol)
                .cloned()
                .ok_or_else(|| ExplorerError::Provider {
                    symbol: symbol.to_string(),
                    message: "unknown symbol".to_string(),
                })
        }
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
    }

    fn series_of(resolved: Vec<Resolved>) -> Vec<PriceSeries> {
        resolved.into_iter().map(|r| r.series.unwrap()).collect()
    }

    #[tokio::test]
    async fn test_empty_input_performs_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let provider = FakeProvider::default();

        let symbols: [&str; 0] = [];
        let result = resolve(&symbols, &storage, &provider, start()).await;

        assert!(result.is_empty());
        assert!(provider.calls().is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("caches")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_second_resolve_is_all_cache_hits() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let mut provider = FakeProvider::with("AAPL", vec![bar(2, 10.0), bar(3, 11.0)]);
        provider
            .histories
            .insert("A".to_string(), vec![bar(2, 100.0)]);

        let first = series_of(resolve(&["AAPL", "A"], &storage, &provider, start()).await);
        let second = series_of(resolve(&["AAPL", "A"], &storage, &provider, start()).await);

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].symbol, "AAPL");
        assert_eq!(first[1].symbol, "A");
        assert_eq!(first, second);
        assert_eq!(provider.calls(), vec!["AAPL".to_string(), "A".to_string()]);
    }

    #[tokio::test]
    async fn test_cached_entry_is_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let stale = PriceSeries {
            symbol: "AAPL".to_string(),
            bars: vec![bar(2, 1.0)],
        };
        storage.write(Library::Caches, "AAPL", &stale).await.unwrap();
        let provider = FakeProvider::with("AAPL", vec![bar(2, 50.0), bar(3, 51.0)]);

        let result = series_of(resolve(&["AAPL"], &storage, &provider, start()).await);

        assert_eq!(result, vec![stale]);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_symbols_resolve_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let provider = FakeProvider::with("MSFT", vec![bar(2, 300.0)]);

        let result = resolve(&["MSFT", "MSFT"], &storage, &provider, start()).await;

        assert_eq!(result.len(), 1);
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_download_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let provider = FakeProvider::with("DEAD", Vec::new());

        let result = resolve(&["DEAD"], &storage, &provider, start()).await;

        assert!(matches!(&result[0].series, Err(ExplorerError::EmptySeries(s)) if s == "DEAD"));
        assert!(!storage.has(Library::Caches, "DEAD").await.unwrap());

        // Nothing was cached, so the next request tries upstream again.
        resolve(&["DEAD"], &storage, &provider, start()).await;
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_reported_per_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let mut provider = FakeProvider::with("AAPL", vec![bar(2, 10.0)]);
        provider
            .histories
            .insert("MSFT".to_string(), vec![bar(2, 300.0)]);

        let result = resolve(&["AAPL", "NOPE", "MSFT"], &storage, &provider, start()).await;

        let symbols: Vec<_> = result.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "NOPE", "MSFT"]);
        assert_eq!(result[0].series.as_ref().unwrap().symbol, "AAPL");
        match &result[1].series {
            Err(ExplorerError::Provider { symbol, .. }) => assert_eq!(symbol, "NOPE"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(result[2].series.as_ref().unwrap().symbol, "MSFT");
        assert_eq!(provider.calls(), vec!["AAPL", "NOPE", "MSFT"]);
        assert!(storage.has(Library::Caches, "AAPL").await.unwrap());
        assert!(!storage.has(Library::Caches, "NOPE").await.unwrap());
        assert!(storage.has(Library::Caches, "MSFT").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_symbol_rejected_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let provider = FakeProvider::with("AAPL", vec![bar(2, 10.0)]);

        let result = resolve(&["../config", "AAPL"], &storage, &provider, start()).await;

        assert!(matches!(result[0].series, Err(ExplorerError::InvalidSymbol(_))));
        assert!(result[1].series.is_ok());
        assert_eq!(provider.calls(), vec!["AAPL"]);
    }

    #[tokio::test]
    async fn test_listing_notation_maps_to_provider_form() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let provider = FakeProvider::with("BRK-A", vec![bar(2, 600_000.0)]);

        let result = resolve(&["BRK/A", "BRK-A"], &storage, &provider, start()).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].symbol, "BRK-A");
        assert!(result[0].series.is_ok());
        assert!(storage.has(Library::Caches, "BRK-A").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_on_one_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(AsyncStorageManager::new(dir.path()).await.unwrap());
        let provider = Arc::new(FakeProvider::with(
            "AAPL",
            (1..=20).map(|d| bar(d, d as f64)).collect(),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let storage = storage.clone();
                let provider = provider.clone();
                tokio::spawn(async move {
                    resolve(&["AAPL"], &storage, provider.as_ref(), start()).await
                })
            })
            .collect();
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result[0].series.as_ref().unwrap().len(), 20);
        }

        let cached: PriceSeries = storage.read(Library::Caches, "AAPL").await.unwrap();
        assert_eq!(cached.len(), 20);
    }
}
