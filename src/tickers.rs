use crate::error::{ExplorerError, Result};
use crate::storage_utils::{AsyncStorageManager, Library};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// Key of the NASDAQ listing inside the `exchanges` library.
pub const NASDAQ_TICKERS: &str = "nasdaq_tickers";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TickerColumn {
    pub key: String,
    pub label: String,
    pub values: Vec<Value>,
}

/// Exchange listing stored column by column, rows in exchange order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TickerTable {
    pub columns: Vec<TickerColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickerName {
    pub symbol: String,
    pub name: String,
}

impl TickerName {
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.symbol)
    }
}

impl TickerTable {
    pub fn column(&self, key: &str) -> Option<&TickerColumn> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    /// Projects the `symbol` and `name` columns.
    pub fn ticker_names(&self) -> Result<Vec<TickerName>> {
        let symbols = self
            .column("symbol")
            .ok_or_else(|| ExplorerError::Structural("no \"symbol\" column".to_string()))?;
        let names = self
            .column("name")
            .ok_or_else(|| ExplorerError::Structural("no \"name\" column".to_string()))?;

        Ok(symbols
            .values
            .iter()
            .zip(&names.values)
            .map(|(symbol, name)| TickerName {
                symbol: value_to_text(symbol),
                name: value_to_text(name),
            })
            .collect())
    }
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Turns `{"data": {"headers": {..}, "rows": [..]}}` into a columnar table.
/// Any structural problem rejects the whole document.
pub fn parse_listing(document: &Value) -> Result<TickerTable> {
    let data = document
        .get("data")
        .ok_or_else(|| ExplorerError::Structural("missing \"data\"".to_string()))?;
    let headers = data
        .get("headers")
        .and_then(Value::as_object)
        .ok_or_else(|| ExplorerError::Structural("missing \"data.headers\" object".to_string()))?;
    let rows = data
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| ExplorerError::Structural("missing \"data.rows\" array".to_string()))?;

    let mut columns: Vec<TickerColumn> = headers
        .iter()
        .map(|(key, label)| TickerColumn {
            key: key.clone(),
            label: value_to_text(label),
            values: Vec::with_capacity(rows.len()),
        })
        .collect();

    for (i, row) in rows.iter().enumerate() {
        let row = row
            .as_object()
            .ok_or_else(|| ExplorerError::Structural(format!("row {} is not an object", i)))?;
        for column in &mut columns {
            let value = row.get(&column.key).ok_or_else(|| {
                ExplorerError::Structural(format!("row {} has no \"{}\" field", i, column.key))
            })?;
            column.values.push(value.clone());
        }
    }

    Ok(TickerTable { columns })
}

pub async fn has_tickers(storage: &AsyncStorageManager) -> Result<bool> {
    storage.has(Library::Exchanges, NASDAQ_TICKERS).await
}

/// Imports the listing at `path`. Does not check for an existing table;
/// callers decide whether to overwrite via `has_tickers`.
pub async fn import_tickers(path: &Path, storage: &AsyncStorageManager) -> Result<TickerTable> {
    let content = tokio::fs::read(path).await?;
    let document: Value = serde_json::from_slice(&content)
        .map_err(|e| ExplorerError::Structural(format!("{}: {}", path.display(), e)))?;
    let table = parse_listing(&document)?;

    storage
        .write(Library::Exchanges, NASDAQ_TICKERS, &table)
        .await?;
    info!(
        "Imported {} tickers ({} columns) from {:?}",
        table.row_count(),
        table.columns.len(),
        path
    );
    Ok(table)
}

pub async fn load_tickers(storage: &AsyncStorageManager) -> Result<TickerTable> {
    if !has_tickers(storage).await? {
        return Err(ExplorerError::NotFound(format!(
            "{}/{} (run the import command first)",
            Library::Exchanges.as_str(),
            NASDAQ_TICKERS
        )));
    }
    storage.read(Library::Exchanges, NASDAQ_TICKERS).await
}

/// Company name for `symbol`, used for chart titles. Falls back to the symbol
/// when it is not listed or the listing cannot be read.
pub async fn display_name(storage: &AsyncStorageManager, symbol: &str) -> String {
    let names = match load_tickers(storage).await.and_then(|t| t.ticker_names()) {
        Ok(names) => names,
        Err(e) => {
            warn!("Could not read the ticker listing, titling charts by symbol: {}", e);
            return symbol.to_string();
        }
    };
    names
        .into_iter()
        .find(|t| t.symbol == symbol)
        .map_or_else(|| symbol.to_string(), |t| t.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing() -> Value {
        json!({
            "data": {
                "headers": {"symbol": "Symbol", "name": "Name"},
                "rows": [
                    {"symbol": "A", "name": "Agilent"},
                    {"symbol": "AAPL", "name": "Apple"}
                ]
            }
        })
    }

    #[test]
    fn test_parse_listing_is_columnar_in_row_order() {
        let table = parse_listing(&listing()).unwrap();

        let symbols = table.column("symbol").unwrap();
        assert_eq!(symbols.label, "Symbol");
        assert_eq!(symbols.values, vec![json!("A"), json!("AAPL")]);
        assert_eq!(
            table.column("name").unwrap().values,
            vec![json!("Agilent"), json!("Apple")]
        );
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_ticker_names_and_labels() {
        let names = parse_listing(&listing()).unwrap().ticker_names().unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[1].symbol, "AAPL");
        assert_eq!(names[1].label(), "Apple (AAPL)");
    }

    #[test]
    fn test_structural_errors() {
        let cases = [
            json!({}),
            json!({"data": {"rows": []}}),
            json!({"data": {"headers": {"symbol": "Symbol"}}}),
            json!({"data": {"headers": {"symbol": "Symbol"}, "rows": ["A"]}}),
            json!({"data": {"headers": {"symbol": "Symbol", "name": "Name"},
                            "rows": [{"symbol": "A"}]}}),
        ];
        for case in cases {
            assert!(
                matches!(parse_listing(&case), Err(ExplorerError::Structural(_))),
                "{case}"
            );
        }
    }

    #[tokio::test]
    async fn test_import_writes_nothing_on_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path().join("storage"))
            .await
            .unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"data": {"headers": {"symbol": "Symbol"}}}"#).unwrap();

        let err = import_tickers(&path, &storage).await.unwrap_err();

        assert!(matches!(err, ExplorerError::Structural(_)));
        assert!(!has_tickers(&storage).await.unwrap());
        assert!(matches!(
            load_tickers(&storage).await,
            Err(ExplorerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_import_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path().join("storage"))
            .await
            .unwrap();
        let path = dir.path().join("nasdaq.json");
        std::fs::write(&path, listing().to_string()).unwrap();

        assert!(!has_tickers(&storage).await.unwrap());
        let imported = import_tickers(&path, &storage).await.unwrap();
        assert!(has_tickers(&storage).await.unwrap());
        assert_eq!(load_tickers(&storage).await.unwrap(), imported);
    }

    #[tokio::test]
    async fn test_display_name_falls_back_to_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path().join("storage"))
            .await
            .unwrap();

        // Nothing imported yet.
        assert_eq!(display_name(&storage, "AAPL").await, "AAPL");

        // Unreadable listing.
        std::fs::write(
            dir.path().join("storage/exchanges/nasdaq_tickers.json"),
            "not json",
        )
        .unwrap();
        assert_eq!(display_name(&storage, "AAPL").await, "AAPL");

        let path = dir.path().join("nasdaq.json");
        std::fs::write(&path, listing().to_string()).unwrap();
        import_tickers(&path, &storage).await.unwrap();
        assert_eq!(display_name(&storage, "AAPL").await, "Apple");
        assert_eq!(display_name(&storage, "MSFT").await, "MSFT");
    }
}
