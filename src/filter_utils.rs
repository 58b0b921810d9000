use crate::tickers::TickerName;

/// Case-insensitive match of `query` against the symbol or company name.
/// An empty query matches everything.
pub fn matches_query(ticker: &TickerName, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    let query = query.to_lowercase();
    ticker.symbol.to_lowercase().contains(&query) || ticker.name.to_lowercase().contains(&query)
}

/// Row indices of the matching tickers, in exchange order with exact symbol
/// matches first.
pub fn filter_ticker_rows(tickers: &[TickerName], query: &str) -> Vec<usize> {
    let (mut exact, rest): (Vec<_>, Vec<_>) = tickers
        .iter()
        .enumerate()
        .filter(|(_, t)| matches_query(t, query))
        .partition(|(_, t)| t.symbol.eq_ignore_ascii_case(query.trim()));
    exact.extend(rest);
    exact.into_iter().map(|(i, _)| i).collect()
}

pub fn filter_tickers<'a>(tickers: &'a [TickerName], query: &str) -> Vec<&'a TickerName> {
    filter_ticker_rows(tickers, query)
        .into_iter()
        .map(|i| &tickers[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, name: &str) -> TickerName {
        TickerName {
            symbol: symbol.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_filter_tickers() {
        let tickers = vec![
            ticker("A", "Agilent Technologies Inc."),
            ticker("AAPL", "Apple Inc."),
            ticker("APLE", "Apple Hospitality REIT"),
            ticker("MSFT", "Microsoft Corporation"),
        ];

        assert_eq!(filter_tickers(&tickers, "").len(), 4);

        let apple: Vec<_> = filter_tickers(&tickers, "apple")
            .iter()
            .map(|t| t.symbol.as_str())
            .collect();
        assert_eq!(apple, vec!["AAPL", "APLE"]);

        // "a" matches every row, but the exact symbol leads.
        let a = filter_tickers(&tickers, "a");
        assert_eq!(a[0].symbol, "A");
        assert_eq!(a.len(), 4);

        let msft = filter_tickers(&tickers, " msft ");
        assert_eq!(msft.len(), 1);
        assert_eq!(msft[0].name, "Microsoft Corporation");
    }

    #[test]
    fn test_filter_rows_keep_duplicates_apart() {
        let tickers = vec![
            ticker("ZZZ", "Sleepy Holdings"),
            ticker("ABC", "Alphabet Soup"),
            ticker("ABC", "Alphabet Soup Class B"),
        ];
        assert_eq!(filter_ticker_rows(&tickers, "abc"), vec![1, 2]);
        assert_eq!(filter_ticker_rows(&tickers, "sleepy"), vec![0]);
        assert!(filter_ticker_rows(&tickers, "nothing").is_empty());
    }
}
