use crate::analysis::MacdReport;
use crate::price_cache::PriceSeries;
use crate::tickers::{TickerTable, value_to_text};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().enumerate().map(|(i, h)| {
            let cell = Cell::new(h).add_attribute(Attribute::Bold);
            // First column is always a label, the rest are numbers.
            if i == 0 {
                cell
            } else {
                cell.set_alignment(CellAlignment::Right)
            }
        }));
    table
}

fn number_cell(value: f64) -> Cell {
    Cell::new(format!("{:.2}", value)).set_alignment(CellAlignment::Right)
}

fn signed_cell(value: f64) -> Cell {
    let color = if value >= 0.0 { Color::Green } else { Color::Red };
    Cell::new(format!("{:+.4}", value))
        .fg(color)
        .set_alignment(CellAlignment::Right)
}

/// The reference listing restricted to `rows` (indices into the table).
pub fn tickers_table(table: &TickerTable, rows: &[usize]) -> Table {
    let mut out = Table::new();
    out.load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            table
                .columns
                .iter()
                .map(|c| Cell::new(&c.label).add_attribute(Attribute::Bold)),
        );

    for &row in rows {
        out.add_row(table.columns.iter().map(|c| {
            c.values
                .get(row)
                .map(value_to_text)
                .unwrap_or_default()
        }));
    }
    out
}

/// The most recent `rows` bars of a series.
pub fn price_table(series: &PriceSeries, rows: usize) -> Table {
    let mut table = base_table(&["Date", "Open", "High", "Low", "Close", "Volume"]);
    let skip = series.len().saturating_sub(rows);
    for bar in series.bars.iter().skip(skip) {
        table.add_row(vec![
            Cell::new(bar.timestamp.format("%Y-%m-%d")).fg(Color::DarkGrey),
            number_cell(bar.open),
            number_cell(bar.high),
            number_cell(bar.low),
            number_cell(bar.close).fg(Color::Cyan),
            Cell::new(bar.volume).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// The most recent `rows` points of a MACD analysis.
pub fn macd_table(report: &MacdReport, rows: usize) -> Table {
    let mut table = base_table(&[
        "Date",
        "Close",
        format!("EMA({})", report.params.fast).as_str(),
        format!("EMA({})", report.params.slow).as_str(),
        "MACD",
        "Signal",
        "Divergence",
    ]);

    let indicator = &report.indicator;
    let candles = &report.candles;
    let skip = indicator.timestamps.len().saturating_sub(rows);
    for i in skip..indicator.timestamps.len() {
        table.add_row(vec![
            Cell::new(indicator.timestamps[i].format("%Y-%m-%d")).fg(Color::DarkGrey),
            number_cell(candles.candles[i].close).fg(Color::Cyan),
            number_cell(candles.fast_ema[i]),
            number_cell(candles.slow_ema[i]),
            signed_cell(indicator.macd[i]),
            signed_cell(indicator.signal[i]),
            signed_cell(indicator.divergence[i]),
        ]);
    }
    table
}
