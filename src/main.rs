mod analysis;
mod comfy_table;
mod error;
mod filter_utils;
mod indicators;
mod price_cache;
mod provider;
mod storage_utils;
mod tickers;
mod tui;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::provider::YahooProvider;
use crate::storage_utils::{AppConfig, AsyncStorageManager, MacdConfig};

#[derive(Parser)]
#[command(name = "market-explorer")]
#[command(about = "Explore cached market history and MACD indicators", long_about = None)]
struct Cli {
    /// Storage directory (defaults to `storage` next to the binary)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the exchange ticker listing
    Import {
        /// Listing JSON file (defaults to `tickers_file` from config)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Re-import even if a listing is already stored
        #[arg(long)]
        force: bool,
    },
    /// Print the imported ticker listing
    Tickers {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Resolve price history for symbols, downloading on cache miss
    Fetch {
        #[arg(required = true)]
        symbols: Vec<String>,
        #[arg(short, long, default_value_t = 5)]
        rows: usize,
    },
    /// Run a MACD analysis on one symbol
    Macd {
        symbol: String,
        #[arg(long)]
        fast: Option<usize>,
        #[arg(long)]
        slow: Option<usize>,
        #[arg(long)]
        signal: Option<usize>,
        #[arg(short, long, default_value_t = 10)]
        rows: usize,
    },
    /// Interactive dashboard
    Tui,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let storage = match &cli.storage {
        Some(dir) => AsyncStorageManager::new(dir.clone()).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    init_logging(&storage, matches!(cli.command, Commands::Tui))?;
    let config = storage.load_or_init_config().await?;

    match cli.command {
        Commands::Import { file, force } => {
            if !force && tickers::has_tickers(&storage).await? {
                println!("Ticker listing already imported (use --force to replace it)");
                return Ok(());
            }
            let path = file.unwrap_or_else(|| storage.resolve_path(&config.tickers_file));
            let table = tickers::import_tickers(&path, &storage)
                .await
                .with_context(|| format!("importing {}", path.display()))?;
            println!("Imported {} tickers from {}", table.row_count(), path.display());
        }
        Commands::Tickers { search, limit } => {
            let table = ensure_tickers(&storage, &config).await?;
            let names = table.ticker_names()?;
            let query = search.unwrap_or_default();
            let mut rows = filter_utils::filter_ticker_rows(&names, &query);
            rows.truncate(limit);
            println!("{}", comfy_table::tickers_table(&table, &rows));
        }
        Commands::Fetch { symbols, rows } => {
            let provider = YahooProvider::new(&config.provider)?;
            let history = analysis::price_history(
                &symbols,
                &storage,
                &provider,
                config.history.start_date,
            )
            .await;
            for series in &history.series {
                println!("\n{} ({} bars)", series.symbol, series.len());
                println!("{}", comfy_table::price_table(series, rows));
            }
            for (symbol, e) in &history.failures {
                eprintln!("{}: {}", symbol, e);
            }
            if history.series.is_empty() {
                bail!("No price history could be resolved");
            }
        }
        Commands::Macd {
            symbol,
            fast,
            slow,
            signal,
            rows,
        } => {
            let params = MacdConfig {
                fast: fast.unwrap_or(config.macd.fast),
                slow: slow.unwrap_or(config.macd.slow),
                signal: signal.unwrap_or(config.macd.signal),
            };
            let name = tickers::display_name(&storage, &symbol).await;
            let provider = YahooProvider::new(&config.provider)?;
            let report = analysis::run_macd_analysis(
                &symbol,
                &name,
                params,
                &storage,
                &provider,
                config.history.start_date,
            )
            .await?;
            println!("\n{}", report.indicator.title);
            println!("{}", comfy_table::macd_table(&report, rows));
        }
        Commands::Tui => {
            let table = ensure_tickers(&storage, &config).await?;
            let names = table.ticker_names()?;
            let provider = YahooProvider::new(&config.provider)?;
            let services = tui::Services {
                storage: Arc::new(storage),
                provider: Arc::new(provider),
                start: config.history.start_date,
            };
            tui::run_tui(services, names, config.macd).await?;
        }
    }

    Ok(())
}

/// Imports the configured listing on first use.
async fn ensure_tickers(
    storage: &AsyncStorageManager,
    config: &AppConfig,
) -> Result<tickers::TickerTable> {
    if tickers::has_tickers(storage).await? {
        return Ok(tickers::load_tickers(storage).await?);
    }
    let path = storage.resolve_path(&config.tickers_file);
    if !path.exists() {
        bail!(
            "No ticker listing imported and {} does not exist; run `import --file <PATH>`",
            path.display()
        );
    }
    info!("Importing ticker listing from {:?}", path);
    Ok(tickers::import_tickers(&path, storage).await?)
}

/// Logs go to stderr, or to a file in the storage directory while the
/// dashboard owns the terminal.
fn init_logging(storage: &AsyncStorageManager, to_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if to_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(storage.base_dir.join("market-explorer.log"))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}
