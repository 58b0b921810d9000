use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info};

// CONFIGURATION STRUCTS

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryConfig {
    pub start_date: NaiveDate, // first day requested on a cache miss
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MacdConfig {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub history: HistoryConfig,
    pub macd: MacdConfig,
    pub provider: ProviderConfig,
    // Relative paths resolve against the storage directory.
    pub tickers_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig {
                start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN),
            },
            macd: MacdConfig {
                fast: 12,
                slow: 26,
                signal: 9,
            },
            provider: ProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
                timeout_secs: 30,
            },
            tickers_file: PathBuf::from("nasdaq_tickers.json"),
        }
    }
}

/// Named sub-stores of the storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Library {
    /// Downloaded price series, one document per symbol.
    Caches,
    /// Exchange reference tables.
    Exchanges,
}

impl Library {
    pub fn as_str(self) -> &'static str {
        match self {
            Library::Caches => "caches",
            Library::Exchanges => "exchanges",
        }
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not find binary directory",
                )
            })?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// Creates a manager rooted at `base_dir`, creating the directory and
    /// every library directory up front.
    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.into();
        for library in [Library::Caches, Library::Exchanges] {
            fs::create_dir_all(base_dir.join(library.as_str())).await?;
        }
        Ok(Self { base_dir })
    }

    /// Saves `data` as `<filename>.json` at the storage root.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        write_atomic(&self.base_dir, filename, data).await
    }

    /// Loads `<filename>.json` from the storage root.
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        // serde_json validates UTF-8 while parsing, so skip read_to_string.
        let content = fs::read(path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Loads `config.json`, writing the defaults first if it does not exist.
    pub async fn load_or_init_config(&self) -> Result<AppConfig> {
        let path = self.base_dir.join("config.json");
        if fs::try_exists(&path).await? {
            return self.load("config").await;
        }
        let config = AppConfig::default();
        self.save("config", &config).await?;
        info!("Wrote default configuration to {:?}", path);
        Ok(config)
    }

    pub async fn has(&self, library: Library, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.entry_path(library, key)).await?)
    }

    pub async fn read<T: DeserializeOwned>(&self, library: Library, key: &str) -> Result<T> {
        let content = fs::read(self.entry_path(library, key)).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Replaces the whole entry. Readers never see a half-written document.
    pub async fn write<T: Serialize>(&self, library: Library, key: &str, data: &T) -> Result<()> {
        debug!("Writing {}/{}", library.as_str(), key);
        write_atomic(&self.base_dir.join(library.as_str()), key, data).await
    }

    /// Resolves a configured path against the storage directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn entry_path(&self, library: Library, key: &str) -> PathBuf {
        self.base_dir
            .join(library.as_str())
            .join(format!("{}.json", key))
    }
}

async fn write_atomic<T: Serialize>(dir: &Path, name: &str, data: &T) -> Result<()> {
    let final_path = dir.join(format!("{}.json", name));
    let json_bytes = serde_json::to_vec_pretty(data)?;
    let dir = dir.to_path_buf();

    // One staging file per writer. The previous entry stays intact until the
    // rename.
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json_bytes)?;
        tmp.persist(&final_path)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::from)??;
    Ok(())
}
