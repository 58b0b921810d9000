use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Malformed reference data: {0}")]
    Structural(String),

    #[error("No price history returned for {0}")]
    EmptySeries(String),

    #[error("Price provider error for {symbol}: {message}")]
    Provider { symbol: String, message: String },

    #[error("Price provider rate limit exceeded while fetching {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}

impl From<ta::errors::TaError> for ExplorerError {
    fn from(err: ta::errors::TaError) -> Self {
        ExplorerError::InvalidParameter(format!("{:?}", err))
    }
}

pub type Result<T> = std::result::Result<T, ExplorerError>;
