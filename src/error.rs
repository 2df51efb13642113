use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::indicators::RsiError;

/// Failures raised by the upstream market data collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    Network(String),
    RateLimited { retry_after: Option<Duration> },
    InvalidSymbol(String),
    Decode(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceError::Network(msg) => write!(f, "Network error: {}", msg),
            SourceError::RateLimited {
                retry_after: Some(wait),
            } => write!(f, "Rate limited, retry after {:.1}s", wait.as_secs_f64()),
            SourceError::RateLimited { retry_after: None } => write!(f, "Rate limited"),
            SourceError::InvalidSymbol(symbol) => write!(f, "Invalid symbol: {}", symbol),
            SourceError::Decode(msg) => write!(f, "Unexpected response: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Why a single symbol produced no reading. Never aborts a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Source(SourceError),
    Rsi(RsiError),
    Timeout(Duration),
    WorkerPanicked,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::Source(e) => write!(f, "{}", e),
            SkipReason::Rsi(e) => write!(f, "{}", e),
            SkipReason::Timeout(after) => {
                write!(f, "Fetch timed out after {:.1}s", after.as_secs_f64())
            }
            SkipReason::WorkerPanicked => write!(f, "Worker panicked"),
        }
    }
}

impl std::error::Error for SkipReason {}

impl From<SourceError> for SkipReason {
    fn from(e: SourceError) -> Self {
        SkipReason::Source(e)
    }
}

impl From<RsiError> for SkipReason {
    fn from(e: RsiError) -> Self {
        SkipReason::Rsi(e)
    }
}

// Persisted in results.json as its display text.
impl Serialize for SkipReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Fatal problems detected before any scan work starts.
#[derive(Debug)]
pub enum ConfigurationError {
    Invalid(String),
    CatalogUnavailable {
        quote_asset: String,
        cause: SourceError,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigurationError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigurationError::CatalogUnavailable { quote_asset, cause } => write!(
                f,
                "Could not resolve {} pairs and no cached list is available ({}). Set SYMBOL to scan a single pair.",
                quote_asset, cause
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}
