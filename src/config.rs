use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::indicators::{RsiEngine, Smoothing};
use crate::storage_utils::AsyncStorageManager;

pub const BINANCE_API_URL: &str = "https://api.binance.com";
pub const MAX_KLINE_LIMIT: u32 = 1000;

/// Candle granularities accepted by the klines endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interval {
    #[serde(rename = "1s")]
    Second1,
    #[default]
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "3m")]
    Minute3,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "2h")]
    Hour2,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "6h")]
    Hour6,
    #[serde(rename = "8h")]
    Hour8,
    #[serde(rename = "12h")]
    Hour12,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "3d")]
    Day3,
    #[serde(rename = "1w")]
    Week1,
    #[serde(rename = "1M")]
    Month1,
}

impl Interval {
    pub const ALL: [Interval; 16] = [
        Interval::Second1,
        Interval::Minute1,
        Interval::Minute3,
        Interval::Minute5,
        Interval::Minute15,
        Interval::Minute30,
        Interval::Hour1,
        Interval::Hour2,
        Interval::Hour4,
        Interval::Hour6,
        Interval::Hour8,
        Interval::Hour12,
        Interval::Day1,
        Interval::Day3,
        Interval::Week1,
        Interval::Month1,
    ];

    /// The string the API expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Second1 => "1s",
            Interval::Minute1 => "1m",
            Interval::Minute3 => "3m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour8 => "8h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
            Interval::Day3 => "3d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Case sensitive: "1m" is a minute, "1M" a month.
impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Interval::ALL
            .iter()
            .find(|i| i.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unsupported interval: {}", s))
    }
}

/// Read-only scan parameters, built once at startup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub quote_asset: String,
    pub interval: Interval,
    pub rsi_period: usize,
    pub rsi_threshold: f64,
    pub smoothing: Smoothing,
    pub max_workers: usize,
    pub kline_limit: u32,
    /// Scan only this pair, skipping catalog resolution.
    pub symbol: Option<String>,
    pub fetch_timeout_secs: u64,
    pub scan_deadline_secs: u64,
    pub cache_max_age_secs: u64,
    pub api_base_url: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            interval: Interval::Minute1,
            rsi_period: 14,
            rsi_threshold: 30.0,
            smoothing: Smoothing::Wilder,
            max_workers: 40,
            kline_limit: MAX_KLINE_LIMIT,
            symbol: None,
            fetch_timeout_secs: 10,
            scan_deadline_secs: 120,
            cache_max_age_secs: 24 * 60 * 60,
            api_base_url: BINANCE_API_URL.to_string(),
        }
    }
}

impl ScanConfig {
    /// Defaults, then `storage/config.json` if present, then env/CLI.
    pub async fn resolve(storage: &AsyncStorageManager, cli: &Cli) -> anyhow::Result<Self> {
        let mut config: ScanConfig = storage.load_optional("config").await?.unwrap_or_default();
        cli.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: String| Err(ConfigurationError::Invalid(msg));

        if self.quote_asset.trim().is_empty() {
            return invalid("quote asset must not be empty".into());
        }
        if self.max_workers == 0 {
            return invalid("MAX_WORKERS must be at least 1".into());
        }
        if self.rsi_period == 0 {
            return invalid("RSI period must be at least 1".into());
        }
        if !self.rsi_threshold.is_finite() || !(0.0..=100.0).contains(&self.rsi_threshold) {
            return invalid(format!(
                "RSI threshold {} is outside 0..=100",
                self.rsi_threshold
            ));
        }
        if self.kline_limit == 0 || self.kline_limit > MAX_KLINE_LIMIT {
            return invalid(format!(
                "kline limit {} is outside 1..={}",
                self.kline_limit, MAX_KLINE_LIMIT
            ));
        }
        if (self.kline_limit as usize) <= self.rsi_period {
            return invalid(format!(
                "kline limit {} cannot cover an RSI period of {}",
                self.kline_limit, self.rsi_period
            ));
        }
        if self.fetch_timeout_secs == 0 || self.scan_deadline_secs == 0 {
            return invalid("timeouts must be greater than zero".into());
        }
        Ok(())
    }

    pub fn engine(&self) -> RsiEngine {
        RsiEngine::new(self.rsi_period, self.smoothing)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Transport-level timeout for the HTTP client. Kept past `fetch_timeout`
    /// so a slow kline fetch is always reported as a scan timeout.
    pub fn http_timeout(&self) -> Duration {
        self.fetch_timeout() + Duration::from_secs(5)
    }

    pub fn scan_deadline(&self) -> Duration {
        Duration::from_secs(self.scan_deadline_secs)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }
}

/// Process options. Every flag can also come from the environment.
#[derive(Parser, Debug, Default, Clone)]
#[command(version, about = "Scan exchange pairs for oversold RSI readings")]
pub struct Cli {
    /// Scan a single pair instead of the whole catalog
    #[arg(long, env = "SYMBOL")]
    pub symbol: Option<String>,

    #[arg(long, env = "MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Candle interval, e.g. 1m, 15m, 4h, 1d
    #[arg(long, env = "INTERVAL")]
    pub interval: Option<Interval>,

    #[arg(long, env = "QUOTE_ASSET")]
    pub quote_asset: Option<String>,

    #[arg(long, env = "RSI_PERIOD")]
    pub rsi_period: Option<usize>,

    #[arg(long, env = "RSI_THRESHOLD")]
    pub rsi_threshold: Option<f64>,

    /// wilder (1/N) or ema (2/(N+1))
    #[arg(long, env = "RSI_SMOOTHING")]
    pub smoothing: Option<Smoothing>,

    #[arg(long, env = "KLINE_LIMIT")]
    pub kline_limit: Option<u32>,

    #[arg(long, env = "FETCH_TIMEOUT_SECS")]
    pub fetch_timeout_secs: Option<u64>,

    #[arg(long, env = "SCAN_DEADLINE_SECS")]
    pub scan_deadline_secs: Option<u64>,

    #[arg(long, env = "CACHE_MAX_AGE_SECS")]
    pub cache_max_age_secs: Option<u64>,

    #[arg(long, env = "BINANCE_API_URL")]
    pub api_base_url: Option<String>,

    /// Ignore the cached pair list and fetch it again
    #[arg(long, env = "REFRESH_SYMBOLS")]
    pub refresh_symbols: bool,

    /// Re-run the scan every N seconds until Ctrl-C
    #[arg(long, env = "WATCH_SECS")]
    pub watch: Option<u64>,

    /// Where config.json, the symbol cache and results live
    #[arg(long, env = "STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
}

impl Cli {
    pub fn apply(&self, config: &mut ScanConfig) {
        if let Some(symbol) = &self.symbol {
            config.symbol = Some(symbol.clone());
        }
        // SYMBOL="" means "no override".
        config.symbol = config
            .symbol
            .take()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty());

        if let Some(v) = self.max_workers {
            config.max_workers = v;
        }
        if let Some(v) = self.interval {
            config.interval = v;
        }
        if let Some(v) = &self.quote_asset {
            config.quote_asset = v.clone();
        }
        config.quote_asset = config.quote_asset.trim().to_uppercase();
        if let Some(v) = self.rsi_period {
            config.rsi_period = v;
        }
        if let Some(v) = self.rsi_threshold {
            config.rsi_threshold = v;
        }
        if let Some(v) = self.smoothing {
            config.smoothing = v;
        }
        if let Some(v) = self.kline_limit {
            config.kline_limit = v;
        }
        if let Some(v) = self.fetch_timeout_secs {
            config.fetch_timeout_secs = v;
        }
        if let Some(v) = self.scan_deadline_secs {
            config.scan_deadline_secs = v;
        }
        if let Some(v) = self.cache_max_age_secs {
            config.cache_max_age_secs = v;
        }
        if let Some(v) = &self.api_base_url {
            config.api_base_url = v.trim_end_matches('/').to_string();
        }
    }
}
