use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::Interval;
use crate::error::SourceError;

/// Supplies closing prices, oldest first.
#[async_trait]
pub trait PriceSeriesSource: Send + Sync {
    async fn fetch_closes(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<f64>, SourceError>;
}

// Binance error code for an unknown pair.
const INVALID_SYMBOL_CODE: i64 = -1121;

pub struct BinanceKlines {
    client: Client,
    base_url: String,
}

impl BinanceKlines {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceSeriesSource for BinanceKlines {
    async fn fetch_closes(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<f64>, SourceError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.as_str().to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.bytes().await.map_err(network_error)?;

        if !status.is_success() {
            return Err(classify_failure(status, &body, retry_after, symbol));
        }

        parse_closes(&body)
    }
}

pub(crate) fn network_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Network(format!("request timed out: {}", e))
    } else {
        SourceError::Network(e.to_string())
    }
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    #[serde(default)]
    msg: String,
}

/// Maps a non-2xx klines response onto the source error taxonomy.
pub(crate) fn classify_failure(
    status: StatusCode,
    body: &[u8],
    retry_after: Option<Duration>,
    symbol: &str,
) -> SourceError {
    let text = String::from_utf8_lossy(body);

    // 429 = slow down, 418 = IP banned until a given timestamp.
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return SourceError::RateLimited {
            retry_after: retry_after.or_else(|| banned_until(&text)),
        };
    }

    match serde_json::from_slice::<ApiError>(body) {
        Ok(api) if api.code == INVALID_SYMBOL_CODE => SourceError::InvalidSymbol(symbol.to_string()),
        Ok(api) => SourceError::Network(format!("HTTP {} ({}: {})", status, api.code, api.msg)),
        Err(_) => SourceError::Network(format!("HTTP {}", status)),
    }
}

/// Reads the "banned until <epoch ms>" hint from a -1003 response body.
fn banned_until(text: &str) -> Option<Duration> {
    static BAN_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = BAN_RE
        .get_or_init(|| Regex::new(r"until\s+(\d+)").ok())
        .as_ref()?;

    let ban_until: i64 = re.captures(text)?.get(1)?.as_str().parse().ok()?;
    let wait_ms = ban_until - Utc::now().timestamp_millis();
    (wait_ms > 0).then(|| Duration::from_millis(wait_ms as u64))
}

// Kline row: [openTime, open, high, low, close, volume, closeTime,
// quoteVolume, trades, takerBase, takerQuote, ignore].
const CLOSE_FIELD: usize = 4;

pub(crate) fn parse_closes(body: &[u8]) -> Result<Vec<f64>, SourceError> {
    let rows: Vec<Vec<Value>> =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            row.get(CLOSE_FIELD)
                .and_then(lenient_f64)
                .ok_or_else(|| SourceError::Decode(format!("kline {} has no close price", i)))
        })
        .collect()
}

/// Prices arrive as decimal strings, but plain numbers are accepted too.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
