use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ConfigurationError, SourceError};
use crate::klines::network_error;
use crate::storage_utils::AsyncStorageManager;

const CACHE_FILE: &str = "symbol_cache";

/// Lists tradable symbols quoted in a given asset.
#[async_trait]
pub trait SymbolCatalog: Send + Sync {
    async fn list_symbols(&self, quote_asset: &str) -> Result<Vec<String>, SourceError>;
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

/// Spot `exchangeInfo`, keeping pairs that are `TRADING` and end in the quote asset.
pub struct BinanceCatalog {
    client: Client,
    base_url: String,
}

impl BinanceCatalog {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SymbolCatalog for BinanceCatalog {
    async fn list_symbols(&self, quote_asset: &str) -> Result<Vec<String>, SourceError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(network_error)?
            .error_for_status()
            .map_err(network_error)?;
        let body = response.bytes().await.map_err(network_error)?;

        trading_pairs(&body, quote_asset)
    }
}

pub(crate) fn trading_pairs(body: &[u8], quote_asset: &str) -> Result<Vec<String>, SourceError> {
    let info: ExchangeInfo =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    Ok(info
        .symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.symbol.ends_with(quote_asset))
        .map(|s| s.symbol)
        .collect())
}

/// One quote asset's pair list and when it was fetched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CachedSymbols {
    pub symbols: Vec<String>,
    pub fetched_at_ms: i64,
}

impl CachedSymbols {
    fn is_fresh(&self, max_age: Duration, now_ms: i64) -> bool {
        let age_ms = now_ms.saturating_sub(self.fetched_at_ms);
        age_ms >= 0 && (age_ms as u128) < max_age.as_millis()
    }
}

/// On-disk form: quote asset -> cached list.
pub type SymbolCache = HashMap<String, CachedSymbols>;

/// Wraps a catalog with a persisted, staleness-bounded cache.
///
/// Readers get an `Arc` snapshot and never observe a half-written entry.
/// Refreshes are serialized behind `refresh_lock`; until a refresh lands,
/// readers keep seeing the previous snapshot.
pub struct CachedCatalog {
    inner: Arc<dyn SymbolCatalog>,
    storage: AsyncStorageManager,
    max_age: Duration,
    entries: RwLock<HashMap<String, Arc<CachedSymbols>>>,
    refresh_lock: Mutex<()>,
}

impl CachedCatalog {
    pub fn new(
        inner: Arc<dyn SymbolCatalog>,
        storage: AsyncStorageManager,
        max_age: Duration,
    ) -> Self {
        Self {
            inner,
            storage,
            max_age,
            entries: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current pair list for `quote_asset`, refreshing it first when stale,
    /// missing, or `force_refresh` is set. A failed refresh falls back to a
    /// stale list if one exists; with nothing cached it is fatal.
    pub async fn snapshot(
        &self,
        quote_asset: &str,
        force_refresh: bool,
    ) -> Result<Arc<CachedSymbols>, ConfigurationError> {
        let now_ms = Utc::now().timestamp_millis();
        if !force_refresh {
            if let Some(entry) = self.entries.read().await.get(quote_asset) {
                if entry.is_fresh(self.max_age, now_ms) {
                    return Ok(entry.clone());
                }
            }
        }

        let _writer = self.refresh_lock.lock().await;
        let now_ms = Utc::now().timestamp_millis();

        // Another caller may have refreshed while we waited for the lock.
        let mut current = self.entries.read().await.get(quote_asset).cloned();
        if current.is_none() {
            current = self.load_from_disk(quote_asset).await;
        }
        if !force_refresh {
            if let Some(entry) = &current {
                if entry.is_fresh(self.max_age, now_ms) {
                    info!(
                        "Using cached {} pairs ({} symbols)",
                        quote_asset,
                        entry.symbols.len()
                    );
                    self.publish(quote_asset, entry.clone()).await;
                    return Ok(entry.clone());
                }
            }
        }

        info!("Fetching {} pairs from exchange", quote_asset);
        match self.inner.list_symbols(quote_asset).await {
            Ok(symbols) => {
                info!("{} {} pairs found", symbols.len(), quote_asset);
                let entry = Arc::new(CachedSymbols {
                    symbols,
                    fetched_at_ms: Utc::now().timestamp_millis(),
                });
                self.persist(quote_asset, &entry).await;
                self.publish(quote_asset, entry.clone()).await;
                Ok(entry)
            }
            Err(cause) => match current {
                Some(stale) => {
                    warn!(
                        "Could not refresh {} pairs ({}), using cached list from {}",
                        quote_asset,
                        cause,
                        stale.fetched_at_ms
                    );
                    self.publish(quote_asset, stale.clone()).await;
                    Ok(stale)
                }
                None => Err(ConfigurationError::CatalogUnavailable {
                    quote_asset: quote_asset.to_string(),
                    cause,
                }),
            },
        }
    }

    async fn publish(&self, quote_asset: &str, entry: Arc<CachedSymbols>) {
        self.entries
            .write()
            .await
            .insert(quote_asset.to_string(), entry);
    }

    async fn load_from_disk(&self, quote_asset: &str) -> Option<Arc<CachedSymbols>> {
        match self.storage.load_optional::<SymbolCache>(CACHE_FILE).await {
            Ok(Some(mut cache)) => cache.remove(quote_asset).map(Arc::new),
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable symbol cache: {:#}", e);
                None
            }
        }
    }

    // Only called with refresh_lock held, so the read-modify-write is not raced.
    async fn persist(&self, quote_asset: &str, entry: &CachedSymbols) {
        let mut cache: SymbolCache = match self.storage.load_optional(CACHE_FILE).await {
            Ok(cache) => cache.unwrap_or_default(),
            Err(e) => {
                warn!(
                    "Symbol cache is unreadable ({:#}), rewriting it with {} pairs only",
                    e, quote_asset
                );
                SymbolCache::new()
            }
        };
        cache.insert(quote_asset.to_string(), entry.clone());

        if let Err(e) = self.storage.save(CACHE_FILE, &cache).await {
            warn!("Could not persist symbol cache: {:#}", e);
        }
    }
}
