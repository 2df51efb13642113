//! Scan orchestration: resolve the pair set, fan the RSI work out over a
//! bounded worker pool, and fold the outcomes into a `ScanReport`.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::comfy_table::Reporter;
use crate::config::{Cli, Interval, ScanConfig};
use crate::error::{ConfigurationError, SkipReason};
use crate::find_tickers::CachedCatalog;
use crate::indicators::RsiEngine;
use crate::klines::PriceSeriesSource;
use crate::storage_utils::AsyncStorageManager;

/// Latest RSI reading for one symbol.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RsiResult {
    pub symbol: String,
    pub rsi: f64,
    pub last_close: f64,
    pub interval: Interval,
    pub computed_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

/// Everything one pass produced. `hits` are sorted by RSI, lowest first.
#[derive(Serialize, Debug, Clone)]
pub struct ScanReport {
    pub quote_asset: String,
    pub interval: Interval,
    pub threshold: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requested: usize,
    pub computed: usize,
    pub hits: Vec<RsiResult>,
    pub skipped: Vec<SkippedSymbol>,
    /// Symbols still pending when the scan deadline fired.
    pub unfinished: Vec<String>,
    pub deadline_hit: bool,
}

/// The working set for a pass: the override alone, or the cached catalog
/// narrowed to the quote asset. The override never touches the catalog.
pub async fn resolve_symbols(
    config: &ScanConfig,
    catalog: &CachedCatalog,
    force_refresh: bool,
) -> Result<Vec<String>, ConfigurationError> {
    if let Some(symbol) = &config.symbol {
        info!("Querying single pair: {}", symbol);
        return Ok(vec![symbol.clone()]);
    }

    // One snapshot for the whole pass; workers never read the cache.
    let snapshot = catalog.snapshot(&config.quote_asset, force_refresh).await?;
    let mut seen = HashSet::new();
    Ok(snapshot
        .symbols
        .iter()
        .filter(|s| s.ends_with(config.quote_asset.as_str()))
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect())
}

#[derive(Clone, Copy)]
struct Job {
    engine: RsiEngine,
    interval: Interval,
    limit: u32,
    fetch_timeout: Duration,
}

type SymbolOutcome = (String, Result<RsiResult, SkipReason>);

async fn evaluate(
    source: &dyn PriceSeriesSource,
    symbol: &str,
    job: Job,
) -> Result<RsiResult, SkipReason> {
    let closes = tokio::time::timeout(
        job.fetch_timeout,
        source.fetch_closes(symbol, job.interval, job.limit),
    )
    .await
    .map_err(|_| SkipReason::Timeout(job.fetch_timeout))??;

    let rsi = job.engine.latest(&closes)?;

    Ok(RsiResult {
        symbol: symbol.to_string(),
        rsi,
        // latest() succeeded, so there are at least two closes.
        last_close: closes[closes.len() - 1],
        interval: job.interval,
        computed_at: Utc::now(),
    })
}

pub struct Scanner {
    config: ScanConfig,
    source: Arc<dyn PriceSeriesSource>,
}

impl Scanner {
    pub fn new(config: ScanConfig, source: Arc<dyn PriceSeriesSource>) -> Self {
        Self { config, source }
    }

    fn job(&self) -> Job {
        Job {
            engine: self.config.engine(),
            interval: self.config.interval,
            limit: self.config.kline_limit,
            fetch_timeout: self.config.fetch_timeout(),
        }
    }

    fn dispatch(&self, workers: &mut JoinSet<SymbolOutcome>, symbol: String) {
        let source = self.source.clone();
        let job = self.job();
        workers.spawn(async move {
            let outcome = AssertUnwindSafe(evaluate(source.as_ref(), &symbol, job))
                .catch_unwind()
                .await
                .unwrap_or(Err(SkipReason::WorkerPanicked));
            (symbol, outcome)
        });
    }

    /// Runs one independent pass over `symbols`.
    ///
    /// At most `max_workers` symbols are in flight; each finished worker pulls
    /// the next symbol. Per-symbol failures become `skipped` entries. When the
    /// scan deadline fires, outstanding work is dropped and listed in
    /// `unfinished`.
    pub async fn scan(&self, symbols: Vec<String>) -> ScanReport {
        let started_at = Utc::now();
        let requested = symbols.len();
        let threshold = self.config.rsi_threshold;

        let mut queue = symbols.into_iter();
        let mut in_flight = HashSet::new();
        let mut workers = JoinSet::new();
        for symbol in queue.by_ref().take(self.config.max_workers) {
            in_flight.insert(symbol.clone());
            self.dispatch(&mut workers, symbol);
        }

        let mut computed = 0;
        let mut hits = Vec::new();
        let mut skipped = Vec::new();
        let mut deadline_hit = false;

        let deadline = tokio::time::sleep(self.config.scan_deadline());
        tokio::pin!(deadline);

        while !workers.is_empty() {
            tokio::select! {
                joined = workers.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((symbol, Ok(result))) => {
                            in_flight.remove(&symbol);
                            computed += 1;
                            debug!("{}: RSI {:.2}", symbol, result.rsi);
                            if result.rsi < threshold {
                                hits.push(result);
                            }
                        }
                        Ok((symbol, Err(reason))) => {
                            in_flight.remove(&symbol);
                            debug!("Skipping {}: {}", symbol, reason);
                            skipped.push(SkippedSymbol { symbol, reason });
                        }
                        Err(e) => warn!("Scan worker did not finish: {}", e),
                    }
                    if let Some(next) = queue.next() {
                        in_flight.insert(next.clone());
                        self.dispatch(&mut workers, next);
                    }
                }
                _ = &mut deadline => {
                    deadline_hit = true;
                    break;
                }
            }
        }
        workers.abort_all();

        let mut unfinished: Vec<String> = in_flight.into_iter().chain(queue).collect();
        unfinished.sort();
        if deadline_hit {
            warn!(
                "Scan deadline of {}s reached with {} pairs unfinished",
                self.config.scan_deadline_secs,
                unfinished.len()
            );
        }

        hits.sort_by(|a, b| a.rsi.total_cmp(&b.rsi).then_with(|| a.symbol.cmp(&b.symbol)));
        skipped.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        info!(
            "Scanned {}/{} pairs: {} below RSI {}, {} skipped",
            computed,
            requested,
            hits.len(),
            threshold,
            skipped.len()
        );

        ScanReport {
            quote_asset: self.config.quote_asset.clone(),
            interval: self.config.interval,
            threshold,
            started_at,
            finished_at: Utc::now(),
            requested,
            computed,
            hits,
            skipped,
            unfinished,
            deadline_hit,
        }
    }
}

/// Resolves the pair set, then scans it. Only catalog resolution can fail.
pub async fn run_scan_pass(
    config: &ScanConfig,
    catalog: &CachedCatalog,
    source: Arc<dyn PriceSeriesSource>,
    force_refresh: bool,
) -> Result<ScanReport, ConfigurationError> {
    let symbols = resolve_symbols(config, catalog, force_refresh).await?;
    Ok(Scanner::new(config.clone(), source).scan(symbols).await)
}

/// Runs one pass, or one every `cli.watch` seconds, until `shutdown` resolves.
///
/// `shutdown` is polled during passes as well as between them, so a stop
/// request that lands mid-scan ends the loop without waiting for the pass.
/// Returns the number of passes that were reported.
pub async fn run_watch(
    config: &ScanConfig,
    catalog: &CachedCatalog,
    source: Arc<dyn PriceSeriesSource>,
    storage: &AsyncStorageManager,
    reporter: &dyn Reporter,
    cli: &Cli,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<usize> {
    tokio::pin!(shutdown);
    let mut force_refresh = cli.refresh_symbols;
    let mut passes = 0;

    loop {
        let report = tokio::select! {
            report = run_scan_pass(config, catalog, source.clone(), force_refresh) => report?,
            _ = &mut shutdown => {
                info!("Interrupted, abandoning the current pass");
                break;
            }
        };
        force_refresh = false;
        passes += 1;

        if let Err(e) = storage.save("results", &report).await {
            warn!("Could not save scan results: {:#}", e);
        }
        reporter.report(report)?;

        let Some(every) = cli.watch else { break };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(every)) => {}
            _ = &mut shutdown => break,
        }
        if let Err(e) = clearscreen::clear() {
            debug!("Could not clear screen: {}", e);
        }
    }

    Ok(passes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::find_tickers::SymbolCatalog;
    use crate::indicators::RsiError;
    use crate::storage_utils::tests::temp_storage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Reply {
        Closes(Vec<f64>),
        Delayed(Duration, Vec<f64>),
        Fail(SourceError),
        Hang,
        Panic,
    }

    #[derive(Default)]
    struct MockSource {
        replies: HashMap<String, Reply>,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl MockSource {
        fn with(replies: Vec<(&str, Reply)>) -> Arc<Self> {
            Arc::new(Self {
                replies: replies
                    .into_iter()
                    .map(|(s, r)| (s.to_string(), r))
                    .collect(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl PriceSeriesSource for MockSource {
        async fn fetch_closes(
            &self,
            symbol: &str,
            _interval: Interval,
            _limit: u32,
        ) -> Result<Vec<f64>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let reply = self
                .replies
                .get(symbol)
                .cloned()
                .unwrap_or_else(|| Reply::Fail(SourceError::InvalidSymbol(symbol.to_string())));
            let out = match reply {
                Reply::Closes(closes) => Ok(closes),
                Reply::Delayed(wait, closes) => {
                    tokio::time::sleep(wait).await;
                    Ok(closes)
                }
                Reply::Fail(e) => Err(e),
                Reply::Hang => std::future::pending().await,
                Reply::Panic => panic!("source blew up for {symbol}"),
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            out
        }
    }

    fn falling() -> Vec<f64> {
        (1..=30).rev().map(|i| i as f64).collect()
    }

    fn rising() -> Vec<f64> {
        (1..=30).map(|i| i as f64).collect()
    }

    fn walk(seed: u64, len: usize) -> Vec<f64> {
        let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
        let mut price = 50.0;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let step = ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
                price = (price * (1.0 + step * 0.04)).max(0.01);
                price
            })
            .collect()
    }

    fn config(max_workers: usize) -> ScanConfig {
        ScanConfig {
            max_workers,
            ..Default::default()
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("C{:02}USDT", i)).collect()
    }

    #[tokio::test]
    async fn failed_symbols_do_not_abort_the_scan() {
        let source = MockSource::with(vec![
            ("A1USDT", Reply::Closes(falling())),
            ("A2USDT", Reply::Closes(falling())),
            ("A3USDT", Reply::Closes(falling())),
            ("A4USDT", Reply::Closes(falling())),
            ("B1USDT", Reply::Closes(rising())),
            ("B2USDT", Reply::Closes(rising())),
            ("B3USDT", Reply::Closes(rising())),
            ("X1USDT", Reply::Fail(SourceError::Network("reset".into()))),
            ("X2USDT", Reply::Fail(SourceError::RateLimited { retry_after: None })),
            ("X3USDT", Reply::Fail(SourceError::InvalidSymbol("X3USDT".into()))),
        ]);
        let symbols: Vec<String> = [
            "A1USDT", "X1USDT", "B1USDT", "A2USDT", "X2USDT", "B2USDT", "A3USDT", "X3USDT",
            "B3USDT", "A4USDT",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let report = Scanner::new(config(4), source).scan(symbols).await;

        assert_eq!(report.requested, 10);
        assert_eq!(report.computed, 7);
        let hit_names: Vec<&str> = report.hits.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(hit_names, vec!["A1USDT", "A2USDT", "A3USDT", "A4USDT"]);
        assert!(report.hits.iter().all(|r| r.rsi == 0.0 && r.last_close == 1.0));
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(skipped, vec!["X1USDT", "X2USDT", "X3USDT"]);
        assert!(report.unfinished.is_empty());
        assert!(!report.deadline_hit);
    }

    #[tokio::test]
    async fn empty_symbol_set_is_an_empty_report() {
        let source = MockSource::with(vec![]);
        let report = Scanner::new(config(40), source.clone()).scan(Vec::new()).await;

        assert_eq!(report.requested, 0);
        assert_eq!(report.computed, 0);
        assert!(report.hits.is_empty() && report.skipped.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_count_does_not_change_results() {
        let replies: Vec<(String, Reply)> = names(60)
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let delay = Duration::from_millis(((i * 37) % 11) as u64 * 10);
                (name, Reply::Delayed(delay, walk(i as u64, 200)))
            })
            .collect();
        let source = MockSource::with(replies.iter().map(|(n, r)| (n.as_str(), r.clone())).collect());
        let threshold = ScanConfig {
            rsi_threshold: 50.0,
            ..Default::default()
        };

        let serial = Scanner::new(
            ScanConfig {
                max_workers: 1,
                ..threshold.clone()
            },
            source.clone(),
        )
        .scan(names(60))
        .await;
        let parallel = Scanner::new(
            ScanConfig {
                max_workers: 40,
                ..threshold
            },
            source,
        )
        .scan(names(60))
        .await;

        let key = |r: &ScanReport| -> Vec<(String, u64)> {
            r.hits.iter().map(|h| (h.symbol.clone(), h.rsi.to_bits())).collect()
        };
        assert_eq!(serial.computed, 60);
        assert_eq!(parallel.computed, 60);
        assert!(!serial.hits.is_empty());
        assert_eq!(key(&serial), key(&parallel));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_fetches_never_exceed_max_workers() {
        let replies: Vec<(String, Reply)> = names(25)
            .into_iter()
            .map(|n| (n, Reply::Delayed(Duration::from_millis(100), rising())))
            .collect();
        let source = MockSource::with(replies.iter().map(|(n, r)| (n.as_str(), r.clone())).collect());

        let report = Scanner::new(config(3), source.clone()).scan(names(25)).await;

        assert_eq!(report.computed, 25);
        assert_eq!(source.peak.load(Ordering::SeqCst), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_is_skipped_as_timeout() {
        let source = MockSource::with(vec![
            ("SLOWUSDT", Reply::Hang),
            ("FASTUSDT", Reply::Closes(falling())),
        ]);
        let config = ScanConfig {
            fetch_timeout_secs: 10,
            scan_deadline_secs: 600,
            ..Default::default()
        };

        let report = Scanner::new(config, source)
            .scan(vec!["SLOWUSDT".into(), "FASTUSDT".into()])
            .await;

        assert_eq!(report.hits.len(), 1);
        assert_eq!(
            report.skipped,
            vec![SkippedSymbol {
                symbol: "SLOWUSDT".into(),
                reason: SkipReason::Timeout(Duration::from_secs(10)),
            }]
        );
        assert!(!report.deadline_hit);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_partial_results() {
        let source = MockSource::with(vec![
            ("HANGUSDT", Reply::Hang),
            ("OKAYUSDT", Reply::Closes(falling())),
            ("LATEUSDT", Reply::Delayed(Duration::from_secs(1), falling())),
        ]);
        let config = ScanConfig {
            max_workers: 2,
            fetch_timeout_secs: 3600,
            scan_deadline_secs: 30,
            ..Default::default()
        };

        let report = Scanner::new(config, source)
            .scan(vec!["HANGUSDT".into(), "OKAYUSDT".into(), "LATEUSDT".into()])
            .await;

        assert!(report.deadline_hit);
        assert_eq!(report.unfinished, vec!["HANGUSDT".to_string()]);
        let hits: Vec<&str> = report.hits.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(hits, vec!["LATEUSDT", "OKAYUSDT"]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_lists_undispatched_symbols() {
        let source = MockSource::with(vec![("HANGUSDT", Reply::Hang)]);
        let config = ScanConfig {
            max_workers: 1,
            fetch_timeout_secs: 3600,
            scan_deadline_secs: 5,
            ..Default::default()
        };

        let report = Scanner::new(config, source.clone())
            .scan(vec!["HANGUSDT".into(), "BUSDT".into(), "AUSDT".into()])
            .await;

        assert_eq!(report.unfinished, vec!["AUSDT", "BUSDT", "HANGUSDT"]);
        assert_eq!(report.computed, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_fetch_is_isolated() {
        let source = MockSource::with(vec![
            ("BOOMUSDT", Reply::Panic),
            ("FINEUSDT", Reply::Closes(falling())),
        ]);

        let report = Scanner::new(config(2), source)
            .scan(vec!["BOOMUSDT".into(), "FINEUSDT".into()])
            .await;

        assert_eq!(report.hits.len(), 1);
        assert_eq!(report.skipped[0].symbol, "BOOMUSDT");
        assert_eq!(report.skipped[0].reason, SkipReason::WorkerPanicked);
    }

    #[tokio::test]
    async fn bad_series_become_skips() {
        let mut zero_at_one = rising();
        zero_at_one[1] = 0.0;
        let source = MockSource::with(vec![
            ("SHORTUSDT", Reply::Closes(vec![1.0; 14])),
            ("ZEROUSDT", Reply::Closes(zero_at_one)),
        ]);

        let report = Scanner::new(config(2), source)
            .scan(vec!["SHORTUSDT".into(), "ZEROUSDT".into()])
            .await;

        assert_eq!(report.computed, 0);
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::Rsi(RsiError::InsufficientData {
                required: 15,
                actual: 14
            })
        );
        assert_eq!(
            report.skipped[1].reason,
            SkipReason::Rsi(RsiError::InvalidInput {
                index: 1,
                value: 0.0
            })
        );
    }

    #[tokio::test]
    async fn threshold_is_strict() {
        let source = MockSource::with(vec![("FLATUSDT", Reply::Closes(vec![5.0; 20]))]);
        let at = ScanConfig {
            rsi_threshold: 50.0,
            ..Default::default()
        };
        let above = ScanConfig {
            rsi_threshold: 50.5,
            ..Default::default()
        };

        let report = Scanner::new(at, source.clone()).scan(vec!["FLATUSDT".into()]).await;
        assert_eq!(report.computed, 1);
        assert!(report.hits.is_empty());

        let report = Scanner::new(above, source).scan(vec!["FLATUSDT".into()]).await;
        assert_eq!(report.hits[0].rsi, 50.0);
    }

    struct FixedCatalog {
        calls: AtomicUsize,
        reply: Result<Vec<String>, SourceError>,
    }

    #[async_trait]
    impl SymbolCatalog for FixedCatalog {
        async fn list_symbols(&self, _quote_asset: &str) -> Result<Vec<String>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    async fn catalog(reply: Result<Vec<&str>, SourceError>) -> (Arc<FixedCatalog>, CachedCatalog) {
        let inner = Arc::new(FixedCatalog {
            calls: AtomicUsize::new(0),
            reply: reply.map(|v| v.into_iter().map(String::from).collect()),
        });
        let cached = CachedCatalog::new(
            inner.clone(),
            temp_storage("resolve").await,
            Duration::from_secs(3600),
        );
        (inner, cached)
    }

    #[tokio::test]
    async fn override_bypasses_the_catalog() {
        let (inner, cached) = catalog(Err(SourceError::Network("down".into()))).await;
        let config = ScanConfig {
            symbol: Some("ETHUSDT".into()),
            ..Default::default()
        };

        let symbols = resolve_symbols(&config, &cached, true).await.unwrap();

        assert_eq!(symbols, vec!["ETHUSDT"]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn catalog_is_filtered_and_deduplicated() {
        let (_, cached) = catalog(Ok(vec!["BTCUSDT", "ETHBTC", "SOLUSDT", "BTCUSDT"])).await;

        let symbols = resolve_symbols(&ScanConfig::default(), &cached, false)
            .await
            .unwrap();

        assert_eq!(symbols, vec!["BTCUSDT", "SOLUSDT"]);
    }

    #[tokio::test]
    async fn unreachable_catalog_is_fatal() {
        let (_, cached) = catalog(Err(SourceError::Network("down".into()))).await;
        let source = MockSource::with(vec![]);

        let result = run_scan_pass(&ScanConfig::default(), &cached, source.clone(), false).await;

        assert!(matches!(
            result,
            Err(ConfigurationError::CatalogUnavailable { .. })
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn full_pass_over_catalog() {
        let (_, cached) = catalog(Ok(vec!["LOWUSDT", "HIGHUSDT"])).await;
        let source = MockSource::with(vec![
            ("LOWUSDT", Reply::Closes(falling())),
            ("HIGHUSDT", Reply::Closes(rising())),
        ]);

        let report = run_scan_pass(&ScanConfig::default(), &cached, source, false)
            .await
            .unwrap();

        assert_eq!(report.requested, 2);
        assert_eq!(report.hits.len(), 1);
        assert_eq!(report.hits[0].symbol, "LOWUSDT");
        assert_eq!(report.hits[0].interval, Interval::Minute1);
    }

    #[derive(Default)]
    struct CollectingReporter {
        reports: Mutex<Vec<ScanReport>>,
    }

    impl Reporter for CollectingReporter {
        fn report(&self, report: ScanReport) -> anyhow::Result<()> {
            self.reports.lock().unwrap().push(report);
            Ok(())
        }
    }

    fn single(symbol: &str) -> ScanConfig {
        ScanConfig {
            symbol: Some(symbol.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn one_shot_reports_and_saves_once() {
        let (_, cached) = catalog(Ok(vec![])).await;
        let storage = temp_storage("one-shot").await;
        let reporter = CollectingReporter::default();
        let source = MockSource::with(vec![("LOWUSDT", Reply::Closes(falling()))]);

        let passes = run_watch(
            &single("LOWUSDT"),
            &cached,
            source,
            &storage,
            &reporter,
            &Cli::default(),
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(passes, 1);
        assert_eq!(reporter.reports.lock().unwrap().len(), 1);
        let saved: serde_json::Value = storage.load_optional("results").await.unwrap().unwrap();
        assert_eq!(saved["hits"][0]["symbol"], "LOWUSDT");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_request_during_a_later_pass_is_honoured() {
        let (_, cached) = catalog(Ok(vec![])).await;
        let storage = temp_storage("watch-stop").await;
        let reporter = CollectingReporter::default();
        let source = MockSource::with(vec![(
            "SLOWUSDT",
            Reply::Delayed(Duration::from_secs(8), falling()),
        )]);
        let cli = Cli {
            watch: Some(60),
            ..Default::default()
        };

        // Pass one runs 0..8s, the pause ends at 68s, pass two would end at 76s.
        let start = tokio::time::Instant::now();
        let passes = run_watch(
            &single("SLOWUSDT"),
            &cached,
            source.clone(),
            &storage,
            &reporter,
            &cli,
            tokio::time::sleep(Duration::from_secs(70)),
        )
        .await
        .unwrap();

        assert_eq!(passes, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(70) && elapsed < Duration::from_secs(76));
        assert_eq!(reporter.reports.lock().unwrap().len(), 1);
    }
}
