use analysis_core::{validate_series, AnalysisError, Bar, BarHistoryProvider, IndicatorSnapshot, QuoteProvider};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use polygon_client::PolygonClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use technical_analysis::SurgeSignal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use zone_analysis::{analyze_bars, BreakReport, LevelAnalysis, ZoneAnalysisConfig};

pub mod price;
pub use price::{check_quote, resolve_current_price, FallbackReason, PriceSource, ResolvedPrice};

/// Internal cache entry with timestamp
struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

const CACHE_TTL_SECS: i64 = 300; // 5 minutes

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Everything reported for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub analyzed_at: DateTime<Utc>,
    pub bar_count: usize,
    pub last_bar_at: DateTime<Utc>,
    pub price: ResolvedPrice,
    pub levels: LevelAnalysis,
    pub indicators: IndicatorSnapshot,
    pub breaks: Vec<BreakReport>,
    pub surge: SurgeSignal,
}

impl SymbolAnalysis {
    /// True when neither a support nor a resistance zone was found
    pub fn has_no_levels(&self) -> bool {
        self.levels.zones.is_empty()
    }
}

/// Fetches history and quotes, then runs the zone pipeline per symbol.
/// Cheap to clone; clones share providers and the bar cache.
#[derive(Clone)]
pub struct ZoneAnalysisOrchestrator {
    history: Arc<dyn BarHistoryProvider>,
    quotes: Arc<dyn QuoteProvider>,
    config: ZoneAnalysisConfig,
    concurrency: usize,
    /// Cache bars per symbol (5-min TTL)
    bars_cache: Arc<DashMap<String, CacheEntry<Arc<Vec<Bar>>>>>,
}

impl ZoneAnalysisOrchestrator {
    pub fn new(
        history: Arc<dyn BarHistoryProvider>,
        quotes: Arc<dyn QuoteProvider>,
        config: ZoneAnalysisConfig,
    ) -> Self {
        Self {
            history,
            quotes,
            config,
            concurrency: DEFAULT_CONCURRENCY,
            bars_cache: Arc::new(DashMap::new()),
        }
    }

    /// Polygon for both history and live quotes
    pub fn with_polygon(client: PolygonClient, config: ZoneAnalysisConfig) -> Self {
        let client = Arc::new(client);
        Self::new(client.clone(), client, config)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn config(&self) -> &ZoneAnalysisConfig {
        &self.config
    }

    /// Daily bars for `symbol`, served from cache while fresh
    pub async fn get_bars(&self, symbol: &str) -> Result<Arc<Vec<Bar>>, AnalysisError> {
        if let Some(entry) = self.bars_cache.get(symbol) {
            if Utc::now() - entry.cached_at < Duration::seconds(CACHE_TTL_SECS) {
                tracing::debug!("Bars cache hit for {}", symbol);
                return Ok(entry.data.clone());
            }
        }

        let bars = Arc::new(
            self.history
                .fetch_history(symbol, self.config.history.min_bars)
                .await?,
        );
        self.bars_cache.insert(
            symbol.to_string(),
            CacheEntry {
                data: bars.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(bars)
    }

    /// Analyze one symbol end to end
    pub async fn analyze(&self, symbol: &str) -> Result<SymbolAnalysis, AnalysisError> {
        tracing::info!("Starting zone analysis for {}", symbol);

        let bars = self.get_bars(symbol).await?;
        validate_series(&bars)?;
        let last = bars.last().ok_or_else(|| {
            AnalysisError::InsufficientHistory(format!("no bars returned for {}", symbol))
        })?;
        if bars.len() < self.config.history.min_bars {
            tracing::warn!(
                "{} has {} bars, fewer than the {} requested; long averages may be missing",
                symbol,
                bars.len(),
                self.config.history.min_bars
            );
        }

        let price = resolve_current_price(
            self.quotes.as_ref(),
            symbol,
            last.close,
            self.config.history.max_price_ratio,
        )
        .await;

        let analysis = analyze_bars(&bars, price.price, &self.config)?;

        tracing::info!(
            "{}: {} support / {} resistance zones, {} break(s) at {:.4} ({})",
            symbol,
            analysis.levels.zones.support_zones.len(),
            analysis.levels.zones.resistance_zones.len(),
            analysis.breaks.len(),
            price.price,
            if price.is_live() { "live" } else { "last close" }
        );

        let report = SymbolAnalysis {
            symbol: symbol.to_string(),
            analyzed_at: Utc::now(),
            bar_count: analysis.bar_count,
            last_bar_at: last.timestamp,
            price,
            levels: analysis.levels,
            indicators: analysis.indicators,
            breaks: analysis.breaks,
            surge: analysis.surge,
        };
        if report.has_no_levels() {
            tracing::info!("{}: no actionable zone near {:.4}", symbol, report.price.price);
        }
        Ok(report)
    }

    /// Analyze many symbols concurrently, at most `concurrency` at a time.
    /// Results come back in input order; one failure does not stop the rest.
    pub async fn analyze_symbols(
        &self,
        symbols: &[String],
    ) -> Vec<(String, Result<SymbolAnalysis, AnalysisError>)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, symbol) in symbols.iter().cloned().enumerate() {
            let this = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.analyze(&symbol).await,
                    Err(e) => Err(AnalysisError::ApiError(format!("semaphore closed: {}", e))),
                };
                (index, symbol, result)
            });
        }

        let mut slots: Vec<Option<Result<SymbolAnalysis, AnalysisError>>> =
            (0..symbols.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, symbol, result)) => {
                    if let Err(e) = &result {
                        if e.is_recoverable() {
                            tracing::info!("{}: {}", symbol, e);
                        } else {
                            tracing::warn!("{} failed: {}", symbol, e);
                        }
                    }
                    slots[index] = Some(result);
                }
                Err(e) => tracing::error!("Analysis task failed to complete: {}", e),
            }
        }

        symbols
            .iter()
            .cloned()
            .zip(slots)
            .map(|(symbol, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(AnalysisError::ApiError(format!(
                        "analysis task for {} did not complete",
                        symbol
                    )))
                });
                (symbol, result)
            })
            .collect()
    }
}
