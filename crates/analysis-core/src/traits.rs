use async_trait::async_trait;
use crate::{AnalysisError, Bar};

/// Source of daily bar history for a symbol
#[async_trait]
pub trait BarHistoryProvider: Send + Sync {
    /// Ascending, duplicate-free bars. Fails with `DataUnavailable` when fewer
    /// than `min_bars` can be supplied.
    async fn fetch_history(&self, symbol: &str, min_bars: usize) -> Result<Vec<Bar>, AnalysisError>;
}

/// Source of a live quote for a symbol
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// `Ok(None)` when the provider has no quote right now.
    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>, AnalysisError>;
}
