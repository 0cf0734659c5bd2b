use analysis_core::QuoteProvider;
use serde::{Deserialize, Serialize};

/// Why the live quote was passed over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    NoQuote,
    QuoteError { message: String },
    NotFinite,
    NonPositive,
    /// Quote and last close disagree by more than the allowed factor,
    /// usually a cents/dollars mix-up between providers
    Implausible { ratio: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PriceSource {
    Live,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub price: f64,
    pub source: PriceSource,
}

impl ResolvedPrice {
    pub fn is_live(&self) -> bool {
        self.source == PriceSource::Live
    }
}

/// Accept a live quote only if it is finite, positive and within
/// `max_ratio` of the fallback in either direction.
pub fn check_quote(quote: Option<f64>, fallback_price: f64, max_ratio: f64) -> Result<f64, FallbackReason> {
    let quote = quote.ok_or(FallbackReason::NoQuote)?;
    if !quote.is_finite() {
        return Err(FallbackReason::NotFinite);
    }
    if quote <= 0.0 {
        return Err(FallbackReason::NonPositive);
    }

    let ratio = quote / fallback_price;
    if ratio > max_ratio || ratio < 1.0 / max_ratio {
        return Err(FallbackReason::Implausible { ratio });
    }
    Ok(quote)
}

/// Current price for `symbol`, falling back to `fallback_price` (normally
/// the last historical close) whenever the live quote cannot be trusted.
pub async fn resolve_current_price(
    quotes: &dyn QuoteProvider,
    symbol: &str,
    fallback_price: f64,
    max_ratio: f64,
) -> ResolvedPrice {
    let quote = match quotes.latest_price(symbol).await {
        Ok(quote) => check_quote(quote, fallback_price, max_ratio),
        Err(e) => Err(FallbackReason::QuoteError { message: e.to_string() }),
    };

    match quote {
        Ok(price) => ResolvedPrice { price, source: PriceSource::Live },
        Err(reason) => {
            tracing::warn!(
                "Using last close {:.4} for {} instead of live quote: {:?}",
                fallback_price,
                symbol,
                reason
            );
            ResolvedPrice {
                price: fallback_price,
                source: PriceSource::Fallback(reason),
            }
        }
    }
}
