use thiserror::Error;

/// Error taxonomy shared by every analysis crate.
///
/// `InsufficientHistory` is a normal market condition upstream and is usually
/// turned into an empty result. `MissingIndicator` degrades a score instead of
/// aborting. Everything else fails the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Insufficient history: {0}")]
    InsufficientHistory(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing indicator: {0}")]
    MissingIndicator(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("API error: {0}")]
    ApiError(String),
}

impl AnalysisError {
    /// Whether the caller may keep going with a degraded or empty result.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::InsufficientHistory(_) | AnalysisError::MissingIndicator(_)
        )
    }
}
