use thiserror::Error;

/// Failures seen while talking to the data provider. None of these escape the
/// gateway: a failed fetch is reported to scorers as missing data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
