use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    /// Transport error, non-success status, GraphQL error list, or a page that
    /// does not decode. Partial results are never surfaced alongside it.
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("both start and end dates must be provided together")]
    InvalidDatePairing,
    #[error("job cancelled")]
    Cancelled,
}

impl AuditError {
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::FetchFailed(message.into())
    }

    /// Validation failures are raised before any network call is made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAccountId(_)
                | Self::MissingCredentials(_)
                | Self::InvalidDatePairing
                | Self::InvalidDateRange(_)
        )
    }
}
