use thiserror::Error;

/// Error taxonomy for the ingestion pipeline and query layer.
///
/// The batch driver is the only layer that decides "skip and continue";
/// everything below it surfaces one of these per work item.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Transient upstream failure (network, timeout, 5xx). Retryable by
    /// re-running the work item later.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The provider has nothing for this identifier. Terminal for the
    /// item, not an alarm condition.
    #[error("no data found: {0}")]
    NoDataFound(String),

    /// Extraction output did not parse as a JSON object. Carries the raw
    /// payload so it can be logged for manual inspection.
    #[error("malformed extraction output: {reason}")]
    MalformedExtraction { reason: String, raw: String },

    /// A mandatory field could not be determined after normalization.
    #[error("normalization failed: {0}")]
    Normalization(String),

    /// The primary record write did not complete.
    #[error("storage write failed: {0}")]
    StorageWrite(#[from] sqlx::Error),

    /// A derived index write failed after the primary write succeeded.
    /// Non-fatal: stale indexes degrade browse/search, never the
    /// time-series read path.
    #[error("index write failed: {0}")]
    IndexWrite(sqlx::Error),

    /// A record body failed to encode or decode.
    #[error("record body encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The requested ticker or sector has no CompanyProfile at all.
    #[error("{0} not found")]
    NotFound(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

impl IngestError {
    /// Whether the batch driver should retry the primary write for this
    /// work item.
    pub fn is_retryable_write(&self) -> bool {
        matches!(self, IngestError::StorageWrite(_))
    }
}
