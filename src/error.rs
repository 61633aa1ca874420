use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(format!("Database error: {}", err))
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(format!("I/O error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Append for tenant {tenant_id} did not converge after {attempts} attempts")]
    ConflictRetryExhausted { tenant_id: String, attempts: u32 },

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Checkpoint commit failed: {0}")]
    CheckpointCommitFailed(String),

    #[error("Payload erase failed: {0}")]
    PayloadEraseFailed(String),

    #[error("Retention already running for tenant {tenant_id}")]
    RetentionInProgress { tenant_id: String },

    #[error("Integrity violation at sequence {sequence} for tenant {tenant_id}")]
    IntegrityViolation { tenant_id: String, sequence: u64 },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Vault error: {0}")]
    VaultError(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn corrupt(what: impl std::fmt::Display) -> Self {
        Self::CorruptRecord(what.to_string())
    }

    /// Whether the caller may re-issue the same request and expect it to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConflictRetryExhausted { .. }
                | Self::StoreUnavailable(_)
                | Self::RetentionInProgress { .. }
        )
    }
}
