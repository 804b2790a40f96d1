// Monitor error type
// Purpose: One error enum for the whole daemon, mapped onto the abstract
// failure kinds the pipeline distinguishes (provider vs storage vs policy).

use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Malformed input from outside the process (invalid UTF-8 SQL text,
    /// unparseable connection string).
    #[error("bad input: {0}")]
    BadInput(String),

    /// Configuration failed validation. Fatal at startup, rejected at reload.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A monitored instance could not be reached or refused the query.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A provider call exceeded its per-database timeout.
    #[error("provider timeout: {0}")]
    ProviderTimeout(String),

    /// The local metric store is unreachable or failed a statement.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A write raced with a conflicting write (illegal event transition,
    /// unique-constraint violation outside the upsert path).
    #[error("storage conflict: {0}")]
    StorageConflict(String),

    /// The remediation guard refused the request. Not a failure.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// The surrounding scope was cancelled. Unwinds quietly, never logged
    /// at error level.
    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    pub fn provider_timeout(msg: impl Into<String>) -> Self {
        Self::ProviderTimeout(msg.into())
    }

    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn storage_conflict(msg: impl Into<String>) -> Self {
        Self::StorageConflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short machine-readable kind, used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadInput(_) => "bad_input",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::ProviderTimeout(_) => "provider_timeout",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::StorageConflict(_) => "storage_conflict",
            Self::PolicyDenied(_) => "policy_denied",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for MonitorError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::StorageConflict(e.to_string())
            },
            _ => Self::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<mysql_async::Error> for MonitorError {
    fn from(e: mysql_async::Error) -> Self {
        Self::ProviderUnavailable(e.to_string())
    }
}
