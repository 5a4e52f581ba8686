use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type shared by the tally crates.
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Cyclic referral graph at account {account_id}")]
    CyclicReferralGraph { account_id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of errors for logging and user display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Upstream account or balance data violates an invariant.
    DataError,
    /// An external provider failed to answer.
    ProviderError,
    /// Internal system error (storage, file I/O, etc.).
    SystemError,
    /// Invalid or missing configuration.
    ConfigError,
}

impl TallyError {
    /// Returns the broad error category for routing and display purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::ConfigError,
            Self::Storage(_) => ErrorCategory::SystemError,
            Self::Provider(_) => ErrorCategory::ProviderError,
            Self::MalformedRecord(_) => ErrorCategory::DataError,
            Self::CyclicReferralGraph { .. } => ErrorCategory::DataError,
            Self::Internal(_) => ErrorCategory::SystemError,
        }
    }

    /// Returns a user-friendly message (hides internal details).
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(msg) => format!("Configuration issue: {msg}"),
            Self::Storage(_) => "Storage error. Check disk space and permissions.".into(),
            Self::Provider(_) => "Account data is unavailable right now. Try again shortly.".into(),
            Self::MalformedRecord(_) => {
                "Account data is inconsistent; totals were not updated.".into()
            }
            Self::CyclicReferralGraph { .. } => {
                "Referral data is inconsistent; team totals were not updated.".into()
            }
            Self::Internal(_) => "An unexpected error occurred.".into(),
        }
    }

    /// Whether showing the previous (stale) totals is an acceptable fallback.
    pub fn keeps_previous_view(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::DataError | ErrorCategory::ProviderError
        )
    }
}

impl From<anyhow::Error> for TallyError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}
