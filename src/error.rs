use std::fmt;

/// The main error type for pawsync operations
#[derive(Debug, thiserror::Error)]
pub enum PawsyncError {
    #[error("Invalid schedule for subscription {subscription_id}: {reason}")]
    InvalidSchedule {
        subscription_id: String,
        reason: String,
    },

    #[error("Unknown service code: {0}")]
    UnknownServiceCode(String),

    #[error("Billing provider error during {operation}: {message}")]
    Provider { operation: String, message: String },

    #[error("Credit balance changed concurrently for client {client_id}")]
    CreditRace { client_id: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl PawsyncError {
    pub fn invalid_schedule(
        subscription_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSchedule {
            subscription_id: subscription_id.into(),
            reason: reason.into(),
        }
    }

    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a sync run should continue with the next subscription after
    /// this error, or abort the run entirely.
    ///
    /// A failure to list subscriptions aborts the run since there is nothing
    /// to work on; everything raised while processing a single subscription
    /// is isolated to that subscription.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Provider { operation, .. } if operation == "list_subscriptions")
    }
}

impl From<serde_json::Error> for PawsyncError {
    fn from(err: serde_json::Error) -> Self {
        PawsyncError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(feature = "live-provider")]
impl From<reqwest::Error> for PawsyncError {
    fn from(err: reqwest::Error) -> Self {
        let operation = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "http".to_string());
        if err.is_timeout() {
            PawsyncError::provider(operation, "request timed out")
        } else if err.is_connect() {
            PawsyncError::provider(operation, format!("connection error: {}", err))
        } else {
            PawsyncError::provider(operation, err.to_string())
        }
    }
}

/// Result type alias for pawsync operations
pub type Result<T> = std::result::Result<T, PawsyncError>;

/// Transition states of a sync run, surfaced in logs and run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Reconciling,
    CleaningUp,
    Billing,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::CleaningUp => "cleaning_up",
            SyncPhase::Billing => "billing",
        };
        f.write_str(s)
    }
}
