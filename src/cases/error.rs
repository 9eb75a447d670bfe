//! Error types for the case system
//!
//! `CaseError` is what callers of the moderation service see. The store,
//! the enforcement gateway and notification sinks each have their own error
//! type so the service can decide what is fatal and what is not.

use thiserror::Error;

/// Errors surfaced by moderation operations
#[derive(Debug, Error)]
pub enum CaseError {
    /// Bad input, such as a temporary ban without a positive duration
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No matching active case (unknown id, or already resolved)
    #[error("No active case found: {0}")]
    NotFound(String),

    /// The enforcement layer refused or failed the request
    #[error("Enforcement failed: {0}")]
    Enforcement(GatewayError),

    /// The case store is unavailable or a write failed
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl CaseError {
    /// Errors caused by the caller's input rather than a system fault.
    ///
    /// These are returned for user-facing messaging and are not logged as
    /// faults.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Result type for moderation operations
pub type CaseResult<T> = Result<T, CaseError>;

/// Errors raised by a case store
#[derive(Debug, Error)]
pub enum StoreError {
    /// A case with this id already exists, in any kind
    #[error("Duplicate case id: {0}")]
    DuplicateCaseId(String),

    /// Reading or writing the backing file failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// The store cannot serve requests
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the enforcement gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The restriction (or the member) no longer exists at the platform
    #[error("Restriction not found")]
    NotFound,

    /// The guild can no longer be reached
    #[error("Guild unavailable: {0}")]
    GuildUnavailable(u64),

    /// Discord API error
    #[error("Discord API error: {0}")]
    Discord(#[from] Box<serenity::Error>),

    /// Generic error
    #[error("Gateway error: {0}")]
    Other(String),
}

impl From<String> for GatewayError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;

/// A notification could not be delivered
#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);
