//! Error handling for the tramid middle end

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Middle-end error
#[derive(Error, Debug)]
pub enum Error {
    // ==================== Configuration Errors ====================

    #[error("invalid opt level: {0}")]
    InvalidOptLevel(String),

    #[error("invalid opt pass token: {0}")]
    InvalidPassToken(String),

    // ==================== Optimizer Errors ====================

    #[error("optimizer pass {pass} violated its result contract: {reason}")]
    PassContract { pass: String, reason: String },

    #[error("rewrite budget of {budget} exceeded after pass {pass}")]
    RewriteBudgetExceeded { pass: String, budget: usize },

    // ==================== Stage Errors ====================

    #[error("malformed module root: {0}")]
    MalformedRoot(String),

    #[error("stage mismatch: expected east_stage={expected}, got {got}")]
    StageMismatch { expected: u8, got: u8 },

    // ==================== Type Registry Errors ====================

    #[error("unknown type id: {0}")]
    UnknownTypeId(i64),

    // ==================== Serialization ====================

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Configuration errors are reported before any tree is touched
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidOptLevel(_) | Self::InvalidPassToken(_))
    }

    /// Errors that abort the whole compilation unit
    pub fn is_fatal_for_unit(&self) -> bool {
        matches!(
            self,
            Self::PassContract { .. }
                | Self::RewriteBudgetExceeded { .. }
                | Self::MalformedRoot(_)
                | Self::StageMismatch { .. }
        )
    }
}
