//! Token module
//!
//! Stateless, tamper-evident, time-bounded session tokens. There is no
//! server-side session table: a token stays valid until it expires.

mod payload;
mod sealed;

use chrono::Duration;

pub use payload::Payload;
pub use sealed::{SealedTokenMaker, SYMMETRIC_KEY_SIZE};

/// Token creation and verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is invalid")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("invalid key size: must be exactly {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("failed to seal token: {0}")]
    Sealing(String),
}

/// Issues and verifies session tokens.
pub trait TokenMaker: Send + Sync {
    /// Create a token for `username` valid for `duration`.
    fn create_token(&self, username: &str, duration: Duration) -> Result<(String, Payload), TokenError>;

    /// Check that a token is authentic and unexpired, returning its payload.
    fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
}
