//! Token payload
//!
//! The claims sealed inside every token. Never persisted server-side.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub id: Uuid,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl Payload {
    /// Build a payload with a fresh random ID valid for `duration` from now.
    pub fn new(username: impl Into<String>, duration: Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            issued_at,
            expired_at: issued_at + duration,
        }
    }

    /// Reject the payload once its expiry time has passed.
    pub fn valid(&self) -> Result<(), TokenError> {
        if Utc::now() > self.expired_at {
            return Err(TokenError::ExpiredToken);
        }
        Ok(())
    }
}
