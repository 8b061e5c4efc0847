//! Ledger Store Errors
//!
//! Error types for store operations. Constraint violations are classified
//! so callers can tell a uniqueness conflict from a backend outage.

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint violated (constraint name)
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Check constraint violated, e.g. a balance going negative
    #[error("Check constraint violated: {0}")]
    CheckViolation(String),

    /// Foreign key constraint violated
    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    /// Expected row does not exist
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// Stored row could not be decoded into a domain record
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Non-database backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const FOREIGN_KEY_VIOLATION: &str = "23503";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => return StoreError::UniqueViolation(constraint),
                Some(CHECK_VIOLATION) => return StoreError::CheckViolation(constraint),
                Some(FOREIGN_KEY_VIOLATION) => {
                    return StoreError::ForeignKeyViolation(constraint)
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

impl StoreError {
    /// Check if this error is a uniqueness conflict
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}
