//! Field validation for provisioning input.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must contain from {min}-{max} characters")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
    },

    #[error("{field} {reason}")]
    Format { field: &'static str, reason: &'static str },
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9_]+$").expect("Invalid username pattern"))
}

fn full_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z\s]+$").expect("Invalid full name pattern"))
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Invalid email pattern")
    })
}

fn validate_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(ValidationError::Length { field, min, max });
    }
    Ok(())
}

pub fn validate_username(value: &str) -> Result<(), ValidationError> {
    validate_length("username", value, 3, 100)?;
    if !username_pattern().is_match(value) {
        return Err(ValidationError::Format {
            field: "username",
            reason: "must contain only lowercase letters, digits, or underscore",
        });
    }
    Ok(())
}

pub fn validate_full_name(value: &str) -> Result<(), ValidationError> {
    validate_length("full_name", value, 3, 100)?;
    if !full_name_pattern().is_match(value) {
        return Err(ValidationError::Format {
            field: "full_name",
            reason: "must contain only letters or spaces",
        });
    }
    Ok(())
}

pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    validate_length("email", value, 3, 200)?;
    if !email_pattern().is_match(value) {
        return Err(ValidationError::Format {
            field: "email",
            reason: "is not a valid email address",
        });
    }
    Ok(())
}
