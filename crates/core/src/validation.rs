//! Field-level validation for user-supplied input.
//!
//! Validators are pure functions returning a human-readable description on
//! failure. Request handlers collect them into [`FieldViolation`]s so a single
//! response can report every bad field at once.

use serde::Serialize;

/// One rejected request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub description: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            description: description.into(),
        }
    }
}

/// Accumulates violations for a request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Violations(Vec<FieldViolation>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a validator under `field`.
    pub fn check(&mut self, field: &str, outcome: Result<(), String>) {
        if let Err(description) = outcome {
            self.0.push(FieldViolation::new(field, description));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), Vec<FieldViolation>> {
        if self.0.is_empty() { Ok(()) } else { Err(self.0) }
    }
}

pub fn validate_length(value: &str, min: usize, max: usize) -> Result<(), String> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(format!("length must be between {min} and {max}"));
    }
    Ok(())
}

/// 3..=100 characters of lowercase letters, digits and underscores.
pub fn validate_username(value: &str) -> Result<(), String> {
    validate_length(value, 3, 100)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("must contain only lowercase letters, digits or underscores".to_string());
    }
    Ok(())
}

pub fn validate_password(value: &str) -> Result<(), String> {
    validate_length(value, 6, 100)
}

/// 3..=100 characters of letters and spaces.
pub fn validate_full_name(value: &str) -> Result<(), String> {
    validate_length(value, 3, 100)?;
    if !value.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Err("must contain only letters or spaces".to_string());
    }
    Ok(())
}

pub fn validate_email(value: &str) -> Result<(), String> {
    validate_length(value, 6, 100)?;

    let invalid = || "invalid email address".to_string();
    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') || value.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}
