//! Input validation for lead emails.

use std::fmt;

/// Why an input was rejected before reaching SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidEmail(String),
    TooLong { field: String, max: usize, actual: usize },
    Empty(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidEmail(reason) => write!(f, "unusable lead email: {}", reason),
            ValidationError::TooLong { field, max, actual } => {
                write!(f, "{} has {} chars, limit is {}", field, actual, max)
            }
            ValidationError::Empty(field) => write!(f, "{} is required", field),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Longest address the store accepts (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Canonical form of a lead email: trimmed and lowercased.
///
/// Every table is keyed by this form, so a vendor record spelled
/// `Info@Madelines.CO` and a local row `info@madelines.co` are the same lead.
pub fn normalize_email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::Empty("email".to_string()));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong {
            field: "email".to_string(),
            max: MAX_EMAIL_LENGTH,
            actual: email.len(),
        });
    }

    let invalid = |reason: &str| Err(ValidationError::InvalidEmail(reason.to_string()));

    if email.chars().any(char::is_whitespace) {
        return invalid("contains whitespace");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return invalid("no @");
    };
    if domain.contains('@') {
        return invalid("more than one @");
    }
    if local.is_empty() || domain.is_empty() {
        return invalid("empty mailbox or domain");
    }
    // Every label of the domain must be non-empty, and there must be two or more
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return invalid("domain is not a dotted host name");
    }

    Ok(email.to_lowercase())
}

/// Domain part of an email, or `"unknown"` when there is none.
pub fn email_domain(email: &str) -> String {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|domain| !domain.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
