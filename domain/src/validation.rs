//! Validation of user-supplied domain values.
//!
//! These checks run inside commands before any event is emitted and produce
//! structured errors with stable codes.

use garrison_core::{Error, Result};

const MAX_DOMAIN_LEN: usize = 253;
const MAX_ORG_NAME_LEN: usize = 200;

/// Validate a DNS domain name.
///
/// Accepts ASCII letters, digits, `-` and label-separating dots. Everything
/// else is rejected: empty input, apostrophes, non-ASCII letters (umlauts
/// and the like), emoji, whitespace.
///
/// # Errors
///
/// `InvalidArgument` with code `DOMAIN-invalid` (or `DOMAIN-too-long`).
///
/// # Examples
///
/// ```
/// use garrison_domain::validation::validate_domain_name;
///
/// assert!(validate_domain_name("login.example.com").is_ok());
/// assert!(validate_domain_name("o'neill.example").is_err());
/// assert!(validate_domain_name("münchen.example").is_err());
/// assert!(validate_domain_name("🦀.example").is_err());
/// ```
pub fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::invalid_argument(
            "DOMAIN-invalid",
            "domain name must not be empty",
        ));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(Error::invalid_argument(
            "DOMAIN-too-long",
            format!("domain name exceeds {MAX_DOMAIN_LEN} characters"),
        ));
    }
    for label in domain.split('.') {
        let valid = !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(Error::invalid_argument(
                "DOMAIN-invalid",
                format!("domain name {domain:?} contains an invalid label"),
            ));
        }
    }
    Ok(())
}

/// Normalise and validate an organisation name: surrounding whitespace is
/// trimmed, the trimmed result must be non-empty and within length bounds.
///
/// # Errors
///
/// `InvalidArgument` with code `ORG-name-empty` or `ORG-name-too-long`.
pub fn normalize_org_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_argument(
            "ORG-name-empty",
            "org name must not be empty",
        ));
    }
    if trimmed.len() > MAX_ORG_NAME_LEN {
        return Err(Error::invalid_argument(
            "ORG-name-too-long",
            format!("org name exceeds {MAX_ORG_NAME_LEN} characters"),
        ));
    }
    Ok(trimmed.to_owned())
}
