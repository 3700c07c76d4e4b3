//! Email address validation.
//!
//! Applies RFC 5321 length limits and a deny-list of content that indicates
//! an injection attempt. Addresses end up in HTML pages, log lines and
//! cache keys downstream, so anything that could break out of those
//! contexts is rejected here.

use crate::error::{EvpError, Result};

/// Maximum length of a full address (RFC 5321 §4.5.3.1.3).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Maximum length of the local part (RFC 5321 §4.5.3.1.1).
pub const MAX_LOCAL_PART_LENGTH: usize = 64;

/// Maximum length of the domain (RFC 5321 §4.5.3.1.2).
pub const MAX_DOMAIN_LENGTH: usize = 253;

/// Case-insensitive substrings that are never valid in an address.
const FORBIDDEN_SEQUENCES: &[(&str, &str)] = &[
    ("<", "HTML tag"),
    (">", "HTML tag"),
    ("../", "path traversal"),
    ("..\\", "path traversal"),
    ("javascript:", "script URI scheme"),
    ("data:", "script URI scheme"),
    ("vbscript:", "script URI scheme"),
    ("%", "percent-encoding"),
];

/// Validates an email address for syntax and injection content.
///
/// # Errors
///
/// Returns [`EvpError::EmailValidation`] naming the first rule violated.
///
/// # Examples
///
/// ```
/// use email_verification::validation::validate_email;
///
/// assert!(validate_email("user@example.com").is_ok());
/// assert!(validate_email("<script>@example.com").is_err());
/// assert!(validate_email("user@localhost").is_err());
/// ```
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(EvpError::EmailValidation("email cannot be empty".into()));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(EvpError::EmailValidation(format!(
            "email must be {MAX_EMAIL_LENGTH} characters or less"
        )));
    }

    // Control characters first so CR/LF/NUL get a precise message
    if email.contains(['\r', '\n']) {
        return Err(EvpError::EmailValidation("email contains a line break".into()));
    }
    if email.contains('\0') {
        return Err(EvpError::EmailValidation("email contains a null byte".into()));
    }
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(EvpError::EmailValidation("email contains whitespace".into()));
    }

    let lower = email.to_ascii_lowercase();
    if let Some((_, reason)) = FORBIDDEN_SEQUENCES.iter().find(|(seq, _)| lower.contains(seq)) {
        return Err(EvpError::EmailValidation(format!("email contains {reason}")));
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(EvpError::EmailValidation("email must contain exactly one '@'".into()));
    };

    if local.is_empty() {
        return Err(EvpError::EmailValidation("local part cannot be empty".into()));
    }
    if local.len() > MAX_LOCAL_PART_LENGTH {
        return Err(EvpError::EmailValidation(format!(
            "local part must be {MAX_LOCAL_PART_LENGTH} characters or less"
        )));
    }

    validate_domain(domain)
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(EvpError::EmailValidation("domain cannot be empty".into()));
    }
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(EvpError::EmailValidation(format!(
            "domain must be {MAX_DOMAIN_LENGTH} characters or less"
        )));
    }
    if !domain.contains('.') {
        return Err(EvpError::EmailValidation("domain must contain a dot".into()));
    }
    if domain.split('.').any(str::is_empty) {
        return Err(EvpError::EmailValidation("domain contains an empty label".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        for email in [
            "user@example.com",
            "first.last@sub.example.co.uk",
            "user+tag@example.org",
            "a@b.io",
        ] {
            assert!(validate_email(email).is_ok(), "{email} should be valid");
        }
    }

    #[test]
    fn test_length_limits() {
        let local = "a".repeat(MAX_LOCAL_PART_LENGTH);
        assert!(validate_email(&format!("{local}@example.com")).is_ok());

        let local = "a".repeat(MAX_LOCAL_PART_LENGTH + 1);
        assert!(validate_email(&format!("{local}@example.com")).is_err());

        // 64 + 1 + 190 = 255 total
        let domain = format!("{}.com", "d".repeat(186));
        let email = format!("{}@{domain}", "a".repeat(64));
        assert_eq!(email.len(), 255);
        let err = validate_email(&email).unwrap_err();
        assert!(err.to_string().contains("254"));
    }

    #[test]
    fn test_rejects_structural_errors() {
        for email in ["", "userexample.com", "a@b@example.com", "@example.com", "user@", "user@com"]
        {
            assert!(
                matches!(validate_email(email), Err(EvpError::EmailValidation(_))),
                "{email:?} should be rejected"
            );
        }
        assert!(validate_email("user@example..com").is_err());
        assert!(validate_email("user@.example.com").is_err());
    }

    #[test]
    fn test_rejects_injection_content() {
        for email in [
            "<script>alert(1)</script>@example.com",
            "user>@example.com",
            "user\r\n@example.com",
            "user\n@example.com",
            "user\0@example.com",
            "../../etc/passwd@example.com",
            "..\\windows@example.com",
            "javascript:alert(1)@example.com",
            "JavaScript:x@example.com",
            "data:text@example.com",
            "VBScript:x@example.com",
            "user%40@example.com",
            "us er@example.com",
            "user\t@example.com",
        ] {
            assert!(
                matches!(validate_email(email), Err(EvpError::EmailValidation(_))),
                "{email:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_error_names_the_reason() {
        let err = validate_email("user\0@example.com").unwrap_err();
        assert!(err.to_string().contains("null byte"));

        let err = validate_email("javascript:x@example.com").unwrap_err();
        assert!(err.to_string().contains("script URI scheme"));
    }
}
