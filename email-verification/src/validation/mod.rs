//! Claim, email and time validation shared by every token type.

mod email;
mod time;

pub use email::{MAX_DOMAIN_LENGTH, MAX_EMAIL_LENGTH, MAX_LOCAL_PART_LENGTH, validate_email};
pub use time::{
    DEFAULT_IAT_MAX_AGE, DEFAULT_IAT_MAX_FUTURE, IatWindow, now_epoch_secs, validate_iat_at,
    validate_iat_for_verification,
};

use crate::error::{EvpError, Result};

/// Unwraps a required claim, failing with [`EvpError::MissingClaim`].
///
/// # Examples
///
/// ```
/// use email_verification::validation::require;
///
/// assert_eq!(require(Some(1_700_000_000u64), "iat").unwrap(), 1_700_000_000);
/// assert!(require(None::<u64>, "iat").is_err());
/// ```
pub fn require<T>(value: Option<T>, name: &'static str) -> Result<T> {
    value.ok_or(EvpError::MissingClaim(name))
}

/// Like [`require`], but an empty string also counts as missing.
///
/// # Examples
///
/// ```
/// use email_verification::validation::require_str;
///
/// assert_eq!(require_str(Some("issuer.example"), "aud").unwrap(), "issuer.example");
/// assert!(require_str(Some(""), "nonce").is_err());
/// ```
pub fn require_str<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str> {
    value.filter(|v| !v.is_empty()).ok_or(EvpError::MissingClaim(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_present() {
        assert_eq!(require(Some(42u64), "iat").unwrap(), 42);
        assert!(require(Some(true), "email_verified").unwrap());
    }

    #[test]
    fn test_require_missing_names_claim() {
        let err = require(None::<String>, "email").unwrap_err();
        assert!(matches!(err, EvpError::MissingClaim("email")));
        assert_eq!(err.to_string(), "missing required claim: email");
    }

    #[test]
    fn test_require_str_empty_is_missing() {
        assert!(matches!(require_str(Some(""), "aud"), Err(EvpError::MissingClaim("aud"))));
        assert!(require_str(None, "aud").is_err());
    }
}
