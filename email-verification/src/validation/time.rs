//! Issued-at window checks.
//!
//! None of the protocol's tokens carry `exp`. Their lifetime is bounded by
//! `iat` alone: a token older than [`IatWindow::max_age`] or dated further
//! in the future than [`IatWindow::max_future`] is rejected with
//! [`EvpError::TimeValidation`].

use std::time::{Duration, SystemTime};

use crate::error::{EvpError, Result};

/// Default maximum token age.
pub const DEFAULT_IAT_MAX_AGE: Duration = Duration::from_secs(60);

/// Default tolerance for tokens dated in the future (clock skew).
pub const DEFAULT_IAT_MAX_FUTURE: Duration = Duration::from_secs(60);

/// Accepted range of `iat` relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IatWindow {
    /// Tokens issued longer ago than this are stale.
    pub max_age: Duration,
    /// Tokens issued further in the future than this are rejected.
    pub max_future: Duration,
}

impl Default for IatWindow {
    fn default() -> Self {
        Self { max_age: DEFAULT_IAT_MAX_AGE, max_future: DEFAULT_IAT_MAX_FUTURE }
    }
}

/// Returns the current Unix time in seconds.
///
/// # Errors
///
/// Returns [`EvpError::TimeValidation`] if the system clock is set before
/// the Unix epoch.
pub fn now_epoch_secs() -> Result<u64> {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| EvpError::TimeValidation("system clock is before the Unix epoch".into()))
}

/// Validates `iat` against the default window and the current clock.
///
/// # Errors
///
/// Returns [`EvpError::TimeValidation`] if `iat` is outside the window.
pub fn validate_iat_for_verification(iat: u64) -> Result<()> {
    validate_iat_at(iat, now_epoch_secs()?, IatWindow::default())
}

/// Validates `iat` against `window` at a fixed `now`.
///
/// # Errors
///
/// Returns [`EvpError::TimeValidation`] if `iat` is older than
/// `window.max_age` or newer than `now + window.max_future`.
///
/// # Examples
///
/// ```
/// use email_verification::validation::{IatWindow, validate_iat_at};
///
/// let now = 1_700_000_000;
/// let window = IatWindow::default();
///
/// assert!(validate_iat_at(now - 30, now, window).is_ok());
/// assert!(validate_iat_at(now - 120, now, window).is_err());
/// assert!(validate_iat_at(now + 120, now, window).is_err());
/// ```
pub fn validate_iat_at(iat: u64, now: u64, window: IatWindow) -> Result<()> {
    if iat > now {
        let ahead = iat - now;
        if ahead > window.max_future.as_secs() {
            return Err(EvpError::TimeValidation(format!(
                "iat is {ahead}s in the future (max {}s)",
                window.max_future.as_secs()
            )));
        }
    } else {
        let age = now - iat;
        if age > window.max_age.as_secs() {
            return Err(EvpError::TimeValidation(format!(
                "token is {age}s old (max {}s)",
                window.max_age.as_secs()
            )));
        }
    }
    Ok(())
}
