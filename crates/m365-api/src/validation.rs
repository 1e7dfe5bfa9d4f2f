//! Field validators shared by request models and handlers.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use validator::ValidationError;

use crate::error::ApiError;

/// Visibility values accepted for new sites.
pub const SITE_PRIVACY_VALUES: &[&str] = &["Private", "Public"];

/// Characters accepted in a distribution list identifier.
/// The pattern is a constant, so a failure here is a programming error.
static DL_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-._@=, ]+$").expect("DL_ID_REGEX is a valid regex pattern")
});

/// User principal names have the shape of an email address.
static UPN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$")
        .expect("UPN_REGEX is a valid regex pattern")
});

/// Checks a distribution list path identifier.
///
/// # Errors
///
/// `BadRequest` when the identifier is empty or has unexpected characters.
pub fn validate_dl_id(dl_id: &str) -> Result<(), ApiError> {
    if DL_ID_REGEX.is_match(dl_id) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Invalid distribution list id '{dl_id}'"
        )))
    }
}

#[must_use]
pub fn is_valid_upn(upn: &str) -> bool {
    upn.len() <= 255 && UPN_REGEX.is_match(upn)
}

pub(crate) fn validate_upn(upn: &str) -> Result<(), ValidationError> {
    if is_valid_upn(upn) {
        Ok(())
    } else {
        let mut error = ValidationError::new("upn");
        error.message = Some(Cow::Owned(format!("'{upn}' is not a valid user principal name")));
        Err(error)
    }
}

pub(crate) fn validate_upns(upns: &[String]) -> Result<(), ValidationError> {
    upns.iter().try_for_each(|upn| validate_upn(upn))
}

pub(crate) fn validate_privacy(privacy: &str) -> Result<(), ValidationError> {
    if SITE_PRIVACY_VALUES.contains(&privacy) {
        Ok(())
    } else {
        let mut error = ValidationError::new("privacy");
        error.message = Some(Cow::Borrowed("privacy must be 'Private' or 'Public'"));
        Err(error)
    }
}
