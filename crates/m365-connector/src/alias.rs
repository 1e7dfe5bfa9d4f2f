//! Mail alias derivation from display names.

use uuid::Uuid;

use crate::{ProvisionError, ProvisionResult};

/// Exchange and Graph cap aliases at 64 characters.
const MAX_ALIAS_LEN: usize = 64;
/// Length of the `-xxxx` disambiguator suffix.
const SUFFIX_LEN: usize = 5;

/// Lowercase ASCII slug of `name`, with runs of other characters replaced by `separator`.
///
/// Quotes are dropped without introducing a separator, so `"Bob's Team"`
/// becomes `bobs-team`.
#[must_use]
pub fn slugify(name: &str, separator: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push_str(separator);
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else if !matches!(c, '\'' | '"' | '\u{2019}') {
            pending_separator = true;
        }
    }

    slug
}

/// Plain alias for `name`, validated to be non-empty and truncated to fit.
///
/// # Errors
///
/// Returns `ProvisionError::Validation` if the name has no ASCII letters or digits.
pub fn base_alias(name: &str, separator: &str, reserve: usize) -> ProvisionResult<String> {
    let slug = slugify(name, separator);
    if slug.is_empty() {
        return Err(ProvisionError::Validation {
            message: format!("Name '{name}' must contain at least one letter or digit"),
            not_found: Vec::new(),
        });
    }

    let limit = MAX_ALIAS_LEN.saturating_sub(reserve);
    let mut truncated: String = slug.chars().take(limit).collect();
    while truncated.ends_with(separator) && !separator.is_empty() {
        truncated.truncate(truncated.len() - separator.len());
    }
    Ok(truncated)
}

/// Random 4 hex character disambiguator.
#[must_use]
pub fn disambiguator() -> String {
    Uuid::new_v4().simple().to_string()[..4].to_string()
}

/// One alias candidate: `slug-xxxx`.
///
/// # Errors
///
/// Returns `ProvisionError::Validation` if the name has no ASCII letters or digits.
pub fn alias_candidate(name: &str, separator: &str) -> ProvisionResult<String> {
    Ok(format!(
        "{}-{}",
        base_alias(name, separator, SUFFIX_LEN)?,
        disambiguator()
    ))
}
