// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Input validation.
//!
//! Every domain name and identifier that ends up in a filesystem path, an SQL
//! statement, or an argument to an external command passes through here
//! first. Nothing in this module has side effects.

use regex::Regex;
use std::{collections::HashSet, sync::LazyLock};

/// Longest domain name allowed by DNS.
pub const MAX_DOMAIN_LEN: usize = 253;

/// Longest database name or OS username we accept.
pub const MAX_IDENTIFIER_LEN: usize = 64;

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
        .expect("domain pattern is valid")
});

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]{0,63}$").expect("identifier pattern is valid"));

/// Trim and lower-case a domain name.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase()
}

/// Check that a single domain name is well formed.
///
/// Each dot-separated label must start and end with an alphanumeric
/// character, may contain hyphens in between, and is at most 63 characters
/// long. The final label must be at least two letters.
pub fn validate_domain(domain: &str) -> bool {
    let domain = normalize_domain(domain);
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return false;
    }

    DOMAIN_PATTERN.is_match(&domain)
}

/// Check a primary domain together with its aliases.
///
/// Stops at the first invalid or duplicated name. Duplicates are detected
/// case-insensitively, and an alias equal to the primary domain counts as a
/// duplicate.
pub fn validate_domains(primary: &str, aliases: &[impl AsRef<str>]) -> (bool, String) {
    match ensure_domains(primary, aliases) {
        Ok(()) => (true, String::new()),
        Err(error) => (false, error.to_string()),
    }
}

/// Same as [`validate_domains`], but report failure as an error.
///
/// # Errors
///
/// - Return [`ValidationError::PrimaryDomain`] if primary domain is invalid.
/// - Return [`ValidationError::Alias`] if any alias is invalid.
/// - Return [`ValidationError::DuplicateDomain`] if a name repeats.
pub fn ensure_domains(primary: &str, aliases: &[impl AsRef<str>]) -> Result<()> {
    if !validate_domain(primary) {
        return Err(ValidationError::PrimaryDomain(primary.to_string()));
    }

    let mut seen = HashSet::from([normalize_domain(primary)]);
    for alias in aliases {
        let alias = alias.as_ref();
        if !validate_domain(alias) {
            return Err(ValidationError::Alias(alias.to_string()));
        }

        if !seen.insert(normalize_domain(alias)) {
            return Err(ValidationError::DuplicateDomain(alias.to_string()));
        }
    }

    Ok(())
}

/// Check that a name is safe to use as a database name or OS username.
pub fn validate_identifier(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER_PATTERN.is_match(name)
}

/// Same as [`validate_identifier`], but report failure as an error.
///
/// # Errors
///
/// - Return [`ValidationError::Identifier`] if name is invalid.
pub fn ensure_identifier(name: &str, kind: &'static str) -> Result<()> {
    if !validate_identifier(name) {
        return Err(ValidationError::Identifier {
            kind,
            name: name.to_string(),
        });
    }

    Ok(())
}

/// Validation error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Primary domain is malformed.
    #[error("invalid primary domain: {0}")]
    PrimaryDomain(String),

    /// Alias domain is malformed.
    #[error("invalid alias: {0}")]
    Alias(String),

    /// Same domain was given more than once.
    #[error("duplicate domain: {0}")]
    DuplicateDomain(String),

    /// Database name or username is malformed.
    #[error("invalid {kind}: {name}")]
    Identifier { kind: &'static str, name: String },
}

/// Friendly result alias :3
type Result<T, E = ValidationError> = std::result::Result<T, E>;
