//! SQL identifiers that are safe to splice into generated DDL.
//!
//! Trigger bodies, function names and audit table names are rendered from
//! the configured table name, so every name that reaches a SQL template
//! goes through [`Identifier::new`] first. Only ASCII letters, digits and
//! underscores are accepted, and the first character may not be a digit.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// PostgreSQL truncates identifiers beyond 63 bytes and MySQL rejects
/// names beyond 64, so the stricter limit applies to both.
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier '{0}' is longer than {MAX_IDENTIFIER_LEN} bytes")]
    TooLong(String),

    #[error("identifier '{0}' must not start with a digit")]
    LeadingDigit(String),

    #[error("identifier '{name}' contains invalid character {ch:?}")]
    InvalidCharacter { name: String, ch: char },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong(name));
        }
        if let Some(ch) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(IdentifierError::InvalidCharacter { name, ch });
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(IdentifierError::LeadingDigit(name));
        }
        Ok(Self(name))
    }

    /// Build a related object name such as `notify_<table>_changes`.
    /// The result is validated again, which catches length overflow.
    pub fn derive(&self, prefix: &str, suffix: &str) -> Result<Self, IdentifierError> {
        Self::new(format!("{prefix}{}{suffix}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
