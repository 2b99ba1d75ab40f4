//! Container identifiers as reported by the runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RuntimeError;

/// A validated container ID or name.
///
/// Runtimes report either a 64-character hex ID or a user-chosen name, so the
/// accepted alphabet is the union of both:
/// - 1-128 characters long
/// - alphanumerics, `-`, `_` and `.`
/// - starts with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Maximum length of a container ID.
    pub const MAX_LENGTH: usize = 128;

    /// Length of the abbreviated form used in logs.
    pub const SHORT_LENGTH: usize = 12;

    /// Create a new container ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Decode`] if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> Result<Self, RuntimeError> {
        let id = id.into();
        if Self::is_valid(&id) {
            Ok(Self(id))
        } else {
            Err(RuntimeError::Decode {
                message: format!("invalid container id: {id:?}"),
            })
        }
    }

    /// Wrap a runtime-reported ID without validation.
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the container ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if `id` is a well-formed container ID or name.
    #[must_use]
    pub fn is_valid(id: &str) -> bool {
        if id.is_empty() || id.len() > Self::MAX_LENGTH {
            return false;
        }
        let mut chars = id.chars();
        chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }

    /// Returns a short version of the ID (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..Self::SHORT_LENGTH).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContainerId {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
