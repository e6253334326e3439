//! Buyer email normalization.
//!
//! Accounts are keyed by email compared case-insensitively after trimming.
//! The display form keeps the buyer's original casing.

use crate::Error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A trimmed, validated email address with a lowercase comparison key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedEmail {
    display: String,
    key: String,
}

impl NormalizedEmail {
    /// Normalizes a raw email.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEmail`] if the input has no `@`, an empty
    /// local part, an empty domain, or contains whitespace.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let display = raw.trim();
        let Some((local, domain)) = display.rsplit_once('@') else {
            return Err(Error::InvalidEmail(format!("missing '@' in {display:?}")));
        };
        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidEmail(format!("incomplete address {display:?}")));
        }
        if display.chars().any(char::is_whitespace) {
            return Err(Error::InvalidEmail(format!("whitespace in {display:?}")));
        }
        Ok(Self {
            display: display.to_string(),
            key: display.to_lowercase(),
        })
    }

    /// Returns the email as the buyer typed it (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Returns the lowercase comparison key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the part before the last `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.display
            .rsplit_once('@')
            .map_or(self.display.as_str(), |(local, _)| local)
    }

    /// SHA-256 hex digest of the comparison key.
    ///
    /// Used to index pending tokens without storing the address itself.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for NormalizedEmail {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for NormalizedEmail {}

impl std::hash::Hash for NormalizedEmail {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for NormalizedEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl TryFrom<String> for NormalizedEmail {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NormalizedEmail> for String {
    fn from(value: NormalizedEmail) -> Self {
        value.display
    }
}
