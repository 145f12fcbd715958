use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ContentHash;

/// Opaque identifier for exactly one immutable blob.
///
/// A `Locator` is backend-scoped and never reused for different content. For
/// content-addressed writes it is derived from an optional human-readable
/// prefix plus the payload hash (`"<prefix>-<hex>"` or bare `"<hex>"`), which
/// lets readers recover the expected hash for integrity verification without
/// a separate lookup.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    /// Derive a locator from a payload hash and an optional prefix.
    ///
    /// The prefix is purely cosmetic (it aids debugging and listing); two
    /// writes of identical payload under different prefixes produce distinct
    /// locators but identical hashes.
    pub fn derive(prefix: Option<&str>, hash: &ContentHash) -> Result<Self, TypeError> {
        match prefix {
            Some(p) => {
                validate_prefix(p)?;
                Ok(Self(format!("{p}-{}", hash.to_hex())))
            }
            None => Ok(Self(hash.to_hex())),
        }
    }

    /// Wrap an existing locator string without validation.
    ///
    /// Intended for backends reconstructing locators they issued themselves.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The expected content hash embedded in this locator, if present.
    ///
    /// Content-addressed locators end in the 64-char hex digest; locators
    /// minted by other schemes may not carry one.
    pub fn embedded_hash(&self) -> Option<ContentHash> {
        let hex_part = match self.0.rsplit_once('-') {
            Some((_, tail)) => tail,
            None => self.0.as_str(),
        };
        ContentHash::from_hex(hex_part).ok()
    }

    /// The human-readable prefix, if the locator carries one.
    pub fn prefix(&self) -> Option<&str> {
        self.0.rsplit_once('-').map(|(head, _)| head)
    }

    /// The locator as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Prefixes end up in filesystem paths and log lines, so keep them tame.
fn validate_prefix(prefix: &str) -> Result<(), TypeError> {
    if prefix.is_empty() {
        return Err(TypeError::InvalidLocator {
            reason: "prefix must not be empty".into(),
        });
    }
    let ok = prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !ok {
        return Err(TypeError::InvalidLocator {
            reason: format!("prefix contains forbidden character: {prefix:?}"),
        });
    }
    Ok(())
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full hex is noise in debug output; show prefix plus a short digest.
        match (self.prefix(), self.embedded_hash()) {
            (Some(p), Some(h)) => write!(f, "Locator({p}-{})", h.short_hex()),
            (None, Some(h)) => write!(f, "Locator({})", h.short_hex()),
            _ => write!(f, "Locator({})", self.0),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
