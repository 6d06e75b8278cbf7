//! Canonical name derivation for target principals.

use serde::{Deserialize, Serialize};

use crate::error::{IdSyncError, Result};

/// One ordered `from -> to` replacement applied during canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementPair {
    pub from: String,
    pub to: String,
}

/// Derive a target-side name from a raw source identity.
///
/// Every pair is applied in order, replacing all occurrences; later pairs
/// may intentionally catch residue of earlier ones (strip a domain suffix
/// first, then map the remaining `@`). The result is lowercased. An empty
/// result is rejected.
pub fn canonicalize(raw: &str, rules: &[ReplacementPair]) -> Result<String> {
    let mut name = raw.to_string();
    for rule in rules {
        name = name.replace(&rule.from, &rule.to);
    }
    let name = name.to_lowercase();
    if name.is_empty() {
        return Err(IdSyncError::InvalidName(raw.to_string()));
    }
    Ok(name)
}
