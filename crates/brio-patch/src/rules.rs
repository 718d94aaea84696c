//! Patch rule file format

use semver::VersionReq;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while loading a patch rule file.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Rule file is not valid JSON.
    #[error("malformed patch rule file: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An `api` pattern is not a valid regex.
    #[error("invalid patch pattern `{pattern}`: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },

    /// A `userenum` key is not a plain identifier.
    #[error("user enum rename `{0}` is not an identifier")]
    BadEnumName(String),
}

/// What a rule's map rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    /// Regex replacement over source text.
    Api,
    /// Dependency-name remap.
    Package,
    /// Declaration- and usage-site enum rename.
    UserEnum,
}

/// One version-range-keyed rewrite rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRule {
    /// Range of saved-program versions the rule applies to.
    pub versions: VersionReq,
    /// Rewrite type.
    #[serde(rename = "type")]
    pub kind: PatchKind,
    /// Pattern → replacement.
    pub map: BTreeMap<String, String>,
}

impl PatchRule {
    /// Parse a rule file: a JSON list of rules.
    pub fn parse_file(text: &str) -> Result<Vec<PatchRule>, PatchError> {
        Ok(serde_json::from_str(text)?)
    }
}
