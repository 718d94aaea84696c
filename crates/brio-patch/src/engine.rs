//! Patch application

use crate::rules::{PatchError, PatchKind, PatchRule};
use regex::Regex;
use semver::{Version, VersionReq};
use std::collections::BTreeMap;

/// A compiled rewrite entry.
enum Rewrite {
    Api { re: Regex, replacement: String },
    Package { from: String, to: String },
    UserEnum { decl: Regex, usage: Regex, to: String },
}

/// A compiled rule: version range plus its rewrites.
struct Compiled {
    versions: VersionReq,
    rewrites: Vec<Rewrite>,
}

/// A loaded, validated set of patch rules ready to apply.
pub struct PatchSet {
    rules: Vec<Compiled>,
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl PatchSet {
    /// Compile a list of rules, validating every pattern up front so that
    /// application itself cannot fail.
    pub fn compile(rules: &[PatchRule]) -> Result<Self, PatchError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut rewrites = Vec::with_capacity(rule.map.len());
            for (pattern, replacement) in &rule.map {
                let rewrite = match rule.kind {
                    PatchKind::Api => {
                        let re = Regex::new(pattern).map_err(|source| PatchError::BadPattern {
                            pattern: pattern.clone(),
                            source,
                        })?;
                        Rewrite::Api {
                            re,
                            replacement: replacement.clone(),
                        }
                    }
                    PatchKind::Package => Rewrite::Package {
                        from: pattern.clone(),
                        to: replacement.clone(),
                    },
                    PatchKind::UserEnum => {
                        if !is_identifier(pattern) {
                            return Err(PatchError::BadEnumName(pattern.clone()));
                        }
                        // Word-boundary-safe: a rename of `Colour` must not
                        // touch `ColourMap` or `discolour`.
                        let decl = Regex::new(&format!(r"\b(enum\s+){}\b", pattern))
                            .map_err(|source| PatchError::BadPattern {
                                pattern: pattern.clone(),
                                source,
                            })?;
                        let usage = Regex::new(&format!(r"\b{}(\s*\.)", pattern)).map_err(
                            |source| PatchError::BadPattern {
                                pattern: pattern.clone(),
                                source,
                            },
                        )?;
                        Rewrite::UserEnum {
                            decl,
                            usage,
                            to: replacement.clone(),
                        }
                    }
                };
                rewrites.push(rewrite);
            }
            compiled.push(Compiled {
                versions: rule.versions.clone(),
                rewrites,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// Load and compile a JSON rule file.
    pub fn from_json(text: &str) -> Result<Self, PatchError> {
        Self::compile(&PatchRule::parse_file(text)?)
    }

    /// Rewrite source text saved by `source_version`. Every matching range
    /// applies; `package` rules are skipped here (see
    /// [`PatchSet::apply_packages`]).
    pub fn apply(&self, source_version: &Version, text: &str) -> String {
        let mut out = text.to_string();
        for rule in self.rules.iter().filter(|r| r.versions.matches(source_version)) {
            for rewrite in &rule.rewrites {
                match rewrite {
                    Rewrite::Api { re, replacement } => {
                        out = re.replace_all(&out, replacement.as_str()).into_owned();
                    }
                    Rewrite::UserEnum { decl, usage, to } => {
                        out = decl.replace_all(&out, format!("${{1}}{}", to)).into_owned();
                        out = usage.replace_all(&out, format!("{}${{1}}", to)).into_owned();
                    }
                    Rewrite::Package { .. } => {}
                }
            }
        }
        out
    }

    /// Remap dependency names in a package's dependency table.
    pub fn apply_packages(&self, source_version: &Version, deps: &mut BTreeMap<String, String>) {
        for rule in self.rules.iter().filter(|r| r.versions.matches(source_version)) {
            for rewrite in &rule.rewrites {
                if let Rewrite::Package { from, to } = rewrite {
                    if let Some(version) = deps.remove(from) {
                        deps.insert(to.clone(), version);
                    }
                }
            }
        }
    }
}
