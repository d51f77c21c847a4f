mod types;

#[cfg(test)]
mod tests;

pub use types::{RuleKey, RulePredicate, ThresholdRule};

use crate::events::Event;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThresholdConfigError {
    #[error("threshold config {path} is not valid JSON: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: simd_json::Error,
    },
    #[error("threshold config {path} must be a JSON object keyed by rule name")]
    NotAnObject { path: PathBuf },
}

/// Immutable rule set bound at load time. Evaluation never looks at config keys again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdRules {
    rules: Vec<ThresholdRule>,
}

impl ThresholdRules {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Builds the rule set from a parsed document, skipping comment keys (`_`-prefixed),
    /// non-object values, unknown rule names and malformed bounds.
    pub fn from_document(document: &serde_json::Map<String, JsonValue>) -> Self {
        let mut rules = Vec::new();
        for (config_key, entry) in document {
            if config_key.starts_with('_') || !entry.is_object() {
                tracing::debug!(key = %config_key, "skipping non-rule threshold entry");
                continue;
            }
            let Some(key) = RuleKey::from_config_key(config_key) else {
                tracing::warn!(key = %config_key, "ignoring threshold rule with unknown name");
                continue;
            };
            match types::parse_predicate(entry) {
                Ok(Some(predicate)) => rules.push(ThresholdRule::new(key, predicate)),
                Ok(None) => {
                    tracing::warn!(key = %config_key, "threshold rule names no predicate; ignoring");
                }
                Err(reason) => {
                    tracing::warn!(key = %config_key, %reason, "ignoring malformed threshold rule");
                }
            }
        }
        Self { rules }
    }

    pub fn from_slice(path: &Path, bytes: &mut [u8]) -> Result<Self, ThresholdConfigError> {
        let document: JsonValue =
            simd_json::serde::from_slice(bytes).map_err(|source| ThresholdConfigError::Syntax {
                path: path.to_path_buf(),
                source,
            })?;
        let JsonValue::Object(document) = document else {
            return Err(ThresholdConfigError::NotAnObject {
                path: path.to_path_buf(),
            });
        };
        Ok(Self::from_document(&document))
    }

    /// Loads the rule file. A file that cannot be read leaves the run with no rules;
    /// a file that is not a valid document aborts it.
    pub fn load(path: &Path) -> Result<Self, ThresholdConfigError> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "threshold config not found; no events will be flagged"
                );
                return Ok(Self::empty());
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read threshold config; no events will be flagged"
                );
                return Ok(Self::empty());
            }
        };
        let mut bytes = contents;
        let rules = Self::from_slice(path, &mut bytes)?;
        for rule in rules.rules() {
            tracing::debug!(rule = rule.key.config_key(), predicate = ?rule.predicate, "threshold rule");
        }
        tracing::info!(
            path = %path.display(),
            rules = rules.rules.len(),
            "loaded threshold rules"
        );
        Ok(rules)
    }

    pub fn is_error(&self, event: &Event) -> bool {
        let Some(value) = event.value else {
            return false;
        };
        self.rules.iter().any(|rule| {
            event.is(rule.parameter_name, &rule.event_name) && rule.predicate.violates(value)
        })
    }
}
