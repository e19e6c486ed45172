//! Language pair negotiated by the first message of a session.

use crate::error::{Result, TransteekError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source and target language tags, e.g. `en-US` and `fr-FR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    /// Build a pair from two tags, validating both.
    pub fn new(source: &str, target: &str) -> Result<Self> {
        Ok(Self {
            source: validate_tag("source", source)?,
            target: validate_tag("target", target)?,
        })
    }

    /// Parse the configuration message `"<source>,<target>"`.
    ///
    /// Exactly two comma-separated tags are accepted. Surrounding
    /// whitespace is ignored.
    pub fn parse(message: &str) -> Result<Self> {
        let parts: Vec<&str> = message.split(',').collect();
        match parts.as_slice() {
            [source, target] => Self::new(source, target),
            [_] => Err(TransteekError::configuration(format!(
                "expected \"<source>,<target>\", got {:?}",
                truncate(message)
            ))),
            _ => Err(TransteekError::configuration(format!(
                "expected exactly two language tags, got {}",
                parts.len()
            ))),
        }
    }

    /// Primary subtag of the target, used as the translation target
    /// ("fr-FR" → "fr").
    pub fn target_code(&self) -> &str {
        primary_subtag(&self.target)
    }

    /// Synthesis voice for the target language ("fr-FR" + "Standard-A").
    pub fn voice_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.target, suffix)
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.source, self.target)
    }
}

fn primary_subtag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

fn validate_tag(role: &str, raw: &str) -> Result<String> {
    let tag = raw.trim();
    if tag.is_empty() {
        return Err(TransteekError::configuration(format!(
            "{role} language tag is empty"
        )));
    }
    let well_formed = tag
        .split('-')
        .all(|part| !part.is_empty() && part.len() <= 8 && part.chars().all(|c| c.is_ascii_alphanumeric()));
    if !well_formed {
        return Err(TransteekError::configuration(format!(
            "{role} language tag {:?} is not a valid tag",
            truncate(tag)
        )));
    }
    Ok(tag.to_string())
}

/// Keep client-provided text short in error messages.
fn truncate(text: &str) -> String {
    const MAX: usize = 40;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    }
}
