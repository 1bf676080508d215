// ABOUTME: Opaque references produced by the source and build collaborators.
// ABOUTME: ArtifactRef names a deployable task spec; Revision names a source commit.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    #[error("{kind} cannot contain whitespace or control characters: {value:?}")]
    InvalidChar { kind: &'static str, value: String },
}

fn validate(kind: &'static str, value: &str) -> Result<String, ReferenceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ReferenceError::Empty { kind });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ReferenceError::InvalidChar {
            kind,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Reference to a deployable artifact (the task spec a replica runs).
///
/// Typically an image reference such as `registry/app:3f2a9c1`; the
/// orchestrator never interprets it beyond handing it to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn parse(value: &str) -> Result<Self, ReferenceError> {
        validate("artifact reference", value).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtifactRef> for String {
    fn from(value: ArtifactRef) -> Self {
        value.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source revision (commit SHA, tag, or branch head) a pipeline run builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision(String);

impl Revision {
    pub fn parse(value: &str) -> Result<Self, ReferenceError> {
        validate("revision", value).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl TryFrom<String> for Revision {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Revision> for String {
    fn from(value: Revision) -> Self {
        value.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_trims_and_keeps_value() {
        let a = ArtifactRef::parse("  registry/app:abc  ").unwrap();
        assert_eq!(a.as_str(), "registry/app:abc");
    }

    #[test]
    fn artifact_rejects_empty_and_spaces() {
        assert!(matches!(
            ArtifactRef::parse("   "),
            Err(ReferenceError::Empty { .. })
        ));
        assert!(matches!(
            ArtifactRef::parse("app one"),
            Err(ReferenceError::InvalidChar { .. })
        ));
    }

    #[test]
    fn revision_short_form() {
        let r = Revision::parse("3f2a9c1d0e4b5a6f7788").unwrap();
        assert_eq!(r.short(), "3f2a9c1d0e4b");
        let tag = Revision::parse("v1").unwrap();
        assert_eq!(tag.short(), "v1");
    }
}
