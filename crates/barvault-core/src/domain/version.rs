use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_TAG_LEN: usize = 64;

/// Version label identifying a point-in-time state of a series.
///
/// `Latest` is the only mutable tag; named tags are immutable once sealed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionTag {
    Latest,
    Named(String),
}

impl VersionTag {
    pub const LATEST: &'static str = "latest";

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyVersionTag);
        }
        if trimmed.eq_ignore_ascii_case(Self::LATEST) {
            return Ok(Self::Latest);
        }

        let normalized = trimmed.to_ascii_lowercase();
        let len = normalized.chars().count();
        if len > MAX_TAG_LEN {
            return Err(ValidationError::VersionTagTooLong {
                len,
                max: MAX_TAG_LEN,
            });
        }
        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_';
            if !valid {
                return Err(ValidationError::VersionTagInvalidChar { ch, index });
            }
        }

        Ok(Self::Named(normalized))
    }

    /// Parse a tag that must be a named (sealed) tag, never `latest`.
    pub fn parse_named(input: &str) -> Result<Self, ValidationError> {
        match Self::parse(input)? {
            Self::Latest => Err(ValidationError::ReservedVersionTag),
            named => Ok(named),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Latest => Self::LATEST,
            Self::Named(name) => name,
        }
    }

    pub const fn is_latest(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl Display for VersionTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for VersionTag {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionTag> for String {
    fn from(value: VersionTag) -> Self {
        value.as_str().to_owned()
    }
}

/// Identifier of the vendor/source a point was ingested from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySourceId);
        }

        let normalized = trimmed.to_ascii_lowercase();
        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || ch == '_' || ch == '-';
            if !valid {
                return Err(ValidationError::SourceIdInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SourceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for SourceId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0
    }
}
