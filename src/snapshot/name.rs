//! Snapshot identity: `<file system>@<RFC 3339 UTC timestamp>`.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing or decoding a [`Name`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NameError {
    /// The file system part is empty or contains `@`.
    #[error("invalid file system name: {0:?}")]
    InvalidFileSystem(String),
    /// The text is not a managed snapshot name.
    #[error("invalid snapshot name: {0:?}")]
    Malformed(String),
    /// A JSON record could not be encoded or decoded.
    #[error("snapshot name JSON: {0}")]
    Json(String),
}

/// Identity of a managed snapshot.
///
/// The canonical text form is the file system, an `@`, and the creation
/// instant in RFC 3339 with nanosecond precision, trailing fractional zeros
/// trimmed and a `Z` zone. Snapshots whose suffix does not parse as such a
/// timestamp are not managed by this tool.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Name {
    file_system: String,
    #[serde(with = "timestamp")]
    timestamp: DateTime<Utc>,
}

impl Name {
    /// Creates a name for `file_system` at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::InvalidFileSystem`] when the file system is empty
    /// or contains `@`.
    pub fn new(file_system: impl Into<String>, timestamp: DateTime<Utc>) -> Result<Self, NameError> {
        let owned = file_system.into();
        check_file_system(&owned)?;
        Ok(Self {
            file_system: owned,
            timestamp,
        })
    }

    /// Parses the canonical text form.
    ///
    /// Returns `None` for anything that is not a managed snapshot name:
    /// no `@` or more than one, an empty file system, or a suffix that is not
    /// a timestamp in canonical form. Other RFC 3339 spellings of an instant
    /// (offsets, padded fractions, lowercase separators) are foreign, so
    /// formatting a parsed name always reproduces the input.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('@');
        let (Some(file_system), Some(stamp), None) = (parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if file_system.is_empty() {
            return None;
        }
        let timestamp = parse_timestamp(stamp)?;
        Some(Self {
            file_system: file_system.to_owned(),
            timestamp,
        })
    }

    /// File system the snapshot belongs to.
    #[must_use]
    pub fn file_system(&self) -> &str {
        &self.file_system
    }

    /// Creation instant.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Encodes the name as one JSON line, newline included.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Json`] when serialisation fails.
    pub fn to_json_line(&self) -> Result<String, NameError> {
        let mut line = serde_json::to_string(self).map_err(|err| NameError::Json(err.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    /// Writes the name as one JSON line to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Json`] when serialisation or the write fails.
    pub fn write_json_line<W: Write>(&self, mut writer: W) -> Result<(), NameError> {
        serde_json::to_writer(&mut writer, self).map_err(|err| NameError::Json(err.to_string()))?;
        writer
            .write_all(b"\n")
            .map_err(|err| NameError::Json(err.to_string()))
    }

    /// Decodes one JSON record produced by [`Name::to_json_line`].
    ///
    /// Surrounding whitespace, including the trailing newline, is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::Json`] for malformed JSON or timestamps and
    /// [`NameError::InvalidFileSystem`] when the decoded file system is
    /// empty or contains `@`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, NameError> {
        let name: Self =
            serde_json::from_slice(bytes).map_err(|err| NameError::Json(err.to_string()))?;
        check_file_system(&name.file_system)?;
        Ok(name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.file_system, format_timestamp(&self.timestamp))
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| NameError::Malformed(s.to_owned()))
    }
}

fn check_file_system(file_system: &str) -> Result<(), NameError> {
    if file_system.is_empty() || file_system.contains('@') {
        return Err(NameError::InvalidFileSystem(file_system.to_owned()));
    }
    Ok(())
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    let mut text = timestamp.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = timestamp.timestamp_subsec_nanos();
    if nanos > 0 {
        let fraction = format!("{nanos:09}");
        text.push('.');
        text.push_str(fraction.trim_end_matches('0'));
    }
    text.push('Z');
    text
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
        .filter(|timestamp| format_timestamp(timestamp) == text)
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(super) fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {text:?}")))
    }
}
