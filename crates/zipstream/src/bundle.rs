use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Store-assigned identifier for a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One remote file to include in a bundle.
///
/// `destination` is the entry name inside the archive. When it is absent
/// (or empty) the name is derived from the source URI's path at streaming
/// time; the derived name is never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    #[serde(alias = "src")]
    pub source: String,
    #[serde(default, alias = "dst", skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl FileReference {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// The explicit destination, treating an empty string as absent.
    pub fn explicit_destination(&self) -> Option<&str> {
        self.destination.as_deref().filter(|d| !d.is_empty())
    }
}

/// A persisted, named collection of file references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub id: BundleId,
    pub secret: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub files: Vec<FileReference>,
    /// Epoch seconds after which the bundle no longer exists.
    pub expiration_date: i64,
}

impl Bundle {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration_date <= now
    }
}

/// Current time as epoch seconds.
pub fn epoch_secs_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Expiration timestamp for a bundle created now with the given lifetime.
pub fn expiration_from_now(lifetime: Duration) -> i64 {
    epoch_secs_now().saturating_add(lifetime.as_secs() as i64)
}
