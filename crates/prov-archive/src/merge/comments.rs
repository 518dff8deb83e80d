//! Comment merge policy

use prov_graph::{CommentRecord, ConfigError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a stored comment is reconciled with an archived copy of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CommentMode {
    /// Keep whichever side was modified last; ties keep the stored one
    #[default]
    Newest,
    /// Always take the archived content
    Overwrite,
}

impl CommentMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentMode::Newest => "newest",
            CommentMode::Overwrite => "overwrite",
        }
    }

    /// Updated stored comment, or `None` when the stored one wins
    ///
    /// Only content and modification time are taken from the archive; the
    /// node and author of a comment never change.
    #[must_use]
    pub fn resolve(&self, stored: &CommentRecord, incoming: &CommentRecord) -> Option<CommentRecord> {
        if stored.content == incoming.content {
            return None;
        }
        let take_incoming = match self {
            CommentMode::Newest => incoming.mtime > stored.mtime,
            CommentMode::Overwrite => true,
        };
        take_incoming.then(|| CommentRecord {
            content: incoming.content.clone(),
            mtime: incoming.mtime,
            ..stored.clone()
        })
    }
}

impl fmt::Display for CommentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(CommentMode::Newest),
            "overwrite" => Ok(CommentMode::Overwrite),
            other => Err(ConfigError::invalid_mode(
                "comment_mode",
                other,
                "expected 'newest' or 'overwrite'",
            )),
        }
    }
}

impl TryFrom<String> for CommentMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CommentMode> for String {
    fn from(mode: CommentMode) -> Self {
        mode.as_str().to_string()
    }
}
