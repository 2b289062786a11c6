//! Domain types shared by the scheduler and the channel adapters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A broadcast target (group or channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: i64,
    #[serde(alias = "title", default)]
    pub display_name: String,
}

impl Destination {
    pub fn new(id: i64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.display_name, self.id)
        }
    }
}

/// Kind of media attached to a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Gif,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Gif => write!(f, "gif"),
        }
    }
}

/// Content of one campaign, as sent to every destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPayload {
    TextOnly(String),
    Media {
        caption: String,
        kind: MediaKind,
        path: PathBuf,
    },
}

impl ContentPayload {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPayload::TextOnly(text.into())
    }

    pub fn media(caption: impl Into<String>, kind: MediaKind, path: impl Into<PathBuf>) -> Self {
        ContentPayload::Media {
            caption: caption.into(),
            kind,
            path: path.into(),
        }
    }

    /// A payload with no media and blank text cannot be sent.
    pub fn is_deliverable(&self) -> bool {
        match self {
            ContentPayload::TextOnly(text) => !text.trim().is_empty(),
            ContentPayload::Media { .. } => true,
        }
    }

    /// Text body or caption.
    pub fn text_body(&self) -> &str {
        match self {
            ContentPayload::TextOnly(text) => text,
            ContentPayload::Media { caption, .. } => caption,
        }
    }
}
