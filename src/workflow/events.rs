//! Typed events exchanged between steps.
//!
//! An event is an immutable value; its [`EventKind`] alone decides routing.
//! Steps receive owned clones, so no step can observe a partially built event.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Routing key of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Caller-submitted start of a run.
    Start,
    /// Document identity recorded; fans out to both extractors.
    DocumentReady,
    PrimaryExtracted,
    SecondaryExtracted,
    Compared,
    /// Terminal: the run completes when this kind is emitted.
    Classified,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::DocumentReady => "document_ready",
            Self::PrimaryExtracted => "primary_extracted",
            Self::SecondaryExtracted => "secondary_extracted",
            Self::Compared => "compared",
            Self::Classified => "classified",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads of the invoice pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Start { file_path: PathBuf, file_name: String },
    DocumentReady { file_path: PathBuf, file_name: String },
    PrimaryExtracted { text: String },
    SecondaryExtracted { text: String },
    Compared { merged_text: String, similarity: f64 },
    Classified { report: String },
}

impl Event {
    pub fn start(file_path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self::Start {
            file_path: file_path.into(),
            file_name: file_name.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Start { .. } => EventKind::Start,
            Self::DocumentReady { .. } => EventKind::DocumentReady,
            Self::PrimaryExtracted { .. } => EventKind::PrimaryExtracted,
            Self::SecondaryExtracted { .. } => EventKind::SecondaryExtracted,
            Self::Compared { .. } => EventKind::Compared,
            Self::Classified { .. } => EventKind::Classified,
        }
    }

    /// Text payload of an extraction event.
    pub fn extracted_text(&self) -> Option<&str> {
        match self {
            Self::PrimaryExtracted { text } | Self::SecondaryExtracted { text } => Some(text),
            _ => None,
        }
    }

    /// Document identity carried by `Start` / `DocumentReady`.
    pub fn document(&self) -> Option<(&PathBuf, &str)> {
        match self {
            Self::Start { file_path, file_name } | Self::DocumentReady { file_path, file_name } => {
                Some((file_path, file_name.as_str()))
            }
            _ => None,
        }
    }
}
