//! Document model and normalizer.
//!
//! `normalize` is a pure function: no side effects, no external calls,
//! deterministic and idempotent. Everything downstream (extraction, scoring)
//! sees only `NormalizedText`.

use serde::{Deserialize, Serialize};

use crate::screening::error::ScreenError;

/// Recognized document kinds. Anything else is `UnsupportedFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Resume,
    JobDescription,
}

impl DocumentKind {
    pub fn parse(tag: &str) -> Result<Self, ScreenError> {
        match tag.trim() {
            "resume" => Ok(DocumentKind::Resume),
            "job_description" => Ok(DocumentKind::JobDescription),
            other => Err(ScreenError::UnsupportedFormat {
                kind: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Resume => "resume",
            DocumentKind::JobDescription => "job_description",
        }
    }
}

/// Raw input document: identifier, kind tag, and source text.
/// Immutable once ingested — the pipeline never mutates a `Document`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Kind tag as supplied by the caller. Validated, not trusted.
    pub kind: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            text: text.into(),
        }
    }

    pub fn document_kind(&self) -> Result<DocumentKind, ScreenError> {
        DocumentKind::parse(&self.kind)
    }
}

/// Canonical text representation produced by `normalize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    pub text: String,
    /// Set when the input exceeded the configured maximum length and was cut.
    pub truncated: bool,
}

/// Converts a raw document into canonical text: strips control characters,
/// collapses whitespace runs to single spaces, trims, and truncates to
/// `max_len` characters (flagged on the result, never silent).
///
/// Fails with `UnsupportedFormat` if the document's kind tag is unrecognized.
pub fn normalize(doc: &Document, max_len: usize) -> Result<NormalizedText, ScreenError> {
    doc.document_kind()?;

    let mut text = String::with_capacity(doc.text.len().min(max_len));
    let mut pending_space = false;

    for ch in doc.text.chars() {
        if ch.is_whitespace() || ch.is_control() {
            pending_space = true;
            continue;
        }
        if pending_space && !text.is_empty() {
            text.push(' ');
        }
        pending_space = false;
        text.push(ch);
    }

    let truncated = text.chars().count() > max_len;
    if truncated {
        text = text.chars().take(max_len).collect();
        text.truncate(text.trim_end().len());
    }

    Ok(NormalizedText { text, truncated })
}
