//! Generated snippets and the fence sanitizer that runs before any execution.

use std::fmt;

use serde::{Deserialize, Serialize};

const FENCE_MARKER: &str = "```";

/// A generated page modification stored for one website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    /// Short name derived from the user's request
    pub id: String,
    /// Raw generated code, possibly still wrapped in markdown fences
    pub source_text: String,
    /// Hostname the snippet targets
    pub website: String,
}

impl Snippet {
    pub fn new(id: impl Into<String>, source_text: impl Into<String>, website: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            website: website.into(),
        }
    }

    pub fn sanitized(&self) -> SanitizedSnippet {
        sanitize(&self.source_text)
    }
}

/// Code text with markdown fences stripped. Only `sanitize` builds one, so
/// every execution path receives text that went through it exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedSnippet(String);

impl SanitizedSnippet {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 100 characters, for log lines.
    pub fn preview(&self) -> String {
        let mut preview: String = self.0.chars().take(100).collect();
        if self.0.chars().count() > 100 {
            preview.push_str("...");
        }
        preview
    }
}

impl fmt::Display for SanitizedSnippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SanitizedSnippet {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Drop every line whose trimmed form opens with a markdown fence, rejoin the
/// rest with `\n` and trim the outer whitespace. Total: never fails.
pub fn sanitize(raw: &str) -> SanitizedSnippet {
    let kept: Vec<&str> = raw
        .split('\n')
        .filter(|line| !line.trim().starts_with(FENCE_MARKER))
        .collect();
    SanitizedSnippet(kept.join("\n").trim().to_string())
}

/// Fallback short name for a request: lowercase, alphanumerics and
/// whitespace only, first three words joined with `_`.
pub fn derive_short_name(query: &str) -> String {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let name = cleaned
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join("_");
    if name.is_empty() {
        "snippet".to_string()
    } else {
        name
    }
}
