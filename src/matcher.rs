//! Recognises the few DOM-mutation shapes that can run without evaluating
//! code. This is a whitelist table scanned with regular expressions, not a
//! JavaScript parser: anything outside the table is "not recognised".

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ExecutionFault;
use crate::snippet::SanitizedSnippet;

const REMOVE_CALL: &str = ".remove()";
const DISPLAY_ASSIGNMENT: &str = "style.display";
const DEFAULT_DISPLAY: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// `document.querySelectorAll(...)`
    All,
    /// `document.querySelector(...)`
    Single,
    /// `document.getElementById(...)`
    Id,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorKind::All => write!(f, "all"),
            SelectorKind::Single => write!(f, "single"),
            SelectorKind::Id => write!(f, "id"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Operation {
    Remove,
    SetDisplay(String),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Remove => write!(f, "remove"),
            Operation::SetDisplay(value) => write!(f, "setDisplay({})", value),
        }
    }
}

/// Structured description of one whitelisted DOM mutation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionIntent {
    pub selector_kind: SelectorKind,
    pub selector_value: String,
    /// `None` resolves the selector and does nothing else
    pub operation: Option<Operation>,
}

struct SelectorRule {
    kind: SelectorKind,
    call: Regex,
}

// Order is priority: the first rule whose call shape appears wins.
static SELECTOR_RULES: LazyLock<[SelectorRule; 3]> = LazyLock::new(|| {
    [
        SelectorRule {
            kind: SelectorKind::All,
            call: quoted_call("document.querySelectorAll"),
        },
        SelectorRule {
            kind: SelectorKind::Single,
            call: quoted_call("document.querySelector"),
        },
        SelectorRule {
            kind: SelectorKind::Id,
            call: quoted_call("document.getElementById"),
        },
    ]
});

static DISPLAY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"style\.display\s*=\s*['"`]([^'"`]+)['"`]"#).expect("valid display pattern")
});

fn quoted_call(callee: &str) -> Regex {
    Regex::new(&format!(r#"{}\(['"`]([^'"`]+)['"`]\)"#, regex::escape(callee)))
        .expect("valid selector call pattern")
}

/// Extract the single intent a snippet expresses, or `PatternNotRecognized`.
pub fn match_intent(snippet: &SanitizedSnippet) -> Result<ExecutionIntent, ExecutionFault> {
    let code = snippet.as_str();

    let (selector_kind, selector_value) = SELECTOR_RULES
        .iter()
        .find_map(|rule| {
            rule.call
                .captures(code)
                .and_then(|caps| caps.get(1))
                .map(|value| (rule.kind, value.as_str().to_string()))
        })
        .ok_or(ExecutionFault::PatternNotRecognized)?;

    let intent = ExecutionIntent {
        selector_kind,
        selector_value,
        operation: detect_operation(code),
    };
    tracing::debug!(
        kind = %intent.selector_kind,
        selector = %intent.selector_value,
        operation = ?intent.operation,
        "Matched CSP-safe pattern"
    );
    Ok(intent)
}

fn detect_operation(code: &str) -> Option<Operation> {
    if code.contains(REMOVE_CALL) {
        return Some(Operation::Remove);
    }
    if code.contains(DISPLAY_ASSIGNMENT) {
        let value = DISPLAY_VALUE
            .captures(code)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(DEFAULT_DISPLAY);
        return Some(Operation::SetDisplay(value.to_string()));
    }
    None
}
