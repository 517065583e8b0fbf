//! Execution strategies and the host capabilities they rely on.
//!
//! The host exposes two capabilities: running a function with page
//! privileges against the live document, and evaluating a string in the
//! page. Each `Executor` is one way of getting a snippet's effect onto the
//! page through those capabilities; the coordinator picks between them.

mod evaluator;
mod injector;
mod restricted;
mod tab;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::error::ExecutionFault;
use crate::matcher::ExecutionIntent;
use crate::page::{Document, DomError, DomResult};
use crate::snippet::SanitizedSnippet;

pub use evaluator::DynamicEvaluator;
pub use injector::{ScriptElementInjector, SNIPPET_MARKER_ATTR};
pub use restricted::{apply_intent, RestrictedDomExecutor};
pub use tab::InProcessTab;

pub type TabId = u32;

/// Function shipped into the page and run against its live document.
pub type PageFn = Box<dyn FnOnce(&mut Document) -> DomResult<()> + Send>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The call never reached the page (tab closed, frame gone).
    #[error("{0}")]
    Unavailable(String),

    /// The page-side function threw.
    #[error("{0}")]
    Script(#[from] DomError),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Handle to one tab or frame the extension may act on.
#[async_trait]
pub trait TargetContext: Send + Sync {
    fn id(&self) -> TabId;

    fn hostname(&self) -> &str;

    /// Run `func` with page privileges. Not subject to the page's CSP.
    async fn run_in_page(&self, func: PageFn) -> HostResult<()>;

    /// Evaluate `code` as a string in the page's realm. Subject to CSP.
    async fn evaluate(&self, code: &str) -> HostResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Restricted,
    Injection,
    Evaluation,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Restricted => write!(f, "restricted"),
            ExecutorKind::Injection => write!(f, "injection"),
            ExecutorKind::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// One mechanism of the escalation chain.
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// `intent` is what the pattern matcher extracted, if anything.
    async fn execute(
        &self,
        target: Arc<dyn TargetContext>,
        snippet: &SanitizedSnippet,
        intent: Option<&ExecutionIntent>,
    ) -> Result<(), ExecutionFault>;

    /// Wait for deferred page work (cleanup timers) to finish.
    async fn settle(&self) {}
}
