use std::sync::Arc;

use async_trait::async_trait;

use super::{Executor, ExecutorKind, HostError, TargetContext};
use crate::error::ExecutionFault;
use crate::matcher::{ExecutionIntent, Operation, SelectorKind};
use crate::page::{Document, DomResult, NodeId};
use crate::snippet::SanitizedSnippet;

/// Performs a recognised intent through DOM calls made with page
/// privileges. No code is evaluated, so the page's CSP never applies.
#[derive(Debug, Default, Clone)]
pub struct RestrictedDomExecutor;

impl RestrictedDomExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for RestrictedDomExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Restricted
    }

    async fn execute(
        &self,
        target: Arc<dyn TargetContext>,
        _snippet: &SanitizedSnippet,
        intent: Option<&ExecutionIntent>,
    ) -> Result<(), ExecutionFault> {
        let intent = intent.cloned().ok_or(ExecutionFault::PatternNotRecognized)?;

        target
            .run_in_page(Box::new(move |document| {
                apply_intent(document, &intent).map(|affected| {
                    tracing::debug!(affected, "Restricted execution applied");
                })
            }))
            .await
            .map_err(|e| match e {
                HostError::Unavailable(msg) => ExecutionFault::HostCommunication(msg),
                HostError::Script(err) => ExecutionFault::RestrictedExecution(err.to_string()),
            })
    }
}

/// Apply `intent` to `document`, returning how many elements it touched.
///
/// Zero resolved elements is not an error. DOM errors (an invalid selector,
/// a failed mutation) are returned untouched.
pub fn apply_intent(document: &mut Document, intent: &ExecutionIntent) -> DomResult<usize> {
    let targets = resolve(document, intent)?;

    if targets.is_empty() {
        tracing::info!(
            kind = %intent.selector_kind,
            selector = %intent.selector_value,
            "Element not found for selector"
        );
        return Ok(0);
    }

    let Some(operation) = &intent.operation else {
        return Ok(0);
    };

    for node in &targets {
        match operation {
            Operation::Remove => document.remove_node(*node)?,
            Operation::SetDisplay(value) => document.set_style_property(*node, "display", value)?,
        }
    }
    Ok(targets.len())
}

fn resolve(document: &Document, intent: &ExecutionIntent) -> DomResult<Vec<NodeId>> {
    match intent.selector_kind {
        SelectorKind::All => document.query_selector_all(&intent.selector_value),
        SelectorKind::Single => Ok(document
            .query_selector(&intent.selector_value)?
            .into_iter()
            .collect()),
        SelectorKind::Id => Ok(document
            .get_element_by_id(&intent.selector_value)
            .into_iter()
            .collect()),
    }
}
