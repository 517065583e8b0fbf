use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::task::TaskTracker;

use super::{Executor, ExecutorKind, HostError, TargetContext};
use crate::error::ExecutionFault;
use crate::matcher::ExecutionIntent;
use crate::page::DomError;
use crate::snippet::SanitizedSnippet;

/// Attribute marking script elements this crate inserted.
pub const SNIPPET_MARKER_ATTR: &str = "data-pagetweak-snippet";

const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(100);

/// Runs unrecognised code by inserting it as an inline `<script>` into
/// `document.head`, then removing the element after a short delay.
///
/// Whether the code ran is up to the page's CSP. A policy violation the page
/// reports for the element is surfaced as an injection fault; the absence of
/// one only means nothing threw.
pub struct ScriptElementInjector {
    cleanup_delay: Duration,
    cleanups: TaskTracker,
    /// Source of the `pt-N` markers tying cleanup to its own element
    next_token: AtomicU64,
}

impl Default for ScriptElementInjector {
    fn default() -> Self {
        Self::new(DEFAULT_CLEANUP_DELAY)
    }
}

impl ScriptElementInjector {
    pub fn new(cleanup_delay: Duration) -> Self {
        Self {
            cleanup_delay,
            cleanups: TaskTracker::new(),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn cleanup_delay(&self) -> Duration {
        self.cleanup_delay
    }

    /// Removal happens whether or not the injected code threw.
    fn schedule_cleanup(&self, target: Arc<dyn TargetContext>, token: String) {
        let delay = self.cleanup_delay;
        self.cleanups.spawn(async move {
            tokio::time::sleep(delay).await;
            let selector = format!("script[{}=\"{}\"]", SNIPPET_MARKER_ATTR, token);
            let result = target
                .run_in_page(Box::new(move |document| {
                    if let Some(script) = document.query_selector(&selector)? {
                        document.remove_node(script)?;
                    }
                    Ok(())
                }))
                .await;
            match result {
                Ok(()) => tracing::debug!("Script element cleaned up"),
                Err(e) => tracing::debug!("Script element cleanup skipped: {}", e),
            }
        });
    }
}

#[async_trait]
impl Executor for ScriptElementInjector {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Injection
    }

    async fn execute(
        &self,
        target: Arc<dyn TargetContext>,
        snippet: &SanitizedSnippet,
        _intent: Option<&ExecutionIntent>,
    ) -> Result<(), ExecutionFault> {
        let token = format!("pt-{}", self.next_token.fetch_add(1, Ordering::Relaxed));
        let code = snippet.as_str().to_string();
        let marker = token.clone();

        tracing::debug!(code = %snippet.preview(), "Creating script element");
        let result = target
            .run_in_page(Box::new(move |document| {
                let head = document.ensure_head();
                let script = document.create_element("script");
                document.set_attr(script, SNIPPET_MARKER_ATTR, &marker)?;
                let text = document.create_text(&code);
                document.append_child(script, text)?;
                document.append_child(head, script)?;

                // securitypolicyviolation for this element
                if document.violations().iter().any(|v| v.node == Some(script)) {
                    return Err(DomError::InlineBlocked);
                }
                Ok(())
            }))
            .await;

        match result {
            Ok(()) => {
                self.schedule_cleanup(target, token);
                tracing::debug!("Script element injected");
                Ok(())
            }
            Err(HostError::Unavailable(msg)) => Err(ExecutionFault::HostCommunication(msg)),
            Err(HostError::Script(err)) => {
                self.schedule_cleanup(target, token);
                Err(ExecutionFault::Injection(err.to_string()))
            }
        }
    }

    async fn settle(&self) {
        self.cleanups.close();
        self.cleanups.wait().await;
        self.cleanups.reopen();
    }
}
