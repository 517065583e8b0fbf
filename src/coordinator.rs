//! Execution Coordinator: runs one snippet through the escalation chain and
//! reduces everything that happened to a single outcome.
//!
//! ```text
//! Idle -> Sanitizing -> MatchingPattern -+-> ExecutingRestricted -+-> Reporting -> Succeeded
//!                                        |                        |
//!                                        +-----> Injecting <------+  (restricted fault)
//!                                                  |
//!                                                  +-> [Evaluating] -> Reporting -> Succeeded | Failed
//! ```
//!
//! Each mechanism is tried at most once. When every mechanism fails the
//! reported reason is the restricted path's fault, which is the diagnostic
//! one on a CSP-locked page.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ExecutionConfig;
use crate::error::ExecutionFault;
use crate::executor::{
    DynamicEvaluator, Executor, ExecutorKind, RestrictedDomExecutor, ScriptElementInjector,
    TargetContext,
};
use crate::matcher::{match_intent, ExecutionIntent};
use crate::snippet::{sanitize, SanitizedSnippet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Idle,
    Sanitizing,
    MatchingPattern,
    ExecutingRestricted,
    Injecting,
    Evaluating,
    Reporting,
    Succeeded,
    Failed,
}

impl Stage {
    fn for_executor(kind: ExecutorKind) -> Self {
        match kind {
            ExecutorKind::Restricted => Stage::ExecutingRestricted,
            ExecutorKind::Injection => Stage::Injecting,
            ExecutorKind::Evaluation => Stage::Evaluating,
        }
    }
}

/// What the caller of `requestExecution` gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(rename = "success")]
    pub succeeded: bool,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_message: Some(message.into()),
        }
    }
}

/// Outcome plus the trail that led to it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub transitions: Vec<Stage>,
    /// Mechanisms invoked, in order
    pub attempts: Vec<ExecutorKind>,
    pub executed_by: Option<ExecutorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<ExecutionIntent>,
}

struct Run {
    transitions: Vec<Stage>,
    attempts: Vec<ExecutorKind>,
    intent: Option<ExecutionIntent>,
}

impl Run {
    fn new() -> Self {
        Self {
            transitions: vec![Stage::Idle],
            attempts: Vec::new(),
            intent: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(?stage, "Coordinator transition");
        self.transitions.push(stage);
    }

    fn succeed(mut self, kind: ExecutorKind) -> ExecutionReport {
        self.enter(Stage::Reporting);
        self.enter(Stage::Succeeded);
        tracing::info!(executor = %kind, "Snippet executed successfully");
        ExecutionReport {
            outcome: ExecutionOutcome::success(),
            transitions: self.transitions,
            attempts: self.attempts,
            executed_by: Some(kind),
            intent: self.intent,
        }
    }

    fn fail(mut self, fault: &ExecutionFault) -> ExecutionReport {
        self.enter(Stage::Reporting);
        self.enter(Stage::Failed);
        tracing::error!("All execution methods failed: {}", fault);
        ExecutionReport {
            outcome: ExecutionOutcome::failure(fault.to_string()),
            transitions: self.transitions,
            attempts: self.attempts,
            executed_by: None,
            intent: self.intent,
        }
    }
}

/// Selects between the execution mechanisms for each request. Holds no
/// per-request state, so one coordinator serves a whole session.
pub struct Coordinator {
    restricted: Arc<dyn Executor>,
    fallbacks: Vec<Arc<dyn Executor>>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl Coordinator {
    /// Two-tier chain: `restricted`, then `injector`.
    pub fn new(restricted: Arc<dyn Executor>, injector: Arc<dyn Executor>) -> Self {
        Self {
            restricted,
            fallbacks: vec![injector],
        }
    }

    /// Append a mechanism tried after every other one failed.
    pub fn with_last_resort(mut self, executor: Arc<dyn Executor>) -> Self {
        self.fallbacks.push(executor);
        self
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        let coordinator = Self::new(
            Arc::new(RestrictedDomExecutor::new()),
            Arc::new(ScriptElementInjector::new(config.cleanup_delay())),
        );
        if config.allow_eval {
            coordinator.with_last_resort(Arc::new(DynamicEvaluator::new()))
        } else {
            coordinator
        }
    }

    /// `requestExecution`: always resolves with a definitive outcome.
    pub async fn execute(&self, raw_text: &str, target: Arc<dyn TargetContext>) -> ExecutionReport {
        let mut run = Run::new();

        run.enter(Stage::Sanitizing);
        let snippet = sanitize(raw_text);
        tracing::debug!(tab = target.id(), code = %snippet.preview(), "Executing cleaned snippet");

        run.enter(Stage::MatchingPattern);
        let primary_fault = match match_intent(&snippet) {
            Ok(intent) => {
                run.intent = Some(intent);
                match self.attempt(&mut run, &self.restricted, &target, &snippet).await {
                    Ok(()) => return run.succeed(self.restricted.kind()),
                    Err(fault) if fault.is_terminal() => return run.fail(&fault),
                    Err(fault) => {
                        tracing::warn!("Extension privilege execution failed: {}", fault);
                        fault
                    }
                }
            }
            Err(fault) => {
                tracing::debug!("No CSP-safe pattern matched, skipping restricted execution");
                fault
            }
        };

        for fallback in &self.fallbacks {
            match self.attempt(&mut run, fallback, &target, &snippet).await {
                Ok(()) => return run.succeed(fallback.kind()),
                Err(fault) if fault.is_terminal() => {
                    tracing::warn!("{} fallback lost the target: {}", fallback.kind(), fault);
                    break;
                }
                Err(fault) => tracing::warn!("{} fallback failed: {}", fallback.kind(), fault),
            }
        }

        run.fail(&primary_fault)
    }

    async fn attempt(
        &self,
        run: &mut Run,
        executor: &Arc<dyn Executor>,
        target: &Arc<dyn TargetContext>,
        snippet: &SanitizedSnippet,
    ) -> Result<(), ExecutionFault> {
        run.enter(Stage::for_executor(executor.kind()));
        run.attempts.push(executor.kind());
        executor
            .execute(target.clone(), snippet, run.intent.as_ref())
            .await
    }

    /// Run several requests one after another; each finishes before the next
    /// starts.
    pub async fn execute_all<I, S>(&self, snippets: I, target: Arc<dyn TargetContext>) -> Vec<ExecutionReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reports = Vec::new();
        for snippet in snippets {
            reports.push(self.execute(snippet.as_ref(), target.clone()).await);
        }
        reports
    }

    /// Wait for deferred work such as injected-script cleanup.
    pub async fn settle(&self) {
        self.restricted.settle().await;
        for fallback in &self.fallbacks {
            fallback.settle().await;
        }
    }
}
