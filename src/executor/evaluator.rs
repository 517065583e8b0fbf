use std::sync::Arc;

use async_trait::async_trait;

use super::{Executor, ExecutorKind, HostError, TargetContext};
use crate::error::ExecutionFault;
use crate::matcher::ExecutionIntent;
use crate::snippet::SanitizedSnippet;

/// Last resort: hand the code to the page's own string evaluation. Fails on
/// any page whose CSP lacks `'unsafe-eval'`. Only part of the chain when
/// `execution.allow_eval` is set.
#[derive(Debug, Default, Clone)]
pub struct DynamicEvaluator;

impl DynamicEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for DynamicEvaluator {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Evaluation
    }

    async fn execute(
        &self,
        target: Arc<dyn TargetContext>,
        snippet: &SanitizedSnippet,
        _intent: Option<&ExecutionIntent>,
    ) -> Result<(), ExecutionFault> {
        tracing::debug!("Attempting direct code evaluation");
        target
            .evaluate(snippet.as_str())
            .await
            .map_err(|e| match e {
                HostError::Unavailable(msg) => ExecutionFault::HostCommunication(msg),
                HostError::Script(err) => ExecutionFault::Evaluation(err.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InProcessTab;
    use crate::page::{ContentSecurityPolicy, Document};
    use crate::snippet::sanitize;

    #[tokio::test]
    async fn evaluation_obeys_unsafe_eval() {
        let strict = Arc::new(InProcessTab::new(
            1,
            "strict.test",
            Document::new().with_csp(ContentSecurityPolicy::parse("script-src 'self'")),
        ));
        let err = DynamicEvaluator
            .execute(strict, &sanitize("a()"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionFault::Evaluation(msg) if msg.contains("unsafe-eval")));

        let lax = Arc::new(InProcessTab::new(2, "lax.test", Document::new()));
        DynamicEvaluator
            .execute(lax.clone(), &sanitize("a()"), None)
            .await
            .unwrap();
        assert_eq!(
            lax.with_document(|d| d.executed_scripts().len()).unwrap(),
            1
        );
    }
}
