use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{HostError, HostResult, PageFn, TabId, TargetContext};
use crate::page::Document;

/// Same-process stand-in for a browser tab: page functions are plain calls
/// against a shared document.
pub struct InProcessTab {
    id: TabId,
    hostname: String,
    document: Arc<Mutex<Document>>,
    detached: AtomicBool,
}

impl InProcessTab {
    pub fn new(id: TabId, hostname: impl Into<String>, document: Document) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            document: Arc::new(Mutex::new(document)),
            detached: AtomicBool::new(false),
        }
    }

    /// Simulate the tab going away; every later call is `Unavailable`.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Read or mutate the document directly, outside any execution path.
    pub fn with_document<R>(&self, f: impl FnOnce(&mut Document) -> R) -> HostResult<R> {
        let mut document = self
            .document
            .lock()
            .map_err(|_| HostError::Unavailable("page document lock poisoned".to_string()))?;
        Ok(f(&mut *document))
    }

    pub fn html(&self) -> HostResult<String> {
        self.with_document(|d| d.to_html())
    }

    fn ensure_attached(&self) -> HostResult<()> {
        if self.is_detached() {
            return Err(HostError::Unavailable(format!(
                "No tab with id: {}",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetContext for InProcessTab {
    fn id(&self) -> TabId {
        self.id
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn run_in_page(&self, func: PageFn) -> HostResult<()> {
        self.ensure_attached()?;
        self.with_document(func)?.map_err(HostError::Script)
    }

    async fn evaluate(&self, code: &str) -> HostResult<()> {
        self.ensure_attached()?;
        self.with_document(|d| d.evaluate(code))?
            .map_err(HostError::Script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DomError;

    #[tokio::test]
    async fn page_functions_see_the_live_document() {
        let tab = InProcessTab::new(7, "example.com", Document::parse("<p id=a></p>").unwrap());
        tab.run_in_page(Box::new(|d| {
            let a = d.get_element_by_id("a").expect("element a");
            d.remove_node(a)
        }))
        .await
        .unwrap();
        assert_eq!(tab.html().unwrap(), "");
    }

    #[tokio::test]
    async fn thrown_errors_are_script_errors() {
        let tab = InProcessTab::new(7, "example.com", Document::new());
        let err = tab
            .run_in_page(Box::new(|d| d.query_selector("::").map(|_| ())))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Script(DomError::InvalidSelector(_))));
    }

    #[tokio::test]
    async fn detached_tabs_refuse_calls() {
        let tab = InProcessTab::new(9, "example.com", Document::new());
        tab.detach();
        let err = tab.run_in_page(Box::new(|_| Ok(()))).await.unwrap_err();
        assert_eq!(err, HostError::Unavailable("No tab with id: 9".to_string()));
        assert!(tab.evaluate("1").await.is_err());
    }
}
