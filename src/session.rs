//! One page session: the snippets of the current website, loaded when the
//! page opens and acted on until it navigates away.

use std::sync::Arc;

use crate::coordinator::{Coordinator, ExecutionReport};
use crate::error::{PagetweakError, Result};
use crate::executor::TargetContext;
use crate::snippet::{derive_short_name, Snippet};
use crate::storage::SnippetStore;

pub struct PageSession {
    host: String,
    store: SnippetStore,
    target: Arc<dyn TargetContext>,
    coordinator: Arc<Coordinator>,
}

impl PageSession {
    /// Bind the stored snippets of `target`'s website to that page.
    pub fn open(store: SnippetStore, target: Arc<dyn TargetContext>, coordinator: Arc<Coordinator>) -> Self {
        let host = target.hostname().to_string();
        tracing::info!(
            host = %host,
            snippets = store.snippets(&host).len(),
            enabled = store.enabled_ids(&host).len(),
            "Page session opened"
        );
        Self {
            host,
            store,
            target,
            coordinator,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn snippets(&self) -> Vec<Snippet> {
        self.store.snippets(&self.host)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.store.is_enabled(&self.host, id)
    }

    /// Run every enabled snippet, one after another, in stored order.
    pub async fn run_enabled(&self) -> Vec<(String, ExecutionReport)> {
        let mut reports = Vec::new();
        for id in self.store.enabled_ids(&self.host) {
            let Some(snippet) = self.store.snippet(&self.host, &id) else {
                continue;
            };
            tracing::info!("Auto-running enabled snippet: {}", id);
            let report = self.execute(&snippet.source_text).await;
            reports.push((id, report));
        }
        reports
    }

    /// Run arbitrary generated code on this page.
    pub async fn execute(&self, text: &str) -> ExecutionReport {
        self.coordinator.execute(text, self.target.clone()).await
    }

    pub async fn run_snippet(&self, id: &str) -> Result<ExecutionReport> {
        let snippet = self.require(id)?;
        Ok(self.execute(&snippet.source_text).await)
    }

    /// Store code generated for `query` under a name derived from it.
    /// Returns the id it was stored under.
    pub fn save_generated(&mut self, query: &str, source: &str) -> Result<String> {
        if source.trim().is_empty() {
            return Err(PagetweakError::InvalidSnippet("generated code is empty".to_string()));
        }
        let id = self
            .store
            .insert_snippet(&self.host, &derive_short_name(query), source);
        self.store.save()?;
        Ok(id)
    }

    /// Persist the enabled flag. Enabling also runs the snippet right away.
    pub async fn toggle(&mut self, id: &str, enabled: bool) -> Result<Option<ExecutionReport>> {
        self.store.set_enabled(&self.host, id, enabled)?;
        self.store.save()?;
        if enabled {
            self.run_snippet(id).await.map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn delete(&mut self, id: &str) -> Result<Snippet> {
        let removed = self.store.remove_snippet(&self.host, id)?;
        self.store.save()?;
        Ok(removed)
    }

    /// Navigation: wait for deferred cleanup, then hand the store back.
    pub async fn close(self) -> SnippetStore {
        self.coordinator.settle().await;
        tracing::debug!(host = %self.host, "Page session closed");
        self.store
    }

    fn require(&self, id: &str) -> Result<Snippet> {
        self.store
            .snippet(&self.host, id)
            .ok_or_else(|| PagetweakError::SnippetNotFound(format!("{} on {}", id, self.host)))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::coordinator::Stage;
    use crate::executor::{ExecutorKind, InProcessTab};
    use crate::page::Document;

    fn open(dir: &TempDir, html: &str) -> (PageSession, Arc<InProcessTab>) {
        let store = SnippetStore::load(dir.path().join("storage.json")).unwrap();
        let tab = Arc::new(InProcessTab::new(1, "news.test", Document::parse(html).unwrap()));
        let session = PageSession::open(store, tab.clone(), Arc::new(Coordinator::default()));
        (session, tab)
    }

    #[tokio::test]
    async fn saved_and_enabled_snippets_run_on_the_next_page_load() {
        let dir = TempDir::new().unwrap();
        let html = r#"<div class="ad">x</div><p>story</p>"#;

        let (mut session, _) = open(&dir, html);
        let id = session
            .save_generated("Hide the ads", "```js\ndocument.querySelectorAll('.ad').forEach(e => e.remove())\n```")
            .unwrap();
        assert_eq!(id, "hide_the_ads");
        session.toggle(&id, false).await.unwrap();
        session.close().await;

        let (session, tab) = open(&dir, html);
        assert!(session.run_enabled().await.is_empty());
        session.close().await;

        let (mut session, tab_enabled) = open(&dir, html);
        let report = session.toggle("hide_the_ads", true).await.unwrap().unwrap();
        assert!(report.outcome.succeeded);
        assert_eq!(tab_enabled.html().unwrap(), "<p>story</p>");
        session.close().await;

        let (session, fresh) = open(&dir, html);
        let reports = session.run_enabled().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.executed_by, Some(ExecutorKind::Restricted));
        assert_eq!(fresh.html().unwrap(), "<p>story</p>");
        assert_eq!(tab.html().unwrap(), html);
    }

    #[tokio::test]
    async fn enabled_snippets_run_in_stored_order() {
        let dir = TempDir::new().unwrap();
        let (mut session, tab) = open(&dir, r#"<div id="a"></div><div id="b"></div>"#);
        let first = session
            .save_generated("hide b", "document.getElementById('b').style.display = 'none'")
            .unwrap();
        let second = session
            .save_generated("remove b", "document.getElementById('b').remove()")
            .unwrap();
        session.store.set_enabled("news.test", &first, true).unwrap();
        session.store.set_enabled("news.test", &second, true).unwrap();

        let reports = session.run_enabled().await;
        let ids: Vec<_> = reports.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["hide_b", "remove_b"]);
        assert!(reports.iter().all(|(_, r)| r.outcome.succeeded));
        assert_eq!(tab.html().unwrap(), r#"<div id="a"></div>"#);
    }

    #[tokio::test]
    async fn deleting_removes_snippet_and_flag() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir, "<p></p>");
        let id = session.save_generated("x", "document.querySelector('p').remove()").unwrap();
        session.store.set_enabled("news.test", &id, true).unwrap();

        let removed = session.delete(&id).unwrap();
        assert_eq!(removed.id, "x");
        assert!(!session.is_enabled(&id));
        assert!(session.snippets().is_empty());
        assert!(matches!(session.delete(&id), Err(PagetweakError::SnippetNotFound(_))));
    }

    #[tokio::test]
    async fn toggling_an_unknown_snippet_fails() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir, "<p></p>");
        assert!(session.toggle("ghost", true).await.is_err());
    }

    #[tokio::test]
    async fn ad_hoc_code_goes_through_the_chain() {
        let dir = TempDir::new().unwrap();
        let (session, _) = open(&dir, "<p></p>");
        let report = session.execute("console.log('hi')").await;
        assert!(report.transitions.contains(&Stage::Injecting));
        assert!(report.outcome.succeeded);
        session.close().await;
    }

    #[test]
    fn empty_generated_code_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (mut session, _) = open(&dir, "<p></p>");
        assert!(matches!(
            session.save_generated("q", "   "),
            Err(PagetweakError::InvalidSnippet(_))
        ));
    }
}
