use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::csp::{BlockedKind, ContentSecurityPolicy, CspViolation};
use super::selector::{parse_selector_list, SelectorChain};

/// Errors raised by DOM calls, the way the page itself would throw them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("SyntaxError: '{0}' is not a valid selector")]
    InvalidSelector(String),

    #[error("HierarchyRequestError: {0}")]
    HierarchyRequest(String),

    #[error("TypeError: {0}")]
    NotAnElement(String),

    #[error("Refused to execute inline script because it violates the page's Content Security Policy directive: script-src-elem")]
    InlineBlocked,

    #[error("EvalError: Refused to evaluate a string as JavaScript because 'unsafe-eval' is not an allowed source of script")]
    EvalBlocked,

    #[error("{0}")]
    Script(String),

    #[error("HTML parse error: {0}")]
    Parse(String),
}

pub type DomResult<T> = std::result::Result<T, DomError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: Vec<(String, String)>,
}

impl Element {
    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn has_class(&self, class_name: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class_name))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
}

/// Runs script text the page has permitted. Errors become page errors; they
/// never reach whoever inserted the script.
pub trait ScriptRuntime: Send + Sync {
    fn run(&self, source: &str, document: &mut Document) -> std::result::Result<(), String>;
}

/// Arena DOM for one page.
#[derive(Clone)]
pub struct Document {
    pub(crate) nodes: Vec<Node>,
    root: NodeId,
    csp: ContentSecurityPolicy,
    runtime: Option<Arc<dyn ScriptRuntime>>,
    started_scripts: HashSet<NodeId>,
    violations: Vec<CspViolation>,
    executed_scripts: Vec<String>,
    page_errors: Vec<String>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("csp", &self.csp)
            .field("violations", &self.violations)
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            root: NodeId(0),
            csp: ContentSecurityPolicy::permissive(),
            runtime: None,
            started_scripts: HashSet::new(),
            violations: Vec::new(),
            executed_scripts: Vec::new(),
            page_errors: Vec::new(),
        }
    }

    pub fn parse(html: &str) -> DomResult<Self> {
        super::html::parse_html(html)
    }

    pub fn with_csp(mut self, csp: ContentSecurityPolicy) -> Self {
        self.csp = csp;
        self
    }

    pub fn csp(&self) -> &ContentSecurityPolicy {
        &self.csp
    }

    pub fn set_script_runtime(&mut self, runtime: Arc<dyn ScriptRuntime>) {
        self.runtime = Some(runtime);
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn element(&self, node: NodeId) -> Option<&Element> {
        match &self.nodes.get(node.0)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node.0)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|e| e.tag_name.as_str())
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node).and_then(|e| e.attr(name))
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        let element = self
            .element_mut(node)
            .ok_or_else(|| DomError::NotAnElement("setAttribute target is not an element".into()))?;
        match element
            .attrs
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => element.attrs.push((name.to_ascii_lowercase(), value.to_string())),
        }
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn create_node(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            kind,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    /// `document.createElement`: the element starts detached.
    pub fn create_element(&mut self, tag_name: &str) -> NodeId {
        self.create_node(
            None,
            NodeKind::Element(Element {
                tag_name: tag_name.to_ascii_lowercase(),
                attrs: Vec::new(),
            }),
        )
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.create_node(None, NodeKind::Text(text.to_string()))
    }

    pub(crate) fn mark_script_started(&mut self, node: NodeId) {
        self.started_scripts.insert(node);
    }

    /// `parent.appendChild(child)`. Connecting a script element runs it,
    /// subject to the page's policy.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() {
            return Err(DomError::HierarchyRequest("unknown node".into()));
        }
        if matches!(self.nodes[parent.0].kind, NodeKind::Text(_)) {
            return Err(DomError::HierarchyRequest(
                "text nodes cannot have children".into(),
            ));
        }
        if child == self.root || child == parent || self.is_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest(
                "the new child contains the parent".into(),
            ));
        }

        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);

        if self.is_connected(child) {
            self.prepare_scripts(child);
        }
        Ok(())
    }

    /// `element.remove()`. Detached nodes are left alone.
    pub fn remove_node(&mut self, node: NodeId) -> DomResult<()> {
        if node == self.root {
            return Err(DomError::HierarchyRequest(
                "cannot remove the document".into(),
            ));
        }
        if node.0 >= self.nodes.len() {
            return Err(DomError::HierarchyRequest("unknown node".into()));
        }
        self.detach(node);
        Ok(())
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|id| *id != node);
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = self.parent(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        node == self.root || self.is_ancestor(self.root, node)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.nodes.get(current.0).map(|n| &n.kind) {
                Some(NodeKind::Text(text)) => out.push_str(text),
                Some(_) => stack.extend(self.children(current).iter().rev()),
                None => {}
            }
        }
        out
    }

    /// Connected elements in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements(self.root, &mut out);
        out
    }

    /// Pre-order walk below `node`. Nesting depth is bounded only by input
    /// size, so the walk keeps its own stack.
    fn collect_elements(&self, node: NodeId, out: &mut Vec<NodeId>) {
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            if self.element(current).is_some() {
                out.push(current);
            }
            stack.extend(self.children(current).iter().rev());
        }
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        if id.is_empty() {
            return None;
        }
        self.elements()
            .into_iter()
            .find(|node| self.attr(*node, "id") == Some(id))
    }

    pub fn query_selector(&self, selector: &str) -> DomResult<Option<NodeId>> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    pub fn query_selector_all(&self, selector: &str) -> DomResult<Vec<NodeId>> {
        let chains = parse_selector_list(selector)?;
        Ok(self
            .elements()
            .into_iter()
            .filter(|node| chains.iter().any(|chain| self.matches_chain(*node, chain)))
            .collect())
    }

    fn matches_chain(&self, node: NodeId, chain: &SelectorChain) -> bool {
        chain.matches(self, node)
    }

    /// `element.style.<property>` for an inline declaration.
    pub fn style_property(&self, node: NodeId, property: &str) -> Option<String> {
        let style = self.attr(node, "style")?;
        parse_declarations(style)
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(property))
            .map(|(_, value)| value)
    }

    /// `element.style.<property> = value`. An empty value removes the declaration.
    pub fn set_style_property(&mut self, node: NodeId, property: &str, value: &str) -> DomResult<()> {
        let element = self
            .element(node)
            .ok_or_else(|| DomError::NotAnElement("style target is not an element".into()))?;
        let mut declarations = parse_declarations(element.attr("style").unwrap_or(""));
        let value = value.trim();

        match declarations
            .iter_mut()
            .position(|(name, _)| name.eq_ignore_ascii_case(property))
        {
            Some(index) if value.is_empty() => {
                declarations.remove(index);
            }
            Some(index) => declarations[index].1 = value.to_string(),
            None if value.is_empty() => {}
            None => declarations.push((property.to_ascii_lowercase(), value.to_string())),
        }

        let serialized = declarations
            .iter()
            .map(|(name, value)| format!("{}: {};", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attr(node, "style", &serialized)
    }

    pub fn head(&self) -> Option<NodeId> {
        self.elements()
            .into_iter()
            .find(|node| self.tag_name(*node) == Some("head"))
    }

    /// `document.head`, creating an implicit `<head>` the way parsers do.
    pub fn ensure_head(&mut self) -> NodeId {
        if let Some(head) = self.head() {
            return head;
        }
        let html = self
            .elements()
            .into_iter()
            .find(|node| self.tag_name(*node) == Some("html"))
            .unwrap_or(self.root);
        let head = self.create_element("head");
        self.nodes[head.0].parent = Some(html);
        self.nodes[html.0].children.insert(0, head);
        head
    }

    fn prepare_scripts(&mut self, node: NodeId) {
        let mut scripts = Vec::new();
        if self.tag_name(node) == Some("script") {
            scripts.push(node);
        }
        let mut descendants = Vec::new();
        self.collect_elements(node, &mut descendants);
        scripts.extend(
            descendants
                .into_iter()
                .filter(|n| self.tag_name(*n) == Some("script")),
        );

        for script in scripts {
            if self.started_scripts.insert(script) && self.is_executable_script(script) {
                self.run_inline_script(script);
            }
        }
    }

    fn is_executable_script(&self, node: NodeId) -> bool {
        match self.attr(node, "type").map(|t| t.trim().to_ascii_lowercase()) {
            None => true,
            Some(t) => t.is_empty() || t == "text/javascript" || t == "module",
        }
    }

    fn run_inline_script(&mut self, node: NodeId) {
        let source = self.text_content(node);
        if !self.csp.allows_inline_scripts() {
            tracing::debug!("Inline script refused by page policy");
            self.violations
                .push(CspViolation::new(BlockedKind::Inline, Some(node), &source));
            return;
        }
        if let Err(message) = self.run_source(&source) {
            self.page_errors.push(message);
        }
    }

    /// String evaluation in the page's own realm.
    pub fn evaluate(&mut self, source: &str) -> DomResult<()> {
        if !self.csp.allows_eval() {
            self.violations
                .push(CspViolation::new(BlockedKind::Eval, None, source));
            return Err(DomError::EvalBlocked);
        }
        self.run_source(source).map_err(DomError::Script)
    }

    fn run_source(&mut self, source: &str) -> std::result::Result<(), String> {
        self.executed_scripts.push(source.to_string());
        match self.runtime.clone() {
            Some(runtime) => runtime.run(source, self),
            None => Ok(()),
        }
    }

    pub fn violations(&self) -> &[CspViolation] {
        &self.violations
    }

    pub fn executed_scripts(&self) -> &[String] {
        &self.executed_scripts
    }

    pub fn page_errors(&self) -> &[String] {
        &self.page_errors
    }

    pub fn to_html(&self) -> String {
        super::html::serialize_children(self, self.root)
    }

    pub(crate) fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0).map(|n| &n.kind)
    }
}

fn parse_declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                None
            } else {
                Some((name.to_ascii_lowercase(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ContentSecurityPolicy;

    fn doc(html: &str) -> Document {
        Document::parse(html).unwrap()
    }

    #[test]
    fn query_selector_all_returns_document_order() {
        let d = doc(r#"<div class="ads" id="a"></div><p><span class="ads" id="b"></span></p>"#);
        let ids: Vec<_> = d
            .query_selector_all(".ads")
            .unwrap()
            .into_iter()
            .map(|n| d.attr(n, "id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn invalid_selector_is_a_syntax_error() {
        let d = doc("<div></div>");
        assert!(matches!(
            d.query_selector_all("div:hover"),
            Err(DomError::InvalidSelector(_))
        ));
        assert!(matches!(d.query_selector(""), Err(DomError::InvalidSelector(_))));
    }

    #[test]
    fn removed_nodes_are_no_longer_found() {
        let mut d = doc(r#"<main><div id="banner">x</div></main>"#);
        let banner = d.get_element_by_id("banner").unwrap();
        d.remove_node(banner).unwrap();

        assert!(!d.is_connected(banner));
        assert!(d.get_element_by_id("banner").is_none());
        assert_eq!(d.to_html(), "<main></main>");
        // removing twice is fine
        d.remove_node(banner).unwrap();
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut d = Document::new();
        let root = d.root();
        assert!(matches!(d.remove_node(root), Err(DomError::HierarchyRequest(_))));
    }

    #[test]
    fn style_property_updates_inline_declarations() {
        let mut d = doc(r#"<div id="x" style="color: red"></div>"#);
        let x = d.get_element_by_id("x").unwrap();

        d.set_style_property(x, "display", "none").unwrap();
        assert_eq!(d.style_property(x, "display").as_deref(), Some("none"));
        assert_eq!(d.style_property(x, "color").as_deref(), Some("red"));

        d.set_style_property(x, "display", "block").unwrap();
        assert_eq!(d.attr(x, "style"), Some("color: red; display: block;"));

        d.set_style_property(x, "display", "").unwrap();
        assert_eq!(d.style_property(x, "display"), None);
    }

    #[test]
    fn ensure_head_creates_head_under_html() {
        let mut d = doc("<html><body><p>hi</p></body></html>");
        assert!(d.head().is_none());
        let head = d.ensure_head();
        assert_eq!(d.tag_name(d.parent(head).unwrap()), Some("html"));
        assert_eq!(d.ensure_head(), head);
    }

    #[test]
    fn connecting_a_script_runs_it_once() {
        let mut d = doc("<head></head>");
        let head = d.ensure_head();
        let script = d.create_element("script");
        let text = d.create_text("console.log(1)");
        d.append_child(script, text).unwrap();
        d.append_child(head, script).unwrap();
        d.append_child(head, script).unwrap();

        assert_eq!(d.executed_scripts(), ["console.log(1)".to_string()]);
        assert!(d.violations().is_empty());
    }

    #[test]
    fn blocked_inline_script_records_violation_without_error() {
        let mut d = doc("<head></head>")
            .with_csp(ContentSecurityPolicy::parse("script-src 'self'"));
        let head = d.ensure_head();
        let script = d.create_element("script");
        let text = d.create_text("alert(1)");
        d.append_child(script, text).unwrap();

        assert!(d.append_child(head, script).is_ok());
        assert!(d.executed_scripts().is_empty());
        assert_eq!(d.violations().len(), 1);
        assert_eq!(d.violations()[0].node, Some(script));
        assert_eq!(d.violations()[0].blocked, BlockedKind::Inline);
    }

    #[test]
    fn parsed_scripts_do_not_run_again() {
        let d = doc("<script>var a = 1;</script>");
        assert!(d.executed_scripts().is_empty());
    }

    #[test]
    fn runtime_errors_stay_inside_the_page() {
        struct Throwing;
        impl ScriptRuntime for Throwing {
            fn run(&self, _: &str, _: &mut Document) -> std::result::Result<(), String> {
                Err("ReferenceError: foo is not defined".into())
            }
        }

        let mut d = doc("<head></head>");
        d.set_script_runtime(Arc::new(Throwing));
        let head = d.ensure_head();
        let script = d.create_element("script");
        assert!(d.append_child(head, script).is_ok());
        assert_eq!(d.page_errors(), ["ReferenceError: foo is not defined".to_string()]);
    }

    #[test]
    fn runtime_can_mutate_the_document() {
        struct Hider;
        impl ScriptRuntime for Hider {
            fn run(&self, _: &str, document: &mut Document) -> std::result::Result<(), String> {
                for node in document.query_selector_all("p").map_err(|e| e.to_string())? {
                    document
                        .set_style_property(node, "display", "none")
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            }
        }

        let mut d = doc("<p>a</p>");
        d.set_script_runtime(Arc::new(Hider));
        d.evaluate("hide()").unwrap();
        let p = d.query_selector("p").unwrap().unwrap();
        assert_eq!(d.style_property(p, "display").as_deref(), Some("none"));
    }

    #[test]
    fn evaluate_respects_unsafe_eval() {
        let mut d = Document::new().with_csp(ContentSecurityPolicy::parse("script-src 'self'"));
        assert_eq!(d.evaluate("1 + 1"), Err(DomError::EvalBlocked));
        assert_eq!(d.violations()[0].blocked, BlockedKind::Eval);
    }

    #[test]
    fn append_rejects_cycles() {
        let mut d = doc("<div><p></p></div>");
        let div = d.query_selector("div").unwrap().unwrap();
        let p = d.query_selector("p").unwrap().unwrap();
        assert!(matches!(d.append_child(p, div), Err(DomError::HierarchyRequest(_))));
    }

    #[test]
    fn unclosed_deep_nesting_is_walked_without_recursion() {
        let depth = 200_000;
        let mut document = doc(&format!("{}<span class=\"x\">leaf</span>", "<div>".repeat(depth)));
        assert_eq!(document.elements().len(), depth + 1);
        assert_eq!(document.text_content(document.root()), "leaf");

        let leaf = document.query_selector(".x").unwrap().unwrap();
        assert_eq!(document.query_selector_all("div").unwrap().len(), depth);
        document.remove_node(leaf).unwrap();
        assert_eq!(document.query_selector(".x").unwrap(), None);
        assert!(document.to_html().ends_with(&"</div>".repeat(depth)));
    }
}
