//! Content-Security-Policy as far as script execution is concerned.

use serde::Serialize;

use super::NodeId;

/// Script-related view of a page's Content-Security-Policy header.
///
/// Inline `<script>` elements are governed by `script-src-elem`, falling back
/// to `script-src` and then `default-src`. Evaluation is governed by
/// `script-src`, falling back to `default-src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSecurityPolicy {
    script_src_elem: Option<Vec<String>>,
    script_src: Option<Vec<String>>,
}

impl Default for ContentSecurityPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl ContentSecurityPolicy {
    /// No policy at all: inline scripts and evaluation both run.
    pub fn permissive() -> Self {
        Self {
            script_src_elem: None,
            script_src: None,
        }
    }

    /// Parse a header value such as `default-src 'self'; script-src 'self' 'unsafe-inline'`.
    ///
    /// Unknown directives are ignored.
    pub fn parse(header: &str) -> Self {
        let mut script_src_elem = None;
        let mut script_src = None;
        let mut default_src = None;

        for directive in header.split(';') {
            let mut tokens = directive.split_whitespace();
            let Some(name) = tokens.next() else {
                continue;
            };
            let sources: Vec<String> = tokens.map(|t| t.to_ascii_lowercase()).collect();
            match name.to_ascii_lowercase().as_str() {
                // first occurrence of a directive wins
                "script-src-elem" if script_src_elem.is_none() => script_src_elem = Some(sources),
                "script-src" if script_src.is_none() => script_src = Some(sources),
                "default-src" if default_src.is_none() => default_src = Some(sources),
                _ => {}
            }
        }

        let script_src = script_src.or(default_src);
        Self {
            script_src_elem: script_src_elem.or_else(|| script_src.clone()),
            script_src,
        }
    }

    /// Whether an inline `<script>` element may run.
    pub fn allows_inline_scripts(&self) -> bool {
        match &self.script_src_elem {
            None => true,
            // nonces, hashes and 'strict-dynamic' switch 'unsafe-inline' off
            Some(sources) => {
                allows_keyword(sources, "'unsafe-inline'")
                    && !sources.iter().any(|s| disables_unsafe_inline(s))
            }
        }
    }

    pub fn allows_eval(&self) -> bool {
        match &self.script_src {
            None => true,
            Some(sources) => allows_keyword(sources, "'unsafe-eval'"),
        }
    }
}

fn allows_keyword(sources: &[String], keyword: &str) -> bool {
    !sources.iter().any(|s| s == "'none'") && sources.iter().any(|s| s == keyword)
}

fn disables_unsafe_inline(source: &str) -> bool {
    source == "'strict-dynamic'"
        || ["'nonce-", "'sha256-", "'sha384-", "'sha512-"]
            .iter()
            .any(|prefix| source.starts_with(prefix))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockedKind {
    Inline,
    Eval,
}

/// A `securitypolicyviolation` report raised by the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CspViolation {
    pub directive: String,
    pub blocked: BlockedKind,
    /// Script element that was refused, when the violation came from one
    #[serde(skip)]
    pub node: Option<NodeId>,
    pub sample: String,
}

impl CspViolation {
    pub(crate) fn new(blocked: BlockedKind, node: Option<NodeId>, source: &str) -> Self {
        Self {
            directive: match blocked {
                BlockedKind::Inline => "script-src-elem",
                BlockedKind::Eval => "script-src",
            }
            .to_string(),
            blocked,
            node,
            sample: source.chars().take(40).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directive_allows_everything() {
        let csp = ContentSecurityPolicy::parse("img-src *");
        assert!(csp.allows_inline_scripts());
        assert!(csp.allows_eval());
    }

    #[test]
    fn self_only_blocks_inline_and_eval() {
        let csp = ContentSecurityPolicy::parse("script-src 'self'");
        assert!(!csp.allows_inline_scripts());
        assert!(!csp.allows_eval());
    }

    #[test]
    fn unsafe_inline_is_honoured_without_unsafe_eval() {
        let csp = ContentSecurityPolicy::parse("script-src 'self' 'unsafe-inline'");
        assert!(csp.allows_inline_scripts());
        assert!(!csp.allows_eval());
    }

    #[test]
    fn default_src_is_the_fallback() {
        let csp = ContentSecurityPolicy::parse("default-src 'self' 'unsafe-eval'; img-src *");
        assert!(!csp.allows_inline_scripts());
        assert!(csp.allows_eval());

        let csp = ContentSecurityPolicy::parse("default-src 'none'; script-src 'unsafe-inline'");
        assert!(csp.allows_inline_scripts());
    }

    #[test]
    fn none_overrides_keywords() {
        let csp = ContentSecurityPolicy::parse("script-src 'none' 'unsafe-inline'");
        assert!(!csp.allows_inline_scripts());
    }

    #[test]
    fn nonce_or_hash_switches_unsafe_inline_off() {
        for header in [
            "script-src 'nonce-r4nd' 'unsafe-inline'",
            "script-src 'unsafe-inline' 'sha256-abc='",
            "default-src 'self' 'unsafe-inline' 'strict-dynamic'",
        ] {
            let csp = ContentSecurityPolicy::parse(header);
            assert!(!csp.allows_inline_scripts(), "{header}");
        }
    }

    #[test]
    fn script_src_elem_governs_inline_elements() {
        let csp = ContentSecurityPolicy::parse("script-src 'unsafe-inline' 'unsafe-eval'; script-src-elem 'self'");
        assert!(!csp.allows_inline_scripts());
        assert!(csp.allows_eval());

        let csp = ContentSecurityPolicy::parse("script-src 'self'; script-src-elem 'unsafe-inline'");
        assert!(csp.allows_inline_scripts());
        assert!(!csp.allows_eval());
    }

    #[test]
    fn violations_name_the_effective_directive() {
        assert_eq!(CspViolation::new(BlockedKind::Inline, None, "x").directive, "script-src-elem");
        assert_eq!(CspViolation::new(BlockedKind::Eval, None, "x").directive, "script-src");
    }
}
