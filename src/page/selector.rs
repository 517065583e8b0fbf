//! CSS selector subset used by generated snippets: type, universal, id,
//! class and attribute steps joined by descendant or child combinators.

use super::dom::{DomError, DomResult, Element};
use super::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
    StartsWith { key: String, value: String },
    EndsWith { key: String, value: String },
    Contains { key: String, value: String },
}

impl AttrCondition {
    fn matches(&self, element: &Element) -> bool {
        match self {
            AttrCondition::Exists { key } => element.attr(key).is_some(),
            AttrCondition::Eq { key, value } => element.attr(key) == Some(value.as_str()),
            AttrCondition::StartsWith { key, value } => {
                !value.is_empty() && element.attr(key).is_some_and(|v| v.starts_with(value.as_str()))
            }
            AttrCondition::EndsWith { key, value } => {
                !value.is_empty() && element.attr(key).is_some_and(|v| v.ends_with(value.as_str()))
            }
            AttrCondition::Contains { key, value } => {
                !value.is_empty() && element.attr(key).is_some_and(|v| v.contains(value.as_str()))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CompoundSelector {
    tag: Option<String>,
    universal: bool,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCondition>,
}

impl CompoundSelector {
    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
    }

    fn matches(&self, element: &Element) -> bool {
        self.tag
            .as_ref()
            .map_or(true, |tag| element.tag_name.eq_ignore_ascii_case(tag))
            && self
                .id
                .as_ref()
                .map_or(true, |id| element.attr("id") == Some(id.as_str()))
            && self.classes.iter().all(|class| element.has_class(class))
            && self.attrs.iter().all(|cond| cond.matches(element))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// Relation to the previous step; ignored on the first one.
    combinator: Combinator,
    compound: CompoundSelector,
}

/// One comma-separated alternative of a selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorChain {
    steps: Vec<Step>,
}

impl SelectorChain {
    pub(crate) fn matches(&self, doc: &Document, node: NodeId) -> bool {
        matches_steps(doc, node, &self.steps)
    }
}

fn matches_steps(doc: &Document, node: NodeId, steps: &[Step]) -> bool {
    let Some((last, rest)) = steps.split_last() else {
        return true;
    };
    let Some(element) = doc.element(node) else {
        return false;
    };
    if !last.compound.matches(element) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }

    match last.combinator {
        Combinator::Child => doc
            .parent(node)
            .is_some_and(|parent| matches_steps(doc, parent, rest)),
        Combinator::Descendant => {
            let mut cursor = doc.parent(node);
            while let Some(ancestor) = cursor {
                if matches_steps(doc, ancestor, rest) {
                    return true;
                }
                cursor = doc.parent(ancestor);
            }
            false
        }
    }
}

pub(crate) fn parse_selector_list(selector: &str) -> DomResult<Vec<SelectorChain>> {
    let invalid = || DomError::InvalidSelector(selector.to_string());
    let chars: Vec<char> = selector.chars().collect();
    let mut parser = Parser { chars: &chars, pos: 0 };

    let mut chains = Vec::new();
    let mut steps: Vec<Step> = Vec::new();
    let mut pending: Option<Combinator> = None;

    loop {
        let had_space = parser.skip_whitespace();
        let Some(ch) = parser.peek() else {
            break;
        };

        match ch {
            ',' => {
                if steps.is_empty() || pending == Some(Combinator::Child) {
                    return Err(invalid());
                }
                chains.push(SelectorChain {
                    steps: std::mem::take(&mut steps),
                });
                pending = None;
                parser.pos += 1;
            }
            '>' => {
                if steps.is_empty() || pending == Some(Combinator::Child) {
                    return Err(invalid());
                }
                pending = Some(Combinator::Child);
                parser.pos += 1;
            }
            _ => {
                let combinator = match pending.take() {
                    Some(c) => c,
                    None if steps.is_empty() => Combinator::Descendant,
                    None if had_space => Combinator::Descendant,
                    None => return Err(invalid()),
                };
                let compound = parser.compound().ok_or_else(invalid)?;
                steps.push(Step {
                    combinator,
                    compound,
                });
            }
        }
    }

    if steps.is_empty() || pending.is_some() {
        return Err(invalid());
    }
    chains.push(SelectorChain { steps });
    Ok(chains)
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    fn compound(&mut self) -> Option<CompoundSelector> {
        let mut compound = CompoundSelector::default();

        if self.peek() == Some('*') {
            compound.universal = true;
            self.pos += 1;
        } else if self.peek().is_some_and(|c| c.is_alphabetic()) {
            compound.tag = Some(self.ident()?.to_ascii_lowercase());
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.attr_condition()?);
                }
                Some(c) if c.is_whitespace() || c == ',' || c == '>' => break,
                None => break,
                // pseudo-classes and everything else are outside the subset
                Some(_) => return None,
            }
        }

        if compound.is_empty() {
            None
        } else {
            Some(compound)
        }
    }

    fn attr_condition(&mut self) -> Option<AttrCondition> {
        self.skip_whitespace();
        let key = self.ident()?.to_ascii_lowercase();
        self.skip_whitespace();

        let op = match self.peek()? {
            ']' => {
                self.pos += 1;
                return Some(AttrCondition::Exists { key });
            }
            '=' => {
                self.pos += 1;
                '='
            }
            c @ ('^' | '$' | '*') => {
                self.pos += 1;
                if self.peek()? != '=' {
                    return None;
                }
                self.pos += 1;
                c
            }
            _ => return None,
        };

        self.skip_whitespace();
        let value = match self.peek()? {
            quote @ ('"' | '\'') => {
                self.pos += 1;
                let start = self.pos;
                while self.peek()? != quote {
                    self.pos += 1;
                }
                let value: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                value
            }
            _ => self.ident()?,
        };
        self.skip_whitespace();
        if self.peek()? != ']' {
            return None;
        }
        self.pos += 1;

        Some(match op {
            '^' => AttrCondition::StartsWith { key, value },
            '$' => AttrCondition::EndsWith { key, value },
            '*' => AttrCondition::Contains { key, value },
            _ => AttrCondition::Eq { key, value },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(doc: &Document, selector: &str) -> Vec<String> {
        doc.query_selector_all(selector)
            .unwrap()
            .into_iter()
            .filter_map(|n| doc.attr(n, "id").map(str::to_string))
            .collect()
    }

    const PAGE: &str = r#"
        <div id="top" class="banner promo">
          <p id="p1" class="ad"><span id="s1" data-kind="sponsored-post"></span></p>
        </div>
        <section id="sec"><div id="inner" class="ad"></div></section>
    "#;

    #[test]
    fn class_and_compound_selectors() {
        let doc = Document::parse(PAGE).unwrap();
        assert_eq!(ids(&doc, ".ad"), vec!["p1", "inner"]);
        assert_eq!(ids(&doc, "div.ad"), vec!["inner"]);
        assert_eq!(ids(&doc, ".banner.promo"), vec!["top"]);
        assert_eq!(ids(&doc, "#sec"), vec!["sec"]);
    }

    #[test]
    fn combinators() {
        let doc = Document::parse(PAGE).unwrap();
        assert_eq!(ids(&doc, "div span"), vec!["s1"]);
        assert_eq!(ids(&doc, "div > span"), Vec::<String>::new());
        assert_eq!(ids(&doc, "section>div"), vec!["inner"]);
        assert_eq!(ids(&doc, "#top .ad, section .ad"), vec!["p1", "inner"]);
    }

    #[test]
    fn attribute_conditions() {
        let doc = Document::parse(PAGE).unwrap();
        assert_eq!(ids(&doc, "[data-kind]"), vec!["s1"]);
        assert_eq!(ids(&doc, "[data-kind^='sponsored']"), vec!["s1"]);
        assert_eq!(ids(&doc, "[data-kind$=post]"), vec!["s1"]);
        assert_eq!(ids(&doc, "span[data-kind*=\"red-p\"]"), vec!["s1"]);
        assert_eq!(ids(&doc, "[data-kind=sponsored]"), Vec::<String>::new());
    }

    #[test]
    fn rejects_selectors_outside_the_subset() {
        for bad in ["", "  ", "a:hover", "div >", "> div", ",a", "a,,b", "[x", "#", "a~b"] {
            assert!(
                parse_selector_list(bad).is_err(),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
